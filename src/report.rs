/// Build outputs: per-module stats, initcode hashing, artifact files and the printed report
use crate::config::Mode;
use crate::error::{LinkError, Result};
use crate::hex;
use crate::linker::{BuildArtifacts, RuntimeImage};
use crate::process::run_with_timeout;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

const RULE_WIDTH: usize = 64;

/// One module's line in the stats table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRow {
    pub path: String,
    /// Section index as `0x..`.
    pub section: String,
    /// Unpadded section bytes, including the leading `JUMPDEST`.
    pub runtime_bytes: usize,
}

pub fn stats(image: &RuntimeImage) -> Vec<StatsRow> {
    image
        .modules()
        .iter()
        .map(|section| StatsRow {
            path: section.path.display().to_string(),
            section: format!("0x{:02x}", section.index),
            runtime_bytes: section.used,
        })
        .collect()
}

/// Left-aligned columns separated by two spaces, with a header row.
pub fn render_table(rows: &[StatsRow]) -> String {
    let header = ["file path".to_string(), "section".to_string(), "runtime bytes".to_string()];
    let cells: Vec<[String; 3]> = std::iter::once(header)
        .chain(rows.iter().map(|row| [row.path.clone(), row.section.clone(), row.runtime_bytes.to_string()]))
        .collect();
    let widths: Vec<usize> = (0..3).map(|col| cells.iter().map(|row| row[col].len()).max().unwrap_or(0)).collect();

    let mut out = String::new();
    for row in &cells {
        let line = row.iter().zip(&widths).map(|(cell, width)| format!("{:<width$}", cell, width = width)).collect::<Vec<_>>();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }
    out
}

/// Produces a content address for deployable bytes.
pub trait ContentAddressor {
    fn digest(&self, bytes: &[u8]) -> Result<String>;
}

/// `cast keccak 0x<hex>`
pub struct CastAddressor {
    program: String,
    timeout: Duration,
}

impl CastAddressor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self { program: program.into(), timeout }
    }
}

impl ContentAddressor for CastAddressor {
    fn digest(&self, bytes: &[u8]) -> Result<String> {
        let input = format!("0x{}", hex::encode(bytes));
        let output = run_with_timeout(&self.program, ["keccak", input.as_str()], self.timeout)
            .map_err(|e| LinkError::Hash(e.to_string()))?;
        let digest = hex::last_hex_token(&output.stdout)
            .ok_or_else(|| LinkError::Hash(format!("{} printed no digest", self.program)))?;
        Ok(format!("0x{}", digest.to_ascii_lowercase()))
    }
}

/// File name and hex contents of every artifact the build produces.
pub fn artifact_files(artifacts: &BuildArtifacts) -> Vec<(&'static str, String)> {
    let mut files = Vec::with_capacity(3);
    match artifacts.mode {
        Mode::Single => {
            for image in &artifacts.images {
                files.push(("runtime.txt", hex::encode(image.bytes())));
            }
        }
        Mode::Dual => {
            for image in &artifacts.images {
                files.push((image.capability.runtime_file_name(), hex::encode(image.bytes())));
            }
        }
    }
    files.push(("initcode.txt", hex::encode(&artifacts.initcode)));
    files
}

/// Write all artifacts into `dir`.
///
/// Every target is checked and every file is staged before the first rename, so a
/// failure up to that point leaves previous artifacts untouched. The renames run one
/// file at a time: if one fails after another succeeded (e.g. the disk vanished
/// mid-way), `dir` holds a mix of old and new artifacts and the build must be rerun.
pub fn write_artifacts(dir: &Path, artifacts: &BuildArtifacts) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| LinkError::io(format!("failed to create {}", dir.display()), e))?;

    let files = artifact_files(artifacts);
    for (name, _) in &files {
        let target = dir.join(name);
        if target.is_dir() {
            return Err(LinkError::io(
                format!("cannot write {}", target.display()),
                io::Error::new(io::ErrorKind::Other, "a directory is in the way"),
            ));
        }
    }

    let mut staged = Vec::new();
    for (name, contents) in files {
        let mut file =
            NamedTempFile::new_in(dir).map_err(|e| LinkError::io(format!("failed to stage {}", name), e))?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| LinkError::io(format!("failed to stage {}", name), e))?;
        staged.push((dir.join(name), file));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (path, file) in staged {
        file.persist(&path).map_err(|e| LinkError::io(format!("failed to write {}", path.display()), e.error))?;
        debug!("wrote {}", path.display());
        written.push(path);
    }
    info!("wrote {} artifacts to {}", written.len(), dir.display());
    Ok(written)
}

fn stats_title(image: &RuntimeImage, mode: Mode) -> String {
    match mode {
        Mode::Single => "Stats".to_string(),
        Mode::Dual => format!("Stats {}", image.capability),
    }
}

fn runtime_title(image: &RuntimeImage, mode: Mode) -> String {
    match mode {
        Mode::Single => "Runtime".to_string(),
        Mode::Dual => format!("Runtime {}", image.capability),
    }
}

pub fn render_report(artifacts: &BuildArtifacts) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();
    for image in &artifacts.images {
        let _ = writeln!(out, "{}:", stats_title(image, artifacts.mode));
        out.push_str(&render_table(&stats(image)));
        let _ = writeln!(out, "{}", rule);
    }
    for image in &artifacts.images {
        let _ = writeln!(out, "{} ({} bytes):", runtime_title(image, artifacts.mode), image.len());
        let _ = writeln!(out, "{}", hex::encode(image.bytes()));
        let _ = writeln!(out, "{}", rule);
    }
    if artifacts.mode == Mode::Dual {
        let offsets: Vec<String> = artifacts.differing_offsets.iter().map(|at| format!("{:#06x}", at)).collect();
        let _ = writeln!(out, "Variant differences ({} offsets):", offsets.len());
        let _ = writeln!(out, "{}", offsets.join(" "));
        let _ = writeln!(out, "{}", rule);
    }
    let _ = writeln!(out, "Initcode ({} bytes):", artifacts.initcode.len());
    let _ = writeln!(out, "{}", hex::encode(&artifacts.initcode));
    if let Some(hash) = &artifacts.initcode_hash {
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Initcodehash:");
        let _ = writeln!(out, "{}", hash);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::capability::Capability;
    use crate::linker::module::{CompiledModule, Module};
    use crate::linker::runtime::assemble;
    use crate::linker::section::SectionLayout;

    fn image(capability: Capability) -> RuntimeImage {
        let modules = vec![
            CompiledModule {
                module: Module { path: PathBuf::from("yul/Gas.yul"), section: 1 },
                code: vec![0x5b, 0x5a, 0x00],
                substitutions: Vec::new(),
            },
            CompiledModule {
                module: Module { path: PathBuf::from("yul/Extcodesize.yul"), section: 2 },
                code: vec![0x5b; 17],
                substitutions: Vec::new(),
            },
        ];
        assemble(SectionLayout::new(5).unwrap(), capability, modules).unwrap()
    }

    fn artifacts(mode: Mode) -> BuildArtifacts {
        let images = match mode {
            Mode::Single => vec![image(Capability::Legacy)],
            Mode::Dual => vec![image(Capability::Push0), image(Capability::Legacy)],
        };
        BuildArtifacts { mode, images, initcode: vec![0xaa, 0xbb], differing_offsets: Vec::new(), initcode_hash: None }
    }

    #[test]
    fn test_stats_rows() {
        let rows = stats(&image(Capability::Legacy));
        assert_eq!(
            rows,
            vec![
                StatsRow { path: "yul/Gas.yul".into(), section: "0x01".into(), runtime_bytes: 3 },
                StatsRow { path: "yul/Extcodesize.yul".into(), section: "0x02".into(), runtime_bytes: 17 },
            ]
        );
    }

    #[test]
    fn test_table_columns_align() {
        let table = render_table(&stats(&image(Capability::Legacy)));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "file path            section  runtime bytes");
        assert_eq!(lines[1], "yul/Gas.yul          0x01     3");
        assert_eq!(lines[2], "yul/Extcodesize.yul  0x02     17");
    }

    #[test]
    fn test_artifact_names_by_mode() {
        let names: Vec<_> = artifact_files(&artifacts(Mode::Single)).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["runtime.txt", "initcode.txt"]);
        let names: Vec<_> = artifact_files(&artifacts(Mode::Dual)).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["runtime_with_push0.txt", "runtime_without_push0.txt", "initcode.txt"]);
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("deployments");
        let built = artifacts(Mode::Dual);
        let written = write_artifacts(&out, &built).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(fs::read_to_string(out.join("initcode.txt")).unwrap(), "aabb");
        assert_eq!(fs::read_to_string(out.join("runtime_with_push0.txt")).unwrap(), hex::encode(built.images[0].bytes()));
        // Only the artifacts remain, no staging files.
        assert_eq!(fs::read_dir(&out).unwrap().count(), 3);
    }

    #[test]
    fn test_report_sections() {
        let mut built = artifacts(Mode::Dual);
        built.initcode_hash = Some("0x1234".to_string());
        let report = render_report(&built);
        assert!(report.contains("Stats with PUSH0:\n"));
        assert!(report.contains("Stats without PUSH0:\n"));
        assert!(report.contains("Runtime with PUSH0 (96 bytes):\n"));
        assert!(report.contains("Initcode (2 bytes):\naabb\n"));
        assert!(report.contains("Variant differences (0 offsets):\n\n"));
        assert!(report.ends_with("Initcodehash:\n0x1234\n"));
        assert!(!render_report(&artifacts(Mode::Single)).contains("Initcodehash"));
    }

    #[test]
    fn test_report_lists_variant_differences() {
        let mut built = artifacts(Mode::Dual);
        built.differing_offsets = vec![0x42, 0x85];
        let report = render_report(&built);
        assert!(report.contains("Variant differences (2 offsets):\n0x0042 0x0085\n"));
        assert!(!render_report(&artifacts(Mode::Single)).contains("Variant differences"));
    }

    #[test]
    fn test_blocked_target_keeps_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("deployments");
        fs::create_dir_all(out.join("initcode.txt")).unwrap();
        fs::write(out.join("runtime_with_push0.txt"), "old").unwrap();

        let err = write_artifacts(&out, &artifacts(Mode::Dual)).unwrap_err();
        assert!(matches!(err, LinkError::Io { .. }));
        assert_eq!(fs::read_to_string(out.join("runtime_with_push0.txt")).unwrap(), "old");
        assert!(!out.join("runtime_without_push0.txt").exists());
        // Nothing staged is left behind.
        assert_eq!(fs::read_dir(&out).unwrap().count(), 2);
    }

    #[test]
    fn test_cast_addressor_reads_last_hex() {
        // `echo keccak 0xab` stands in for `cast`; its output ends with the argument.
        let hasher = CastAddressor::new("echo", Duration::from_secs(5));
        assert_eq!(hasher.digest(&[0xab, 0xcd]).unwrap(), "0xabcd");
    }

    #[test]
    fn test_missing_hasher() {
        let hasher = CastAddressor::new("sectlink-missing-cast", Duration::from_secs(1));
        assert!(matches!(hasher.digest(&[0x00]), Err(LinkError::Hash(_))));
    }
}
