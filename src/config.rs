//! Build configuration
//!
//! A build is described by a YAML manifest (`sectlink.yaml` by default). Every field
//! has a default, and CLI flags override manifest values. Module paths are resolved
//! relative to the manifest's directory.

use crate::error::{LinkError, Result};
use crate::linker::SectionLayout;
use crate::process::run_with_timeout;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Oldest `solc` the linker accepts from an svm install.
pub const MIN_SOLC_VERSION: &str = "0.8.28";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One legacy image behind a plain deploy stub.
    Single,
    /// PUSH0 and legacy images behind a capability-detecting shim.
    Dual,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvmVersions {
    pub push0: String,
    pub legacy: String,
}

impl Default for EvmVersions {
    fn default() -> Self {
        Self { push0: "shanghai".to_string(), legacy: "london".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    /// Module sources in section order; the first one is section 1.
    pub modules: Vec<PathBuf>,
    /// Section capacity is `1 << section_shift` bytes.
    pub section_shift: u8,
    pub mode: Mode,
    pub output_dir: PathBuf,
    /// Explicit compiler binary; discovered when absent.
    pub solc: Option<PathBuf>,
    pub evm_versions: EvmVersions,
    pub optimize_runs: u32,
    pub timeout_secs: u64,
    /// Hash the initcode with the external hasher.
    pub hash: bool,
    pub hasher: String,
    /// Seed for sentinel generation. Output does not depend on it.
    pub seed: Option<u64>,
    /// Worker threads for module compilation; rayon's default when absent.
    pub jobs: Option<usize>,
    /// Where temporary module copies are written.
    pub work_dir: Option<PathBuf>,
    /// Replacement for the bundled capability shim template.
    pub shim_template: Option<PathBuf>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            section_shift: SectionLayout::default().shift(),
            mode: Mode::Dual,
            output_dir: PathBuf::from("deployments"),
            solc: None,
            evm_versions: EvmVersions::default(),
            optimize_runs: 1,
            timeout_secs: 120,
            hash: true,
            hasher: "cast".to_string(),
            seed: None,
            jobs: None,
            work_dir: None,
            shim_template: None,
        }
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| LinkError::io(format!("failed to read {}", path.display()), e))?;
        let mut manifest = Self::parse(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        manifest.rebase(base);
        debug!("loaded manifest {} with {} modules", path.display(), manifest.modules.len());
        Ok(manifest)
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| LinkError::config(e.to_string()))
    }

    /// Make relative paths relative to `base`.
    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.modules.iter_mut().for_each(join);
        join(&mut self.output_dir);
        if let Some(template) = self.shim_template.as_mut() {
            join(template);
        }
        if let Some(work_dir) = self.work_dir.as_mut() {
            join(work_dir);
        }
    }

    pub fn layout(&self) -> Result<SectionLayout> {
        SectionLayout::new(self.section_shift)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        self.layout()?;
        if self.modules.is_empty() {
            return Err(LinkError::config("no modules to link"));
        }
        if self.modules.len() >= SectionLayout::MAX_SECTIONS {
            return Err(LinkError::config(format!(
                "{} modules exceed the {} sections a one-byte selector can address",
                self.modules.len(),
                SectionLayout::MAX_SECTIONS - 1
            )));
        }
        if self.timeout_secs == 0 {
            return Err(LinkError::config("timeout_secs must be positive"));
        }
        if self.jobs == Some(0) {
            return Err(LinkError::config("jobs must be positive"));
        }
        Ok(())
    }

    /// Compiler binary: explicit setting, newest svm install (asking forge to install
    /// one when none is found), or `solc` on PATH.
    pub fn solc_program(&self) -> String {
        if let Some(solc) = &self.solc {
            return solc.display().to_string();
        }
        let timeout = self.timeout();
        match discover_solc(&svm_roots(), MIN_SOLC_VERSION, |version| install_with_forge(version, timeout)) {
            Some(path) => {
                info!("using solc at {}", path.display());
                path.display().to_string()
            }
            None => "solc".to_string(),
        }
    }
}

/// Search svm install roots for the newest `solc` at least `min_version`.
pub fn locate_solc(roots: &[PathBuf], min_version: &str) -> Option<PathBuf> {
    roots.iter().filter(|root| root.is_dir()).find_map(|root| newest_solc_in(root, min_version))
}

/// [`locate_solc`], running `install` once with `min_version` when nothing is found.
pub fn discover_solc(roots: &[PathBuf], min_version: &str, install: impl FnOnce(&str)) -> Option<PathBuf> {
    locate_solc(roots, min_version).or_else(|| {
        install(min_version);
        locate_solc(roots, min_version)
    })
}

/// `forge build --use=<version>` makes foundry fetch that compiler into the svm root.
fn install_with_forge(version: &str, timeout: Duration) {
    info!("no solc >= {} installed, asking forge to fetch it", version);
    let flag = format!("--use={}", version);
    if let Err(e) = run_with_timeout("forge", ["build", flag.as_str()], timeout) {
        warn!("forge could not install solc {}: {}", version, e);
    }
}

fn svm_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let home = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")).map(PathBuf::from);
    if let Some(home) = &home {
        roots.push(home.join(".svm"));
    }
    let data_home = env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| home.as_ref().map(|h| h.join(".local").join("share")));
    if let Some(data_home) = data_home {
        roots.push(data_home.join("svm"));
    }
    roots
}

/// svm layout: `<root>/<version>/<executable>`.
pub fn newest_solc_in(root: &Path, min_version: &str) -> Option<PathBuf> {
    let threshold = semver_score(min_version);
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(root).ok()?.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let score = semver_score(&entry.file_name().to_string_lossy());
        if score < threshold || best.as_ref().is_some_and(|(top, _)| score <= *top) {
            continue;
        }
        let executable = fs::read_dir(&dir)
            .ok()
            .and_then(|entries| entries.flatten().map(|e| e.path()).find(|p| p.is_file()));
        if let Some(executable) = executable {
            best = Some((score, executable));
        }
    }
    best.map(|(_, path)| path)
}

/// Orders `major.minor.patch` strings; missing components count as zero.
fn semver_score(version: &str) -> u64 {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    major * 1_000_000 + minor * 1_000 + patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let manifest = Manifest::parse("modules: [yul/Gas.yul]").unwrap();
        assert_eq!(manifest.section_shift, 6);
        assert_eq!(manifest.mode, Mode::Dual);
        assert_eq!(manifest.optimize_runs, 1);
        assert_eq!(manifest.evm_versions.legacy, "london");
        assert!(manifest.hash);
        manifest.validate().unwrap();
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(matches!(Manifest::parse("modulez: []"), Err(LinkError::Config(_))));
    }

    #[test]
    fn test_validation() {
        let mut manifest = Manifest::default();
        assert!(manifest.validate().is_err());
        manifest.modules = vec![PathBuf::from("a.yul")];
        manifest.section_shift = 3;
        assert!(manifest.validate().is_err());
        manifest.section_shift = 6;
        manifest.modules = vec![PathBuf::from("a.yul"); 256];
        assert!(manifest.validate().is_err());
        manifest.modules.truncate(255);
        manifest.validate().unwrap();
    }

    #[test]
    fn test_load_rebases_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sectlink.yaml");
        fs::write(&path, "modules:\n  - yul/Gas.yul\n  - /abs/Basefee.yul\nmode: single\nsection_shift: 7\n").unwrap();
        let manifest = Manifest::load(&path).unwrap();
        assert_eq!(manifest.modules[0], dir.path().join("yul/Gas.yul"));
        assert_eq!(manifest.modules[1], PathBuf::from("/abs/Basefee.yul"));
        assert_eq!(manifest.output_dir, dir.path().join("deployments"));
        assert_eq!(manifest.mode, Mode::Single);
        assert_eq!(manifest.layout().unwrap().capacity(), 128);
    }

    #[test]
    fn test_shipped_manifest() {
        let manifest = Manifest::load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("sectlink.yaml")).unwrap();
        manifest.validate().unwrap();
        for module in &manifest.modules {
            let source = fs::read_to_string(module).unwrap();
            assert!(crate::linker::probe::find_runtime_block(&source).is_some(), "{}", module.display());
        }
    }

    #[test]
    fn test_discover_installs_when_missing() {
        let home = tempdir().unwrap();
        let roots = vec![home.path().join("missing"), home.path().join(".svm")];
        let mut requested = None;
        let found = discover_solc(&roots, MIN_SOLC_VERSION, |version| {
            requested = Some(version.to_string());
            let dir = home.path().join(".svm").join(version);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("solc-{}", version)), "").unwrap();
        });
        assert_eq!(requested.as_deref(), Some(MIN_SOLC_VERSION));
        assert_eq!(found, Some(home.path().join(".svm/0.8.28/solc-0.8.28")));
    }

    #[test]
    fn test_discover_skips_install_when_present() {
        let home = tempdir().unwrap();
        let dir = home.path().join("svm").join("0.8.30");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("solc-0.8.30"), "").unwrap();
        let roots = vec![home.path().join(".svm"), home.path().join("svm")];
        let found = discover_solc(&roots, MIN_SOLC_VERSION, |_| panic!("nothing to install"));
        assert_eq!(found, Some(dir.join("solc-0.8.30")));
        assert_eq!(discover_solc(&roots[..1], MIN_SOLC_VERSION, |_| {}), None);
    }

    #[test]
    fn test_semver_score() {
        assert!(semver_score("0.8.28") > semver_score("0.8.9"));
        assert_eq!(semver_score("0.8"), semver_score("0.8.0"));
        assert_eq!(semver_score("nightly"), 0);
    }

    #[test]
    fn test_newest_solc_in_svm_root() {
        let root = tempdir().unwrap();
        for version in ["0.8.19", "0.8.28", "0.8.30"] {
            let dir = root.path().join(version);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("solc-{}", version)), "").unwrap();
        }
        fs::create_dir_all(root.path().join("0.9.0")).unwrap();
        let found = newest_solc_in(root.path(), MIN_SOLC_VERSION).unwrap();
        assert_eq!(found, root.path().join("0.8.30").join("solc-0.8.30"));
        assert!(newest_solc_in(root.path(), "0.10.0").is_none());
    }
}
