/// Per-build state threaded through every stage
///
/// Holds the section geometry, the EVM version tags, the scratch directory and the
/// single randomness source of the build. Nothing here is global, so two builds in
/// one process (or two processes on one host) never share sentinels or temp files.
use super::section::SectionLayout;
use crate::config::{EvmVersions, Manifest};
use crate::error::{LinkError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

pub struct BuildContext {
    pub layout: SectionLayout,
    pub evm_versions: EvmVersions,
    pub work_dir: PathBuf,
    rng: StdRng,
}

impl BuildContext {
    pub fn new(layout: SectionLayout, evm_versions: EvmVersions, work_dir: PathBuf, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { layout, evm_versions, work_dir, rng }
    }

    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        Ok(Self::new(
            manifest.layout()?,
            manifest.evm_versions.clone(),
            manifest.work_dir.clone().unwrap_or_else(env::temp_dir),
            manifest.seed,
        ))
    }

    /// Split off `count` independent generators, drawn in order so a seeded build
    /// stays reproducible however the work is scheduled afterwards.
    pub fn fork_rngs(&mut self, count: usize) -> Vec<StdRng> {
        (0..count).map(|_| StdRng::seed_from_u64(self.rng.gen())).collect()
    }

    /// Write `contents` to a uniquely named `.yul` file in the work dir.
    /// The file is removed when the handle drops.
    pub fn temp_source(&self, contents: &str) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("tmp")
            .suffix(".yul")
            .tempfile_in(&self.work_dir)
            .map_err(|e| LinkError::io(format!("failed to create temp file in {}", self.work_dir.display()), e))?;
        let written = file.write_all(contents.as_bytes()).and_then(|_| file.flush());
        written.map_err(|e| LinkError::io(format!("failed to write {}", file.path().display()), e))?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_seeded_forks_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = BuildContext::new(SectionLayout::default(), EvmVersions::default(), dir.path().into(), Some(42));
        let mut b = BuildContext::new(SectionLayout::default(), EvmVersions::default(), dir.path().into(), Some(42));
        let xs: Vec<u64> = a.fork_rngs(3).iter_mut().map(|r| r.gen()).collect();
        let ys: Vec<u64> = b.fork_rngs(3).iter_mut().map(|r| r.gen()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs[0], xs[1]);
    }

    #[test]
    fn test_temp_sources_are_unique_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(SectionLayout::default(), EvmVersions::default(), dir.path().into(), None);
        let a = ctx.temp_source("object \"A\" {}").unwrap();
        let b = ctx.temp_source("object \"B\" {}").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(fs::read_to_string(a.path()).unwrap(), "object \"A\" {}");
        let name = a.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("tmp") && name.ends_with(".yul"));
        let path = a.path().to_path_buf();
        drop(a);
        assert!(!path.exists());
    }
}
