/// External Yul compiler adapter
///
/// The linker only needs "compile this file for this EVM version and give me the
/// printed hex". Keeping that behind a trait lets tests substitute a scripted
/// compiler for `solc`.
use crate::error::{LinkError, Result};
use crate::hex;
use crate::process::run_with_timeout;
use std::path::Path;
use std::time::Duration;

pub trait YulCompiler: Sync {
    /// Program name used in diagnostics.
    fn name(&self) -> &str;

    /// Compile `source` in strict-assembly mode and return the full stdout.
    fn compile(&self, source: &Path, evm_version: &str) -> Result<String>;

    /// Compile and decode the trailing hex blob of the output.
    fn compile_to_bytes(&self, source: &Path, evm_version: &str) -> Result<Vec<u8>> {
        let output = self.compile(source, evm_version)?;
        let blob = hex::last_hex_token(&output).ok_or_else(|| LinkError::CompilerInvocation {
            program: self.name().to_string(),
            message: format!("no hex output for {}", source.display()),
        })?;
        hex::decode(blob)
    }
}

/// `solc <file> --bin --optimize-runs=N --evm-version=V --strict-assembly`
#[derive(Debug, Clone)]
pub struct Solc {
    program: String,
    optimize_runs: u32,
    timeout: Duration,
}

impl Solc {
    pub fn new(program: impl Into<String>, optimize_runs: u32, timeout: Duration) -> Self {
        Self { program: program.into(), optimize_runs, timeout }
    }

    pub fn args(&self, source: &Path, evm_version: &str) -> Vec<String> {
        vec![
            source.display().to_string(),
            "--bin".to_string(),
            format!("--optimize-runs={}", self.optimize_runs),
            format!("--evm-version={}", evm_version),
            "--strict-assembly".to_string(),
        ]
    }
}

impl YulCompiler for Solc {
    fn name(&self) -> &str {
        &self.program
    }

    fn compile(&self, source: &Path, evm_version: &str) -> Result<String> {
        let output = run_with_timeout(&self.program, self.args(source, evm_version), self.timeout)?;
        Ok(output.stdout)
    }
}
