//! Linker errors. Every variant is fatal: the pipeline stops and writes nothing.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to run {program}: {message}")]
    CompilerInvocation { program: String, message: String },

    #[error("{program} did not finish within {timeout:?}")]
    CompilerTimeout { program: String, timeout: Duration },

    #[error("no `object \"runtime\" {{ code {{` block in {path}")]
    RuntimeObjectNotFound { path: PathBuf },

    #[error("probe bytes not found in compiler output for {path} (section {section:#04x})")]
    SentinelNotFound { path: PathBuf, section: usize },

    #[error("{path} needs {size} bytes but section {section:#04x} holds {capacity}")]
    SectionOverflow { path: PathBuf, section: usize, size: usize, capacity: usize },

    #[error("cannot patch capability shim: {0}")]
    ShimPatch(String),

    #[error("runtime image of {size} bytes does not fit a {limit}-byte length immediate")]
    ImageTooLarge { size: usize, limit: usize },

    #[error("variant images differ in length: {push0} (push0) vs {legacy} (legacy)")]
    VariantMismatch { push0: usize, legacy: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("hashing failed: {0}")]
    Hash(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LinkError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
