/// Target capability variants (with and without `PUSH0`)
use crate::config::EvmVersions;
use sectlink_evm::opcode::{instructions, DUP1, PUSH0};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Shanghai and later: single-byte `PUSH0`.
    Push0,
    /// Pre-shanghai.
    Legacy,
}

impl Capability {
    pub fn evm_version<'a>(&self, versions: &'a EvmVersions) -> &'a str {
        match self {
            Capability::Push0 => &versions.push0,
            Capability::Legacy => &versions.legacy,
        }
    }

    /// File name of this variant's runtime image in dual mode.
    pub fn runtime_file_name(&self) -> &'static str {
        match self {
            Capability::Push0 => "runtime_with_push0.txt",
            Capability::Legacy => "runtime_without_push0.txt",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Push0 => write!(f, "with PUSH0"),
            Capability::Legacy => write!(f, "without PUSH0"),
        }
    }
}

/// Rewrite every instruction-aligned `PUSH0 DUP1` into `PUSH0 PUSH0`.
///
/// Both leave two zero words on the stack and occupy two bytes, so section layout is
/// unchanged. Returns the offsets of the rewritten `DUP1` bytes.
pub fn rewrite_zero_push(code: &mut [u8]) -> Vec<usize> {
    let sites: Vec<usize> = instructions(code)
        .filter(|instruction| instruction.opcode == PUSH0)
        .map(|instruction| instruction.offset + 1)
        .filter(|&next| code.get(next) == Some(&DUP1))
        .collect();
    for &site in &sites {
        code[site] = PUSH0;
    }
    sites
}
