#![cfg_attr(not(feature = "std"), no_std)]

//! EVM-side support for the section linker.
//!
//! - `opcode`: opcode constants and an instruction walker that respects push immediates
//! - `word`: 256-bit machine word (`testing` feature)
//! - `machine`: a small interpreter covering the opcodes used by dispatchers, deploy stubs and
//!   the capability-detection shim (`testing` feature)

extern crate alloc;

#[cfg(any(test, feature = "testing"))]
pub mod machine;
pub mod opcode;
#[cfg(any(test, feature = "testing"))]
pub mod word;

#[cfg(any(test, feature = "testing"))]
pub use machine::{run, Env, Fault, Halt, Outcome};
pub use opcode::{find_aligned, instructions, Instruction};
#[cfg(any(test, feature = "testing"))]
pub use word::Word;

/// Yul source of the deploy-time capability selector. Its runtime object becomes the
/// head of dual-variant initcode after two literals are patched.
pub const CONDITIONAL_INITCODE_YUL: &str = include_str!("../yul/ConditionalInitcode.yul");
