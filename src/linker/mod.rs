/// Section linker
///
/// Turns a list of Yul modules into one runtime image addressed by a one-byte
/// selector, plus the initcode that deploys it.
pub mod capability;
pub mod compiler;
pub mod context;
pub mod initcode;
pub mod module;
pub mod pipeline;
pub mod probe;
pub mod runtime;
pub mod section;
pub mod sentinel;

pub use capability::Capability;
pub use compiler::{Solc, YulCompiler};
pub use context::BuildContext;
pub use module::Module;
pub use pipeline::{build, BuildArtifacts, BuildOptions};
pub use runtime::RuntimeImage;
pub use section::SectionLayout;
