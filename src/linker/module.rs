/// Module compilation: inject probes, run the compiler, cut out the runtime bytes
use super::capability::{rewrite_zero_push, Capability};
use super::compiler::YulCompiler;
use super::context::BuildContext;
use super::probe::{self, ProbePlan};
use crate::error::{LinkError, Result};
use rand::rngs::StdRng;
use sectlink_evm::opcode::JUMPDEST;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error};

/// One input unit and the section it occupies (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub path: PathBuf,
    pub section: usize,
}

impl Module {
    /// Number modules from 1 in list order.
    pub fn from_paths(paths: &[PathBuf]) -> Vec<Module> {
        paths.iter().enumerate().map(|(i, path)| Module { path: path.clone(), section: i + 1 }).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub module: Module,
    /// `JUMPDEST` followed by the module's runtime bytes.
    pub code: Vec<u8>,
    /// Section-relative offsets changed by the capability rewrite.
    pub substitutions: Vec<usize>,
}

pub struct ModuleCompiler<'a, C: YulCompiler + ?Sized> {
    ctx: &'a BuildContext,
    compiler: &'a C,
    plan: &'a ProbePlan,
    capability: Capability,
}

impl<'a, C: YulCompiler + ?Sized> ModuleCompiler<'a, C> {
    pub fn new(ctx: &'a BuildContext, compiler: &'a C, plan: &'a ProbePlan, capability: Capability) -> Self {
        Self { ctx, compiler, plan, capability }
    }

    pub fn compile(&self, module: &Module, rng: &mut StdRng) -> Result<CompiledModule> {
        let source = fs::read_to_string(&module.path)
            .map_err(|e| LinkError::io(format!("failed to read {}", module.path.display()), e))?;

        let probes = self.plan.draw(module.section, rng);
        let injected = probe::inject(&source, &probes).ok_or_else(|| {
            error!("{}: no runtime object to probe", module.path.display());
            LinkError::RuntimeObjectNotFound { path: module.path.clone() }
        })?;

        // Dropping the handle removes the file, including on the error paths below.
        let temp = self.ctx.temp_source(&injected)?;
        let evm_version = self.capability.evm_version(&self.ctx.evm_versions);
        debug!(
            "compiling {} (section {:#04x}, {} probes, {}) via {}",
            module.path.display(),
            module.section,
            probes.len(),
            evm_version,
            temp.path().display()
        );
        let output = self.compiler.compile_to_bytes(temp.path(), evm_version)?;

        let start = probes.last().and_then(|last| probe::code_start_after(&output, last, self.capability)).ok_or_else(|| {
            error!(
                "{} (section {:#04x}): final probe missing from {} bytes of {} output",
                module.path.display(),
                module.section,
                output.len(),
                self.compiler.name()
            );
            LinkError::SentinelNotFound { path: module.path.clone(), section: module.section }
        })?;

        let mut code = Vec::with_capacity(1 + output.len() - start);
        code.push(JUMPDEST);
        code.extend_from_slice(&output[start..]);

        let substitutions = match self.capability {
            Capability::Push0 => rewrite_zero_push(&mut code),
            Capability::Legacy => Vec::new(),
        };

        Ok(CompiledModule { module: module.clone(), code, substitutions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvmVersions;
    use crate::linker::compiler::scripted::ScriptedCompiler;
    use crate::linker::section::SectionLayout;
    use rand::SeedableRng;
    use std::path::Path;
    use tempfile::TempDir;

    const GAS_YUL: &str = r#"object "Gas" {
    code {
        datacopy(0, dataoffset("runtime"), datasize("runtime"))
        return(0, datasize("runtime"))
    }
    object "runtime" {
        code {
            mstore(0x00, gas())
            return(0x00, 0x20)
        }
    }
}
"#;

    // GAS PUSH0 MSTORE PUSH1 0x20 PUSH0 RETURN
    const GAS_BODY: [u8; 8] = [0x5a, 0x5f, 0x52, 0x60, 0x20, 0x5f, 0xf3, 0x00];

    fn fixture() -> (TempDir, BuildContext, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        fs::create_dir(&work).unwrap();
        let path = dir.path().join("Gas.yul");
        fs::write(&path, GAS_YUL).unwrap();
        let ctx = BuildContext::new(SectionLayout::new(6).unwrap(), EvmVersions::default(), work, Some(1));
        (dir, ctx, path)
    }

    fn compile_at(section: usize, compiler: &ScriptedCompiler, capability: Capability) -> Result<CompiledModule> {
        let (_dir, ctx, path) = fixture();
        let plan = ProbePlan::new(ctx.layout, section);
        let module = Module { path, section };
        ModuleCompiler::new(&ctx, compiler, &plan, capability).compile(&module, &mut StdRng::seed_from_u64(section as u64))
    }

    #[test]
    fn test_extracts_body_after_probes() {
        let compiler = ScriptedCompiler::new().body("\"Gas\"", GAS_BODY.to_vec());
        let compiled = compile_at(1, &compiler, Capability::Legacy).unwrap();
        assert_eq!(compiled.code[0], JUMPDEST);
        assert_eq!(&compiled.code[1..], &GAS_BODY);
        assert!(compiled.substitutions.is_empty());
    }

    #[test]
    fn test_probe_count_does_not_change_code() {
        let compiler = ScriptedCompiler::new().body("\"Gas\"", GAS_BODY.to_vec());
        let first = compile_at(1, &compiler, Capability::Legacy).unwrap();
        let fifth = compile_at(5, &compiler, Capability::Legacy).unwrap();
        assert_eq!(first.code, fifth.code);
    }

    #[test]
    fn test_push0_variant_rewrites_zero_dup() {
        // PUSH0 DUP1 MSTORE STOP
        let compiler = ScriptedCompiler::new().body_for("\"Gas\"", "shanghai", vec![0x5f, 0x80, 0x52, 0x00]);
        let compiled = compile_at(2, &compiler, Capability::Push0).unwrap();
        assert_eq!(compiled.code, vec![0x5b, 0x5f, 0x5f, 0x52, 0x00]);
        assert_eq!(compiled.substitutions, vec![2]);
    }

    #[test]
    fn test_max_shift_extracts_for_both_capabilities() {
        let (_dir, mut ctx, path) = fixture();
        ctx.layout = SectionLayout::new(SectionLayout::MAX_SHIFT).unwrap();
        let plan = ProbePlan::new(ctx.layout, 1);
        let compiler = ScriptedCompiler::new().body("\"Gas\"", GAS_BODY.to_vec());
        for capability in [Capability::Push0, Capability::Legacy] {
            let module = Module { path: path.clone(), section: 1 };
            let compiled = ModuleCompiler::new(&ctx, &compiler, &plan, capability)
                .compile(&module, &mut StdRng::seed_from_u64(13))
                .unwrap();
            assert_eq!(&compiled.code[1..], &GAS_BODY, "{}", capability);
        }
    }

    #[test]
    fn test_missing_probe_fails_hard() {
        let mut compiler = ScriptedCompiler::new().body("\"Gas\"", GAS_BODY.to_vec());
        compiler.drop_probes = true;
        match compile_at(3, &compiler, Capability::Legacy) {
            Err(LinkError::SentinelNotFound { section, .. }) => assert_eq!(section, 3),
            other => panic!("expected SentinelNotFound, got {:?}", other.map(|c| c.code)),
        }
    }

    #[test]
    fn test_missing_runtime_object() {
        let (dir, ctx, _) = fixture();
        let path = dir.path().join("Bad.yul");
        fs::write(&path, "object \"Bad\" { code { stop() } }").unwrap();
        let compiler = ScriptedCompiler::new();
        let plan = ProbePlan::new(ctx.layout, 1);
        let err = ModuleCompiler::new(&ctx, &compiler, &plan, Capability::Legacy)
            .compile(&Module { path, section: 1 }, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, LinkError::RuntimeObjectNotFound { .. }));
        assert_eq!(compiler.calls(), 0);
    }

    #[test]
    fn test_temp_files_removed_after_failure() {
        let (_dir, ctx, path) = fixture();
        let mut compiler = ScriptedCompiler::new();
        compiler.fail = true;
        let plan = ProbePlan::new(ctx.layout, 1);
        let err = ModuleCompiler::new(&ctx, &compiler, &plan, Capability::Legacy)
            .compile(&Module { path, section: 1 }, &mut StdRng::seed_from_u64(0))
            .unwrap_err();
        assert!(matches!(err, LinkError::CompilerInvocation { .. }));
        assert_eq!(fs::read_dir(&ctx.work_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_module_numbering() {
        let modules = Module::from_paths(&[PathBuf::from("a.yul"), PathBuf::from("b.yul")]);
        assert_eq!(modules[1].section, 2);
        assert_eq!(modules[0].path, Path::new("a.yul"));
    }
}
