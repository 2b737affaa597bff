/// Build pipeline: modules in, runtime images and initcode out
use super::capability::Capability;
use super::compiler::YulCompiler;
use super::context::BuildContext;
use super::initcode;
use super::module::{Module, ModuleCompiler};
use super::probe::ProbePlan;
use super::runtime::{assemble, differing_offsets, RuntimeImage};
use crate::config::Mode;
use crate::error::{LinkError, Result};
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

pub struct BuildOptions {
    pub mode: Mode,
    /// Worker threads for module compilation; the global rayon pool when `None`.
    pub jobs: Option<usize>,
    /// Yul source of the capability shim (dual mode only).
    pub shim_template: String,
}

#[derive(Debug)]
pub struct BuildArtifacts {
    pub mode: Mode,
    /// One image in single mode; PUSH0 then legacy in dual mode.
    pub images: Vec<RuntimeImage>,
    pub initcode: Vec<u8>,
    /// Offsets where the two dual-mode images differ.
    pub differing_offsets: Vec<usize>,
    /// Filled in by the caller once the initcode has been hashed.
    pub initcode_hash: Option<String>,
}

pub fn build<C: YulCompiler + ?Sized>(
    ctx: &mut BuildContext,
    compiler: &C,
    modules: &[Module],
    options: &BuildOptions,
) -> Result<BuildArtifacts> {
    if modules.is_empty() {
        return Err(LinkError::config("no modules to link"));
    }
    let plan = ProbePlan::new(ctx.layout, modules.len());
    info!(
        "linking {} modules into {}-byte sections ({} probes per module, {} total)",
        modules.len(),
        ctx.layout.capacity(),
        plan.per_module(),
        plan.probes_for(modules.len())
    );

    // Seeds are drawn up front, PUSH0 variant first, so scheduling cannot change them.
    let push0_rngs = match options.mode {
        Mode::Dual => ctx.fork_rngs(modules.len()),
        Mode::Single => Vec::new(),
    };
    let legacy_rngs = ctx.fork_rngs(modules.len());
    let ctx = &*ctx;

    let images = with_jobs(options.jobs, move || -> Result<Vec<RuntimeImage>> {
        match options.mode {
            Mode::Single => Ok(vec![build_variant(ctx, compiler, &plan, Capability::Legacy, modules, legacy_rngs)?]),
            Mode::Dual => {
                let (push0, legacy) = rayon::join(
                    || build_variant(ctx, compiler, &plan, Capability::Push0, modules, push0_rngs),
                    || build_variant(ctx, compiler, &plan, Capability::Legacy, modules, legacy_rngs),
                );
                Ok(vec![push0?, legacy?])
            }
        }
    })??;

    let (initcode, differing) = match images.as_slice() {
        [image] => (initcode::single(image)?, Vec::new()),
        [push0, legacy] => {
            let differing = differing_offsets(push0, legacy)?;
            if differing != push0.substitutions {
                warn!(
                    "variants differ at {} offsets but the PUSH0 rewrite touched {}",
                    differing.len(),
                    push0.substitutions.len()
                );
            }
            debug!("variants differ at offsets {:?}", differing);
            (initcode::conditional(ctx, compiler, &options.shim_template, push0, legacy)?, differing)
        }
        _ => unreachable!("one or two variants"),
    };
    info!("initcode: {} bytes", initcode.len());

    Ok(BuildArtifacts { mode: options.mode, images, initcode, differing_offsets: differing, initcode_hash: None })
}

/// Compile every module for one capability and assemble the image.
/// The first failing module aborts the variant.
fn build_variant<C: YulCompiler + ?Sized>(
    ctx: &BuildContext,
    compiler: &C,
    plan: &ProbePlan,
    capability: Capability,
    modules: &[Module],
    rngs: Vec<StdRng>,
) -> Result<RuntimeImage> {
    let module_compiler = ModuleCompiler::new(ctx, compiler, plan, capability);
    let compiled = modules
        .par_iter()
        .zip(rngs.into_par_iter())
        .map(|(module, mut rng)| module_compiler.compile(module, &mut rng))
        .collect::<Result<Vec<_>>>()?;
    let image = assemble(ctx.layout, capability, compiled)?;
    info!("runtime image {}: {} bytes", capability, image.len());
    Ok(image)
}

fn with_jobs<T: Send>(jobs: Option<usize>, work: impl FnOnce() -> T + Send) -> Result<T> {
    match jobs {
        None => Ok(work()),
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| LinkError::config(format!("failed to start {} worker threads: {}", threads, e)))?;
            Ok(pool.install(work))
        }
    }
}
