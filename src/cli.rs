/// CLI commands: combined build and single-module inspection
use crate::config::{EvmVersions, Manifest, Mode};
use crate::error::{LinkError, Result};
use crate::hex;
use crate::linker::{build, initcode, BuildContext, BuildOptions, Capability, Module, Solc, YulCompiler};
use crate::report::{render_report, write_artifacts, CastAddressor, ContentAddressor};
use clap::{Args, Parser, Subcommand};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_MANIFEST: &str = "sectlink.yaml";

#[derive(Parser, Debug)]
#[command(name = "sectlink")]
#[command(about = "Link Yul modules into one sectioned EVM runtime with a capability-selecting deployer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile every module and write runtime images and initcode
    Build(BuildArgs),
    /// Compile one Yul file for both EVM versions and print its initcode and runtime
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Build manifest (defaults to ./sectlink.yaml when present)
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Module sources in section order; replaces the manifest's list
    pub modules: Vec<PathBuf>,

    /// Section capacity as a power of two
    #[arg(long)]
    pub shift: Option<u8>,

    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    #[arg(long = "out-dir")]
    pub out_dir: Option<PathBuf>,

    /// Path to the solc binary
    #[arg(long)]
    pub solc: Option<PathBuf>,

    /// Seconds allowed per external command
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Skip hashing the initcode
    #[arg(long = "no-hash")]
    pub no_hash: bool,

    /// Seed for probe sentinels
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker threads for module compilation
    #[arg(long)]
    pub jobs: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Yul source file
    pub file: PathBuf,

    #[arg(long)]
    pub solc: Option<PathBuf>,

    #[arg(long, default_value_t = 120)]
    pub timeout: u64,
}

impl BuildArgs {
    /// Manifest with command-line overrides applied.
    pub fn manifest(&self) -> Result<Manifest> {
        let mut manifest = match &self.manifest {
            Some(path) => Manifest::load(path)?,
            None if Path::new(DEFAULT_MANIFEST).is_file() => Manifest::load(Path::new(DEFAULT_MANIFEST))?,
            None => Manifest::default(),
        };
        if !self.modules.is_empty() {
            manifest.modules = self.modules.clone();
        }
        if let Some(shift) = self.shift {
            manifest.section_shift = shift;
        }
        if let Some(mode) = self.mode {
            manifest.mode = mode;
        }
        if let Some(out_dir) = &self.out_dir {
            manifest.output_dir = out_dir.clone();
        }
        if let Some(solc) = &self.solc {
            manifest.solc = Some(solc.clone());
        }
        if let Some(timeout) = self.timeout {
            manifest.timeout_secs = timeout;
        }
        if self.no_hash {
            manifest.hash = false;
        }
        if self.seed.is_some() {
            manifest.seed = self.seed;
        }
        if self.jobs.is_some() {
            manifest.jobs = self.jobs;
        }
        manifest.validate()?;
        Ok(manifest)
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(args) => run_build(&args),
        Command::Inspect(args) => run_inspect(&args),
    }
}

pub fn run_build(args: &BuildArgs) -> Result<()> {
    let manifest = args.manifest()?;
    let solc = Solc::new(manifest.solc_program(), manifest.optimize_runs, manifest.timeout());
    let shim_template = match &manifest.shim_template {
        Some(path) => {
            fs::read_to_string(path).map_err(|e| LinkError::io(format!("failed to read {}", path.display()), e))?
        }
        None => sectlink_evm::CONDITIONAL_INITCODE_YUL.to_string(),
    };

    let mut ctx = BuildContext::from_manifest(&manifest)?;
    let modules = Module::from_paths(&manifest.modules);
    let options = BuildOptions { mode: manifest.mode, jobs: manifest.jobs, shim_template };
    let mut artifacts = build(&mut ctx, &solc, &modules, &options)?;

    if manifest.hash {
        let hasher = CastAddressor::new(manifest.hasher.clone(), manifest.timeout());
        artifacts.initcode_hash = Some(hasher.digest(&artifacts.initcode)?);
    }

    write_artifacts(&manifest.output_dir, &artifacts)?;
    print!("{}", render_report(&artifacts));
    Ok(())
}

/// Initcode and runtime of one file under one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub capability: Capability,
    pub initcode: Vec<u8>,
    pub runtime: Vec<u8>,
}

pub fn inspect<C: YulCompiler + ?Sized>(compiler: &C, file: &Path, versions: &EvmVersions) -> Result<Vec<Inspection>> {
    [Capability::Push0, Capability::Legacy]
        .into_iter()
        .map(|capability| {
            let initcode = compiler.compile_to_bytes(file, capability.evm_version(versions))?;
            let runtime = match initcode::deployed_code(&initcode) {
                Some(runtime) => runtime.to_vec(),
                None => {
                    warn!("{} ({}): no RETURN INVALID boundary in the output", file.display(), capability);
                    Vec::new()
                }
            };
            Ok(Inspection { capability, initcode, runtime })
        })
        .collect()
}

pub fn render_inspection(inspections: &[Inspection]) -> String {
    let mut out = String::new();
    for inspection in inspections {
        let _ = writeln!(out, "Initcode {}:\n{}", inspection.capability, hex::encode(&inspection.initcode));
    }
    for inspection in inspections {
        let _ = writeln!(out, "Runtime {}:\n{}", inspection.capability, hex::encode(&inspection.runtime));
    }
    out
}

pub fn run_inspect(args: &InspectArgs) -> Result<()> {
    let manifest = Manifest { solc: args.solc.clone(), timeout_secs: args.timeout, ..Manifest::default() };
    let solc = Solc::new(manifest.solc_program(), manifest.optimize_runs, Duration::from_secs(args.timeout));
    info!("inspecting {}", args.file.display());
    let inspections = inspect(&solc, &args.file, &manifest.evm_versions)?;
    print!("{}", render_inspection(&inspections));
    Ok(())
}
