use crate::compilation::WasmOptSetting;
use crate::manifest::OptimizationMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line interface of the contract compiler
#[derive(Parser, Debug)]
#[command(name = "contract-forge")]
#[command(about = "Compile Python smart contracts into WASM binaries with ABI metadata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct ContractForgeCli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project directory containing contract.yaml
    #[arg(default_value = ".")]
    pub project_dir: PathBuf,

    /// Manifest file to use instead of <PROJECT_DIR>/contract.yaml
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Override the manifest optimization mode
    #[arg(long, value_enum)]
    pub optimize: Option<OptimizationMode>,

    /// Override the WASM output path (the ABI is written next to it)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Skip the build cache
    #[arg(long)]
    pub no_cache: bool,

    /// Build cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Native toolchain program
    #[arg(long)]
    pub toolchain: Option<String>,

    /// Native build timeout in seconds
    #[arg(long, default_value = "300")]
    pub timeout: u64,

    /// wasm-opt usage: auto, off, or a path to the executable
    #[arg(long, default_value = "auto")]
    pub wasm_opt: WasmOptSetting,

    /// Extra argument forwarded to the toolchain (repeatable)
    #[arg(long = "toolchain-arg", allow_hyphen_values = true)]
    pub toolchain_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a contract project to WASM and ABI JSON
    Build(BuildArgs),

    /// Print the ABI of the entry module
    Abi {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Print the modules reachable from the entry module
    Deps {
        #[command(flatten)]
        project: ProjectArgs,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clean the build cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Build cache directory
        #[arg(long, global = true)]
        cache_dir: Option<PathBuf>,
    },

    /// Locate the native toolchain and report its version
    CheckToolchain {
        /// Native toolchain program
        #[arg(long)]
        toolchain: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Remove every cache entry and blob
    Clear,
    /// Remove entries built by other toolchain versions
    Prune {
        /// Toolchain version to keep; defaults to the installed toolchain
        #[arg(long)]
        keep_version: Option<String>,

        /// Native toolchain program
        #[arg(long)]
        toolchain: Option<String>,
    },
    /// Show entry and blob counts
    Stats,
}

impl ContractForgeCli {
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
