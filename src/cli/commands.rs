use crate::cli::options::{BuildArgs, CacheAction, Commands, ContractForgeCli, ProjectArgs};
use crate::cli::output::{
    print_build_failure, print_build_summary, print_cache_stats, print_dependencies,
    print_dependencies_json, print_diagnostics, print_prune_report, print_toolchain,
};
use crate::compilation::{BuildCache, Toolchain, VERSION_QUERY_TIMEOUT};
use crate::manifest::ProjectManifest;
use crate::pipeline::{default_cache_dir, CompilerConfig, ContractCompiler, Stage, StageStatus};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Run the selected subcommand
pub async fn execute(cli: ContractForgeCli) -> Result<()> {
    match cli.command {
        Commands::Build(args) => build(args).await,
        Commands::Abi { project } => abi(project).await,
        Commands::Deps { project, json } => deps(project, json).await,
        Commands::Cache { action, cache_dir } => cache(action, cache_dir).await,
        Commands::CheckToolchain { toolchain } => check_toolchain(toolchain).await,
    }
}

async fn load_manifest(project: &ProjectArgs) -> Result<ProjectManifest> {
    let manifest = match &project.manifest {
        Some(path) => ProjectManifest::load(path).await,
        None => ProjectManifest::load_from_dir(&project.project_dir).await,
    }
    .context("Failed to load project manifest")?;
    debug!("Manifest: {:?}", manifest);
    Ok(manifest)
}

async fn build(args: BuildArgs) -> Result<()> {
    let mut manifest = load_manifest(&args.project).await?;
    if let Some(mode) = args.optimize {
        manifest.optimize = mode;
    }
    if let Some(output) = args.output {
        manifest.abi_output = output.with_extension("abi.json");
        manifest.output = output;
    }

    let mut extra_args = Toolchain::env_args()?;
    extra_args.extend(args.toolchain_args);

    let mut config = CompilerConfig {
        enable_cache: !args.no_cache,
        toolchain: args.toolchain,
        build_timeout: Duration::from_secs(args.timeout),
        wasm_opt: args.wasm_opt,
        extra_args,
        ..CompilerConfig::default()
    };
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }

    let compiler = ContractCompiler::new(config).with_progress(|stage: Stage, status: StageStatus| {
        debug!("Stage {} {}", stage, status);
    });

    match compiler.compile(&args.project.project_dir, &manifest).await {
        Ok(output) => {
            print_build_summary(&output);
            Ok(())
        }
        Err(failure) => {
            print_build_failure(&failure);
            Err(failure.into())
        }
    }
}

async fn abi(project: ProjectArgs) -> Result<()> {
    let manifest = load_manifest(&project).await?;
    let compiler = ContractCompiler::new(CompilerConfig::default());

    match compiler.extract_abi(&project.project_dir, &manifest).await {
        Ok((abi, warnings)) => {
            print_diagnostics(&warnings);
            print!("{}", abi.to_json()?);
            Ok(())
        }
        Err(failure) => {
            print_build_failure(&failure);
            Err(failure.into())
        }
    }
}

async fn deps(project: ProjectArgs, json: bool) -> Result<()> {
    let manifest = load_manifest(&project).await?;
    let compiler = ContractCompiler::new(CompilerConfig::default());

    match compiler.resolve(&project.project_dir, &manifest).await {
        Ok(resolved) if json => Ok(print_dependencies_json(&resolved)?),
        Ok(resolved) => {
            print_dependencies(&resolved);
            Ok(())
        }
        Err(failure) => {
            print_build_failure(&failure);
            Err(failure.into())
        }
    }
}

async fn cache(action: CacheAction, cache_dir: Option<PathBuf>) -> Result<()> {
    let cache = BuildCache::new(cache_dir.unwrap_or_else(default_cache_dir));
    info!("Using cache at {}", cache.dir().display());

    match action {
        CacheAction::Clear => {
            let removed = cache.clear().await?;
            println!("🧹 Cleared {}", cache.dir().display());
            print_cache_stats(&removed);
        }
        CacheAction::Prune {
            keep_version,
            toolchain,
        } => {
            let version = match keep_version {
                Some(version) => version,
                None => detect_toolchain(toolchain).await?.version,
            };
            let report = cache.prune(&version).await?;
            print_prune_report(&report);
        }
        CacheAction::Stats => {
            if !exists(cache.dir()).await {
                println!("Cache directory {} does not exist", cache.dir().display());
            }
            print_cache_stats(&cache.stats()?);
        }
    }
    Ok(())
}

async fn check_toolchain(toolchain: Option<String>) -> Result<()> {
    let toolchain = detect_toolchain(toolchain).await?;
    print_toolchain(&toolchain);
    Ok(())
}

async fn detect_toolchain(explicit: Option<String>) -> Result<Toolchain> {
    let program = Toolchain::configured_program(explicit.as_deref());
    Toolchain::detect(&program, VERSION_QUERY_TIMEOUT)
        .await
        .with_context(|| format!("Native toolchain `{program}` is not usable"))
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
