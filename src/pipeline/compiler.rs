use super::config::CompilerConfig;
use super::diagnostics::{Diagnostic, Stage};
use super::error::{BuildFailure, CompileError};
use super::progress::{ProgressListener, StageStatus};
use super::state::BuildState;
use crate::abi::{AbiDescriptor, AbiError, AbiExtractor};
use crate::compilation::{
    BuildArtifact, BuildCache, BuildFlags, CacheKey, NativeBuilder, ProcessBuilder, Toolchain,
    WasmOptimizer,
};
use crate::freezer::{FrozenManifest, ModuleFreezer};
use crate::manifest::ProjectManifest;
use crate::resolver::{DependencyGraph, DependencyResolver};
use crate::utils::atomic_write_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a successful compile
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub wasm: Vec<u8>,
    pub abi: AbiDescriptor,
    pub wasm_path: PathBuf,
    pub abi_path: PathBuf,
    pub cache_hit: bool,
    pub cache_key: Option<CacheKey>,
    /// Digest of the frozen manifest the binary was built from
    pub frozen_digest: String,
    pub modules: Vec<String>,
    /// Warnings collected along the way
    pub diagnostics: Vec<Diagnostic>,
    pub duration: Duration,
}

/// Resolution result for callers that stop before building
#[derive(Debug, Clone)]
pub struct ResolvedProject {
    pub graph: DependencyGraph,
    pub diagnostics: Vec<Diagnostic>,
}

struct BuiltContract {
    frozen: FrozenManifest,
    wasm: Vec<u8>,
    cache_hit: bool,
    cache_key: Option<CacheKey>,
}

/// Drives one contract from sources to WASM plus ABI
pub struct ContractCompiler {
    config: CompilerConfig,
    builder: Arc<dyn NativeBuilder>,
    optimizer: OnceCell<WasmOptimizer>,
    progress: Option<Arc<dyn ProgressListener>>,
}

impl ContractCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        let program = Toolchain::configured_program(config.toolchain.as_deref());
        let builder = ProcessBuilder::new(program, &config.temp_dir, config.build_timeout);
        Self::with_builder(config, Arc::new(builder))
    }

    pub fn with_builder(config: CompilerConfig, builder: Arc<dyn NativeBuilder>) -> Self {
        Self {
            config,
            builder,
            optimizer: OnceCell::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, listener: impl ProgressListener + 'static) -> Self {
        self.progress = Some(Arc::new(listener));
        self
    }

    /// Use a specific optimizer instead of detecting one from the config
    pub fn with_optimizer(mut self, optimizer: WasmOptimizer) -> Self {
        self.optimizer = OnceCell::new_with(Some(optimizer));
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<BuildCache> {
        self.config
            .enable_cache
            .then(|| BuildCache::new(&self.config.cache_dir))
    }

    pub async fn compile(
        &self,
        project_root: &Path,
        manifest: &ProjectManifest,
    ) -> Result<BuildOutput, BuildFailure> {
        let started = Instant::now();
        let mut run = Run::new(self.progress.as_deref());
        info!(
            "Compiling {} in {}",
            manifest.entry.display(),
            project_root.display()
        );

        let graph = match self.resolve_graph(project_root, manifest, &mut run).await {
            Ok(graph) => graph,
            Err(error) => return Err(run.fail(vec![error])),
        };
        run.advance(BuildState::Resolved, StageStatus::Completed);

        let entry = graph.entry_node();
        let (entry_name, entry_path) = (entry.name.clone(), entry.path.clone());
        let abi_task: JoinHandle<Result<AbiDescriptor, AbiError>> =
            tokio::task::spawn_blocking(move || {
                AbiExtractor::extract_from_file(&entry_name, &entry_path)
            });

        let built = self.build_branch(&graph, manifest, &mut run).await;
        let abi = join_abi(graph.entry(), abi_task).await;

        let (built, abi) = match (built, abi) {
            (Ok(built), Ok(abi)) => (built, abi),
            (Err(build_error), Ok(_)) => return Err(run.fail(vec![build_error])),
            (Ok(_), Err(abi_error)) => return Err(run.fail(vec![abi_error])),
            (Err(build_error), Err(abi_error)) => {
                return Err(run.fail(vec![build_error, abi_error]))
            }
        };

        if let Err(error) = check_abi_source(graph.entry(), &abi, &built.frozen) {
            return Err(run.fail(vec![error]));
        }
        run.advance(BuildState::AbiExtracted, StageStatus::Completed);

        let wasm_path = project_root.join(&manifest.output);
        let abi_path = project_root.join(&manifest.abi_output);
        if let Err(error) = emit(&wasm_path, &abi_path, &built.wasm, &abi).await {
            return Err(run.fail(vec![error]));
        }
        run.advance(BuildState::Done, StageStatus::Completed);

        let duration = started.elapsed();
        info!(
            "Wrote {} ({} bytes, {} methods) in {:?}{}",
            wasm_path.display(),
            built.wasm.len(),
            abi.methods.len(),
            duration,
            if built.cache_hit { " from cache" } else { "" }
        );

        Ok(BuildOutput {
            wasm: built.wasm,
            abi,
            wasm_path,
            abi_path,
            cache_hit: built.cache_hit,
            cache_key: built.cache_key,
            frozen_digest: built.frozen.digest(),
            modules: graph.modules().map(|m| m.name.clone()).collect(),
            diagnostics: run.diagnostics,
            duration,
        })
    }

    /// Resolve the dependency graph without building anything
    pub async fn resolve(
        &self,
        project_root: &Path,
        manifest: &ProjectManifest,
    ) -> Result<ResolvedProject, BuildFailure> {
        let mut run = Run::new(None);
        match self.resolve_graph(project_root, manifest, &mut run).await {
            Ok(graph) => Ok(ResolvedProject {
                graph,
                diagnostics: run.diagnostics,
            }),
            Err(error) => Err(run.fail(vec![error])),
        }
    }

    /// Resolve the project and extract the ABI of its entry module
    pub async fn extract_abi(
        &self,
        project_root: &Path,
        manifest: &ProjectManifest,
    ) -> Result<(AbiDescriptor, Vec<Diagnostic>), BuildFailure> {
        let mut run = Run::new(None);
        let graph = match self.resolve_graph(project_root, manifest, &mut run).await {
            Ok(graph) => graph,
            Err(error) => return Err(run.fail(vec![error])),
        };

        let entry = graph.entry_node().clone();
        let task = tokio::task::spawn_blocking(move || AbiExtractor::extract_from_node(&entry));
        match join_abi(graph.entry(), task).await {
            Ok(abi) => Ok((abi, run.diagnostics)),
            Err(error) => Err(run.fail(vec![error])),
        }
    }

    async fn resolve_graph(
        &self,
        project_root: &Path,
        manifest: &ProjectManifest,
        run: &mut Run<'_>,
    ) -> Result<DependencyGraph, CompileError> {
        let resolver = DependencyResolver::new(project_root, manifest, &self.config.base_library)?;
        let resolution = resolver.resolve().await?;
        for warning in resolution.warnings {
            run.warn(warning.into());
        }
        Ok(resolution.graph)
    }

    async fn build_branch(
        &self,
        graph: &DependencyGraph,
        manifest: &ProjectManifest,
        run: &mut Run<'_>,
    ) -> Result<BuiltContract, CompileError> {
        let frozen = ModuleFreezer::new(&self.config.base_library)
            .freeze(graph)
            .await?;
        run.advance(BuildState::Frozen, StageStatus::Completed);

        let mut flags = BuildFlags::new(manifest.optimize, manifest.include_debug_info);
        flags.extra_args = self.config.extra_args.clone();

        let optimizer = self
            .optimizer
            .get_or_try_init(|| {
                WasmOptimizer::detect(&self.config.wasm_opt, self.config.build_timeout)
            })
            .await?;

        let cached = match self.cache() {
            Some(cache) => {
                let toolchain_version = self.builder.toolchain_version().await?;
                let key = CacheKey::compute(
                    &frozen,
                    &flags,
                    &toolchain_version,
                    &optimizer.fingerprint(),
                );
                Some((cache, key, toolchain_version))
            }
            None => None,
        };

        if let Some((cache, key, _)) = &cached {
            if let Some(hit) = cache.lookup(key).await {
                debug!("Reusing build stored at {}", hit.created_at);
                run.advance(BuildState::Built { cache_hit: true }, StageStatus::Cached);
                run.advance(BuildState::Optimized, StageStatus::Cached);
                return Ok(BuiltContract {
                    frozen,
                    wasm: hit.artifact.optimized,
                    cache_hit: true,
                    cache_key: Some(key.clone()),
                });
            }
        }

        let raw = self.builder.build(&frozen, &flags).await?;
        run.advance(BuildState::Built { cache_hit: false }, StageStatus::Completed);

        let optimized = optimizer
            .optimize(&raw, flags.mode, flags.debug_symbols)
            .await?;
        run.advance(BuildState::Optimized, StageStatus::Completed);

        let cache_key = match cached {
            Some((cache, key, toolchain_version)) => {
                let artifact = BuildArtifact {
                    raw,
                    optimized: optimized.clone(),
                    mode: flags.mode,
                    toolchain_version,
                };
                if let Err(e) = cache.store(&key, &artifact).await {
                    warn!("Failed to store build in cache: {}", e);
                    run.warn(Diagnostic::warning(
                        Stage::Cache,
                        format!("build was not cached: {e}"),
                    ));
                }
                Some(key)
            }
            None => None,
        };

        Ok(BuiltContract {
            frozen,
            wasm: optimized,
            cache_hit: false,
            cache_key,
        })
    }
}

/// State and diagnostics of one invocation
struct Run<'a> {
    state: BuildState,
    listener: Option<&'a dyn ProgressListener>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Run<'a> {
    fn new(listener: Option<&'a dyn ProgressListener>) -> Self {
        Self {
            state: BuildState::Init,
            listener,
            diagnostics: Vec::new(),
        }
    }

    fn advance(&mut self, next: BuildState, status: StageStatus) {
        debug_assert!(
            self.state.accepts(&next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!("Build state {} -> {}", self.state, next);
        if let (Some(listener), Some(stage)) = (self.listener, next.stage()) {
            listener.on_transition(stage, status);
        }
        self.state = next;
    }

    fn warn(&mut self, diagnostic: Diagnostic) {
        warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    /// Record every error and move to `Failed` with the first one
    fn fail(mut self, errors: Vec<CompileError>) -> BuildFailure {
        let diagnostics: Vec<Diagnostic> = errors.iter().map(Diagnostic::from).collect();
        let first = diagnostics
            .first()
            .cloned()
            .unwrap_or_else(|| Diagnostic::error(Stage::Emit, "build failed"));
        let stage = first.stage;

        for diagnostic in &diagnostics {
            warn!("{}", diagnostic);
        }
        self.advance(
            BuildState::Failed {
                stage,
                diagnostic: first,
            },
            StageStatus::Failed,
        );

        self.diagnostics.extend(diagnostics);
        BuildFailure {
            stage,
            diagnostics: self.diagnostics,
        }
    }
}

async fn join_abi(
    module: &str,
    task: JoinHandle<Result<AbiDescriptor, AbiError>>,
) -> Result<AbiDescriptor, CompileError> {
    match task.await {
        Ok(Ok(abi)) => Ok(abi),
        Ok(Err(source)) => Err(CompileError::Abi {
            module: module.to_string(),
            source,
        }),
        Err(e) => Err(CompileError::Task {
            stage: Stage::Abi,
            reason: e.to_string(),
        }),
    }
}

/// The ABI must describe the same entry source that was frozen
fn check_abi_source(
    module: &str,
    abi: &AbiDescriptor,
    frozen: &FrozenManifest,
) -> Result<(), CompileError> {
    let frozen_digest = frozen
        .entry_module()
        .map(|entry| entry.digest.as_str())
        .unwrap_or_default();
    if abi.source_digest == frozen_digest {
        return Ok(());
    }

    Err(CompileError::StaleAbi {
        module: module.to_string(),
        abi_digest: abi.source_digest.clone(),
        frozen_digest: frozen_digest.to_string(),
    })
}

/// Publish the WASM and the ABI together, or neither
async fn emit(
    wasm_path: &Path,
    abi_path: &Path,
    wasm: &[u8],
    abi: &AbiDescriptor,
) -> Result<(), CompileError> {
    let abi_json = abi.to_json().map_err(|e| CompileError::Task {
        stage: Stage::Emit,
        reason: format!("ABI serialization failed: {e}"),
    })?;

    atomic_write_all(&[(wasm_path, wasm), (abi_path, abi_json.as_bytes())])
        .await
        .map_err(|e| CompileError::Emit {
            path: e.path.display().to_string(),
            error: e.error,
        })
}
