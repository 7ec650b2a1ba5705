use super::error::NativeBuildError;
use super::process::VERSION_QUERY_TIMEOUT;
use super::toolchain::{Toolchain, PROTOCOL_VERSION};
use super::workspace::BuildWorkspace;
use crate::freezer::FrozenManifest;
use crate::manifest::OptimizationMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to keep draining output pipes after the child exits
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Flags forwarded to the native toolchain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildFlags {
    pub mode: OptimizationMode,
    pub debug_symbols: bool,
    pub extra_args: Vec<String>,
}

impl BuildFlags {
    pub fn new(mode: OptimizationMode, debug_symbols: bool) -> Self {
        Self {
            mode,
            debug_symbols,
            extra_args: Vec::new(),
        }
    }

    /// Unambiguous byte encoding for cache keys
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "mode={};debug-symbols={};args={}",
            self.mode,
            self.debug_symbols,
            self.extra_args.len()
        )
        .into_bytes();
        for arg in &self.extra_args {
            out.extend_from_slice(format!(";{}:", arg.len()).as_bytes());
            out.extend_from_slice(arg.as_bytes());
        }
        out
    }
}

/// Something that turns a frozen manifest into raw WASM
#[async_trait]
pub trait NativeBuilder: Send + Sync {
    /// Version string that identifies the toolchain output for caching
    async fn toolchain_version(&self) -> Result<String, NativeBuildError>;

    async fn build(
        &self,
        manifest: &FrozenManifest,
        flags: &BuildFlags,
    ) -> Result<Vec<u8>, NativeBuildError>;
}

/// Runs the external toolchain executable, one child process per build
pub struct ProcessBuilder {
    program: String,
    temp_root: PathBuf,
    timeout: Duration,
    toolchain: OnceCell<Toolchain>,
}

impl ProcessBuilder {
    pub fn new(program: impl Into<String>, temp_root: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            temp_root: temp_root.into(),
            timeout,
            toolchain: OnceCell::new(),
        }
    }

    /// Locate the toolchain on first use
    pub async fn toolchain(&self) -> Result<&Toolchain, NativeBuildError> {
        self.toolchain
            .get_or_try_init(|| {
                Toolchain::detect(&self.program, self.timeout.min(VERSION_QUERY_TIMEOUT))
            })
            .await
    }
}

#[async_trait]
impl NativeBuilder for ProcessBuilder {
    async fn toolchain_version(&self) -> Result<String, NativeBuildError> {
        Ok(self.toolchain().await?.version.clone())
    }

    async fn build(
        &self,
        manifest: &FrozenManifest,
        flags: &BuildFlags,
    ) -> Result<Vec<u8>, NativeBuildError> {
        let toolchain = self.toolchain().await?;
        let workspace = BuildWorkspace::create(&self.temp_root, manifest).await?;
        let output_path = workspace.output_path();

        let mut cmd = Command::new(&toolchain.program);
        cmd.arg("build")
            .arg("--protocol")
            .arg(PROTOCOL_VERSION.to_string())
            .arg("--manifest")
            .arg(workspace.manifest_path())
            .arg("--entry")
            .arg(&manifest.entry)
            .arg("--output")
            .arg(&output_path)
            .arg("--opt")
            .arg(flags.mode.as_str());
        if flags.debug_symbols {
            cmd.arg("--debug-symbols");
        }
        cmd.args(&flags.extra_args)
            .current_dir(workspace.path())
            .env("FROZEN_MANIFEST", workspace.manifest_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            "Running {} for entry {} (mode {})",
            toolchain.program.display(),
            manifest.entry,
            flags.mode
        );
        let started = Instant::now();

        let mut child = cmd.spawn().map_err(|e| NativeBuildError::Spawn {
            program: toolchain.program.display().to_string(),
            reason: e.to_string(),
        })?;

        let (stdout, stdout_task) = capture(child.stdout.take());
        let (stderr, stderr_task) = capture(child.stderr.take());

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "Toolchain exceeded {}s timeout, killing process",
                    self.timeout.as_secs()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out toolchain: {}", e);
                }
                stdout_task.abort();
                stderr_task.abort();
                return Err(NativeBuildError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                    stderr: snapshot(&stderr),
                });
            }
        };

        for task in [stdout_task, stderr_task] {
            if tokio::time::timeout(PIPE_DRAIN_GRACE, task).await.is_err() {
                debug!("Toolchain output pipe still open after exit");
            }
        }
        let stdout = snapshot(&stdout);
        let stderr = snapshot(&stderr);
        if !stdout.trim().is_empty() {
            debug!("Toolchain stdout:\n{}", stdout.trim_end());
        }

        if !status.success() {
            let status = match status.code() {
                Some(code) => format!("exit code {code}"),
                None => "termination by signal".to_string(),
            };
            return Err(NativeBuildError::Failed { status, stderr });
        }

        let missing = || NativeBuildError::MissingOutput {
            expected_path: output_path.display().to_string(),
        };
        let wasm = match tokio::fs::read(&output_path).await {
            Ok(bytes) if bytes.is_empty() => return Err(missing()),
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(missing()),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Native build produced {} bytes in {:?}",
            wasm.len(),
            started.elapsed()
        );
        Ok(wasm)
    }
}

type Captured = Arc<Mutex<Vec<u8>>>;

/// Drain a child pipe into a shared buffer that can be read at any time
fn capture<R>(reader: Option<R>) -> (Captured, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);

    let task = tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });

    (buffer, task)
}

fn snapshot(buffer: &Captured) -> String {
    buffer
        .lock()
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}
