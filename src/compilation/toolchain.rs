use super::error::NativeBuildError;
use super::process::output_within;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Executable used when nothing else is configured
pub const DEFAULT_TOOLCHAIN: &str = "mpy-wasm-build";

/// Environment variable overriding the toolchain executable
pub const TOOLCHAIN_ENV: &str = "CONTRACT_FORGE_TOOLCHAIN";

/// Environment variable with extra toolchain arguments, shell-quoted
pub const TOOLCHAIN_ARGS_ENV: &str = "CONTRACT_FORGE_TOOLCHAIN_ARGS";

/// Version of the argument/output contract spoken with the toolchain
pub const PROTOCOL_VERSION: u32 = 1;

/// A located native toolchain and the version it reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
    pub program: PathBuf,
    pub version: String,
}

impl Toolchain {
    /// Explicit setting, then `CONTRACT_FORGE_TOOLCHAIN`, then the default
    pub fn configured_program(explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| std::env::var(TOOLCHAIN_ENV).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_TOOLCHAIN.to_string())
    }

    /// Split a shell-quoted argument string such as `--jobs 2 --define 'A=1 2'`
    pub fn split_args(raw: &str) -> Result<Vec<String>, NativeBuildError> {
        shell_words::split(raw).map_err(|e| NativeBuildError::InvalidArguments {
            raw: raw.to_string(),
            reason: e.to_string(),
        })
    }

    /// Extra arguments from `CONTRACT_FORGE_TOOLCHAIN_ARGS`, if set
    pub fn env_args() -> Result<Vec<String>, NativeBuildError> {
        match std::env::var(TOOLCHAIN_ARGS_ENV) {
            Ok(raw) => Self::split_args(&raw),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Locate `program` and ask it for its version, waiting at most `timeout`
    pub async fn detect(program: &str, timeout: Duration) -> Result<Self, NativeBuildError> {
        let path = which::which(program).map_err(|e| NativeBuildError::ToolchainNotFound {
            program: program.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Querying toolchain version from {}", path.display());
        let mut cmd = Command::new(&path);
        cmd.arg("--version");
        let output = output_within(cmd, timeout).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => NativeBuildError::ToolchainNotFound {
                program: program.to_string(),
                reason: format!("`--version` {e}"),
            },
            _ => NativeBuildError::Spawn {
                program: path.display().to_string(),
                reason: e.to_string(),
            },
        })?;

        if !output.status.success() {
            return Err(NativeBuildError::ToolchainNotFound {
                program: program.to_string(),
                reason: format!(
                    "`--version` exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.lines().next().unwrap_or_default().trim().to_string();
        if version.is_empty() {
            return Err(NativeBuildError::ToolchainNotFound {
                program: program.to_string(),
                reason: "`--version` printed nothing".to_string(),
            });
        }

        info!("Using toolchain {} ({})", path.display(), version);
        Ok(Self {
            program: path,
            version,
        })
    }
}
