use crate::compilation::WasmOptSetting;
use crate::freezer::BaseLibrary;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Parent directory of per-build toolchain workspaces
    pub temp_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub build_timeout: Duration,
    pub enable_cache: bool,
    /// Toolchain program; falls back to the environment, then the default name
    pub toolchain: Option<String>,
    /// Extra arguments appended to the toolchain command line
    pub extra_args: Vec<String>,
    pub wasm_opt: WasmOptSetting,
    pub base_library: BaseLibrary,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("contract-forge"),
            cache_dir: default_cache_dir(),
            build_timeout: Duration::from_secs(300), // 5 minutes
            enable_cache: true,
            toolchain: None,
            extra_args: Vec::new(),
            wasm_opt: WasmOptSetting::Auto,
            base_library: BaseLibrary::default(),
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("contract-forge")
}
