pub mod cache;
pub mod error;
pub mod native;
pub mod optimizer;
pub mod process;
pub mod toolchain;
pub mod workspace;

pub use cache::{BuildArtifact, BuildCache, CacheEntry, CacheKey, CacheStats, CachedArtifact, PruneReport};
pub use error::{CacheError, NativeBuildError, OptimizationError};
pub use native::{BuildFlags, NativeBuilder, ProcessBuilder};
pub use optimizer::{WasmOptSetting, WasmOptimizer};
pub use process::VERSION_QUERY_TIMEOUT;
pub use toolchain::{Toolchain, DEFAULT_TOOLCHAIN, PROTOCOL_VERSION, TOOLCHAIN_ARGS_ENV, TOOLCHAIN_ENV};
pub use workspace::BuildWorkspace;
