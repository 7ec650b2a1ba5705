//! The compile pipeline: resolve, freeze, build, optimize and extract the
//! ABI, then write both artifacts.

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod progress;
pub mod state;

pub use compiler::{BuildOutput, ContractCompiler, ResolvedProject};
pub use config::{default_cache_dir, CompilerConfig};
pub use diagnostics::{Diagnostic, Location, Severity, Stage};
pub use error::{BuildFailure, CompileError};
pub use progress::{ProgressListener, StageStatus};
pub use state::BuildState;
