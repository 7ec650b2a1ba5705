use super::diagnostics::{Diagnostic, Stage};
use std::fmt;

/// Where a single compile invocation stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Init,
    Resolved,
    Frozen,
    Built { cache_hit: bool },
    Optimized,
    AbiExtracted,
    Done,
    Failed { stage: Stage, diagnostic: Diagnostic },
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildState::Done | BuildState::Failed { .. })
    }

    /// Whether `next` directly follows this state
    pub fn accepts(&self, next: &BuildState) -> bool {
        use BuildState::*;
        match (self, next) {
            (current, Failed { .. }) => !current.is_terminal(),
            (Init, Resolved)
            | (Resolved, Frozen)
            | (Frozen, Built { .. })
            | (Built { .. }, Optimized)
            | (Optimized, AbiExtracted)
            | (AbiExtracted, Done) => true,
            _ => false,
        }
    }

    /// Stage whose completion leads into this state
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BuildState::Init => None,
            BuildState::Resolved => Some(Stage::Resolve),
            BuildState::Frozen => Some(Stage::Freeze),
            BuildState::Built { .. } => Some(Stage::Build),
            BuildState::Optimized => Some(Stage::Optimize),
            BuildState::AbiExtracted => Some(Stage::Abi),
            BuildState::Done => Some(Stage::Emit),
            BuildState::Failed { stage, .. } => Some(*stage),
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Init => write!(f, "init"),
            BuildState::Resolved => write!(f, "resolved"),
            BuildState::Frozen => write!(f, "frozen"),
            BuildState::Built { cache_hit: true } => write!(f, "built (cache hit)"),
            BuildState::Built { cache_hit: false } => write!(f, "built"),
            BuildState::Optimized => write!(f, "optimized"),
            BuildState::AbiExtracted => write!(f, "abi-extracted"),
            BuildState::Done => write!(f, "done"),
            BuildState::Failed { stage, .. } => write!(f, "failed during {stage}"),
        }
    }
}
