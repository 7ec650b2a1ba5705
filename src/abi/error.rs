use thiserror::Error;

/// Errors raised while deriving the ABI from the entry module
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("Cannot read entry module {module} from {path}: {reason}")]
    Read {
        module: String,
        path: String,
        reason: String,
    },

    #[error("Cannot read entry module {module} (line {line}): {reason}")]
    Syntax {
        module: String,
        line: usize,
        reason: String,
    },

    #[error("Function `{function}` is marked both `{first}` and `{second}`")]
    ConflictingKinds {
        function: String,
        first: String,
        second: String,
        line: usize,
    },

    #[error("`init` is declared on both `{first}` and `{second}`")]
    DuplicateInit {
        first: String,
        second: String,
        line: usize,
    },

    #[error("Exported method `{name}` is defined more than once (lines {first_line} and {line})")]
    DuplicateMethod {
        name: String,
        first_line: usize,
        line: usize,
    },

    #[error("Exported method `{function}` takes variadic parameter `{param}`")]
    VariadicParameter {
        function: String,
        param: String,
        line: usize,
    },

    #[error("Unsupported annotation in `{function}`: {reason}")]
    UnsupportedAnnotation {
        function: String,
        reason: String,
        line: usize,
    },
}

impl AbiError {
    pub fn line(&self) -> Option<usize> {
        match self {
            AbiError::Read { .. } => None,
            AbiError::Syntax { line, .. }
            | AbiError::ConflictingKinds { line, .. }
            | AbiError::DuplicateInit { line, .. }
            | AbiError::DuplicateMethod { line, .. }
            | AbiError::VariadicParameter { line, .. }
            | AbiError::UnsupportedAnnotation { line, .. } => Some(*line),
        }
    }
}
