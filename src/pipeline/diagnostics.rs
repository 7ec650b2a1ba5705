use super::error::CompileError;
use crate::resolver::ResolutionWarning;
use serde::Serialize;
use std::fmt;

/// Pipeline stage a diagnostic or progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Manifest,
    Resolve,
    Freeze,
    Build,
    Optimize,
    Abi,
    Cache,
    Emit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Manifest => "manifest",
            Stage::Resolve => "resolve",
            Stage::Freeze => "freeze",
            Stage::Build => "build",
            Stage::Optimize => "optimize",
            Stage::Abi => "abi",
            Stage::Cache => "cache",
            Stage::Emit => "emit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub module: String,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: Severity::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn warning(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            severity: Severity::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, module: impl Into<String>, line: Option<usize>) -> Self {
        self.location = Some(Location {
            module: module.into(),
            line,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(error: &CompileError) -> Self {
        let diagnostic = Diagnostic::error(error.stage(), error.to_string());
        match error.location() {
            Some((module, line)) => diagnostic.at(module, line),
            None => diagnostic,
        }
    }
}

impl From<ResolutionWarning> for Diagnostic {
    fn from(warning: ResolutionWarning) -> Self {
        let diagnostic = Diagnostic::warning(Stage::Resolve, warning.message);
        match warning.module {
            Some(module) => diagnostic.at(module, None),
            None => diagnostic,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{severity}[{}]: {}", self.stage, self.message)?;
        if let Some(location) = &self.location {
            match location.line {
                Some(line) => write!(f, " (in {} line {line})", location.module)?,
                None => write!(f, " (in {})", location.module)?,
            }
        }
        Ok(())
    }
}
