//! Diagnostics produced while evaluating a description file.
//!
//! Evaluation never fails with an `Err`: problems travel with the [`EvalOutput`] as
//! diagnostics, and the reconciler decides from them whether the result may be applied.
//!
//! [`EvalOutput`]: crate::evaluator::EvalOutput
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where in a description file a diagnostic was raised. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalDiagnostic {
    /// The evaluation could not produce a usable result. Any error marks the node `Invalid`
    /// and the result is not reconciled.
    Error {
        /// Description of what went wrong
        message: String,
        location: Option<SourceLocation>,
    },

    /// Something suspicious that does not prevent the result from being used (missing
    /// include file, unknown operator)
    Warning(String),

    Info(String),
}

impl EvalDiagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            location: None,
        }
    }

    pub fn error_at(message: impl Into<String>, path: impl Into<PathBuf>, line: usize) -> Self {
        Self::Error {
            message: message.into(),
            location: Some(SourceLocation {
                path: path.into(),
                line,
            }),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Warning(message.into())
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info(message.into())
    }

    /// Check if this diagnostic prevents the result from being applied
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Error { message, .. } => message,
            Self::Warning(msg) | Self::Info(msg) => msg,
        }
    }
}

impl std::fmt::Display for EvalDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error {
                message,
                location: Some(location),
            } => write!(
                f,
                "Error: {}:{}: {message}",
                location.path.display(),
                location.line
            ),
            Self::Error {
                message,
                location: None,
            } => write!(f, "Error: {message}"),
            Self::Warning(msg) => write!(f, "Warning: {msg}"),
            Self::Info(msg) => write!(f, "Info: {msg}"),
        }
    }
}

/// True if any diagnostic in the slice is fatal.
pub fn has_fatal(diagnostics: &[EvalDiagnostic]) -> bool {
    diagnostics.iter().any(|d| d.is_fatal())
}
