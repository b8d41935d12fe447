use std::{fmt, io, path::PathBuf, path::StripPrefixError};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ProjectError {
    #[error("Invalid Command: {0}")]
    Command(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Description file is not writable: {0:?}")]
    NotWritable(PathBuf),
    #[error("Description file could not be evaluated: {0}")]
    ParseInvalid(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Service error: {0}")]
    Service(String),
}

impl From<StripPrefixError> for ProjectError {
    fn from(src: StripPrefixError) -> ProjectError {
        ProjectError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for ProjectError {
    fn from(src: toml::de::Error) -> ProjectError {
        ProjectError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for ProjectError {
    fn from(src: toml::ser::Error) -> ProjectError {
        ProjectError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for ProjectError {
    fn from(src: JsonError) -> ProjectError {
        ProjectError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for ProjectError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => ProjectError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => ProjectError::PermissionDenied,
            _ => ProjectError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for ProjectError {
    fn from(x: fmt::Error) -> Self {
        ProjectError::Custom(format!("{x}"))
    }
}

impl From<RegexError> for ProjectError {
    fn from(x: RegexError) -> Self {
        ProjectError::Serialization(format!("Regex parse failed: {x}"))
    }
}

impl From<walkdir::Error> for ProjectError {
    fn from(x: walkdir::Error) -> Self {
        match x.io_error().map(|e| e.kind()) {
            Some(io::ErrorKind::NotFound) => ProjectError::NotFound(format!("{x}")),
            Some(io::ErrorKind::PermissionDenied) => ProjectError::PermissionDenied,
            _ => ProjectError::Io(format!("directory walk failed: {x}")),
        }
    }
}

impl<T: fmt::Debug> From<TokioSendError<T>> for ProjectError {
    fn from(x: TokioSendError<T>) -> Self {
        ProjectError::Service(format!(
            "Channel send Error, could not transmit message {:?}",
            x.0
        ))
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ProjectError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ProjectError::Service("reply channel closed before an answer was sent".to_string())
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for ProjectError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => ProjectError::Custom(format!(
                "notify-debouncer: {}, paths: {:?}",
                msg, notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => ProjectError::Custom(format!(
                "notify-debouncer: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => ProjectError::NotFound(format!(
                "notify-debouncer: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => ProjectError::NotFound(format!(
                "notify-debouncer: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                ProjectError::Custom("notify-debouncer invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                ProjectError::Custom("notify-debouncer max file watch limit reached".to_string())
            }
        }
    }
}
