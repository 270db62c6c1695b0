use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// Coarse failure category, used for exit codes and by callers that only
/// care about which layer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ElementResolution,
    MissingAsset,
    RemoteIdentity,
    RemoteOperation,
    Session,
    Environment,
}

#[derive(Debug, Error, Diagnostic)]
pub enum GrabError {
    #[error("invalid grabber configuration: {0}")]
    #[diagnostic(code(kira_dg::configuration))]
    Configuration(String),

    #[error("invalid element {0:?}")]
    InvalidElement(String),

    #[error("cannot resolve {data_type} for element ({element}): {message}")]
    #[diagnostic(code(kira_dg::element_resolution))]
    ElementResolution {
        element: String,
        data_type: String,
        message: String,
    },

    #[error("{data_type} for element ({element}) not found at {path}")]
    #[diagnostic(code(kira_dg::missing_asset))]
    MissingAsset {
        element: String,
        data_type: String,
        path: Utf8PathBuf,
    },

    #[error("dataset at {path} has id {local}, but the remote reports {remote}")]
    #[diagnostic(
        code(kira_dg::remote_identity),
        help("point local_path at an empty directory or at a clone of the same dataset")
    )]
    RemoteIdentity {
        path: Utf8PathBuf,
        local: String,
        remote: String,
    },

    #[error("{operation} failed for {}: {}", .failed.len(), .failed.join(", "))]
    #[diagnostic(code(kira_dg::remote_operation))]
    RemoteOperation {
        operation: String,
        failed: Vec<String>,
    },

    #[error("dataset session not entered; call enter() first")]
    NotEntered,

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl GrabError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GrabError::Configuration(_)
            | GrabError::InvalidElement(_)
            | GrabError::ConfigRead(_)
            | GrabError::ConfigParse(_) => ErrorKind::Configuration,
            GrabError::ElementResolution { .. } => ErrorKind::ElementResolution,
            GrabError::MissingAsset { .. } => ErrorKind::MissingAsset,
            GrabError::RemoteIdentity { .. } => ErrorKind::RemoteIdentity,
            GrabError::RemoteOperation { .. } => ErrorKind::RemoteOperation,
            GrabError::NotEntered => ErrorKind::Session,
            GrabError::MissingTool(_) | GrabError::Filesystem(_) => ErrorKind::Environment,
        }
    }

    pub(crate) fn remote(operation: &str, failed: Vec<String>) -> Self {
        GrabError::RemoteOperation {
            operation: operation.to_string(),
            failed,
        }
    }
}
