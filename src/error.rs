//! Error taxonomy shared by the stores, the process runner and the lifecycle controller.

use std::io;

use thiserror::Error;

/// Why a registration collided with an existing project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Name(String),
    Path(String),
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Name(name) => write!(f, "a project named '{}' already exists", name),
            Conflict::Path(path) => write!(f, "a project already uses path {}", path),
        }
    }
}

#[derive(Debug, Error)]
pub enum DevEnvError {
    #[error("dev-env not initialized, run 'dev-env init' to initialize")]
    NotInitialized,
    #[error("dev-env already initialized in {0}")]
    AlreadyInitialized(String),
    #[error("project already exists: {0}")]
    AlreadyExists(Conflict),
    #[error("project not found: {0}")]
    NotFound(String),
    #[error("project name is required")]
    MissingName,
    #[error("cmd is required, e.g. --cmd \"npm run dev\" or use: add --name X -- npm run dev")]
    MissingCommand,
    #[error("project command is empty")]
    EmptyCommand,
    #[error("failed to launch `{command}`: {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("project '{0}' is already running")]
    AlreadyRunning(String),
    #[error("project '{0}' is not running")]
    NotRunning(String),
    #[error("no process with pid {0}")]
    ProcessNotFound(u32),
    #[error("failed to terminate pid {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
    #[error("failed to parse {document}: {source}")]
    CorruptState {
        document: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl DevEnvError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        DevEnvError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = DevEnvError> = std::result::Result<T, E>;
