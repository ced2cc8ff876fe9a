use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Configuration conflict: {message}")]
    ConfigConflict { message: String },

    #[error("Configuration file not found at {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Required tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("Environment precondition failed: {message}")]
    EnvPrecondition { message: String },

    #[error("Mount operation failed: {message}")]
    MountOperationFailed { message: String },

    #[error("Daemon already running: lock held at {path}")]
    AlreadyRunning { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MergeError>;
