use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebciError {
    #[error("not initialized: run 'webci init'")]
    NotInitialized,

    #[error("workflow already exists at {0} (use --force to overwrite)")]
    WorkflowExists(String),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("invalid run id '{0}'")]
    InvalidRunId(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid step name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidStepName(String),

    #[error("invalid working directory '{0}': must be relative and stay inside the checkout")]
    InvalidWorkingDirectory(String),

    #[error("git is not available on PATH")]
    GitNotFound,

    #[error("git {command} failed: {detail}")]
    Git { command: String, detail: String },

    #[error("run report not found: {0}")]
    ReportNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WebciError>;
