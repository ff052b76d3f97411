use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Configuration-time failures surfaced synchronously to the caller of `start_training`.
///
/// Run-time problems never travel through this type; they arrive as events on the job stream.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training config: {0}")]
    Validation(String),

    #[error("unsupported model type: {0}")]
    UnsupportedModelType(String),

    #[error("VRAM preset not found: {0}")]
    PresetNotFound(String),

    #[error("failed to spawn training process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("too many concurrent training jobs (limit {limit})")]
    TooManyJobs { limit: usize },

    #[error("settings error: {0}")]
    Settings(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrainingError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors caused by the submitted configuration rather than the host environment.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnsupportedModelType(_) | Self::PresetNotFound(_))
    }
}
