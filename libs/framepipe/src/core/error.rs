use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A collaborator broke the call contract (double publish, empty handle
    /// dereference, out-of-range frameset index). Loud and immediate.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// A blocking wait elapsed. Expected and retry-friendly.
    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: &'static str, waited_ms: u64 },

    #[error("GPU operation failed: {0}")]
    Gpu(String),

    #[error("option '{key}' is not supported by this block")]
    UnsupportedOption { key: &'static str },

    #[error("option '{key}' value {value} outside range [{min}, {max}]")]
    OptionOutOfRange {
        key: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("option '{key}' is read-only")]
    OptionReadOnly { key: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// True for the one outcome a caller is expected to loop on.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
