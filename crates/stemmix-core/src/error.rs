//! Error types for stemmix.

use thiserror::Error;

/// Main error type for stemmix operations.
#[derive(Error, Debug)]
pub enum StemmixError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Script or binary missing or not executable.
    #[error("Tool unavailable: {tool} ({reason})")]
    ToolUnavailable { tool: String, reason: String },

    /// The child process exceeded its time budget and was killed.
    #[error("Tool timed out: {tool} after {after_secs}s")]
    ToolTimeout { tool: String, after_secs: u64 },

    /// The child exited unsuccessfully without a usable result.
    #[error("Tool failed: {tool} exited with {status}: {stderr_tail}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr_tail: String,
    },

    /// Expected outputs are missing or unreadable.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Every tier of a fallback ladder failed.
    #[error("{stage}: all fallback tiers failed ({})", attempts.join("; "))]
    FallbackExhausted {
        stage: &'static str,
        attempts: Vec<String>,
    },

    /// A mandatory pipeline stage failed hard.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: &'static str,
        #[source]
        source: Box<StemmixError>,
    },

    #[error("Job queue is full ({capacity} jobs admitted)")]
    QueueFull { capacity: usize },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StemmixError {
    /// Whether this failure should move a fallback ladder to its next tier.
    ///
    /// Timeouts count as unavailability; neither is retried as-is.
    pub fn advances_tier(&self) -> bool {
        matches!(
            self,
            Self::ToolUnavailable { .. }
                | Self::ToolTimeout { .. }
                | Self::ToolFailed { .. }
                | Self::Validation(_)
                | Self::Io(_)
                | Self::Serialization(_)
        )
    }

    /// True for missing tools and timeouts.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ToolUnavailable { .. } | Self::ToolTimeout { .. })
    }

    /// Wrap this error as a hard failure of `stage`.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            e @ Self::StageFailed { .. } => e,
            other => Self::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }
}

impl From<serde_json::Error> for StemmixError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for stemmix operations.
pub type Result<T> = std::result::Result<T, StemmixError>;
