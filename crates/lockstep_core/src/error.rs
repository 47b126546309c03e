//! Core error types for lockstep.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A message the harness cannot work without is absent from the segment
    #[error("missing required message: no {kind} in segment")]
    MissingRequiredMessage {
        /// Message kind that was looked for
        kind: String,
    },

    /// Pairing counts never reached the configured cycle count
    #[error("underfilled subset: {kind} reached {reached} of {required} frames")]
    UnderfilledSubset {
        /// First pairing kind that fell short
        kind: String,
        /// Count reached before the segment ran out
        reached: usize,
        /// Configured cycle count
        required: usize,
    },

    /// Two consecutive runs disagreed
    #[error(
        "non-deterministic output at iteration {iteration}, index {index}: previous {previous}, current {current}"
    )]
    NonDeterministicOutput {
        /// Iteration whose output differed from the baseline
        iteration: u64,
        /// First differing element
        index: usize,
        /// Baseline value
        previous: String,
        /// Value from this iteration
        current: String,
    },

    /// Segment has no messages
    #[error("segment is empty")]
    EmptySegment,

    /// Invalid configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of thing looked up
        kind: String,
        /// Lookup key
        id: String,
    },

    /// Filesystem or pipe failure
    #[error("I/O error on {path}: {reason}")]
    Io {
        /// Path or stream involved
        path: String,
        /// Underlying error text
        reason: String,
    },

    /// Malformed log or frame data
    #[error("decode error: {reason}")]
    Decode {
        /// Underlying error text
        reason: String,
    },

    /// Replay engine failure
    #[error("replay of {process} failed: {reason}")]
    Replay {
        /// Process being replayed
        process: String,
        /// Underlying error text
        reason: String,
    },

    /// Cancelled
    #[error("operation cancelled")]
    Cancelled,
}

impl CoreError {
    /// Build an I/O error tagged with the path it happened on
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// Whether this error is the mismatch the determinism loop hunts for
    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::NonDeterministicOutput { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::io("<unknown>", &err)
    }
}
