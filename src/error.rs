//! Error types for the scheduler.
//!
//! User-facing failures are few by design: the scheduler is a deterministic
//! static analysis, so the only recoverable errors are malformed inputs
//! caught before any analysis runs. Indeterminate analysis results are not
//! errors (they propagate as `None` through the cost model), and internal
//! invariant violations are fail-fast panics.

use thiserror::Error;

/// Top-level error type for scheduling runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// An output pure argument has no literal (min, extent) estimate.
    #[error("missing or non-literal size estimate for {func}.{var}; \
             every pure argument of a pipeline output needs one")]
    MissingEstimate {
        /// Output function name
        func: String,
        /// The pure argument lacking an estimate
        var: String,
    },

    /// A referenced pipeline function is not part of the pipeline.
    #[error("unknown pipeline function: {name}")]
    UnknownFunction {
        /// The unresolved name
        name: String,
    },

    /// Two functions share a name.
    #[error("duplicate pipeline function: {name}")]
    DuplicateFunction {
        /// The duplicated name
        name: String,
    },
}

/// Result type using SchedError.
pub type SchedResult<T> = Result<T, SchedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::MissingEstimate {
            func: "blur".to_string(),
            var: "x".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("blur.x"));
    }
}
