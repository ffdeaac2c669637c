//! Error taxonomy for the reactive graph.
//!
//! None of these errors cross the scheduler boundary as panics. Graph-internal
//! failures (cycles, misuse) are recovered where they happen and surfaced
//! through [`Runtime::report`](crate::reactive::Runtime::report); resource
//! failures become reactive state on the resource's `error` signal.

use thiserror::Error;

use crate::reactive::{SourceId, SubscriberId};

/// Errors produced by reactive primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// An effect kept reading and writing the same signal. The write was
    /// suppressed: the value is unchanged and nobody was notified.
    #[error(
        "stopped {effect}: it read and wrote {signal} more than {threshold} times (potential infinite loop)"
    )]
    CycleDetected {
        signal: SourceId,
        effect: SubscriberId,
        threshold: u32,
    },

    /// An operation was applied to a signal of the wrong kind.
    #[error("{operation} requires {expected}")]
    BindingType {
        operation: &'static str,
        expected: &'static str,
    },

    /// A resource fetch failed for a reason other than supersession.
    #[error("resource request failed: {message}")]
    Resource { message: String },
}

impl ReactiveError {
    pub(crate) fn binding(operation: &'static str, expected: &'static str) -> Self {
        Self::BindingType {
            operation,
            expected,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_message_names_operation() {
        let err = ReactiveError::binding("DeepSignal::push", "an array value");
        assert_eq!(err.to_string(), "DeepSignal::push requires an array value");
    }

    #[test]
    fn resource_error_wraps_message() {
        let err = ReactiveError::Resource {
            message: "HTTP 404".into(),
        };
        assert!(err.to_string().contains("HTTP 404"));
    }
}
