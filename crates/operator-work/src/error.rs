// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fiber execution.

use thiserror::Error;

/// Errors that terminate a fiber.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StepError {
    /// A step panicked while running.
    #[error("step '{step}' panicked: {message}")]
    Panicked {
        /// Name of the step that panicked.
        step: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The fiber was cancelled by its owner.
    #[error("fiber cancelled")]
    Cancelled,

    /// The fiber was dropped while suspended, without being resumed.
    #[error("fiber abandoned while suspended")]
    Abandoned,

    /// Input the step depends on was not present in the packet or context.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// A step (or the asynchronous operation it started) reported failure.
    #[error("step '{step}' failed: {message}")]
    StepFailed {
        /// Name of the failing step.
        step: String,
        /// Failure details.
        message: String,
    },

    /// Error raised by an external collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Build a [`StepError::StepFailed`] for the named step.
    pub fn failed(step: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::StepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Whether this error represents cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

/// Result type using StepError.
pub type Result<T> = std::result::Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StepError::Panicked {
            step: "ManagedServersUp".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "step 'ManagedServersUp' panicked: boom");

        let err = StepError::failed("CreatePod", "409 conflict");
        assert_eq!(err.to_string(), "step 'CreatePod' failed: 409 conflict");

        let err = StepError::MissingInput("topology scan".to_string());
        assert_eq!(err.to_string(), "missing input: topology scan");

        assert_eq!(StepError::Cancelled.to_string(), "fiber cancelled");
    }

    #[test]
    fn test_other_is_transparent() {
        let err: StepError = anyhow::anyhow!("api server unavailable").into();
        assert_eq!(err.to_string(), "api server unavailable");
        assert!(!err.is_cancelled());
        assert!(StepError::Cancelled.is_cancelled());
    }
}
