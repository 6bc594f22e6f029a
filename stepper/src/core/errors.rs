//! Fatal run conditions.
//!
//! The `Display` text of a [`RunError`] is the single message surfaced to users.

use thiserror::Error;

/// Terminal failure recorded on a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// The agent produced no parseable action more often than the retry threshold allows.
    #[error("Failed to parse action from response after multiple attempts.")]
    ParseFailure,
    /// The same action rendering was proposed again after a warning.
    #[error("ERROR: Repeated action")]
    RepeatedAction,
    /// The step budget ran out before the environment reported completion.
    #[error("Reached maximum number of steps without completing the task. (max_steps={max_steps})")]
    StepLimitExceeded { max_steps: u32 },
    /// Collecting result artifacts or releasing the environment failed.
    #[error("Error during post-processing: {0}")]
    FinalizationFailure(String),
    /// Any other fault raised by a port, captured at the driver's fault boundary.
    #[error("Error: {0}")]
    Fault(String),
}

impl RunError {
    /// Whether `next` may replace `self` as the recorded error.
    ///
    /// The first fatal error wins. The only exception is a step-limit message,
    /// which a finalization failure may overwrite.
    pub fn yields_to(&self, next: &RunError) -> bool {
        matches!(
            (self, next),
            (
                RunError::StepLimitExceeded { .. },
                RunError::FinalizationFailure(_)
            )
        )
    }

    /// Stable identifier used in logs and snapshots.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::ParseFailure => "parse_failure",
            RunError::RepeatedAction => "repeated_action",
            RunError::StepLimitExceeded { .. } => "step_limit_exceeded",
            RunError::FinalizationFailure(_) => "finalization_failure",
            RunError::Fault(_) => "fault",
        }
    }
}
