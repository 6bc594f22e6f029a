//! Shared deterministic types for the step controller.
//!
//! These types define stable contracts between the controller and its ports.
//! They do not depend on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Observation fed to the agent before the first step of every run.
pub const INITIAL_OBSERVATION: &str = "You are in the folder now.";

/// Rendering recorded for a step whose agent response carried no usable action.
pub const NO_ACTION_SENTINEL: &str = "No valid action detected";

/// Artifacts collected during finalization (artifact name to location).
pub type ResultFiles = BTreeMap<String, String>;

/// A decision produced by the agent and executed by the environment.
///
/// `Display` is the stable rendering. Repeat detection compares renderings, never
/// structure, so two actions are "the same" exactly when they print the same.
pub trait Action: fmt::Display {
    /// Terminal output attached to the action, inspected only when the
    /// environment reports completion.
    fn output(&self) -> Option<&str> {
        None
    }
}

/// One agent response: a reasoning trace plus the parsed action, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction<A> {
    pub thought: String,
    pub action: Option<A>,
}

/// Environment response to one executed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvStep {
    pub observation: String,
    pub done: bool,
}

/// Immutable log entry for one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-indexed position in the run.
    pub step_number: u32,
    pub thought: String,
    pub action_repr: String,
    /// Observation or corrective message produced for this step.
    pub observation: Option<String>,
}

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepDisposition {
    /// The environment executed the action.
    Executed { done: bool },
    /// No action was parsed; the agent was re-prompted.
    ParseRetry { retry_count: u32 },
    /// The action repeated the last executed one; the agent was warned.
    RepeatWarned,
    /// Parse failures crossed the retry threshold (fatal).
    ParseFailed,
    /// The action was repeated after a warning (fatal).
    RepeatedAction,
}

impl StepDisposition {
    /// Whether the environment was called during this step.
    pub fn touched_environment(self) -> bool {
        matches!(self, StepDisposition::Executed { .. })
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            StepDisposition::ParseFailed | StepDisposition::RepeatedAction
        )
    }
}

/// The single unit of work performed by one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is not running; nothing was done.
    Idle,
    /// Ports were constructed and bound; no step ran.
    Initialized,
    /// One step ran. `finalized` is set when that step ended the stepping phase
    /// and finalization ran before the tick returned.
    Stepped {
        step_number: u32,
        disposition: StepDisposition,
        finalized: bool,
    },
    /// Finalization ran without a step.
    Finalized,
    /// The tick raised a fault; the error was recorded and the run finalized.
    Aborted,
}

/// Controller phase, derived from session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No task submitted, or a fresh state.
    Idle,
    /// Submitted; ports not yet bound.
    Uninitialized,
    Stepping,
    /// Stepping phase over; finalization pending.
    Finalizing,
    /// Finalized; absorbing.
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Uninitialized => "uninitialized",
            Phase::Stepping => "stepping",
            Phase::Finalizing => "finalizing",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(&'static str);

    impl fmt::Display for Plain {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl Action for Plain {}

    #[test]
    fn actions_carry_no_output_by_default() {
        let action = Plain("ls");
        assert_eq!(action.output(), None);
        assert_eq!(action.to_string(), "ls");
    }

    #[test]
    fn only_fatal_dispositions_report_fatal() {
        assert!(StepDisposition::ParseFailed.is_fatal());
        assert!(StepDisposition::RepeatedAction.is_fatal());
        assert!(!StepDisposition::RepeatWarned.is_fatal());
        assert!(!StepDisposition::ParseRetry { retry_count: 1 }.is_fatal());
        assert!(!StepDisposition::Executed { done: true }.is_fatal());
    }

    #[test]
    fn only_executed_steps_touch_the_environment() {
        assert!(StepDisposition::Executed { done: false }.touched_environment());
        assert!(!StepDisposition::RepeatWarned.touched_environment());
        assert!(!StepDisposition::ParseRetry { retry_count: 2 }.touched_environment());
    }

    #[test]
    fn disposition_serializes_with_kind_tag() {
        let json = serde_json::to_string(&StepDisposition::ParseRetry { retry_count: 2 })
            .expect("serialize");
        assert_eq!(json, r#"{"kind":"parse_retry","retry_count":2}"#);
    }
}
