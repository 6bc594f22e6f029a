//! Durable record of controller progress for one run.
//!
//! A [`SessionState`] is owned by the driver and passed by reference into every
//! controller tick. Only the controller mutates it; everything else reads it
//! through accessors or a serializable [`SessionSnapshot`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::budget::stepping_finished;
use crate::core::errors::RunError;
use crate::core::task::TaskDescriptor;
use crate::core::types::{INITIAL_OBSERVATION, Phase, ResultFiles, StepRecord};
use crate::io::agent::AgentPort;

/// Progress of one run, plus the ports bound to it.
pub struct SessionState<G: AgentPort, E> {
    pub(crate) initialized: bool,
    pub(crate) step_index: u32,
    pub(crate) done: bool,
    pub(crate) current_observation: String,
    pub(crate) steps: Vec<StepRecord>,
    pub(crate) retry_count: u32,
    pub(crate) last_action: Option<G::Action>,
    pub(crate) repeat_action_flag: bool,
    pub(crate) running: bool,
    pub(crate) result: Option<String>,
    pub(crate) result_files: Option<ResultFiles>,
    pub(crate) error: Option<RunError>,
    pub(crate) suppressed_errors: Vec<RunError>,
    pub(crate) task: Option<TaskDescriptor>,
    pub(crate) submitted_at: Option<String>,
    /// Finalization (post-process + close) has been attempted.
    pub(crate) finalized: bool,
    pub(crate) agent: Option<G>,
    pub(crate) environment: Option<E>,
}

impl<G: AgentPort, E> Default for SessionState<G, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: AgentPort, E> SessionState<G, E> {
    /// A fresh, idle session; nothing runs until [`submit`](Self::submit).
    pub fn new() -> Self {
        Self {
            initialized: false,
            step_index: 0,
            done: false,
            current_observation: INITIAL_OBSERVATION.to_string(),
            steps: Vec::new(),
            retry_count: 0,
            last_action: None,
            repeat_action_flag: false,
            running: false,
            result: None,
            result_files: None,
            error: None,
            suppressed_errors: Vec::new(),
            task: None,
            submitted_at: None,
            finalized: false,
            agent: None,
            environment: None,
        }
    }

    /// Accept a new task: reset every field and start running.
    ///
    /// Ports from a previous run are dropped; the next tick builds new ones.
    pub fn submit(&mut self, task: TaskDescriptor) {
        if self.environment.is_some() && !self.finalized {
            warn!("superseding a run whose environment was never finalized");
        }
        *self = Self::new();
        self.task = Some(task);
        self.submitted_at = Some(Utc::now().to_rfc3339());
        self.running = true;
    }

    pub fn phase(&self, max_steps: u32) -> Phase {
        if self.finalized {
            return Phase::Terminated;
        }
        if !self.running {
            return Phase::Idle;
        }
        if !self.initialized {
            return Phase::Uninitialized;
        }
        if stepping_finished(self.done, self.step_index, max_steps) {
            return Phase::Finalizing;
        }
        Phase::Stepping
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn current_observation(&self) -> &str {
        &self.current_observation
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_action(&self) -> Option<&G::Action> {
        self.last_action.as_ref()
    }

    pub fn repeat_action_flag(&self) -> bool {
        self.repeat_action_flag
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn result_files(&self) -> Option<&ResultFiles> {
        self.result_files.as_ref()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    /// Later errors that lost to [`error`](Self::error).
    pub fn suppressed_errors(&self) -> &[RunError] {
        &self.suppressed_errors
    }

    pub fn task(&self) -> Option<&TaskDescriptor> {
        self.task.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn agent(&self) -> Option<&G> {
        self.agent.as_ref()
    }

    pub fn environment(&self) -> Option<&E> {
        self.environment.as_ref()
    }

    /// Record a fatal error under the first-error-wins policy.
    pub(crate) fn record_error(&mut self, error: RunError) {
        match self.error.take() {
            None => self.error = Some(error),
            Some(existing) if existing.yields_to(&error) => {
                warn!(replaced = %existing, by = %error, "replacing step-limit error");
                self.error = Some(error);
            }
            Some(existing) => {
                warn!(kept = %existing, suppressed = %error, "keeping first fatal error");
                self.error = Some(existing);
                self.suppressed_errors.push(error);
            }
        }
    }

    pub fn snapshot(&self, max_steps: u32) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(max_steps),
            initialized: self.initialized,
            step_index: self.step_index,
            max_steps,
            done: self.done,
            current_observation: self.current_observation.clone(),
            steps: self.steps.clone(),
            retry_count: self.retry_count,
            last_action: self.last_action.as_ref().map(ToString::to_string),
            repeat_action_flag: self.repeat_action_flag,
            running: self.running,
            result: self.result.clone(),
            result_files: self.result_files.clone(),
            error: self.error.as_ref().map(ToString::to_string),
            error_kind: self.error.as_ref().map(|e| e.kind().to_string()),
            suppressed_errors: self
                .suppressed_errors
                .iter()
                .map(ToString::to_string)
                .collect(),
            task: self.task.clone(),
            submitted_at: self.submitted_at.clone(),
        }
    }
}

/// Serializable view of a session, written after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub initialized: bool,
    pub step_index: u32,
    pub max_steps: u32,
    pub done: bool,
    pub current_observation: String,
    pub steps: Vec<StepRecord>,
    pub retry_count: u32,
    /// Rendering of the last executed action.
    pub last_action: Option<String>,
    pub repeat_action_flag: bool,
    pub running: bool,
    pub result: Option<String>,
    pub result_files: Option<ResultFiles>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub suppressed_errors: Vec<String>,
    pub task: Option<TaskDescriptor>,
    pub submitted_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, ScriptedEnvironment};

    type Session = SessionState<ScriptedAgent, ScriptedEnvironment>;

    fn task() -> TaskDescriptor {
        TaskDescriptor::local("question", Vec::new(), 1)
    }

    #[test]
    fn new_session_is_idle() {
        let session = Session::new();
        assert!(!session.is_running());
        assert_eq!(session.phase(20), Phase::Idle);
        assert_eq!(session.current_observation(), INITIAL_OBSERVATION);
        assert!(session.steps().is_empty());
    }

    #[test]
    fn submit_resets_and_starts_running() {
        let mut session = Session::new();
        session.step_index = 4;
        session.retry_count = 2;
        session.error = Some(RunError::RepeatedAction);
        session.finalized = true;

        session.submit(task());

        assert!(session.is_running());
        assert_eq!(session.step_index(), 0);
        assert_eq!(session.retry_count(), 0);
        assert!(session.error().is_none());
        assert!(!session.is_finalized());
        assert_eq!(session.phase(20), Phase::Uninitialized);
        assert_eq!(
            session.task().map(|t| t.question.as_str()),
            Some("question")
        );
        assert!(session.snapshot(20).submitted_at.is_some());
    }

    #[test]
    fn phase_tracks_budget_and_completion() {
        let mut session = Session::new();
        session.submit(task());
        session.initialized = true;
        assert_eq!(session.phase(2), Phase::Stepping);

        session.step_index = 2;
        assert_eq!(session.phase(2), Phase::Finalizing);

        session.step_index = 1;
        session.done = true;
        assert_eq!(session.phase(2), Phase::Finalizing);

        session.finalized = true;
        session.running = false;
        assert_eq!(session.phase(2), Phase::Terminated);
    }

    #[test]
    fn first_error_wins_and_later_ones_are_kept() {
        let mut session = Session::new();
        session.record_error(RunError::ParseFailure);
        session.record_error(RunError::FinalizationFailure("disk".to_string()));

        assert_eq!(session.error(), Some(&RunError::ParseFailure));
        assert_eq!(
            session.suppressed_errors(),
            [RunError::FinalizationFailure("disk".to_string())]
        );
    }

    #[test]
    fn finalization_failure_replaces_step_limit() {
        let mut session = Session::new();
        session.record_error(RunError::StepLimitExceeded { max_steps: 3 });
        session.record_error(RunError::FinalizationFailure("disk".to_string()));

        assert_eq!(
            session.error(),
            Some(&RunError::FinalizationFailure("disk".to_string()))
        );
        assert!(session.suppressed_errors().is_empty());
    }

    #[test]
    fn snapshot_renders_error_text() {
        let mut session = Session::new();
        session.submit(task());
        session.record_error(RunError::RepeatedAction);

        let snapshot = session.snapshot(5);
        assert_eq!(snapshot.error.as_deref(), Some("ERROR: Repeated action"));
        assert_eq!(snapshot.error_kind.as_deref(), Some("repeated_action"));
        assert_eq!(snapshot.max_steps, 5);
    }
}
