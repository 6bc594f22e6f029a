//! Orchestration for a single controller tick.
//!
//! Each call to [`StepController::tick`] performs one bounded unit of work on a
//! [`SessionState`]: bind the ports, execute one step, or finalize. A step that
//! ends the stepping phase (completion, fatal agent behavior, or an exhausted
//! budget) finalizes before the tick returns, so a recorded error and
//! `running == false` always land on the same tick.

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::stepping_finished;
use crate::core::errors::RunError;
use crate::core::policy::{
    PARSE_RETRY_OBSERVATION, ParseFailureDecision, REPEAT_OBSERVATION, RepeatDecision,
    check_repeat, on_parse_failure,
};
use crate::core::task::TaskDescriptor;
use crate::core::types::{
    Action, EnvStep, NO_ACTION_SENTINEL, Prediction, StepDisposition, StepRecord, TickOutcome,
};
use crate::io::agent::AgentPort;
use crate::io::config::RunConfig;
use crate::io::environment::EnvironmentPort;
use crate::session::SessionState;

/// Builds the agent and environment for a run on its first tick.
pub trait PortFactory {
    type Agent: AgentPort;
    type Environment: EnvironmentPort<<Self::Agent as AgentPort>::Action>;

    fn build(
        &self,
        config: &RunConfig,
        task: &TaskDescriptor,
    ) -> Result<(Self::Agent, Self::Environment)>;
}

/// Session type driven by a controller over factory `F`.
pub type Session<F> =
    SessionState<<F as PortFactory>::Agent, <F as PortFactory>::Environment>;

/// Advances a session by one unit of work per tick.
pub struct StepController<F> {
    factory: F,
}

impl<F: PortFactory> StepController<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Perform at most one unit of work.
    ///
    /// `Err` means a port raised a fault. The session is left as it was before the
    /// failing call; the caller is the fault boundary and should hand the error to
    /// [`abort`](Self::abort).
    #[instrument(skip_all, fields(step_index = session.step_index))]
    pub fn tick(&self, session: &mut Session<F>, config: &RunConfig) -> Result<TickOutcome> {
        if !session.running {
            debug!("session not running; nothing to do");
            return Ok(TickOutcome::Idle);
        }
        if !session.initialized {
            self.initialize(session, config)?;
            return Ok(TickOutcome::Initialized);
        }

        let max_steps = config.agent.max_steps;
        if stepping_finished(session.done, session.step_index, max_steps) {
            self.finalize(session, max_steps);
            return Ok(TickOutcome::Finalized);
        }

        let disposition = self.execute_step(session, config.driver.max_parse_retries)?;
        let step_number = session.step_index;
        let finalized = stepping_finished(session.done, session.step_index, max_steps);
        if finalized {
            self.finalize(session, max_steps);
        }
        Ok(TickOutcome::Stepped {
            step_number,
            disposition,
            finalized,
        })
    }

    /// Fault boundary: record `fault` as the run's error and finalize.
    pub fn abort(&self, session: &mut Session<F>, config: &RunConfig, fault: &anyhow::Error) {
        let message = format!("{fault:#}");
        error!(err = %message, step_index = session.step_index, "tick raised a fault; stopping run");
        session.record_error(RunError::Fault(message));
        self.finalize(session, config.agent.max_steps);
    }

    fn initialize(&self, session: &mut Session<F>, config: &RunConfig) -> Result<()> {
        let task = session
            .task
            .as_ref()
            .ok_or_else(|| anyhow!("session is running without a submitted task"))?;
        let (agent, environment) = self
            .factory
            .build(config, task)
            .context("construct agent and environment")?;
        info!(instance_id = %task.instance_id, max_steps = config.agent.max_steps, "ports bound");

        session.agent = Some(agent);
        session.environment = Some(environment);
        session.initialized = true;
        Ok(())
    }

    fn execute_step(&self, session: &mut Session<F>, max_retries: u32) -> Result<StepDisposition> {
        let step_number = session.step_index + 1;
        let agent = session
            .agent
            .as_mut()
            .ok_or_else(|| anyhow!("agent is not bound"))?;
        let Prediction { thought, action } = agent
            .predict(&session.current_observation)
            .with_context(|| format!("agent predict for step {step_number}"))?;

        let mut record = StepRecord {
            step_number,
            thought,
            action_repr: action
                .as_ref()
                .map_or_else(|| NO_ACTION_SENTINEL.to_string(), ToString::to_string),
            observation: None,
        };

        let disposition = match action {
            None => {
                session.retry_count += 1;
                match on_parse_failure(session.retry_count, max_retries) {
                    ParseFailureDecision::Fatal => {
                        warn!(step_number, retry_count = session.retry_count, "no parseable action; giving up");
                        session.done = true;
                        session.record_error(RunError::ParseFailure);
                        StepDisposition::ParseFailed
                    }
                    ParseFailureDecision::Retry => {
                        info!(step_number, retry_count = session.retry_count, "no parseable action; re-prompting");
                        session.current_observation = PARSE_RETRY_OBSERVATION.to_string();
                        record.observation = Some(PARSE_RETRY_OBSERVATION.to_string());
                        StepDisposition::ParseRetry {
                            retry_count: session.retry_count,
                        }
                    }
                }
            }
            Some(action) => {
                let last = session.last_action.as_ref().map(ToString::to_string);
                match check_repeat(
                    last.as_deref(),
                    &record.action_repr,
                    session.repeat_action_flag,
                ) {
                    RepeatDecision::Fatal => {
                        warn!(step_number, action = %record.action_repr, "action repeated after warning");
                        session.record_error(RunError::RepeatedAction);
                        session.done = true;
                        StepDisposition::RepeatedAction
                    }
                    RepeatDecision::Warn => {
                        info!(step_number, action = %record.action_repr, "action repeats the last one; warning agent");
                        session.repeat_action_flag = true;
                        session.current_observation = REPEAT_OBSERVATION.to_string();
                        record.observation = Some(REPEAT_OBSERVATION.to_string());
                        StepDisposition::RepeatWarned
                    }
                    RepeatDecision::Execute => {
                        let environment = session
                            .environment
                            .as_mut()
                            .ok_or_else(|| anyhow!("environment is not bound"))?;
                        let EnvStep { observation, done } = environment
                            .step(&action)
                            .with_context(|| format!("environment step {step_number}"))?;
                        debug!(step_number, done, "environment executed action");

                        if done && let Some(output) = action.output() {
                            session.result = Some(output.to_string());
                        }
                        session.current_observation = observation.clone();
                        session.done = done;
                        session.last_action = Some(action);
                        session.repeat_action_flag = false;
                        record.observation = Some(observation);
                        StepDisposition::Executed { done }
                    }
                }
            }
        };

        session.steps.push(record);
        session.step_index += 1;
        Ok(disposition)
    }

    /// Collect artifacts and release the environment, once per run, then stop.
    fn finalize(&self, session: &mut Session<F>, max_steps: u32) {
        if !session.done && session.error.is_none() {
            session.record_error(RunError::StepLimitExceeded { max_steps });
        }

        if !session.finalized {
            session.finalized = true;
            if let Some(mut environment) = session.environment.take() {
                match environment.post_process() {
                    Ok(files) => {
                        info!(files = files.len(), "result files collected");
                        session.result_files = Some(files);
                    }
                    Err(err) => {
                        error!(err = %format!("{err:#}"), "post-processing failed");
                        session.record_error(RunError::FinalizationFailure(format!("{err:#}")));
                    }
                }
                if let Err(err) = environment.close() {
                    error!(err = %format!("{err:#}"), "closing environment failed");
                    session.record_error(RunError::FinalizationFailure(format!(
                        "close environment: {err:#}"
                    )));
                }
            }
        }

        session.running = false;
        info!(
            steps = session.step_index,
            done = session.done,
            error = session.error.as_ref().map(RunError::kind),
            "run finalized"
        );
    }
}
