//! Driver loop: tick a session until it stops running.

use std::thread;

use tracing::{debug, info};

use crate::core::errors::RunError;
use crate::core::types::TickOutcome;
use crate::io::config::RunConfig;
use crate::step::{PortFactory, Session, StepController};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Finalized without a recorded error.
    Completed,
    /// Finalized with `error` as the run's fatal error.
    Failed { error: RunError },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub ticks: u32,
    pub steps_executed: u32,
    /// Steps whose action reached the environment.
    pub actions_executed: u32,
    pub stop: LoopStop,
}

/// Tick `session` until `running` is false, calling `on_tick` after every tick.
///
/// This is the fault boundary: a tick that returns `Err` is handed to
/// [`StepController::abort`] and reported to `on_tick` as
/// [`TickOutcome::Aborted`].
pub fn run_loop<F, C>(
    controller: &StepController<F>,
    session: &mut Session<F>,
    config: &RunConfig,
    mut on_tick: C,
) -> LoopOutcome
where
    F: PortFactory,
    C: FnMut(&TickOutcome, &Session<F>),
{
    let interval = config.driver.tick_interval();
    let mut ticks = 0u32;
    let mut steps_executed = 0u32;
    let mut actions_executed = 0u32;

    while session.is_running() {
        let outcome = match controller.tick(session, config) {
            Ok(outcome) => outcome,
            Err(err) => {
                controller.abort(session, config, &err);
                TickOutcome::Aborted
            }
        };
        ticks += 1;
        if let TickOutcome::Stepped {
            step_number,
            disposition,
            ..
        } = outcome
        {
            steps_executed += 1;
            if disposition.touched_environment() {
                actions_executed += 1;
            }
            debug!(step_number, ?disposition, fatal = disposition.is_fatal(), "step finished");
        }
        on_tick(&outcome, session);

        if session.is_running() && outcome != TickOutcome::Initialized && !interval.is_zero() {
            debug!(interval_ms = config.driver.tick_interval_ms, "waiting for next tick");
            thread::sleep(interval);
        }
    }

    let stop = match session.error() {
        Some(error) => LoopStop::Failed {
            error: error.clone(),
        },
        None => LoopStop::Completed,
    };
    info!(ticks, steps_executed, actions_executed, ?stop, "loop stopped");
    LoopOutcome {
        ticks,
        steps_executed,
        actions_executed,
        stop,
    }
}
