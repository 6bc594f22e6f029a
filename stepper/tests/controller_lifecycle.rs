//! Whole-run tests for the step controller.
//!
//! Drives sessions through scripted ports tick by tick and checks the observable
//! contract: step accounting, retry and repeat policy, and single finalization.

use stepper::core::errors::RunError;
use stepper::core::policy::{PARSE_RETRY_OBSERVATION, REPEAT_OBSERVATION};
use stepper::core::types::{NO_ACTION_SENTINEL, Phase, StepDisposition, TickOutcome};
use stepper::io::config::RunConfig;
use stepper::looping::{LoopStop, run_loop};
use stepper::step::{Session, StepController};
use stepper::test_support::{
    EnvReply, ScriptedPorts, ScriptedReply, SharedLog, scripted_config, scripted_task,
};

struct Run {
    controller: StepController<ScriptedPorts>,
    session: Session<ScriptedPorts>,
    config: RunConfig,
    log: SharedLog,
}

impl Run {
    fn new(ports: ScriptedPorts, max_steps: u32) -> Self {
        let log = ports.log();
        let mut session = Session::<ScriptedPorts>::new();
        session.submit(scripted_task());
        Self {
            controller: StepController::new(ports),
            session,
            config: scripted_config(max_steps),
            log,
        }
    }

    fn tick(&mut self) -> TickOutcome {
        self.controller
            .tick(&mut self.session, &self.config)
            .expect("tick")
    }

    /// Tick to the end, returning every outcome.
    fn drive(&mut self) -> Vec<TickOutcome> {
        let mut outcomes = Vec::new();
        run_loop(&self.controller, &mut self.session, &self.config, |tick, _| {
            outcomes.push(*tick);
        });
        outcomes
    }
}

fn dispositions(outcomes: &[TickOutcome]) -> Vec<StepDisposition> {
    outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            TickOutcome::Stepped { disposition, .. } => Some(*disposition),
            _ => None,
        })
        .collect()
}

#[test]
fn step_index_grows_by_one_per_stepping_tick() {
    let mut run = Run::new(
        ScriptedPorts::new(vec![
            ScriptedReply::action("A"),
            ScriptedReply::no_action(),
            ScriptedReply::action("A"),
            ScriptedReply::action("B"),
        ]),
        10,
    );
    assert_eq!(run.tick(), TickOutcome::Initialized);

    for expected in 1..=4u32 {
        let before = run.session.step_index();
        let outcome = run.tick();
        assert!(matches!(outcome, TickOutcome::Stepped { step_number, .. } if step_number == expected));
        assert_eq!(run.session.step_index(), before + 1);
        assert_eq!(run.session.steps().len() as u32, run.session.step_index());
        assert_eq!(run.session.steps()[before as usize].step_number, expected);
    }
}

#[test]
fn no_step_runs_past_the_budget() {
    let mut run = Run::new(
        ScriptedPorts::new(vec![
            ScriptedReply::action("A"),
            ScriptedReply::action("B"),
            ScriptedReply::action("C"),
            ScriptedReply::action("D"),
            ScriptedReply::action("E"),
        ]),
        3,
    );

    let outcomes = run.drive();

    assert_eq!(run.session.step_index(), 3);
    assert_eq!(run.log.borrow().executed, ["A", "B", "C"]);
    assert_eq!(run.log.borrow().predictions.len(), 3);
    assert_eq!(
        outcomes.last(),
        Some(&TickOutcome::Stepped {
            step_number: 3,
            disposition: StepDisposition::Executed { done: false },
            finalized: true,
        })
    );
    assert_eq!(
        run.session.error(),
        Some(&RunError::StepLimitExceeded { max_steps: 3 })
    );
    assert_eq!(
        run.session.error().map(ToString::to_string).as_deref(),
        Some("Reached maximum number of steps without completing the task. (max_steps=3)")
    );
}

#[test]
fn fourth_consecutive_parse_failure_is_fatal() {
    let mut run = Run::new(ScriptedPorts::new(vec![ScriptedReply::no_action()]), 10);

    let outcomes = run.drive();

    assert_eq!(
        dispositions(&outcomes),
        [
            StepDisposition::ParseRetry { retry_count: 1 },
            StepDisposition::ParseRetry { retry_count: 2 },
            StepDisposition::ParseRetry { retry_count: 3 },
            StepDisposition::ParseFailed,
        ]
    );
    assert_eq!(run.session.retry_count(), 4);
    assert_eq!(run.session.error(), Some(&RunError::ParseFailure));
    assert!(run.log.borrow().executed.is_empty());
    for record in &run.session.steps()[..3] {
        assert_eq!(record.action_repr, NO_ACTION_SENTINEL);
        assert_eq!(record.observation.as_deref(), Some(PARSE_RETRY_OBSERVATION));
    }
    assert_eq!(run.session.steps().len(), 4);
    assert_eq!(run.session.steps()[3].observation, None);
}

#[test]
fn absent_actions_under_a_three_step_budget_hit_the_step_limit() {
    let mut run = Run::new(ScriptedPorts::new(vec![ScriptedReply::no_action()]), 3);

    run.drive();

    assert_eq!(run.session.steps().len(), 3);
    assert_eq!(run.session.retry_count(), 3);
    assert!(
        run.session
            .steps()
            .iter()
            .all(|record| record.observation.as_deref() == Some(PARSE_RETRY_OBSERVATION))
    );
    // The threshold is crossed only by a fourth attempt, which the budget never allows.
    assert_eq!(
        run.session.error(),
        Some(&RunError::StepLimitExceeded { max_steps: 3 })
    );
    assert!(run.log.borrow().executed.is_empty());
}

#[test]
fn repeated_action_is_warned_then_fatal() {
    let mut run = Run::new(ScriptedPorts::new(vec![ScriptedReply::action("A")]), 10);

    let outcomes = run.drive();

    assert_eq!(
        dispositions(&outcomes),
        [
            StepDisposition::Executed { done: false },
            StepDisposition::RepeatWarned,
            StepDisposition::RepeatedAction,
        ]
    );
    assert_eq!(run.session.step_index(), 3);
    assert_eq!(run.log.borrow().executed, ["A"]);
    assert_eq!(
        run.session.steps()[1].observation.as_deref(),
        Some(REPEAT_OBSERVATION)
    );
    assert_eq!(run.session.error(), Some(&RunError::RepeatedAction));
    assert_eq!(
        run.session.error().map(ToString::to_string).as_deref(),
        Some("ERROR: Repeated action")
    );
    assert!(!run.session.is_running());
}

#[test]
fn warning_flag_is_set_by_a_repeat() {
    let mut run = Run::new(ScriptedPorts::new(vec![ScriptedReply::action("A")]), 10);
    run.tick();
    run.tick();
    run.tick();

    assert!(run.session.repeat_action_flag());
    assert_eq!(run.session.current_observation(), REPEAT_OBSERVATION);
    assert_eq!(run.log.borrow().executed.len(), 1);
}

#[test]
fn different_action_after_warning_resets_the_flag() {
    let mut run = Run::new(
        ScriptedPorts::new(vec![
            ScriptedReply::action("A"),
            ScriptedReply::action("A"),
            ScriptedReply::action("B"),
            ScriptedReply::action("A"),
        ]),
        10,
    );
    run.tick();
    run.tick();
    run.tick();
    assert!(run.session.repeat_action_flag());

    let outcome = run.tick();

    assert!(matches!(
        outcome,
        TickOutcome::Stepped {
            disposition: StepDisposition::Executed { done: false },
            ..
        }
    ));
    assert!(!run.session.repeat_action_flag());
    assert_eq!(run.log.borrow().executed, ["A", "B"]);

    // A is no longer the last executed action, so proposing it again is fine.
    let outcome = run.tick();
    assert!(matches!(
        outcome,
        TickOutcome::Stepped {
            disposition: StepDisposition::Executed { .. },
            ..
        }
    ));
}

#[test]
fn completion_collects_result_and_files() {
    let mut run = Run::new(
        ScriptedPorts::new(vec![
            ScriptedReply::action("A"),
            ScriptedReply::action("B"),
            ScriptedReply::action_with_output("A", "42"),
        ])
        .with_env(vec![
            EnvReply::observe("ran A"),
            EnvReply::observe("ran B"),
            EnvReply::done("Terminate"),
        ]),
        10,
    );

    let outcomes = run.drive();

    // "A" then "A (with output)" render the same, but B sits in between.
    assert_eq!(run.log.borrow().executed, ["A", "B", "A"]);
    assert_eq!(run.session.result(), Some("42"));
    assert!(
        run.session
            .result_files()
            .is_some_and(|files| files.contains_key("answer.txt"))
    );
    assert!(run.session.error().is_none());
    assert!(run.session.is_done());
    assert_eq!(run.session.phase(10), Phase::Terminated);
    assert_eq!(outcomes.len(), 4);
}

#[test]
fn finalization_runs_once_for_every_way_a_run_ends() {
    let endings: Vec<(&str, ScriptedPorts, u32)> = vec![
        (
            "completion",
            ScriptedPorts::new(vec![ScriptedReply::action("A")])
                .with_env(vec![EnvReply::done("ok")]),
            5,
        ),
        (
            "step limit",
            ScriptedPorts::new(vec![ScriptedReply::action("A"), ScriptedReply::action("B")]),
            2,
        ),
        (
            "parse failure",
            ScriptedPorts::new(vec![ScriptedReply::no_action()]),
            10,
        ),
        (
            "repeat",
            ScriptedPorts::new(vec![ScriptedReply::action("A")]),
            10,
        ),
        (
            "fault",
            ScriptedPorts::new(vec![ScriptedReply::action("A")])
                .with_env(vec![EnvReply::fail("socket closed")]),
            10,
        ),
    ];

    for (name, ports, max_steps) in endings {
        let mut run = Run::new(ports, max_steps);
        run.drive();

        // Extra ticks on a terminated session are no-ops.
        for _ in 0..3 {
            assert_eq!(run.tick(), TickOutcome::Idle, "{name}");
        }
        let log = run.log.borrow();
        assert_eq!(log.post_process_calls, 1, "{name}");
        assert_eq!(log.close_calls, 1, "{name}");
        assert!(run.session.environment().is_none(), "{name}");
        assert!(!run.session.is_running(), "{name}");
    }
}

#[test]
fn fault_keeps_earlier_progress_and_stops() {
    let mut run = Run::new(
        ScriptedPorts::new(vec![
            ScriptedReply::action("A"),
            ScriptedReply::action("B"),
        ])
        .with_env(vec![EnvReply::observe("ran A"), EnvReply::fail("socket closed")]),
        10,
    );

    let outcomes = run.drive();

    assert_eq!(outcomes.last(), Some(&TickOutcome::Aborted));
    assert_eq!(run.session.step_index(), 1);
    assert_eq!(run.session.current_observation(), "ran A");
    assert!(matches!(
        run.session.error(),
        Some(RunError::Fault(msg)) if msg.contains("socket closed") && msg.contains("environment step 2")
    ));
}

#[test]
fn resubmitting_starts_a_fresh_run() {
    let ports = ScriptedPorts::new(vec![ScriptedReply::action("A")]);
    let mut run = Run::new(ports, 10);
    run.drive();
    assert_eq!(run.session.error(), Some(&RunError::RepeatedAction));

    run.session.submit(scripted_task());
    assert_eq!(run.session.phase(10), Phase::Uninitialized);
    assert!(run.session.error().is_none());
    assert!(run.session.steps().is_empty());

    let outcomes = run.drive();
    assert_eq!(outcomes.first(), Some(&TickOutcome::Initialized));
    assert_eq!(run.log.borrow().builds, 2);
}

#[test]
fn loop_outcome_reports_failure_reason() {
    let mut run = Run::new(ScriptedPorts::new(vec![ScriptedReply::no_action()]), 10);
    let outcome = run_loop(&run.controller, &mut run.session, &run.config, |_, _| {});
    assert_eq!(
        outcome.stop,
        LoopStop::Failed {
            error: RunError::ParseFailure
        }
    );
    assert_eq!(outcome.ticks, 5);
}
