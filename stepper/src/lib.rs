//! Cooperative, resumable step controller for an agent/environment loop.
//!
//! A run advances one bounded unit of work per [`step::StepController::tick`]:
//! bind the ports, execute one agent step, or finalize. All progress lives in a
//! [`session::SessionState`] owned by the caller, so the driver can render,
//! persist, or pause between ticks. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (retry/repeat policy, step budget,
//!   actions, errors). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, agent and environment ports,
//!   process execution, run artifacts). Isolated behind traits for scripted tests.
//!
//! Orchestration modules ([`step`], [`looping`]) coordinate core logic with I/O.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
