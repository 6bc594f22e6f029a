//! Side-effecting pieces: configuration, ports, processes, and run artifacts.

pub mod agent;
pub mod config;
pub mod environment;
pub mod local;
pub mod process;
pub mod run_state;
pub mod step_log;
