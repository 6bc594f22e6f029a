//! Port factory for runs on the local host.

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::task::TaskDescriptor;
use crate::io::agent::CommandAgent;
use crate::io::config::RunConfig;
use crate::io::environment::ShellEnvironment;
use crate::step::PortFactory;

/// Builds a [`ShellEnvironment`] and a [`CommandAgent`] pointed at its workspace.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPortFactory;

impl PortFactory for LocalPortFactory {
    type Agent = CommandAgent;
    type Environment = ShellEnvironment;

    fn build(
        &self,
        config: &RunConfig,
        task: &TaskDescriptor,
    ) -> Result<(CommandAgent, ShellEnvironment)> {
        let environment = ShellEnvironment::new(config.environment.clone(), task)
            .context("prepare local environment")?;
        let work_dir = environment.workspace().display().to_string();
        debug!(work_dir = %work_dir, "agent bound to workspace");
        let agent = CommandAgent::new(config.agent.clone(), task, work_dir);
        Ok((agent, environment))
    }
}
