//! Agent abstraction and the command-backed agent.
//!
//! The [`AgentPort`] trait decouples the controller from the agent backend.
//! [`CommandAgent`] spawns an external program per step; tests use scripted
//! agents that return predetermined predictions without spawning processes.

use std::collections::VecDeque;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::actions::TaskAction;
use crate::core::task::TaskDescriptor;
use crate::core::types::{Action, Prediction};
use crate::io::config::AgentSettings;
use crate::io::process::run_command_with_timeout;

/// Produces the next action from the current observation.
pub trait AgentPort {
    type Action: Action;

    /// Return the reasoning trace and the parsed action, if any.
    ///
    /// A response without a usable action is `Ok` with `action: None`; `Err` is
    /// reserved for faults (the agent could not be consulted at all).
    fn predict(&mut self, observation: &str) -> Result<Prediction<Self::Action>>;
}

/// One remembered exchange, replayed to the agent on later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub observation: String,
    pub thought: String,
    pub action: Option<String>,
}

#[derive(Serialize)]
struct AgentRequest<'a> {
    model: &'static str,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    use_plan: bool,
    instance_id: &'a str,
    question: &'a str,
    work_dir: &'a str,
    observation: &'a str,
    history: &'a VecDeque<Turn>,
}

/// Agent that runs `settings.command` once per step.
///
/// The request is a JSON object on stdin. The reply is a JSON object on stdout
/// with a `thought` string and an optional `action` (a tagged [`TaskAction`]).
pub struct CommandAgent {
    settings: AgentSettings,
    instance_id: String,
    question: String,
    work_dir: String,
    history: VecDeque<Turn>,
    thoughts: Vec<String>,
}

impl CommandAgent {
    pub fn new(settings: AgentSettings, task: &TaskDescriptor, work_dir: impl Into<String>) -> Self {
        Self {
            settings,
            instance_id: task.instance_id.clone(),
            question: task.question.clone(),
            work_dir: work_dir.into(),
            history: VecDeque::new(),
            thoughts: Vec::new(),
        }
    }

    /// Every thought produced so far, oldest first.
    pub fn thoughts(&self) -> &[String] {
        &self.thoughts
    }

    /// Remembered turns, bounded by `max_memory_length`.
    pub fn history(&self) -> &VecDeque<Turn> {
        &self.history
    }

    fn remember(&mut self, turn: Turn) {
        self.history.push_back(turn);
        let limit = self.settings.max_memory_length as usize;
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    fn build_command(&self) -> Result<Command> {
        let (program, args) = self
            .settings
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        Ok(cmd)
    }
}

impl AgentPort for CommandAgent {
    type Action = TaskAction;

    #[instrument(skip_all, fields(instance_id = %self.instance_id, turn = self.thoughts.len() + 1))]
    fn predict(&mut self, observation: &str) -> Result<Prediction<TaskAction>> {
        let request = AgentRequest {
            model: self.settings.model.as_str(),
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_tokens: self.settings.max_tokens,
            use_plan: self.settings.use_plan,
            instance_id: &self.instance_id,
            question: &self.question,
            work_dir: &self.work_dir,
            observation,
            history: &self.history,
        };
        let payload = serde_json::to_vec(&request)?;

        let timeout = Duration::from_secs(self.settings.timeout_secs);
        info!("consulting agent");
        let output = run_command_with_timeout(
            self.build_command()?,
            Some(&payload),
            timeout,
            self.settings.output_limit_bytes,
        )?;

        if output.timed_out {
            return Err(anyhow!("agent command timed out after {timeout:?}"));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent command failed");
            return Err(anyhow!(
                "agent command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }

        let prediction = parse_reply(&output.stdout_text());
        debug!(
            has_action = prediction.action.is_some(),
            thought_len = prediction.thought.len(),
            "agent replied"
        );

        self.thoughts.push(prediction.thought.clone());
        self.remember(Turn {
            observation: observation.to_string(),
            thought: prediction.thought.clone(),
            action: prediction.action.as_ref().map(ToString::to_string),
        });
        Ok(prediction)
    }
}

/// Decode an agent reply.
///
/// Anything that is not a JSON object with a decodable `action` yields no
/// action; non-JSON text becomes the thought verbatim.
pub fn parse_reply(stdout: &str) -> Prediction<TaskAction> {
    let trimmed = stdout.trim();
    let Ok(Value::Object(mut reply)) = serde_json::from_str::<Value>(trimmed) else {
        return Prediction {
            thought: trimmed.to_string(),
            action: None,
        };
    };

    let thought = reply
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let action = match reply.remove("action") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<TaskAction>(raw) {
            Ok(action) => Some(action),
            Err(err) => {
                debug!(err = %err, "agent action did not decode");
                None
            }
        },
    };
    Prediction { thought, action }
}
