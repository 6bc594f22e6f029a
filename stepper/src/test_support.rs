//! Test-only scripted ports and fixtures.
//!
//! [`ScriptedPorts`] builds a [`ScriptedAgent`] and a [`ScriptedEnvironment`] that
//! replay predetermined replies and record every call into a shared [`CallLog`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::task::{SetupDirective, TaskDescriptor};
use crate::core::types::{Action, EnvStep, Prediction, ResultFiles};
use crate::io::agent::AgentPort;
use crate::io::config::RunConfig;
use crate::io::environment::EnvironmentPort;
use crate::step::PortFactory;

/// Action whose rendering is exactly `repr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedAction {
    pub repr: String,
    pub output: Option<String>,
}

impl fmt::Display for ScriptedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl Action for ScriptedAction {
    fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }
}

/// One agent reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Predict(Prediction<ScriptedAction>),
    Fault(String),
}

impl ScriptedReply {
    pub fn action(repr: &str) -> Self {
        Self::Predict(Prediction {
            thought: format!("thinking about {repr}"),
            action: Some(ScriptedAction {
                repr: repr.to_string(),
                output: None,
            }),
        })
    }

    pub fn action_with_output(repr: &str, output: &str) -> Self {
        Self::Predict(Prediction {
            thought: format!("thinking about {repr}"),
            action: Some(ScriptedAction {
                repr: repr.to_string(),
                output: Some(output.to_string()),
            }),
        })
    }

    pub fn no_action() -> Self {
        Self::Predict(Prediction {
            thought: "unparseable".to_string(),
            action: None,
        })
    }

    pub fn fault(message: &str) -> Self {
        Self::Fault(message.to_string())
    }
}

/// One environment reply.
#[derive(Debug, Clone)]
pub enum EnvReply {
    Observe { observation: String, done: bool },
    Fail(String),
}

impl EnvReply {
    pub fn observe(observation: &str) -> Self {
        Self::Observe {
            observation: observation.to_string(),
            done: false,
        }
    }

    pub fn done(observation: &str) -> Self {
        Self::Observe {
            observation: observation.to_string(),
            done: true,
        }
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }
}

/// Every port call made during a run.
#[derive(Debug, Default)]
pub struct CallLog {
    pub builds: u32,
    /// Observations passed to `predict`, in order.
    pub predictions: Vec<String>,
    /// Renderings of actions passed to `step`, in order.
    pub executed: Vec<String>,
    pub post_process_calls: u32,
    pub close_calls: u32,
}

pub type SharedLog = Rc<RefCell<CallLog>>;

/// Agent replaying a queue of replies; the last reply repeats once the queue drains.
pub struct ScriptedAgent {
    replies: VecDeque<ScriptedReply>,
    last: Option<ScriptedReply>,
    log: SharedLog,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<ScriptedReply>, log: SharedLog) -> Self {
        Self {
            replies: replies.into(),
            last: None,
            log,
        }
    }
}

impl AgentPort for ScriptedAgent {
    type Action = ScriptedAction;

    fn predict(&mut self, observation: &str) -> Result<Prediction<ScriptedAction>> {
        self.log.borrow_mut().predictions.push(observation.to_string());
        if let Some(reply) = self.replies.pop_front() {
            self.last = Some(reply);
        }
        match &self.last {
            Some(ScriptedReply::Predict(prediction)) => Ok(prediction.clone()),
            Some(ScriptedReply::Fault(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("scripted agent has no replies")),
        }
    }
}

/// Environment replaying a queue of replies; once drained it answers
/// `executed <action>` without completing.
pub struct ScriptedEnvironment {
    replies: VecDeque<EnvReply>,
    result_files: ResultFiles,
    post_process_error: Option<String>,
    close_error: Option<String>,
    log: SharedLog,
}

impl EnvironmentPort<ScriptedAction> for ScriptedEnvironment {
    fn step(&mut self, action: &ScriptedAction) -> Result<EnvStep> {
        self.log.borrow_mut().executed.push(action.to_string());
        match self.replies.pop_front() {
            Some(EnvReply::Observe { observation, done }) => Ok(EnvStep { observation, done }),
            Some(EnvReply::Fail(message)) => Err(anyhow!("{message}")),
            None => Ok(EnvStep {
                observation: format!("executed {action}"),
                done: false,
            }),
        }
    }

    fn post_process(&mut self) -> Result<ResultFiles> {
        self.log.borrow_mut().post_process_calls += 1;
        match &self.post_process_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(self.result_files.clone()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.log.borrow_mut().close_calls += 1;
        match &self.close_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

/// Factory handing out scripted ports that share one [`CallLog`].
pub struct ScriptedPorts {
    agent_replies: Vec<ScriptedReply>,
    env_replies: Vec<EnvReply>,
    result_files: ResultFiles,
    post_process_error: Option<String>,
    close_error: Option<String>,
    build_error: Option<String>,
    log: SharedLog,
}

impl ScriptedPorts {
    pub fn new(agent_replies: Vec<ScriptedReply>) -> Self {
        let mut result_files = ResultFiles::new();
        result_files.insert("answer.txt".to_string(), "output/answer.txt".to_string());
        Self {
            agent_replies,
            env_replies: Vec::new(),
            result_files,
            post_process_error: None,
            close_error: None,
            build_error: None,
            log: SharedLog::default(),
        }
    }

    pub fn with_env(mut self, replies: Vec<EnvReply>) -> Self {
        self.env_replies = replies;
        self
    }

    pub fn with_post_process_error(mut self, message: &str) -> Self {
        self.post_process_error = Some(message.to_string());
        self
    }

    pub fn with_close_error(mut self, message: &str) -> Self {
        self.close_error = Some(message.to_string());
        self
    }

    pub fn with_build_error(mut self, message: &str) -> Self {
        self.build_error = Some(message.to_string());
        self
    }

    pub fn log(&self) -> SharedLog {
        Rc::clone(&self.log)
    }
}

impl PortFactory for ScriptedPorts {
    type Agent = ScriptedAgent;
    type Environment = ScriptedEnvironment;

    fn build(
        &self,
        _config: &RunConfig,
        _task: &TaskDescriptor,
    ) -> Result<(ScriptedAgent, ScriptedEnvironment)> {
        self.log.borrow_mut().builds += 1;
        if let Some(message) = &self.build_error {
            return Err(anyhow!("{message}"));
        }
        let agent = ScriptedAgent::new(self.agent_replies.clone(), self.log());
        let environment = ScriptedEnvironment {
            replies: self.env_replies.clone().into(),
            result_files: self.result_files.clone(),
            post_process_error: self.post_process_error.clone(),
            close_error: self.close_error.clone(),
            log: self.log(),
        };
        Ok((agent, environment))
    }
}

/// Default config with `max_steps` and no delay between ticks.
pub fn scripted_config(max_steps: u32) -> RunConfig {
    let mut config = RunConfig::default();
    config.agent.max_steps = max_steps;
    config.driver.tick_interval_ms = 0;
    config
}

pub fn scripted_task() -> TaskDescriptor {
    TaskDescriptor::local("How many rows are in the table?", Vec::new(), 1_700_000_000)
}

/// Temporary directory tree for runs against the local ports.
///
/// Layout: `db/` (seeded by [`seed_db_file`](Self::seed_db_file)), `cache/`, `output/`.
pub struct TempRun {
    temp: TempDir,
}

impl TempRun {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        for dir in ["db", "cache", "output"] {
            std::fs::create_dir_all(temp.path().join(dir)).expect("create dir");
        }
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn db_dir(&self) -> PathBuf {
        self.root().join("db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root().join("output")
    }

    pub fn seed_db_file(&self, rel: &str, contents: &str) {
        let path = self.db_dir().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, contents).expect("write db file");
    }

    /// Config pointing cache and output into this tree, with no tick delay.
    pub fn config(&self, max_steps: u32) -> RunConfig {
        let mut config = scripted_config(max_steps);
        config.environment.cache_dir = self.root().join("cache");
        config.environment.output_dir = self.output_dir();
        config.task.setup = vec![self.setup()];
        config
    }

    pub fn setup(&self) -> SetupDirective {
        SetupDirective::CopyAllSubfiles {
            dirs: vec![self.db_dir().display().to_string()],
        }
    }
}

impl Default for TempRun {
    fn default() -> Self {
        Self::new()
    }
}
