//! Task descriptors handed to the environment when a run starts.

use serde::{Deserialize, Serialize};

/// Task type recorded for locally submitted questions.
pub const LOCAL_TASK_TYPE: &str = "Local";

/// Preparation applied to the workspace before the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SetupDirective {
    /// Copy the contents of each directory into the workspace root.
    CopyAllSubfiles { dirs: Vec<String> },
}

/// One submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub instance_id: String,
    pub task_type: String,
    pub question: String,
    pub setup: Vec<SetupDirective>,
}

impl TaskDescriptor {
    /// Describe a locally submitted question; `unix_secs` keeps the instance id unique per run.
    pub fn local(question: impl Into<String>, setup: Vec<SetupDirective>, unix_secs: i64) -> Self {
        Self {
            instance_id: local_instance_id(unix_secs),
            task_type: LOCAL_TASK_TYPE.to_string(),
            question: question.into(),
            setup,
        }
    }
}

pub fn local_instance_id(unix_secs: i64) -> String {
    format!("local-quickstart-{unix_secs}")
}
