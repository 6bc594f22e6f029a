//! Action vocabulary understood by the local agent and shell environment.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::types::Action;

/// An action the local environment can execute.
///
/// The rendering includes every field, so two actions render equal only when
/// executing them would do the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskAction {
    /// Run a shell snippet in the workspace.
    Bash { code: String },
    /// Write a file relative to the workspace root.
    CreateFile { filepath: String, content: String },
    /// Finish the task with a final answer.
    Terminate { output: String },
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskAction::Bash { code } => write!(f, "Bash(code={code:?})"),
            TaskAction::CreateFile { filepath, content } => {
                write!(f, "CreateFile(filepath={filepath:?}):\n```\n{content}\n```")
            }
            TaskAction::Terminate { output } => write!(f, "Terminate(output={output:?})"),
        }
    }
}

impl Action for TaskAction {
    fn output(&self) -> Option<&str> {
        match self {
            TaskAction::Terminate { output } => Some(output),
            _ => None,
        }
    }
}
