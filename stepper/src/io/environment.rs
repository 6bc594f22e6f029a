//! Environment abstraction and the local shell-backed environment.
//!
//! The [`EnvironmentPort`] trait is everything the controller needs from a task
//! environment: execute one action, collect artifacts, release resources.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::actions::TaskAction;
use crate::core::task::{SetupDirective, TaskDescriptor};
use crate::core::types::{EnvStep, ResultFiles};
use crate::io::config::EnvironmentSettings;
use crate::io::process::run_command_with_timeout;

/// Executes actions of type `A` for one run.
pub trait EnvironmentPort<A> {
    /// Execute one action. `Err` is a fault and ends the run.
    fn step(&mut self, action: &A) -> Result<EnvStep>;

    /// Collect result artifacts. Called once per run, after the step phase.
    fn post_process(&mut self) -> Result<ResultFiles>;

    /// Release resources. Called once per run, right after `post_process`.
    fn close(&mut self) -> Result<()>;
}

/// Observation for a shell action that succeeded silently.
pub const SILENT_SUCCESS_OBSERVATION: &str = "Command executed successfully. No output.";

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Environment that runs actions against a scratch directory on the local host.
///
/// The workspace lives under `<cache_dir>/<instance_id>/workspace` and is removed
/// on `close`. Files that are new or changed since setup are copied to
/// `<output_dir>/<instance_id>/files/` by `post_process`.
pub struct ShellEnvironment {
    settings: EnvironmentSettings,
    name: String,
    run_dir: PathBuf,
    workspace: PathBuf,
    result_dir: PathBuf,
    baseline: BTreeMap<PathBuf, FileStamp>,
    closed: bool,
}

impl ShellEnvironment {
    /// Materialize the workspace and apply the task's setup directives.
    #[instrument(skip_all, fields(instance_id = %task.instance_id))]
    pub fn new(settings: EnvironmentSettings, task: &TaskDescriptor) -> Result<Self> {
        let run_dir = settings.cache_dir.join(&task.instance_id);
        let workspace = run_dir.join("workspace");
        let result_dir = settings.output_dir.join(&task.instance_id).join("files");
        if workspace.exists() {
            fs::remove_dir_all(&workspace)
                .with_context(|| format!("clear stale workspace {}", workspace.display()))?;
        }
        fs::create_dir_all(&workspace)
            .with_context(|| format!("create workspace {}", workspace.display()))?;

        let prepared = task
            .setup
            .iter()
            .try_for_each(|directive| apply_setup(directive, &workspace))
            .and_then(|()| scan_files(&workspace));
        let baseline = match prepared {
            Ok(baseline) => baseline,
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&run_dir) {
                    warn!(err = %cleanup, run_dir = %run_dir.display(), "failed to remove partial workspace");
                }
                return Err(err);
            }
        };

        let name = format!("stepper_{}", task.instance_id);
        info!(
            name = %name,
            image = %settings.image_name,
            workspace = %workspace.display(),
            files = baseline.len(),
            "environment ready"
        );
        Ok(Self {
            settings,
            name,
            run_dir,
            workspace,
            result_dir,
            baseline,
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(anyhow!("environment {} is closed", self.name));
        }
        Ok(())
    }

    fn run_bash(&self, code: &str) -> Result<EnvStep> {
        let timeout = Duration::from_secs(self.settings.action_timeout_secs);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(code).current_dir(&self.workspace);
        let output =
            run_command_with_timeout(cmd, None, timeout, self.settings.output_limit_bytes)
                .context("run bash action")?;

        let text = output.combined_text();
        let observation = if output.timed_out {
            format!("Command timed out after {} seconds.\n{text}", timeout.as_secs())
                .trim()
                .to_string()
        } else if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            format!("{text}\n[exit code {code}]").trim().to_string()
        } else if text.is_empty() {
            SILENT_SUCCESS_OBSERVATION.to_string()
        } else {
            text
        };
        Ok(EnvStep {
            observation,
            done: false,
        })
    }

    fn create_file(&self, filepath: &str, content: &str) -> Result<EnvStep> {
        let Some(relative) = confined_path(filepath) else {
            return Ok(EnvStep {
                observation: format!(
                    "Invalid file path {filepath:?}: paths must be relative to the workspace."
                ),
                done: false,
            });
        };
        let target = self.workspace.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
        Ok(EnvStep {
            observation: format!("File {filepath} created successfully."),
            done: false,
        })
    }
}

impl EnvironmentPort<TaskAction> for ShellEnvironment {
    #[instrument(skip_all, fields(env = %self.name))]
    fn step(&mut self, action: &TaskAction) -> Result<EnvStep> {
        self.ensure_open()?;
        debug!(action = %action, "executing action");
        match action {
            TaskAction::Bash { code } => self.run_bash(code),
            TaskAction::CreateFile { filepath, content } => self.create_file(filepath, content),
            TaskAction::Terminate { .. } => Ok(EnvStep {
                observation: "Terminate".to_string(),
                done: true,
            }),
        }
    }

    #[instrument(skip_all, fields(env = %self.name))]
    fn post_process(&mut self) -> Result<ResultFiles> {
        self.ensure_open()?;
        let current = scan_files(&self.workspace)?;
        let mut files = ResultFiles::new();
        for (relative, stamp) in &current {
            if self.baseline.get(relative) == Some(stamp) {
                continue;
            }
            let source = self.workspace.join(relative);
            let dest = self.result_dir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create result dir {}", parent.display()))?;
            }
            fs::copy(&source, &dest)
                .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
            files.insert(display_relative(relative), dest.display().to_string());
        }
        info!(files = files.len(), result_dir = %self.result_dir.display(), "collected result files");
        Ok(files)
    }

    #[instrument(skip_all, fields(env = %self.name))]
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.run_dir.exists() {
            fs::remove_dir_all(&self.run_dir)
                .with_context(|| format!("remove {}", self.run_dir.display()))?;
        }
        info!("environment closed");
        Ok(())
    }
}

impl Drop for ShellEnvironment {
    fn drop(&mut self) {
        if !self.closed {
            warn!(env = %self.name, "environment dropped without close");
        }
    }
}

fn apply_setup(directive: &SetupDirective, workspace: &Path) -> Result<()> {
    match directive {
        SetupDirective::CopyAllSubfiles { dirs } => {
            for dir in dirs {
                copy_all_subfiles(Path::new(dir), workspace)
                    .with_context(|| format!("copy_all_subfiles {dir}"))?;
            }
        }
    }
    Ok(())
}

fn copy_all_subfiles(source: &Path, workspace: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(anyhow!("{} is not a directory", source.display()));
    }
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let dest = workspace.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    debug!(source = %source.display(), "copied setup files");
    Ok(())
}

fn scan_files(root: &Path) -> Result<BTreeMap<PathBuf, FileStamp>> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", entry.path().display()))?
            .to_path_buf();
        files.insert(
            relative,
            FileStamp {
                len: meta.len(),
                modified: meta.modified().ok(),
            },
        );
    }
    Ok(files)
}

/// Accept only plain relative paths that stay inside the workspace.
fn confined_path(filepath: &str) -> Option<PathBuf> {
    let path = Path::new(filepath.trim_start_matches("./"));
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(clean)
}

fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
