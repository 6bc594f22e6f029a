//! Session snapshot storage (`<output_dir>/<instance_id>/session.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::session::SessionSnapshot;

pub fn snapshot_path(output_dir: &Path, instance_id: &str) -> PathBuf {
    output_dir.join(instance_id).join("session.json")
}

/// Load a snapshot written by [`write_session_snapshot`].
pub fn load_session_snapshot(path: &Path) -> Result<SessionSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let snapshot: SessionSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    debug!(phase = %snapshot.phase, step_index = snapshot.step_index, "snapshot loaded");
    Ok(snapshot)
}

/// Atomically write a snapshot to disk (temp file + rename).
pub fn write_session_snapshot(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
    debug!(path = %path.display(), phase = %snapshot.phase, step_index = snapshot.step_index, "writing snapshot");
    let mut buf = serde_json::to_string_pretty(snapshot)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("snapshot path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp snapshot {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace snapshot {}", path.display()))?;
    Ok(())
}
