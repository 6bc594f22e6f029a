//! Per-step records under `<output_dir>/<instance_id>/steps/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::StepRecord;

pub fn steps_dir(output_dir: &Path, instance_id: &str) -> PathBuf {
    output_dir.join(instance_id).join("steps")
}

/// Write `record` to `steps/<step_number>.json`, returning its path.
///
/// Records are append-only; rewriting the same step overwrites with identical
/// content.
pub fn write_step_record(
    output_dir: &Path,
    instance_id: &str,
    record: &StepRecord,
) -> Result<PathBuf> {
    let dir = steps_dir(output_dir, instance_id);
    fs::create_dir_all(&dir).with_context(|| format!("create steps dir {}", dir.display()))?;
    let path = dir.join(format!("{}.json", record.step_number));
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write step record {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_file_per_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let record = StepRecord {
            step_number: 2,
            thought: "look".to_string(),
            action_repr: "Bash(code=\"ls\")".to_string(),
            observation: Some("data.csv".to_string()),
        };

        let path = write_step_record(temp.path(), "run-1", &record).expect("write");

        assert_eq!(path, temp.path().join("run-1").join("steps").join("2.json"));
        let loaded: StepRecord =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded, record);
    }
}
