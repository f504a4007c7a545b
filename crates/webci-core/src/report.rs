//! Persisted record of one run.

use crate::error::{Result, WebciError};
use crate::event::Event;
use crate::paths;
use crate::step::{FailureKind, StepResult, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub step: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub run_id: String,
    pub workflow: String,
    pub event: Event,
    pub trigger_reason: String,
    pub image: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    /// First non-zero exit code, or 0 on success.
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub steps: Vec<StepResult>,
    /// Set when the environment was kept after the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

impl JobResult {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn executed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
    }

    pub fn save(&self, root: &Path) -> Result<PathBuf> {
        paths::validate_run_id(&self.run_id)?;
        let path = paths::report_path(root, &self.run_id);
        let data = serde_json::to_string_pretty(self)?;
        crate::io::atomic_write(&path, data.as_bytes())?;
        Ok(path)
    }

    pub fn load(root: &Path, run_id: &str) -> Result<Self> {
        paths::validate_run_id(run_id)?;
        let path = paths::report_path(root, run_id);
        if !path.exists() {
            return Err(WebciError::ReportNotFound(run_id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// All saved reports, newest first. Unreadable files are skipped.
    pub fn list(root: &Path) -> Result<Vec<Self>> {
        let dir = paths::runs_dir(root);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut reports = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(WebciError::from)
                .and_then(|d| serde_json::from_str::<JobResult>(&d).map_err(WebciError::from));
            match parsed {
                Ok(r) => reports.push(r),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable report"),
            }
        }
        reports.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn report(run_id: &str, started_at: DateTime<Utc>, success: bool) -> JobResult {
        JobResult {
            run_id: run_id.to_string(),
            workflow: "website".to_string(),
            event: Event::push("main"),
            trigger_reason: "push to 'main'".to_string(),
            image: "ubuntu-latest".to_string(),
            started_at,
            finished_at: started_at + Duration::milliseconds(1500),
            success,
            exit_code: if success { 0 } else { 2 },
            failure: None,
            steps: vec![StepResult::skipped("build")],
            workspace: None,
        }
    }

    #[test]
    fn save_and_load() {
        let dir = TempDir::new().unwrap();
        let r = report("run-1", Utc::now(), true);
        let path = r.save(dir.path()).unwrap();
        assert!(path.ends_with(".webci/runs/run-1.json"));
        let loaded = JobResult::load(dir.path(), "run-1").unwrap();
        assert_eq!(loaded, r);
        assert_eq!(loaded.duration_ms(), 1500);
        assert!(loaded.step("build").is_some());
        assert_eq!(loaded.executed_steps().count(), 0);
    }

    #[test]
    fn load_missing_report() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            JobResult::load(dir.path(), "nope"),
            Err(WebciError::ReportNotFound(_))
        ));
    }

    #[test]
    fn load_rejects_ids_that_leave_runs_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".webci")).unwrap();
        std::fs::write(dir.path().join(".webci/secret.json"), "{}").unwrap();
        assert!(matches!(
            JobResult::load(dir.path(), "../secret"),
            Err(WebciError::InvalidRunId(_))
        ));
    }

    #[test]
    fn list_is_newest_first_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        report("old", now - Duration::hours(1), false)
            .save(dir.path())
            .unwrap();
        report("new", now, true).save(dir.path()).unwrap();
        std::fs::write(paths::runs_dir(dir.path()).join("broken.json"), "{").unwrap();
        std::fs::write(paths::runs_dir(dir.path()).join("notes.txt"), "x").unwrap();

        let list = JobResult::list(dir.path()).unwrap();
        let ids: Vec<&str> = list.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn list_without_runs_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(JobResult::list(dir.path()).unwrap().is_empty());
    }
}
