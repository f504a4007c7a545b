use crate::error::{Result, WebciError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PullRequest,
    Push,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PullRequest => "pull_request",
            EventKind::Push => "push",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// The external occurrence that may start a run. Consumed once by the
/// trigger filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub changed_paths: BTreeSet<String>,
    #[serde(default)]
    pub branch: String,
    /// Revision to check out. `None` keeps whatever the clone lands on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl Event {
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            changed_paths: BTreeSet::new(),
            branch: branch.into(),
            sha: None,
        }
    }

    pub fn pull_request<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: EventKind::PullRequest,
            changed_paths: paths.into_iter().map(Into::into).collect(),
            branch: String::new(),
            sha: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Load an event description from a `.json` file, or YAML otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let event: Event = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&data)?,
            _ => serde_yaml::from_str(&data)?,
        };
        event.validate()?;
        Ok(event)
    }

    /// Fill `changed_paths` from `git diff base...head` in `repo`.
    pub fn add_changed_from_git(&mut self, repo: &Path, base: &str, head: &str) -> Result<()> {
        let files = crate::git::changed_files(repo, base, head)?;
        tracing::debug!(count = files.len(), %base, %head, "changed paths from git");
        self.changed_paths.extend(files);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind == EventKind::Push && self.branch.trim().is_empty() {
            return Err(WebciError::InvalidEvent(
                "push event requires a branch".to_string(),
            ));
        }
        if let Some(bad) = self.changed_paths.iter().find(|p| p.trim().is_empty()) {
            return Err(WebciError::InvalidEvent(format!(
                "changed path must not be empty: {bad:?}"
            )));
        }
        Ok(())
    }
}

/// Split `BASE..HEAD` / `BASE...HEAD` into its revisions. A bare `BASE`
/// compares against `HEAD`.
pub fn parse_revision_range(range: &str) -> Result<(String, String)> {
    let (base, head) = match range.split_once("...").or_else(|| range.split_once("..")) {
        Some((b, h)) => (b, if h.is_empty() { "HEAD" } else { h }),
        None => (range, "HEAD"),
    };
    if base.is_empty() {
        return Err(WebciError::InvalidEvent(format!(
            "revision range '{range}' has no base"
        )));
    }
    Ok((base.to_string(), head.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn event_json_uses_type_tag() {
        let json = r#"{"type":"pull_request","changed_paths":["docs/intro.md"],"branch":"feat"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::PullRequest);
        assert!(event.changed_paths.contains("docs/intro.md"));
        assert_eq!(event.branch, "feat");
        assert!(event.sha.is_none());
    }

    #[test]
    fn load_yaml_event_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("event.yaml");
        std::fs::write(&path, "type: push\nbranch: main\nsha: abc123\n").unwrap();
        let event = Event::load(&path).unwrap();
        assert_eq!(event, Event::push("main").with_sha("abc123"));
    }

    #[test]
    fn push_without_branch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, r#"{"type":"push"}"#).unwrap();
        let err = Event::load(&path).unwrap_err();
        assert!(err.to_string().contains("requires a branch"));
    }

    #[test]
    fn unknown_event_type_fails_to_parse() {
        let json = r#"{"type":"release","branch":"main"}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn revision_ranges() {
        assert_eq!(
            parse_revision_range("main...feature").unwrap(),
            ("main".to_string(), "feature".to_string())
        );
        assert_eq!(
            parse_revision_range("origin/main..").unwrap(),
            ("origin/main".to_string(), "HEAD".to_string())
        );
        assert_eq!(
            parse_revision_range("main").unwrap(),
            ("main".to_string(), "HEAD".to_string())
        );
        assert!(parse_revision_range("..HEAD").is_err());
    }
}
