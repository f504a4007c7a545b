//! Event filter: decides whether an event starts a run.
//!
//! A non-match is a normal outcome, never an error.

use crate::event::{Event, EventKind};
use glob_match::glob_match;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TriggerFilter
// ---------------------------------------------------------------------------

/// Filters for one event type. An empty list means "no constraint".
/// When both lists are set, both must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl TriggerFilter {
    pub fn branches<I, S>(branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
            paths: Vec::new(),
        }
    }

    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: Vec::new(),
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    fn branch_matches(&self, branch: &str) -> bool {
        self.branches.is_empty() || self.branches.iter().any(|p| glob_match(p, branch))
    }

    /// First changed path that matches any pattern.
    fn first_matching_path<'a>(&self, event: &'a Event) -> Option<&'a str> {
        event
            .changed_paths
            .iter()
            .map(|p| normalize(p))
            .find(|path| self.paths.iter().any(|pattern| glob_match(pattern, path)))
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./")
}

// ---------------------------------------------------------------------------
// TriggerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<TriggerFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<TriggerFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub triggered: bool,
    pub reason: String,
}

impl TriggerDecision {
    fn start(reason: String) -> Self {
        Self {
            triggered: true,
            reason,
        }
    }

    fn skip(reason: String) -> Self {
        Self {
            triggered: false,
            reason,
        }
    }
}

impl TriggerConfig {
    pub fn is_empty(&self) -> bool {
        self.pull_request.is_none() && self.push.is_none()
    }

    pub fn filter_for(&self, kind: EventKind) -> Option<&TriggerFilter> {
        match kind {
            EventKind::PullRequest => self.pull_request.as_ref(),
            EventKind::Push => self.push.as_ref(),
        }
    }

    pub fn evaluate(&self, event: &Event) -> TriggerDecision {
        let Some(filter) = self.filter_for(event.kind) else {
            return TriggerDecision::skip(format!("no trigger configured for {}", event.kind));
        };

        if !filter.branch_matches(&event.branch) {
            return TriggerDecision::skip(format!(
                "branch '{}' does not match [{}]",
                event.branch,
                filter.branches.join(", ")
            ));
        }

        if filter.paths.is_empty() {
            return TriggerDecision::start(match event.kind {
                EventKind::Push => format!("push to '{}'", event.branch),
                EventKind::PullRequest => "pull request (no path filter)".to_string(),
            });
        }

        match filter.first_matching_path(event) {
            Some(path) => TriggerDecision::start(format!("changed path '{path}' matches")),
            None if event.changed_paths.is_empty() => {
                TriggerDecision::skip("event has no changed paths".to_string())
            }
            None => TriggerDecision::skip(format!(
                "none of {} changed path(s) match [{}]",
                event.changed_paths.len(),
                filter.paths.join(", ")
            )),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.evaluate(event).triggered
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
