use crate::install::PackageManager;
use crate::runtime::Runtime;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// StepAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Clone the source repository. `fetch_depth: 0` fetches full history.
    Checkout {
        #[serde(default)]
        fetch_depth: u32,
    },
    /// Select a runtime at a pinned major version.
    SetupRuntime {
        #[serde(default)]
        runtime: Runtime,
        version: String,
    },
    /// Frozen-lockfile dependency install.
    Install {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manager: Option<PackageManager>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
    },
    /// Arbitrary shell command, e.g. the site build.
    Run { command: String },
}

impl StepAction {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StepAction::Checkout { .. } => FailureKind::Checkout,
            StepAction::SetupRuntime { .. } => FailureKind::RuntimeSetup,
            StepAction::Install { .. } => FailureKind::Dependencies,
            StepAction::Run { .. } => FailureKind::Build,
        }
    }

    /// Checkout and runtime setup act on the environment, not on a
    /// working directory.
    pub fn uses_working_directory(&self) -> bool {
        matches!(self, StepAction::Install { .. } | StepAction::Run { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            StepAction::Checkout { fetch_depth: 0 } => "checkout (full history)".to_string(),
            StepAction::Checkout { fetch_depth } => format!("checkout (depth {fetch_depth})"),
            StepAction::SetupRuntime { runtime, version } => {
                format!("setup {} {version}", runtime.name())
            }
            StepAction::Install {
                command: Some(cmd), ..
            } => cmd.clone(),
            StepAction::Install {
                manager: Some(m), ..
            } => m.frozen_command().to_string(),
            StepAction::Install { .. } => "install (detect from lockfile)".to_string(),
            StepAction::Run { command } => command.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub name: String,
    pub action: StepAction,
    /// Overrides the workflow's default working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Maximum number of retries after the first attempt.
    /// `0` means one attempt total.
    #[serde(default)]
    pub max_retries: u32,
    /// `0` disables the timeout.
    #[serde(default)]
    pub timeout_seconds: u32,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            working_directory: None,
            max_retries: 0,
            timeout_seconds: 0,
        }
    }

    pub fn run(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            name,
            StepAction::Run {
                command: command.into(),
            },
        )
    }

    pub fn in_dir(mut self, working_directory: impl Into<String>) -> Self {
        self.working_directory = Some(working_directory.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    /// Never executed because an earlier step failed.
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Passed => "passed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    /// 1-indexed attempt number of the recorded execution.
    pub attempt: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl StepResult {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            output: String::new(),
            attempt: 0,
            duration_ms: 0,
            timed_out: false,
        }
    }
}

/// Which stage of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provision,
    Checkout,
    RuntimeSetup,
    Dependencies,
    Build,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Provision => "provision",
            FailureKind::Checkout => "checkout",
            FailureKind::RuntimeSetup => "runtime_setup",
            FailureKind::Dependencies => "dependencies",
            FailureKind::Build => "build",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
