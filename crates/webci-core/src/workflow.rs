use crate::environment;
use crate::error::{Result, WebciError};
use crate::install::PackageManager;
use crate::paths;
use crate::runtime::{self, Runtime};
use crate::step::{StepAction, StepDefinition};
use crate::trigger::{TriggerConfig, TriggerFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: String) -> Self {
        Self {
            level: WarnLevel::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            level: WarnLevel::Error,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefaults {
    /// Working directory for install and run steps, relative to the checkout.
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
}

fn default_working_directory() -> String {
    ".".to_string()
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "default_version")]
    pub version: u32,
    pub name: String,
    #[serde(rename = "on", default)]
    pub triggers: TriggerConfig,
    #[serde(default = "default_runs_on")]
    pub runs_on: String,
    #[serde(default)]
    pub defaults: StepDefaults,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

fn default_version() -> u32 {
    1
}

fn default_runs_on() -> String {
    "ubuntu-latest".to_string()
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 1,
            name: name.into(),
            triggers: TriggerConfig::default(),
            runs_on: default_runs_on(),
            defaults: StepDefaults::default(),
            steps: Vec::new(),
        }
    }

    /// The documentation website pipeline: build `./docs` on pull requests
    /// touching the site and on pushes to `main`.
    pub fn website() -> Self {
        Self {
            version: 1,
            name: "website".to_string(),
            triggers: TriggerConfig {
                pull_request: Some(TriggerFilter::paths([
                    ".github/workflows/website.yml",
                    ".github/workflows/deploy-website.yml",
                    "docs/**",
                ])),
                push: Some(TriggerFilter::branches(["main"])),
            },
            runs_on: default_runs_on(),
            defaults: StepDefaults {
                working_directory: "./docs".to_string(),
            },
            steps: vec![
                StepDefinition::new("checkout", StepAction::Checkout { fetch_depth: 0 }),
                StepDefinition::new(
                    "setup-node",
                    StepAction::SetupRuntime {
                        runtime: Runtime::Node,
                        version: "18".to_string(),
                    },
                ),
                StepDefinition::new(
                    "install",
                    StepAction::Install {
                        manager: Some(PackageManager::Yarn),
                        command: None,
                    },
                ),
                StepDefinition::run("build", "yarn build"),
            ],
        }
    }

    /// Working directory a step runs in, relative to the checkout.
    pub fn working_directory_for<'a>(&'a self, step: &'a StepDefinition) -> &'a str {
        step.working_directory
            .as_deref()
            .unwrap_or(&self.defaults.working_directory)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::workflow_path(root);
        if !path.exists() {
            return Err(WebciError::NotInitialized);
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let wf: Workflow = serde_yaml::from_str(&data)?;
        Ok(wf)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        self.save_to(&paths::workflow_path(root))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.triggers.is_empty() {
            warnings.push(ConfigWarning::warning(
                "no triggers configured under 'on': no event will start a run".to_string(),
            ));
        }
        if let Some(pr) = &self.triggers.pull_request {
            if pr.paths.iter().chain(&pr.branches).any(|p| p.trim().is_empty()) {
                warnings.push(ConfigWarning::error(
                    "empty pattern in on.pull_request".to_string(),
                ));
            }
        }
        if let Some(push) = &self.triggers.push {
            if push.paths.iter().chain(&push.branches).any(|p| p.trim().is_empty()) {
                warnings.push(ConfigWarning::error("empty pattern in on.push".to_string()));
            }
        }

        if let Err(e) = environment::image_os(&self.runs_on) {
            warnings.push(ConfigWarning::error(format!("runs_on: {e}")));
        }

        if paths::validate_working_dir(&self.defaults.working_directory).is_err() {
            warnings.push(ConfigWarning::error(format!(
                "defaults.working_directory '{}' must be relative and stay inside the checkout",
                self.defaults.working_directory
            )));
        }

        if self.steps.is_empty() {
            warnings.push(ConfigWarning::error("workflow has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if paths::validate_step_name(&step.name).is_err() {
                warnings.push(ConfigWarning::warning(format!(
                    "step name '{}' should be lowercase alphanumeric with hyphens",
                    step.name
                )));
            }
            if !seen.insert(step.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }

            match &step.action {
                StepAction::Run { command } if command.trim().is_empty() => {
                    warnings.push(ConfigWarning::error(format!(
                        "step '{}' has an empty command",
                        step.name
                    )));
                }
                StepAction::Install {
                    command: Some(command),
                    ..
                } if command.trim().is_empty() => {
                    warnings.push(ConfigWarning::error(format!(
                        "step '{}' has an empty install command",
                        step.name
                    )));
                }
                StepAction::SetupRuntime { runtime, version }
                    if runtime::parse_major(version).is_none() =>
                {
                    warnings.push(ConfigWarning::error(format!(
                        "step '{}': {} version '{}' is not a major version",
                        step.name,
                        runtime.name(),
                        version
                    )));
                }
                _ => {}
            }

            if let Some(wd) = &step.working_directory {
                if !step.action.uses_working_directory() {
                    warnings.push(ConfigWarning::warning(format!(
                        "step '{}' ignores working_directory",
                        step.name
                    )));
                } else if paths::validate_working_dir(wd).is_err() {
                    warnings.push(ConfigWarning::error(format!(
                        "step '{}' working_directory '{}' must be relative and stay inside the checkout",
                        step.name, wd
                    )));
                }
            }

            if step.max_retries > 10 {
                warnings.push(ConfigWarning::warning(format!(
                    "step '{}' has max_retries={} (>10 is unusual)",
                    step.name, step.max_retries
                )));
            }
        }

        let checkouts = self
            .steps
            .iter()
            .filter(|s| matches!(s.action, StepAction::Checkout { .. }))
            .count();
        if checkouts > 1 {
            warnings.push(ConfigWarning::error(
                "more than one checkout step: a run owns exactly one working directory"
                    .to_string(),
            ));
        }
        if checkouts == 1 && !matches!(self.steps[0].action, StepAction::Checkout { .. }) {
            warnings.push(ConfigWarning::warning(
                "checkout is not the first step; earlier steps see an empty environment"
                    .to_string(),
            ));
        }

        warnings
    }

    pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
        warnings.iter().any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use tempfile::TempDir;

    #[test]
    fn website_workflow_is_valid() {
        let wf = Workflow::website();
        assert!(wf.validate().is_empty(), "{:?}", wf.validate());
        assert_eq!(wf.steps.len(), 4);
        assert_eq!(wf.defaults.working_directory, "./docs");
    }

    #[test]
    fn website_workflow_roundtrip_through_disk() {
        let dir = TempDir::new().unwrap();
        let wf = Workflow::website();
        wf.save(dir.path()).unwrap();
        let text = std::fs::read_to_string(paths::workflow_path(dir.path())).unwrap();
        assert!(text.contains("docs/**"));
        assert!(text.contains("type: setup_runtime"));
        let loaded = Workflow::load(dir.path()).unwrap();
        assert_eq!(loaded, wf);
    }

    #[test]
    fn website_triggers_match_expected_events() {
        let wf = Workflow::website();
        assert!(wf.triggers.matches(&Event::pull_request(["docs/blog/post.md"])));
        assert!(wf.triggers.matches(&Event::push("main")));
        assert!(!wf.triggers.matches(&Event::push("gh-pages")));
        assert!(!wf.triggers.matches(&Event::pull_request(["src/lib.rs"])));
    }

    #[test]
    fn load_without_workflow_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Workflow::load(dir.path()),
            Err(WebciError::NotInitialized)
        ));
    }

    #[test]
    fn minimal_yaml_uses_defaults() {
        let yaml = r#"
name: site
steps:
  - name: build
    action:
      type: run
      command: make
"#;
        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(wf.version, 1);
        assert_eq!(wf.runs_on, "ubuntu-latest");
        assert_eq!(wf.defaults.working_directory, ".");
        assert!(wf.triggers.is_empty());
        assert!(wf
            .validate()
            .iter()
            .any(|w| w.message.contains("no triggers")));
    }

    #[test]
    fn step_working_directory_overrides_default() {
        let mut wf = Workflow::website();
        wf.steps[3] = StepDefinition::run("build", "make").in_dir("site");
        assert_eq!(wf.working_directory_for(&wf.steps[2]), "./docs");
        assert_eq!(wf.working_directory_for(&wf.steps[3]), "site");
    }

    #[test]
    fn validate_reports_errors() {
        let mut wf = Workflow::website();
        wf.runs_on = "plan9".to_string();
        wf.defaults.working_directory = "../outside".to_string();
        wf.steps.push(StepDefinition::run("build", "  "));
        wf.steps.push(StepDefinition::new(
            "setup-again",
            StepAction::SetupRuntime {
                runtime: Runtime::Node,
                version: "lts".to_string(),
            },
        ));
        let warnings = wf.validate();
        let has = |needle: &str| warnings.iter().any(|w| w.message.contains(needle));
        assert!(has("runs_on"));
        assert!(has("defaults.working_directory"));
        assert!(has("duplicate step name 'build'"));
        assert!(has("empty command"));
        assert!(has("'lts' is not a major version"));
        assert!(Workflow::has_errors(&warnings));
    }

    #[test]
    fn validate_retry_and_checkout_warnings() {
        let mut wf = Workflow::website();
        wf.steps[3].max_retries = 15;
        wf.steps.swap(0, 1);
        let warnings = wf.validate();
        assert!(warnings.iter().any(|w| w.message.contains("max_retries=15")));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("checkout is not the first step")));
        assert!(!Workflow::has_errors(&warnings));
    }

    #[test]
    fn validate_rejects_second_checkout() {
        let mut wf = Workflow::website();
        wf.steps.push(StepDefinition::new(
            "checkout-two",
            StepAction::Checkout { fetch_depth: 1 },
        ));
        assert!(Workflow::has_errors(&wf.validate()));
    }
}
