use crate::error::{Result, WebciError};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const WEBCI_DIR: &str = ".webci";
pub const RUNS_DIR: &str = ".webci/runs";
pub const WORKFLOW_FILE: &str = ".webci/workflow.yaml";

/// Name of the checkout directory inside a provisioned environment.
pub const CHECKOUT_DIR: &str = "checkout";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn webci_dir(root: &Path) -> PathBuf {
    root.join(WEBCI_DIR)
}

pub fn workflow_path(root: &Path) -> PathBuf {
    root.join(WORKFLOW_FILE)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn report_path(root: &Path, run_id: &str) -> PathBuf {
    runs_dir(root).join(format!("{run_id}.json"))
}

/// Run ids name a file directly under the runs directory.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        return Err(WebciError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

/// Resolve a step working directory against the checkout root.
///
/// Only relative paths made of normal components (and `.`) are accepted so a
/// step can never reach outside the directory owned by its run.
pub fn resolve_working_dir(checkout: &Path, working_dir: &str) -> Result<PathBuf> {
    validate_working_dir(working_dir)?;
    let mut out = checkout.to_path_buf();
    for comp in Path::new(working_dir).components() {
        if let Component::Normal(part) = comp {
            out.push(part);
        }
    }
    Ok(out)
}

pub fn validate_working_dir(working_dir: &str) -> Result<()> {
    let path = Path::new(working_dir);
    let ok = !working_dir.trim().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !ok {
        return Err(WebciError::InvalidWorkingDirectory(working_dir.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Step name validation
// ---------------------------------------------------------------------------

static STEP_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn step_name_re() -> &'static Regex {
    STEP_NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").unwrap())
}

pub fn validate_step_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !step_name_re().is_match(name) {
        return Err(WebciError::InvalidStepName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
