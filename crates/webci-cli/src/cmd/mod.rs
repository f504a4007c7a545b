pub mod check;
pub mod config;
pub mod history;
pub mod init;
pub mod run;

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use webci_core::event::{self, Event, EventKind};
use webci_core::workflow::Workflow;

/// Load the workflow from `--workflow` if given, else from the project root.
pub fn load_workflow(root: &Path, explicit: Option<&Path>) -> anyhow::Result<Workflow> {
    match explicit {
        Some(path) => Workflow::load_from(path)
            .with_context(|| format!("failed to load workflow {}", path.display())),
        None => Workflow::load(root).context("failed to load workflow"),
    }
}

// ---------------------------------------------------------------------------
// Event arguments shared by `check` and `run`
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
pub struct EventArgs {
    /// Read the event from a JSON or YAML file
    #[arg(long, value_name = "FILE", conflicts_with_all = ["push", "pull_request"])]
    pub event: Option<PathBuf>,

    /// Describe a push event (requires --branch)
    #[arg(long, conflicts_with = "pull_request")]
    pub push: bool,

    /// Describe a pull request event
    #[arg(long = "pull-request")]
    pub pull_request: bool,

    /// Branch the event refers to
    #[arg(long)]
    pub branch: Option<String>,

    /// Changed path (repeatable)
    #[arg(long = "changed", value_name = "PATH")]
    pub changed: Vec<String>,

    /// Add paths changed in BASE[...HEAD] according to git
    #[arg(long = "changed-from-git", value_name = "RANGE")]
    pub changed_from_git: Option<String>,

    /// Commit to check out
    #[arg(long)]
    pub sha: Option<String>,
}

impl EventArgs {
    pub fn resolve(&self, root: &Path) -> anyhow::Result<Event> {
        let mut event = match (&self.event, self.push, self.pull_request) {
            (Some(path), _, _) => Event::load(path)
                .with_context(|| format!("failed to load event {}", path.display()))?,
            (None, true, _) => Event::push(String::new()),
            (None, false, true) => Event::pull_request(Vec::<String>::new()),
            (None, false, false) => {
                anyhow::bail!("no event given: use --event FILE, --push or --pull-request")
            }
        };

        if let Some(branch) = &self.branch {
            event.branch = branch.clone();
        }
        if let Some(sha) = &self.sha {
            event.sha = Some(sha.clone());
        }
        event.changed_paths.extend(self.changed.iter().cloned());

        if let Some(range) = &self.changed_from_git {
            let (base, head) = event::parse_revision_range(range)?;
            event
                .add_changed_from_git(root, &base, &head)
                .with_context(|| format!("failed to diff {range}"))?;
        }

        if event.kind == EventKind::Push && event.branch.is_empty() {
            if let Ok(Some(current)) = webci_core::git::current_branch(root) {
                tracing::debug!(branch = %current, "using current branch for push event");
                event.branch = current;
            }
        }

        event.validate()?;
        Ok(event)
    }
}
