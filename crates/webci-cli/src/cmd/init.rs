use anyhow::Context;
use std::path::Path;
use webci_core::error::WebciError;
use webci_core::io::{ensure_dir, ensure_gitignore_entry};
use webci_core::paths;
use webci_core::workflow::Workflow;

pub fn run(root: &Path, force: bool) -> anyhow::Result<()> {
    let path = paths::workflow_path(root);
    if path.exists() && !force {
        return Err(WebciError::WorkflowExists(path.display().to_string()).into());
    }

    ensure_dir(&paths::webci_dir(root)).context("failed to create .webci/")?;
    Workflow::website()
        .save(root)
        .context("failed to write workflow")?;
    ensure_gitignore_entry(root, &format!("{}/", paths::RUNS_DIR))
        .context("failed to update .gitignore")?;

    println!("Wrote {}", path.display());
    println!("Next: webci check --pull-request --changed docs/intro.md");
    Ok(())
}
