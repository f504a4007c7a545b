//! Source checkout into the environment's working directory.

use crate::shell::{self, CommandOutput, StepEnv};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Clone `source` into `dest`. `fetch_depth == 0` clones full history;
/// otherwise a shallow clone of that many commits. When `revision` is set it
/// is checked out after the clone.
pub fn checkout(
    source: &str,
    dest: &Path,
    fetch_depth: u32,
    revision: Option<&str>,
    env: &StepEnv,
    timeout: Option<Duration>,
) -> CommandOutput {
    let git = match crate::git::git_binary() {
        Ok(g) => g,
        Err(e) => return CommandOutput::rejected(e.to_string()),
    };

    if dest.exists() && dest.read_dir().map(|mut d| d.next().is_some()).unwrap_or(true) {
        return CommandOutput::rejected(format!(
            "checkout directory {} is not empty",
            dest.display()
        ));
    }

    let mut clone = Command::new(&git);
    clone.arg("clone");
    if fetch_depth > 0 {
        clone.arg("--depth").arg(fetch_depth.to_string());
    }
    clone.arg(clone_url(source, fetch_depth)).arg(dest);
    env.apply(&mut clone);

    tracing::info!(%source, dest = %dest.display(), fetch_depth, "cloning");
    let cloned = shell::execute(clone, timeout);
    if !cloned.success() {
        return cloned;
    }

    let Some(rev) = revision else {
        return cloned;
    };
    if rev.starts_with('-') {
        return CommandOutput::rejected(format!("invalid revision '{rev}'"));
    }

    let mut co = Command::new(&git);
    co.args(["checkout", "-q", rev]).current_dir(dest);
    env.apply(&mut co);
    let checked_out = shell::execute(co, timeout);
    CommandOutput {
        output: [cloned.output.as_str(), checked_out.output.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n"),
        ..checked_out
    }
}

/// git ignores `--depth` for plain local paths; route them through file://.
fn clone_url(source: &str, fetch_depth: u32) -> String {
    if fetch_depth > 0 && !source.contains("://") && Path::new(source).exists() {
        let abs = std::fs::canonicalize(source)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| source.to_string());
        return format!("file://{abs}");
    }
    source.to_string()
}
