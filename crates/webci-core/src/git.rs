//! Thin wrapper around the `git` executable.

use crate::error::{Result, WebciError};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub fn git_binary() -> Result<PathBuf> {
    which::which("git").map_err(|_| WebciError::GitNotFound)
}

/// Run `git <args>` in `cwd` and return trimmed stdout.
pub fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let git = git_binary()?;
    tracing::debug!(cwd = %cwd.display(), args = ?args, "git");
    let output = Command::new(git)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WebciError::Git {
            command: args.first().copied().unwrap_or_default().to_string(),
            detail: stderr.trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Files changed between two revisions, using merge-base semantics
/// (`base...head`) like a pull request diff.
pub fn changed_files(repo: &Path, base: &str, head: &str) -> Result<Vec<String>> {
    let range = format!("{base}...{head}");
    let out = run_git(repo, &["diff", "--name-only", &range])?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Name of the branch currently checked out, if any.
pub fn current_branch(repo: &Path) -> Result<Option<String>> {
    let out = run_git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(if out.is_empty() || out == "HEAD" {
        None
    } else {
        Some(out)
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::Path;
    use std::process::Command;

    pub fn git_available() -> bool {
        which::which("git").is_ok()
    }

    /// Run a git command in `dir` with a fixed identity, panicking on failure.
    pub fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(["-c", "user.name=webci", "-c", "user.email=webci@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    /// Create a repository on branch `main` with one commit containing
    /// `files` (path, contents).
    pub fn init_repo(dir: &Path, files: &[(&str, &str)]) {
        git(dir, &["init", "-q"]);
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        for (path, contents) in files {
            let p = dir.join(path);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, contents).unwrap();
        }
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", "initial"]);
    }
}
