//! Disposable execution environments.
//!
//! Each run gets its own temporary directory containing the checkout. The
//! directory is removed when the [`Environment`] is dropped unless it was
//! explicitly kept.

use crate::paths;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    Macos,
    Windows,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            HostOs::Macos
        } else if cfg!(windows) {
            HostOs::Windows
        } else {
            HostOs::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostOs::Linux => "linux",
            HostOs::Macos => "macos",
            HostOs::Windows => "windows",
        }
    }
}

/// OS an image identifier targets. `None` for `self-hosted`, which runs on
/// whatever host invokes it.
pub fn image_os(image: &str) -> std::result::Result<Option<HostOs>, String> {
    let image = image.trim().to_ascii_lowercase();
    if image == "self-hosted" || image == "local" {
        return Ok(None);
    }
    let family = image.split('-').next().unwrap_or_default();
    match family {
        "ubuntu" | "linux" | "debian" => Ok(Some(HostOs::Linux)),
        "macos" => Ok(Some(HostOs::Macos)),
        "windows" => Ok(Some(HostOs::Windows)),
        _ => Err(format!("unknown image '{image}'")),
    }
}

#[derive(Debug)]
pub struct Environment {
    image: String,
    dir: Option<TempDir>,
    root: PathBuf,
}

impl Environment {
    /// Allocate a clean environment for `image` on this host.
    pub fn provision(image: &str) -> std::result::Result<Self, String> {
        let host = HostOs::current();
        if let Some(target) = image_os(image)? {
            if target != host {
                return Err(format!(
                    "image '{image}' requires a {} host, this host is {}",
                    target.as_str(),
                    host.as_str()
                ));
            }
        }

        let dir = tempfile::Builder::new()
            .prefix("webci-")
            .tempdir()
            .map_err(|e| format!("failed to allocate environment: {e}"))?;
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join(paths::CHECKOUT_DIR))
            .map_err(|e| format!("failed to create working directory: {e}"))?;
        tracing::info!(%image, root = %root.display(), "provisioned environment");
        Ok(Self {
            image: image.to_string(),
            dir: Some(dir),
            root,
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the source checkout lives. Starts out empty; the checkout step
    /// clones into it.
    pub fn checkout_dir(&self) -> PathBuf {
        self.root.join(paths::CHECKOUT_DIR)
    }

    /// Keep the directory on disk after the run, returning its path.
    pub fn keep(&mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            let _ = dir.keep();
        }
        self.root.clone()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.dir.is_some() {
            tracing::debug!(root = %self.root.display(), "tearing down environment");
        }
    }
}
