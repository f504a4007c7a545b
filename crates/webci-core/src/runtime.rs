//! Language runtime selection for the setup step.
//!
//! A runtime is pinned by major version. Candidates come from toolchain
//! directories first (nvm's `versions/node/vX.Y.Z` and unpacked
//! `node-vX.Y.Z-<platform>` layouts), then from the ambient `PATH`. The
//! selected binary's directory is prepended to the run's `PATH` so every
//! later step resolves the same toolchain.

use crate::shell::{self, StepEnv};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    #[default]
    Node,
    Bun,
    Deno,
}

impl Runtime {
    pub fn name(&self) -> &'static str {
        match self {
            Runtime::Node => "node",
            Runtime::Bun => "bun",
            Runtime::Deno => "deno",
        }
    }

    pub fn binary(&self) -> &'static str {
        self.name()
    }
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| Regex::new(r"v?(\d+)(?:\.(\d+))?(?:\.(\d+))?").unwrap())
}

/// Find the first version number in `text` (`v18.19.0`, `deno 1.40.2 (...)`,
/// `node-v18.20.1-linux-x64`).
pub fn parse_version(text: &str) -> Option<Version> {
    let caps = version_re().captures(text)?;
    let num = |i: usize| -> Option<u64> {
        caps.get(i)
            .map(|m| m.as_str().parse().ok())
            .unwrap_or(Some(0))
    };
    Some(Version {
        major: num(1)?,
        minor: num(2)?,
        patch: num(3)?,
    })
}

/// Parse the major from a pin such as `18`, `18.x` or `v18`.
pub fn parse_major(pin: &str) -> Option<u64> {
    let pin = pin.trim().trim_start_matches('v');
    let major = pin.split('.').next()?;
    major.parse().ok()
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Toolchain {
    pub runtime: Runtime,
    pub version: Version,
    pub bin_dir: PathBuf,
}

/// Default toolchain roots: `$NVM_DIR` or `~/.nvm`, when present.
pub fn default_toolchain_dirs() -> Vec<PathBuf> {
    let nvm = std::env::var_os("NVM_DIR")
        .map(PathBuf::from)
        .or_else(|| home::home_dir().map(|h| h.join(".nvm")));
    nvm.into_iter().filter(|p| p.is_dir()).collect()
}

/// Scan `roots` for installed toolchains of `runtime`. Version numbers come
/// from directory names; the binary must exist under `bin/`.
pub fn discover(runtime: Runtime, roots: &[PathBuf]) -> Vec<Toolchain> {
    let mut found = Vec::new();
    for root in roots {
        // nvm keeps node installs under versions/node/
        let candidates = [root.join("versions").join(runtime.name()), root.clone()];
        for dir in candidates.iter().filter(|d| d.is_dir()) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some(version) = version_from_dir_name(runtime, &name) else {
                    continue;
                };
                let bin_dir = entry.path().join("bin");
                if bin_dir.join(runtime.binary()).is_file() {
                    found.push(Toolchain {
                        runtime,
                        version,
                        bin_dir,
                    });
                }
            }
        }
    }
    found.sort_by(|a, b| b.version.cmp(&a.version));
    found.dedup_by(|a, b| a.bin_dir == b.bin_dir);
    found
}

fn version_from_dir_name(runtime: Runtime, name: &str) -> Option<Version> {
    let rest = name
        .strip_prefix(&format!("{}-", runtime.name()))
        .unwrap_or(name);
    if !rest.starts_with('v') && !rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    parse_version(rest)
}

/// Ask a runtime binary for its version.
pub fn query_version(binary: &Path) -> Option<Version> {
    let mut cmd = Command::new(binary);
    cmd.arg("--version");
    let out = shell::execute(cmd, Some(Duration::from_secs(30)));
    if !out.success() {
        return None;
    }
    parse_version(&out.output)
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Select `runtime` at major `pin` and expose it on the run's `PATH`.
///
/// Returns the selected toolchain, or a human-readable reason on failure.
pub fn setup(
    runtime: Runtime,
    pin: &str,
    toolchain_dirs: &[PathBuf],
    env: &mut StepEnv,
    cwd: &Path,
) -> std::result::Result<Toolchain, String> {
    let major = parse_major(pin)
        .ok_or_else(|| format!("invalid {} version '{pin}': expected a major version", runtime.name()))?;

    if let Some(tc) = discover(runtime, toolchain_dirs)
        .into_iter()
        .find(|tc| tc.version.major == major)
    {
        let binary = tc.bin_dir.join(runtime.binary());
        verify(&binary, major)?;
        tracing::info!(runtime = runtime.name(), version = %tc.version, bin = %tc.bin_dir.display(), "selected toolchain");
        env.prepend_path(&tc.bin_dir);
        return Ok(tc);
    }

    let binary = which::which_in(runtime.binary(), env.search_path(), cwd).map_err(|_| {
        format!(
            "{} {major} not found in toolchain directories or on PATH",
            runtime.name()
        )
    })?;
    let version = verify(&binary, major)?;
    let bin_dir = binary
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    tracing::info!(runtime = runtime.name(), %version, bin = %bin_dir.display(), "using runtime from PATH");
    env.prepend_path(&bin_dir);
    Ok(Toolchain {
        runtime,
        version,
        bin_dir,
    })
}

fn verify(binary: &Path, major: u64) -> std::result::Result<Version, String> {
    let version = query_version(binary)
        .ok_or_else(|| format!("could not determine version of {}", binary.display()))?;
    if version.major != major {
        return Err(format!(
            "{} reports version {version}, expected major {major}",
            binary.display()
        ));
    }
    Ok(version)
}
