//! Frozen-lockfile dependency install.
//!
//! Before the package manager is invoked, the manifest is compared with the
//! committed lockfile. Any declared dependency without a matching lock entry
//! fails the step: the install must never resolve new versions.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use serde_yaml::Value as Yaml;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const MANIFEST_FILE: &str = "package.json";

const DEP_SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "optionalDependencies"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    Yarn,
    Npm,
    Pnpm,
}

impl PackageManager {
    pub fn all() -> &'static [PackageManager] {
        &[PackageManager::Yarn, PackageManager::Npm, PackageManager::Pnpm]
    }

    pub fn name(self) -> &'static str {
        match self {
            PackageManager::Yarn => "yarn",
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
        }
    }

    pub fn lockfile(self) -> &'static str {
        match self {
            PackageManager::Yarn => "yarn.lock",
            PackageManager::Npm => "package-lock.json",
            PackageManager::Pnpm => "pnpm-lock.yaml",
        }
    }

    /// Install command that refuses to modify the lockfile.
    pub fn frozen_command(self) -> &'static str {
        match self {
            PackageManager::Yarn => "yarn install --frozen-lockfile",
            PackageManager::Npm => "npm ci",
            PackageManager::Pnpm => "pnpm install --frozen-lockfile",
        }
    }

    /// Pick the manager whose lockfile is present in `dir`.
    pub fn detect(dir: &Path) -> Option<PackageManager> {
        Self::all()
            .iter()
            .copied()
            .find(|pm| dir.join(pm.lockfile()).is_file())
    }
}

/// Resolve the install command for `dir`, or explain why the install cannot
/// proceed without drifting from the lockfile.
pub fn prepare(
    manager: Option<PackageManager>,
    command: Option<&str>,
    dir: &Path,
) -> Result<String, String> {
    let manager = match manager {
        Some(m) => m,
        None => PackageManager::detect(dir).ok_or_else(|| {
            format!(
                "no lockfile found in {} (expected one of: {})",
                dir.display(),
                PackageManager::all()
                    .iter()
                    .map(|m| m.lockfile())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?,
    };

    if !dir.join(manager.lockfile()).is_file() {
        return Err(format!(
            "{} not found in {}: refusing to resolve dependencies without a lockfile",
            manager.lockfile(),
            dir.display()
        ));
    }

    let problems = lockfile_drift(manager, dir)?;
    if !problems.is_empty() {
        return Err(format!(
            "{} is out of date with {MANIFEST_FILE}:\n  {}",
            manager.lockfile(),
            problems.join("\n  ")
        ));
    }

    Ok(command
        .map(str::to_string)
        .unwrap_or_else(|| manager.frozen_command().to_string()))
}

/// Dependencies declared in the manifest that the lockfile does not satisfy.
pub fn lockfile_drift(manager: PackageManager, dir: &Path) -> Result<Vec<String>, String> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest = std::fs::read_to_string(&manifest_path)
        .map_err(|e| format!("cannot read {}: {e}", manifest_path.display()))?;
    let declared = declared_dependencies(&manifest)?;

    let lock_path = dir.join(manager.lockfile());
    let lock = std::fs::read_to_string(&lock_path)
        .map_err(|e| format!("cannot read {}: {e}", lock_path.display()))?;

    match manager {
        PackageManager::Yarn => Ok(yarn_drift(&declared, &lock)),
        PackageManager::Npm => {
            let json: Json = serde_json::from_str(&lock)
                .map_err(|e| format!("invalid {}: {e}", manager.lockfile()))?;
            Ok(npm_drift(&declared, &json))
        }
        PackageManager::Pnpm => {
            let yaml: Yaml = serde_yaml::from_str(&lock)
                .map_err(|e| format!("invalid {}: {e}", manager.lockfile()))?;
            Ok(pnpm_drift(&declared, &yaml))
        }
    }
}

fn declared_dependencies(manifest: &str) -> Result<BTreeMap<String, String>, String> {
    let json: Json =
        serde_json::from_str(manifest).map_err(|e| format!("invalid {MANIFEST_FILE}: {e}"))?;
    let mut deps = BTreeMap::new();
    for section in DEP_SECTIONS {
        if let Some(map) = json.get(section).and_then(Json::as_object) {
            for (name, range) in map {
                let range = range.as_str().unwrap_or_default().to_string();
                deps.insert(name.clone(), range);
            }
        }
    }
    Ok(deps)
}

// ---------------------------------------------------------------------------
// yarn.lock
// ---------------------------------------------------------------------------

/// Entry headers are unindented lines ending in `:` holding comma-separated
/// descriptors, e.g. `"@babel/core@^7.0.0", "@babel/core@^7.12.3":`.
fn yarn_descriptors(lock: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for line in lock.lines() {
        if line.starts_with(char::is_whitespace) || line.starts_with('#') {
            continue;
        }
        let Some(header) = line.trim_end().strip_suffix(':') else {
            continue;
        };
        for desc in header.split(',') {
            let desc = desc.trim().trim_matches('"');
            if desc.is_empty() || desc == "__metadata" {
                continue;
            }
            out.insert(desc.to_string());
            // berry writes `name@npm:^1.0.0`; accept the bare range too
            if let Some((name, range)) = split_descriptor(desc) {
                if let Some(bare) = range.strip_prefix("npm:") {
                    out.insert(format!("{name}@{bare}"));
                }
            }
        }
    }
    out
}

/// Split at the `@` that separates name from range, keeping scoped names.
fn split_descriptor(desc: &str) -> Option<(&str, &str)> {
    let start = usize::from(desc.starts_with('@'));
    let at = desc[start..].find('@')? + start;
    Some((&desc[..at], &desc[at + 1..]))
}

fn yarn_drift(declared: &BTreeMap<String, String>, lock: &str) -> Vec<String> {
    let locked = yarn_descriptors(lock);
    declared
        .iter()
        .map(|(name, range)| format!("{name}@{range}"))
        .filter(|desc| !locked.contains(desc))
        .map(|desc| format!("{desc} has no lock entry"))
        .collect()
}

// ---------------------------------------------------------------------------
// package-lock.json
// ---------------------------------------------------------------------------

fn npm_drift(declared: &BTreeMap<String, String>, lock: &Json) -> Vec<String> {
    // lockfileVersion 2/3 mirror the manifest's ranges under packages[""]
    if let Some(root) = lock.get("packages").and_then(|p| p.get("")) {
        let mut locked = BTreeMap::new();
        for section in DEP_SECTIONS {
            if let Some(map) = root.get(section).and_then(Json::as_object) {
                for (name, range) in map {
                    locked.insert(name.clone(), range.as_str().unwrap_or_default().to_string());
                }
            }
        }
        return compare_specifiers(declared, &locked);
    }

    // lockfileVersion 1 only records resolved packages by name
    let names: BTreeSet<&str> = lock
        .get("dependencies")
        .and_then(Json::as_object)
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();
    declared
        .keys()
        .filter(|name| !names.contains(name.as_str()))
        .map(|name| format!("{name} has no lock entry"))
        .collect()
}

// ---------------------------------------------------------------------------
// pnpm-lock.yaml
// ---------------------------------------------------------------------------

fn pnpm_drift(declared: &BTreeMap<String, String>, lock: &Yaml) -> Vec<String> {
    let project = lock
        .get("importers")
        .and_then(|i| i.get("."))
        .unwrap_or(lock);

    let mut locked = BTreeMap::new();
    for section in DEP_SECTIONS {
        let Some(map) = project.get(section).and_then(Yaml::as_mapping) else {
            continue;
        };
        for (name, entry) in map {
            let Some(name) = name.as_str() else { continue };
            // v6+: { specifier, version }; v5 keeps specifiers separately
            if let Some(spec) = entry.get("specifier").and_then(Yaml::as_str) {
                locked.insert(name.to_string(), spec.to_string());
            }
        }
    }
    if let Some(map) = lock.get("specifiers").and_then(Yaml::as_mapping) {
        for (name, spec) in map {
            if let (Some(name), Some(spec)) = (name.as_str(), spec.as_str()) {
                locked.insert(name.to_string(), spec.to_string());
            }
        }
    }
    compare_specifiers(declared, &locked)
}

fn compare_specifiers(
    declared: &BTreeMap<String, String>,
    locked: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut problems = Vec::new();
    for (name, range) in declared {
        match locked.get(name) {
            None => problems.push(format!("{name}@{range} has no lock entry")),
            Some(spec) if spec != range => problems.push(format!(
                "{name} is declared as '{range}' but locked as '{spec}'"
            )),
            Some(_) => {}
        }
    }
    for name in locked.keys().filter(|n| !declared.contains_key(*n)) {
        problems.push(format!("{name} is locked but no longer declared"));
    }
    problems
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
