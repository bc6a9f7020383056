//! Environment metadata: the `conda-meta` records of a prefix and the files nobody owns.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EnvError;
use crate::runtime::{Runtime, walk_files};

use super::PackageRecord;

/// Directory holding one JSON record per installed package.
pub const CONDA_META: &str = "conda-meta";

/// Top-level directories of a prefix that never count as user files.
const RESERVED_DIRS: &[&str] = &[CONDA_META, "pkgs", "envs"];

/// An environment prefix as read from disk.
#[derive(Debug, Clone)]
pub struct Environment {
    pub prefix: PathBuf,
    /// Installed records, sorted by name.
    pub records: Vec<PackageRecord>,
    /// Files present in the prefix that no installed package owns, sorted.
    pub untracked: Vec<PathBuf>,
}

impl Environment {
    /// Load records and untracked files of `prefix`.
    ///
    /// Fails with [`EnvError::PrefixNotFound`] when the prefix is missing or has no
    /// `conda-meta` directory.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, prefix: &Path) -> Result<Self> {
        if !is_environment(runtime, prefix) {
            return Err(EnvError::PrefixNotFound(prefix.to_path_buf()).into());
        }

        let records = load_records(runtime, prefix)?;
        let owners = ownership_map(&records)?;
        let untracked = untracked_files(runtime, prefix, &owners)?;

        Ok(Self {
            prefix: prefix.to_path_buf(),
            records,
            untracked,
        })
    }
}

/// Whether `prefix` looks like an environment.
pub fn is_environment<R: Runtime + ?Sized>(runtime: &R, prefix: &Path) -> bool {
    runtime.is_dir(&prefix.join(CONDA_META))
}

/// Path of the record file for `dist` inside `prefix`.
pub fn record_path(prefix: &Path, dist: &str) -> PathBuf {
    prefix.join(CONDA_META).join(format!("{}.json", dist))
}

/// Read every `conda-meta/*.json` record, sorted by package name.
pub fn load_records<R: Runtime + ?Sized>(runtime: &R, prefix: &Path) -> Result<Vec<PackageRecord>> {
    let meta_dir = prefix.join(CONDA_META);
    if !runtime.is_dir(&meta_dir) {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for path in runtime.read_dir(&meta_dir)? {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = runtime.read_to_string(&path)?;
        let record: PackageRecord = serde_json::from_str(&content)
            .with_context(|| format!("Invalid package record {:?}", path))?;
        records.push(record);
    }

    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

/// Map each owned relative path to the id of the package that owns it.
///
/// Fails with [`EnvError::OwnershipConflict`] if two records claim the same path.
pub fn ownership_map(records: &[PackageRecord]) -> Result<BTreeMap<PathBuf, String>> {
    let mut owners = BTreeMap::new();
    for record in records {
        let dist = record.dist_name();
        for file in &record.files {
            if let Some(owner) = owners.insert(PathBuf::from(file), dist.clone()) {
                return Err(EnvError::OwnershipConflict {
                    path: PathBuf::from(file),
                    owner,
                    package: dist,
                }
                .into());
            }
        }
    }
    Ok(owners)
}

/// Files under `prefix` not owned by any package.
///
/// Editor backups (`~`), `.DS_Store` and byte-compiled `.pyc` files whose `.py` source
/// is owned are not reported.
pub fn untracked_files<R: Runtime + ?Sized>(
    runtime: &R,
    prefix: &Path,
    owners: &BTreeMap<PathBuf, String>,
) -> Result<Vec<PathBuf>> {
    let mut untracked = Vec::new();

    for path in walk_files(runtime, prefix)? {
        if RESERVED_DIRS.iter().any(|dir| path.starts_with(dir)) || owners.contains_key(&path) {
            continue;
        }

        let name = path.to_string_lossy();
        if name.ends_with('~') || name.ends_with(".DS_Store") {
            continue;
        }
        if let Some(source) = name.strip_suffix(".pyc")
            && owners.contains_key(&PathBuf::from(format!("{}.py", source)))
        {
            continue;
        }

        untracked.push(path);
    }

    debug!("Found {} untracked file(s) in {:?}", untracked.len(), prefix);
    Ok(untracked)
}

/// Persist `record` as `conda-meta/<dist>.json`.
pub fn write_record<R: Runtime + ?Sized>(runtime: &R, prefix: &Path, record: &PackageRecord) -> Result<()> {
    let meta_dir = prefix.join(CONDA_META);
    if !runtime.exists(&meta_dir) {
        runtime.create_dir_all(&meta_dir)?;
    }

    let path = record_path(prefix, &record.dist_name());
    let content = serde_json::to_string_pretty(record)?;
    runtime
        .write(&path, content.as_bytes())
        .with_context(|| format!("Failed to save package record to {:?}", path))
}

/// Remove `conda-meta/<dist>.json` if present. Failures are logged, not returned.
pub fn remove_record<R: Runtime + ?Sized>(runtime: &R, prefix: &Path, dist: &str) {
    let path = record_path(prefix, dist);
    if runtime.exists(&path)
        && let Err(e) = runtime.remove_file(&path)
    {
        warn!("Failed to remove package record {:?}: {}", path, e);
    }
}
