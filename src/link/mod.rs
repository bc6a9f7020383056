//! Link farm: placing an extracted package's files into an environment and taking
//! them out again.
//!
//! The cache directory keeps one extracted tree per package. Activation materializes
//! every path of the package manifest under the environment prefix and records the
//! package in `conda-meta`; deactivation removes exactly those paths, then the
//! directories the removal left empty.

mod prefix;

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::EnvError;
use crate::package::environment::{self, load_records, ownership_map};
use crate::package::{Manifest, PackageRecord};
use crate::runtime::{Runtime, entry_exists, is_path_under, relative_symlink_path};

pub use prefix::{
    FileMode, HAS_PREFIX_PATH, PREFIX_PLACEHOLDER, PrefixEntry, install_with_prefix,
    load_has_prefix, parse_has_prefix, replace_bytes,
};

/// Record of the package as it was fetched from its channel.
pub const REPODATA_RECORD_PATH: &str = "info/repodata_record.json";
/// Record written by the package build.
pub const INDEX_PATH: &str = "info/index.json";

/// How a cached file is placed into an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Hard link, falling back to a copy when linking fails (e.g. across devices).
    #[default]
    HardLink,
    /// Relative symlink into the cache.
    Symlink,
    Copy,
}

impl FromStr for LinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hardlink" | "hard" => Ok(LinkMode::HardLink),
            "symlink" | "soft" => Ok(LinkMode::Symlink),
            "copy" => Ok(LinkMode::Copy),
            other => Err(format!(
                "Unknown link mode '{}'. Expected hardlink, symlink or copy.",
                other
            )),
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkMode::HardLink => "hardlink",
            LinkMode::Symlink => "symlink",
            LinkMode::Copy => "copy",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a deactivation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeactivateReport {
    pub removed: Vec<PathBuf>,
    /// Manifest paths that could not be removed, usually because they were already gone.
    pub missing: Vec<PathBuf>,
    pub removed_dirs: Vec<PathBuf>,
}

pub struct LinkFarm<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    mode: LinkMode,
}

impl<'a, R: Runtime + ?Sized> LinkFarm<'a, R> {
    pub fn new(runtime: &'a R, mode: LinkMode) -> Self {
        Self { runtime, mode }
    }

    /// Place every manifest path of `<cache_dir>/<package_id>` under `prefix` and write
    /// its `conda-meta` record.
    ///
    /// Nothing is placed when any manifest path is already owned by another package or
    /// already present on disk.
    #[tracing::instrument(skip(self))]
    pub fn activate(&self, cache_dir: &Path, package_id: &str, prefix: &Path) -> Result<Manifest> {
        let record = self.package_record(&cache_dir.join(package_id), package_id)?;
        self.activate_with_record(cache_dir, &record, prefix)
    }

    /// Like [`activate`](Self::activate), but `record` is what lands in `conda-meta`.
    ///
    /// Used when the record was resolved elsewhere (a source environment or the
    /// package index); the cache is only read.
    #[tracing::instrument(skip(self, record))]
    pub fn activate_with_record(
        &self,
        cache_dir: &Path,
        record: &PackageRecord,
        prefix: &Path,
    ) -> Result<Manifest> {
        let package_id = record.dist_name();
        let package_dir = cache_dir.join(&package_id);
        let manifest = Manifest::load(self.runtime, &package_dir)?;
        let placeholders = load_has_prefix(self.runtime, &package_dir)?;

        self.check_ownership(&manifest, &package_id, prefix)?;

        for file in manifest.files() {
            let src = package_dir.join(file);
            let dst = prefix.join(file);

            if let Some(parent) = dst.parent() {
                self.runtime.create_dir_all(parent)?;
            }
            if entry_exists(self.runtime, &dst) {
                // only reachable when re-activating the same package
                self.runtime.remove_file(&dst)?;
            }

            if let Some(entry) = placeholders.get(file) {
                debug!("Rewriting prefix placeholder in {:?}", dst);
                install_with_prefix(self.runtime, &src, &dst, entry, prefix)?;
            } else if self.runtime.is_symlink(&src) {
                let target = self.runtime.read_link(&src)?;
                self.runtime.symlink(&target, &dst)?;
            } else {
                self.place(&src, &dst)
                    .with_context(|| format!("Failed to link {:?} into {:?}", file, prefix))?;
            }
        }

        let mut record = record.clone();
        record.files = manifest.lines();
        environment::write_record(self.runtime, prefix, &record)?;

        info!(
            "Activated {} ({} file(s)) in {:?}",
            package_id,
            manifest.files().len(),
            prefix
        );
        Ok(manifest)
    }

    /// Remove every manifest path of `<cache_dir>/<package_id>` from `prefix`.
    ///
    /// Removal failures are logged and reported, never returned. Directories touched by
    /// the removal are then removed longest path first; non-empty ones stay. The prefix
    /// itself is never removed.
    #[tracing::instrument(skip(self))]
    pub fn deactivate(
        &self,
        cache_dir: &Path,
        package_id: &str,
        prefix: &Path,
    ) -> Result<DeactivateReport> {
        let manifest = Manifest::load(self.runtime, &cache_dir.join(package_id))?;
        let mut report = DeactivateReport::default();
        let mut dirs = BTreeSet::new();

        for file in manifest.files() {
            let dst = prefix.join(file);

            let mut parent = dst.parent();
            while let Some(dir) = parent {
                if dir == prefix || !is_path_under(dir, prefix) {
                    break;
                }
                dirs.insert(dir.to_path_buf());
                parent = dir.parent();
            }

            let result = if self.runtime.is_symlink(&dst) {
                self.runtime.remove_symlink(&dst)
            } else {
                self.runtime.remove_file(&dst)
            };
            match result {
                Ok(()) => report.removed.push(dst),
                Err(e) => {
                    debug!("Could not remove file {:?}: {}", dst, e);
                    report.missing.push(dst);
                }
            }
        }

        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        dirs.sort_by(|a, b| {
            b.as_os_str()
                .len()
                .cmp(&a.as_os_str().len())
                .then_with(|| a.cmp(b))
        });

        for dir in dirs {
            match self.runtime.remove_dir(&dir) {
                Ok(()) => report.removed_dirs.push(dir),
                Err(e) => debug!("Could not remove directory {:?}: {}", dir, e),
            }
        }

        environment::remove_record(self.runtime, prefix, package_id);

        info!(
            "Deactivated {} from {:?}: {} removed, {} missing",
            package_id,
            prefix,
            report.removed.len(),
            report.missing.len()
        );
        Ok(report)
    }

    /// Record shipped with the package, falling back to the one implied by its id.
    fn package_record(&self, package_dir: &Path, package_id: &str) -> Result<PackageRecord> {
        for name in [REPODATA_RECORD_PATH, INDEX_PATH] {
            let path = package_dir.join(name);
            if !self.runtime.exists(&path) {
                continue;
            }
            let content = self.runtime.read_to_string(&path)?;
            match serde_json::from_str::<PackageRecord>(&content) {
                Ok(record) if record.dist_name() == package_id => return Ok(record),
                Ok(record) => warn!(
                    "{:?} describes {} instead of {}, ignoring it",
                    path,
                    record.dist_name(),
                    package_id
                ),
                Err(e) => warn!("Invalid package record {:?}: {}", path, e),
            }
        }
        PackageRecord::from_dist_name(package_id)
    }

    fn check_ownership(&self, manifest: &Manifest, package_id: &str, prefix: &Path) -> Result<()> {
        let records = load_records(self.runtime, prefix)?;
        let owners = ownership_map(&records)?;

        for file in manifest.files() {
            let owner = match owners.get(file) {
                Some(owner) if owner == package_id => continue,
                Some(owner) => owner.clone(),
                None if entry_exists(self.runtime, &prefix.join(file)) => {
                    "an untracked file".to_string()
                }
                None => continue,
            };
            return Err(EnvError::OwnershipConflict {
                path: file.clone(),
                owner,
                package: package_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn place(&self, src: &Path, dst: &Path) -> Result<()> {
        match self.mode {
            LinkMode::HardLink => {
                if let Err(e) = self.runtime.hard_link(src, dst) {
                    debug!("Hard link failed ({}), copying {:?} instead", e, src);
                    self.runtime.copy(src, dst)?;
                }
            }
            LinkMode::Symlink => {
                let target = relative_symlink_path(dst, src)
                    .ok_or_else(|| anyhow!("Cannot compute relative path from {:?} to {:?}", dst, src))?;
                self.runtime.symlink(&target, dst)?;
            }
            LinkMode::Copy => {
                self.runtime.copy(src, dst)?;
            }
        }
        Ok(())
    }
}
