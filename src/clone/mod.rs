//! Cloning (renaming) an environment by replaying its package set into a new prefix.
//!
//! The planner validates the source, drops the manager's own packages, resolves
//! records against the package index and orders them dependencies first. The
//! cloner then applies the plan action by action, or only prints it.

mod copy;
mod executor;
mod plan;

use std::fmt;
use std::path::PathBuf;

use crate::package::PackageRecord;

pub use copy::copy_with_rewrite;
pub use executor::{BACKUP_SUFFIX, CloneReport, CloneState, DRY_RUN_PREFIX, EnvironmentCloner};
pub use plan::ClonePlanner;

/// Prefixes the planner must refuse to clone, plus the shared package cache.
#[derive(Debug, Clone)]
pub struct CloneContext {
    pub root_prefix: PathBuf,
    /// Environment the caller is running in, if any.
    pub active_prefix: Option<PathBuf>,
    pub pkgs_dir: PathBuf,
}

/// One filesystem step of a clone.
#[derive(Debug, Clone, PartialEq)]
pub enum CloneAction {
    /// Move an existing destination aside before cloning over it.
    ReplaceDestination {
        destination: PathBuf,
        backup: PathBuf,
    },
    Extract {
        record: PackageRecord,
        cache_dir: PathBuf,
    },
    /// Link a cached package into `prefix`, recording `record` in its `conda-meta`.
    Link {
        record: PackageRecord,
        cache_dir: PathBuf,
        prefix: PathBuf,
    },
    /// Copy an untracked file, rewriting the source prefix inside text content.
    CopyFile {
        source: PathBuf,
        destination: PathBuf,
    },
    RemoveSource { prefix: PathBuf },
}

impl fmt::Display for CloneAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneAction::ReplaceDestination { destination, backup } => write!(
                f,
                "replace {} (backup at {})",
                destination.display(),
                backup.display()
            ),
            CloneAction::Extract { record, cache_dir } => {
                write!(f, "extract {} in {}", record.dist_name(), cache_dir.display())
            }
            CloneAction::Link { record, prefix, .. } => {
                write!(f, "link {} into {}", record.dist_name(), prefix.display())
            }
            CloneAction::CopyFile {
                source,
                destination,
            } => write!(f, "copy {} to {}", source.display(), destination.display()),
            CloneAction::RemoveSource { prefix } => write!(f, "remove {}", prefix.display()),
        }
    }
}

/// Ordered actions turning `source` into `destination`.
#[derive(Debug, Clone)]
pub struct ClonePlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub actions: Vec<CloneAction>,
    /// Records left out because they are, or depend on, the manager package.
    pub excluded: Vec<PackageRecord>,
    /// Records to replay, dependencies first.
    pub records: Vec<PackageRecord>,
}
