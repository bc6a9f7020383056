//! Error kinds surfaced by extraction, linking and cloning.
//!
//! Operations return `anyhow::Result`; the variants below are raised inside it so
//! callers (and tests) can tell failure kinds apart with `downcast_ref::<EnvError>()`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// The environment prefix does not exist or is not an environment.
    #[error("Environment prefix {0:?} does not exist or is not an environment")]
    PrefixNotFound(PathBuf),

    /// The source is the root environment or the active environment.
    #[error("Cannot clone {prefix:?}: {reason}")]
    InvalidCloneTarget { prefix: PathBuf, reason: String },

    /// The destination prefix is already present and `--force` was not given.
    #[error("Destination {0:?} already exists. Use --force to replace it.")]
    DestinationExists(PathBuf),

    /// The archive for a package could not be found, opened or fully written.
    #[error("Archive for {package} could not be extracted: {reason}")]
    ArchiveCorrupt { package: String, reason: String },

    /// Installed packages without a source location that the index could not resolve.
    #[error("Packages not found in the package index: {}", .0.join(", "))]
    PackagesNotFound(Vec<String>),

    /// The package index collaborator failed.
    #[error("Package index unavailable: {0}")]
    IndexUnavailable(String),

    /// A path that some package (or the user) already owns inside the environment.
    #[error("{path:?} is already owned by {owner}; refusing to link {package}")]
    OwnershipConflict {
        path: PathBuf,
        owner: String,
        package: String,
    },

    /// An action of an already-built clone plan failed.
    #[error("Action '{action}' failed after {} completed action(s): {cause:#}", .completed.len())]
    ActionFailed {
        action: String,
        completed: Vec<String>,
        cause: anyhow::Error,
    },
}

impl EnvError {
    /// The innermost `EnvError` behind an `ActionFailed`, or `self`.
    pub fn root_kind(&self) -> &EnvError {
        match self {
            EnvError::ActionFailed { cause, .. } => cause
                .downcast_ref::<EnvError>()
                .map(EnvError::root_kind)
                .unwrap_or(self),
            other => other,
        }
    }
}
