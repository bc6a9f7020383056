use anyhow::Result;
use log::{debug, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::archive::ArchiveStore;
use crate::cleanup::SharedCleanupContext;
use crate::error::EnvError;
use crate::link::{LinkFarm, LinkMode};
use crate::package::PackageRecord;
use crate::package::environment::CONDA_META;
use crate::resolve::IndexLookup;
use crate::runtime::{Runtime, absolute_path, entry_exists};

use super::{CloneAction, CloneContext, ClonePlan, ClonePlanner, copy_with_rewrite};

/// Printed before every action of a dry run.
pub const DRY_RUN_PREFIX: &str = "Dry run action:";

/// Appended to a destination moved aside by `--force`.
pub const BACKUP_SUFFIX: &str = ".envfarm-backup";

/// How far a clone got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneState {
    Validated,
    Planned,
    DryPrinted,
    Applied,
    SourceRemoved,
}

#[derive(Debug)]
pub struct CloneReport {
    pub state: CloneState,
    /// Action descriptions, in execution order.
    pub actions: Vec<String>,
    pub excluded: Vec<PackageRecord>,
}

/// Runs clone plans against the filesystem.
pub struct EnvironmentCloner<'a, R: Runtime + ?Sized, L: IndexLookup + ?Sized> {
    runtime: &'a R,
    planner: ClonePlanner<'a, R, L>,
    store: ArchiveStore<'a, R>,
    farm: LinkFarm<'a, R>,
}

impl<'a, R: Runtime + ?Sized, L: IndexLookup + ?Sized> EnvironmentCloner<'a, R, L> {
    pub fn new(
        runtime: &'a R,
        index: &'a L,
        context: &'a CloneContext,
        link_mode: LinkMode,
        cleanup_ctx: SharedCleanupContext,
    ) -> Self {
        Self {
            runtime,
            planner: ClonePlanner::new(runtime, index, context),
            store: ArchiveStore::new(runtime, cleanup_ctx),
            farm: LinkFarm::new(runtime, link_mode),
        }
    }

    /// Clone `source` into `destination`, then remove `source`.
    ///
    /// With `dry_run` every action is written to `out` behind [`DRY_RUN_PREFIX`] and
    /// nothing on disk changes. Otherwise each action is written to `out` as it runs.
    /// An existing destination is only replaced with `force`; it is restored if the
    /// clone fails. Relative prefixes are resolved against the current directory
    /// so rewritten files and links only ever see absolute paths.
    #[tracing::instrument(skip(self, out))]
    pub fn execute(
        &self,
        source: &Path,
        destination: &Path,
        force: bool,
        dry_run: bool,
        out: &mut impl Write,
    ) -> Result<CloneReport> {
        let source = &absolute_path(self.runtime, source)?;
        let destination = &absolute_path(self.runtime, destination)?;
        let canonical_source = self.planner.validate_source(source)?;
        let destination_exists = entry_exists(self.runtime, destination);
        if destination_exists {
            if !force {
                return Err(EnvError::DestinationExists(destination.to_path_buf()).into());
            }
            if self
                .runtime
                .canonicalize(destination)
                .is_ok_and(|d| d == canonical_source)
            {
                return Err(EnvError::InvalidCloneTarget {
                    prefix: source.to_path_buf(),
                    reason: "source and destination are the same environment".to_string(),
                }
                .into());
            }
        }
        debug!("Clone of {:?} validated", source);

        let mut plan = self.planner.plan(source, destination)?;
        if destination_exists {
            plan.actions.insert(
                0,
                CloneAction::ReplaceDestination {
                    destination: destination.to_path_buf(),
                    backup: backup_path(destination),
                },
            );
        }
        let actions: Vec<String> = plan.actions.iter().map(|a| a.to_string()).collect();
        debug!("Clone of {:?} planned with {} action(s)", source, actions.len());

        if dry_run {
            for action in &actions {
                writeln!(out, "{} {}", DRY_RUN_PREFIX, action)?;
            }
            return Ok(CloneReport {
                state: CloneState::DryPrinted,
                actions,
                excluded: plan.excluded,
            });
        }

        let mut backup = None;
        let state = match self.apply(&plan, out, &mut backup) {
            Ok(state) => state,
            Err(e) => {
                if let Some(backup) = &backup {
                    self.restore_backup(destination, backup);
                }
                return Err(e);
            }
        };

        if let Some(backup) = &backup
            && let Err(e) = self.runtime.remove_dir_all(backup)
        {
            warn!("Failed to remove backup {:?}: {}", backup, e);
        }

        info!("Renamed {:?} to {:?}", source, destination);
        Ok(CloneReport {
            state,
            actions,
            excluded: plan.excluded,
        })
    }

    /// Run every action in order. A failure is reported with the actions completed
    /// before it.
    fn apply(
        &self,
        plan: &ClonePlan,
        out: &mut impl Write,
        backup: &mut Option<PathBuf>,
    ) -> Result<CloneState> {
        let mut completed: Vec<String> = Vec::new();
        let mut state = CloneState::Applied;
        let mut destination_ready = false;

        for action in &plan.actions {
            let description = action.to_string();
            writeln!(out, "{}", description)?;

            let result = self
                .prepare_destination(action, plan, &mut destination_ready)
                .and_then(|()| self.run_action(action, plan, backup));

            if let Err(cause) = result {
                return Err(EnvError::ActionFailed {
                    action: description,
                    completed,
                    cause,
                }
                .into());
            }

            if matches!(action, CloneAction::RemoveSource { .. }) {
                state = CloneState::SourceRemoved;
            }
            completed.push(description);
        }

        Ok(state)
    }

    /// Create the destination's `conda-meta` before the first action that writes to it.
    fn prepare_destination(&self, action: &CloneAction, plan: &ClonePlan, ready: &mut bool) -> Result<()> {
        if *ready || matches!(action, CloneAction::ReplaceDestination { .. }) {
            return Ok(());
        }
        self.runtime
            .create_dir_all(&plan.destination.join(CONDA_META))?;
        *ready = true;
        Ok(())
    }

    fn run_action(
        &self,
        action: &CloneAction,
        plan: &ClonePlan,
        backup: &mut Option<PathBuf>,
    ) -> Result<()> {
        match action {
            CloneAction::ReplaceDestination {
                destination,
                backup: backup_dir,
            } => {
                if entry_exists(self.runtime, backup_dir) {
                    self.runtime.remove_dir_all(backup_dir)?;
                }
                self.runtime.rename(destination, backup_dir)?;
                *backup = Some(backup_dir.clone());
            }
            CloneAction::Extract { record, cache_dir } => {
                self.store.extract(cache_dir, &record.dist_name(), false)?;
            }
            CloneAction::Link {
                record,
                cache_dir,
                prefix,
            } => {
                self.farm.activate_with_record(cache_dir, record, prefix)?;
            }
            CloneAction::CopyFile {
                source,
                destination,
            } => {
                copy_with_rewrite(
                    self.runtime,
                    source,
                    destination,
                    &plan.source,
                    &plan.destination,
                )?;
            }
            CloneAction::RemoveSource { prefix } => {
                self.runtime.remove_dir_all(prefix)?;
            }
        }
        Ok(())
    }

    fn restore_backup(&self, destination: &Path, backup: &Path) {
        warn!("Clone failed, restoring {:?} from {:?}", destination, backup);
        if entry_exists(self.runtime, destination)
            && let Err(e) = self.runtime.remove_dir_all(destination)
        {
            warn!("Failed to remove partial clone {:?}: {}", destination, e);
            return;
        }
        if let Err(e) = self.runtime.rename(backup, destination) {
            warn!("Failed to restore {:?} from {:?}: {}", destination, backup, e);
        }
    }
}

fn backup_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}
