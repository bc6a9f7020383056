//! Command entry points behind the `envfarm` binary.
//!
//! Each command resolves its paths from [`Config`], runs the library operation and
//! writes a human-readable result to `out`.

use anyhow::Result;
use log::debug;
use std::io::Write;
use std::path::PathBuf;

use crate::archive::ArchiveStore;
use crate::cleanup::SharedCleanupContext;
use crate::clone::{CloneReport, CloneState, EnvironmentCloner};
use crate::link::{DeactivateReport, LinkFarm};
use crate::runtime::{Runtime, absolute_path};

pub mod config;
pub mod paths;

pub use config::{Config, ConfigOverrides};
pub use paths::{EnvTarget, default_root, destination_prefix};

/// Rename the environment `source` to `destination` (a name under the root or a path).
#[tracing::instrument(skip(runtime, config, cleanup_ctx, out))]
#[allow(clippy::too_many_arguments)]
pub fn rename<R: Runtime + ?Sized>(
    runtime: &R,
    config: &Config,
    source: &EnvTarget,
    destination: &str,
    force: bool,
    dry_run: bool,
    cleanup_ctx: SharedCleanupContext,
    out: &mut impl Write,
) -> Result<CloneReport> {
    let source = absolute_path(runtime, &source.prefix(&config.root))?;
    let destination = absolute_path(runtime, &destination_prefix(&config.root, destination))?;
    debug!("Renaming {:?} to {:?}", source, destination);

    let context = config.clone_context();
    let index = config.index_lookup(runtime);
    let cloner = EnvironmentCloner::new(runtime, &*index, &context, config.link_mode, cleanup_ctx);
    let report = cloner.execute(&source, &destination, force, dry_run, out)?;

    if !report.excluded.is_empty() {
        let names: Vec<String> = report.excluded.iter().map(|r| r.dist_name()).collect();
        writeln!(out, "Skipped package manager packages: {}", names.join(", "))?;
    }
    if report.state != CloneState::DryPrinted {
        writeln!(out, "Renamed {} to {}", source.display(), destination.display())?;
    }
    Ok(report)
}

/// Extract `<pkgs_dir>/<package>.<ext>` into `<pkgs_dir>/<package>/`.
#[tracing::instrument(skip(runtime, config, cleanup_ctx, out))]
pub fn extract<R: Runtime + ?Sized>(
    runtime: &R,
    config: &Config,
    package: &str,
    cleanup: bool,
    cleanup_ctx: SharedCleanupContext,
    out: &mut impl Write,
) -> Result<PathBuf> {
    let store = ArchiveStore::new(runtime, cleanup_ctx);
    let dir = store.extract(&config.pkgs_dir, package, cleanup)?;
    writeln!(out, "Extracted {} to {}", package, dir.display())?;
    Ok(dir)
}

/// Link an extracted package into an environment.
#[tracing::instrument(skip(runtime, config, out))]
pub fn activate<R: Runtime + ?Sized>(
    runtime: &R,
    config: &Config,
    package: &str,
    target: &EnvTarget,
    out: &mut impl Write,
) -> Result<()> {
    let prefix = absolute_path(runtime, &target.prefix(&config.root))?;
    let manifest = LinkFarm::new(runtime, config.link_mode).activate(&config.pkgs_dir, package, &prefix)?;
    writeln!(
        out,
        "Activated {} ({} file(s)) in {}",
        package,
        manifest.files().len(),
        prefix.display()
    )?;
    Ok(())
}

/// Unlink a package from an environment.
#[tracing::instrument(skip(runtime, config, out))]
pub fn deactivate<R: Runtime + ?Sized>(
    runtime: &R,
    config: &Config,
    package: &str,
    target: &EnvTarget,
    out: &mut impl Write,
) -> Result<DeactivateReport> {
    let prefix = absolute_path(runtime, &target.prefix(&config.root))?;
    let report = LinkFarm::new(runtime, config.link_mode).deactivate(&config.pkgs_dir, package, &prefix)?;
    writeln!(
        out,
        "Deactivated {}: removed {} file(s) from {}",
        package,
        report.removed.len(),
        prefix.display()
    )?;
    if !report.missing.is_empty() {
        writeln!(out, "{} file(s) were already missing", report.missing.len())?;
    }
    Ok(report)
}
