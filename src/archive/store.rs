use anyhow::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::error::EnvError;
use crate::package::{MANIFEST_PATH, Manifest};
use crate::runtime::{Runtime, entry_exists};

use super::{ArchiveExtractor, ArchiveExtractorImpl};

/// Archive suffixes looked up in the package cache, in order of preference.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[".tar.bz2", ".tar.gz", ".tgz", ".zip"];

/// Extracts cached package archives into `<cache_dir>/<package_id>/`.
pub struct ArchiveStore<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    extractor: ArchiveExtractorImpl,
    cleanup_ctx: SharedCleanupContext,
}

impl<'a, R: Runtime + ?Sized> ArchiveStore<'a, R> {
    pub fn new(runtime: &'a R, cleanup_ctx: SharedCleanupContext) -> Self {
        Self {
            runtime,
            extractor: ArchiveExtractorImpl::new(),
            cleanup_ctx,
        }
    }

    /// First `<cache_dir>/<package_id><ext>` present on disk.
    pub fn find_archive(&self, cache_dir: &Path, package_id: &str) -> Option<PathBuf> {
        ARCHIVE_EXTENSIONS
            .iter()
            .map(|ext| cache_dir.join(format!("{}{}", package_id, ext)))
            .find(|path| self.runtime.exists(path))
    }

    /// Make sure `<cache_dir>/<package_id>/` exists, extracting the archive if needed.
    ///
    /// Extraction goes to a hidden staging directory that is renamed into place once
    /// complete, so the target is either absent or whole. An existing target is left
    /// untouched. With `cleanup` the archive is deleted afterwards.
    ///
    /// Every failure is reported as [`EnvError::ArchiveCorrupt`].
    #[tracing::instrument(skip(self))]
    pub fn extract(&self, cache_dir: &Path, package_id: &str, cleanup: bool) -> Result<PathBuf> {
        let target = cache_dir.join(package_id);
        let archive = self.find_archive(cache_dir, package_id);

        if self.runtime.is_dir(&target) {
            debug!("{} is already extracted at {:?}", package_id, target);
        } else {
            let archive = archive.as_deref().ok_or_else(|| EnvError::ArchiveCorrupt {
                package: package_id.to_string(),
                reason: format!("no archive found in {}", cache_dir.display()),
            })?;

            info!("Extracting {} from {:?}", package_id, archive);
            self.extract_into_place(archive, cache_dir, package_id, &target)
                .map_err(|e| EnvError::ArchiveCorrupt {
                    package: package_id.to_string(),
                    reason: format!("{:#}", e),
                })?;
        }

        if cleanup && let Some(archive) = archive {
            debug!("Removing archive {:?}", archive);
            if let Err(e) = self.runtime.remove_file(&archive) {
                warn!("Failed to remove archive {:?}: {}", archive, e);
            }
        }

        Ok(target)
    }

    fn extract_into_place(
        &self,
        archive: &Path,
        cache_dir: &Path,
        package_id: &str,
        target: &Path,
    ) -> Result<()> {
        let staging = cache_dir.join(format!(".{}.{}.staging", package_id, std::process::id()));
        if entry_exists(self.runtime, &staging) {
            self.runtime.remove_dir_all(&staging)?;
        }
        self.runtime.create_dir_all(&staging)?;
        let guard = CleanupGuard::new(self.cleanup_ctx.clone(), staging.clone());

        self.extractor.extract(self.runtime, archive, &staging)?;

        let manifest_path = staging.join(MANIFEST_PATH);
        if !self.runtime.exists(&manifest_path) {
            debug!("{} ships no manifest, generating one", package_id);
            let manifest = Manifest::scan(self.runtime, &staging)?;
            if let Some(info_dir) = manifest_path.parent() {
                self.runtime.create_dir_all(info_dir)?;
            }
            self.runtime
                .write(&manifest_path, manifest.render().as_bytes())?;
        }

        match self.runtime.rename(&staging, target) {
            Ok(()) => {
                guard.success();
                Ok(())
            }
            Err(e) if self.runtime.is_dir(target) => {
                debug!(
                    "{} was extracted concurrently ({}), discarding staging copy",
                    package_id, e
                );
                drop(guard);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
