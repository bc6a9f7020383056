use anyhow::{Context, Result, bail};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use log::{debug, info};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::runtime::{Runtime, entry_exists, is_contained_relative};

use super::ArchiveExtractor;

/// Extractor for tarballs: `.tar.bz2` (the package format), `.tar.gz`/`.tgz` and plain `.tar`
pub struct TarExtractor;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Compression {
    Bzip2,
    Gzip,
    Uncompressed,
}

impl TarExtractor {
    fn compression(archive_path: &Path) -> Option<Compression> {
        let name = archive_path.to_string_lossy().to_lowercase();
        if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Compression::Bzip2)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Compression::Gzip)
        } else if name.ends_with(".tar") {
            Some(Compression::Uncompressed)
        } else {
            None
        }
    }
}

/// First directory between `extract_to` and `relative` that is a symlink.
///
/// An earlier entry may have planted `lib -> /elsewhere`; writing `lib/x` would
/// then land outside `extract_to`.
fn symlinked_ancestor<R: Runtime + ?Sized>(
    runtime: &R,
    extract_to: &Path,
    relative: &Path,
) -> Option<PathBuf> {
    let mut current = extract_to.to_path_buf();
    let parent = relative.parent()?;
    for component in parent.components() {
        current.push(component);
        if runtime.is_symlink(&current) {
            return Some(current);
        }
    }
    None
}

impl ArchiveExtractor for TarExtractor {
    fn can_handle(&self, archive_path: &Path) -> bool {
        Self::compression(archive_path).is_some()
    }

    fn extract<R: Runtime + ?Sized>(
        &self,
        runtime: &R,
        archive_path: &Path,
        extract_to: &Path,
    ) -> Result<()> {
        debug!("Extracting {:?} to {:?}...", archive_path, extract_to);
        let file = runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        let reader: Box<dyn Read> = match Self::compression(archive_path) {
            Some(Compression::Bzip2) => Box::new(BzDecoder::new(file)),
            Some(Compression::Gzip) => Box::new(GzDecoder::new(file)),
            Some(Compression::Uncompressed) => file,
            None => bail!("Not a tarball: {}", archive_path.display()),
        };

        let mut archive = Archive::new(reader);
        for entry in archive.entries().context("Failed to read tar entries")? {
            let mut entry = entry.context("Failed to read tar entry")?;
            let entry_path = entry.path().context("Invalid tar entry path")?.into_owned();

            if !is_contained_relative(&entry_path) {
                bail!("Entry {:?} escapes the extraction directory", entry_path);
            }

            if let Some(link) = symlinked_ancestor(runtime, extract_to, &entry_path) {
                bail!(
                    "Entry {:?} escapes the extraction directory through symlink {:?}",
                    entry_path,
                    link
                );
            }

            let full_path = extract_to.join(&entry_path);
            let entry_type = entry.header().entry_type();

            if entry_type.is_dir() {
                runtime.create_dir_all(&full_path)?;
                continue;
            }

            if let Some(parent) = full_path.parent() {
                runtime.create_dir_all(parent)?;
            }
            if entry_exists(runtime, &full_path) {
                runtime.remove_file(&full_path)?;
            }

            if entry_type.is_symlink() {
                let target = entry
                    .link_name()
                    .context("Invalid symlink target")?
                    .context("Symlink entry without a target")?
                    .into_owned();
                runtime.symlink(&target, &full_path)?;
            } else if entry_type.is_hard_link() {
                let target = entry
                    .link_name()
                    .context("Invalid hard link target")?
                    .context("Hard link entry without a target")?
                    .into_owned();
                let original = extract_to.join(&target);
                if !is_contained_relative(&target)
                    || runtime.is_symlink(&original)
                    || symlinked_ancestor(runtime, extract_to, &target).is_some()
                {
                    bail!("Hard link {:?} points outside the archive", entry_path);
                }
                runtime.hard_link(&original, &full_path)?;
            } else if entry_type.is_file() || entry_type.is_contiguous() {
                {
                    let mut dest_file = runtime.create_file(&full_path)?;
                    std::io::copy(&mut entry, &mut dest_file)
                        .with_context(|| format!("Failed to extract file {:?}", full_path))?;
                }

                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode()
                    && let Err(e) = runtime.set_permissions(&full_path, mode & 0o7777)
                {
                    debug!("Failed to set permissions on {:?}: {}", full_path, e);
                }
            } else {
                debug!("Skipping tar entry {:?} of type {:?}", entry_path, entry_type);
            }
        }

        info!("Extraction complete.");
        Ok(())
    }
}
