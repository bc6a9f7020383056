use anyhow::{Context, Result};
use log::warn;
use std::path::{Component, Path, PathBuf};

use crate::runtime::{Runtime, is_contained_relative, walk_files};

/// Location of the manifest inside an extracted package.
pub const MANIFEST_PATH: &str = "info/files";

/// Ordered list of the relative paths a package owns inside an environment.
///
/// Stored as `info/files`: one path per line, `/` separated. Blank lines and lines
/// starting with `#` are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Manifest {
    files: Vec<PathBuf>,
}

impl Manifest {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Parse manifest text. Lines that would escape the prefix are dropped with a warning.
    pub fn parse(content: &str) -> Self {
        let files = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let path = PathBuf::from(line);
                if is_contained_relative(&path) {
                    Some(path)
                } else {
                    warn!("Ignoring manifest entry outside the prefix: {:?}", line);
                    None
                }
            })
            .collect();
        Self { files }
    }

    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, package_dir: &Path) -> Result<Self> {
        let path = package_dir.join(MANIFEST_PATH);
        let content = runtime
            .read_to_string(&path)
            .with_context(|| format!("Failed to read package manifest {:?}", path))?;
        Ok(Self::parse(&content))
    }

    /// Build a manifest from an extracted tree: every file or symlink outside `info/`.
    pub fn scan<R: Runtime + ?Sized>(runtime: &R, package_dir: &Path) -> Result<Self> {
        let files = walk_files(runtime, package_dir)?
            .into_iter()
            .filter(|path| !path.starts_with("info"))
            .collect();
        Ok(Self { files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Manifest lines, `/` separated regardless of platform.
    pub fn lines(&self) -> Vec<String> {
        self.files.iter().map(|p| manifest_line(p)).collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.lines() {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// `/` separated form of a relative path.
pub fn manifest_line(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
