//! Channel package index backed by a conda `repodata.json`.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

use crate::error::EnvError;
use crate::http::HttpClient;
use crate::package::{MatchSpec, PackageRecord};
use crate::runtime::Runtime;

use super::IndexLookup;

const REPODATA: &str = "repodata.json";

#[derive(Deserialize)]
struct RepoData {
    #[serde(default)]
    packages: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "packages.conda")]
    packages_conda: serde_json::Map<String, serde_json::Value>,
}

/// Every record of one channel subdirectory, in index order.
#[derive(Debug, Clone, Default)]
pub struct ChannelIndex {
    records: Vec<PackageRecord>,
}

impl ChannelIndex {
    /// Parse repodata, filling each record's `url` as `<base_url>/<filename>`.
    pub fn from_repodata(content: &str, base_url: &str) -> Result<Self> {
        let repodata: RepoData =
            serde_json::from_str(content).context("Failed to parse repodata.json")?;
        Ok(Self::from_parsed(repodata, base_url))
    }

    fn from_parsed(repodata: RepoData, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');

        let mut records = Vec::new();
        for (filename, value) in repodata.packages.into_iter().chain(repodata.packages_conda) {
            match serde_json::from_value::<PackageRecord>(value) {
                Ok(mut record) => {
                    if !record.has_location() {
                        record.url = Some(format!("{}/{}", base_url, filename));
                    }
                    records.push(record);
                }
                Err(e) => warn!("Skipping index entry {}: {}", filename, e),
            }
        }

        debug!("Loaded {} record(s) from {}", records.len(), base_url);
        Self { records }
    }

    /// Load the index from a `repodata.json` file, a directory containing one, or an
    /// `http(s)://` URL to either.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, location: &str) -> Result<Self> {
        let index = if location.starts_with("http://") || location.starts_with("https://") {
            Self::fetch(location)
        } else {
            Self::read(runtime, Path::new(location))
        }
        .map_err(|e| EnvError::IndexUnavailable(format!("{}: {:#}", location, e)))?;

        info!("Package index {} has {} record(s)", location, index.records.len());
        Ok(index)
    }

    fn fetch(location: &str) -> Result<Self> {
        let url = if location.ends_with(".json") {
            location.to_string()
        } else {
            format!("{}/{}", location.trim_end_matches('/'), REPODATA)
        };
        let base_url = url.rsplit_once('/').map(|(base, _)| base).unwrap_or(&url);

        let repodata: RepoData = HttpClient::with_defaults()?.get_json(&url)?;
        Ok(Self::from_parsed(repodata, base_url))
    }

    fn read<R: Runtime + ?Sized>(runtime: &R, location: &Path) -> Result<Self> {
        let path = if runtime.is_dir(location) {
            location.join(REPODATA)
        } else {
            location.to_path_buf()
        };
        let content = runtime.read_to_string(&path)?;
        let base_dir = path.parent().unwrap_or(location);
        Self::from_repodata(&content, &base_dir.to_string_lossy())
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }
}

impl IndexLookup for ChannelIndex {
    fn lookup(&self, spec: &MatchSpec) -> Result<Vec<PackageRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.name == spec.name)
            .filter(|r| spec.version.as_ref().is_none_or(|v| &r.version == v))
            .filter(|r| spec.build.as_ref().is_none_or(|b| &r.build == b))
            .cloned()
            .collect())
    }
}

/// [`ChannelIndex`] loaded on its first lookup, so clones whose records all carry a
/// location never touch the index.
pub struct LazyChannelIndex<'a, R: Runtime + ?Sized> {
    runtime: &'a R,
    location: String,
    index: OnceLock<ChannelIndex>,
}

impl<'a, R: Runtime + ?Sized> LazyChannelIndex<'a, R> {
    pub fn new(runtime: &'a R, location: impl Into<String>) -> Self {
        Self {
            runtime,
            location: location.into(),
            index: OnceLock::new(),
        }
    }

    fn index(&self) -> Result<&ChannelIndex> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        let loaded = ChannelIndex::load(self.runtime, &self.location)?;
        Ok(self.index.get_or_init(|| loaded))
    }
}

impl<R: Runtime + ?Sized> IndexLookup for LazyChannelIndex<'_, R> {
    fn lookup(&self, spec: &MatchSpec) -> Result<Vec<PackageRecord>> {
        self.index()?.lookup(spec)
    }
}

/// Stand-in used when no index location is configured.
pub struct UnconfiguredIndex;

impl IndexLookup for UnconfiguredIndex {
    fn lookup(&self, spec: &MatchSpec) -> Result<Vec<PackageRecord>> {
        Err(EnvError::IndexUnavailable(format!(
            "no package index configured to look up '{}' (use --index or ENVFARM_INDEX)",
            spec
        ))
        .into())
    }
}
