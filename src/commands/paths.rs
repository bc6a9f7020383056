use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

use crate::runtime::Runtime;

/// Name that always refers to the root environment.
pub const ROOT_ENV_NAME: &str = "base";

/// Directory under the root that holds named environments.
pub const ENVS_DIR: &str = "envs";

/// Get the default root directory
#[tracing::instrument(skip(runtime))]
pub fn default_root<R: Runtime + ?Sized>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        Ok(system_root(runtime))
    } else {
        let home_dir = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok(home_dir.join(".envfarm"))
    }
}

#[cfg(target_os = "macos")]
fn system_root<R: Runtime + ?Sized>(_runtime: &R) -> PathBuf {
    PathBuf::from("/opt/envfarm")
}

#[cfg(target_os = "windows")]
fn system_root<R: Runtime + ?Sized>(_runtime: &R) -> PathBuf {
    PathBuf::from(r"C:\ProgramData\envfarm")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn system_root<R: Runtime + ?Sized>(_runtime: &R) -> PathBuf {
    PathBuf::from("/usr/local/envfarm")
}

/// An environment named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvTarget {
    Name(String),
    Prefix(PathBuf),
}

impl EnvTarget {
    /// `-n NAME` or `-p PATH`; exactly one is expected, clap enforces that.
    pub fn from_args(name: Option<String>, prefix: Option<PathBuf>) -> Result<Self> {
        match (name, prefix) {
            (Some(name), None) => Ok(EnvTarget::Name(name)),
            (None, Some(prefix)) => Ok(EnvTarget::Prefix(prefix)),
            _ => anyhow::bail!("Specify the environment with either --name or --prefix"),
        }
    }

    pub fn prefix(&self, root: &Path) -> PathBuf {
        match self {
            EnvTarget::Name(name) if name == ROOT_ENV_NAME => root.to_path_buf(),
            EnvTarget::Name(name) => root.join(ENVS_DIR).join(name),
            EnvTarget::Prefix(prefix) => prefix.clone(),
        }
    }
}

/// A bare name lands under `<root>/envs`; anything with a separator is a path.
pub fn destination_prefix(root: &Path, destination: &str) -> PathBuf {
    let path = Path::new(destination);
    let components: Vec<Component> = path.components().collect();
    if let [Component::Normal(name)] = components.as_slice() {
        root.join(ENVS_DIR).join(name)
    } else {
        path.to_path_buf()
    }
}
