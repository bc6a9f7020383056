use anyhow::Result;
use log::debug;
use std::path::PathBuf;

use crate::clone::CloneContext;
use crate::link::LinkMode;
use crate::resolve::{IndexLookup, LazyChannelIndex, UnconfiguredIndex};
use crate::runtime::{Runtime, absolute_path};

use super::paths::default_root;

/// Environment variable naming the environment the caller is running in.
pub const ACTIVE_PREFIX_VAR: &str = "CONDA_PREFIX";

/// Values given on the command line (or through their environment variables).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub pkgs_dir: Option<PathBuf>,
    pub index: Option<String>,
    pub link_mode: Option<LinkMode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub root: PathBuf,
    pub pkgs_dir: PathBuf,
    /// Channel repodata file, directory or URL.
    pub index: Option<String>,
    pub active_prefix: Option<PathBuf>,
    pub link_mode: LinkMode,
}

impl Config {
    /// Resolve overrides against defaults. `root` and `pkgs_dir` come out absolute.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, overrides: ConfigOverrides) -> Result<Self> {
        let root = match overrides.root {
            Some(root) => absolute_path(runtime, &root)?,
            None => default_root(runtime)?,
        };
        let pkgs_dir = match overrides.pkgs_dir {
            Some(pkgs_dir) => absolute_path(runtime, &pkgs_dir)?,
            None => root.join("pkgs"),
        };
        let active_prefix = runtime
            .env_var(ACTIVE_PREFIX_VAR)
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let config = Self {
            root,
            pkgs_dir,
            index: overrides.index,
            active_prefix,
            link_mode: overrides.link_mode.unwrap_or_default(),
        };
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }

    pub fn clone_context(&self) -> CloneContext {
        CloneContext {
            root_prefix: self.root.clone(),
            active_prefix: self.active_prefix.clone(),
            pkgs_dir: self.pkgs_dir.clone(),
        }
    }

    /// The configured package index, fetched on first lookup.
    pub fn index_lookup<'a, R: Runtime + ?Sized>(
        &self,
        runtime: &'a R,
    ) -> Box<dyn IndexLookup + 'a> {
        match &self.index {
            Some(location) => Box::new(LazyChannelIndex::new(runtime, location.clone())),
            None => Box::new(UnconfiguredIndex),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnvError;
    use crate::package::MatchSpec;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn runtime_with_active(active: Option<&'static str>) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(ACTIVE_PREFIX_VAR))
            .returning(move |_| active.map(String::from).ok_or(std::env::VarError::NotPresent));
        runtime.expect_is_privileged().returning(|| false);
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));
        runtime
    }

    #[test]
    fn test_defaults() {
        let runtime = runtime_with_active(None);
        let config = Config::load(&runtime, ConfigOverrides::default()).unwrap();

        let root = PathBuf::from("/home/user").join(".envfarm");
        assert_eq!(config.pkgs_dir, root.join("pkgs"));
        assert_eq!(config.root, root);
        assert_eq!(config.active_prefix, None);
        assert_eq!(config.link_mode, LinkMode::HardLink);
        assert_eq!(config.index, None);
    }

    #[test]
    fn test_overrides_and_active_prefix() {
        let runtime = runtime_with_active(Some("/envfarm/envs/work"));
        let config = Config::load(
            &runtime,
            ConfigOverrides {
                root: Some(PathBuf::from("/envfarm")),
                pkgs_dir: Some(PathBuf::from("/cache")),
                index: Some("/channels/main".to_string()),
                link_mode: Some(LinkMode::Copy),
            },
        )
        .unwrap();

        assert_eq!(config.pkgs_dir, PathBuf::from("/cache"));
        assert_eq!(config.active_prefix, Some(PathBuf::from("/envfarm/envs/work")));
        assert_eq!(config.link_mode, LinkMode::Copy);

        let context = config.clone_context();
        assert_eq!(context.root_prefix, PathBuf::from("/envfarm"));
        assert_eq!(context.pkgs_dir, PathBuf::from("/cache"));
    }

    #[test]
    fn test_relative_root_and_pkgs_dir_are_made_absolute() {
        let mut runtime = runtime_with_active(None);
        runtime
            .expect_current_dir()
            .returning(|| Ok(PathBuf::from("/work")));
        let config = Config::load(
            &runtime,
            ConfigOverrides {
                root: Some(PathBuf::from("./farm")),
                pkgs_dir: Some(PathBuf::from("../cache")),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/work/farm"));
        assert_eq!(config.pkgs_dir, PathBuf::from("/cache"));
    }

    #[test]
    fn test_empty_active_prefix_is_ignored() {
        let runtime = runtime_with_active(Some(""));
        let config = Config::load(&runtime, ConfigOverrides::default()).unwrap();
        assert_eq!(config.active_prefix, None);
    }

    #[test]
    fn test_missing_index_is_unavailable() {
        let runtime = runtime_with_active(None);
        let config = Config::load(&runtime, ConfigOverrides::default()).unwrap();

        let err = config
            .index_lookup(&runtime)
            .lookup(&MatchSpec::name("numpy"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::IndexUnavailable(_))
        ));
    }
}
