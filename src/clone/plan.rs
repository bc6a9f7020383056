use anyhow::Result;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EnvError;
use crate::package::environment::is_environment;
use crate::package::{DependencyGraph, Environment, PackageRecord};
use crate::resolve::{IndexLookup, exclude_self_referential, resolve_unknown};
use crate::runtime::{Runtime, absolute_path};

use super::{CloneAction, CloneContext, ClonePlan};

/// Builds clone plans. Planning never touches the filesystem beyond reading the source.
pub struct ClonePlanner<'a, R: Runtime + ?Sized, L: IndexLookup + ?Sized> {
    runtime: &'a R,
    index: &'a L,
    context: &'a CloneContext,
}

impl<'a, R: Runtime + ?Sized, L: IndexLookup + ?Sized> ClonePlanner<'a, R, L> {
    pub fn new(runtime: &'a R, index: &'a L, context: &'a CloneContext) -> Self {
        Self {
            runtime,
            index,
            context,
        }
    }

    /// Reject sources that are missing, the root prefix, or the active prefix.
    ///
    /// Prefixes are compared after resolving symlinks.
    pub fn validate_source(&self, source: &Path) -> Result<PathBuf> {
        if !is_environment(self.runtime, source) {
            return Err(EnvError::PrefixNotFound(source.to_path_buf()).into());
        }

        let canonical = self.runtime.canonicalize(source)?;
        let same_as = |other: &Path| {
            self.runtime
                .canonicalize(other)
                .is_ok_and(|other| other == canonical)
        };

        if same_as(&self.context.root_prefix) {
            return Err(EnvError::InvalidCloneTarget {
                prefix: source.to_path_buf(),
                reason: "the root environment cannot be renamed".to_string(),
            }
            .into());
        }
        if let Some(active) = &self.context.active_prefix
            && same_as(active)
        {
            return Err(EnvError::InvalidCloneTarget {
                prefix: source.to_path_buf(),
                reason: "the active environment cannot be renamed".to_string(),
            }
            .into());
        }

        Ok(canonical)
    }

    /// Plan the clone of `source` into `destination`.
    ///
    /// Every failure here happens before any filesystem change. Both prefixes are
    /// made absolute first.
    #[tracing::instrument(skip(self))]
    pub fn plan(&self, source: &Path, destination: &Path) -> Result<ClonePlan> {
        let source = &absolute_path(self.runtime, source)?;
        let destination = &absolute_path(self.runtime, destination)?;
        self.validate_source(source)?;
        let env = Environment::load(self.runtime, source)?;

        let excluded_names = exclude_self_referential(&env.records);
        let (excluded, kept): (Vec<PackageRecord>, Vec<PackageRecord>) = env
            .records
            .into_iter()
            .partition(|r| excluded_names.contains(&r.name));
        for record in &excluded {
            info!("Not cloning {}: it is or depends on the package manager", record);
        }

        let resolved = resolve_unknown(&kept, self.index)?;
        let records = install_order(resolved);

        let cache_dir = self.context.pkgs_dir.clone();
        let mut actions = Vec::with_capacity(records.len() * 2 + env.untracked.len() + 1);
        for record in &records {
            actions.push(CloneAction::Extract {
                record: record.clone(),
                cache_dir: cache_dir.clone(),
            });
            actions.push(CloneAction::Link {
                record: record.clone(),
                cache_dir: cache_dir.clone(),
                prefix: destination.to_path_buf(),
            });
        }
        for file in &env.untracked {
            actions.push(CloneAction::CopyFile {
                source: source.join(file),
                destination: destination.join(file),
            });
        }
        actions.push(CloneAction::RemoveSource {
            prefix: source.to_path_buf(),
        });

        debug!(
            "Planned {} action(s) for {:?} -> {:?}",
            actions.len(),
            source,
            destination
        );
        Ok(ClonePlan {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            actions,
            excluded,
            records,
        })
    }
}

/// Records sorted dependencies first.
fn install_order(records: Vec<PackageRecord>) -> Vec<PackageRecord> {
    let order = DependencyGraph::new(&records).topological_order();

    let mut by_name: BTreeMap<String, Vec<PackageRecord>> = BTreeMap::new();
    for record in records {
        by_name.entry(record.name.clone()).or_default().push(record);
    }

    order
        .iter()
        .filter_map(|name| by_name.remove(name))
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::environment::write_record;
    use crate::resolve::MockIndexLookup;
    use crate::runtime::RealRuntime;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        dir: TempDir,
        context: CloneContext,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let root = dir.path().join("root");
            fs::create_dir_all(root.join("conda-meta")).unwrap();
            let context = CloneContext {
                root_prefix: root.clone(),
                active_prefix: None,
                pkgs_dir: root.join("pkgs"),
            };
            Self { dir, context }
        }

        fn env(&self, name: &str, records: &[PackageRecord]) -> PathBuf {
            let prefix = self.context.root_prefix.join("envs").join(name);
            fs::create_dir_all(prefix.join("conda-meta")).unwrap();
            for record in records {
                write_record(&RealRuntime, &prefix, record).unwrap();
            }
            prefix
        }
    }

    fn record(name: &str, depends: &[&str]) -> PackageRecord {
        let mut record = PackageRecord::new(name, "1.0", "0");
        record.depends = depends.iter().map(|d| d.to_string()).collect();
        record.url = Some(format!("https://repo.example.com/{}-1.0-0.tar.bz2", name));
        record.files = vec![format!("share/{}.txt", name)];
        record
    }

    fn no_index() -> MockIndexLookup {
        let mut index = MockIndexLookup::new();
        index.expect_lookup().never();
        index
    }

    #[test]
    fn test_plan_orders_packages_and_excludes_manager() {
        let fixture = Fixture::new();
        let source = fixture.env(
            "work",
            &[
                record("numpy", &["python"]),
                record("python", &["zlib"]),
                record("zlib", &[]),
                record("conda", &["python"]),
                record("conda-build", &["conda"]),
            ],
        );
        fs::write(source.join("notes.txt"), "mine").unwrap();
        let dest = fixture.dir.path().join("renamed");
        let index = no_index();

        let plan = ClonePlanner::new(&RealRuntime, &index, &fixture.context)
            .plan(&source, &dest)
            .unwrap();

        let excluded: Vec<_> = plan.excluded.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(excluded, vec!["conda", "conda-build"]);

        let described: Vec<String> = plan.actions.iter().map(|a| a.to_string()).collect();
        let pkgs = fixture.context.pkgs_dir.display();
        assert_eq!(
            described,
            vec![
                format!("extract zlib-1.0-0 in {}", pkgs),
                format!("link zlib-1.0-0 into {}", dest.display()),
                format!("extract python-1.0-0 in {}", pkgs),
                format!("link python-1.0-0 into {}", dest.display()),
                format!("extract numpy-1.0-0 in {}", pkgs),
                format!("link numpy-1.0-0 into {}", dest.display()),
                format!(
                    "copy {} to {}",
                    source.join("notes.txt").display(),
                    dest.join("notes.txt").display()
                ),
                format!("remove {}", source.display()),
            ]
        );
    }

    #[test]
    fn test_plan_resolves_records_without_location() {
        let fixture = Fixture::new();
        let mut unknown = record("numpy", &[]);
        unknown.url = None;
        let source = fixture.env("work", &[unknown.clone()]);

        let mut index = MockIndexLookup::new();
        index.expect_lookup().times(1).returning(|spec| {
            let mut found = PackageRecord::new(&spec.name, "1.0", "0");
            found.url = Some("https://mirror/numpy-1.0-0.tar.bz2".to_string());
            Ok(vec![found])
        });

        let plan = ClonePlanner::new(&RealRuntime, &index, &fixture.context)
            .plan(&source, &fixture.dir.path().join("dest"))
            .unwrap();

        assert_eq!(
            plan.records[0].url.as_deref(),
            Some("https://mirror/numpy-1.0-0.tar.bz2")
        );
    }

    #[test]
    fn test_unresolvable_records_abort_planning() {
        let fixture = Fixture::new();
        let mut unknown = record("numpy", &[]);
        unknown.url = None;
        let source = fixture.env("work", &[unknown]);

        let mut index = MockIndexLookup::new();
        index.expect_lookup().returning(|_| Ok(Vec::new()));

        let err = ClonePlanner::new(&RealRuntime, &index, &fixture.context)
            .plan(&source, &fixture.dir.path().join("dest"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::PackagesNotFound(_))
        ));
    }

    #[test]
    fn test_missing_source_is_prefix_not_found() {
        let fixture = Fixture::new();
        let index = no_index();
        let err = ClonePlanner::new(&RealRuntime, &index, &fixture.context)
            .plan(&fixture.dir.path().join("ghost"), &fixture.dir.path().join("dest"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::PrefixNotFound(_))
        ));
    }

    #[test]
    fn test_root_environment_is_rejected() {
        let fixture = Fixture::new();
        let index = no_index();
        let err = ClonePlanner::new(&RealRuntime, &index, &fixture.context)
            .plan(&fixture.context.root_prefix, &fixture.dir.path().join("dest"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EnvError>(),
            Some(EnvError::InvalidCloneTarget { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_active_environment_is_rejected_through_symlink() {
        let mut fixture = Fixture::new();
        let source = fixture.env("work", &[record("zlib", &[])]);
        let alias = fixture.dir.path().join("alias");
        std::os::unix::fs::symlink(&source, &alias).unwrap();
        fixture.context.active_prefix = Some(source.clone());
        let index = no_index();

        let err = ClonePlanner::new(&RealRuntime, &index, &fixture.context)
            .plan(&alias, &fixture.dir.path().join("dest"))
            .unwrap_err();
        match err.downcast_ref::<EnvError>() {
            Some(EnvError::InvalidCloneTarget { reason, .. }) => assert!(reason.contains("active")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_install_order_keeps_same_named_records() {
        let mut second = record("lib", &[]);
        second.build = "1".to_string();
        let ordered = install_order(vec![record("app", &["lib"]), record("lib", &[]), second]);
        let ids: Vec<_> = ordered.iter().map(|r| r.dist_name()).collect();
        assert_eq!(ids, vec!["lib-1.0-0", "lib-1.0-1", "app-1.0-0"]);
    }
}
