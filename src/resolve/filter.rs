use std::collections::BTreeSet;

use crate::package::{DependencyGraph, PackageRecord};

/// The package manager's own package.
pub const MANAGER_PACKAGE: &str = "conda";
/// Environment-management companion of [`MANAGER_PACKAGE`].
pub const COMPANION_PACKAGE: &str = "conda-env";

/// Names of the records that must not be cloned: the manager package, its companion,
/// and every record depending on either of them, directly or transitively.
pub fn exclude_self_referential(records: &[PackageRecord]) -> BTreeSet<String> {
    DependencyGraph::new(records).dependents_closure(&[MANAGER_PACKAGE, COMPANION_PACKAGE])
}
