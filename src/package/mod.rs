//! Package data model
//!
//! Records of installed packages, the manifest an extracted package ships in
//! `info/files`, environment metadata stored under `conda-meta/`, and the
//! dependency graph built over a record set.

pub mod environment;
mod graph;
mod manifest;
mod record;

pub use environment::Environment;
pub use graph::DependencyGraph;
pub use manifest::{MANIFEST_PATH, Manifest, manifest_line};
pub use record::{MatchSpec, PackageRecord};
