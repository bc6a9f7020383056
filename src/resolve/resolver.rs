use anyhow::Result;
use log::{debug, info};

use crate::error::EnvError;
use crate::package::{MatchSpec, PackageRecord};

/// Package index consulted for records that do not know where their archive lives.
#[cfg_attr(test, mockall::automock)]
pub trait IndexLookup: Send + Sync {
    /// Candidate records matching `spec`, in index order.
    fn lookup(&self, spec: &MatchSpec) -> Result<Vec<PackageRecord>>;
}

/// Replace every record without a source location by its best index match.
///
/// Records that already have a location pass through unchanged and the index is
/// only asked about the others. Specs with no match are collected and reported
/// together as [`EnvError::PackagesNotFound`]; a failing index is
/// [`EnvError::IndexUnavailable`].
#[tracing::instrument(skip_all)]
pub fn resolve_unknown<L: IndexLookup + ?Sized>(
    records: &[PackageRecord],
    index: &L,
) -> Result<Vec<PackageRecord>> {
    let mut resolved = Vec::with_capacity(records.len());
    let mut not_found = Vec::new();

    for record in records {
        if record.has_location() {
            resolved.push(record.clone());
            continue;
        }

        let spec = record.match_spec();
        debug!("Looking up {} in the package index", spec);
        let candidates = index.lookup(&spec).map_err(|e| {
            if e.downcast_ref::<EnvError>().is_some() {
                e
            } else {
                EnvError::IndexUnavailable(format!("{:#}", e)).into()
            }
        })?;

        match best_candidate(candidates) {
            Some(best) => {
                debug!("Resolved {} to {:?}", spec, best.url);
                resolved.push(best);
            }
            None => not_found.push(spec.to_string()),
        }
    }

    if !not_found.is_empty() {
        return Err(EnvError::PackagesNotFound(not_found).into());
    }

    info!("Resolved {} package record(s)", resolved.len());
    Ok(resolved)
}

/// Highest build number wins; among equal build numbers the later index entry.
fn best_candidate(candidates: Vec<PackageRecord>) -> Option<PackageRecord> {
    candidates
        .into_iter()
        .enumerate()
        .filter(|(_, candidate)| candidate.has_location())
        .max_by(|(ia, a), (ib, b)| a.build_number.cmp(&b.build_number).then(ia.cmp(ib)))
        .map(|(_, candidate)| candidate)
}
