//! Deciding which installed records a clone replays, and where their archives come from.

mod filter;
mod index;
mod resolver;

pub use filter::{COMPANION_PACKAGE, MANAGER_PACKAGE, exclude_self_referential};
pub use index::{ChannelIndex, LazyChannelIndex, UnconfiguredIndex};
pub use resolver::{IndexLookup, resolve_unknown};

#[cfg(test)]
pub use resolver::MockIndexLookup;
