//! Channel Gating
//!
//! A client must name one of a fixed, pre-configured set of channels
//! before it receives any stream events. The set is built once at startup
//! and never changes.

use std::collections::BTreeSet;
use std::fmt;

/// A channel name.
pub type ChannelName = String;

/// Immutable set of joinable channels.
///
/// Uses `BTreeSet` so the "available channels" listing is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSet {
    channels: BTreeSet<ChannelName>,
}

impl ChannelSet {
    /// Build a set from names, ignoring blanks and surrounding whitespace.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            channels: names
                .into_iter()
                .map(|name| name.as_ref().trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list such as `"sample, live"`.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Resolve a requested channel to its canonical name.
    ///
    /// Surrounding whitespace in the request is ignored.
    #[must_use]
    pub fn resolve(&self, requested: &str) -> Option<&str> {
        self.channels.get(requested.trim()).map(String::as_str)
    }

    /// Whether `name` is joinable.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Iterate channel names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in &self.channels {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
