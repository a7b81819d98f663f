//! # Device Filter
//!
//! Allow-list of device identifiers a connection will accept. An empty
//! filter accepts any device.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Allow-list of acceptable device identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    ids: BTreeSet<String>,
}

impl DeviceFilter {
    /// A filter that accepts every device.
    pub fn any() -> Self {
        DeviceFilter::default()
    }

    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DeviceFilter {
            ids: ids
                .into_iter()
                .map(Into::into)
                .map(|s: String| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Whether a device known by any of `identifiers` is acceptable.
    ///
    /// An identifier matches when it contains one of the filter entries,
    /// so a filter of `"E4"` accepts a device advertised as `"Empatica E4 - A01"`.
    pub fn accepts<'a, I>(&self, identifiers: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.ids.is_empty() {
            return true;
        }
        identifiers
            .into_iter()
            .any(|candidate| self.ids.iter().any(|id| candidate.contains(id.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_accepts_anything() {
        assert!(DeviceFilter::any().accepts(["whatever"]));
        assert!(DeviceFilter::any().accepts(std::iter::empty()));
    }

    #[test]
    fn test_substring_match() {
        let filter = DeviceFilter::new(["A01", "B02"]);
        assert!(filter.accepts(["Empatica E4 - A01"]));
        assert!(!filter.accepts(["Empatica E4 - C03"]));
        assert!(!filter.accepts(std::iter::empty()));
    }

    #[test]
    fn test_blank_entries_dropped() {
        let filter = DeviceFilter::new(["", "  "]);
        assert!(filter.is_empty());
    }
}
