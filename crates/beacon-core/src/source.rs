//! # Assigned Sources
//!
//! A source is a device slot the identity portal assigned to the current
//! subject. Providers are activated only when one of these matches them.
//!
//! ## Matching
//! ```text
//! provider type:  (producer, model, catalog_version)
//! assigned type:  (producer, model, catalog_version)
//!
//! non-strict: producer == producer && model == model   (case-insensitive)
//! strict:     ... && catalog_version == catalog_version
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The type of device a source describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceType {
    /// Device manufacturer, e.g. "Empatica".
    pub producer: String,

    /// Device model, e.g. "E4".
    pub model: String,

    /// Catalog version of the data schema the device produces.
    #[serde(default)]
    pub catalog_version: String,

    /// Whether the device registers itself with the portal on first connect.
    #[serde(default)]
    pub has_dynamic_registration: bool,
}

impl SourceType {
    /// Creates a source type without dynamic registration.
    pub fn new(
        producer: impl Into<String>,
        model: impl Into<String>,
        catalog_version: impl Into<String>,
    ) -> Self {
        SourceType {
            producer: producer.into(),
            model: model.into(),
            catalog_version: catalog_version.into(),
            has_dynamic_registration: false,
        }
    }

    /// Whether `other` describes the same kind of device.
    ///
    /// Producer and model compare case-insensitively. Strict matching also
    /// requires the catalog versions to be equal.
    pub fn matches(&self, other: &SourceType, strict: bool) -> bool {
        self.producer.eq_ignore_ascii_case(&other.producer)
            && self.model.eq_ignore_ascii_case(&other.model)
            && (!strict || self.catalog_version == other.catalog_version)
    }
}

/// A source assigned to the subject by the identity portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSource {
    /// Portal-assigned source identifier, absent until registered.
    #[serde(default)]
    pub source_id: Option<String>,

    /// Human-readable source name.
    #[serde(default)]
    pub source_name: Option<String>,

    /// Comma-separated list of device identifiers this source may connect to.
    #[serde(default)]
    pub expected_source_name: Option<String>,

    /// Kind of device.
    pub source_type: SourceType,

    /// Free-form attributes from the portal.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl AppSource {
    /// Creates an unregistered source of the given type.
    pub fn new(source_type: SourceType) -> Self {
        AppSource {
            source_id: None,
            source_name: None,
            expected_source_name: None,
            source_type,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the expected device names.
    pub fn with_expected_source_name(mut self, names: impl Into<String>) -> Self {
        self.expected_source_name = Some(names.into());
        self
    }

    /// Sets the portal source identifier.
    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Splits `expected_source_name` on commas.
    ///
    /// Returns `None` when no expected name was assigned. Empty segments are
    /// dropped so a trailing comma does not widen the filter to "any".
    pub fn expected_device_names(&self) -> Option<Vec<String>> {
        self.expected_source_name.as_ref().map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
    }
}
