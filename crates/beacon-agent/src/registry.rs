//! # Provider Registry
//!
//! Ownership table of the providers the agent currently manages.
//!
//! ## Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     reconcile(desired, assigned)                        │
//! │                                                                         │
//! │  managed ∖ desired ──► removed (caller unbinds them)                    │
//! │                                                                         │
//! │  desired ∖ managed:                                                     │
//! │    assigned = Some(list)      ──► add iff a source matches (first wins) │
//! │    assigned = None, no portal ──► add                                   │
//! │    assigned = None, portal    ──► skip (wait for the subject fetch)     │
//! │                                                                         │
//! │  Containment is by ProviderId, so a second pass with the same input    │
//! │  changes nothing.                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use beacon_core::{AppSource, DeviceFilter, Permission};

use crate::provider::{DeviceProvider, ProviderId};

/// A provider together with what the agent tracks about it.
#[derive(Clone)]
pub struct ManagedProvider {
    pub provider: Arc<dyn DeviceProvider>,

    /// The assigned source this provider was matched to.
    pub source: Option<AppSource>,

    /// Allow-list requested for this provider's connection.
    pub filter: DeviceFilter,
}

impl ManagedProvider {
    /// The filter recording should use.
    ///
    /// Expected device names from the assigned source take precedence over
    /// the requested allow-list.
    pub fn effective_filter(&self) -> DeviceFilter {
        match self.source.as_ref().and_then(AppSource::expected_device_names) {
            Some(names) if !names.is_empty() => DeviceFilter::new(names),
            _ => self.filter.clone(),
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Default)]
pub struct Reconciliation {
    pub added: Vec<ProviderId>,
    pub removed: Vec<Arc<dyn DeviceProvider>>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The set of managed providers, keyed by identity.
#[derive(Default)]
pub struct ProviderRegistry {
    managed: BTreeMap<ProviderId, ManagedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings the managed set in line with `desired`.
    pub fn reconcile(
        &mut self,
        desired: Vec<Arc<dyn DeviceProvider>>,
        assigned: Option<&[AppSource]>,
        portal_configured: bool,
    ) -> Reconciliation {
        let mut result = Reconciliation::default();

        let desired_ids: BTreeSet<ProviderId> = desired.iter().map(|p| p.id()).collect();
        let stale: Vec<ProviderId> = self
            .managed
            .keys()
            .filter(|id| !desired_ids.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(entry) = self.managed.remove(&id) {
                info!(provider = %id, "Provider no longer configured");
                result.removed.push(entry.provider);
            }
        }

        for provider in desired {
            let id = provider.id();
            if self.managed.contains_key(&id) {
                continue;
            }

            let source = match assigned {
                Some(sources) => {
                    match sources.iter().find(|source| provider.matches(source, false)) {
                        Some(source) => Some(source.clone()),
                        None => {
                            debug!(provider = %id, "No assigned source matches provider");
                            continue;
                        }
                    }
                }
                None if portal_configured => {
                    debug!(provider = %id, "Waiting for source assignment");
                    continue;
                }
                None => None,
            };

            info!(provider = %id, source = ?source.as_ref().and_then(|s| s.source_id.as_deref()), "Provider added");
            self.managed.insert(
                id.clone(),
                ManagedProvider {
                    provider,
                    source,
                    filter: DeviceFilter::any(),
                },
            );
            result.added.push(id);
        }

        result
    }

    /// Managed entries in identity order.
    pub fn providers(&self) -> impl Iterator<Item = &ManagedProvider> {
        self.managed.values()
    }

    pub fn get(&self, id: &ProviderId) -> Option<&ManagedProvider> {
        self.managed.get(id)
    }

    /// Replaces the requested allow-list of a provider.
    ///
    /// Returns `false` when the provider is not managed.
    pub fn set_filter(&mut self, id: &ProviderId, filter: DeviceFilter) -> bool {
        match self.managed.get_mut(id) {
            Some(entry) => {
                entry.filter = filter;
                true
            }
            None => false,
        }
    }

    pub fn effective_filter(&self, id: &ProviderId) -> Option<DeviceFilter> {
        self.managed.get(id).map(ManagedProvider::effective_filter)
    }

    /// Every permission some managed provider needs.
    pub fn required_permissions(&self) -> BTreeSet<Permission> {
        self.managed
            .values()
            .flat_map(|entry| entry.provider.needs_permissions())
            .collect()
    }

    pub fn all_providers(&self) -> Vec<Arc<dyn DeviceProvider>> {
        self.managed
            .values()
            .map(|entry| Arc::clone(&entry.provider))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.managed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use beacon_core::SourceType;

    fn providers() -> Vec<Arc<dyn DeviceProvider>> {
        vec![
            Arc::new(MockProvider::new("phone").with_source_type(SourceType::new("Android", "Phone", "1"))),
            Arc::new(MockProvider::new("e4").with_source_type(SourceType::new("Empatica", "E4", "1"))),
        ]
    }

    #[test]
    fn test_reconcile_converges() {
        let mut registry = ProviderRegistry::new();
        let first = registry.reconcile(providers(), None, false);
        assert_eq!(first.added.len(), 2);

        let second = registry.reconcile(providers(), None, false);
        assert!(second.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_assigned_sources_gate_additions() {
        let mut registry = ProviderRegistry::new();
        let sources = vec![
            AppSource::new(SourceType::new("empatica", "e4", "2")).with_source_id("s-1"),
            AppSource::new(SourceType::new("Empatica", "E4", "1")).with_source_id("s-2"),
        ];

        let result = registry.reconcile(providers(), Some(&sources), true);
        assert_eq!(result.added, vec![ProviderId::new("e4")]);

        let entry = registry.get(&ProviderId::new("e4")).unwrap();
        assert_eq!(entry.source.as_ref().unwrap().source_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_portal_without_assignment_adds_nothing() {
        let mut registry = ProviderRegistry::new();
        let result = registry.reconcile(providers(), None, true);
        assert!(result.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_providers_returned() {
        let mut registry = ProviderRegistry::new();
        registry.reconcile(providers(), None, false);

        let only_phone = providers().into_iter().take(1).collect();
        let result = registry.reconcile(only_phone, None, false);
        assert!(result.added.is_empty());
        assert_eq!(result.removed.len(), 1);
        assert_eq!(result.removed[0].id(), ProviderId::new("e4"));
        assert!(registry.get(&ProviderId::new("e4")).is_none());
    }

    #[test]
    fn test_source_names_override_requested_filter() {
        let mut registry = ProviderRegistry::new();
        let sources = vec![AppSource::new(SourceType::new("Empatica", "E4", "1"))
            .with_expected_source_name("A01, B02")];
        registry.reconcile(providers(), Some(&sources), false);

        let id = ProviderId::new("e4");
        assert!(registry.set_filter(&id, DeviceFilter::new(["C03"])));
        assert_eq!(
            registry.effective_filter(&id),
            Some(DeviceFilter::new(["A01", "B02"]))
        );
        assert!(!registry.set_filter(&ProviderId::new("nope"), DeviceFilter::any()));
    }

    #[test]
    fn test_required_permissions_union() {
        let mut registry = ProviderRegistry::new();
        let desired: Vec<Arc<dyn DeviceProvider>> = vec![
            Arc::new(MockProvider::new("a").with_permissions(vec![Permission::Bluetooth])),
            Arc::new(MockProvider::new("b").with_permissions(vec![
                Permission::Bluetooth,
                Permission::FineLocation,
            ])),
        ];
        registry.reconcile(desired, None, false);

        let required = registry.required_permissions();
        assert_eq!(required.len(), 2);
        assert!(required.contains(&Permission::FineLocation));
    }
}
