use super::ProviderAdapter;
use crate::error::{ConnectionError, ConnectionResult};
use crate::models::ProviderSummary;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps provider ids to adapters. Built once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter under its descriptor id. A second registration for the
    /// same id is rejected and leaves the first one in place.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> ConnectionResult<()> {
        let id = adapter.descriptor().id.clone();
        if self.adapters.contains_key(&id) {
            return Err(ConnectionError::Configuration(format!(
                "Provider '{}' is already registered",
                id
            )));
        }
        tracing::debug!(provider = %id, "Registered provider adapter");
        self.adapters.insert(id, adapter);
        Ok(())
    }

    pub fn is_registered(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(provider_id)
    }

    pub fn get(&self, provider_id: &str) -> ConnectionResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ConnectionError::UnknownProvider {
                provider: provider_id.to_string(),
                supported: self.ids(),
            })
    }

    pub fn list_all(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.adapters.values().cloned().collect()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<ProviderSummary> {
        self.adapters
            .values()
            .map(|adapter| {
                let d = adapter.descriptor();
                ProviderSummary {
                    id: d.id.clone(),
                    display_name: d.display_name.clone(),
                    supports_refresh: d.supports_refresh,
                    target_platforms: d.target_platforms.clone(),
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockProviderAdapter, ProviderDescriptor, meta, tiktok};

    fn adapter(descriptor: ProviderDescriptor) -> Arc<dyn ProviderAdapter> {
        let mut mock = MockProviderAdapter::new();
        mock.expect_descriptor().return_const(descriptor);
        Arc::new(mock)
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(adapter(meta::descriptor())).unwrap();
        registry.register(adapter(tiktok::descriptor())).unwrap();

        assert!(registry.is_registered("meta"));
        assert!(!registry.is_registered("myspace"));
        assert_eq!(registry.get("tiktok").unwrap().descriptor().id, "tiktok");
        assert_eq!(registry.list_all().len(), 2);
        assert_eq!(registry.ids(), vec!["meta", "tiktok"]);
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let mut registry = ProviderRegistry::new();
        registry.register(adapter(meta::descriptor())).unwrap();

        let err = registry.register(adapter(meta::descriptor())).unwrap_err();
        assert!(matches!(err, ConnectionError::Configuration(_)));
        assert_eq!(registry.list_all().len(), 1);
    }

    #[test]
    fn unknown_provider_lists_supported_ids() {
        let mut registry = ProviderRegistry::new();
        registry.register(adapter(meta::descriptor())).unwrap();

        match registry.get("not-a-real-provider") {
            Err(ConnectionError::UnknownProvider { provider, supported }) => {
                assert_eq!(provider, "not-a-real-provider");
                assert_eq!(supported, vec!["meta"]);
            }
            other => panic!("expected UnknownProvider, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn summaries_expose_capabilities() {
        let mut registry = ProviderRegistry::new();
        registry.register(adapter(meta::descriptor())).unwrap();

        let summaries = registry.summaries();
        assert_eq!(summaries[0].display_name, "Meta");
        assert!(!summaries[0].supports_refresh);
        assert_eq!(summaries[0].target_platforms, vec!["facebook", "instagram"]);
    }
}
