use crate::buffer::EventBuffer;
use crate::service::Service;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Builds a collector bound to the shared buffer
pub type CollectorFactory = Arc<dyn Fn(Arc<dyn EventBuffer>) -> Arc<dyn Service> + Send + Sync>;

/// Immutable map from lowercase collector type name to factory
#[derive(Clone, Default)]
pub struct CollectorFactories {
    factories: Arc<HashMap<String, CollectorFactory>>,
}

impl CollectorFactories {
    pub fn builder() -> CollectorFactoriesBuilder {
        CollectorFactoriesBuilder::default()
    }

    /// Case-insensitive lookup
    pub fn get(&self, type_name: &str) -> Option<&CollectorFactory> {
        self.factories.get(&type_name.to_lowercase())
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for CollectorFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorFactories")
            .field("types", &self.type_names())
            .finish()
    }
}

#[derive(Default)]
pub struct CollectorFactoriesBuilder {
    factories: HashMap<String, CollectorFactory>,
}

impl CollectorFactoriesBuilder {
    /// Register a factory; a later registration for the same type replaces the earlier one
    pub fn register<F>(mut self, type_name: &str, factory: F) -> Self
    where
        F: Fn(Arc<dyn EventBuffer>) -> Arc<dyn Service> + Send + Sync + 'static,
    {
        let key = type_name.to_lowercase();
        if self.factories.insert(key, Arc::new(factory)).is_some() {
            warn!("Overwriting registration for input type {}", type_name);
        }
        self
    }

    pub fn build(self) -> CollectorFactories {
        CollectorFactories {
            factories: Arc::new(self.factories),
        }
    }
}
