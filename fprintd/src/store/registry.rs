//! Static registry mapping a config `type=` value to a `PrintStore`
//! constructor, in place of dynamic symbol loading.

use std::collections::HashMap;
use std::sync::Arc;

use super::{FileStore, MemoryStore, PrintStore};

type StoreFactory = Arc<dyn Fn() -> Arc<dyn PrintStore> + Send + Sync>;

pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// The registry pre-populated with the two built-in stores.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("file", || Arc::new(FileStore::from_env()));
        registry.register("memory", || Arc::new(MemoryStore::new()));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn PrintStore> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Arc::new(factory));
    }

    /// Build the store named by config `type=`. A module that was never
    /// registered is simply not found, rather than rejected outright.
    pub fn build(&self, type_name: &str) -> Option<Arc<dyn PrintStore>> {
        self.factories.get(type_name).map(|f| f())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_file_and_memory_stores() {
        let registry = StoreRegistry::with_defaults();
        assert!(registry.build("file").is_some());
        assert!(registry.build("memory").is_some());
        assert!(registry.build("nonexistent-module").is_none());
    }

    #[test]
    fn a_custom_module_can_be_registered() {
        let mut registry = StoreRegistry::with_defaults();
        registry.register("custom", || Arc::new(MemoryStore::new()));
        assert!(registry.build("custom").is_some());
    }
}
