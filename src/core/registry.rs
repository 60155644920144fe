//! Block factory registry
//!
//! Maps a block type name to the factory that builds and destroys blocks of
//! that type. The registry owns factories only, never blocks: the manager
//! looks a factory up when adding or deleting a block.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::block::Block;

/// Constructor/destructor pair for one block type
pub trait BlockFactory {
    /// Build a new block
    ///
    /// # Returns
    /// * `Some(block)` on success
    /// * `None` if the block could not be built (nothing gets registered)
    fn create(&self) -> Option<Box<dyn Block>>;

    /// Release a block built by this factory
    fn destroy(&self, block: Box<dyn Block>) {
        drop(block);
    }
}

impl<F> BlockFactory for F
where
    F: Fn() -> Option<Box<dyn Block>>,
{
    fn create(&self) -> Option<Box<dyn Block>> {
        self()
    }
}

/// Registry of block factories keyed by type name
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, Rc<dyn BlockFactory>>,
}

impl FactoryRegistry {
    /// Create a new empty factory registry
    ///
    /// # Example
    /// ```
    /// use block_engine::core::registry::FactoryRegistry;
    ///
    /// let registry = FactoryRegistry::new();
    /// assert_eq!(registry.count(), 0);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a block type
    ///
    /// Registering a type that already exists silently replaces the previous
    /// factory: the last writer wins.
    ///
    /// # Arguments
    /// * `type_name` - The block type the factory builds
    /// * `factory` - The factory
    pub fn register(&mut self, type_name: impl Into<String>, factory: impl BlockFactory + 'static) {
        let type_name = type_name.into();
        if self
            .factories
            .insert(type_name.clone(), Rc::new(factory))
            .is_some()
        {
            debug!(bk_type = %type_name, "Replaced block factory");
        } else {
            debug!(bk_type = %type_name, "Registered block factory");
        }
    }

    /// Unregister the factory of a block type
    ///
    /// # Returns
    /// `true` if a factory was registered for this type
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.factories.remove(type_name).is_some()
    }

    /// Get the factory of a block type
    pub fn get(&self, type_name: &str) -> Option<Rc<dyn BlockFactory>> {
        self.factories.get(type_name).cloned()
    }

    /// Check if a factory is registered for the given type
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Get the number of registered factories
    pub fn count(&self) -> usize {
        self.factories.len()
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove every factory
    pub fn clear(&mut self) {
        self.factories.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct MockBlock;

    impl Block for MockBlock {}

    struct CountingFactory {
        created: Cell<usize>,
        destroyed: Rc<Cell<usize>>,
    }

    impl BlockFactory for CountingFactory {
        fn create(&self) -> Option<Box<dyn Block>> {
            self.created.set(self.created.get() + 1);
            Some(Box::new(MockBlock))
        }

        fn destroy(&self, block: Box<dyn Block>) {
            self.destroyed.set(self.destroyed.get() + 1);
            drop(block);
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = FactoryRegistry::new();
        assert_eq!(registry.count(), 0);
        assert!(registry.get("mock").is_none());
    }

    #[test]
    fn test_closure_factory() {
        let mut registry = FactoryRegistry::new();
        registry.register("mock", || Some(Box::new(MockBlock) as Box<dyn Block>));

        assert!(registry.contains("mock"));
        let factory = registry.get("mock").expect("factory registered");
        assert!(factory.create().is_some());
    }

    #[test]
    fn test_last_writer_wins() {
        let mut registry = FactoryRegistry::new();
        registry.register("mock", || Some(Box::new(MockBlock) as Box<dyn Block>));
        registry.register("mock", || None::<Box<dyn Block>>);

        assert_eq!(registry.count(), 1);
        let factory = registry.get("mock").expect("factory registered");
        assert!(factory.create().is_none());
    }

    #[test]
    fn test_unregister() {
        let mut registry = FactoryRegistry::new();
        registry.register("mock", || Some(Box::new(MockBlock) as Box<dyn Block>));

        assert!(registry.unregister("mock"));
        assert!(!registry.unregister("mock"));
        assert!(!registry.contains("mock"));
    }

    #[test]
    fn test_custom_factory_destroy() {
        let destroyed = Rc::new(Cell::new(0));
        let mut registry = FactoryRegistry::new();
        registry.register(
            "counting",
            CountingFactory {
                created: Cell::new(0),
                destroyed: Rc::clone(&destroyed),
            },
        );

        let factory = registry.get("counting").expect("factory registered");
        let block = factory.create().expect("block built");
        factory.destroy(block);
        assert_eq!(destroyed.get(), 1);
    }

    #[test]
    fn test_type_names_sorted() {
        let mut registry = FactoryRegistry::new();
        registry.register("zeta", || None::<Box<dyn Block>>);
        registry.register("alpha", || None::<Box<dyn Block>>);

        assert_eq!(registry.type_names(), vec!["alpha".to_string(), "zeta".to_string()]);

        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
