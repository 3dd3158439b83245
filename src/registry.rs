//! Component registry
//!
//! Name → prototype lookup shared by the dialer and stage layers.
//! Prototypes are plain-data config values; resolving clones the
//! prototype so callers can bind fields without touching the registered
//! value. Registration only happens during startup, lookups run
//! concurrently during serving.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Error, Result};

pub struct Registry<T: Clone> {
    components: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
        }
    }

    /// Register a prototype under a unique name.
    pub fn register(&self, name: impl Into<String>, prototype: T) -> Result<()> {
        let name = name.into();
        let mut components = self.components.write();
        if components.contains_key(&name) {
            return Err(Error::DuplicateComponent(name));
        }
        components.insert(name, prototype);
        Ok(())
    }

    /// Resolve a prototype by name, returning a clone of it.
    pub fn resolve(&self, name: &str) -> Result<T> {
        self.components
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownComponent(name.to_string()))
    }

    /// Names of all registered components.
    pub fn names(&self) -> Vec<String> {
        self.components.read().keys().cloned().collect()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Proto {
        tag: String,
        limit: u32,
    }

    #[test]
    fn register_and_resolve() {
        let registry = Registry::new();
        registry
            .register("a", Proto { tag: "a".into(), limit: 1 })
            .unwrap();

        let got = registry.resolve("a").unwrap();
        assert_eq!(got, Proto { tag: "a".into(), limit: 1 });
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = Registry::new();
        registry.register("a", Proto { tag: "a".into(), limit: 1 }).unwrap();
        let err = registry
            .register("a", Proto { tag: "b".into(), limit: 2 })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateComponent(_)));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let registry: Registry<Proto> = Registry::new();
        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, Error::UnknownComponent(_)));
    }

    #[test]
    fn resolve_returns_independent_clone() {
        let registry = Registry::new();
        registry
            .register("a", Proto { tag: "a".into(), limit: 1 })
            .unwrap();

        let mut clone = registry.resolve("a").unwrap();
        clone.limit = 99;

        // Mutating the clone must not touch the prototype.
        assert_eq!(registry.resolve("a").unwrap().limit, 1);
    }
}
