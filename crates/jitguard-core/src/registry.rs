//! Provider registry.
//!
//! Descriptors live in a registration-ordered arena with a name index.
//! The registry is populated before any acquisition starts and is read-only
//! afterwards, so lookups need no locking.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::provider::{CompilerFactory, ProviderDescriptor, ProviderLocator};

/// Registry of compiler providers keyed by name.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
    by_name: FxHashMap<String, usize>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every factory supplied by the given locators.
    ///
    /// Fails on the first duplicate name.
    pub fn from_locators(locators: &[&dyn ProviderLocator]) -> Result<Self> {
        let mut registry = Self::new();
        for locator in locators {
            for factory in locator.providers() {
                registry.register_factory(factory)?;
            }
        }
        Ok(registry)
    }

    /// Register a descriptor.
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> Result<()> {
        if self.by_name.contains_key(descriptor.name()) {
            return Err(Error::DuplicateProvider(descriptor.name().to_string()));
        }

        tracing::debug!("registered compiler provider {}", descriptor.name());
        self.by_name
            .insert(descriptor.name().to_string(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Register a factory under its own compiler name.
    pub fn register_factory(&mut self, factory: Arc<dyn CompilerFactory>) -> Result<()> {
        self.register(ProviderDescriptor::new(factory))
    }

    /// Look up a provider by name.
    pub fn lookup(&self, name: &str) -> Result<&ProviderDescriptor> {
        self.by_name
            .get(name)
            .map(|&idx| &self.descriptors[idx])
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    /// Check if a provider is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Provider names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(ProviderDescriptor::name)
    }

    /// All descriptors in registration order.
    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
