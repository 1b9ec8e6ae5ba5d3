//! # Scope resolution.
//!
//! A [`ScopeResolver`] turns a [`CandidateChain`] into a [`ResolvedScope`]: the
//! sources that actually contributed and the items they provide.
//!
//! The default [`CatalogResolver`] walks the whole chain in priority order. Every
//! entry known to the [`ModuleCatalog`] counts as a loaded source; when two sources
//! provide an item with the same name the first one keeps it.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::PrepareError;

use super::catalog::ModuleCatalog;
use super::chain::CandidateChain;

/// Result of resolving one scope.
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    chain: CandidateChain,
    loaded: Vec<String>,
    items: IndexMap<String, String>,
}

impl ResolvedScope {
    /// Creates an empty resolution for `chain`.
    pub fn new(chain: CandidateChain) -> Self {
        Self {
            chain,
            loaded: Vec::new(),
            items: IndexMap::new(),
        }
    }

    /// Records `source` as loaded and registers its items; returns how many were new.
    pub fn load_source<I, S>(&mut self, source: &str, items: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loaded.push(source.to_string());
        let mut added = 0;
        for item in items {
            if let indexmap::map::Entry::Vacant(slot) = self.items.entry(item.into()) {
                slot.insert(source.to_string());
                added += 1;
            }
        }
        added
    }

    pub fn name(&self) -> &str {
        self.chain.scope()
    }

    pub fn chain(&self) -> &CandidateChain {
        &self.chain
    }

    /// Number of chain sources that contributed.
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn loaded_sources(&self) -> &[String] {
        &self.loaded
    }

    /// Item names in registration order.
    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Source that provided `item`.
    pub fn provider(&self, item: &str) -> Option<&str> {
        self.items.get(item).map(String::as_str)
    }
}

/// Resolves candidate chains into loaded scopes.
pub trait ScopeResolver: Send + Sync + 'static {
    fn resolve(&self, chain: &CandidateChain) -> Result<ResolvedScope, PrepareError>;
}

/// Resolver backed by a [`ModuleCatalog`].
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    catalog: Arc<ModuleCatalog>,
}

impl CatalogResolver {
    pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
        Self { catalog }
    }
}

impl ScopeResolver for CatalogResolver {
    fn resolve(&self, chain: &CandidateChain) -> Result<ResolvedScope, PrepareError> {
        let mut scope = ResolvedScope::new(chain.clone());
        for source in chain.entries() {
            if let Some(items) = self.catalog.module(source) {
                scope.load_source(source, items.iter().cloned());
            }
        }
        Ok(scope)
    }
}

/// Resolved scopes keyed by scope name, in load order.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    scopes: IndexMap<String, ResolvedScope>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resolved scope; a scope resolved twice keeps the later result.
    pub fn insert(&mut self, scope: ResolvedScope) {
        self.scopes.insert(scope.name().to_string(), scope);
    }

    pub fn get(&self, scope: &str) -> Option<&ResolvedScope> {
        self.scopes.get(scope)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scopes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedScope> {
        self.scopes.values()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(packages: &[&str]) -> CandidateChain {
        CandidateChain::new("shiva", "handlers", packages)
    }

    #[test]
    fn first_provider_wins_and_every_known_source_counts() {
        let catalog = ModuleCatalog::new()
            .with_module("shiva.handlers", ["ping"])
            .with_module("pkgA.handlers", ["ping", "echo"])
            .with_module("handlers", ["echo", "custom"]);
        let resolver = CatalogResolver::new(Arc::new(catalog));

        let scope = resolver.resolve(&chain(&["pkgA", "pkgB"])).unwrap();
        assert_eq!(scope.name(), "handlers");
        assert_eq!(scope.loaded_count(), 3);
        assert_eq!(
            scope.loaded_sources(),
            &["shiva.handlers", "pkgA.handlers", "handlers"]
        );
        assert_eq!(scope.items().collect::<Vec<_>>(), vec!["ping", "echo", "custom"]);
        assert_eq!(scope.provider("ping"), Some("shiva.handlers"));
        assert_eq!(scope.provider("echo"), Some("pkgA.handlers"));
        assert_eq!(scope.provider("custom"), Some("handlers"));
    }

    #[test]
    fn unknown_sources_are_not_loaded() {
        let resolver = CatalogResolver::new(Arc::new(ModuleCatalog::new()));
        let scope = resolver.resolve(&chain(&[])).unwrap();
        assert_eq!(scope.loaded_count(), 0);
        assert_eq!(scope.items().count(), 0);
    }

    #[test]
    fn registry_keeps_load_order() {
        let resolver = CatalogResolver::new(Arc::new(
            ModuleCatalog::new().with_module("shiva.drivers", [crate::connections::MEMORY_DRIVER]),
        ));
        let mut reg = ScopeRegistry::new();
        for scope in ["drivers", "dispatchers"] {
            reg.insert(
                resolver
                    .resolve(&CandidateChain::new::<&str>("shiva", scope, &[]))
                    .unwrap(),
            );
        }
        assert_eq!(reg.names().collect::<Vec<_>>(), vec!["drivers", "dispatchers"]);
        assert_eq!(reg.get("drivers").unwrap().loaded_count(), 1);
        assert!(reg.get("handlers").is_none());
    }
}
