//! # Module catalog.
//!
//! An in-process table from module path (`"shiva.handlers"`, `"pkgA.handlers"`,
//! `"handlers"`) to the item names that module provides. It stands in for the
//! host's dynamic loading mechanism: the default [`CatalogProbe`](super::CatalogProbe)
//! and [`CatalogResolver`](super::CatalogResolver) both consult it.
//!
//! [`DaemonBuilder`](crate::DaemonBuilder) registers every driver and dispatcher
//! kind it holds under `<root>.drivers` and `<root>.dispatchers`.

use indexmap::IndexMap;

/// Registered module paths and the items each one provides, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: IndexMap<String, Vec<String>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module (builder style).
    pub fn with_module<I, S>(mut self, path: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(path, items);
        self
    }

    /// Registers a module; new items are appended if the path is already known.
    pub fn register<I, S>(&mut self, path: impl Into<String>, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known = self.modules.entry(path.into()).or_default();
        for item in items {
            let item = item.into();
            if !known.contains(&item) {
                known.push(item);
            }
        }
    }

    /// Items provided by a module, if it is registered.
    pub fn module(&self, path: &str) -> Option<&[String]> {
        self.modules.get(path).map(Vec::as_slice)
    }

    /// True if any registered path is the package itself or lives under it.
    pub fn has_package(&self, package: &str) -> bool {
        self.modules.keys().any(|path| {
            path == package
                || path
                    .strip_prefix(package)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_lookup_respects_path_boundaries() {
        let cat = ModuleCatalog::new()
            .with_module("pkgA.handlers", ["ping"])
            .with_module("pkgAB", Vec::<String>::new());
        assert!(cat.has_package("pkgA"));
        assert!(cat.has_package("pkgAB"));
        assert!(!cat.has_package("pkg"));
        assert!(!cat.has_package("pkgB"));
    }

    #[test]
    fn register_appends_new_items() {
        let mut cat = ModuleCatalog::new().with_module("handlers", ["a"]);
        cat.register("handlers", ["b", "a"]);
        assert_eq!(cat.module("handlers"), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(cat.len(), 1);
    }
}
