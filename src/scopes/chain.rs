//! # Scope chain construction.
//!
//! For every scope the builder produces the ordered list of module paths to try:
//!
//! ```text
//! [ "{root}.{scope}" ]  ++  [ "{pkg}.{scope}" for pkg in validated ]  ++  [ "{scope}" ]
//!     built-in               extension packages, declared order           user override
//! ```
//!
//! Packages are validated once per [`ScopeChainBuilder::build`] call, not per scope.

use std::fmt;

use tracing::info;

use super::packages::PackageValidator;

/// Prefix of the built-in module tree.
pub const BUILTIN_ROOT: &str = "shiva";

/// Scopes loaded by the daemon entry point.
pub const DAEMON_SCOPES: &[&str] = &["drivers", "dispatchers", "handlers", "middlewares"];

/// Scopes loaded by the CLI entry point.
pub const CLI_SCOPES: &[&str] = &["drivers", "commands"];

/// Ordered candidate module paths for one scope.
///
/// Invariant: `len() == 2 + packages().len()`, built-in first, user override last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateChain {
    scope: String,
    entries: Vec<String>,
}

impl CandidateChain {
    /// Builds the chain for `scope` from already-validated packages.
    pub fn new<S: AsRef<str>>(root: &str, scope: &str, validated: &[S]) -> Self {
        let mut entries = Vec::with_capacity(validated.len() + 2);
        entries.push(format!("{root}.{scope}"));
        entries.extend(validated.iter().map(|pkg| format!("{}.{scope}", pkg.as_ref())));
        entries.push(scope.to_string());
        Self {
            scope: scope.to_string(),
            entries,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// All candidates in load-priority order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; a chain holds at least the built-in and user entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn builtin(&self) -> &str {
        &self.entries[0]
    }

    pub fn user_override(&self) -> &str {
        &self.entries[self.entries.len() - 1]
    }

    /// Package-derived entries, in declared order.
    pub fn packages(&self) -> &[String] {
        &self.entries[1..self.entries.len() - 1]
    }
}

impl fmt::Display for CandidateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entries.join(" -> "))
    }
}

/// Builds [`CandidateChain`]s for a fixed set of scopes.
#[derive(Clone)]
pub struct ScopeChainBuilder {
    root: String,
    validator: PackageValidator,
}

impl ScopeChainBuilder {
    /// Builder using [`BUILTIN_ROOT`] as the built-in prefix.
    pub fn new(validator: PackageValidator) -> Self {
        Self {
            root: BUILTIN_ROOT.to_string(),
            validator,
        }
    }

    /// Overrides the built-in prefix.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Validates `packages` once, then builds and logs one chain per scope.
    pub fn build<S: AsRef<str>, P: AsRef<str>>(&self, scopes: &[S], packages: &[P]) -> Vec<CandidateChain> {
        info!(root = %self.root, "loading built-in + package + user scopes");
        let validated = self.validator.validate(packages);

        scopes
            .iter()
            .map(|scope| {
                let chain = CandidateChain::new(&self.root, scope.as_ref(), &validated);
                info!(scope = chain.scope(), "scope loading order:");
                for (idx, path) in chain.entries().iter().enumerate() {
                    info!(scope = chain.scope(), "  {}. {}", idx + 1, path);
                }
                chain
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::scopes::{CatalogProbe, ModuleCatalog};
    use std::sync::Arc;

    fn builder(catalog: ModuleCatalog) -> ScopeChainBuilder {
        let probe = Arc::new(CatalogProbe::new(Arc::new(catalog)));
        ScopeChainBuilder::new(PackageValidator::new(probe, Bus::new(8)))
    }

    #[test]
    fn chain_without_packages() {
        let chain = CandidateChain::new::<&str>("shiva", "handlers", &[]);
        assert_eq!(chain.entries(), &["shiva.handlers", "handlers"]);
        assert!(chain.packages().is_empty());
        assert_eq!(chain.to_string(), "shiva.handlers -> handlers");
    }

    #[test]
    fn only_resolvable_packages_enter_the_chain() {
        let b = builder(ModuleCatalog::new().with_module("pkgA.handlers", ["ping"]));
        let chains = b.build(&["handlers"], &["pkgA", "pkgB"]);
        assert_eq!(
            chains[0].entries(),
            &["shiva.handlers", "pkgA.handlers", "handlers"]
        );
    }

    #[test]
    fn shape_holds_for_every_scope() {
        let b = builder(
            ModuleCatalog::new()
                .with_module("p1", Vec::<String>::new())
                .with_module("p2", Vec::<String>::new())
                .with_module("p3", Vec::<String>::new()),
        );
        let packages = ["p3", "p1", "p2"];
        for chain in b.build(DAEMON_SCOPES, &packages) {
            let scope = chain.scope().to_string();
            assert_eq!(chain.len(), 2 + packages.len());
            assert_eq!(chain.builtin(), format!("shiva.{scope}"));
            assert_eq!(chain.user_override(), scope);
            let expected: Vec<String> = packages.iter().map(|p| format!("{p}.{scope}")).collect();
            assert_eq!(chain.packages(), expected.as_slice());
        }
    }

    #[test]
    fn custom_root() {
        let b = builder(ModuleCatalog::new()).with_root("acme");
        let chains = b.build(&["commands"], &[] as &[&str]);
        assert_eq!(chains[0].builtin(), "acme.commands");
    }
}
