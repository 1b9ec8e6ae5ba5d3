//! # Scopes: override chains and their resolution.
//!
//! A *scope* is a named category of pluggable components (`drivers`, `dispatchers`,
//! `handlers`, ...). For each scope the daemon builds a [`CandidateChain`] of module
//! paths, from built-in to user override, and hands it to a [`ScopeResolver`].
//!
//! ```text
//! packages ─► PackageValidator ─► validated ─┐
//! scopes ────────────────────────────────────┴─► ScopeChainBuilder ─► [CandidateChain]
//!                                                                         │
//!                                             ScopeResolver::resolve ◄────┘
//!                                                     │
//!                                                     ▼
//!                                               ScopeRegistry
//! ```
//!
//! Drivers and dispatchers are looked up by kind in [`DriverSet`](crate::DriverSet)
//! and [`DispatcherSet`](crate::DispatcherSet), not through the resolved scopes.
//! The `drivers` and `dispatchers` scopes record provenance: which module of the
//! chain provides each kind. A package entry for a kind with no registered
//! implementation is listed there but cannot be prepared.

mod catalog;
mod chain;
mod packages;
mod resolver;

pub use catalog::ModuleCatalog;
pub use chain::{BUILTIN_ROOT, CLI_SCOPES, CandidateChain, DAEMON_SCOPES, ScopeChainBuilder};
pub use packages::{CatalogProbe, PackageProbe, PackageValidator};
pub use resolver::{CatalogResolver, ResolvedScope, ScopeRegistry, ScopeResolver};

use tracing::info;

use crate::error::PrepareError;
use crate::events::{Bus, Event, EventKind};

/// Builds the chains for `scopes`, resolves each one and collects the results.
///
/// Packages are validated once for the whole pass. A resolver error aborts the pass.
pub fn load_scopes<S: AsRef<str>, P: AsRef<str>>(
    builder: &ScopeChainBuilder,
    resolver: &dyn ScopeResolver,
    scopes: &[S],
    packages: &[P],
    bus: &Bus,
) -> Result<ScopeRegistry, PrepareError> {
    let mut registry = ScopeRegistry::new();
    for chain in builder.build(scopes, packages) {
        let resolved = resolver.resolve(&chain)?;
        bus.publish(
            Event::new(EventKind::ScopeResolved)
                .with_subject(chain.scope())
                .with_count(resolved.loaded_count()),
        );
        registry.insert(resolved);
    }

    for scope in registry.iter() {
        info!(scope = scope.name(), "{}: {} modules loaded", scope.name(), scope.loaded_count());
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Broken;

    impl ScopeResolver for Broken {
        fn resolve(&self, chain: &CandidateChain) -> Result<ResolvedScope, PrepareError> {
            Err(PrepareError::failed(chain.scope(), "syntax error"))
        }
    }

    fn builder(catalog: &Arc<ModuleCatalog>, bus: &Bus) -> ScopeChainBuilder {
        let probe = Arc::new(CatalogProbe::new(Arc::clone(catalog)));
        ScopeChainBuilder::new(PackageValidator::new(probe, bus.clone()))
    }

    #[tokio::test]
    async fn candidate_chain_for_handlers() {
        let catalog = Arc::new(ModuleCatalog::new().with_module("pkgA.handlers", ["ping"]));
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();

        let reg = load_scopes(
            &builder(&catalog, &bus),
            &CatalogResolver::new(Arc::clone(&catalog)),
            &["handlers"],
            &["pkgA", "pkgB"],
            &bus,
        )
        .unwrap();

        let handlers = reg.get("handlers").unwrap();
        assert_eq!(
            handlers.chain().entries(),
            &["shiva.handlers", "pkgA.handlers", "handlers"]
        );
        assert_eq!(handlers.loaded_count(), 1);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push((ev.kind, ev.subject.as_deref().map(str::to_string)));
        }
        assert_eq!(
            kinds,
            vec![
                (EventKind::PackageFound, Some("pkgA".to_string())),
                (EventKind::PackageMissing, Some("pkgB".to_string())),
                (EventKind::ScopeResolved, Some("handlers".to_string())),
            ]
        );
    }

    #[test]
    fn resolver_error_aborts_the_pass() {
        let catalog = Arc::new(ModuleCatalog::new());
        let bus = Bus::new(8);
        let err = load_scopes(&builder(&catalog, &bus), &Broken, DAEMON_SCOPES, &[] as &[&str], &bus)
            .unwrap_err();
        assert!(matches!(err, PrepareError::Failed { ref component, .. } if component == "drivers"));
    }
}
