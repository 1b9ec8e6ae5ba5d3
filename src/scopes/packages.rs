//! # Package validation.
//!
//! [`PackageValidator::validate`] keeps the declared extension packages that a
//! [`PackageProbe`] can resolve, preserving declaration order. A package that
//! fails the probe is logged and skipped; the batch is never aborted.

use std::sync::Arc;

use tracing::{info, warn};

use crate::events::{Bus, Event, EventKind};

use super::catalog::ModuleCatalog;

/// Side-effect-free existence check for an extension package.
pub trait PackageProbe: Send + Sync + 'static {
    /// `Ok(())` if the package is resolvable, otherwise the reason it is not.
    fn probe(&self, package: &str) -> Result<(), String>;
}

/// Probe backed by a [`ModuleCatalog`].
#[derive(Debug, Clone)]
pub struct CatalogProbe {
    catalog: Arc<ModuleCatalog>,
}

impl CatalogProbe {
    pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
        Self { catalog }
    }
}

impl PackageProbe for CatalogProbe {
    fn probe(&self, package: &str) -> Result<(), String> {
        if self.catalog.has_package(package) {
            Ok(())
        } else {
            Err(format!("no module named '{package}'"))
        }
    }
}

/// Filters declared packages down to the resolvable ones.
#[derive(Clone)]
pub struct PackageValidator {
    probe: Arc<dyn PackageProbe>,
    bus: Bus,
}

impl PackageValidator {
    pub fn new(probe: Arc<dyn PackageProbe>, bus: Bus) -> Self {
        Self { probe, bus }
    }

    /// Returns the resolvable subsequence of `names`.
    ///
    /// Every name is probed independently; duplicates are probed twice and kept twice.
    pub fn validate<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut valid = Vec::with_capacity(names.len());
        for name in names.iter().map(AsRef::as_ref) {
            match self.probe.probe(name) {
                Ok(()) => {
                    info!(package = name, "scope package found");
                    self.bus
                        .publish(Event::new(EventKind::PackageFound).with_subject(name));
                    valid.push(name.to_string());
                }
                Err(reason) => {
                    warn!(package = name, %reason, "scope package not found, skipping");
                    self.bus.publish(
                        Event::new(EventKind::PackageMissing)
                            .with_subject(name)
                            .with_reason(reason),
                    );
                }
            }
        }
        valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(catalog: ModuleCatalog) -> PackageValidator {
        PackageValidator::new(Arc::new(CatalogProbe::new(Arc::new(catalog))), Bus::new(8))
    }

    #[test]
    fn keeps_only_resolvable_in_order() {
        let v = validator(
            ModuleCatalog::new()
                .with_module("pkgC.handlers", ["x"])
                .with_module("pkgA.handlers", ["y"]),
        );
        let out = v.validate(&["pkgA", "pkgB", "pkgC"]);
        assert_eq!(out, vec!["pkgA", "pkgC"]);
    }

    #[test]
    fn idempotent_and_subsequence() {
        let v = validator(ModuleCatalog::new().with_module("pkgA", ["x"]));
        let input = ["pkgA", "missing", "pkgA"];
        let once = v.validate(&input);
        assert_eq!(once, vec!["pkgA", "pkgA"]);
        assert_eq!(v.validate(&once), once);
    }

    #[test]
    fn empty_input_is_fine() {
        let v = validator(ModuleCatalog::new());
        assert!(v.validate::<&str>(&[]).is_empty());
    }

    #[tokio::test]
    async fn missing_package_publishes_reason() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let v = PackageValidator::new(
            Arc::new(CatalogProbe::new(Arc::new(ModuleCatalog::new()))),
            bus,
        );
        v.validate(&["pkgB"]);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::PackageMissing);
        assert_eq!(ev.reason.as_deref(), Some("no module named 'pkgB'"));
    }
}
