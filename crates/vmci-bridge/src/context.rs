//! Explicit bridge context
//!
//! Holds the runtime, the configuration and the two caches the bridge
//! keeps: the primitive type table and the per-class invokedynamic site
//! tables. Everything else is created fresh per call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rustc_hash::FxBuildHasher;
use tracing::warn;
use vmci_runtime::{JavaKind, Klass, KlassId, Runtime};

use crate::config::BridgeConfig;
use crate::indy;
use crate::types::{InstanceType, PrimitiveType};
use crate::{BridgeError, BridgeResult};

pub struct BridgeContext {
    runtime: Arc<Runtime>,
    config: BridgeConfig,
    enabled: AtomicBool,
    primitives: OnceCell<Box<[PrimitiveType]>>,
    indy_sites: DashMap<KlassId, Arc<[u16]>, FxBuildHasher>,
}

impl BridgeContext {
    pub(crate) fn new(runtime: Arc<Runtime>, config: BridgeConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            runtime,
            config,
            primitives: OnceCell::new(),
            indy_sites: DashMap::with_hasher(FxBuildHasher),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn shared_runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Fails with [`BridgeError::Disabled`] while the bridge is switched off
    ///
    /// Checked by every operation that drives the runtime or hands out a new
    /// handle or constant, so a context obtained earlier stops working too.
    pub(crate) fn ensure_enabled(&self) -> BridgeResult<()> {
        if self.is_enabled() {
            return Ok(());
        }
        warn!("compiler interface used while disabled");
        Err(BridgeError::Disabled)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn klass(&self, id: KlassId) -> Arc<Klass> {
        self.runtime.klass(id)
    }

    /// Class behind an instance type handle
    pub fn instance_klass(&self, ty: &InstanceType) -> Arc<Klass> {
        self.runtime.klass(ty.klass_id())
    }

    /// Primitive type handle for `kind`
    ///
    /// The table is built once; it is only built from primitive classes that
    /// have finished initialization.
    pub(crate) fn primitive(&self, kind: JavaKind) -> PrimitiveType {
        let table = self.primitives.get_or_init(|| {
            JavaKind::PRIMITIVES
                .iter()
                .map(|&k| {
                    let klass = match self.runtime.primitive_klass(k) {
                        Some(klass) => klass,
                        None => panic!("runtime has no primitive class for {}", k),
                    };
                    assert!(
                        klass.is_initialized(),
                        "primitive class {} exposed before initialization",
                        k
                    );
                    PrimitiveType::new(k, klass.id())
                })
                .collect()
        });
        match JavaKind::PRIMITIVES.iter().position(|&k| k == kind) {
            Some(position) => table[position],
            None => panic!("{} is not a primitive kind", kind),
        }
    }

    /// Constant pool indices of `klass`'s invokedynamic sites, by site index
    pub(crate) fn indy_sites(&self, klass: &Klass) -> Arc<[u16]> {
        if let Some(table) = self.indy_sites.get(&klass.id()) {
            return table.value().clone();
        }
        self.indy_sites
            .entry(klass.id())
            .or_insert_with(|| indy::scan_sites(&self.runtime, klass))
            .value()
            .clone()
    }

    /// Constant pool index of invokedynamic site `site` in `klass`
    pub(crate) fn indy_cpi(&self, klass: &Klass, site: u32) -> BridgeResult<u16> {
        let table = self.indy_sites(klass);
        table
            .get(site as usize)
            .copied()
            .ok_or(BridgeError::IndexOutOfBounds {
                index: site,
                length: table.len(),
            })
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("runtime", &self.runtime)
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .field("indy_site_tables", &self.indy_sites.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BridgeContext {
        BridgeContext::new(Arc::new(Runtime::new().unwrap()), BridgeConfig::default())
    }

    #[test]
    fn test_primitive_table() {
        let cx = context();
        let int = cx.primitive(JavaKind::Int);
        assert_eq!(int.kind(), JavaKind::Int);
        assert_eq!(int, cx.primitive(JavaKind::Int));
        let void = cx.primitive(JavaKind::Void);
        assert_eq!(
            void.klass_id(),
            cx.runtime().primitive_klass(JavaKind::Void).unwrap().id()
        );
    }

    #[test]
    #[should_panic(expected = "is not a primitive kind")]
    fn test_object_is_not_primitive() {
        context().primitive(JavaKind::Object);
    }

    #[test]
    fn test_enablement_follows_config() {
        let cx = BridgeContext::new(Arc::new(Runtime::new().unwrap()), BridgeConfig::disabled());
        assert!(!cx.is_enabled());
        assert!(matches!(cx.ensure_enabled(), Err(BridgeError::Disabled)));
        cx.set_enabled(true);
        assert!(cx.is_enabled());
        assert!(cx.ensure_enabled().is_ok());
    }
}
