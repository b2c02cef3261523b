// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem capability registry
//!
//! Built once at startup by probing the host for the tools each driver
//! needs. The result is immutable and shared behind an `Arc`; nothing in the
//! engine looks for tools at call time.

use std::collections::BTreeMap;
use std::sync::Arc;

use partitions_contracts::{EngineError, FileSystemDriver, Result};
use partitions_types::{FsAction, FsCapabilities, FsKind};

use crate::filesystems::builtin_drivers;

/// Answers whether an external tool can be run.
pub trait ToolLocator: Send + Sync {
    fn has(&self, tool: &str) -> bool;
}

/// Looks tools up on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTools;

impl ToolLocator for SystemTools {
    fn has(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }
}

impl<F> ToolLocator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn has(&self, tool: &str) -> bool {
        self(tool)
    }
}

/// Lookup table from filesystem kind to its driver.
#[derive(Clone, Default)]
pub struct Registry {
    drivers: BTreeMap<FsKind, Arc<dyn FileSystemDriver>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Probe the built-in drivers against the tools on `PATH`.
    pub fn probe() -> Self {
        Self::probe_with(&SystemTools)
    }

    pub fn probe_with(tools: &dyn ToolLocator) -> Self {
        let registry = builtin_drivers(tools)
            .into_iter()
            .fold(Self::empty(), Self::with_driver);

        let supported: Vec<String> = registry
            .drivers
            .values()
            .filter(|d| d.capabilities().supports(FsAction::Create))
            .map(|d| d.kind().to_string())
            .collect();
        tracing::info!("Detected filesystem support: {:?}", supported);
        registry
    }

    /// A registry without drivers; every lookup reports a missing capability.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register `driver`, replacing any driver of the same kind.
    pub fn with_driver(mut self, driver: Arc<dyn FileSystemDriver>) -> Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    pub fn driver(&self, kind: FsKind) -> Option<Arc<dyn FileSystemDriver>> {
        self.drivers.get(&kind).cloned()
    }

    /// The driver for `kind`, provided it supports `action`.
    pub fn lookup(&self, kind: FsKind, action: FsAction) -> Result<Arc<dyn FileSystemDriver>> {
        match self.drivers.get(&kind) {
            Some(driver) if driver.capabilities().supports(action) => Ok(driver.clone()),
            _ => Err(EngineError::capability_missing(kind, action)),
        }
    }

    pub fn supports(&self, kind: FsKind, action: FsAction) -> bool {
        self.capabilities(kind).supports(action)
    }

    /// Capabilities of `kind`; nothing is supported for unregistered kinds.
    pub fn capabilities(&self, kind: FsKind) -> FsCapabilities {
        self.drivers
            .get(&kind)
            .map(|d| d.capabilities().clone())
            .unwrap_or_else(|| FsCapabilities::none(kind))
    }

    /// Capabilities of every filesystem kind, in a stable order.
    pub fn all_capabilities(&self) -> Vec<FsCapabilities> {
        FsKind::FILESYSTEMS
            .iter()
            .map(|kind| self.capabilities(*kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partitions_types::Support;

    #[test]
    fn unregistered_kind_reports_capability_missing() {
        let registry = Registry::empty();
        let err = registry.lookup(FsKind::Xfs, FsAction::Grow).err();
        assert_eq!(
            err,
            Some(EngineError::capability_missing(FsKind::Xfs, FsAction::Grow))
        );
        assert_eq!(registry.capabilities(FsKind::Xfs), FsCapabilities::none(FsKind::Xfs));
    }

    #[test]
    fn bare_host_only_offers_engine_actions() {
        let registry = Registry::probe_with(&|_: &str| false);
        assert!(!registry.supports(FsKind::Ext4, FsAction::Create));
        assert!(!registry.supports(FsKind::Fat32, FsAction::Shrink));
        assert_eq!(registry.capabilities(FsKind::LinuxSwap).move_, Support::Engine);
        assert!(registry.lookup(FsKind::Luks, FsAction::Remove).is_ok());
    }

    #[test]
    fn tools_enable_their_drivers() {
        let registry = Registry::probe_with(&|tool: &str| {
            matches!(tool, "mkfs.ext4" | "resize2fs" | "dumpe2fs")
        });
        assert!(registry.lookup(FsKind::Ext4, FsAction::Create).is_ok());
        assert!(registry.lookup(FsKind::Ext4, FsAction::Shrink).is_ok());
        assert!(registry.lookup(FsKind::Ext3, FsAction::Create).is_err());
        assert_eq!(registry.all_capabilities().len(), FsKind::FILESYSTEMS.len());
    }

    #[test]
    fn later_driver_replaces_earlier() {
        struct Stub(FsCapabilities);
        impl FileSystemDriver for Stub {
            fn kind(&self) -> FsKind {
                self.0.kind
            }
            fn capabilities(&self) -> &FsCapabilities {
                &self.0
            }
        }
        let mut caps = FsCapabilities::none(FsKind::Ntfs);
        caps.check = Support::External;
        let registry = Registry::probe_with(&|_: &str| false).with_driver(Arc::new(Stub(caps)));
        assert!(registry.supports(FsKind::Ntfs, FsAction::Check));
    }
}
