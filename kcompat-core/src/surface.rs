//! The resolved consumer surface: every symbol bound to exactly one
//! definition, plus the callable operations downstream code uses.
//!
//! A [`Surface`] is produced once per build configuration. The flag
//! decisions it needs at call sites are captured as plain booleans at
//! bind time, so calling through the surface carries no lookup cost and
//! no way to observe the flags themselves.

use crate::error::{Result, ShimError};
use crate::flags::Capability;
use crate::polyfills::{
    self, Credentials, FaultError, FaultStatus, FileMode, FreezeLevel, InodeAttrs, SbFreeze,
};
use crate::registry::{Binding, BindingSource, SymbolCatalog};
use crate::resolver::FeatureConfig;
use indexmap::IndexMap;
use tracing::debug;

/// The fixed API surface the module build compiles against.
#[derive(Debug)]
pub struct Surface {
    config: FeatureConfig,
    bindings: IndexMap<&'static str, Binding>,
    freeze_protection: bool,
}

impl Surface {
    /// Bind every catalog symbol against a resolved configuration. Fails
    /// if a symbol's owning flag was never declared in the table the
    /// configuration came from.
    pub fn bind(catalog: &SymbolCatalog, config: FeatureConfig) -> Result<Surface> {
        let mut bindings = IndexMap::with_capacity(catalog.len());
        for symbol in catalog.iter() {
            let value = config.get(symbol.owner).ok_or_else(|| ShimError::UnknownFlag {
                flag: symbol.owner.name().to_string(),
            })?;
            let source = if value.is_present() {
                BindingSource::Native
            } else {
                BindingSource::Polyfill
            };
            debug!(symbol = symbol.name, ?source, "symbol bound");
            bindings.insert(
                symbol.name,
                Binding {
                    symbol: symbol.clone(),
                    source,
                },
            );
        }

        let freeze_protection = config
            .get(Capability::FreezeProtection)
            .map(|v| v.is_present())
            .unwrap_or(false);

        Ok(Surface {
            config,
            bindings,
            freeze_protection,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// Initialize ownership of a newly created inode. Behavior is
    /// identical on both paths; the binding only decides whether the
    /// module build uses the host definition or the emitted shim.
    pub fn inode_init_owner(
        &self,
        caller: Credentials,
        dir: Option<&InodeAttrs>,
        mode: FileMode,
    ) -> InodeAttrs {
        polyfills::init_owner(caller, dir, mode)
    }

    pub fn set_nlink(&self, inode: &mut InodeAttrs, nlink: u32) {
        polyfills::set_nlink(inode, nlink);
    }

    pub fn clear_nlink(&self, inode: &mut InodeAttrs) {
        polyfills::clear_nlink(inode);
    }

    /// Translate a write-fault outcome into a fault status.
    pub fn block_page_mkwrite_return(
        &self,
        outcome: std::result::Result<(), FaultError>,
    ) -> FaultStatus {
        polyfills::page_mkwrite_status(outcome)
    }

    /// Enter the page-fault write path. Advisory: on hosts without freeze
    /// protection this elides to nothing and never blocks.
    pub fn sb_start_pagefault(&self, sb: &SbFreeze) {
        if self.freeze_protection {
            sb.acquire(FreezeLevel::PageFault);
        }
    }

    pub fn sb_end_pagefault(&self, sb: &SbFreeze) {
        if self.freeze_protection {
            sb.release(FreezeLevel::PageFault);
        }
    }

    /// Enter an internal write. Not advisory: the degraded branch still
    /// performs the frozen-state wait so write-admission ordering holds.
    pub fn sb_start_intwrite(&self, sb: &SbFreeze) {
        if self.freeze_protection {
            sb.acquire(FreezeLevel::Internal);
        } else {
            sb.wait_unfrozen();
        }
    }

    pub fn sb_end_intwrite(&self, sb: &SbFreeze) {
        if self.freeze_protection {
            sb.release(FreezeLevel::Internal);
        }
    }
}
