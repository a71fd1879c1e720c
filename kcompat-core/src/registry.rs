//! The consumer symbol catalog: which flag owns which symbol, and the C
//! text installed for a symbol when its flag resolves absent.
//!
//! Exactly one definition per symbol may be visible to the consumer.
//! Ownership collisions are rejected here, at catalog construction,
//! before any artifact can be produced.

use crate::error::{Result, ShimError};
use crate::flags::Capability;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// What shape a consumer symbol takes in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    /// A static-inline function definition.
    Function,
    /// A hook that may degrade to a no-op form.
    Hook,
    /// A macro definition.
    Macro,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Function => f.write_str("function"),
            SymbolKind::Hook => f.write_str("hook"),
            SymbolKind::Macro => f.write_str("macro"),
        }
    }
}

/// One consumer surface symbol.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: &'static str,
    pub owner: Capability,
    pub kind: SymbolKind,
    /// C text emitted when the owning flag resolves absent. Never emitted
    /// when the flag is present; the native definition is used instead.
    pub polyfill: &'static str,
}

/// The catalog of every symbol downstream code is permitted to call.
/// Iteration order is registration order.
#[derive(Debug, Clone, Default)]
pub struct SymbolCatalog {
    symbols: IndexMap<&'static str, Symbol>,
}

impl SymbolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a symbol. A second flag claiming the same name is fatal.
    pub fn register(&mut self, symbol: Symbol) -> Result<()> {
        if let Some(existing) = self.symbols.get(symbol.name) {
            return Err(ShimError::DuplicateSymbol {
                symbol: symbol.name.to_string(),
                first: existing.owner.name().to_string(),
                second: symbol.owner.name().to_string(),
            });
        }
        self.symbols.insert(symbol.name, symbol);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Whether a symbol resolves to the native host definition or to the
/// installed polyfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingSource {
    Native,
    Polyfill,
}

/// One resolved symbol binding.
#[derive(Debug, Clone)]
pub struct Binding {
    pub symbol: Symbol,
    pub source: BindingSource,
}

/// The built-in catalog for the symbols the module calls.
pub fn stock_catalog() -> Result<SymbolCatalog> {
    let mut catalog = SymbolCatalog::new();

    catalog.register(Symbol {
        name: "inode_init_owner",
        owner: Capability::InodeInitOwner,
        kind: SymbolKind::Function,
        polyfill: "\
static inline void inode_init_owner(struct inode *inode,
\t\t\t\t    const struct inode *dir, umode_t mode)
{
\tinode->i_uid = current_fsuid();
\tif (dir && dir->i_mode & S_ISGID) {
\t\tinode->i_gid = dir->i_gid;
\t\tif (S_ISDIR(mode))
\t\t\tmode |= S_ISGID;
\t} else
\t\tinode->i_gid = current_fsgid();
\tinode->i_mode = mode;
}
",
    })?;

    catalog.register(Symbol {
        name: "set_nlink",
        owner: Capability::SetNlink,
        kind: SymbolKind::Function,
        polyfill: "\
static inline void set_nlink(struct inode *inode, unsigned int nlink)
{
\tinode->i_nlink = nlink;
}
",
    })?;

    catalog.register(Symbol {
        name: "clear_nlink",
        owner: Capability::SetNlink,
        kind: SymbolKind::Function,
        polyfill: "\
static inline void clear_nlink(struct inode *inode)
{
\tinode->i_nlink = 0;
}
",
    })?;

    catalog.register(Symbol {
        name: "block_page_mkwrite_return",
        owner: Capability::BlockPageMkwriteReturn,
        kind: SymbolKind::Function,
        polyfill: "\
static inline int block_page_mkwrite_return(int err)
{
\tif (err == 0)
\t\treturn VM_FAULT_LOCKED;
\tif (err == -EFAULT)
\t\treturn VM_FAULT_NOPAGE;
\tif (err == -ENOMEM)
\t\treturn VM_FAULT_OOM;
\tif (err == -EAGAIN)
\t\treturn VM_FAULT_RETRY;
\treturn VM_FAULT_SIGBUS;
}
",
    })?;

    // Page-fault freeze accounting is advisory; hosts without the counter
    // API get safe no-op forms.
    catalog.register(Symbol {
        name: "sb_start_pagefault",
        owner: Capability::FreezeProtection,
        kind: SymbolKind::Hook,
        polyfill: "\
static inline void sb_start_pagefault(struct super_block *sb)
{
}
",
    })?;

    catalog.register(Symbol {
        name: "sb_end_pagefault",
        owner: Capability::FreezeProtection,
        kind: SymbolKind::Hook,
        polyfill: "\
static inline void sb_end_pagefault(struct super_block *sb)
{
}
",
    })?;

    // The internal-write hook is not advisory: even without the counter
    // API it must keep the frozen-state wait, or callers lose their
    // write-admission ordering guarantee.
    catalog.register(Symbol {
        name: "sb_start_intwrite",
        owner: Capability::FreezeProtection,
        kind: SymbolKind::Hook,
        polyfill: "\
static inline void sb_start_intwrite(struct super_block *sb)
{
\tvfs_check_frozen(sb, SB_FREEZE_WRITE);
}
",
    })?;

    catalog.register(Symbol {
        name: "sb_end_intwrite",
        owner: Capability::FreezeProtection,
        kind: SymbolKind::Hook,
        polyfill: "\
static inline void sb_end_intwrite(struct super_block *sb)
{
}
",
    })?;

    // On kernels with freeze protection the counters already gate every
    // write path, so the legacy wait defines away to nothing.
    catalog.register(Symbol {
        name: "vfs_check_frozen",
        owner: Capability::LegacyFrozenCheck,
        kind: SymbolKind::Macro,
        polyfill: "\
#define vfs_check_frozen(sb, level) do { } while (0)
",
    })?;

    Ok(catalog)
}
