//! The declarative capability flag table.
//!
//! Every host API the shim cares about is one named boolean flag. The
//! table declares, per flag, the rule that produces its default value and
//! the flags it must be resolved after. Accumulating these as one table
//! keeps the cross-flag interactions explicit instead of buried in
//! conditional blocks.

use crate::error::{Result, ShimError};
use crate::version::KernelVersion;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// A host capability the module build may or may not find natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Host provides `inode_init_owner` for new-inode ownership setup.
    InodeInitOwner,
    /// Host provides the `set_nlink`/`clear_nlink` link-count accessors.
    SetNlink,
    /// Host provides `block_page_mkwrite_return` fault-status translation.
    BlockPageMkwriteReturn,
    /// Host provides superblock freeze-protection counters
    /// (the `sb_start_pagefault` family).
    FreezeProtection,
    /// Host provides the older `vfs_check_frozen` wait. Interacts with
    /// [`Capability::FreezeProtection`]: kernels that grew the counter
    /// API dropped this one.
    LegacyFrozenCheck,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::InodeInitOwner,
        Capability::SetNlink,
        Capability::BlockPageMkwriteReturn,
        Capability::FreezeProtection,
        Capability::LegacyFrozenCheck,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::InodeInitOwner => "inode-init-owner",
            Capability::SetNlink => "set-nlink",
            Capability::BlockPageMkwriteReturn => "block-page-mkwrite-return",
            Capability::FreezeProtection => "freeze-protection",
            Capability::LegacyFrozenCheck => "legacy-frozen-check",
        }
    }

    /// The preprocessor name the emitted header defines for this flag.
    pub fn macro_name(&self) -> &'static str {
        match self {
            Capability::InodeInitOwner => "KCOMPAT_HAVE_INODE_INIT_OWNER",
            Capability::SetNlink => "KCOMPAT_HAVE_SET_NLINK",
            Capability::BlockPageMkwriteReturn => "KCOMPAT_HAVE_BLOCK_PAGE_MKWRITE_RETURN",
            Capability::FreezeProtection => "KCOMPAT_HAVE_FREEZE_PROTECTION",
            Capability::LegacyFrozenCheck => "KCOMPAT_HAVE_VFS_CHECK_FROZEN",
        }
    }

    pub fn from_name(name: &str) -> Option<Capability> {
        Capability::ALL.iter().copied().find(|c| c.name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved value of a capability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagValue {
    /// The native host API exists; nothing is installed.
    Present,
    /// The host lacks the API; the polyfill is installed.
    Absent,
}

impl FlagValue {
    pub fn is_present(self) -> bool {
        matches!(self, FlagValue::Present)
    }

    pub fn from_bool(present: bool) -> Self {
        if present {
            FlagValue::Present
        } else {
            FlagValue::Absent
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            FlagValue::Present => FlagValue::Absent,
            FlagValue::Absent => FlagValue::Present,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "present" => Some(FlagValue::Present),
            "absent" => Some(FlagValue::Absent),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Present => f.write_str("present"),
            FlagValue::Absent => f.write_str("absent"),
        }
    }
}

/// Default rule evaluated when neither an override nor a pin fixed a flag.
#[derive(Debug, Clone)]
pub enum DefaultRule {
    /// Present iff the host version is at least the threshold. Falls back
    /// to the flag's conservative value when no version input exists.
    SinceVersion(KernelVersion),
    /// Derived from another flag's already-resolved value. The dependency
    /// must also appear in the flag's `depends_on` list so the resolver
    /// orders it first.
    DerivedFrom {
        dependency: Capability,
        derive: fn(FlagValue) -> FlagValue,
    },
}

/// One declared capability flag.
#[derive(Debug, Clone)]
pub struct FlagSpec {
    pub cap: Capability,
    /// `None` is a specification-completeness bug the resolver reports as
    /// [`ShimError::MissingDefault`] unless a pin or override intervenes.
    pub default: Option<DefaultRule>,
    /// Value assumed when no identification input can drive the default.
    /// Typically `Absent`, preferring the polyfill path over assuming a
    /// native API exists.
    pub conservative: FlagValue,
    /// Flags that must be resolved before this one.
    pub depends_on: Vec<Capability>,
}

/// The declarative flag table. Iteration order is declaration order.
#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    specs: IndexMap<Capability, FlagSpec>,
}

impl FlagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a flag. Redeclaration is a fatal table bug.
    pub fn declare(&mut self, spec: FlagSpec) -> Result<()> {
        if self.specs.contains_key(&spec.cap) {
            return Err(ShimError::DuplicateFlag {
                flag: spec.cap.name().to_string(),
            });
        }
        if let Some(DefaultRule::DerivedFrom { dependency, .. }) = &spec.default {
            if !spec.depends_on.contains(dependency) {
                return Err(ShimError::UnknownDependency {
                    flag: spec.cap.name().to_string(),
                    dependency: dependency.name().to_string(),
                });
            }
        }
        self.specs.insert(spec.cap, spec);
        Ok(())
    }

    pub fn get(&self, cap: Capability) -> Option<&FlagSpec> {
        self.specs.get(&cap)
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.specs.contains_key(&cap)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlagSpec> {
        self.specs.values()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Dependency-order walk: every flag appears after the flags it
    /// depends on. Rejects undeclared dependencies and cycles.
    pub fn resolution_order(&self) -> Result<Vec<Capability>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: IndexMap<Capability, Mark> = self
            .specs
            .keys()
            .map(|cap| (*cap, Mark::Unvisited))
            .collect();
        let mut order = Vec::with_capacity(self.specs.len());

        fn visit(
            table: &FlagTable,
            cap: Capability,
            marks: &mut IndexMap<Capability, Mark>,
            order: &mut Vec<Capability>,
        ) -> Result<()> {
            match marks.get(&cap).copied() {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    return Err(ShimError::DependencyCycle {
                        flag: cap.name().to_string(),
                    })
                }
                Some(Mark::Unvisited) | None => {}
            }
            marks.insert(cap, Mark::InProgress);

            let spec = table.get(cap).ok_or_else(|| ShimError::UnknownFlag {
                flag: cap.name().to_string(),
            })?;
            for dep in &spec.depends_on {
                if !table.contains(*dep) {
                    return Err(ShimError::UnknownDependency {
                        flag: cap.name().to_string(),
                        dependency: dep.name().to_string(),
                    });
                }
                visit(table, *dep, marks, order)?;
            }

            marks.insert(cap, Mark::Done);
            order.push(cap);
            Ok(())
        }

        let caps: Vec<Capability> = self.specs.keys().copied().collect();
        for cap in caps {
            visit(self, cap, &mut marks, &mut order)?;
        }
        Ok(order)
    }
}

/// The built-in table: one row per capability, thresholds matching the
/// upstream kernels that introduced each API.
pub fn stock_table() -> Result<FlagTable> {
    let mut table = FlagTable::new();

    table.declare(FlagSpec {
        cap: Capability::InodeInitOwner,
        default: Some(DefaultRule::SinceVersion(KernelVersion::new(2, 6, 39))),
        conservative: FlagValue::Absent,
        depends_on: Vec::new(),
    })?;

    table.declare(FlagSpec {
        cap: Capability::SetNlink,
        default: Some(DefaultRule::SinceVersion(KernelVersion::new(3, 2, 0))),
        conservative: FlagValue::Absent,
        depends_on: Vec::new(),
    })?;

    table.declare(FlagSpec {
        cap: Capability::BlockPageMkwriteReturn,
        default: Some(DefaultRule::SinceVersion(KernelVersion::new(3, 1, 0))),
        conservative: FlagValue::Absent,
        depends_on: Vec::new(),
    })?;

    table.declare(FlagSpec {
        cap: Capability::FreezeProtection,
        default: Some(DefaultRule::SinceVersion(KernelVersion::new(3, 6, 0))),
        conservative: FlagValue::Absent,
        depends_on: Vec::new(),
    })?;

    // Kernels that grew the freeze-protection counters dropped the old
    // frozen-state wait, so this flag defaults to the inverse.
    table.declare(FlagSpec {
        cap: Capability::LegacyFrozenCheck,
        default: Some(DefaultRule::DerivedFrom {
            dependency: Capability::FreezeProtection,
            derive: FlagValue::inverted,
        }),
        conservative: FlagValue::Present,
        depends_on: vec![Capability::FreezeProtection],
    })?;

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_table_declares_every_capability() {
        let table = stock_table().unwrap();
        assert_eq!(table.len(), Capability::ALL.len());
        for cap in Capability::ALL {
            assert!(table.get(cap).is_some(), "missing {cap}");
        }
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let mut table = stock_table().unwrap();
        let err = table
            .declare(FlagSpec {
                cap: Capability::SetNlink,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, ShimError::DuplicateFlag { flag } if flag == "set-nlink"));
    }

    #[test]
    fn test_resolution_order_respects_dependencies() {
        let table = stock_table().unwrap();
        let order = table.resolution_order().unwrap();
        assert_eq!(order.len(), table.len());

        let freeze = order
            .iter()
            .position(|c| *c == Capability::FreezeProtection)
            .unwrap();
        let legacy = order
            .iter()
            .position(|c| *c == Capability::LegacyFrozenCheck)
            .unwrap();
        assert!(freeze < legacy);
    }

    #[test]
    fn test_dependency_cycle_rejected() {
        let mut table = FlagTable::new();
        table
            .declare(FlagSpec {
                cap: Capability::FreezeProtection,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: vec![Capability::LegacyFrozenCheck],
            })
            .unwrap();
        table
            .declare(FlagSpec {
                cap: Capability::LegacyFrozenCheck,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: vec![Capability::FreezeProtection],
            })
            .unwrap();

        let err = table.resolution_order().unwrap_err();
        assert!(matches!(err, ShimError::DependencyCycle { .. }));
    }

    #[test]
    fn test_undeclared_dependency_rejected() {
        let mut table = FlagTable::new();
        table
            .declare(FlagSpec {
                cap: Capability::LegacyFrozenCheck,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: vec![Capability::FreezeProtection],
            })
            .unwrap();

        let err = table.resolution_order().unwrap_err();
        assert!(matches!(
            err,
            ShimError::UnknownDependency { dependency, .. } if dependency == "freeze-protection"
        ));
    }

    #[test]
    fn test_derived_default_must_declare_its_dependency() {
        let mut table = FlagTable::new();
        let err = table
            .declare(FlagSpec {
                cap: Capability::LegacyFrozenCheck,
                default: Some(DefaultRule::DerivedFrom {
                    dependency: Capability::FreezeProtection,
                    derive: FlagValue::inverted,
                }),
                conservative: FlagValue::Present,
                depends_on: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, ShimError::UnknownDependency { .. }));
    }

    #[test]
    fn test_capability_name_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_name(cap.name()), Some(cap));
        }
        assert_eq!(Capability::from_name("no-such-flag"), None);
    }
}
