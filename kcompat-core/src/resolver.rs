//! Default resolution: turns a flag table, probe pins, and explicit
//! overrides into one immutable [`FeatureConfig`].
//!
//! Precedence per flag is fixed: override, then pin, then default rule.
//! Flags are resolved in dependency order so a derived rule may read an
//! earlier flag's resolved value. Resolution is total - every declared
//! flag has a value afterwards or the whole pass fails.

use crate::error::{Result, ShimError};
use crate::flags::{Capability, DefaultRule, FlagTable, FlagValue};
use crate::probe::{PinOrigin, PinSet, ProbeInput};
use crate::version::{KernelVersion, Variant};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

/// Explicit per-flag overrides. An override always wins over both pins
/// and defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    values: IndexMap<Capability, FlagValue>,
}

impl Overrides {
    pub fn set(&mut self, cap: Capability, value: FlagValue) {
        self.values.insert(cap, value);
    }

    pub fn get(&self, cap: Capability) -> Option<FlagValue> {
        self.values.get(&cap).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, FlagValue)> + '_ {
        self.values.iter().map(|(c, v)| (*c, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse one `FLAG=present|absent` entry against the table.
    pub fn parse_entry(table: &FlagTable, entry: &str) -> Result<(Capability, FlagValue)> {
        let (name, value) = entry.split_once('=').ok_or_else(|| {
            ShimError::InvalidOverride {
                input: entry.to_string(),
            }
        })?;
        let cap = Capability::from_name(name.trim()).ok_or_else(|| {
            ShimError::UnknownFlag {
                flag: name.trim().to_string(),
            }
        })?;
        if !table.contains(cap) {
            return Err(ShimError::UnknownFlag {
                flag: cap.name().to_string(),
            });
        }
        let value = FlagValue::parse(value.trim()).ok_or_else(|| {
            ShimError::InvalidOverride {
                input: entry.to_string(),
            }
        })?;
        Ok((cap, value))
    }
}

/// How a flag got its resolved value. Diagnostic only; consumers never
/// branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Override,
    VariantPin,
    VersionPin,
    VersionDefault,
    Derived,
    Conservative,
}

/// The immutable result of one resolution pass. The only way to read a
/// flag value.
#[derive(Debug, Clone)]
pub struct FeatureConfig {
    values: IndexMap<Capability, (FlagValue, Provenance)>,
    kernel: Option<KernelVersion>,
    variant: Option<Variant>,
}

impl FeatureConfig {
    pub fn get(&self, cap: Capability) -> Option<FlagValue> {
        self.values.get(&cap).map(|(v, _)| *v)
    }

    pub fn provenance(&self, cap: Capability) -> Option<Provenance> {
        self.values.get(&cap).map(|(_, p)| *p)
    }

    /// Iterate flags in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Capability, FlagValue, Provenance)> + '_ {
        self.values.iter().map(|(c, (v, p))| (*c, *v, *p))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn kernel(&self) -> Option<KernelVersion> {
        self.kernel
    }

    pub fn variant(&self) -> Option<&Variant> {
        self.variant.as_ref()
    }

    pub fn report(&self) -> ResolutionReport {
        ResolutionReport {
            kernel: self.kernel.map(|k| k.to_string()),
            variant: self.variant.as_ref().map(|v| v.to_string()),
            flags: self
                .iter()
                .map(|(cap, value, provenance)| FlagReport {
                    flag: cap.name().to_string(),
                    value,
                    provenance,
                })
                .collect(),
        }
    }
}

/// Serializable view of a resolved configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub kernel: Option<String>,
    pub variant: Option<String>,
    pub flags: Vec<FlagReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlagReport {
    pub flag: String,
    pub value: FlagValue,
    pub provenance: Provenance,
}

/// Resolve every declared flag. Fails on overrides naming undeclared
/// flags, on missing default rules, and on table ordering bugs.
pub fn resolve(
    table: &FlagTable,
    input: &ProbeInput,
    pins: &PinSet,
    overrides: &Overrides,
) -> Result<FeatureConfig> {
    for (cap, _) in overrides.iter() {
        if !table.contains(cap) {
            return Err(ShimError::UnknownFlag {
                flag: cap.name().to_string(),
            });
        }
    }

    let order = table.resolution_order()?;
    let mut resolved: IndexMap<Capability, (FlagValue, Provenance)> = IndexMap::new();

    for cap in order {
        let spec = table.get(cap).ok_or_else(|| ShimError::UnknownFlag {
            flag: cap.name().to_string(),
        })?;

        let (value, provenance) = if let Some(value) = overrides.get(cap) {
            (value, Provenance::Override)
        } else if let Some((value, origin)) = pins.get(cap) {
            let provenance = match origin {
                PinOrigin::Variant => Provenance::VariantPin,
                PinOrigin::Version => Provenance::VersionPin,
            };
            (value, provenance)
        } else {
            match &spec.default {
                Some(DefaultRule::SinceVersion(threshold)) => match input.kernel {
                    Some(kernel) => (
                        FlagValue::from_bool(kernel >= *threshold),
                        Provenance::VersionDefault,
                    ),
                    None => (spec.conservative, Provenance::Conservative),
                },
                Some(DefaultRule::DerivedFrom { dependency, derive }) => {
                    let dep_value = resolved.get(dependency).map(|(v, _)| *v).ok_or_else(
                        || ShimError::UnknownDependency {
                            flag: cap.name().to_string(),
                            dependency: dependency.name().to_string(),
                        },
                    )?;
                    (derive(dep_value), Provenance::Derived)
                }
                None => {
                    return Err(ShimError::MissingDefault {
                        flag: cap.name().to_string(),
                    })
                }
            }
        };

        debug!(flag = cap.name(), value = %value, ?provenance, "flag resolved");
        resolved.insert(cap, (value, provenance));
    }

    // Report flags in declaration order, whatever order resolution ran in.
    let mut values = IndexMap::with_capacity(resolved.len());
    for spec in table.iter() {
        if let Some(entry) = resolved.get(&spec.cap) {
            values.insert(spec.cap, *entry);
        }
    }

    Ok(FeatureConfig {
        values,
        kernel: input.kernel,
        variant: input.variant.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{stock_table, FlagSpec};
    use crate::probe::stock_probe;

    fn input(kernel: Option<&str>, variant: Option<&str>) -> ProbeInput {
        ProbeInput {
            kernel: kernel.and_then(KernelVersion::parse),
            variant: variant.and_then(Variant::parse),
        }
    }

    fn resolve_stock(kernel: Option<&str>, variant: Option<&str>) -> FeatureConfig {
        let table = stock_table().unwrap();
        let input = input(kernel, variant);
        let pins = stock_probe().probe(&table, &input).unwrap();
        resolve(&table, &input, &pins, &Overrides::default()).unwrap()
    }

    #[test]
    fn test_resolution_is_total_and_deterministic() {
        let a = resolve_stock(Some("3.10.0-957.el7"), None);
        let b = resolve_stock(Some("3.10.0-957.el7"), None);
        assert_eq!(a.len(), Capability::ALL.len());
        for cap in Capability::ALL {
            assert_eq!(a.get(cap), b.get(cap), "{cap} not deterministic");
            assert!(a.get(cap).is_some(), "{cap} unresolved");
        }
    }

    #[test]
    fn test_version_default_thresholds() {
        let old = resolve_stock(Some("2.6.38"), None);
        assert_eq!(old.get(Capability::InodeInitOwner), Some(FlagValue::Absent));

        let exact = resolve_stock(Some("2.6.39"), None);
        assert_eq!(exact.get(Capability::InodeInitOwner), Some(FlagValue::Present));
        assert_eq!(
            exact.provenance(Capability::InodeInitOwner),
            Some(Provenance::VersionDefault)
        );

        let modern = resolve_stock(Some("3.10.0"), None);
        assert_eq!(modern.get(Capability::SetNlink), Some(FlagValue::Present));
        assert_eq!(
            modern.get(Capability::BlockPageMkwriteReturn),
            Some(FlagValue::Present)
        );
        assert_eq!(modern.get(Capability::FreezeProtection), Some(FlagValue::Present));
    }

    #[test]
    fn test_conservative_defaults_without_any_inputs() {
        let config = resolve_stock(None, None);
        assert_eq!(config.get(Capability::InodeInitOwner), Some(FlagValue::Absent));
        assert_eq!(config.get(Capability::SetNlink), Some(FlagValue::Absent));
        assert_eq!(
            config.get(Capability::BlockPageMkwriteReturn),
            Some(FlagValue::Absent)
        );
        assert_eq!(config.get(Capability::FreezeProtection), Some(FlagValue::Absent));
        // Derived, not conservative: no freeze counters means the legacy
        // wait is assumed to exist.
        assert_eq!(config.get(Capability::LegacyFrozenCheck), Some(FlagValue::Present));
        assert_eq!(
            config.provenance(Capability::InodeInitOwner),
            Some(Provenance::Conservative)
        );
    }

    #[test]
    fn test_derived_flag_follows_its_dependency() {
        let modern = resolve_stock(Some("3.6.0"), None);
        assert_eq!(modern.get(Capability::FreezeProtection), Some(FlagValue::Present));
        assert_eq!(modern.get(Capability::LegacyFrozenCheck), Some(FlagValue::Absent));
        assert_eq!(
            modern.provenance(Capability::LegacyFrozenCheck),
            Some(Provenance::Derived)
        );

        let old = resolve_stock(Some("3.4.0"), None);
        assert_eq!(old.get(Capability::FreezeProtection), Some(FlagValue::Absent));
        assert_eq!(old.get(Capability::LegacyFrozenCheck), Some(FlagValue::Present));
    }

    #[test]
    fn test_derived_flag_reads_overridden_dependency() {
        // No version input: the dependency is fixed by an override, and
        // the derived flag must read that value, not a default.
        let table = stock_table().unwrap();
        let mut overrides = Overrides::default();
        overrides.set(Capability::FreezeProtection, FlagValue::Present);

        let config = resolve(
            &table,
            &ProbeInput::default(),
            &PinSet::default(),
            &overrides,
        )
        .unwrap();
        assert_eq!(config.get(Capability::LegacyFrozenCheck), Some(FlagValue::Absent));
        assert_eq!(
            config.provenance(Capability::LegacyFrozenCheck),
            Some(Provenance::Derived)
        );
    }

    #[test]
    fn test_derived_flag_reads_pinned_dependency() {
        // A variant pin fixes the dependency against what the version
        // default would say; the derived flag follows the pin.
        let table = stock_table().unwrap();
        let probe = crate::probe::Probe::new(crate::probe::PinPrecedence::VariantOverVersion)
            .with_rule(crate::probe::PinRule {
                flag: Capability::FreezeProtection,
                value: FlagValue::Present,
                matches: crate::probe::RuleMatch::Variant {
                    distro: "rhel",
                    major: 6,
                    min_minor: 5,
                },
            });

        let input = input(Some("2.6.32-504.el6"), Some("rhel-6.5"));
        let pins = probe.probe(&table, &input).unwrap();
        let config = resolve(&table, &input, &pins, &Overrides::default()).unwrap();

        assert_eq!(config.get(Capability::FreezeProtection), Some(FlagValue::Present));
        assert_eq!(
            config.provenance(Capability::FreezeProtection),
            Some(Provenance::VariantPin)
        );
        assert_eq!(config.get(Capability::LegacyFrozenCheck), Some(FlagValue::Absent));
        assert_eq!(
            config.provenance(Capability::LegacyFrozenCheck),
            Some(Provenance::Derived)
        );
    }

    #[test]
    fn test_variant_pin_beats_version_default() {
        // The el6 kernel claims 2.6.32; the default rule would say absent.
        let config = resolve_stock(Some("2.6.32-431.el6"), Some("rhel-6.4"));
        assert_eq!(config.get(Capability::InodeInitOwner), Some(FlagValue::Present));
        assert_eq!(
            config.provenance(Capability::InodeInitOwner),
            Some(Provenance::VariantPin)
        );
        assert_eq!(config.get(Capability::SetNlink), Some(FlagValue::Present));
    }

    #[test]
    fn test_override_beats_pin_and_default() {
        let table = stock_table().unwrap();
        let input = input(Some("2.6.32-431.el6"), Some("rhel-6.4"));
        let pins = stock_probe().probe(&table, &input).unwrap();

        let mut overrides = Overrides::default();
        overrides.set(Capability::InodeInitOwner, FlagValue::Absent);

        let config = resolve(&table, &input, &pins, &overrides).unwrap();
        assert_eq!(config.get(Capability::InodeInitOwner), Some(FlagValue::Absent));
        assert_eq!(
            config.provenance(Capability::InodeInitOwner),
            Some(Provenance::Override)
        );
    }

    #[test]
    fn test_missing_default_is_fatal() {
        let mut table = crate::flags::FlagTable::new();
        table
            .declare(FlagSpec {
                cap: Capability::SetNlink,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: Vec::new(),
            })
            .unwrap();

        let err = resolve(
            &table,
            &ProbeInput::default(),
            &PinSet::default(),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ShimError::MissingDefault { flag } if flag == "set-nlink"));
    }

    #[test]
    fn test_missing_default_rescued_by_override() {
        let mut table = crate::flags::FlagTable::new();
        table
            .declare(FlagSpec {
                cap: Capability::SetNlink,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: Vec::new(),
            })
            .unwrap();

        let mut overrides = Overrides::default();
        overrides.set(Capability::SetNlink, FlagValue::Present);

        let config = resolve(
            &table,
            &ProbeInput::default(),
            &PinSet::default(),
            &overrides,
        )
        .unwrap();
        assert_eq!(config.get(Capability::SetNlink), Some(FlagValue::Present));
    }

    #[test]
    fn test_override_for_undeclared_flag_is_fatal() {
        let mut table = crate::flags::FlagTable::new();
        table
            .declare(FlagSpec {
                cap: Capability::SetNlink,
                default: None,
                conservative: FlagValue::Absent,
                depends_on: Vec::new(),
            })
            .unwrap();

        let mut overrides = Overrides::default();
        overrides.set(Capability::FreezeProtection, FlagValue::Present);

        let err = resolve(
            &table,
            &ProbeInput::default(),
            &PinSet::default(),
            &overrides,
        )
        .unwrap_err();
        assert!(matches!(err, ShimError::UnknownFlag { .. }));
    }

    #[test]
    fn test_override_entry_parsing() {
        let table = stock_table().unwrap();

        let (cap, value) = Overrides::parse_entry(&table, "set-nlink=present").unwrap();
        assert_eq!(cap, Capability::SetNlink);
        assert_eq!(value, FlagValue::Present);

        let (_, value) = Overrides::parse_entry(&table, "freeze-protection=absent").unwrap();
        assert_eq!(value, FlagValue::Absent);

        assert!(matches!(
            Overrides::parse_entry(&table, "set-nlink"),
            Err(ShimError::InvalidOverride { .. })
        ));
        assert!(matches!(
            Overrides::parse_entry(&table, "set-nlink=maybe"),
            Err(ShimError::InvalidOverride { .. })
        ));
        assert!(matches!(
            Overrides::parse_entry(&table, "no-such-flag=present"),
            Err(ShimError::UnknownFlag { .. })
        ));
    }

    #[test]
    fn test_report_lists_flags_in_declaration_order() {
        let config = resolve_stock(Some("3.10.0"), None);
        let report = config.report();
        assert_eq!(report.kernel.as_deref(), Some("3.10.0"));
        assert_eq!(report.flags.len(), Capability::ALL.len());
        let names: Vec<&str> = report.flags.iter().map(|f| f.flag.as_str()).collect();
        let expected: Vec<&str> = Capability::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names, expected);

        // Serializes cleanly for the --json report.
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"version-default\""));
    }
}
