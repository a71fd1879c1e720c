//! Version/variant probing: ordered pin rules that fix flag values ahead
//! of the generic defaults.
//!
//! Probing is total. Missing or unrecognized identification inputs simply
//! match no rule; they are never an error. The only fatal condition is two
//! rules in the same precedence tier disagreeing about one flag.

use crate::error::{Result, ShimError};
use crate::flags::{Capability, FlagTable, FlagValue};
use crate::version::{KernelVersion, Variant};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

/// The identification inputs a build supplies. Either, both, or neither
/// field may be present.
#[derive(Debug, Clone, Default)]
pub struct ProbeInput {
    pub kernel: Option<KernelVersion>,
    pub variant: Option<Variant>,
}

/// Which identification input a pin rule keys on.
#[derive(Debug, Clone)]
pub enum RuleMatch {
    /// Distribution rule: distro name and major must match exactly, and
    /// the variant minor must be at least `min_minor`.
    Variant {
        distro: &'static str,
        major: u32,
        min_minor: u32,
    },
    /// Upstream version rule: matches versions in `[since, below)`. An
    /// unset bound is open.
    Kernel {
        since: Option<KernelVersion>,
        below: Option<KernelVersion>,
    },
}

impl RuleMatch {
    fn matches(&self, input: &ProbeInput) -> bool {
        match self {
            RuleMatch::Variant {
                distro,
                major,
                min_minor,
            } => match &input.variant {
                Some(v) => {
                    v.distro.eq_ignore_ascii_case(distro)
                        && v.major == *major
                        && v.minor >= *min_minor
                }
                None => false,
            },
            RuleMatch::Kernel { since, below } => match input.kernel {
                Some(k) => {
                    since.map_or(true, |s| k >= s) && below.map_or(true, |b| k < b)
                }
                None => false,
            },
        }
    }

    fn is_variant(&self) -> bool {
        matches!(self, RuleMatch::Variant { .. })
    }
}

/// One declarative pin rule.
#[derive(Debug, Clone)]
pub struct PinRule {
    pub flag: Capability,
    pub value: FlagValue,
    pub matches: RuleMatch,
}

/// Precedence between the two rule tiers when both could pin one flag.
/// Vendors backport features ahead of the upstream version their kernels
/// claim, so variant knowledge wins by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinPrecedence {
    VariantOverVersion,
    VersionOverVariant,
}

/// Which tier produced a pin; carried through to the resolution report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOrigin {
    Variant,
    Version,
}

/// The pins produced by one probe pass.
#[derive(Debug, Clone, Default)]
pub struct PinSet {
    pins: IndexMap<Capability, (FlagValue, PinOrigin)>,
}

impl PinSet {
    pub fn get(&self, cap: Capability) -> Option<(FlagValue, PinOrigin)> {
        self.pins.get(&cap).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Capability, FlagValue, PinOrigin)> + '_ {
        self.pins.iter().map(|(c, (v, o))| (*c, *v, *o))
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Record a pin. Within one tier a disagreement is fatal; a pin from
    /// the lower-precedence tier never displaces one from the higher.
    fn insert(
        &mut self,
        cap: Capability,
        value: FlagValue,
        origin: PinOrigin,
    ) -> Result<()> {
        match self.pins.get(&cap) {
            Some((existing, prior)) if *prior == origin => {
                if *existing != value {
                    return Err(ShimError::ConflictingPin {
                        flag: cap.name().to_string(),
                        first: *existing,
                        second: value,
                    });
                }
            }
            Some(_) => {
                // Already pinned by the higher-precedence tier.
            }
            None => {
                self.pins.insert(cap, (value, origin));
            }
        }
        Ok(())
    }
}

/// An ordered set of pin rules plus the tier precedence to apply.
#[derive(Debug, Clone)]
pub struct Probe {
    rules: Vec<PinRule>,
    precedence: PinPrecedence,
}

impl Probe {
    pub fn new(precedence: PinPrecedence) -> Self {
        Self {
            rules: Vec::new(),
            precedence,
        }
    }

    pub fn with_rule(mut self, rule: PinRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn precedence(&self) -> PinPrecedence {
        self.precedence
    }

    /// Evaluate every rule against the inputs. Rules pinning a flag the
    /// table never declares are fatal table bugs; inputs that match no
    /// rule yield an empty pin set.
    pub fn probe(&self, table: &FlagTable, input: &ProbeInput) -> Result<PinSet> {
        for rule in &self.rules {
            if !table.contains(rule.flag) {
                return Err(ShimError::UnknownFlag {
                    flag: rule.flag.name().to_string(),
                });
            }
        }

        let mut pins = PinSet::default();
        let tiers: [(bool, PinOrigin); 2] = match self.precedence {
            PinPrecedence::VariantOverVersion => {
                [(true, PinOrigin::Variant), (false, PinOrigin::Version)]
            }
            PinPrecedence::VersionOverVariant => {
                [(false, PinOrigin::Version), (true, PinOrigin::Variant)]
            }
        };

        for (want_variant, origin) in tiers {
            for rule in &self.rules {
                if rule.matches.is_variant() != want_variant {
                    continue;
                }
                if rule.matches.matches(input) {
                    debug!(flag = rule.flag.name(), value = %rule.value, "pin rule matched");
                    pins.insert(rule.flag, rule.value, origin)?;
                }
            }
        }

        debug!(pins = pins.len(), "probe complete");
        Ok(pins)
    }
}

/// The built-in rules, covering the enterprise kernels that backported
/// features into older upstream version lines.
pub fn stock_probe() -> Probe {
    Probe::new(PinPrecedence::VariantOverVersion)
        // RHEL 6.4 backported the new-inode ownership helper and the
        // link-count accessors into its 2.6.32 kernel line.
        .with_rule(PinRule {
            flag: Capability::InodeInitOwner,
            value: FlagValue::Present,
            matches: RuleMatch::Variant {
                distro: "rhel",
                major: 6,
                min_minor: 4,
            },
        })
        .with_rule(PinRule {
            flag: Capability::SetNlink,
            value: FlagValue::Present,
            matches: RuleMatch::Variant {
                distro: "rhel",
                major: 6,
                min_minor: 4,
            },
        })
        // The el6 line kept the old block_page_mkwrite contract for its
        // whole life, whatever the claimed upstream version.
        .with_rule(PinRule {
            flag: Capability::BlockPageMkwriteReturn,
            value: FlagValue::Absent,
            matches: RuleMatch::Variant {
                distro: "rhel",
                major: 6,
                min_minor: 0,
            },
        })
}
