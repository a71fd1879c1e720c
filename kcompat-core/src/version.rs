//! Host identification inputs: kernel version triples and distribution
//! variant markers.

use serde::Serialize;
use std::fmt;

/// An upstream kernel version, ordered lexicographically on
/// (major, minor, patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KernelVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a release string leniently. Anything after the first `-`
    /// (local build suffixes like `-300.fc38.x86_64`) is ignored, and
    /// missing components default to zero.
    ///
    /// Returns `None` when no leading numeric component exists; callers
    /// treat that as an absent identification input, never an error.
    pub fn parse(release: &str) -> Option<Self> {
        let base = release.trim().split('-').next().unwrap_or("");
        let mut parts = base.split('.');

        let major: u32 = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Some(Self::new(major, minor, patch))
    }

    /// The packed numeric form the kernel's own version macro uses.
    pub fn code(&self) -> u32 {
        (self.major << 16) | (self.minor << 8) | self.patch.min(255)
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A distribution variant marker, e.g. RHEL 6.4.
///
/// Distribution vendors backport features ahead of the upstream version
/// their kernels claim, so a variant can refine or override decisions
/// the plain [`KernelVersion`] would drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant {
    /// Lowercase distribution identifier, e.g. `"rhel"`.
    pub distro: String,
    pub major: u32,
    pub minor: u32,
}

impl Variant {
    pub fn new(distro: impl Into<String>, major: u32, minor: u32) -> Self {
        Self {
            distro: distro.into().to_lowercase(),
            major,
            minor,
        }
    }

    /// Parse a `name-major.minor` marker such as `"rhel-6.4"`. The minor
    /// component is optional. Returns `None` for anything malformed.
    pub fn parse(marker: &str) -> Option<Self> {
        let (name, version) = marker.trim().rsplit_once('-')?;
        if name.is_empty() {
            return None;
        }

        let mut parts = version.split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

        Some(Self::new(name, major, minor))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.distro, self.major, self.minor)
    }
}
