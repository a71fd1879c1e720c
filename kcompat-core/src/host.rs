//! Best-effort introspection of the running machine.
//!
//! Everything here is total: a missing command, an unreadable file, or an
//! unrecognized format degrades to an absent identification input. The
//! resolver's conservative defaults cover whatever cannot be determined.

use crate::probe::ProbeInput;
use crate::version::{KernelVersion, Variant};
use std::process::Command;
use tracing::debug;

/// Distribution identifiers that track the RHEL kernel line and inherit
/// its backports.
const RHEL_FAMILY: [&str; 4] = ["rhel", "centos", "rocky", "almalinux"];

/// Probe the running machine for identification inputs.
pub fn detect() -> ProbeInput {
    let kernel = detect_kernel();
    let variant = detect_variant();
    debug!(?kernel, ?variant, "host introspection complete");
    ProbeInput { kernel, variant }
}

fn detect_kernel() -> Option<KernelVersion> {
    let output = Command::new("uname").arg("-r").output().ok()?;
    let release = String::from_utf8_lossy(&output.stdout);
    KernelVersion::parse(release.trim())
}

fn detect_variant() -> Option<Variant> {
    let os_release = std::fs::read_to_string("/etc/os-release").ok()?;
    variant_from_os_release(&os_release)
}

/// Parse an os-release body into a variant marker. RHEL-family rebuilds
/// are folded onto the `rhel` identifier so one set of pin rules covers
/// the whole kernel line.
fn variant_from_os_release(body: &str) -> Option<Variant> {
    let mut id = None;
    let mut version_id = None;

    for line in body.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(value.trim_matches('"').to_lowercase());
        } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
            version_id = Some(value.trim_matches('"').to_string());
        }
    }

    let id = id?;
    let version_id = version_id?;

    let distro = if RHEL_FAMILY.contains(&id.as_str()) {
        "rhel".to_string()
    } else {
        id
    };

    let mut parts = version_id.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);

    Some(Variant::new(distro, major, minor))
}
