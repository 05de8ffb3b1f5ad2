pub mod image_resolver;

use crate::params::OsType;

/// Architectures the provider accepts in a bootstrap request, paired with the
/// name the endpoint uses for them.
const SUPPORTED_ARCHITECTURES: &[(&str, &str)] = &[
    ("amd64", "x86_64"),
    ("arm64", "aarch64"),
    ("arm", "armv7l"),
];

/// Endpoint architecture names that are reported back in a shorter form.
const NATIVE_TO_CANONICAL: &[(&str, &str)] = &[
    ("x86_64", "amd64"),
    ("aarch64", "arm64"),
    ("armv7l", "arm"),
    ("i686", "386"),
];

/// Debian style names used by simplestreams products.
const SIMPLESTREAMS_TO_NATIVE: &[(&str, &str)] = &[
    ("amd64", "x86_64"),
    ("arm64", "aarch64"),
    ("armhf", "armv7l"),
    ("i386", "i686"),
    ("ppc64el", "ppc64le"),
    ("s390x", "s390x"),
    ("riscv64", "riscv64"),
];

/// Distribution names reported by image metadata that identify a Linux guest.
const LINUX_DISTROS: &[&str] = &[
    "linux",
    "ubuntu",
    "debian",
    "centos",
    "rhel",
    "rocky",
    "rockylinux",
    "almalinux",
    "fedora",
    "opensuse",
    "suse",
    "alpine",
    "archlinux",
    "oracle",
    "amazonlinux",
];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Endpoint name for a requested architecture, `None` when unsupported.
pub fn native_architecture(os_arch: &str) -> Option<&'static str> {
    lookup(SUPPORTED_ARCHITECTURES, os_arch)
}

/// Short form of an endpoint architecture; unknown names pass through.
pub fn canonical_architecture(native: &str) -> String {
    lookup(NATIVE_TO_CANONICAL, native)
        .map(str::to_string)
        .unwrap_or_else(|| native.to_string())
}

pub fn simplestreams_architecture(arch: &str) -> Option<&'static str> {
    lookup(SIMPLESTREAMS_TO_NATIVE, arch)
}

/// Map a distribution or platform name to an OS type.
pub fn os_type_from_name(name: &str) -> OsType {
    let name = name.trim().to_lowercase();
    if name == "windows" {
        OsType::Windows
    } else if LINUX_DISTROS.contains(&name.as_str()) {
        OsType::Linux
    } else {
        OsType::Unknown
    }
}
