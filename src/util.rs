//! Host facts used to fill in target defaults.

use std::fmt;

/// Byte order of the host CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => f.write_str("little"),
            Endian::Big => f.write_str("big"),
        }
    }
}

/// Byte order the binary was compiled for.
pub const fn host_endianness() -> Endian {
    if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    }
}

/// Host architecture using kernel names (`uname -m`).
///
/// Rust calls little-endian 64-bit POWER `powerpc64`; the kernel and the
/// test descriptors call it `ppc64le`.
pub fn host_arch() -> &'static str {
    match (std::env::consts::ARCH, host_endianness()) {
        ("powerpc64", Endian::Little) => "ppc64le",
        ("powerpc64", Endian::Big) => "ppc64",
        (arch, _) => arch,
    }
}
