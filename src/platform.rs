//! Host platform detection.
//!
//! The loader only cares about two things: whether the host resolves libraries
//! the Windows way (fixed DLL names, directory fallback) or the POSIX way
//! (override path, library-name search), and on Windows the pointer width of
//! the running process, since the vendor DLLs are built per architecture.

use std::fmt;

/// Address width of the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    Bits32,
    Bits64,
}

impl AddressWidth {
    /// Width of the current process, taken from the target pointer width.
    pub fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            AddressWidth::Bits64
        } else {
            AddressWidth::Bits32
        }
    }
}

impl fmt::Display for AddressWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressWidth::Bits32 => f.write_str("32-bit"),
            AddressWidth::Bits64 => f.write_str("64-bit"),
        }
    }
}

/// The host OS family as seen by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformProfile {
    WindowsLike { width: AddressWidth },
    PosixLike,
}

impl PlatformProfile {
    /// Detects the profile of the running process.
    pub fn detect() -> Self {
        if cfg!(windows) {
            PlatformProfile::WindowsLike {
                width: AddressWidth::current(),
            }
        } else {
            PlatformProfile::PosixLike
        }
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformProfile::WindowsLike { width } => write!(f, "windows ({width})"),
            PlatformProfile::PosixLike => f.write_str("posix"),
        }
    }
}
