//! Windows DLL names.
//!
//! The vendor ships one zbar build per architecture, each linked against a
//! differently named iconv DLL.

use crate::platform::AddressWidth;

/// A library file name and the dependencies that must be resident before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateName {
    /// File name of the main library.
    pub library: &'static str,
    /// Dependency file names, in load order.
    pub dependencies: &'static [&'static str],
}

pub const WINDOWS_64: CandidateName = CandidateName {
    library: "libzbar-64.dll",
    dependencies: &["libiconv.dll"],
};

pub const WINDOWS_32: CandidateName = CandidateName {
    library: "libzbar-32.dll",
    dependencies: &["libiconv-2.dll"],
};

/// Picks the DLL pair built for the given process width.
pub fn windows_candidate(width: AddressWidth) -> CandidateName {
    match width {
        AddressWidth::Bits64 => WINDOWS_64,
        AddressWidth::Bits32 => WINDOWS_32,
    }
}
