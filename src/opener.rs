//! The seam between the resolution logic and the OS loader.

use libloading::Library;
use std::path::Path;

use crate::error::NativeError;

/// Something that can map a shared library into the process.
///
/// The loader only ever hands over paths it has already decided on; whatever
/// the implementation reports as an error is passed back to the caller
/// untouched.
pub trait LibraryOpener {
    /// The handle kept alive for as long as the library is in use.
    type Handle;

    fn open(&self, path: &Path) -> Result<Self::Handle, NativeError>;
}

/// Opens libraries with the platform's dynamic loader (`dlopen` or
/// `LoadLibraryExW`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl LibraryOpener for SystemOpener {
    type Handle = Library;

    fn open(&self, path: &Path) -> Result<Library, NativeError> {
        // SAFETY: zbar and iconv run no initialisers that depend on state
        // owned by this crate; the handle is never unloaded while in use
        // because `LoadedLibrary` owns it.
        let library = unsafe { Library::new(path) }?;
        Ok(library)
    }
}
