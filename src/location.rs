//! Places the Windows strategy probes for its DLLs.

use std::fmt;
use std::path::PathBuf;

/// Where a file name is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchLocation {
    /// Hand the bare file name to the OS loader and let its default search
    /// order (which includes the working directory) find it.
    DefaultSearch,
    /// Join the file name onto this directory.
    Directory(PathBuf),
}

impl SearchLocation {
    pub fn resolve(&self, file_name: &str) -> PathBuf {
        match self {
            SearchLocation::DefaultSearch => PathBuf::from(file_name),
            SearchLocation::Directory(dir) => dir.join(file_name),
        }
    }

    /// The directory holding the running executable. For a bundled
    /// application this is where the DLLs are shipped.
    pub fn installed_dir() -> Option<Self> {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(e) => {
                tracing::debug!("cannot determine executable path: {}", e);
                return None;
            }
        };
        exe.parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| SearchLocation::Directory(dir.to_path_buf()))
    }

    /// Default search first, then the installed directory when known.
    pub fn windows_order(installed: Option<SearchLocation>) -> Vec<SearchLocation> {
        let mut order = vec![SearchLocation::DefaultSearch];
        order.extend(installed);
        order
    }
}

impl fmt::Display for SearchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchLocation::DefaultSearch => f.write_str("default search path"),
            SearchLocation::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}
