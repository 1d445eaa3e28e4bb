//! Loader errors.

use std::path::PathBuf;

/// Boxed native error from the OS loader.
pub type NativeError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// No override was given and the library-name search came back empty.
    #[error(
        "Unable to find {name} shared library. If the library is not on the normal path, \
         set the {env_var} environment variable."
    )]
    LibraryNotFound {
        name: &'static str,
        env_var: &'static str,
    },

    /// The OS loader rejected a resolved path.
    #[error("failed to load {}: {source}", .path.display())]
    LoadFailure {
        path: PathBuf,
        #[source]
        source: NativeError,
    },
}

impl LoaderError {
    pub fn load_failure(path: impl Into<PathBuf>, source: impl Into<NativeError>) -> Self {
        LoaderError::LoadFailure {
            path: path.into(),
            source: source.into(),
        }
    }

    /// The path whose load failed, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            LoaderError::LoadFailure { path, .. } => Some(path),
            LoaderError::LibraryNotFound { .. } => None,
        }
    }
}
