//! zbar shared library loader.
//!
//! Finds and loads the native zbar library, and on Windows the iconv DLL it
//! links against, hiding the per-platform differences in file names, search
//! locations and load order. It is organized into several modules:
//! - `platform`: host OS family and process address width.
//! - `candidates`: the fixed Windows DLL names.
//! - `location`: where the Windows strategy looks.
//! - `search`: library-name search on POSIX hosts.
//! - `opener`: the OS loader behind a trait.
//! - `loader`: planning and executing the load.
//! - `config`: environment and command-line configuration.
//! - `error`: the error type.

pub mod candidates;
pub mod config;
pub mod error;
pub mod loader;
pub mod location;
pub mod opener;
pub mod platform;
pub mod search;

pub use config::{LoaderConfig, OVERRIDE_ENV_VAR};
pub use error::LoaderError;
pub use loader::{load, LoadedLibrary, Loader, ResolutionStrategy};
pub use platform::{AddressWidth, PlatformProfile};
