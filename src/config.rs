//! Configuration.
//!
//! [`LoaderConfig`] carries the inputs the loader takes from the process
//! environment, read once up front so the resolution logic itself never
//! touches global state. [`Config`] is the command line of `zbar-probe`.

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable holding an explicit path to the zbar shared library.
pub const OVERRIDE_ENV_VAR: &str = "ZBAR_PATH";

/// Inputs to the POSIX resolution strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Loaded as-is when set; the library-name search is skipped.
    pub override_path: Option<PathBuf>,
}

impl LoaderConfig {
    /// Reads `ZBAR_PATH`. An empty value counts as unset.
    pub fn from_env() -> Self {
        Self::from_override(std::env::var_os(OVERRIDE_ENV_VAR))
    }

    pub fn from_override(value: Option<OsString>) -> Self {
        Self {
            override_path: value.filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }

    pub fn with_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }
}

/// Locate and load the zbar shared library, and report what happened.
///
/// Useful for checking an installation: shows which files the loader would
/// try on this platform, and whether they load.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the zbar shared library (overrides ZBAR_PATH)
    #[arg(long, value_name = "PATH")]
    pub zbar_path: Option<PathBuf>,

    /// Print the load plan without loading anything
    #[arg(long)]
    pub dry_run: bool,

    /// Check that the loaded library exports this symbol (repeatable)
    #[arg(long = "symbol", value_name = "NAME")]
    pub symbols: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

impl Config {
    /// Loader configuration: the command-line override wins over the
    /// environment.
    pub fn loader_config(&self) -> LoaderConfig {
        match &self.zbar_path {
            Some(path) => LoaderConfig::default().with_override(path),
            None => LoaderConfig::from_env(),
        }
    }
}
