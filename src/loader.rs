//! Core loading logic.
//!
//! Loading happens in two steps:
//! 1. Planning: the detected [`PlatformProfile`] selects a
//!    [`ResolutionStrategy`], which turns into a [`LoadPlan`], an ordered list
//!    of [`LoadAttempt`]s. On POSIX hosts this is where the library-name
//!    search runs and where `LibraryNotFound` comes from.
//! 2. Execution: attempts run in order. Each one opens its dependencies in
//!    sequence and then the main library. The first attempt that succeeds
//!    wins; only the error of the last attempt reaches the caller.

use libloading::Library;
use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::candidates::{windows_candidate, CandidateName};
use crate::config::{LoaderConfig, OVERRIDE_ENV_VAR};
use crate::error::LoaderError;
use crate::location::SearchLocation;
use crate::opener::{LibraryOpener, SystemOpener};
use crate::platform::PlatformProfile;
use crate::search::{LibrarySearch, SystemSearch};

/// Logical name used for the library-name search.
pub const LIBRARY_NAME: &str = "zbar";

/// A loaded library together with the dependencies loaded ahead of it.
///
/// Fields drop in declaration order, so the main library is released before
/// the libraries it links against.
pub struct LoadedLibrary<H> {
    library: H,
    path: PathBuf,
    dependencies: Vec<H>,
}

impl<H> LoadedLibrary<H> {
    pub fn library(&self) -> &H {
        &self.library
    }

    /// Handles of the pre-loaded dependencies, in load order.
    pub fn dependencies(&self) -> &[H] {
        &self.dependencies
    }

    /// The path the main library was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Splits into the main handle and the dependency handles. Keep the
    /// dependencies alive for as long as the main handle is in use.
    pub fn into_parts(self) -> (H, Vec<H>) {
        (self.library, self.dependencies)
    }
}

impl LoadedLibrary<Library> {
    /// Whether the main library exports `name`.
    pub fn symbol_exists(&self, name: &str) -> bool {
        // SAFETY: the symbol is only looked up, never dereferenced or called.
        unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.is_ok()
    }
}

impl<H> fmt::Debug for LoadedLibrary<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("path", &self.path)
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

/// One complete try: dependencies in order, then the main library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadAttempt {
    pub dependencies: Vec<PathBuf>,
    pub library: PathBuf,
}

impl LoadAttempt {
    pub fn single(library: impl Into<PathBuf>) -> Self {
        Self {
            dependencies: Vec::new(),
            library: library.into(),
        }
    }

    pub fn in_location(candidate: &CandidateName, location: &SearchLocation) -> Self {
        Self {
            dependencies: candidate
                .dependencies
                .iter()
                .map(|dep| location.resolve(dep))
                .collect(),
            library: location.resolve(candidate.library),
        }
    }

    fn run<O: LibraryOpener>(&self, opener: &O) -> Result<LoadedLibrary<O::Handle>, LoaderError> {
        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for dep in &self.dependencies {
            tracing::debug!("loading dependency {}", dep.display());
            let handle = opener
                .open(dep)
                .map_err(|e| LoaderError::load_failure(dep, e))?;
            dependencies.push(handle);
        }

        tracing::debug!("loading {}", self.library.display());
        let library = opener
            .open(&self.library)
            .map_err(|e| LoaderError::load_failure(&self.library, e))?;

        Ok(LoadedLibrary {
            library,
            path: self.library.clone(),
            dependencies,
        })
    }
}

impl fmt::Display for LoadAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dep in &self.dependencies {
            write!(f, "{} -> ", dep.display())?;
        }
        write!(f, "{}", self.library.display())
    }
}

/// Ordered attempts. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    attempts: Vec<LoadAttempt>,
}

impl LoadPlan {
    pub fn attempts(&self) -> &[LoadAttempt] {
        &self.attempts
    }

    /// Runs the attempts in order. Earlier failures are logged and dropped;
    /// the last attempt's result is returned as-is.
    pub fn execute<O: LibraryOpener>(
        &self,
        opener: &O,
    ) -> Result<LoadedLibrary<O::Handle>, LoaderError> {
        let Some((last, earlier)) = self.attempts.split_last() else {
            return Err(not_found());
        };

        for attempt in earlier {
            match attempt.run(opener) {
                Ok(loaded) => return Ok(loaded),
                Err(e) => tracing::warn!("{}; trying next location", e),
            }
        }
        last.run(opener)
    }
}

impl fmt::Display for LoadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attempt) in self.attempts.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}. {}", i + 1, attempt)?;
        }
        Ok(())
    }
}

/// How the library is located on a given platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Fixed DLL names tried in each location in turn.
    WindowsLike {
        candidate: CandidateName,
        locations: Vec<SearchLocation>,
    },
    /// Override path, or else the library-name search.
    PosixLike { override_path: Option<PathBuf> },
}

impl ResolutionStrategy {
    pub fn for_profile(
        profile: PlatformProfile,
        config: &LoaderConfig,
        installed: Option<SearchLocation>,
    ) -> Self {
        match profile {
            PlatformProfile::WindowsLike { width } => ResolutionStrategy::WindowsLike {
                candidate: windows_candidate(width),
                locations: SearchLocation::windows_order(installed),
            },
            PlatformProfile::PosixLike => ResolutionStrategy::PosixLike {
                override_path: config.override_path.clone(),
            },
        }
    }

    /// Resolves the strategy into concrete attempts. Only the POSIX strategy
    /// without an override consults `search`.
    pub fn plan<S: LibrarySearch>(&self, search: &S) -> Result<LoadPlan, LoaderError> {
        let attempts = match self {
            ResolutionStrategy::WindowsLike { candidate, locations } => locations
                .iter()
                .map(|location| LoadAttempt::in_location(candidate, location))
                .collect(),
            ResolutionStrategy::PosixLike {
                override_path: Some(path),
            } => {
                tracing::debug!("{} is set, using {}", OVERRIDE_ENV_VAR, path.display());
                vec![LoadAttempt::single(path)]
            }
            ResolutionStrategy::PosixLike { override_path: None } => {
                let path = search.find(LIBRARY_NAME).ok_or_else(not_found)?;
                vec![LoadAttempt::single(path)]
            }
        };

        if attempts.is_empty() {
            return Err(not_found());
        }
        Ok(LoadPlan { attempts })
    }
}

fn not_found() -> LoaderError {
    LoaderError::LibraryNotFound {
        name: LIBRARY_NAME,
        env_var: OVERRIDE_ENV_VAR,
    }
}

/// Plans and executes a load with an injected opener and search.
pub struct Loader<O, S> {
    opener: O,
    search: S,
    profile: PlatformProfile,
    config: LoaderConfig,
    installed: Option<SearchLocation>,
}

impl Loader<SystemOpener, SystemSearch> {
    /// A loader for the running process, backed by the OS loader and the
    /// system library search.
    pub fn system(config: LoaderConfig) -> Self {
        let profile = PlatformProfile::detect();
        let installed = match profile {
            PlatformProfile::WindowsLike { .. } => SearchLocation::installed_dir(),
            PlatformProfile::PosixLike => None,
        };
        Loader::new(SystemOpener, SystemSearch::from_env(), profile, config)
            .with_installed_dir(installed)
    }
}

impl<O: LibraryOpener, S: LibrarySearch> Loader<O, S> {
    pub fn new(opener: O, search: S, profile: PlatformProfile, config: LoaderConfig) -> Self {
        Self {
            opener,
            search,
            profile,
            config,
            installed: None,
        }
    }

    /// The directory the Windows strategy falls back to.
    pub fn with_installed_dir(mut self, installed: Option<SearchLocation>) -> Self {
        self.installed = installed;
        self
    }

    pub fn profile(&self) -> PlatformProfile {
        self.profile
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        ResolutionStrategy::for_profile(self.profile, &self.config, self.installed.clone())
    }

    pub fn plan(&self) -> Result<LoadPlan, LoaderError> {
        self.strategy().plan(&self.search)
    }

    pub fn load(&self) -> Result<LoadedLibrary<O::Handle>, LoaderError> {
        tracing::debug!("loading {} for {}", LIBRARY_NAME, self.profile);
        let plan = self.plan()?;
        self.execute(&plan)
    }

    /// Runs a plan obtained from [`Loader::plan`] with this loader's opener.
    pub fn execute(&self, plan: &LoadPlan) -> Result<LoadedLibrary<O::Handle>, LoaderError> {
        let loaded = plan.execute(&self.opener)?;
        tracing::info!("loaded {} from {}", LIBRARY_NAME, loaded.path().display());
        Ok(loaded)
    }
}

/// Loads zbar and its dependencies for the running process, taking
/// `ZBAR_PATH` from the environment.
pub fn load() -> Result<LoadedLibrary<Library>, LoaderError> {
    Loader::system(LoaderConfig::from_env()).load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NativeError;
    use crate::platform::AddressWidth;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Records every open call and fails for the configured paths.
    #[derive(Default)]
    struct RecordingOpener {
        opened: RefCell<Vec<PathBuf>>,
        failing: Vec<PathBuf>,
    }

    impl RecordingOpener {
        fn failing(paths: &[PathBuf]) -> Self {
            Self {
                failing: paths.to_vec(),
                ..Default::default()
            }
        }

        fn opened(&self) -> Vec<PathBuf> {
            self.opened.borrow().clone()
        }
    }

    impl LibraryOpener for RecordingOpener {
        type Handle = PathBuf;

        fn open(&self, path: &Path) -> Result<PathBuf, NativeError> {
            self.opened.borrow_mut().push(path.to_path_buf());
            if self.failing.iter().any(|p| p == path) {
                return Err(format!("cannot open {}", path.display()).into());
            }
            Ok(path.to_path_buf())
        }
    }

    /// Handle that writes to a shared log when dropped.
    struct LoggedHandle {
        path: PathBuf,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Drop for LoggedHandle {
        fn drop(&mut self) {
            self.log.borrow_mut().push(format!("drop {}", self.path.display()));
        }
    }

    struct LoggingOpener {
        log: Rc<RefCell<Vec<String>>>,
        failing: Vec<PathBuf>,
    }

    impl LibraryOpener for LoggingOpener {
        type Handle = LoggedHandle;

        fn open(&self, path: &Path) -> Result<LoggedHandle, NativeError> {
            self.log.borrow_mut().push(format!("open {}", path.display()));
            if self.failing.iter().any(|p| p == path) {
                return Err(format!("cannot open {}", path.display()).into());
            }
            Ok(LoggedHandle {
                path: path.to_path_buf(),
                log: Rc::clone(&self.log),
            })
        }
    }

    struct FakeSearch {
        result: Option<PathBuf>,
        calls: Cell<usize>,
    }

    impl FakeSearch {
        fn returning(result: Option<&str>) -> Self {
            Self {
                result: result.map(PathBuf::from),
                calls: Cell::new(0),
            }
        }
    }

    impl LibrarySearch for FakeSearch {
        fn find(&self, name: &str) -> Option<PathBuf> {
            assert_eq!(name, "zbar");
            self.calls.set(self.calls.get() + 1);
            self.result.clone()
        }
    }

    fn installed() -> SearchLocation {
        SearchLocation::Directory(PathBuf::from("/opt/app"))
    }

    fn windows_loader(
        width: AddressWidth,
        opener: RecordingOpener,
    ) -> Loader<RecordingOpener, FakeSearch> {
        Loader::new(
            opener,
            FakeSearch::returning(None),
            PlatformProfile::WindowsLike { width },
            LoaderConfig::default(),
        )
        .with_installed_dir(Some(installed()))
    }

    fn posix_loader(
        opener: RecordingOpener,
        search: FakeSearch,
        config: LoaderConfig,
    ) -> Loader<RecordingOpener, FakeSearch> {
        Loader::new(opener, search, PlatformProfile::PosixLike, config)
    }

    #[test]
    fn windows_64_loads_dependency_first() {
        let loader = windows_loader(AddressWidth::Bits64, RecordingOpener::default());
        let loaded = loader.load().unwrap();

        assert_eq!(
            loader.opener.opened(),
            vec![PathBuf::from("libiconv.dll"), PathBuf::from("libzbar-64.dll")]
        );
        assert_eq!(loaded.path(), Path::new("libzbar-64.dll"));
        assert_eq!(loaded.dependencies(), &[PathBuf::from("libiconv.dll")]);
        assert_eq!(loader.search.calls.get(), 0);
    }

    #[test]
    fn windows_32_uses_32_bit_pair() {
        let loader = windows_loader(AddressWidth::Bits32, RecordingOpener::default());
        loader.load().unwrap();

        let opened = loader.opener.opened();
        assert_eq!(
            opened,
            vec![PathBuf::from("libiconv-2.dll"), PathBuf::from("libzbar-32.dll")]
        );
        assert!(!opened.iter().any(|p| p.to_string_lossy().contains("64")));
    }

    #[test]
    fn windows_falls_back_to_installed_dir() {
        let opener = RecordingOpener::failing(&[PathBuf::from("libzbar-64.dll")]);
        let loader = windows_loader(AddressWidth::Bits64, opener);
        let loaded = loader.load().unwrap();

        let dir = Path::new("/opt/app");
        assert_eq!(
            loader.opener.opened(),
            vec![
                PathBuf::from("libiconv.dll"),
                PathBuf::from("libzbar-64.dll"),
                dir.join("libiconv.dll"),
                dir.join("libzbar-64.dll"),
            ]
        );
        assert_eq!(loaded.path(), dir.join("libzbar-64.dll"));
        assert_eq!(loaded.dependencies(), &[dir.join("libiconv.dll")]);
    }

    #[test]
    fn windows_dependency_failure_skips_main_library() {
        let dir = Path::new("/opt/app");
        let opener = RecordingOpener::failing(&[PathBuf::from("libiconv.dll")]);
        let loader = windows_loader(AddressWidth::Bits64, opener);
        loader.load().unwrap();

        assert_eq!(
            loader.opener.opened(),
            vec![
                PathBuf::from("libiconv.dll"),
                dir.join("libiconv.dll"),
                dir.join("libzbar-64.dll"),
            ]
        );
    }

    #[test]
    fn windows_surfaces_second_error() {
        let dir = Path::new("/opt/app");
        let opener = RecordingOpener::failing(&[
            PathBuf::from("libzbar-64.dll"),
            dir.join("libzbar-64.dll"),
        ]);
        let loader = windows_loader(AddressWidth::Bits64, opener);
        let err = loader.load().unwrap_err();

        match &err {
            LoaderError::LoadFailure { path, .. } => assert_eq!(path, &dir.join("libzbar-64.dll")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains(&dir.join("libzbar-64.dll").display().to_string()));
        assert_eq!(loader.opener.opened().len(), 4);
    }

    #[test]
    fn windows_without_installed_dir_has_one_tier() {
        let opener = RecordingOpener::failing(&[PathBuf::from("libzbar-64.dll")]);
        let loader = windows_loader(AddressWidth::Bits64, opener).with_installed_dir(None);
        let err = loader.load().unwrap_err();

        assert_eq!(err.path(), Some(Path::new("libzbar-64.dll")));
        assert_eq!(loader.opener.opened().len(), 2);
    }

    #[test]
    fn windows_plan_lists_both_tiers() {
        let loader = windows_loader(AddressWidth::Bits64, RecordingOpener::default());
        let plan = loader.plan().unwrap();
        assert_eq!(plan.attempts().len(), 2);
        assert_eq!(
            plan.attempts()[1],
            LoadAttempt {
                dependencies: vec![Path::new("/opt/app").join("libiconv.dll")],
                library: Path::new("/opt/app").join("libzbar-64.dll"),
            }
        );
        assert!(plan.to_string().starts_with("1. libiconv.dll -> libzbar-64.dll\n2. "));
    }

    #[test]
    fn multiple_dependencies_load_in_declared_order() {
        let candidate = CandidateName {
            library: "main.dll",
            dependencies: &["a.dll", "b.dll", "c.dll"],
        };
        let strategy = ResolutionStrategy::WindowsLike {
            candidate,
            locations: vec![SearchLocation::DefaultSearch],
        };
        let opener = RecordingOpener::default();
        let plan = strategy.plan(&FakeSearch::returning(None)).unwrap();
        let loaded = plan.execute(&opener).unwrap();

        let expected: Vec<PathBuf> = ["a.dll", "b.dll", "c.dll", "main.dll"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(opener.opened(), expected);
        assert_eq!(loaded.dependencies().len(), 3);
    }

    #[test]
    fn posix_override_skips_search() {
        let config = LoaderConfig::default().with_override("/custom/libzbar.so.0");
        let loader = posix_loader(
            RecordingOpener::default(),
            FakeSearch::returning(Some("/usr/lib/libzbar.so.0")),
            config,
        );
        let loaded = loader.load().unwrap();

        assert_eq!(loader.opener.opened(), vec![PathBuf::from("/custom/libzbar.so.0")]);
        assert_eq!(loader.search.calls.get(), 0);
        assert!(loaded.dependencies().is_empty());
    }

    #[test]
    fn posix_bad_override_fails_without_fallback() {
        let opener = RecordingOpener::failing(&[PathBuf::from("/custom/libzbar.so.0")]);
        let config = LoaderConfig::default().with_override("/custom/libzbar.so.0");
        let search = FakeSearch::returning(Some("/usr/lib/libzbar.so.0"));
        let loader = posix_loader(opener, search, config);
        let err = loader.load().unwrap_err();

        assert_eq!(err.path(), Some(Path::new("/custom/libzbar.so.0")));
        assert_eq!(loader.opener.opened().len(), 1);
        assert_eq!(loader.search.calls.get(), 0);
    }

    #[test]
    fn posix_not_found_loads_nothing() {
        let loader = posix_loader(
            RecordingOpener::default(),
            FakeSearch::returning(None),
            LoaderConfig::default(),
        );
        let err = loader.load().unwrap_err();

        assert!(matches!(err, LoaderError::LibraryNotFound { .. }));
        assert!(err.to_string().contains("ZBAR_PATH"));
        assert!(loader.opener.opened().is_empty());
        assert_eq!(loader.search.calls.get(), 1);
    }

    #[test]
    fn posix_loads_search_result() {
        let loader = posix_loader(
            RecordingOpener::default(),
            FakeSearch::returning(Some("/usr/lib/x86_64-linux-gnu/libzbar.so.0")),
            LoaderConfig::default(),
        );
        let loaded = loader.load().unwrap();

        assert_eq!(
            loader.opener.opened(),
            vec![PathBuf::from("/usr/lib/x86_64-linux-gnu/libzbar.so.0")]
        );
        assert_eq!(loaded.path(), Path::new("/usr/lib/x86_64-linux-gnu/libzbar.so.0"));
    }

    #[test]
    fn posix_ignores_installed_dir() {
        let loader = posix_loader(
            RecordingOpener::default(),
            FakeSearch::returning(Some("libzbar.so.0")),
            LoaderConfig::default(),
        )
        .with_installed_dir(Some(installed()));
        assert_eq!(loader.plan().unwrap().attempts(), &[LoadAttempt::single("libzbar.so.0")]);
    }

    #[test]
    fn loading_twice_succeeds() {
        let loader = posix_loader(
            RecordingOpener::default(),
            FakeSearch::returning(Some("libzbar.so.0")),
            LoaderConfig::default(),
        );
        let first = loader.load().unwrap();
        let second = loader.load().unwrap();
        assert_eq!(first.path(), second.path());
    }

    #[test]
    fn into_parts_returns_handles() {
        let loader = windows_loader(AddressWidth::Bits64, RecordingOpener::default());
        let (library, deps) = loader.load().unwrap().into_parts();
        assert_eq!(library, PathBuf::from("libzbar-64.dll"));
        assert_eq!(deps, vec![PathBuf::from("libiconv.dll")]);
    }

    #[test]
    fn failed_tier_is_released_and_library_drops_before_dependencies() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let opener = LoggingOpener {
            log: Rc::clone(&log),
            failing: vec![PathBuf::from("libzbar-64.dll")],
        };
        let loader = Loader::new(
            opener,
            FakeSearch::returning(None),
            PlatformProfile::WindowsLike {
                width: AddressWidth::Bits64,
            },
            LoaderConfig::default(),
        )
        .with_installed_dir(Some(installed()));

        let loaded = loader.load().unwrap();
        drop(loaded);

        let dir = Path::new("/opt/app");
        let expected = vec![
            "open libiconv.dll".to_string(),
            "open libzbar-64.dll".to_string(),
            "drop libiconv.dll".to_string(),
            format!("open {}", dir.join("libiconv.dll").display()),
            format!("open {}", dir.join("libzbar-64.dll").display()),
            format!("drop {}", dir.join("libzbar-64.dll").display()),
            format!("drop {}", dir.join("libiconv.dll").display()),
        ];
        assert_eq!(*log.borrow(), expected);
    }

    #[test]
    fn executing_a_plan_does_not_search_again() {
        let loader = posix_loader(
            RecordingOpener::default(),
            FakeSearch::returning(Some("/usr/lib/libzbar.so.0")),
            LoaderConfig::default(),
        );
        let plan = loader.plan().unwrap();
        let loaded = loader.execute(&plan).unwrap();

        assert_eq!(loader.search.calls.get(), 1);
        assert_eq!(loaded.path(), plan.attempts()[0].library.as_path());
        assert_eq!(loader.opener.opened(), vec![PathBuf::from("/usr/lib/libzbar.so.0")]);
    }
}
