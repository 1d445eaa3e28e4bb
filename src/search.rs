//! Library-name search.
//!
//! Resolves a logical library name such as `zbar` to a file the dynamic
//! loader can open, the way the platform's own tooling would:
//!
//! - ELF systems: the `ldconfig` cache first, then a scan of
//!   `LD_LIBRARY_PATH` and the standard library directories.
//! - Apple systems: the `dyld` search directories.
//!
//! Everything read from the environment is captured in [`SearchEnv`] before
//! the search runs. A search never fails: anything that goes wrong while
//! probing is logged and counts as "no candidate".

use memmap2::Mmap;
use object::{Architecture, FileKind, Object, ObjectKind};
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Standard ELF library directories, searched after `LD_LIBRARY_PATH`.
const ELF_DEFAULT_DIRS: &[&str] = &["/lib", "/usr/lib", "/usr/local/lib", "/lib64", "/usr/lib64"];

/// `dyld`'s fallback list when `DYLD_FALLBACK_LIBRARY_PATH` is unset.
const DYLD_DEFAULT_FALLBACK: &[&str] = &["/usr/local/lib", "/lib", "/usr/lib", "/opt/homebrew/lib"];

const LDCONFIG_CANDIDATES: &[&str] = &["/sbin/ldconfig", "/usr/sbin/ldconfig", "ldconfig"];

/// Resolves a logical library name to a loadable path.
pub trait LibrarySearch {
    fn find(&self, name: &str) -> Option<PathBuf>;
}

/// Environment inputs to the system search.
#[derive(Debug, Clone, Default)]
pub struct SearchEnv {
    pub ld_library_path: Option<OsString>,
    pub dyld_library_path: Option<OsString>,
    pub dyld_fallback_library_path: Option<OsString>,
    pub home: Option<PathBuf>,
}

impl SearchEnv {
    pub fn from_env() -> Self {
        Self {
            ld_library_path: std::env::var_os("LD_LIBRARY_PATH"),
            dyld_library_path: std::env::var_os("DYLD_LIBRARY_PATH"),
            dyld_fallback_library_path: std::env::var_os("DYLD_FALLBACK_LIBRARY_PATH"),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

/// The platform's own library-name search.
#[derive(Debug, Clone)]
pub struct SystemSearch {
    env: SearchEnv,
    use_ldconfig: bool,
}

impl SystemSearch {
    pub fn new(env: SearchEnv) -> Self {
        Self { env, use_ldconfig: true }
    }

    pub fn from_env() -> Self {
        Self::new(SearchEnv::from_env())
    }

    /// Skip the `ldconfig` cache and only scan directories.
    pub fn without_ldconfig(mut self) -> Self {
        self.use_ldconfig = false;
        self
    }

    fn find_elf(&self, name: &str) -> Option<PathBuf> {
        if self.use_ldconfig {
            if let Some(listing) = ldconfig_listing() {
                if let Some(path) = parse_ldconfig(&listing, name, host_abi_tag()) {
                    tracing::debug!("ldconfig cache resolved {} to {}", name, path.display());
                    return Some(path);
                }
            }
        }

        self.elf_dirs()
            .iter()
            .find_map(|dir| scan_elf_dir(dir, name))
    }

    fn elf_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .env
            .ld_library_path
            .as_deref()
            .map(|p| std::env::split_paths(p).filter(|d| !d.as_os_str().is_empty()).collect())
            .unwrap_or_default();

        if let Some(triple) = multiarch_triple(std::env::consts::ARCH) {
            for base in ["/lib", "/usr/lib"] {
                dirs.push(Path::new(base).join(triple));
            }
        }
        dirs.extend(ELF_DEFAULT_DIRS.iter().map(PathBuf::from));
        dirs
    }

    fn find_dyld(&self, name: &str) -> Option<PathBuf> {
        let file_names = [
            PathBuf::from(format!("lib{name}.dylib")),
            PathBuf::from(format!("{name}.dylib")),
            Path::new(&format!("{name}.framework")).join(name),
        ];

        for dir in self.dyld_dirs() {
            for file_name in &file_names {
                let candidate = dir.join(file_name);
                tracing::trace!("probing {}", candidate.display());
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn dyld_dirs(&self) -> Vec<PathBuf> {
        let split = |value: &Option<OsString>| -> Vec<PathBuf> {
            value
                .as_deref()
                .map(|p| std::env::split_paths(p).filter(|d| !d.as_os_str().is_empty()).collect())
                .unwrap_or_default()
        };

        let mut dirs = split(&self.env.dyld_library_path);
        let fallback = split(&self.env.dyld_fallback_library_path);
        if fallback.is_empty() {
            if let Some(home) = &self.env.home {
                dirs.push(home.join("lib"));
            }
            dirs.extend(DYLD_DEFAULT_FALLBACK.iter().map(PathBuf::from));
        } else {
            dirs.extend(fallback);
        }
        dirs
    }
}

impl LibrarySearch for SystemSearch {
    fn find(&self, name: &str) -> Option<PathBuf> {
        let found = if cfg!(target_vendor = "apple") {
            self.find_dyld(name)
        } else {
            self.find_elf(name)
        };
        if found.is_none() {
            tracing::debug!("no shared library found for {}", name);
        }
        found
    }
}

/// Runs `ldconfig -p` and returns its output.
fn ldconfig_listing() -> Option<String> {
    for program in LDCONFIG_CANDIDATES {
        match Command::new(program).arg("-p").env("LC_ALL", "C").env("LANG", "C").output() {
            Ok(output) if output.status.success() => {
                return Some(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            Ok(output) => {
                tracing::debug!("{} -p exited with {}", program, output.status);
            }
            Err(e) => {
                tracing::trace!("cannot run {}: {}", program, e);
            }
        }
    }
    None
}

/// The ABI flag `ldconfig -p` prints for libraries of this process's
/// architecture, or `None` to accept any entry.
pub fn host_abi_tag() -> Option<&'static str> {
    match std::env::consts::ARCH {
        "x86_64" => Some("x86-64"),
        "aarch64" => Some("AArch64"),
        "powerpc64" | "s390x" | "sparc64" => Some("64bit"),
        _ => None,
    }
}

/// Debian multiarch directory name for a Rust target architecture.
fn multiarch_triple(arch: &str) -> Option<&'static str> {
    let triple = match arch {
        "x86_64" => "x86_64-linux-gnu",
        "x86" => "i386-linux-gnu",
        "aarch64" => "aarch64-linux-gnu",
        "arm" => "arm-linux-gnueabihf",
        "powerpc64" if cfg!(target_endian = "little") => "powerpc64le-linux-gnu",
        "powerpc64" => "powerpc64-linux-gnu",
        "s390x" => "s390x-linux-gnu",
        "riscv64" => "riscv64-linux-gnu",
        "loongarch64" => "loongarch64-linux-gnu",
        _ => return None,
    };
    Some(triple)
}

fn matches_soname(file_name: &str, name: &str) -> bool {
    let stem = format!("lib{name}.so");
    file_name == stem
        || file_name
            .strip_prefix(&stem)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Picks the first entry of an `ldconfig -p` listing for `name` whose flags
/// carry `abi` (any entry when `abi` is `None`).
///
/// Entries look like
/// `libzbar.so.0 (libc6,x86-64) => /usr/lib/x86_64-linux-gnu/libzbar.so.0`.
pub fn parse_ldconfig(listing: &str, name: &str, abi: Option<&str>) -> Option<PathBuf> {
    listing.lines().find_map(|line| {
        let (entry, path) = line.split_once(" => ")?;
        let entry = entry.trim();
        let (soname, rest) = entry.split_once(char::is_whitespace)?;
        if !matches_soname(soname, name) {
            return None;
        }

        let flags = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
        if let Some(abi) = abi {
            if !flags.split(',').any(|flag| flag.trim() == abi) {
                return None;
            }
        }

        let path = path.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    })
}

/// First file in `dir` named `lib<name>.so[.*]` that is a shared object for
/// this architecture.
fn scan_elf_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::trace!("skipping {}: {}", dir.display(), e);
            return None;
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|file_name| matches_soname(file_name, name))
        })
        .map(|entry| entry.path())
        .collect();
    matches.sort();

    matches.into_iter().find(|path| {
        let ok = is_loadable_object(path);
        tracing::trace!("probing {}: {}", path.display(), if ok { "ok" } else { "rejected" });
        ok
    })
}

/// Whether `path` is an ELF shared object built for this process's
/// architecture. Other object formats are rejected.
pub fn is_loadable_object(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    if file.metadata().map(|m| m.len() < 16).unwrap_or(true) {
        return false;
    }
    // SAFETY: the mapping is read-only and dropped before returning. A
    // concurrent truncation of a system library is not something we guard
    // against.
    let mmap = match unsafe { Mmap::map(&file) } {
        Ok(mmap) => mmap,
        Err(_) => return false,
    };

    match FileKind::parse(&*mmap) {
        Ok(FileKind::Elf32) | Ok(FileKind::Elf64) => {}
        _ => return false,
    }

    let obj = match object::File::parse(&*mmap) {
        Ok(obj) => obj,
        Err(_) => return false,
    };
    if obj.kind() != ObjectKind::Dynamic {
        return false;
    }
    match host_architecture() {
        Some(arch) => obj.architecture() == arch,
        None => true,
    }
}

fn host_architecture() -> Option<Architecture> {
    match std::env::consts::ARCH {
        "x86_64" => Some(Architecture::X86_64),
        "x86" => Some(Architecture::I386),
        "aarch64" => Some(Architecture::Aarch64),
        "arm" => Some(Architecture::Arm),
        "riscv64" => Some(Architecture::Riscv64),
        "powerpc64" => Some(Architecture::PowerPc64),
        "s390x" => Some(Architecture::S390x),
        "loongarch64" => Some(Architecture::LoongArch64),
        _ => None,
    }
}
