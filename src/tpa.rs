//! Trusted-assembly list and native search path construction.
//!
//! The runtime loads managed binaries named in its trusted-assembly list (TPA) without any
//! further probing. The list is built by scanning directories for managed binaries, with a
//! fixed extension priority so that a native-image build of an assembly shadows the IL-only
//! build of the same assembly:
//!
//! 1. `.ni.dll`
//! 2. `.dll`
//! 3. `.ni.exe`
//! 4. `.exe`
//!
//! Only one entry is kept per base name (file name minus the matched extension), across all
//! extensions and all directories added to the same list. The first one found wins.
//!
//! # Best-Effort Scanning
//!
//! A directory that cannot be opened is skipped, not reported as an error. The outcome of
//! every scan is still returned as a [`DirectoryScan`] so callers can tell an unusable
//! directory apart from one that simply contributed nothing.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrbridge::tpa::{DirectoryScan, TrustedAssemblyList};
//!
//! let mut tpa = TrustedAssemblyList::new();
//! match tpa.add_directory("/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0") {
//!     DirectoryScan::Added(count) => println!("added {count} assemblies"),
//!     DirectoryScan::NoEntries => println!("nothing new"),
//!     DirectoryScan::Unusable(reason) => println!("skipped: {reason}"),
//! }
//! println!("{}", tpa.join());
//! ```

use crate::paths;
use std::{
    collections::HashSet,
    fs::DirEntry,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Managed binary extensions in descending priority.
pub const TPA_EXTENSIONS: [&str; 4] = [".ni.dll", ".dll", ".ni.exe", ".exe"];

/// Separator between entries of a path list passed to the runtime.
#[must_use]
pub const fn path_list_delimiter() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

fn join_paths<P: AsRef<Path>>(paths: &[P]) -> String {
    let delimiter = path_list_delimiter().to_string();
    paths
        .iter()
        .map(|p| p.as_ref().to_string_lossy())
        .collect::<Vec<_>>()
        .join(&delimiter)
}

/// Outcome of scanning one directory into a [`TrustedAssemblyList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryScan {
    /// The directory was read and this many new assemblies were appended.
    Added(usize),
    /// The directory was read (or was empty) but contributed no new assembly.
    NoEntries,
    /// The directory could not be opened; the list is unchanged.
    Unusable(String),
}

impl DirectoryScan {
    /// Number of assemblies appended by the scan.
    #[must_use]
    pub fn added(&self) -> usize {
        match self {
            DirectoryScan::Added(count) => *count,
            _ => 0,
        }
    }
}

/// Ordered, deduplicated list of managed binaries the runtime may load.
#[derive(Debug, Clone, Default)]
pub struct TrustedAssemblyList {
    /// Entries in discovery order
    entries: Vec<PathBuf>,
    /// Base names already present, across all extensions
    base_names: HashSet<String>,
    /// Full paths already present
    full_paths: HashSet<PathBuf>,
}

impl TrustedAssemblyList {
    /// Create a new empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an explicit assembly path.
    ///
    /// Used for the bridge assembly itself, which must be first in the list so the runtime
    /// cannot pick up a different copy from the framework directory. The base name is
    /// recorded so later directory scans do not add a second copy.
    ///
    /// Returns `false` if the base name or path is already present.
    pub fn push_assembly<P: Into<PathBuf>>(&mut self, path: P) -> bool {
        let path = path.into();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let base = strip_tpa_extension(file_name).unwrap_or(file_name).to_string();

        if self.base_names.contains(&base) || self.full_paths.contains(&path) {
            return false;
        }
        self.base_names.insert(base);
        self.full_paths.insert(path.clone());
        self.entries.push(path);
        true
    }

    /// Scans `directory` and appends every managed binary not yet represented.
    ///
    /// The directory is read once. That single snapshot is then walked once per extension in
    /// [`TPA_EXTENSIONS`] order, so results reflect one consistent view of the directory.
    /// Only regular files count; symlinks and entries of unknown type are re-stat'ed
    /// following links.
    ///
    /// An empty `directory` string is a no-op.
    pub fn add_directory<P: AsRef<Path>>(&mut self, directory: P) -> DirectoryScan {
        let directory = directory.as_ref();
        if directory.as_os_str().is_empty() {
            return DirectoryScan::NoEntries;
        }

        let snapshot: Vec<DirEntry> = match std::fs::read_dir(directory) {
            Ok(entries) => entries.filter_map(std::result::Result::ok).collect(),
            Err(e) => {
                warn!(dir = %directory.display(), error = %e, "skipping unreadable directory");
                return DirectoryScan::Unusable(e.to_string());
            }
        };

        // each file belongs to the most specific extension it carries, so `X.ni.dll` is
        // never seen again as base `X.ni` during the `.dll` pass
        let files: Vec<(String, &'static str)> = snapshot
            .iter()
            .filter(|entry| is_regular_file(entry))
            .filter_map(|entry| match entry.file_name().into_string() {
                Ok(name) => Some(name),
                Err(name) => {
                    debug!(dir = %directory.display(), ?name, "skipping non UTF-8 file name");
                    None
                }
            })
            .filter_map(|name| tpa_extension(&name).map(|ext| (name, ext)))
            .collect();

        let mut added = 0;
        for ext in TPA_EXTENSIONS {
            for (file_name, file_ext) in &files {
                if *file_ext != ext {
                    continue;
                }
                let base = &file_name[..file_name.len() - ext.len()];
                if self.base_names.contains(base) {
                    continue;
                }

                let full_path = directory.join(file_name);
                if !self.full_paths.insert(full_path.clone()) {
                    continue;
                }
                self.base_names.insert(base.to_string());
                self.entries.push(full_path);
                added += 1;
            }
        }

        debug!(dir = %directory.display(), added, "scanned directory for trusted assemblies");
        if added == 0 {
            DirectoryScan::NoEntries
        } else {
            DirectoryScan::Added(added)
        }
    }

    /// Whether an assembly with this base name is already listed.
    #[must_use]
    pub fn contains_base_name(&self, base_name: &str) -> bool {
        self.base_names.contains(base_name)
    }

    /// Entries in discovery order.
    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The delimiter-joined form handed to the runtime.
    #[must_use]
    pub fn join(&self) -> String {
        join_paths(&self.entries)
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.base_names.clear();
        self.full_paths.clear();
    }
}

/// Ordered list of directories probed for native libraries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPathList {
    dirs: Vec<PathBuf>,
}

impl SearchPathList {
    /// Create a new empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a directory, keeping order. Empty paths are ignored.
    pub fn push<P: Into<PathBuf>>(&mut self, dir: P) {
        let dir = dir.into();
        if !dir.as_os_str().is_empty() {
            self.dirs.push(dir);
        }
    }

    /// Directories in order.
    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Whether the list has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// The delimiter-joined form handed to the runtime.
    #[must_use]
    pub fn join(&self) -> String {
        join_paths(&self.dirs)
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.dirs.clear();
    }
}

/// Builds the native library search path list.
///
/// The order is the application directory, the runtime directory, then every override
/// directory. Override directories other than the runtime directory also feed `tpa`, so
/// managed binaries placed next to extra native libraries are loadable too.
///
/// `app_dir` and `runtime_dir` are expected to be absolute already. Override directories are
/// made absolute here; one that does not resolve is skipped with a warning.
pub fn build_native_search_paths(
    app_dir: &Path,
    runtime_dir: &Path,
    override_dirs: &[PathBuf],
    tpa: &mut TrustedAssemblyList,
) -> SearchPathList {
    let mut paths = SearchPathList::new();
    paths.push(app_dir);
    paths.push(runtime_dir);

    for dir in override_dirs {
        let dir = match paths::absolute_path(dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unresolvable library directory");
                continue;
            }
        };
        if dir != runtime_dir {
            tpa.add_directory(&dir);
        }
        paths.push(dir);
    }

    paths
}

/// Strips the first matching extension of [`TPA_EXTENSIONS`] from `file_name`.
///
/// Returns `None` when no extension matches or nothing would be left of the name.
#[must_use]
pub fn strip_tpa_extension(file_name: &str) -> Option<&str> {
    tpa_extension(file_name).map(|ext| &file_name[..file_name.len() - ext.len()])
}

fn tpa_extension(file_name: &str) -> Option<&'static str> {
    TPA_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| file_name.len() > ext.len() && file_name.ends_with(ext))
}

fn is_regular_file(entry: &DirEntry) -> bool {
    match entry.file_type() {
        Ok(kind) if kind.is_file() => true,
        Ok(kind) if kind.is_dir() => false,
        // symlink or a filesystem that does not report entry types
        _ => std::fs::metadata(entry.path()).is_ok_and(|meta| meta.is_file()),
    }
}
