//! Locating the bridge assembly and the runtime library directory.
//!
//! The embedding interpreter hands over its module search path as an ordered list of roots.
//! The bridge assembly is looked up by exact file name in each root, in order, and the first
//! root that contains it wins. Roots are never merged or ranked; once a match is found, later
//! roots are not consulted.

use crate::{paths, Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Finds the first root in `search_roots` that contains a file named `assembly_file`.
///
/// An empty root string denotes the current directory. Entries are compared by exact,
/// case-sensitive file name. Roots that cannot be listed are skipped.
///
/// # Arguments
/// * `search_roots` - Ordered candidate directories
/// * `assembly_file` - File name of the bridge assembly, e.g. `Python.Runtime.dll`
///
/// # Returns
/// The absolute path of the matching root directory.
///
/// # Errors
/// Returns [`Error::AssemblyNotFound`] if no root contains the file, or the matching roots
/// could not be made absolute.
pub fn locate<S: AsRef<str>>(search_roots: &[S], assembly_file: &str) -> Result<PathBuf> {
    locate_with(search_roots, assembly_file, |dir: &Path| paths::absolute_path(dir))
}

fn locate_with<S, F>(search_roots: &[S], assembly_file: &str, resolve: F) -> Result<PathBuf>
where
    S: AsRef<str>,
    F: Fn(&Path) -> Result<PathBuf>,
{
    for root in search_roots {
        let root = root.as_ref();
        let dir = if root.is_empty() { Path::new(".") } else { Path::new(root) };

        if !contains_file(dir, assembly_file) {
            continue;
        }
        match resolve(dir) {
            Ok(found) => {
                debug!(root = %found.display(), file = assembly_file, "located bridge assembly");
                return Ok(found);
            }
            Err(e) => {
                debug!(root = %dir.display(), error = %e, "matching root not resolvable, skipping");
            }
        }
    }

    Err(Error::AssemblyNotFound {
        file: assembly_file.to_string(),
        roots: search_roots.len(),
    })
}

/// Resolves the directory holding the runtime shared library.
///
/// When `override_path` is given its absolute form is returned. Otherwise the directory of
/// the running executable is used, so the runtime defaults to living next to the host binary.
///
/// # Errors
/// Returns [`Error::PathResolution`] if the chosen directory does not exist.
pub fn resolve_runtime_directory(
    entry_executable_path: &Path,
    override_path: Option<&Path>,
) -> Result<PathBuf> {
    let base = match override_path {
        Some(path) => path,
        None => entry_executable_path
            .parent()
            .ok_or_else(|| Error::PathResolution {
                path: entry_executable_path.display().to_string(),
                reason: "executable path has no parent directory".to_string(),
            })?,
    };

    paths::absolute_path(base)
}

fn contains_file(dir: &Path, file_name: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        debug!(root = %dir.display(), "search root not readable, skipping");
        return false;
    };

    entries
        .filter_map(std::result::Result::ok)
        .any(|entry| entry.file_name().to_str() == Some(file_name))
}
