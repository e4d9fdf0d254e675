//! Path resolution for the hosting bootstrap.
//!
//! The runtime host needs three things from the filesystem before it can do anything else:
//! the canonical location of the running executable, canonical forms of user supplied
//! directories, and the directory part of a directory-suffixed path.
//!
//! # Key Components
//!
//! - [`entrypoint_executable_path`] - Absolute path of the current process image
//! - [`absolute_path`] - Canonicalization of an existing path (`.`, `..`, symlinks)
//! - [`DirectoryPath`] - A path known to end in the platform separator
//! - [`get_directory`] - String form of [`DirectoryPath::directory`]
//!
//! # Directory-Suffixed Paths
//!
//! Runtime hosts traditionally pass directories around with a trailing separator and derive
//! the bare directory by dropping exactly that one character. Passing a file path instead is
//! an easy mistake, so [`DirectoryPath`] makes the precondition part of the type: it can only
//! be built from a string that already ends in a separator, or from a directory path to
//! which the separator is appended. The bootstrap derives the application directory from
//! the located assembly root this way.

use crate::{Error, Result};
use std::{
    fmt,
    path::{Path, PathBuf, MAIN_SEPARATOR},
};

/// Self-referential link to the process image on platforms that provide one.
#[cfg(target_os = "linux")]
const SELF_EXE_LINK: Option<&str> = Some("/proc/self/exe");

#[cfg(all(unix, not(target_os = "linux"), not(target_vendor = "apple")))]
const SELF_EXE_LINK: Option<&str> = Some("/proc/curproc/exe");

#[cfg(any(not(unix), target_vendor = "apple"))]
const SELF_EXE_LINK: Option<&str> = None;

/// Returns the canonical absolute path of the currently running executable.
///
/// On Linux and the BSDs the process image link under `/proc` is resolved; elsewhere the
/// platform introspection API behind [`std::env::current_exe`] is used. Either way the result
/// is canonicalized, so symbolic links are fully resolved and there is no trailing separator.
///
/// # Errors
/// Returns [`Error::PathResolution`] if the executable path cannot be determined.
pub fn entrypoint_executable_path() -> Result<PathBuf> {
    if let Some(link) = SELF_EXE_LINK {
        if let Ok(path) = absolute_path(link) {
            return Ok(path);
        }
    }

    let exe = std::env::current_exe().map_err(|e| Error::PathResolution {
        path: "<current executable>".to_string(),
        reason: e.to_string(),
    })?;
    absolute_path(exe)
}

/// Canonicalizes an existing path.
///
/// Resolves `.`, `..` and symbolic links. The path must exist. Applying this function to its
/// own output returns the same value.
///
/// # Errors
/// Returns [`Error::PathResolution`] if the path does not exist or cannot be read.
pub fn absolute_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let resolved = std::fs::canonicalize(path).map_err(|e| Error::PathResolution {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if resolved.as_os_str().is_empty() {
        return Err(Error::PathResolution {
            path: path.display().to_string(),
            reason: "resolved to an empty path".to_string(),
        });
    }

    Ok(resolved)
}

/// Returns the directory part of a directory-suffixed path string.
///
/// Exactly one trailing separator character is stripped; nothing else is touched. A string
/// that does not end in the platform separator is rejected, this is not a general `dirname`.
///
/// # Errors
/// Returns [`Error::NotADirectoryPath`] if `path` does not end in a separator.
pub fn get_directory(path: &str) -> Result<String> {
    DirectoryPath::parse(path).map(|dir| dir.directory().to_string())
}

/// A path that is known to end in the platform separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryPath(String);

impl DirectoryPath {
    /// Wraps a string that already ends in the platform separator.
    ///
    /// # Errors
    /// Returns [`Error::NotADirectoryPath`] if the string has no trailing separator.
    pub fn parse(path: &str) -> Result<Self> {
        if path.ends_with(MAIN_SEPARATOR) {
            Ok(Self(path.to_string()))
        } else {
            Err(Error::NotADirectoryPath(path.to_string()))
        }
    }

    /// Builds a directory-suffixed path from a directory.
    ///
    /// An empty path denotes the current directory and becomes `./`. A path that already
    /// ends in a separator is kept as is.
    ///
    /// # Errors
    /// Returns [`Error::PathResolution`] if the path is not valid UTF-8.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let text = dir.to_str().ok_or_else(|| Error::PathResolution {
            path: dir.display().to_string(),
            reason: "path is not valid UTF-8".to_string(),
        })?;

        let mut owned = if text.is_empty() {
            ".".to_string()
        } else {
            text.to_string()
        };
        if !owned.ends_with(MAIN_SEPARATOR) {
            owned.push(MAIN_SEPARATOR);
        }
        Ok(Self(owned))
    }

    /// The directory without its single trailing separator.
    ///
    /// For the root directory (`/`) this yields an empty string, matching the host
    /// convention of stripping one character only.
    #[must_use]
    pub fn directory(&self) -> &str {
        &self.0[..self.0.len() - MAIN_SEPARATOR.len_utf8()]
    }

    /// The full directory-suffixed form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins a file name onto this directory.
    #[must_use]
    pub fn join(&self, file_name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.0, file_name))
    }
}

impl fmt::Display for DirectoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<Path> for DirectoryPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}
