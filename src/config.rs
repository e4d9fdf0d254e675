//! Host configuration for the runtime bootstrap.
//!
//! [`HostConfig`] gathers every knob the bootstrap consults: the bridge assembly and managed
//! entry points, where to look for the assembly, where the runtime lives, extra library
//! directories and the server GC toggle. Values come from defaults, builder methods, or the
//! process environment via [`HostConfig::from_env`].
//!
//! # Environment Variables
//!
//! | variable | effect |
//! |---|---|
//! | `CORECLR_SERVER_GC` | `1` or `true` (any case) enables server GC |
//! | `CORE_LIBRARIES` | extra directories, path-list delimited |
//! | `CORE_ROOT` | runtime directory override |

use crate::tpa::path_list_delimiter;
use std::path::PathBuf;

/// Environment toggle for server garbage collection.
pub const SERVER_GC_VAR: &str = "CORECLR_SERVER_GC";

/// Environment list of additional native/managed library directories.
pub const CORE_LIBRARIES_VAR: &str = "CORE_LIBRARIES";

/// Environment override for the runtime directory.
pub const CORE_ROOT_VAR: &str = "CORE_ROOT";

/// Configuration for hosting the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// File name of the bridge assembly searched for in `search_roots`
    pub assembly_file: String,
    /// Assembly name passed to `coreclr_create_delegate`
    pub assembly_name: String,
    /// Fully qualified name of the type exposing the entry points
    pub type_name: String,
    /// Managed initialize method used in standalone mode
    pub init_method: String,
    /// Managed initialize method used when loaded as an extension module
    pub ext_init_method: String,
    /// Managed shutdown method
    pub shutdown_method: String,
    /// Friendly name of the app domain created by the runtime
    pub app_domain_name: String,
    /// Ordered roots searched for the bridge assembly; empty means current directory
    pub search_roots: Vec<String>,
    /// Runtime directory; next to the host executable when `None`
    pub runtime_dir: Option<PathBuf>,
    /// Extra library directories appended to the native search paths
    pub extra_library_dirs: Vec<PathBuf>,
    /// Value of the `System.GC.Server` start property
    pub server_gc: bool,
    /// Open the runtime library with global symbol visibility
    pub global_symbols: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            assembly_file: "Python.Runtime.dll".to_string(),
            assembly_name: "Python.Runtime".to_string(),
            type_name: "Python.Runtime.PythonEngine".to_string(),
            init_method: "Initialize".to_string(),
            ext_init_method: "InitExt".to_string(),
            shutdown_method: "Shutdown".to_string(),
            app_domain_name: "clrbridge".to_string(),
            search_roots: vec![String::new()],
            runtime_dir: None,
            extra_library_dirs: Vec::new(),
            server_gc: false,
            global_symbols: false,
        }
    }
}

impl HostConfig {
    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// `lookup` receives a variable name and returns its value, if set. Empty segments of
    /// `CORE_LIBRARIES` are dropped; an empty `CORE_ROOT` is ignored.
    #[must_use]
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.server_gc = crate::runtime::server_gc_enabled(lookup(SERVER_GC_VAR).as_deref());

        if let Some(libraries) = lookup(CORE_LIBRARIES_VAR) {
            config.extra_library_dirs = libraries
                .split(path_list_delimiter())
                .filter(|segment| !segment.is_empty())
                .map(PathBuf::from)
                .collect();
        }

        if let Some(root) = lookup(CORE_ROOT_VAR).filter(|root| !root.is_empty()) {
            config.runtime_dir = Some(PathBuf::from(root));
        }

        config
    }

    /// Sets the bridge assembly file name.
    #[must_use]
    pub fn with_assembly_file(mut self, file: impl Into<String>) -> Self {
        self.assembly_file = file.into();
        self
    }

    /// Sets the managed assembly and type exposing the entry points.
    #[must_use]
    pub fn with_entry_type(
        mut self,
        assembly_name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        self.assembly_name = assembly_name.into();
        self.type_name = type_name.into();
        self
    }

    /// Replaces the search roots.
    #[must_use]
    pub fn with_search_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_roots = roots.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the runtime directory.
    #[must_use]
    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// Appends an extra library directory.
    #[must_use]
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_library_dirs.push(dir.into());
        self
    }

    /// Enables or disables server GC.
    #[must_use]
    pub fn server_gc(mut self, enabled: bool) -> Self {
        self.server_gc = enabled;
        self
    }

    /// Enables or disables global symbol visibility for the runtime library.
    #[must_use]
    pub fn global_symbols(mut self, enabled: bool) -> Self {
        self.global_symbols = enabled;
        self
    }
}
