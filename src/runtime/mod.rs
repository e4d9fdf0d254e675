//! Loading and driving the CoreCLR runtime library.
//!
//! The runtime ships as a shared library (`libcoreclr.so`, `libcoreclr.dylib` or
//! `coreclr.dll`) exporting a small host ABI. This module opens that library, resolves the
//! three exports the bootstrap needs and wraps them in safe calls:
//!
//! | export | wrapper |
//! |---|---|
//! | `coreclr_initialize` | [`LoadedRuntime::start`] |
//! | `coreclr_create_delegate` | [`LoadedRuntime::create_delegate`] |
//! | `coreclr_shutdown_2` | [`LoadedRuntime::stop`] |
//!
//! # State Machine
//!
//! A runtime moves through [`RuntimeState`] in one direction only:
//! `Unloaded -> LibraryOpened -> SymbolsResolved -> RuntimeStarted -> DelegatesBound ->
//! ShuttingDown -> Unloaded`. Opening the library and resolving its symbols happen together
//! in [`LoadedRuntime::open`]; a library with a missing export is closed again before the
//! runtime is ever touched.
//!
//! # Symbol Visibility
//!
//! The library is opened with immediate binding. Symbols stay local to the library unless
//! [`LoadFlags::GLOBAL`] is set, which makes them visible process wide. That can shadow
//! same-named symbols elsewhere in the process.

mod properties;

pub use properties::{
    server_gc_enabled, server_gc_value, PropertyKey, RuntimeProperties, APP_DOMAIN_COMPAT_LATEST,
};

use crate::{Error, Result};
use bitflags::bitflags;
use std::{
    ffi::{c_char, c_int, c_uint, c_void, CString},
    path::{Path, PathBuf},
    ptr,
};
use tracing::{debug, info, warn};

/// File name of the runtime shared library on this platform.
#[cfg(target_vendor = "apple")]
pub const CORECLR_LIBRARY: &str = "libcoreclr.dylib";

/// File name of the runtime shared library on this platform.
#[cfg(windows)]
pub const CORECLR_LIBRARY: &str = "coreclr.dll";

/// File name of the runtime shared library on this platform.
#[cfg(not(any(target_vendor = "apple", windows)))]
pub const CORECLR_LIBRARY: &str = "libcoreclr.so";

/// Export that starts the runtime.
pub const INITIALIZE_SYMBOL: &str = "coreclr_initialize";
/// Export that binds a managed method to a native function pointer.
pub const CREATE_DELEGATE_SYMBOL: &str = "coreclr_create_delegate";
/// Export that stops the runtime and reports the latched exit code.
pub const SHUTDOWN_SYMBOL: &str = "coreclr_shutdown_2";

/// `coreclr_initialize`
pub type InitializeFn = unsafe extern "C" fn(
    exe_path: *const c_char,
    app_domain_friendly_name: *const c_char,
    property_count: c_int,
    property_keys: *const *const c_char,
    property_values: *const *const c_char,
    host_handle: *mut *mut c_void,
    domain_id: *mut c_uint,
) -> c_int;

/// `coreclr_create_delegate`
pub type CreateDelegateFn = unsafe extern "C" fn(
    host_handle: *mut c_void,
    domain_id: c_uint,
    entry_point_assembly_name: *const c_char,
    entry_point_type_name: *const c_char,
    entry_point_method_name: *const c_char,
    delegate: *mut *mut c_void,
) -> c_int;

/// `coreclr_shutdown_2`
pub type ShutdownFn = unsafe extern "C" fn(
    host_handle: *mut c_void,
    domain_id: c_uint,
    latched_exit_code: *mut c_int,
) -> c_int;

bitflags! {
    /// How the runtime library is opened.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoadFlags: u32 {
        /// Resolve all symbols when the library is opened
        const NOW = 0b01;
        /// Make the library's symbols visible to subsequently loaded libraries
        const GLOBAL = 0b10;
    }
}

impl Default for LoadFlags {
    fn default() -> Self {
        LoadFlags::NOW
    }
}

/// Progress of a hosted runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RuntimeState {
    /// No library is loaded
    Unloaded,
    /// The runtime library is open
    LibraryOpened,
    /// The host ABI exports are resolved
    SymbolsResolved,
    /// `coreclr_initialize` succeeded
    RuntimeStarted,
    /// The managed entry points are bound
    DelegatesBound,
    /// Teardown is in progress
    ShuttingDown,
}

/// The resolved host ABI exports.
#[derive(Debug, Clone, Copy)]
pub struct HostSymbols {
    /// `coreclr_initialize`
    pub initialize: InitializeFn,
    /// `coreclr_create_delegate`
    pub create_delegate: CreateDelegateFn,
    /// `coreclr_shutdown_2`
    pub shutdown: ShutdownFn,
}

/// Identifiers of a started runtime instance.
///
/// Both values are opaque and only meaningful to the runtime that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeInstance {
    /// Host handle returned by `coreclr_initialize`
    pub host_handle: *mut c_void,
    /// Domain id returned by `coreclr_initialize`
    pub domain_id: u32,
}

impl RuntimeInstance {
    /// Whether both identifiers are set. Shutdown is only attempted for live instances.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.host_handle.is_null() && self.domain_id != 0
    }
}

/// An opened runtime library with its host ABI exports.
///
/// Dropping the value closes the library. Function pointers obtained from it must not be
/// called afterwards, which is why they are only handed out as part of this type or as
/// delegates owned next to it.
pub struct LoadedRuntime {
    path: PathBuf,
    symbols: HostSymbols,
    library: Option<libloading::Library>,
}

impl std::fmt::Debug for LoadedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedRuntime")
            .field("path", &self.path)
            .field("dynamic", &self.library.is_some())
            .finish_non_exhaustive()
    }
}

impl LoadedRuntime {
    /// Opens the runtime library at `path` and resolves its host ABI.
    ///
    /// # Errors
    /// - [`Error::PathTooLong`] if the path exceeds the platform path limit
    /// - [`Error::LibraryLoad`] if the library cannot be opened; the message includes the
    ///   platform loader's diagnostic
    /// - [`Error::SymbolNotFound`] if an export is missing; the library is closed again
    pub fn open(path: &Path, flags: LoadFlags) -> Result<Self> {
        #[cfg(unix)]
        {
            #[allow(clippy::cast_sign_loss)]
            let limit = libc::PATH_MAX as usize;
            if path.as_os_str().len() >= limit {
                return Err(Error::PathTooLong(path.display().to_string()));
            }
        }

        // libunwind cannot unwind ARM vfpv3/NEON frames from DWARF info, so the runtime
        // must not ask it to
        #[cfg(all(target_os = "linux", target_arch = "arm"))]
        std::env::set_var("UNW_ARM_UNWIND_METHOD", "6");

        let library = open_library(path, flags).map_err(|e| Error::LibraryLoad {
            path: path.display().to_string(),
            diagnostic: e.to_string(),
        })?;
        debug!(path = %path.display(), ?flags, "opened runtime library");

        let symbols = resolve_symbols(&library)?;
        debug!(path = %path.display(), "resolved host symbols");

        Ok(Self {
            path: path.to_path_buf(),
            symbols,
            library: Some(library),
        })
    }

    /// Wraps host ABI exports that are already present in the process.
    ///
    /// This is how a runtime linked statically into the host (or a stand-in) is driven; no
    /// library is closed when the value is dropped.
    ///
    /// # Safety
    /// The three function pointers must implement the CoreCLR host ABI and stay valid for
    /// the lifetime of the returned value.
    #[must_use]
    pub unsafe fn from_symbols(path: impl Into<PathBuf>, symbols: HostSymbols) -> Self {
        Self {
            path: path.into(),
            symbols,
            library: None,
        }
    }

    /// Path the library was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The resolved exports.
    #[must_use]
    pub fn symbols(&self) -> &HostSymbols {
        &self.symbols
    }

    /// Starts a runtime instance with `coreclr_initialize`.
    ///
    /// # Arguments
    /// * `entry_path` - Absolute path of the host executable
    /// * `app_domain_name` - Friendly name of the default app domain
    /// * `properties` - The start property table
    ///
    /// # Errors
    /// Returns [`Error::RuntimeStart`] with the status code if it is negative, or
    /// [`Error::InvalidString`] if an argument contains a NUL byte.
    pub fn start(
        &self,
        entry_path: &Path,
        app_domain_name: &str,
        properties: &RuntimeProperties,
    ) -> Result<RuntimeInstance> {
        let exe_path = CString::new(entry_path.to_string_lossy().as_bytes())?;
        let domain_name = CString::new(app_domain_name)?;
        let (keys, values) = properties.to_c_strings()?;
        let key_ptrs: Vec<*const c_char> = keys.iter().map(|k| k.as_ptr()).collect();
        let value_ptrs: Vec<*const c_char> = values.iter().map(|v| v.as_ptr()).collect();

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let count = key_ptrs.len() as c_int;
        let mut host_handle: *mut c_void = ptr::null_mut();
        let mut domain_id: c_uint = 0;

        let status = unsafe {
            (self.symbols.initialize)(
                exe_path.as_ptr(),
                domain_name.as_ptr(),
                count,
                key_ptrs.as_ptr(),
                value_ptrs.as_ptr(),
                &mut host_handle,
                &mut domain_id,
            )
        };

        if status < 0 {
            return Err(Error::RuntimeStart(status));
        }

        info!(domain = app_domain_name, domain_id, "runtime started");
        Ok(RuntimeInstance {
            host_handle,
            domain_id,
        })
    }

    /// Stops a runtime instance with `coreclr_shutdown_2`.
    ///
    /// Returns the latched exit code, or `None` without calling into the runtime when the
    /// instance is not live.
    ///
    /// # Errors
    /// Returns [`Error::RuntimeShutdown`] if the status code is negative.
    pub fn stop(&self, instance: RuntimeInstance) -> Result<Option<i32>> {
        if !instance.is_live() {
            debug!("runtime instance not live, skipping shutdown");
            return Ok(None);
        }

        let mut latched_exit_code: c_int = 0;
        let status = unsafe {
            (self.symbols.shutdown)(
                instance.host_handle,
                instance.domain_id,
                &mut latched_exit_code,
            )
        };

        if status < 0 {
            return Err(Error::RuntimeShutdown(status));
        }

        info!(exit_code = latched_exit_code, "runtime stopped");
        Ok(Some(latched_exit_code))
    }

    /// Closes the library, reporting a failed close instead of ignoring it.
    pub fn unload(mut self) {
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                warn!(path = %self.path.display(), error = %e, "closing runtime library failed");
            } else {
                debug!(path = %self.path.display(), "closed runtime library");
            }
        }
    }
}

/// Source of [`LoadedRuntime`] values for the lifecycle controller.
pub trait RuntimeLoader {
    /// Loads the runtime library found at `library_path`.
    ///
    /// # Errors
    /// Returns the error of the underlying load.
    fn load(&self, library_path: &Path, flags: LoadFlags) -> Result<LoadedRuntime>;
}

/// Loads the runtime through the platform dynamic loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicLoader;

impl RuntimeLoader for DynamicLoader {
    fn load(&self, library_path: &Path, flags: LoadFlags) -> Result<LoadedRuntime> {
        LoadedRuntime::open(library_path, flags)
    }
}

#[cfg(unix)]
fn open_library(
    path: &Path,
    flags: LoadFlags,
) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};

    let binding = if flags.contains(LoadFlags::NOW) { RTLD_NOW } else { RTLD_LAZY };
    let scope = if flags.contains(LoadFlags::GLOBAL) { RTLD_GLOBAL } else { RTLD_LOCAL };

    unsafe { Library::open(Some(path), binding | scope) }.map(Into::into)
}

#[cfg(not(unix))]
fn open_library(
    path: &Path,
    _flags: LoadFlags,
) -> std::result::Result<libloading::Library, libloading::Error> {
    unsafe { libloading::Library::new(path) }
}

fn resolve_symbols(library: &libloading::Library) -> Result<HostSymbols> {
    unsafe {
        let initialize = *library
            .get::<InitializeFn>(b"coreclr_initialize\0")
            .map_err(|_| Error::SymbolNotFound(INITIALIZE_SYMBOL))?;
        let create_delegate = *library
            .get::<CreateDelegateFn>(b"coreclr_create_delegate\0")
            .map_err(|_| Error::SymbolNotFound(CREATE_DELEGATE_SYMBOL))?;
        let shutdown = *library
            .get::<ShutdownFn>(b"coreclr_shutdown_2\0")
            .map_err(|_| Error::SymbolNotFound(SHUTDOWN_SYMBOL))?;

        Ok(HostSymbols {
            initialize,
            create_delegate,
            shutdown,
        })
    }
}
