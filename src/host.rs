//! Lifecycle of a hosted runtime.
//!
//! [`HostContext`] is the aggregate state of one runtime from bootstrap to teardown. It is
//! created by [`HostContext::init`], handed to the caller, and consumed again by
//! [`HostContext::finalize`]. There is no process-wide instance; the caller owns the value
//! and threads it through every later operation.
//!
//! # Bootstrap Stages
//!
//! 1. Resolve the host executable path
//! 2. Locate the bridge assembly in the configured search roots
//! 3. Resolve the runtime directory
//! 4. Build the trusted-assembly list and native search paths
//! 5. Load the runtime library and resolve its exports
//! 6. Start the runtime
//! 7. Bind the initialize and shutdown delegates
//! 8. Invoke the initialize delegate
//!
//! The first failing stage records its error in [`HostContext::last_error`] and stops the
//! bootstrap. The partially populated context is still returned so it can be finalized,
//! which releases exactly what was acquired.
//!
//! # Threading
//!
//! Everything runs inline on the calling thread. The caller typically holds an interpreter
//! import lock while initializing, so no stage may wait on another thread.
//!
//! # Examples
//!
//! ```rust,no_run
//! use clrbridge::{HostConfig, HostContext, InitMode};
//!
//! let config = HostConfig::from_env().with_search_roots(["/opt/app", ""]);
//! let mut context = HostContext::init(&config, InitMode::Extension);
//! if let Some(error) = context.last_error() {
//!     eprintln!("import failed: {error}");
//! }
//! // ... use context.module() ...
//! context.finalize();
//! ```

use crate::{
    config::HostConfig,
    delegate::{Delegate, InitEntry, ManagedHandle, ManagedMethod, ShutdownEntry},
    locator,
    paths::{self, DirectoryPath},
    runtime::{
        DynamicLoader, LoadFlags, LoadedRuntime, RuntimeInstance, RuntimeLoader,
        RuntimeProperties, RuntimeState, CORECLR_LIBRARY,
    },
    tpa::{self, SearchPathList, TrustedAssemblyList},
    Error, Result,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which managed initialize entry point is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum InitMode {
    /// The host embeds the runtime directly
    #[default]
    Standalone,
    /// The runtime is brought up by an interpreter extension module
    Extension,
}

impl InitMode {
    /// Name of the managed initialize method for this mode.
    #[must_use]
    pub fn method_name(self, config: &HostConfig) -> &str {
        match self {
            InitMode::Standalone => &config.init_method,
            InitMode::Extension => &config.ext_init_method,
        }
    }
}

/// Aggregate state of one hosted runtime.
pub struct HostContext {
    entry_executable_path: Option<PathBuf>,
    runtime_library_path: Option<PathBuf>,
    assembly_file: String,
    assembly_path: Option<PathBuf>,
    trusted_assemblies: TrustedAssemblyList,
    native_search_paths: SearchPathList,
    runtime: Option<LoadedRuntime>,
    instance: Option<RuntimeInstance>,
    // bound with an unchecked lifetime; finalize drops both before the runtime unloads
    init_delegate: Option<Delegate<'static, InitEntry>>,
    shutdown_delegate: Option<Delegate<'static, ShutdownEntry>>,
    module: Option<ManagedHandle>,
    exit_code: Option<i32>,
    state: RuntimeState,
    last_error: Option<String>,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("state", &self.state)
            .field("entry_executable_path", &self.entry_executable_path)
            .field("runtime_library_path", &self.runtime_library_path)
            .field("assembly_file", &self.assembly_file)
            .field("assembly_path", &self.assembly_path)
            .field("trusted_assemblies", &self.trusted_assemblies.len())
            .field("module", &self.module)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl HostContext {
    fn new(assembly_file: &str) -> Self {
        Self {
            entry_executable_path: None,
            runtime_library_path: None,
            assembly_file: assembly_file.to_string(),
            assembly_path: None,
            trusted_assemblies: TrustedAssemblyList::new(),
            native_search_paths: SearchPathList::new(),
            runtime: None,
            instance: None,
            init_delegate: None,
            shutdown_delegate: None,
            module: None,
            exit_code: None,
            state: RuntimeState::Unloaded,
            last_error: None,
        }
    }

    /// Bootstraps the runtime through the platform dynamic loader.
    ///
    /// Never panics on bootstrap failure; check [`HostContext::last_error`] before using
    /// anything else on the returned context.
    #[must_use]
    pub fn init(config: &HostConfig, mode: InitMode) -> Self {
        Self::init_with(config, mode, &DynamicLoader)
    }

    /// Bootstraps the runtime, obtaining the runtime library from `loader`.
    #[must_use]
    pub fn init_with<L: RuntimeLoader>(config: &HostConfig, mode: InitMode, loader: &L) -> Self {
        let mut context = Self::new(&config.assembly_file);
        if let Err(e) = context.bootstrap(config, mode, loader) {
            warn!(state = %context.state, error = %e, "runtime bootstrap failed");
            context.last_error = Some(e.to_string());
        }
        context
    }

    fn bootstrap<L: RuntimeLoader>(
        &mut self,
        config: &HostConfig,
        mode: InitMode,
        loader: &L,
    ) -> Result<()> {
        let entry_path = paths::entrypoint_executable_path()?;
        debug!(path = %entry_path.display(), "resolved entry point");
        self.entry_executable_path = Some(entry_path.clone());

        let located = locator::locate(&config.search_roots, &config.assembly_file)?;
        let app_dir = match DirectoryPath::from_dir(&located)?.directory() {
            // the filesystem root has nothing left once its separator is stripped
            "" => located,
            dir => PathBuf::from(dir),
        };
        self.assembly_path = Some(app_dir.clone());

        let runtime_dir =
            locator::resolve_runtime_directory(&entry_path, config.runtime_dir.as_deref())?;
        debug!(path = %runtime_dir.display(), "resolved runtime directory");
        self.runtime_library_path = Some(runtime_dir.clone());

        self.build_path_lists(config, &app_dir, &runtime_dir);

        let mut flags = LoadFlags::NOW;
        if config.global_symbols {
            flags |= LoadFlags::GLOBAL;
        }
        let runtime = loader.load(&runtime_dir.join(CORECLR_LIBRARY), flags)?;
        self.state = RuntimeState::SymbolsResolved;

        let properties = RuntimeProperties::new(
            &self.trusted_assemblies,
            &app_dir,
            &self.native_search_paths,
            config.server_gc,
        );
        let runtime = self.runtime.insert(runtime);
        let instance = runtime.start(&entry_path, &config.app_domain_name, &properties)?;
        self.instance = Some(instance);
        self.state = RuntimeState::RuntimeStarted;

        let init_method = ManagedMethod::new(
            config.assembly_name.as_str(),
            config.type_name.as_str(),
            mode.method_name(config),
        );
        let shutdown_method = ManagedMethod::new(
            config.assembly_name.as_str(),
            config.type_name.as_str(),
            config.shutdown_method.as_str(),
        );
        let init = unsafe { runtime.bind_delegate::<InitEntry>(instance, &init_method)? };
        let shutdown =
            unsafe { runtime.bind_delegate::<ShutdownEntry>(instance, &shutdown_method)? };
        self.shutdown_delegate = Some(shutdown);
        self.state = RuntimeState::DelegatesBound;

        self.module = init.invoke()?;
        self.init_delegate = Some(init);
        info!(%mode, module = self.module.is_some(), "managed bridge initialized");
        Ok(())
    }

    fn build_path_lists(&mut self, config: &HostConfig, app_dir: &Path, runtime_dir: &Path) {
        // the bridge assembly goes first so no other copy can shadow it
        self.trusted_assemblies
            .push_assembly(app_dir.join(&config.assembly_file));

        self.native_search_paths = tpa::build_native_search_paths(
            app_dir,
            runtime_dir,
            &config.extra_library_dirs,
            &mut self.trusted_assemblies,
        );

        let scan = self.trusted_assemblies.add_directory(runtime_dir);
        debug!(
            ?scan,
            total = self.trusted_assemblies.len(),
            "built trusted assembly list"
        );
    }

    /// Tears the runtime down.
    ///
    /// Runs the managed shutdown routine if it was bound, stops the runtime instance if it
    /// is live, closes the runtime library and drops the path lists. Every step runs even if
    /// an earlier one failed; failures are logged and the first one is kept in
    /// [`HostContext::last_error`].
    ///
    /// Each resource is released at most once. Calling this again is a no-op.
    pub fn finalize(&mut self) {
        if self.state == RuntimeState::Unloaded && self.runtime.is_none() {
            self.trusted_assemblies.clear();
            self.native_search_paths.clear();
            return;
        }
        self.state = RuntimeState::ShuttingDown;

        if let Some(shutdown) = self.shutdown_delegate.take() {
            if let Err(e) = shutdown.invoke() {
                warn!(error = %e, "managed shutdown failed");
                self.record_error(&e);
            }
        }
        self.init_delegate = None;
        self.module = None;

        let instance = self.instance.take();
        if let Some(runtime) = self.runtime.take() {
            if let Some(instance) = instance {
                match runtime.stop(instance) {
                    Ok(code) => self.exit_code = code,
                    Err(e) => {
                        warn!(error = %e, "runtime shutdown failed");
                        self.record_error(&e);
                    }
                }
            }
            runtime.unload();
        }

        self.trusted_assemblies.clear();
        self.native_search_paths.clear();
        self.state = RuntimeState::Unloaded;
        info!("runtime host finalized");
    }

    fn record_error(&mut self, error: &Error) {
        if self.last_error.is_none() {
            self.last_error = Some(error.to_string());
        }
    }

    /// The failure description, if any stage failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the bootstrap completed without error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.last_error.is_none()
    }

    /// Converts the context into a `Result`, for callers that prefer `?`.
    ///
    /// A failed context is finalized before the error is returned.
    ///
    /// # Errors
    /// Returns [`Error::Error`] with the recorded failure description.
    pub fn into_result(mut self) -> Result<Self> {
        match self.last_error.clone() {
            None => Ok(self),
            Some(message) => {
                self.finalize();
                Err(host_error!(message))
            }
        }
    }

    /// The opaque module reference returned by the managed initialize routine.
    ///
    /// `None` when the routine returned null; the caller then keeps using its own module.
    #[must_use]
    pub fn module(&self) -> Option<ManagedHandle> {
        self.module
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Exit code latched by the runtime at shutdown.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Absolute path of the host executable.
    #[must_use]
    pub fn entry_executable_path(&self) -> Option<&Path> {
        self.entry_executable_path.as_deref()
    }

    /// Absolute directory containing the runtime library.
    #[must_use]
    pub fn runtime_library_path(&self) -> Option<&Path> {
        self.runtime_library_path.as_deref()
    }

    /// File name of the bridge assembly.
    #[must_use]
    pub fn assembly_file(&self) -> &str {
        &self.assembly_file
    }

    /// Absolute directory in which the bridge assembly was found.
    #[must_use]
    pub fn assembly_path(&self) -> Option<&Path> {
        self.assembly_path.as_deref()
    }

    /// The trusted-assembly list passed to the runtime.
    #[must_use]
    pub fn trusted_assemblies(&self) -> &TrustedAssemblyList {
        &self.trusted_assemblies
    }

    /// The native library search paths passed to the runtime.
    #[must_use]
    pub fn native_search_paths(&self) -> &SearchPathList {
        &self.native_search_paths
    }

    /// The live runtime instance, if started and not yet stopped.
    #[must_use]
    pub fn instance(&self) -> Option<RuntimeInstance> {
        self.instance
    }

    /// Whether the managed shutdown routine is bound and has not run yet.
    ///
    /// The delegates themselves never leave the context; the initialize result is
    /// available from [`HostContext::module`].
    #[must_use]
    pub fn has_shutdown_delegate(&self) -> bool {
        self.shutdown_delegate.is_some()
    }

    /// Whether the runtime library is still loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        if self.runtime.is_some() {
            warn!("host context dropped without finalize, tearing down");
            self.finalize();
        }
    }
}
