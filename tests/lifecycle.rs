//! End-to-end lifecycle tests against an in-process stand-in for the runtime host ABI.

use clrbridge::{
    delegate::{InitEntry, ShutdownEntry},
    runtime::{HostSymbols, LoadFlags, LoadedRuntime, RuntimeLoader, CORECLR_LIBRARY},
    Error, HostConfig, HostContext, InitMode, RuntimeState,
};
use std::{
    cell::{Cell, RefCell},
    ffi::{c_char, c_int, c_uint, c_void, CStr},
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

const MODULE: usize = 0xC1A0;

#[derive(Default)]
struct Calls {
    properties: Vec<(String, String)>,
    bound: Vec<String>,
    init: u32,
    managed_shutdown: u32,
    runtime_shutdown: u32,
    loaded: Vec<(PathBuf, LoadFlags)>,
}

thread_local! {
    static CALLS: RefCell<Calls> = RefCell::new(Calls::default());
    static START_STATUS: Cell<c_int> = const { Cell::new(0) };
    static INIT_FAULT: Cell<bool> = const { Cell::new(false) };
    static SHUTDOWN_FAULT: Cell<bool> = const { Cell::new(false) };
}

fn calls<R>(f: impl FnOnce(&Calls) -> R) -> R {
    CALLS.with(|c| f(&c.borrow()))
}

extern "C-unwind" fn managed_init() -> *mut c_void {
    CALLS.with(|c| c.borrow_mut().init += 1);
    if INIT_FAULT.with(Cell::get) {
        panic!("System.TypeInitializationException: bridge failed to start");
    }
    MODULE as *mut c_void
}

extern "C-unwind" fn managed_shutdown() {
    CALLS.with(|c| c.borrow_mut().managed_shutdown += 1);
    if SHUTDOWN_FAULT.with(Cell::get) {
        panic!("System.ObjectDisposedException: engine gone");
    }
}

unsafe extern "C" fn initialize(
    _exe_path: *const c_char,
    _name: *const c_char,
    count: c_int,
    keys: *const *const c_char,
    values: *const *const c_char,
    host_handle: *mut *mut c_void,
    domain_id: *mut c_uint,
) -> c_int {
    let mut properties = Vec::new();
    for i in 0..count as usize {
        let key = CStr::from_ptr(*keys.add(i)).to_string_lossy().into_owned();
        let value = CStr::from_ptr(*values.add(i)).to_string_lossy().into_owned();
        properties.push((key, value));
    }
    CALLS.with(|c| c.borrow_mut().properties = properties);

    let status = START_STATUS.with(Cell::get);
    if status >= 0 {
        *host_handle = 0x1000 as *mut c_void;
        *domain_id = 1;
    }
    status
}

unsafe extern "C" fn create_delegate(
    _host_handle: *mut c_void,
    _domain_id: c_uint,
    _assembly: *const c_char,
    _type_name: *const c_char,
    method: *const c_char,
    delegate: *mut *mut c_void,
) -> c_int {
    let method = CStr::from_ptr(method).to_string_lossy().into_owned();
    let target: *mut c_void = match method.as_str() {
        "Initialize" | "InitExt" => managed_init as InitEntry as *mut c_void,
        "Shutdown" => managed_shutdown as ShutdownEntry as *mut c_void,
        // COR_E_MISSINGMETHOD
        _ => return 0x8013_1513_u32 as c_int,
    };
    CALLS.with(|c| c.borrow_mut().bound.push(method));
    *delegate = target;
    0
}

unsafe extern "C" fn shutdown(
    _host_handle: *mut c_void,
    _domain_id: c_uint,
    latched_exit_code: *mut c_int,
) -> c_int {
    CALLS.with(|c| c.borrow_mut().runtime_shutdown += 1);
    *latched_exit_code = 7;
    0
}

struct FakeLoader;

impl RuntimeLoader for FakeLoader {
    fn load(&self, library_path: &Path, flags: LoadFlags) -> clrbridge::Result<LoadedRuntime> {
        CALLS.with(|c| {
            c.borrow_mut()
                .loaded
                .push((library_path.to_path_buf(), flags));
        });
        Ok(unsafe {
            LoadedRuntime::from_symbols(
                library_path,
                HostSymbols {
                    initialize,
                    create_delegate,
                    shutdown,
                },
            )
        })
    }
}

struct Fixture {
    app: TempDir,
    runtime: TempDir,
    config: HostConfig,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let app = tempfile::tempdir().unwrap();
    let runtime = tempfile::tempdir().unwrap();
    fs::write(app.path().join("Bridge.dll"), b"MZ").unwrap();
    fs::write(runtime.path().join("System.Private.CoreLib.dll"), b"MZ").unwrap();
    fs::write(runtime.path().join("System.Runtime.dll"), b"MZ").unwrap();
    fs::write(runtime.path().join("System.Runtime.ni.dll"), b"MZ").unwrap();
    fs::write(runtime.path().join(CORECLR_LIBRARY), b"").unwrap();

    let config = HostConfig::default()
        .with_assembly_file("Bridge.dll")
        .with_entry_type("Bridge", "Bridge.Engine")
        .with_search_roots([app.path().to_string_lossy().into_owned()])
        .with_runtime_dir(runtime.path());

    Fixture {
        app,
        runtime,
        config,
    }
}

fn property<'a>(properties: &'a [(String, String)], key: &str) -> &'a str {
    properties
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or_else(|| panic!("missing property {key}"))
}

#[test]
fn test_successful_lifecycle() {
    let fx = fixture();
    let mut context = HostContext::init_with(&fx.config, InitMode::Standalone, &FakeLoader);

    assert_eq!(context.last_error(), None);
    assert_eq!(context.state(), RuntimeState::DelegatesBound);
    assert_eq!(context.module().map(|m| m.as_ptr() as usize), Some(MODULE));
    assert!(context.instance().is_some());
    assert!(context.has_shutdown_delegate());
    assert_eq!(calls(|c| c.init), 1);
    assert_eq!(
        calls(|c| c.bound.clone()),
        vec!["Initialize".to_string(), "Shutdown".to_string()]
    );

    let runtime_dir = fs::canonicalize(fx.runtime.path()).unwrap();
    let app_dir = fs::canonicalize(fx.app.path()).unwrap();
    assert_eq!(context.runtime_library_path(), Some(runtime_dir.as_path()));
    assert_eq!(context.assembly_path(), Some(app_dir.as_path()));
    assert_eq!(
        calls(|c| c.loaded.clone()),
        vec![(runtime_dir.join(CORECLR_LIBRARY), LoadFlags::NOW)]
    );

    context.finalize();
    assert_eq!(context.last_error(), None);
    assert_eq!(context.state(), RuntimeState::Unloaded);
    assert_eq!(context.exit_code(), Some(7));
    assert!(!context.is_loaded());
    assert!(!context.has_shutdown_delegate());
    assert_eq!(calls(|c| c.managed_shutdown), 1);
    assert_eq!(calls(|c| c.runtime_shutdown), 1);
}

#[cfg(unix)]
#[test]
fn test_start_properties() {
    let fx = fixture();
    let extra = tempfile::tempdir().unwrap();
    fs::write(extra.path().join("Extra.dll"), b"MZ").unwrap();
    let config = fx.config.clone().with_library_dir(extra.path()).server_gc(true);

    let mut context = HostContext::init_with(&config, InitMode::Extension, &FakeLoader);
    assert!(context.is_ok(), "{:?}", context.last_error());

    let properties = calls(|c| c.properties.clone());
    let keys: Vec<&str> = properties.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "TRUSTED_PLATFORM_ASSEMBLIES",
            "APP_PATHS",
            "APP_NI_PATHS",
            "NATIVE_DLL_SEARCH_DIRECTORIES",
            "System.GC.Server",
            "AppDomainCompatSwitch",
        ]
    );

    let app_dir = fs::canonicalize(fx.app.path()).unwrap();
    let runtime_dir = fs::canonicalize(fx.runtime.path()).unwrap();
    let extra_dir = fs::canonicalize(extra.path()).unwrap();

    let tpa: Vec<&str> = property(&properties, "TRUSTED_PLATFORM_ASSEMBLIES")
        .split(':')
        .collect();
    assert_eq!(tpa[0], app_dir.join("Bridge.dll").to_str().unwrap());
    assert_eq!(tpa[1], extra_dir.join("Extra.dll").to_str().unwrap());
    assert!(tpa.contains(&runtime_dir.join("System.Runtime.ni.dll").to_str().unwrap()));
    assert!(!tpa.contains(&runtime_dir.join("System.Runtime.dll").to_str().unwrap()));
    assert!(tpa.contains(&runtime_dir.join("System.Private.CoreLib.dll").to_str().unwrap()));
    assert_eq!(tpa.len(), 4);

    assert_eq!(property(&properties, "APP_PATHS"), app_dir.to_str().unwrap());
    assert_eq!(property(&properties, "APP_NI_PATHS"), app_dir.to_str().unwrap());
    assert_eq!(
        property(&properties, "NATIVE_DLL_SEARCH_DIRECTORIES"),
        format!(
            "{}:{}:{}",
            app_dir.display(),
            runtime_dir.display(),
            extra_dir.display()
        )
    );
    assert_eq!(property(&properties, "System.GC.Server"), "true");
    assert_eq!(
        property(&properties, "AppDomainCompatSwitch"),
        "UseLatestBehaviorWhenTFMNotSpecified"
    );
    assert_eq!(calls(|c| c.bound.first().cloned()), Some("InitExt".to_string()));

    context.finalize();
}

#[test]
fn test_finalize_twice_is_harmless() {
    let fx = fixture();
    let mut context = HostContext::init_with(&fx.config, InitMode::Standalone, &FakeLoader);
    assert!(context.is_ok());

    context.finalize();
    context.finalize();

    assert_eq!(calls(|c| c.managed_shutdown), 1);
    assert_eq!(calls(|c| c.runtime_shutdown), 1);
    assert_eq!(context.exit_code(), Some(7));
}

#[test]
fn test_start_failure_skips_delegates_and_shutdown() {
    let fx = fixture();
    START_STATUS.with(|s| s.set(0x8000_4005_u32 as c_int));

    let mut context = HostContext::init_with(&fx.config, InitMode::Standalone, &FakeLoader);
    let error = context.last_error().expect("start must fail").to_string();
    assert!(error.contains("coreclr_initialize failed"), "{error}");
    assert!(error.contains("0x80004005"), "{error}");
    assert!(context.instance().is_none());
    assert!(context.is_loaded());
    assert!(calls(|c| c.bound.is_empty()));

    context.finalize();
    assert!(!context.is_loaded());
    assert_eq!(calls(|c| c.managed_shutdown), 0);
    assert_eq!(calls(|c| c.runtime_shutdown), 0);
    START_STATUS.with(|s| s.set(0));
}

#[test]
fn test_missing_managed_method() {
    let fx = fixture();
    let mut config = fx.config.clone();
    config.ext_init_method = "InitLegacy".to_string();

    let mut context = HostContext::init_with(&config, InitMode::Extension, &FakeLoader);
    let error = context.last_error().expect("binding must fail").to_string();
    assert!(error.contains("Bridge.Engine.InitLegacy"), "{error}");
    assert_eq!(context.state(), RuntimeState::RuntimeStarted);
    assert!(context.instance().is_some());
    assert_eq!(calls(|c| c.init), 0);

    context.finalize();
    assert_eq!(calls(|c| c.managed_shutdown), 0);
    assert_eq!(calls(|c| c.runtime_shutdown), 1);
}

#[test]
fn test_managed_init_fault_recorded() {
    let fx = fixture();
    INIT_FAULT.with(|f| f.set(true));

    let mut context = HostContext::init_with(&fx.config, InitMode::Standalone, &FakeLoader);
    INIT_FAULT.with(|f| f.set(false));

    let error = context.last_error().expect("init must fail").to_string();
    assert!(error.contains("TypeInitializationException"), "{error}");
    assert!(context.module().is_none());

    context.finalize();
    assert_eq!(calls(|c| c.managed_shutdown), 1);
    assert_eq!(calls(|c| c.runtime_shutdown), 1);
}

#[test]
fn test_managed_shutdown_fault_does_not_stop_teardown() {
    let fx = fixture();
    let mut context = HostContext::init_with(&fx.config, InitMode::Standalone, &FakeLoader);
    assert!(context.is_ok());

    SHUTDOWN_FAULT.with(|f| f.set(true));
    context.finalize();
    SHUTDOWN_FAULT.with(|f| f.set(false));

    let error = context.last_error().expect("fault recorded").to_string();
    assert!(error.contains("ObjectDisposedException"), "{error}");
    assert_eq!(calls(|c| c.runtime_shutdown), 1);
    assert!(!context.is_loaded());
    assert_eq!(context.state(), RuntimeState::Unloaded);
}

#[test]
fn test_missing_runtime_library() {
    let fx = fixture();
    fs::remove_file(fx.runtime.path().join(CORECLR_LIBRARY)).unwrap();

    let mut context = HostContext::init(&fx.config, InitMode::Standalone);
    let error = context.last_error().expect("load must fail").to_string();
    assert!(error.contains(CORECLR_LIBRARY), "{error}");
    assert!(context.instance().is_none());
    assert!(!context.has_shutdown_delegate());

    context.finalize();
    assert_eq!(calls(|c| c.managed_shutdown), 0);
}

#[test]
fn test_global_symbols_flag() {
    let fx = fixture();
    let config = fx.config.clone().global_symbols(true);

    let mut context = HostContext::init_with(&config, InitMode::Standalone, &FakeLoader);
    let (_, flags) = calls(|c| c.loaded[0].clone());
    assert!(flags.contains(LoadFlags::NOW | LoadFlags::GLOBAL));
    context.finalize();
}

#[test]
fn test_into_result() {
    let fx = fixture();
    let context = HostContext::init_with(&fx.config, InitMode::Standalone, &FakeLoader)
        .into_result()
        .unwrap();
    drop(context);
    // dropping without finalize still tears the runtime down
    assert_eq!(calls(|c| c.managed_shutdown), 1);
    assert_eq!(calls(|c| c.runtime_shutdown), 1);

    let missing = HostConfig::default()
        .with_assembly_file("Missing.dll")
        .with_search_roots([fx.app.path().to_string_lossy().into_owned()]);
    let err = HostContext::init_with(&missing, InitMode::Standalone, &FakeLoader)
        .into_result()
        .unwrap_err();
    assert!(matches!(err, Error::Error(ref m) if m.contains("Missing.dll")));
}

#[test]
fn test_relative_library_dir_is_stored_absolute() {
    let fx = fixture();
    let extra = tempfile::tempdir_in(".").unwrap();
    assert!(extra.path().is_relative());
    fs::write(extra.path().join("Extra.dll"), b"MZ").unwrap();
    let config = fx.config.clone().with_library_dir(extra.path());

    let mut context = HostContext::init_with(&config, InitMode::Standalone, &FakeLoader);
    assert!(context.is_ok(), "{:?}", context.last_error());

    let extra_dir = fs::canonicalize(extra.path()).unwrap();
    let tpa = context.trusted_assemblies().entries().to_vec();
    let native = context.native_search_paths().dirs().to_vec();
    let relative: Vec<&PathBuf> = tpa.iter().chain(&native).filter(|p| p.is_relative()).collect();
    assert!(relative.is_empty(), "relative paths stored: {relative:?}");
    assert!(tpa.contains(&extra_dir.join("Extra.dll")));
    assert_eq!(native.last(), Some(&extra_dir));

    context.finalize();
}
