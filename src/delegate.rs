//! Typed delegates into managed code.
//!
//! A delegate is a native function pointer that the runtime binds to one managed static
//! method. [`LoadedRuntime::create_delegate`] asks the runtime for that pointer and wraps it
//! in a [`Delegate`], a capability handle tagged with the calling convention it was bound
//! for. The handle is constructed once and cannot be re-bound or copied; binding a different
//! method means creating a new delegate.
//!
//! A delegate borrows the runtime it was bound from, so the library cannot be unloaded while
//! the delegate is still reachable:
//!
//! ```rust,compile_fail
//! use clrbridge::{
//!     delegate::{Delegate, ManagedMethod, ShutdownEntry},
//!     runtime::{LoadedRuntime, RuntimeInstance},
//! };
//!
//! fn keep(runtime: LoadedRuntime, instance: RuntimeInstance) {
//!     let method = ManagedMethod::new("Bridge", "Bridge.Engine", "Shutdown");
//!     let shutdown: Delegate<'_, ShutdownEntry> =
//!         runtime.create_delegate(instance, &method).unwrap();
//!     runtime.unload();
//!     let _ = shutdown.invoke();
//! }
//! ```
//!
//! Nor can a handle be duplicated to call the same entry point twice:
//!
//! ```rust,compile_fail
//! use clrbridge::delegate::{Delegate, ShutdownEntry};
//!
//! fn duplicate<'rt>(shutdown: &Delegate<'rt, ShutdownEntry>) -> Delegate<'rt, ShutdownEntry> {
//!     shutdown.clone()
//! }
//! ```
//!
//! Creating a delegate runs no managed code. The bridge only needs two:
//!
//! - an initialize entry point ([`InitEntry`]) returning an opaque module reference
//! - a shutdown entry point ([`ShutdownEntry`]) called once during teardown
//!
//! # Managed Faults
//!
//! Both entry points use the `C-unwind` ABI so an unwind started on the other side of the
//! call reaches the invocation site instead of aborting at the boundary. [`Delegate::invoke`]
//! catches it there and converts it into [`Error::ManagedInit`] or [`Error::ManagedShutdown`].
//! Only Rust panic payloads carry readable text; see [`Delegate::invoke`] for what a runtime
//! exception turns into.

use crate::{
    runtime::{LoadedRuntime, RuntimeInstance},
    Error, Result,
};
use std::{
    any::Any,
    ffi::{c_void, CString},
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    ptr::{self, NonNull},
};
use tracing::debug;

/// Native signature of the managed initialize entry point.
pub type InitEntry = unsafe extern "C-unwind" fn() -> *mut c_void;

/// Native signature of the managed shutdown entry point.
pub type ShutdownEntry = unsafe extern "C-unwind" fn();

/// A managed static method, identified by name only.
///
/// The managed type must expose exactly one method with this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedMethod {
    /// Assembly name, without extension
    pub assembly: String,
    /// Fully qualified type name
    pub type_name: String,
    /// Method name
    pub method: String,
}

impl ManagedMethod {
    /// Create a new method reference.
    pub fn new(
        assembly: impl Into<String>,
        type_name: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            assembly: assembly.into(),
            type_name: type_name.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for ManagedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}.{}", self.assembly, self.type_name, self.method)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Function pointer types a delegate can be bound as.
///
/// Implemented for the entry point signatures the bridge knows how to call; the trait is
/// sealed so arbitrary types cannot be conjured out of a runtime pointer.
pub trait DelegateSignature: sealed::Sealed + Copy {
    /// Human readable signature, used in diagnostics.
    const SIGNATURE: &'static str;

    /// Reinterprets a non-null runtime pointer as this signature.
    ///
    /// # Safety
    /// `ptr` must point to native code with exactly this signature and calling convention.
    unsafe fn from_raw(ptr: NonNull<c_void>) -> Self;
}

macro_rules! delegate_signature {
    ($ty:ty, $sig:expr) => {
        impl sealed::Sealed for $ty {}

        impl DelegateSignature for $ty {
            const SIGNATURE: &'static str = $sig;

            unsafe fn from_raw(ptr: NonNull<c_void>) -> Self {
                std::mem::transmute::<*mut c_void, $ty>(ptr.as_ptr())
            }
        }
    };
}

delegate_signature!(InitEntry, "unsafe extern \"C-unwind\" fn() -> *mut c_void");
delegate_signature!(ShutdownEntry, "unsafe extern \"C-unwind\" fn()");

/// A native entry point bound to one managed method.
///
/// Valid for as long as the borrowed runtime `'rt` stays loaded.
pub struct Delegate<'rt, F: DelegateSignature> {
    func: F,
    method: ManagedMethod,
    _runtime: PhantomData<&'rt LoadedRuntime>,
}

impl<F: DelegateSignature> Delegate<'_, F> {
    /// The method this delegate is bound to.
    #[must_use]
    pub fn method(&self) -> &ManagedMethod {
        &self.method
    }
}

impl<F: DelegateSignature> fmt::Debug for Delegate<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegate")
            .field("method", &self.method.to_string())
            .field("signature", &F::SIGNATURE)
            .finish()
    }
}

/// Opaque reference returned by the managed initialize routine.
///
/// The host never looks inside; it is stored verbatim and handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedHandle(NonNull<c_void>);

impl ManagedHandle {
    /// Wraps a pointer, returning `None` for null.
    #[must_use]
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// The raw pointer.
    #[must_use]
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl Delegate<'_, InitEntry> {
    /// Runs the managed initialize routine.
    ///
    /// Returns the opaque module reference, or `None` when the routine returned null.
    ///
    /// # Errors
    /// Returns [`Error::ManagedInit`] if the routine unwound.
    ///
    /// Only a Rust panic payload is turned into its message. A CLR exception crossing the
    /// boundary is a foreign unwind: depending on the platform it either aborts the process
    /// or arrives as an opaque payload, reported as `unknown managed fault`. Managed code
    /// that wants its exception text surfaced must catch it on its own side.
    pub fn invoke(&self) -> Result<Option<ManagedHandle>> {
        let func = self.func;
        // the borrow of the runtime keeps the entry point loaded
        panic::catch_unwind(AssertUnwindSafe(|| unsafe { func() }))
            .map(ManagedHandle::from_ptr)
            .map_err(|fault| Error::ManagedInit(describe_fault(fault.as_ref())))
    }
}

impl Delegate<'_, ShutdownEntry> {
    /// Runs the managed shutdown routine.
    ///
    /// Faults are reported the same way as for the initialize routine.
    ///
    /// # Errors
    /// Returns [`Error::ManagedShutdown`] if the routine unwound.
    pub fn invoke(&self) -> Result<()> {
        let func = self.func;
        panic::catch_unwind(AssertUnwindSafe(|| unsafe { func() }))
            .map_err(|fault| Error::ManagedShutdown(describe_fault(fault.as_ref())))
    }
}

impl LoadedRuntime {
    /// Binds `method` to a native function pointer of signature `F`.
    ///
    /// The returned delegate borrows `self`, so the library stays loaded while it lives.
    ///
    /// # Errors
    /// Returns [`Error::DelegateCreation`] if the runtime reports a negative status or hands
    /// back a null pointer, or [`Error::InvalidString`] for names containing NUL bytes.
    pub fn create_delegate<F: DelegateSignature>(
        &self,
        instance: RuntimeInstance,
        method: &ManagedMethod,
    ) -> Result<Delegate<'_, F>> {
        unsafe { self.bind_delegate(instance, method) }
    }

    /// [`LoadedRuntime::create_delegate`] with a lifetime chosen by the caller.
    ///
    /// # Safety
    /// The delegate must be dropped before this runtime is unloaded.
    pub(crate) unsafe fn bind_delegate<'rt, F: DelegateSignature>(
        &self,
        instance: RuntimeInstance,
        method: &ManagedMethod,
    ) -> Result<Delegate<'rt, F>> {
        let assembly = CString::new(method.assembly.as_str())?;
        let type_name = CString::new(method.type_name.as_str())?;
        let method_name = CString::new(method.method.as_str())?;
        let mut raw: *mut c_void = ptr::null_mut();

        let status = (self.symbols().create_delegate)(
            instance.host_handle,
            instance.domain_id,
            assembly.as_ptr(),
            type_name.as_ptr(),
            method_name.as_ptr(),
            &mut raw,
        );

        let failed = |status| Error::DelegateCreation {
            method: format!("{}.{}", method.type_name, method.method),
            status,
        };
        if status < 0 {
            return Err(failed(status));
        }
        let ptr = NonNull::new(raw).ok_or_else(|| failed(status))?;

        debug!(%method, signature = F::SIGNATURE, "bound delegate");
        Ok(Delegate {
            func: F::from_raw(ptr),
            method: method.clone(),
            _runtime: PhantomData,
        })
    }
}

/// String form of a fault payload raised across a delegate call.
fn describe_fault(fault: &(dyn Any + Send)) -> String {
    if let Some(message) = fault.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = fault.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown managed fault".to_string()
    }
}
