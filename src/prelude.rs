//! # clrbridge Prelude
//!
//! Import this module to get the types needed to bring a runtime up and down.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all clrbridge operations
pub use crate::Error;

/// The result type used throughout clrbridge
pub use crate::Result;

/// Configuration of the hosting bootstrap
pub use crate::HostConfig;

// ================================================================================================
// Lifecycle
// ================================================================================================

/// The lifecycle controller and its initialize mode
pub use crate::{HostContext, InitMode};

/// Runtime library, state and loader seam
pub use crate::runtime::{DynamicLoader, LoadFlags, LoadedRuntime, RuntimeLoader, RuntimeState};

// ================================================================================================
// Managed Entry Points
// ================================================================================================

/// Typed delegates and the values they exchange
pub use crate::delegate::{Delegate, InitEntry, ManagedHandle, ManagedMethod, ShutdownEntry};

// ================================================================================================
// Filesystem Discovery
// ================================================================================================

/// Trusted-assembly list construction
pub use crate::tpa::{DirectoryScan, SearchPathList, TrustedAssemblyList};

/// Directory-suffixed paths
pub use crate::paths::DirectoryPath;
