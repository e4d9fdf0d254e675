use thiserror::Error;

macro_rules! host_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Error($msg.to_string())
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Error(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every stage of the hosting bootstrap fails fast with one of these variants. The lifecycle
/// controller never propagates them as panics: [`crate::HostContext::init`] renders the first
/// error into its `last_error` string, which is the only thing an embedding interpreter sees.
///
/// # Error Categories
///
/// ## Filesystem Discovery
/// - [`Error::PathResolution`] - A path could not be canonicalized
/// - [`Error::NotADirectoryPath`] - A path was expected to end in a separator
/// - [`Error::AssemblyNotFound`] - The bridge assembly is not in any search root
/// - [`Error::PathTooLong`] - The runtime library path exceeds the platform limit
///
/// ## Native Runtime
/// - [`Error::LibraryLoad`] - The runtime shared library could not be opened
/// - [`Error::SymbolNotFound`] - A host ABI export is missing
/// - [`Error::RuntimeStart`] - `coreclr_initialize` returned a failure status
/// - [`Error::RuntimeShutdown`] - `coreclr_shutdown_2` returned a failure status
/// - [`Error::DelegateCreation`] - `coreclr_create_delegate` could not bind a method
///
/// ## Managed Code
/// - [`Error::ManagedInit`] - The managed initialize routine faulted
/// - [`Error::ManagedShutdown`] - The managed shutdown routine faulted
///
/// # Examples
///
/// ```rust,no_run
/// use clrbridge::{Error, HostConfig, HostContext, InitMode};
///
/// let context = HostContext::init(&HostConfig::from_env(), InitMode::Standalone);
/// match context.into_result() {
///     Ok(context) => println!("runtime state: {}", context.state()),
///     Err(Error::AssemblyNotFound { file, .. }) => eprintln!("{file} is not installed"),
///     Err(e) => eprintln!("startup failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A path could not be made absolute.
    ///
    /// Canonicalization requires the path to exist; this variant carries the offending path
    /// and the reason reported by the operating system.
    #[error("Unable to resolve path '{path}': {reason}")]
    PathResolution {
        /// The path that failed to resolve
        path: String,
        /// Why the resolution failed
        reason: String,
    },

    /// The input does not denote a directory-suffixed path.
    ///
    /// [`crate::paths::DirectoryPath`] only accepts strings that end in the platform
    /// separator, mirroring the runtime host convention for directory arguments.
    #[error("Not a directory path (missing trailing separator): '{0}'")]
    NotADirectoryPath(String),

    /// The bridge assembly was not found in any search root.
    #[error("Could not find assembly {file} in {roots} search root(s)")]
    AssemblyNotFound {
        /// The assembly file name that was searched for
        file: String,
        /// Number of roots that were scanned
        roots: usize,
    },

    /// The runtime library path exceeds the platform path limit.
    #[error("Absolute path to {0} too long")]
    PathTooLong(String),

    /// The runtime shared library could not be opened.
    ///
    /// The message contains the diagnostic text of the platform loader.
    #[error("Failed to open {path} with error {diagnostic}")]
    LibraryLoad {
        /// Path of the library that was opened
        path: String,
        /// The loader diagnostic (`dlerror` on unix)
        diagnostic: String,
    },

    /// A required host ABI symbol is not exported by the runtime library.
    #[error("Function {0} not found in the runtime library")]
    SymbolNotFound(&'static str),

    /// `coreclr_initialize` returned a negative status.
    #[error("coreclr_initialize failed - status: 0x{0:08x}")]
    RuntimeStart(i32),

    /// `coreclr_shutdown_2` returned a negative status.
    #[error("coreclr_shutdown failed - status: 0x{0:08x}")]
    RuntimeShutdown(i32),

    /// `coreclr_create_delegate` could not bind the requested managed method.
    #[error("coreclr_create_delegate failed for {method} - status: 0x{status:08x}")]
    DelegateCreation {
        /// Fully qualified `Type.Method` name that was requested
        method: String,
        /// The status code returned by the runtime
        status: i32,
    },

    /// The managed initialize routine raised a fault.
    #[error("Managed initialization failed: {0}")]
    ManagedInit(String),

    /// The managed shutdown routine raised a fault.
    #[error("Managed shutdown failed: {0}")]
    ManagedShutdown(String),

    /// A string handed to the runtime contained an interior NUL byte.
    #[error("String contains an interior NUL byte: '{0}'")]
    InvalidString(String),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while probing directories.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl From<std::ffi::NulError> for Error {
    fn from(error: std::ffi::NulError) -> Self {
        let bytes = error.into_vec();
        Error::InvalidString(String::from_utf8_lossy(&bytes).into_owned())
    }
}
