// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'runtime/mod.rs' opens the runtime library and calls its host ABI
// - 'delegate.rs' turns runtime pointers into typed function pointers

//! # clrbridge
//!
//! Host a CoreCLR runtime inside a native process and call into managed code.
//!
//! `clrbridge` performs the runtime-hosting bootstrap an embedding host needs: it finds the
//! running executable and the bridge assembly on disk, builds the runtime's start properties
//! (trusted-assembly list, probing paths, native search paths), opens the runtime's shared
//! library, starts it, and binds typed delegates to a managed initialize/shutdown pair.
//! Teardown runs in the reverse order and always makes forward progress.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clrbridge::prelude::*;
//!
//! let config = HostConfig::from_env()
//!     .with_search_roots(["/opt/app", ""])
//!     .with_runtime_dir("/usr/share/dotnet/shared/Microsoft.NETCore.App/8.0.0");
//!
//! let mut context = HostContext::init(&config, InitMode::Standalone);
//! match context.last_error() {
//!     Some(error) => eprintln!("runtime failed to start: {error}"),
//!     None => println!("module handle: {:?}", context.module()),
//! }
//! context.finalize();
//! ```
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - [`paths`] - Executable path, canonicalization, directory-suffixed paths
//! - [`locator`] - Bridge assembly search and runtime directory resolution
//! - [`tpa`] - Trusted-assembly list and native search paths
//! - [`runtime`] - Runtime library loading, start and stop
//! - [`delegate`] - Typed delegates into managed methods
//! - [`host`] - [`HostContext`], the lifecycle controller
//!
//! ## Error Handling
//!
//! Stages return [`Result<T, Error>`](Result). The lifecycle controller turns the first
//! failure into a single descriptive string, available from [`HostContext::last_error`].
//!
//! ## Logging
//!
//! Every stage emits [`tracing`] events. Install a subscriber in the host to see them; the
//! library never installs one itself.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

pub mod config;
pub mod delegate;
pub mod host;
pub mod locator;
pub mod paths;
pub mod runtime;
pub mod tpa;

/// `clrbridge` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `clrbridge` Error type
///
/// The main error type for all operations in this crate. See [`Error`] for the variants.
pub use error::Error;

pub use config::HostConfig;
pub use delegate::{Delegate, ManagedHandle, ManagedMethod};
pub use host::{HostContext, InitMode};
pub use runtime::{LoadedRuntime, RuntimeState};
