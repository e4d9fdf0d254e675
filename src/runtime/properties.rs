//! The runtime start property table.
//!
//! `coreclr_initialize` takes two parallel arrays of property names and values. The host
//! always passes the same six properties, in the same order:
//!
//! | key | value |
//! |---|---|
//! | `TRUSTED_PLATFORM_ASSEMBLIES` | joined trusted-assembly list |
//! | `APP_PATHS` | application directory |
//! | `APP_NI_PATHS` | application directory |
//! | `NATIVE_DLL_SEARCH_DIRECTORIES` | joined native search paths |
//! | `System.GC.Server` | `"true"` or `"false"` |
//! | `AppDomainCompatSwitch` | `UseLatestBehaviorWhenTFMNotSpecified` |

use crate::{
    tpa::{SearchPathList, TrustedAssemblyList},
    Result,
};
use std::{ffi::CString, path::Path};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Value of the app-domain compatibility switch.
pub const APP_DOMAIN_COMPAT_LATEST: &str = "UseLatestBehaviorWhenTFMNotSpecified";

/// Names of the properties passed to the runtime, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, strum::Display)]
pub enum PropertyKey {
    /// Complete paths of the fully trusted assemblies
    #[strum(serialize = "TRUSTED_PLATFORM_ASSEMBLIES")]
    TrustedPlatformAssemblies,
    /// Paths probed by the assembly loader
    #[strum(serialize = "APP_PATHS")]
    AppPaths,
    /// Additional paths probed for native images
    #[strum(serialize = "APP_NI_PATHS")]
    AppNiPaths,
    /// Paths probed for native libraries called by P/Invoke
    #[strum(serialize = "NATIVE_DLL_SEARCH_DIRECTORIES")]
    NativeDllSearchDirectories,
    /// Server garbage collection flag
    #[strum(serialize = "System.GC.Server")]
    ServerGc,
    /// App-domain compatibility behaviour
    #[strum(serialize = "AppDomainCompatSwitch")]
    AppDomainCompatSwitch,
}

impl PropertyKey {
    /// The literal key string handed to the runtime.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Whether a server GC environment value enables server GC.
///
/// Only `"1"` and a case-insensitive `"true"` count; anything else, including an unset
/// variable, disables it.
#[must_use]
pub fn server_gc_enabled(value: Option<&str>) -> bool {
    match value {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        None => false,
    }
}

/// The `System.GC.Server` property value for a server GC environment value.
#[must_use]
pub fn server_gc_value(value: Option<&str>) -> &'static str {
    bool_property(server_gc_enabled(value))
}

fn bool_property(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// The ordered key/value table passed to `coreclr_initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProperties {
    values: Vec<(PropertyKey, String)>,
}

impl RuntimeProperties {
    /// Builds the table from the bootstrap results.
    #[must_use]
    pub fn new(
        tpa: &TrustedAssemblyList,
        app_dir: &Path,
        native_search_paths: &SearchPathList,
        server_gc: bool,
    ) -> Self {
        let app_dir = app_dir.to_string_lossy().into_owned();

        let values = PropertyKey::iter()
            .map(|key| {
                let value = match key {
                    PropertyKey::TrustedPlatformAssemblies => tpa.join(),
                    PropertyKey::AppPaths | PropertyKey::AppNiPaths => app_dir.clone(),
                    PropertyKey::NativeDllSearchDirectories => native_search_paths.join(),
                    PropertyKey::ServerGc => bool_property(server_gc).to_string(),
                    PropertyKey::AppDomainCompatSwitch => APP_DOMAIN_COMPAT_LATEST.to_string(),
                };
                (key, value)
            })
            .collect();

        Self { values }
    }

    /// Value of a property.
    #[must_use]
    pub fn get(&self, key: PropertyKey) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over `(key, value)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// NUL-terminated copies of the keys and values, in table order.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidString`] if a value contains a NUL byte.
    pub(crate) fn to_c_strings(&self) -> Result<(Vec<CString>, Vec<CString>)> {
        let mut keys = Vec::with_capacity(self.values.len());
        let mut values = Vec::with_capacity(self.values.len());
        for (key, value) in &self.values {
            keys.push(CString::new(key.as_str())?);
            values.push(CString::new(value.as_str())?);
        }
        Ok((keys, values))
    }
}
