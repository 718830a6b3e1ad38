use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

/// Overrides the on-disk cache root.
pub const CACHE_DIR_ENV: &str = "TSJIT_CACHE_DIR";

/// Forces every cache lookup to miss.
pub const IGNORE_CACHE_ENV: &str = "TSJIT_IGNORE_CACHE";

/// Enables component-testing mode (stub substitution and template preprocessing).
pub const COMPONENT_TESTING_ENV: &str = "TSJIT_COMPONENT_TESTING";

/// Selects native-module output for the build.
pub const ESM_ENV: &str = "TSJIT_ESM";

/// Directory name used under the platform temp dir when no override is set
pub const DEFAULT_CACHE_DIR_NAME: &str = "tsjit-transform-cache";

/// Build-wide lowering target. Only participates in the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildMode {
    #[serde(rename = "commonjs")]
    CommonJs,
    #[serde(rename = "esm")]
    NativeModules,
}

impl Default for BuildMode {
    fn default() -> Self {
        BuildMode::CommonJs
    }
}

impl BuildMode {
    /// String folded into the cache key
    pub fn as_key_str(self) -> &'static str {
        match self {
            BuildMode::CommonJs => "no_esm",
            BuildMode::NativeModules => "esm",
        }
    }
}

/// Settings that control the transform cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSettings {
    /// Root directory holding the sharded artifacts
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Always report a cache miss (default: false)
    #[serde(default)]
    pub ignore_cache: bool,

    /// Component-testing mode (default: false)
    #[serde(default)]
    pub component_testing: bool,

    /// Build-mode flag (default: commonjs)
    #[serde(default)]
    pub build_mode: BuildMode,
}

pub fn default_cache_root() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            ignore_cache: false,
            component_testing: false,
            build_mode: BuildMode::CommonJs,
        }
    }
}

impl CacheSettings {
    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars_os())
    }

    /// Read settings from an explicit set of variables.
    ///
    /// Unknown variables are ignored, missing ones keep their defaults.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let mut settings = Self::default();

        for (key, value) in vars {
            let key = key.into();
            let value = value.into();
            match key.to_str() {
                Some(CACHE_DIR_ENV) if !value.is_empty() => {
                    settings.cache_root = PathBuf::from(value);
                }
                Some(IGNORE_CACHE_ENV) => settings.ignore_cache = is_truthy(&value),
                Some(COMPONENT_TESTING_ENV) => settings.component_testing = is_truthy(&value),
                Some(ESM_ENV) => {
                    settings.build_mode = if is_truthy(&value) {
                        BuildMode::NativeModules
                    } else {
                        BuildMode::CommonJs
                    };
                }
                _ => {}
            }
        }

        settings
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }
}

fn is_truthy(value: &OsString) -> bool {
    let value = value.to_string_lossy();
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}
