//! Per-directory import-path aliasing.
//!
//! Configuration is discovered by walking up from a source file's directory,
//! validated into a [`ConfigFingerprint`], and memoized per directory by the
//! [`ConfigResolver`]. Anything malformed degrades to "no aliases".

mod discovery;
mod resolver;
mod rules;

pub use discovery::{find_tsconfig, ConfigDiscovery, RawPathConfig, TsconfigDiscovery, TSCONFIG_FILE_NAME};
pub use resolver::ConfigResolver;
pub use rules::{AliasRule, ConfigFingerprint, RejectReason};
