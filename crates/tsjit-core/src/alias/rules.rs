use serde::Serialize;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use thiserror::Error;

use super::discovery::{normalize, RawPathConfig};

/// One `pattern -> target` aliasing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasRule {
    pub pattern: String,
    pub target: String,
}

impl AliasRule {
    pub fn new(pattern: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: target.into(),
        }
    }

    /// Whether an import specifier is captured by this rule
    pub fn matches(&self, specifier: &str) -> bool {
        self.captured_suffix(specifier).is_some()
    }

    /// The part of `specifier` matched by the pattern's wildcard.
    ///
    /// A pattern without a wildcard matches only the identical specifier and
    /// captures nothing. It is never a prefix: `@config` does not match
    /// `@config/x`, which needs an explicit `@config/*` rule.
    fn captured_suffix<'s>(&self, specifier: &'s str) -> Option<&'s str> {
        match self.pattern.split_once('*') {
            Some((prefix, suffix)) => {
                let rest = specifier.strip_prefix(prefix)?;
                if rest.len() < suffix.len() {
                    return None;
                }
                rest.strip_suffix(suffix)
            }
            None => (specifier == self.pattern).then_some(""),
        }
    }

    /// Resolve a specifier through this rule, anchored at `base_dir`.
    ///
    /// Returns `None` if the rule does not match.
    pub fn resolve(&self, specifier: &str, base_dir: &Path) -> Option<PathBuf> {
        let captured = self.captured_suffix(specifier)?;

        let relative = if self.pattern.ends_with('*') {
            match self.target.strip_suffix('*') {
                Some(target_prefix) => format!("{target_prefix}{captured}"),
                None => format!("{}{captured}", self.target),
            }
        } else {
            self.target.clone()
        };

        let relative = relative.replace('/', MAIN_SEPARATOR_STR);
        Some(normalize(&base_dir.join(relative)))
    }
}

/// Why a configuration was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("no baseUrl")]
    NoBaseUrl,

    #[error("pattern {0:?} has no literal characters")]
    AmbiguousPattern(String),

    #[error("pattern {0:?} has more than one wildcard")]
    MultipleWildcards(String),

    #[error("pattern {0:?} maps to more than one target")]
    MultipleTargets(String),

    #[error("pattern {0:?} maps to no target")]
    NoTargets(String),
}

/// Validated aliasing configuration for a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFingerprint {
    pub base_dir: PathBuf,
    pub rules: Vec<AliasRule>,
    pub identity_hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord<'a> {
    absolute_base_url: &'a Path,
    paths: &'a [AliasRule],
}

impl ConfigFingerprint {
    /// Validate a raw record. Any violation rejects the whole configuration.
    pub fn from_raw(raw: &RawPathConfig) -> Result<Self, RejectReason> {
        let base_dir = raw.base_url.clone().ok_or(RejectReason::NoBaseUrl)?;

        let mut rules = Vec::with_capacity(raw.paths.len());
        for (key, targets) in &raw.paths {
            // The empty key has no literal characters either
            if key.chars().all(|c| matches!(c, '*' | '.' | '/' | '\\')) {
                return Err(RejectReason::AmbiguousPattern(key.clone()));
            }
            if key.matches('*').count() > 1 {
                return Err(RejectReason::MultipleWildcards(key.clone()));
            }
            match targets.as_slice() {
                [target] => rules.push(AliasRule::new(key.clone(), target.clone())),
                [] => return Err(RejectReason::NoTargets(key.clone())),
                _ => return Err(RejectReason::MultipleTargets(key.clone())),
            }
        }

        let identity_hash = identity_hash(&base_dir, &rules);

        Ok(Self {
            base_dir,
            rules,
            identity_hash,
        })
    }

    /// Resolve an import specifier through the first matching rule
    pub fn resolve_import(&self, specifier: &str) -> Option<PathBuf> {
        self.rules
            .iter()
            .find_map(|rule| rule.resolve(specifier, &self.base_dir))
    }
}

fn identity_hash(base_dir: &Path, rules: &[AliasRule]) -> String {
    let record = IdentityRecord {
        absolute_base_url: base_dir,
        paths: rules,
    };
    // Non UTF-8 base directories have no JSON form
    let json = serde_json::to_string(&record).unwrap_or_else(|_| format!("{base_dir:?}{rules:?}"));
    blake3::hash(json.as_bytes()).to_hex().to_string()
}
