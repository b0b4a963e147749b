//! Lock and cache key rendering.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::KeyError;
use crate::template::KeyTemplate;
use crate::value::KeyArgs;

/// A resolved lock key: `"<operation>:<rendered expression>"`.
///
/// Two calls contend for the same lock exactly when their keys are equal, so
/// the rendering must be deterministic for identical arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Builds a key from an operation name and an already rendered parameter.
    pub fn for_operation(operation: &str, param: impl fmt::Display) -> Self {
        Self(format!("{operation}:{param}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LockKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Resolves `template` against `args` and prefixes the operation name.
pub fn generate_lock_key(
    operation: &str,
    template: &KeyTemplate,
    args: &KeyArgs,
) -> Result<LockKey, KeyError> {
    let rendered = template.render(args)?;
    Ok(LockKey::for_operation(operation, rendered))
}

/// Builds a cache key from a prefix, an optional key segment and the call arguments.
///
/// When `id` names a bound argument the key is `prefix[:key]:<id value>`.
/// Otherwise the canonical form of every argument is appended in order.
pub fn generate_cache_key(prefix: &str, key: &str, id: &str, args: &KeyArgs) -> String {
    let mut out = String::from(prefix);
    if !key.is_empty() {
        out.push(':');
        out.push_str(key);
    }

    if let Some(value) = (!id.is_empty()).then(|| args.get(id)).flatten() {
        out.push(':');
        value.write_canonical(&mut out);
        return out;
    }

    for value in args.values() {
        out.push(':');
        value.write_canonical(&mut out);
    }
    out
}
