//! Feature flag resolution.
//!
//! The five recognized flags are read from `[properties]` exactly once per
//! invocation, before any task is constructed. Every later branch reads the
//! resolved copy; nothing re-derives a flag mid-pipeline.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::ConfigError;

/// The fixed, enumerable set of recognized flag names
pub const FLAG_NAMES: [&str; 5] = [
    "useCoreMod",
    "useMixins",
    "useSpark",
    "useAccessTransformer",
    "includeMod",
];

/// Resolve one named boolean property.
///
/// Fails when the property is absent or its value is not exactly `true` or
/// `false`. Callers pass names from [`FLAG_NAMES`]; an unknown name is a
/// caller bug, not a resolver concern.
pub fn resolve_flag(
    properties: &BTreeMap<String, String>,
    name: &str,
) -> Result<bool, ConfigError> {
    let value = properties
        .get(name)
        .ok_or_else(|| ConfigError::MissingProperty(name.to_string()))?;
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::InvalidBoolean {
            name: name.to_string(),
            value: other.to_string(),
        }),
    }
}

/// The resolved flag set. Immutable for the whole build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub use_core_mod: bool,
    pub use_mixins: bool,
    pub use_spark: bool,
    pub use_access_transformer: bool,
    pub include_mod: bool,
}

impl FeatureFlags {
    /// Resolve all five flags from the property table
    pub fn resolve(properties: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            use_core_mod: resolve_flag(properties, "useCoreMod")?,
            use_mixins: resolve_flag(properties, "useMixins")?,
            use_spark: resolve_flag(properties, "useSpark")?,
            use_access_transformer: resolve_flag(properties, "useAccessTransformer")?,
            include_mod: resolve_flag(properties, "includeMod")?,
        })
    }

    /// All flags off; the smallest valid build
    pub fn none() -> Self {
        Self {
            use_core_mod: false,
            use_mixins: false,
            use_spark: false,
            use_access_transformer: false,
            include_mod: false,
        }
    }
}
