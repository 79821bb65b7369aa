//! Merging of configuration documents and `--set` overrides.

use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;

/// Merges `overrides` into `base`.
///
/// When both sides hold a mapping under the same key the two mappings are merged
/// recursively; any other value in `overrides` replaces the one in `base`. Key order of
/// `base` is preserved, new keys are appended.
///
/// ```
/// use serde_yaml::Value;
/// use strata::merge_config;
///
/// let base: Value = serde_yaml::from_str("a: {x: 1, y: 2}\nb: 1").unwrap();
/// let over: Value = serde_yaml::from_str("a: {y: 3}\nb: [1]").unwrap();
/// let merged = merge_config(base, over);
///
/// let expected: Value = serde_yaml::from_str("a: {x: 1, y: 3}\nb: [1]").unwrap();
/// assert_eq!(merged, expected);
/// ```
pub fn merge_config(base: Value, overrides: Value) -> Value {
    match (base, overrides) {
        (Value::Mapping(mut base), Value::Mapping(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_mapping() && value.is_mapping() => {
                        let old = std::mem::replace(existing, Value::Null);
                        *existing = merge_config(old, value);
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
            Value::Mapping(base)
        }
        (_, overrides) => overrides,
    }
}

/// Splits an override key on dots not preceded by a backslash; `\.` becomes `.`.
pub(crate) fn split_key(key: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                current.push('.');
            }
            '.' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Splits `key=value` into its parts.
pub(crate) fn parse_override(raw: &str) -> Result<(&str, &str), ConfigError> {
    raw.split_once('=')
        .ok_or_else(|| ConfigError::MalformedOverride(raw.to_string()))
}

/// Stores `value` at the dotted `key` inside `config`, creating intermediate mappings.
pub(crate) fn apply_override(
    config: &mut Mapping,
    key: &str,
    value: Value,
) -> Result<(), ConfigError> {
    let parts = split_key(key);
    let Some((last, prefix)) = parts.split_last() else {
        return Err(ConfigError::MalformedOverride(key.to_string()));
    };

    let mut section = config;
    for (depth, part) in prefix.iter().enumerate() {
        let entry = section
            .entry(Value::from(part.as_str()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        section = match entry {
            Value::Mapping(map) => map,
            _ => {
                return Err(ConfigError::OverrideConflict {
                    key: key.to_string(),
                    path: parts[..=depth].join("."),
                })
            }
        };
    }
    section.insert(Value::from(last.as_str()), value);
    Ok(())
}
