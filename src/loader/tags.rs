//! Custom YAML tags.
//!
//! - `!Env NAME` → the value of environment variable `NAME`, or null when unset
//! - `!TextFile PATH` → the contents of the file at `PATH`
//!
//! Other tags are left untouched so that settings types can still deserialize enums
//! from them.

use serde_yaml::value::TaggedValue;
use serde_yaml::Value;

use crate::error::ConfigError;

/// Replaces every `!Env` / `!TextFile` node in `value`.
pub(crate) fn resolve_tags(value: Value) -> Result<Value, ConfigError> {
    match value {
        Value::Tagged(tagged) => resolve_tagged(*tagged),
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| Ok((k, resolve_tags(v)?)))
            .collect::<Result<_, ConfigError>>()
            .map(Value::Mapping),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(resolve_tags)
            .collect::<Result<_, ConfigError>>()
            .map(Value::Sequence),
        other => Ok(other),
    }
}

fn resolve_tagged(tagged: TaggedValue) -> Result<Value, ConfigError> {
    let tag = tagged.tag.to_string();
    match tag.trim_start_matches('!') {
        "Env" => {
            let name = scalar(&tag, &tagged.value)?;
            Ok(std::env::var(&name).map(Value::String).unwrap_or(Value::Null))
        }
        "TextFile" => {
            let path = scalar(&tag, &tagged.value)?;
            std::fs::read_to_string(&path)
                .map(Value::String)
                .map_err(|err| ConfigError::Tag {
                    tag,
                    value: path,
                    reason: err.to_string(),
                })
        }
        _ => Ok(Value::Tagged(Box::new(TaggedValue {
            tag: tagged.tag,
            value: resolve_tags(tagged.value)?,
        }))),
    }
}

fn scalar(tag: &str, value: &Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(ConfigError::Tag {
            tag: tag.to_string(),
            value: format!("{other:?}"),
            reason: "expected a string".to_string(),
        }),
    }
}
