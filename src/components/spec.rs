//! # Declarative component specification.
//!
//! A [`ComponentSpec`] is the configuration-side description of a component: its type
//! identifier, free-form settings and ordered child specifications. It is read from the
//! `component:` section of a configuration file:
//!
//! ```yaml
//! component:
//!   type: container          # optional; defaults to the alias ("root" here → error)
//!   components:
//!     db:
//!       type: postgres
//!       url: postgres://localhost/app
//!     web:                   # type defaults to the alias: "web"
//!       port: 8080
//! ```
//!
//! ## Rules
//! - `type` must be a string; when absent the component's alias is its type.
//! - `components` must be a mapping of alias → spec (a null spec means "no settings").
//! - Every other key is a setting, handed to the component's constructor.
//! - Child order follows the document order.

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;
use crate::loader::merge_config;

const TYPE_KEY: &str = "type";
const COMPONENTS_KEY: &str = "components";

/// Declarative description of one component and its children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentSpec {
    /// Type identifier resolved through the [`ComponentRegistry`](crate::ComponentRegistry).
    pub kind: Option<String>,
    /// Free-form settings.
    pub settings: Mapping,
    /// Child specifications, in order.
    pub components: Vec<(String, ComponentSpec)>,
}

impl ComponentSpec {
    /// Spec of type `kind` with no settings or children.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Adds (or replaces) a setting.
    pub fn with_setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.settings.insert(Value::from(key), value.into());
        self
    }

    /// Appends (or replaces) a child specification.
    pub fn with_child(mut self, alias: impl Into<String>, spec: ComponentSpec) -> Self {
        let alias = alias.into();
        match self.components.iter_mut().find(|(a, _)| *a == alias) {
            Some((_, existing)) => *existing = spec,
            None => self.components.push((alias, spec)),
        }
        self
    }

    /// The type identifier, falling back to `alias`.
    pub fn kind_or<'a>(&'a self, alias: &'a str) -> &'a str {
        self.kind.as_deref().unwrap_or(alias)
    }

    /// Parses a spec from a YAML value.
    pub fn from_value(alias: &str, value: &Value) -> Result<Self, ConfigError> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(map) => map,
            _ => return Err(invalid(alias, "expected a mapping")),
        };

        let mut spec = Self::default();
        for (key, value) in map {
            let Some(key) = key.as_str() else {
                return Err(invalid(alias, "setting names must be strings"));
            };
            match key {
                TYPE_KEY => match value {
                    Value::String(kind) => spec.kind = Some(kind.clone()),
                    _ => return Err(invalid(alias, "\"type\" must be a string")),
                },
                COMPONENTS_KEY => spec.components = parse_children(alias, value)?,
                _ => {
                    spec.settings.insert(Value::from(key), value.clone());
                }
            }
        }
        Ok(spec)
    }

    /// Renders the spec back into its YAML form.
    pub fn to_value(&self) -> Value {
        let mut map = Mapping::new();
        if let Some(kind) = &self.kind {
            map.insert(Value::from(TYPE_KEY), Value::from(kind.as_str()));
        }
        for (k, v) in &self.settings {
            map.insert(k.clone(), v.clone());
        }
        if !self.components.is_empty() {
            let children: Mapping = self
                .components
                .iter()
                .map(|(alias, spec)| (Value::from(alias.as_str()), spec.to_value()))
                .collect();
            map.insert(Value::from(COMPONENTS_KEY), Value::Mapping(children));
        }
        Value::Mapping(map)
    }

    /// Deserializes the settings into `T`.
    pub fn settings<T: DeserializeOwned>(&self, alias: &str) -> Result<T, ConfigError> {
        serde_yaml::from_value(Value::Mapping(self.settings.clone())).map_err(|source| {
            ConfigError::ComponentSettings {
                alias: alias.to_string(),
                source,
            }
        })
    }

    /// Returns `self` merged over `defaults`: mappings merge recursively and `self` wins
    /// on conflicts.
    pub fn merged_over(&self, alias: &str, defaults: &ComponentSpec) -> Result<Self, ConfigError> {
        let merged = merge_config(defaults.to_value(), self.to_value());
        Self::from_value(alias, &merged)
    }
}

fn parse_children(alias: &str, value: &Value) -> Result<Vec<(String, ComponentSpec)>, ConfigError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Mapping(children) => children
            .iter()
            .map(|(child, spec)| {
                let child = child
                    .as_str()
                    .ok_or_else(|| invalid(alias, "child aliases must be strings"))?;
                Ok((child.to_string(), ComponentSpec::from_value(child, spec)?))
            })
            .collect(),
        _ => Err(invalid(alias, "\"components\" must be a mapping")),
    }
}

fn invalid(alias: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSpec {
        alias: alias.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn parse(text: &str) -> ComponentSpec {
        let value: Value = serde_yaml::from_str(text).expect("yaml");
        ComponentSpec::from_value("root", &value).expect("spec")
    }

    #[test]
    fn splits_type_settings_and_children() {
        let spec = parse(
            r#"
type: container
components:
  web:
    port: 8080
  db:
    type: postgres
    url: pg://x
  cache:
"#,
        );
        assert_eq!(spec.kind.as_deref(), Some("container"));
        let aliases: Vec<&str> = spec.components.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(aliases, vec!["web", "db", "cache"]);

        let (_, web) = &spec.components[0];
        assert_eq!(web.kind_or("web"), "web");

        #[derive(Deserialize)]
        struct Web {
            port: u16,
        }
        assert_eq!(web.settings::<Web>("web").expect("settings").port, 8080);
        assert_eq!(spec.components[1].1.kind.as_deref(), Some("postgres"));
        assert_eq!(spec.components[2].1, ComponentSpec::default());
    }

    #[test]
    fn rejects_malformed_specs() {
        let value: Value = serde_yaml::from_str("type: 5").expect("yaml");
        let err = ComponentSpec::from_value("root", &value).unwrap_err();
        assert_eq!(err.as_label(), "config_invalid_spec");

        let value: Value = serde_yaml::from_str("components: [a, b]").expect("yaml");
        assert!(ComponentSpec::from_value("root", &value).is_err());
    }

    #[test]
    fn external_config_wins_over_local_defaults() {
        let defaults = ComponentSpec::new("container")
            .with_child("web", ComponentSpec::new("web").with_setting("port", 80))
            .with_child("db", ComponentSpec::new("postgres"));
        let external = parse(
            r#"
components:
  web:
    port: 8080
"#,
        );

        let merged = external.merged_over("root", &defaults).expect("merge");
        assert_eq!(merged.kind.as_deref(), Some("container"));
        let web = &merged.components[0].1;
        assert_eq!(web.kind.as_deref(), Some("web"));
        assert_eq!(web.settings.get("port"), Some(&Value::from(8080)));
        assert_eq!(merged.components.len(), 2);
    }
}
