//! # YAML configuration loader.
//!
//! Turns configuration files plus command-line overrides into an [`AppConfig`]: the
//! runtime settings and the root [`ComponentSpec`] of the selected service.
//!
//! ```text
//! files ──merge──► document ──--set──► document ──select service──► AppConfig
//!   (!Env / !TextFile resolved per file)        (services.<name> merged over top level)
//! ```
//!
//! ## Rules
//! - Every document root must be a mapping; files merge in order via [`merge_config`].
//! - `--set a.b.c=value` parses `value` as YAML; `\.` escapes a literal dot.
//! - A top-level `component:` defines the service `default` (unless `services` has it).
//! - Service selection: explicit name → `STRATA_SERVICE` → the only service → `default`.
//! - `start_timeout`, `require_timeout` and `grace` are seconds (int or float);
//!   `require_timeout: null` means "wait forever"; `bus_capacity` is an integer no larger than
//!   [`MAX_BUS_CAPACITY`].
//! - Unknown top-level keys are kept in [`AppConfig::extra`].

mod merge;
mod tags;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::{Mapping, Value};

use crate::components::ComponentSpec;
use crate::config::{RuntimeConfig, MAX_BUS_CAPACITY};
use crate::error::ConfigError;

pub use merge::merge_config;

/// Environment variable consulted when no service is selected explicitly.
pub const SERVICE_ENV: &str = "STRATA_SERVICE";

/// Name of the implicit service defined by a top-level `component:` key.
pub const DEFAULT_SERVICE: &str = "default";

const ROOT_ALIAS: &str = "root";

/// Fully resolved configuration of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Name of the selected service.
    pub service: String,
    /// Runtime settings.
    pub runtime: RuntimeConfig,
    /// Specification of the root component.
    pub component: ComponentSpec,
    /// Remaining top-level keys.
    pub extra: Mapping,
}

/// Builder collecting configuration sources.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    sources: Vec<Source>,
    overrides: Vec<String>,
    service: Option<String>,
}

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline { origin: String, text: String },
}

impl ConfigLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a configuration file.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.sources.push(Source::File(path.as_ref().to_path_buf()));
        self
    }

    /// Adds several configuration files, in order.
    pub fn files<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().fold(self, |loader, path| loader.file(path))
    }

    /// Adds an in-memory YAML document; `origin` names it in errors.
    pub fn document(mut self, origin: impl Into<String>, text: impl Into<String>) -> Self {
        self.sources.push(Source::Inline {
            origin: origin.into(),
            text: text.into(),
        });
        self
    }

    /// Adds a `key=value` override applied after all documents.
    pub fn set(mut self, assignment: impl Into<String>) -> Self {
        self.overrides.push(assignment.into());
        self
    }

    /// Selects a service explicitly.
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service = Some(name.into());
        self
    }

    /// Reads every source and resolves the selected service.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut document = Value::Mapping(Mapping::new());
        for source in &self.sources {
            document = merge_config(document, source.read()?);
        }
        let Value::Mapping(mut config) = document else {
            return Err(ConfigError::NotAMapping {
                origin: "merged configuration".to_string(),
            });
        };

        for assignment in &self.overrides {
            let (key, raw) = merge::parse_override(assignment)?;
            let value: Value = serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml {
                origin: format!("override {key:?}"),
                source,
            })?;
            merge::apply_override(&mut config, key, tags::resolve_tags(value)?)?;
        }

        let env_service = std::env::var(SERVICE_ENV).ok().filter(|s| !s.is_empty());
        let selected = self.service.clone().or(env_service);
        let (service, service_config) = select_service(&mut config, selected)?;
        let Value::Mapping(mut config) =
            merge_config(Value::Mapping(config), service_config)
        else {
            return Err(ConfigError::InvalidServices);
        };

        let runtime = runtime_config(&mut config)?;
        let component = match config.remove(&Value::from("component")) {
            Some(value) => ComponentSpec::from_value(ROOT_ALIAS, &value)?,
            None => return Err(ConfigError::MissingComponent { service }),
        };

        Ok(AppConfig {
            service,
            runtime,
            component,
            extra: config,
        })
    }
}

impl Source {
    fn read(&self) -> Result<Value, ConfigError> {
        let (origin, text) = match self {
            Source::File(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                (path.display().to_string(), text)
            }
            Source::Inline { origin, text } => (origin.clone(), text.clone()),
        };

        let value: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            origin: origin.clone(),
            source,
        })?;
        match tags::resolve_tags(value)? {
            value @ Value::Mapping(_) => Ok(value),
            _ => Err(ConfigError::NotAMapping { origin }),
        }
    }
}

/// Pops `services` (and `component`, when it defines the default service) out of
/// `config` and returns the selected service's name and configuration.
fn select_service(
    config: &mut Mapping,
    selected: Option<String>,
) -> Result<(String, Value), ConfigError> {
    let mut services = match config.remove(&Value::from("services")) {
        None | Some(Value::Null) => Mapping::new(),
        Some(Value::Mapping(map)) => map,
        Some(_) => return Err(ConfigError::InvalidServices),
    };

    let default_key = Value::from(DEFAULT_SERVICE);
    if !services.contains_key(&default_key) {
        if let Some(component) = config.remove(&Value::from("component")) {
            let mut service = Mapping::new();
            service.insert(Value::from("component"), component);
            services.insert(default_key.clone(), Value::Mapping(service));
        }
    }

    if services.is_empty() {
        return Err(ConfigError::NoServices);
    }

    let name = match selected {
        Some(name) => name,
        None if services.len() == 1 => services
            .keys()
            .next()
            .and_then(Value::as_str)
            .ok_or(ConfigError::InvalidServices)?
            .to_string(),
        None if services.contains_key(&default_key) => DEFAULT_SERVICE.to_string(),
        None => return Err(ConfigError::AmbiguousService),
    };

    match services.remove(&Value::from(name.as_str())) {
        Some(Value::Null) => Ok((name, Value::Mapping(Mapping::new()))),
        Some(value @ Value::Mapping(_)) => Ok((name, value)),
        Some(_) => Err(ConfigError::InvalidServices),
        None => Err(ConfigError::UnknownService(name)),
    }
}

/// Pops the runtime keys out of `config`, starting from the defaults.
fn runtime_config(config: &mut Mapping) -> Result<RuntimeConfig, ConfigError> {
    let mut runtime = RuntimeConfig::default();
    if let Some(value) = config.remove(&Value::from("start_timeout")) {
        runtime.start_timeout = seconds("start_timeout", &value)?;
    }
    if let Some(value) = config.remove(&Value::from("require_timeout")) {
        runtime.require_timeout = match value {
            Value::Null => None,
            value => Some(seconds("require_timeout", &value)?),
        };
    }
    if let Some(value) = config.remove(&Value::from("grace")) {
        runtime.grace = seconds("grace", &value)?;
    }
    if let Some(value) = config.remove(&Value::from("bus_capacity")) {
        let capacity = value
            .as_u64()
            .ok_or_else(|| invalid_setting("bus_capacity", "expected a non-negative integer"))?;
        runtime.bus_capacity = usize::try_from(capacity)
            .ok()
            .filter(|n| *n <= MAX_BUS_CAPACITY)
            .ok_or_else(|| {
                invalid_setting("bus_capacity", &format!("must not exceed {MAX_BUS_CAPACITY}"))
            })?;
    }
    Ok(runtime)
}

fn seconds(key: &str, value: &Value) -> Result<Duration, ConfigError> {
    let secs = value
        .as_f64()
        .ok_or_else(|| invalid_setting(key, "expected a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|err| invalid_setting(key, &err.to_string()))
}

fn invalid_setting(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
