//! Error types used by the strata runtime, contexts and components.
//!
//! This module defines the error enums of each layer:
//!
//! - [`ContextError`]: misuse of or failed lookups in a [`Context`](crate::Context).
//! - [`TeardownError`]: aggregate of every teardown callback that failed during a close.
//! - [`ComponentError`]: failure of a component's `start`.
//! - [`RuntimeError`]: failures reported by the [`Orchestrator`](crate::Orchestrator).
//! - [`ConfigError`]: configuration loading and component instantiation failures.
//!
//! Each type provides `as_label` (stable snake_case label for logs/metrics).

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::context::ResourceKey;
use crate::core::LifecycleState;

/// Type-erased error returned by user callbacks (factories, teardown callbacks, tasks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Renders a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// # Errors produced by context operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ContextError {
    /// The `(type, name)` pair is already registered in this context.
    #[error("context {context} already contains a resource {key}")]
    DuplicateResource {
        /// Path of the context that rejected the publication.
        context: Arc<str>,
        /// The conflicting key.
        key: ResourceKey,
    },

    /// No matching resource was published before the wait ended.
    #[error("resource {key} not found{}", waited_suffix(.timeout))]
    ResourceNotFound {
        /// The requested key.
        key: ResourceKey,
        /// How long the request waited (`None` = did not wait).
        timeout: Option<Duration>,
    },

    /// The context has begun (or finished) tearing down.
    #[error("context {context} is closed or being torn down")]
    ContextClosed {
        /// Path of the closed context.
        context: Arc<str>,
    },

    /// Resource names must be nonempty and consist of ASCII alphanumerics and `_`.
    #[error("invalid resource name {name:?}: must be nonempty and contain only alphanumerics and underscores")]
    InvalidResourceName {
        /// The rejected name.
        name: Arc<str>,
    },

    /// A resource factory returned an error while materializing its value.
    #[error("factory for resource {key} failed: {error}")]
    FactoryFailed {
        /// Key the factory was registered under.
        key: ResourceKey,
        /// The factory's error message.
        error: String,
    },

    /// A stored value does not have the type its key names.
    ///
    /// Keys carry the `TypeId` of the published value, so this indicates a bug in the
    /// registry rather than a lookup miss.
    #[error("resource {key} holds a value of a different type")]
    TypeMismatch {
        /// Key the value was stored under.
        key: ResourceKey,
    },
}

fn waited_suffix(timeout: &Option<Duration>) -> String {
    match timeout {
        Some(t) => format!(" within {t:?}"),
        None => String::new(),
    }
}

impl ContextError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ContextError::DuplicateResource { .. } => "duplicate_resource",
            ContextError::ResourceNotFound { .. } => "resource_not_found",
            ContextError::ContextClosed { .. } => "context_closed",
            ContextError::InvalidResourceName { .. } => "invalid_resource_name",
            ContextError::FactoryFailed { .. } => "factory_failed",
            ContextError::TypeMismatch { .. } => "resource_type_mismatch",
        }
    }
}

/// A single teardown callback failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    /// Path of the context the callback was registered on.
    pub context: Arc<str>,
    /// Label the callback was registered with.
    pub callback: Arc<str>,
    /// Error (or panic) message.
    pub error: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.callback, self.error)
    }
}

/// # Aggregate of teardown callback failures.
///
/// A close never stops at the first failing callback; every failure of the closed
/// context and of its descendants is collected here, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownError {
    failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown callback(s) failed: ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

impl TeardownError {
    /// Wraps the collected failures; `None` when nothing failed.
    pub(crate) fn from_failures(failures: Vec<TeardownFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    /// Individual failures, in the order the callbacks ran.
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }

    /// Consumes the error, returning the individual failures.
    pub fn into_failures(self) -> Vec<TeardownFailure> {
        self.failures
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "teardown_failed"
    }
}

/// # Errors produced while starting a component.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ComponentError {
    /// A context operation failed inside `start`.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The component reported a failure.
    #[error("start failed: {error}")]
    Fail {
        /// The failure message.
        error: String,
    },

    /// The component returned an arbitrary error.
    #[error("{0}")]
    Other(BoxError),

    /// A declared requirement did not become available.
    #[error("component {component}: requirement not satisfied: {source}")]
    Requirement {
        /// Name of the waiting component.
        component: Arc<str>,
        /// The failed lookup.
        #[source]
        source: ContextError,
    },

    /// A child of a container component failed.
    #[error("child component {alias} failed: {source}")]
    Child {
        /// Alias of the failed child.
        alias: Arc<str>,
        /// The child's failure.
        #[source]
        source: Box<ComponentError>,
    },

    /// `start` panicked.
    #[error("component {component} panicked: {info}")]
    Panicked {
        /// Name of the component.
        component: Arc<str>,
        /// Panic payload, if it was a string.
        info: String,
    },

    /// Two children of a container were registered under the same alias.
    #[error("there is already a child component named {alias:?}")]
    DuplicateChild {
        /// The conflicting alias.
        alias: Arc<str>,
    },
}

impl From<BoxError> for ComponentError {
    fn from(err: BoxError) -> Self {
        ComponentError::Other(err)
    }
}

impl ComponentError {
    /// Shorthand for [`ComponentError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        ComponentError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ComponentError::Context(e) => e.as_label(),
            ComponentError::Fail { .. } => "component_failed",
            ComponentError::Other(_) => "component_error",
            ComponentError::Requirement { .. } => "component_requirement",
            ComponentError::Child { .. } => "component_child_failed",
            ComponentError::Panicked { .. } => "component_panicked",
            ComponentError::DuplicateChild { .. } => "component_duplicate_child",
        }
    }

    /// Follows [`ComponentError::Child`] links down to the failure that started it.
    pub fn root_cause(&self) -> &ComponentError {
        let mut err = self;
        while let ComponentError::Child { source, .. } = err {
            err = source;
        }
        err
    }

    /// Aliases of the container children the failure travelled through, outermost first.
    pub fn path(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut err = self;
        while let ComponentError::Child { alias, source } = err {
            path.push(alias.as_ref());
            err = source;
        }
        path
    }
}

/// # Errors produced by the orchestrator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The root component (or one of its descendants) failed to start.
    #[error("startup failed: {source}{}", teardown_suffix(.teardown))]
    Startup {
        /// The original startup failure.
        #[source]
        source: ComponentError,
        /// Failures of the teardown that followed, if any.
        teardown: Option<TeardownError>,
    },

    /// Startup did not finish within the configured start timeout.
    #[error("startup did not complete within {timeout:?}; still starting: {stuck:?}; waiting for: {waiting:?}{}", teardown_suffix(.teardown))]
    StartTimeout {
        /// The configured start timeout.
        timeout: Duration,
        /// Components that had not finished starting.
        stuck: Vec<String>,
        /// Resource requests that were still pending.
        waiting: Vec<String>,
        /// Failures of the teardown that followed, if any.
        teardown: Option<TeardownError>,
    },

    /// A shutdown request arrived before startup completed.
    #[error("startup interrupted by a shutdown request{}", teardown_suffix(.teardown))]
    Interrupted {
        /// Failures of the teardown that followed, if any.
        teardown: Option<TeardownError>,
    },

    /// A service task failed while the application was running.
    #[error("service task {task} failed: {error}{}", teardown_suffix(.teardown))]
    ServiceFailed {
        /// Name of the service task.
        task: Arc<str>,
        /// Its error message.
        error: String,
        /// Failures of the teardown that followed, if any.
        teardown: Option<TeardownError>,
    },

    /// Teardown of a running application failed.
    #[error(transparent)]
    Teardown(#[from] TeardownError),

    /// The requested operation is not valid in the current lifecycle state.
    #[error("cannot {op} while the orchestrator is {state}")]
    InvalidState {
        /// The rejected operation.
        op: &'static str,
        /// State at the time of the call.
        state: LifecycleState,
    },

    /// OS signal handlers could not be installed.
    #[error("failed to install signal handlers: {source}{}", teardown_suffix(.teardown))]
    Signal {
        /// The registration error.
        #[source]
        source: std::io::Error,
        /// Failures of the teardown that followed, if any.
        teardown: Option<TeardownError>,
    },

    /// The root component could not be built from its specification.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn teardown_suffix(teardown: &Option<TeardownError>) -> String {
    match teardown {
        Some(err) => format!(" (additionally, {err})"),
        None => String::new(),
    }
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Startup { .. } => "runtime_startup_failed",
            RuntimeError::StartTimeout { .. } => "runtime_start_timeout",
            RuntimeError::Interrupted { .. } => "runtime_startup_interrupted",
            RuntimeError::ServiceFailed { .. } => "runtime_service_failed",
            RuntimeError::Teardown(_) => "runtime_teardown_failed",
            RuntimeError::InvalidState { .. } => "runtime_invalid_state",
            RuntimeError::Signal { .. } => "runtime_signal",
            RuntimeError::Config(_) => "runtime_config",
        }
    }

    /// Teardown failures attached to this error, if any.
    pub fn teardown(&self) -> Option<&TeardownError> {
        match self {
            RuntimeError::Startup { teardown, .. }
            | RuntimeError::StartTimeout { teardown, .. }
            | RuntimeError::Interrupted { teardown }
            | RuntimeError::ServiceFailed { teardown, .. }
            | RuntimeError::Signal { teardown, .. } => teardown.as_ref(),
            RuntimeError::Teardown(err) => Some(err),
            _ => None,
        }
    }
}

/// # Errors produced while loading configuration or building components from it.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// The file path.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A document is not valid YAML.
    #[error("invalid YAML in {origin}: {source}")]
    Yaml {
        /// File path or other description of the document.
        origin: String,
        /// The parser error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A document's root element is not a mapping.
    #[error("{origin}: the document root element must be a mapping")]
    NotAMapping {
        /// File path or other description of the document.
        origin: String,
    },

    /// A `--set` override without `=`.
    #[error("configuration must be set with '=', got: {0:?}")]
    MalformedOverride(String),

    /// A `--set` override crosses a value that is not a mapping.
    #[error("cannot apply override for {key:?}: value at {path} is not a mapping")]
    OverrideConflict {
        /// The override key.
        key: String,
        /// The offending prefix.
        path: String,
    },

    /// The `services` key is not a mapping.
    #[error("the \"services\" key must be a mapping")]
    InvalidServices,

    /// Neither `services` nor `component` were configured.
    #[error("no services have been defined")]
    NoServices,

    /// The selected service does not exist.
    #[error("service {0:?} has not been defined")]
    UnknownService(String),

    /// Several services exist and none was selected.
    #[error("multiple services present in configuration but no default service has been defined and none was selected")]
    AmbiguousService,

    /// The selected service has no `component` section.
    #[error("service {service:?} does not define a root component")]
    MissingComponent {
        /// The selected service.
        service: String,
    },

    /// A runtime setting has an invalid value.
    #[error("invalid value for {key}: {reason}")]
    InvalidSetting {
        /// The setting key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A component specification is malformed.
    #[error("invalid specification for component {alias:?}: {reason}")]
    InvalidSpec {
        /// Alias of the component.
        alias: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No constructor is registered for a component type.
    #[error("unknown component type {kind:?} (component {alias:?})")]
    UnknownComponentType {
        /// Alias of the component.
        alias: String,
        /// The unregistered type identifier.
        kind: String,
    },

    /// A component's settings do not match what its constructor expects.
    #[error("invalid settings for component {alias:?}: {source}")]
    ComponentSettings {
        /// Alias of the component.
        alias: String,
        /// The deserialization error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A custom YAML tag could not be resolved.
    #[error("cannot resolve {tag} {value:?}: {reason}")]
    Tag {
        /// The tag (`!Env`, `!TextFile`).
        tag: String,
        /// The tagged scalar.
        value: String,
        /// Why resolution failed.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "config_io",
            ConfigError::Yaml { .. } => "config_yaml",
            ConfigError::NotAMapping { .. } => "config_not_a_mapping",
            ConfigError::MalformedOverride(_) => "config_malformed_override",
            ConfigError::OverrideConflict { .. } => "config_override_conflict",
            ConfigError::InvalidServices => "config_invalid_services",
            ConfigError::NoServices => "config_no_services",
            ConfigError::UnknownService(_) => "config_unknown_service",
            ConfigError::AmbiguousService => "config_ambiguous_service",
            ConfigError::MissingComponent { .. } => "config_missing_component",
            ConfigError::InvalidSetting { .. } => "config_invalid_setting",
            ConfigError::InvalidSpec { .. } => "config_invalid_spec",
            ConfigError::UnknownComponentType { .. } => "config_unknown_component_type",
            ConfigError::ComponentSettings { .. } => "config_component_settings",
            ConfigError::Tag { .. } => "config_tag",
        }
    }
}
