//! # Application component for one-shot tools.
//!
//! [`ApplicationComponent`] is a container whose main logic lives in an [`Application`].
//! Once every child has started, [`Application::run`] is spawned as a service task in the
//! component's context; its return value becomes the process exit code.
//!
//! ```text
//! start(ctx)
//!   ├─ container.start(ctx)            children, concurrently
//!   └─ spawn_service("run")
//!        ├─ Ok(None)       ─► ctx.request_exit(0)
//!        ├─ Ok(Some(code)) ─► ctx.request_exit(code), out of 0..=127 becomes 1
//!        ├─ Err / panic    ─► service failure (RuntimeError::ServiceFailed)
//!        └─ cancelled      ─► nothing, the tree is already closing
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::components::{Component, ComponentRef, ContainerComponent};
use crate::context::{Context, ResourceKey};
use crate::error::{BoxError, ComponentError};

/// Exit code used when `run` returns a code outside `0..=127`.
const OUT_OF_RANGE_EXIT: u8 = 1;

/// Main logic of a command line tool.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use strata::{Application, BoxError, Context};
///
/// struct Migrate;
///
/// #[async_trait]
/// impl Application for Migrate {
///     async fn run(&self, ctx: Context) -> Result<Option<i32>, BoxError> {
///         let dsn = ctx.require::<String>().await?;
///         if dsn.is_empty() {
///             return Ok(Some(2));
///         }
///         Ok(None)
///     }
/// }
/// ```
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Runs after every child component has started.
    ///
    /// Returns the exit code (`None` = 0).
    async fn run(&self, ctx: Context) -> Result<Option<i32>, BoxError>;
}

/// Container whose [`Application::run`] decides when the process exits.
pub struct ApplicationComponent {
    container: ContainerComponent,
    app: Arc<dyn Application>,
}

impl ApplicationComponent {
    /// Wraps `container`; `app` runs once its children have started.
    pub fn new(container: ContainerComponent, app: impl Application) -> Self {
        Self {
            container,
            app: Arc::new(app),
        }
    }

    /// Adds a child component under `alias`.
    pub fn add(&mut self, alias: &str, child: ComponentRef) -> Result<(), ComponentError> {
        self.container.add(alias, child)
    }
}

/// Maps a `run` result to a process exit code.
fn exit_code(returned: Option<i32>) -> u8 {
    match returned {
        None => 0,
        Some(code) => match u8::try_from(code) {
            Ok(code) if code <= 127 => code,
            _ => {
                tracing::warn!(code, "exit code out of range, exiting with 1");
                OUT_OF_RANGE_EXIT
            }
        },
    }
}

#[async_trait]
impl Component for ApplicationComponent {
    fn name(&self) -> &str {
        self.container.name()
    }

    fn requirements(&self) -> Vec<ResourceKey> {
        self.container.requirements()
    }

    async fn start(&self, ctx: Context) -> Result<(), ComponentError> {
        self.container.start(ctx.clone()).await?;

        let app = Arc::clone(&self.app);
        let run_ctx = ctx.clone();
        ctx.spawn_service("run", move |token| async move {
            let returned = tokio::select! {
                res = app.run(run_ctx.clone()) => res?,
                _ = token.cancelled() => return Ok(()),
            };
            run_ctx.request_exit(exit_code(returned));
            Ok::<(), BoxError>(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_outside_the_portable_range_become_one() {
        assert_eq!(exit_code(None), 0);
        assert_eq!(exit_code(Some(0)), 0);
        assert_eq!(exit_code(Some(127)), 127);
        assert_eq!(exit_code(Some(128)), 1);
        assert_eq!(exit_code(Some(-3)), 1);
    }

    struct Echo;

    #[async_trait]
    impl Application for Echo {
        async fn run(&self, ctx: Context) -> Result<Option<i32>, BoxError> {
            let code = ctx.require::<u8>().await?;
            Ok(Some(i32::from(*code)))
        }
    }

    #[tokio::test]
    async fn run_sees_resources_of_started_children_and_requests_exit() {
        let mut app = ApplicationComponent::new(ContainerComponent::new("tool"), Echo);
        app.add(
            "code",
            crate::components::ComponentFn::arc("code", |ctx: Context| async move {
                ctx.publish(42u8)?;
                Ok::<(), ComponentError>(())
            }),
        )
        .expect("child");

        let ctx = Context::root();
        let exit = ctx.tree().exit_token();
        crate::components::start_component(&app, &ctx)
            .await
            .expect("start");

        exit.cancelled().await;
        assert_eq!(ctx.tree().exit_code(), Some(42));
        ctx.close().await.expect("close");
    }
}
