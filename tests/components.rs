use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_yaml::Value;
use strata::{
    start_component, Component, ComponentError, ComponentFn, ComponentRef, ComponentRegistry,
    ComponentSpec, ConfigError, ContainerComponent, Context, ContextError, ResourceKey,
    RuntimeConfig,
};

struct Database(String);

#[derive(Deserialize)]
struct DatabaseSettings {
    url: String,
}

fn registry(log: Arc<Mutex<Vec<String>>>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_builtins();
    registry.register_with_settings("database", |alias, settings: DatabaseSettings| {
        let url = settings.url;
        Ok(ComponentFn::arc(alias.to_string(), move |ctx: Context| {
            let url = url.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                ctx.publish(Database(url))?;
                Ok::<_, ComponentError>(())
            }
        }))
    });
    registry.register("web", move |alias, _spec, _registry| {
        let log = Arc::clone(&log);
        let component = ComponentFn::new(alias.to_string(), move |ctx: Context| {
            let log = Arc::clone(&log);
            async move {
                let db = ctx.get::<Database>().ok_or_else(|| ComponentError::fail("no db"))?;
                log.lock().push(format!("web saw {}", db.0));
                Ok::<_, ComponentError>(())
            }
        })
        .requiring(ResourceKey::of::<Database>());
        Ok(Arc::new(component) as ComponentRef)
    });
    registry
}

fn spec(text: &str) -> ComponentSpec {
    let value: Value = serde_yaml::from_str(text).expect("yaml");
    ComponentSpec::from_value("root", &value).expect("spec")
}

#[tokio::test]
async fn declared_requirements_order_siblings() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = registry(Arc::clone(&log));
    let root = registry
        .build(
            "root",
            &spec(
                r#"
type: container
components:
  web:
  db:
    type: database
    url: postgres://localhost/app
"#,
            ),
        )
        .expect("build");

    let ctx = Context::root();
    start_component(root.as_ref(), &ctx).await.expect("start");
    assert_eq!(*log.lock(), vec!["web saw postgres://localhost/app".to_string()]);
    ctx.close().await.expect("close");
}

#[tokio::test]
async fn unknown_types_and_bad_settings_are_config_errors() {
    let registry = registry(Arc::new(Mutex::new(Vec::new())));

    let err = registry
        .build("root", &spec("type: container\ncomponents: {cache: {type: redis}}"))
        .err()
        .expect("unknown type");
    assert!(matches!(err, ConfigError::UnknownComponentType { ref kind, .. } if kind == "redis"));

    let err = registry
        .build("db", &spec("type: database\nport: 5"))
        .err()
        .expect("bad settings");
    assert_eq!(err.as_label(), "config_component_settings");

    let err = registry
        .build("root", &spec("type: container\nretries: 3"))
        .err()
        .expect("container settings");
    assert_eq!(err.as_label(), "config_invalid_spec");
}

#[tokio::test(start_paused = true)]
async fn missing_dependency_times_out_instead_of_hanging() {
    let mut cfg = RuntimeConfig::default();
    cfg.require_timeout = Some(Duration::from_secs(1));
    let ctx = Context::root_with(cfg, strata::Bus::new(64));

    let waiting = ComponentFn::new("web", |_ctx: Context| async { Ok::<_, ComponentError>(()) })
        .requiring(ResourceKey::of::<Database>());
    let err = start_component(&waiting, &ctx).await.unwrap_err();
    match err {
        ComponentError::Requirement { component, source } => {
            assert_eq!(&*component, "web");
            assert!(matches!(source, ContextError::ResourceNotFound { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    ctx.close().await.expect("close");
}

#[tokio::test]
async fn failing_sibling_cancels_the_waiting_one() {
    let failing = ComponentFn::arc("db", |_ctx: Context| async {
        Err::<(), _>(ComponentError::fail("cannot connect"))
    });
    let waiting = Arc::new(
        ComponentFn::new("web", |_ctx: Context| async { Ok::<_, ComponentError>(()) })
            .requiring(ResourceKey::of::<Database>()),
    );
    let root = ContainerComponent::new("root")
        .with_child("web", waiting)
        .and_then(|c| c.with_child("db", failing))
        .expect("children");

    let ctx = Context::root();
    let err = start_component(&root, &ctx).await.unwrap_err();
    assert_eq!(err.path(), vec!["db"]);
    assert!(matches!(err.root_cause(), ComponentError::Fail { .. }));
    ctx.close().await.expect("close");
}

#[tokio::test]
async fn panicking_start_is_reported_as_a_failure() {
    let panicking = ComponentFn::new("boom", |_ctx: Context| async {
        if true {
            panic!("start exploded");
        }
        Ok::<_, ComponentError>(())
    });
    let ctx = Context::root();
    let err = start_component(&panicking, &ctx).await.unwrap_err();
    assert_eq!(err.as_label(), "component_panicked");
    assert!(err.to_string().contains("start exploded"));
    ctx.close().await.expect("close");
}

#[tokio::test]
async fn nested_containers_build_from_config_with_local_defaults() {
    let registry = registry(Arc::new(Mutex::new(Vec::new())));
    let defaults = ComponentSpec::new("container").with_child(
        "db",
        ComponentSpec::new("database").with_setting("url", "postgres://default"),
    );
    let external = spec("components: {db: {url: postgres://override}, web: null}");

    let root = ContainerComponent::from_spec_with_defaults("root", &defaults, &external, &registry)
        .expect("build");
    assert_eq!(root.aliases().collect::<Vec<_>>(), vec!["db", "web"]);
    assert_eq!(root.name(), "root");

    let ctx = Context::root();
    start_component(&root, &ctx).await.expect("start");
    assert_eq!(
        ctx.get::<Database>().map(|d| d.0.clone()).as_deref(),
        Some("postgres://override")
    );
    ctx.close().await.expect("close");
}
