use std::io::Write;
use std::time::Duration;

use serde_yaml::Value;
use strata::{Component, ComponentRegistry, ConfigError, ConfigLoader};

fn file(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(text.as_bytes()).expect("write");
    file
}

#[test]
fn files_merge_in_order_and_overrides_win() {
    let base = file(
        r#"
start_timeout: 30
grace: 0.5
component:
  type: container
  components:
    web:
      type: container
"#,
    );
    let local = file(
        r#"
require_timeout: 2
component:
  components:
    worker:
      type: container
"#,
    );

    let app = ConfigLoader::new()
        .files([base.path(), local.path()])
        .set("bus_capacity=64")
        .set("log.level=debug")
        .load()
        .expect("load");

    assert_eq!(app.service, "default");
    assert_eq!(app.runtime.start_timeout, Duration::from_secs(30));
    assert_eq!(app.runtime.grace, Duration::from_millis(500));
    assert_eq!(app.runtime.require_timeout, Some(Duration::from_secs(2)));
    assert_eq!(app.runtime.bus_capacity, 64);

    let aliases: Vec<&str> = app.component.components.iter().map(|(a, _)| a.as_str()).collect();
    assert_eq!(aliases, vec!["web", "worker"]);
    assert_eq!(app.extra["log"]["level"], Value::from("debug"));

    let root = ComponentRegistry::with_builtins()
        .build("root", &app.component)
        .expect("containers only");
    assert_eq!(root.name(), "root");
}

#[test]
fn services_merge_over_the_top_level() {
    let config = r#"
grace: 1
component:
  type: container
services:
  worker:
    grace: 3
    component:
      type: container
      components:
        jobs:
          type: container
"#;

    let app = ConfigLoader::new()
        .document("inline", config)
        .service("worker")
        .load()
        .expect("load");
    assert_eq!(app.service, "worker");
    assert_eq!(app.runtime.grace, Duration::from_secs(3));
    assert_eq!(app.component.components.len(), 1);

    let app = ConfigLoader::new().document("inline", config).load().expect("load");
    assert_eq!(app.service, "default");
    assert_eq!(app.runtime.grace, Duration::from_secs(1));
    assert!(app.component.components.is_empty());
}

#[test]
fn override_keys_may_escape_dots() {
    let app = ConfigLoader::new()
        .document("inline", "component: {type: container}")
        .set(r"hosts.example\.com=[1, 2]")
        .load()
        .expect("load");
    assert_eq!(
        app.extra["hosts"]["example.com"],
        serde_yaml::from_str::<Value>("[1, 2]").expect("yaml")
    );
}

#[test]
fn errors_are_reported_by_kind() {
    let err = ConfigLoader::new()
        .file("/nonexistent/strata.yaml")
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));

    let err = ConfigLoader::new().document("list", "- a\n- b").load().unwrap_err();
    assert!(matches!(err, ConfigError::NotAMapping { .. }));

    let err = ConfigLoader::new()
        .document("inline", "component: {}")
        .set("no-equals-sign")
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::MalformedOverride(_)));

    let err = ConfigLoader::new()
        .document("inline", "component: {}\nservices: {a: {}}")
        .service("b")
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownService(ref s) if s == "b"));

    let err = ConfigLoader::new()
        .document("inline", "services: {a: {grace: 1}}")
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingComponent { ref service } if service == "a"));

    let err = ConfigLoader::new()
        .document("inline", "component: {}\ngrace: soon")
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == "grace"));
}

#[test]
fn text_file_tags_are_resolved_before_merging() {
    let secret = file("s3cr3t");
    let config = format!(
        "component: {{type: container}}\npassword: !TextFile {}\n",
        secret.path().display()
    );
    let app = ConfigLoader::new()
        .document("inline", config)
        .load()
        .expect("load");
    assert_eq!(app.extra["password"], Value::from("s3cr3t"));
}
