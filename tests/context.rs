use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use strata::{BoxError, Context, ContextError, ContextState, EventKind, TeardownCause};

#[derive(Debug)]
struct Database(&'static str);

#[tokio::test]
async fn require_resolves_published_ancestor_resources_immediately() {
    let root = Context::root();
    root.publish(Database("primary")).expect("publish");
    let grandchild = root
        .open_child()
        .and_then(|c| c.open_child())
        .expect("children");

    let db = grandchild
        .require_within::<Database>("default", Some(Duration::ZERO))
        .await
        .expect("visible from descendants");
    assert_eq!(db.0, "primary");
    root.close().await.expect("close");
}

#[tokio::test]
async fn child_resources_never_leak_to_parent_or_siblings() {
    let root = Context::root();
    let a = root.open_named_child("a").expect("a");
    let b = root.open_named_child("b").expect("b");
    a.publish(Database("a-only")).expect("publish");

    assert!(root.get::<Database>().is_none());
    assert!(b.get::<Database>().is_none());
    assert_eq!(a.get::<Database>().map(|d| d.0), Some("a-only"));
    assert_eq!(a.path(), "root/a");
    root.close().await.expect("close");
}

#[tokio::test]
async fn duplicate_publish_fails_but_child_may_shadow() {
    let root = Context::root();
    root.publish_named("main", 1u32).expect("first");
    let err = root.publish_named("main", 2u32).unwrap_err();
    assert!(matches!(err, ContextError::DuplicateResource { .. }));

    let child = root.open_child().expect("child");
    child.publish_named("main", 3u32).expect("shadow in child");
    assert_eq!(child.get_named::<u32>("main").as_deref(), Some(&3));
    assert_eq!(root.get_named::<u32>("main").as_deref(), Some(&1));
    root.close().await.expect("close");
}

#[tokio::test]
async fn pending_require_wakes_on_publication_in_an_ancestor() {
    let root = Context::root();
    let child = root.open_child().expect("child");

    let waiter = {
        let child = child.clone();
        tokio::spawn(async move { child.require::<Database>().await })
    };
    tokio::task::yield_now().await;
    root.publish(Database("late")).expect("publish");

    let db = waiter.await.expect("join").expect("woken");
    assert_eq!(db.0, "late");
    root.close().await.expect("close");
}

#[tokio::test(start_paused = true)]
async fn require_times_out_with_resource_not_found() {
    let root = Context::root();
    let started = tokio::time::Instant::now();
    let err = root
        .require_within::<Database>("default", Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ContextError::ResourceNotFound { timeout: Some(t), .. } if t == Duration::from_secs(2)
    ));
    assert!(started.elapsed() >= Duration::from_secs(2));
    root.close().await.expect("close");
}

#[tokio::test]
async fn closing_wakes_pending_requires_with_context_closed() {
    let root = Context::root();
    let waiter = {
        let root = root.clone();
        tokio::spawn(async move { root.require::<Database>().await })
    };
    tokio::task::yield_now().await;

    root.close().await.expect("close");
    let err = waiter.await.expect("join").unwrap_err();
    assert!(matches!(err, ContextError::ContextClosed { .. }));
}

#[tokio::test]
async fn factories_run_once_and_cache_in_the_publishing_context() {
    let runs = Arc::new(AtomicUsize::new(0));
    let root = Context::root();
    let counter = Arc::clone(&runs);
    root.publish_factory("pool", move |_ctx: Context| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(Database("lazy"))
        }
    })
    .expect("factory");

    let a = root.open_child().expect("a");
    let b = root.open_child().expect("b");
    let (x, y) = tokio::join!(
        a.require_named::<Database>("pool"),
        b.require_named::<Database>("pool")
    );
    assert!(Arc::ptr_eq(&x.expect("x"), &y.expect("y")));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(root.get_named::<Database>("pool").is_some());
    root.close().await.expect("close");
}

#[tokio::test]
async fn enumeration_is_a_shadowed_snapshot() {
    let root = Context::root();
    root.publish_named("a", 1u8).expect("a");
    root.publish_named("b", 2u8).expect("b");
    let child = root.open_child().expect("child");
    child.publish_named("b", 20u8).expect("shadow");

    let snapshot = child.resources::<u8>();
    child.publish_named("c", 30u8).expect("after snapshot");

    let seen: Vec<(String, u8)> = snapshot.map(|(n, v)| (n.to_string(), *v)).collect();
    assert_eq!(seen, vec![("a".to_string(), 1), ("b".to_string(), 20)]);
    root.close().await.expect("close");
}

#[tokio::test]
async fn teardown_runs_lifo_children_first_and_aggregates_failures() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let root = Context::root();
    let child = root.open_child().expect("child");

    for (ctx, label, fail) in [
        (&root, "r1", false),
        (&root, "r2", true),
        (&root, "r3", false),
        (&child, "c1", true),
    ] {
        let log = Arc::clone(&log);
        ctx.add_teardown_callback(label, move || async move {
            log.lock().push(label);
            if fail {
                Err(BoxError::from(format!("{label} broke")))
            } else {
                Ok(())
            }
        })
        .expect("register");
    }

    let err = root.close().await.unwrap_err();
    assert_eq!(*log.lock(), vec!["c1", "r3", "r2", "r1"]);
    let failed: Vec<&str> = err.failures().iter().map(|f| &*f.callback).collect();
    assert_eq!(failed, vec!["c1", "r2"]);
    assert_eq!(child.state(), ContextState::Closed);

    root.close().await.expect("second close is a no-op");
}

#[tokio::test]
async fn teardown_callbacks_learn_the_failure_cause() {
    let seen = Arc::new(Mutex::new(None));
    let root = Context::root();
    let slot = Arc::clone(&seen);
    root.add_teardown_callback_with_cause("cause", move |cause| async move {
        *slot.lock() = Some(cause);
        Ok::<(), BoxError>(())
    })
    .expect("register");

    root.close_with_cause(TeardownCause::failed("boom"))
        .await
        .expect("close");
    assert_eq!(*seen.lock(), Some(TeardownCause::failed("boom")));
}

#[tokio::test]
async fn resource_teardown_receives_the_value() {
    let closed = Arc::new(Mutex::new(Vec::new()));
    let root = Context::root();
    let sink = Arc::clone(&closed);
    root.publish_with_teardown("main", Database("conn"), move |db: Arc<Database>| async move {
        sink.lock().push(db.0);
        Ok::<(), BoxError>(())
    })
    .expect("publish");

    root.close().await.expect("close");
    assert_eq!(*closed.lock(), vec!["conn"]);
}

#[tokio::test]
async fn closing_cancels_background_tasks() {
    let root = Context::root();
    let mut events = root.bus().subscribe();
    let stopped = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&stopped);
    root.spawn_task("ticker", move |token| async move {
        token.cancelled().await;
        flag.fetch_add(1, Ordering::SeqCst);
        Ok::<(), BoxError>(())
    })
    .expect("spawn");

    root.close().await.expect("close");
    assert_eq!(stopped.load(Ordering::SeqCst), 1);

    let mut kinds = Vec::new();
    while let Ok(ev) = events.try_recv() {
        kinds.push(ev.kind);
    }
    assert!(kinds.contains(&EventKind::TaskSpawned));
    assert!(kinds.contains(&EventKind::ContextClosed));
    assert!(!kinds.contains(&EventKind::GraceExceeded));
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let root = Context::root();
    for name in ["", "with space", "dash-ed"] {
        let err = root.publish_named(name, 1u8).unwrap_err();
        assert!(matches!(err, ContextError::InvalidResourceName { .. }), "{name:?}");
    }
    root.close().await.expect("close");
}
