//! Closed-loop regression: idle detection → scale to zero → catch-route
//! emission → cold start, wired the way the daemon wires it, against the
//! in-memory platform double under paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use zeroscale_core::{AppState, Envelope, EnvelopeMessage, ScalingStatus, ScalingType, Trigger};
use zeroscale_detector::{spawn_trigger_workers, IdlenessDetector, StopAppFn};
use zeroscale_engine::{RouteToggleFn, ScalingEngine};
use zeroscale_platform::FakePlatform;
use zeroscale_registry::AppRegistry;
use zeroscale_routes::RouteManager;
use zeroscale_state::{Order, StateStore};

const EVALUATION_INTERVAL: Duration = Duration::from_secs(10);
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const COOL_DOWN: Duration = Duration::from_secs(600);

struct Cluster {
    platform: Arc<FakePlatform>,
    store: StateStore,
    registry: AppRegistry,
    engine: Arc<ScalingEngine>,
    route_manager: Arc<RouteManager>,
    envelope_tx: mpsc::Sender<Envelope>,
    route_rx: mpsc::Receiver<zeroscale_core::RouteEntity>,
    shutdown_tx: watch::Sender<bool>,
}

/// Wire detector → workers → engine → route manager like `run()` does,
/// minus the HTTP servers and the real platform bindings.
fn boot() -> Cluster {
    let platform = Arc::new(FakePlatform::new());
    let store = StateStore::open_in_memory().unwrap();
    let registry = AppRegistry::new();

    let (envelope_tx, envelope_rx) = mpsc::channel(64);
    let (trigger_tx, trigger_rx) = mpsc::channel(16);
    let (route_tx, route_rx) = mpsc::channel(64);

    let route_manager = Arc::new(RouteManager::new(
        platform.clone(),
        registry.clone(),
        route_tx,
        "10.0.1.17".to_string(),
        8081,
        Duration::from_secs(30),
        Duration::from_secs(60),
    ));

    let enable_routes: RouteToggleFn = {
        let manager = route_manager.clone();
        Arc::new(move |app_id: String| {
            let manager = manager.clone();
            Box::pin(async move { manager.enable_app_routes(&app_id).await })
        })
    };
    let disable_routes: RouteToggleFn = {
        let manager = route_manager.clone();
        Arc::new(move |app_id: String| {
            let manager = manager.clone();
            Box::pin(async move { manager.disable_app_routes(&app_id).await })
        })
    };
    let engine = Arc::new(ScalingEngine::new(
        platform.clone(),
        store.clone(),
        enable_routes,
        disable_routes,
        COOL_DOWN,
        Duration::from_secs(120),
        32,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let detector = IdlenessDetector::new(
        envelope_rx,
        trigger_tx,
        registry.clone(),
        EVALUATION_INTERVAL,
        REFRESH_INTERVAL,
    );
    tokio::spawn(detector.run(shutdown_rx.clone()));

    let stop_app: StopAppFn = {
        let engine = engine.clone();
        Arc::new(move |trigger: Trigger| {
            let engine = engine.clone();
            Box::pin(async move { engine.stop_app(&trigger).await })
        })
    };
    spawn_trigger_workers(2, trigger_rx, stop_app, shutdown_rx);

    Cluster {
        platform,
        store,
        registry,
        engine,
        route_manager,
        envelope_tx,
        route_rx,
        shutdown_tx,
    }
}

fn http_timer(source_id: &str) -> Envelope {
    Envelope {
        source_id: source_id.to_string(),
        message: EnvelopeMessage::Timer {
            name: "http".to_string(),
            start_ns: 0,
            stop_ns: 1,
        },
    }
}

/// Advance paused time in steps, letting every task run in between.
async fn advance(total: Duration) {
    let step = Duration::from_secs(1);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::sleep(step).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        elapsed += step;
    }
}

#[tokio::test(start_paused = true)]
async fn idle_app_scales_to_zero_and_cold_starts_again() {
    let mut cluster = boot();

    // Enroll app-a with a 60 s breach window; it is running with one
    // instance and owns one hostname.
    cluster.registry.add("app-a", 60);
    cluster.platform.set_app("app-a", AppState::Started, 1);
    cluster
        .platform
        .set_routes("app-a", vec!["a.example.com".to_string()]);
    cluster.route_manager.refresh_apps().await;

    // One request at t=0, then silence.
    advance(REFRESH_INTERVAL + Duration::from_secs(1)).await;
    cluster.envelope_tx.send(http_timer("app-a")).await.unwrap();

    // Past the breach window the detector triggers, a worker runs the
    // engine, and the platform confirms the stop.
    advance(Duration::from_secs(90)).await;
    assert_eq!(cluster.platform.stop_calls(), vec!["app-a"]);

    let rows = cluster
        .store
        .retrieve_scaling_histories("app-a", 0, -1, Order::Asc, true)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].scaling_type, ScalingType::Stop2Zero);
    assert_eq!(rows[0].status, ScalingStatus::Succeeded);

    // Catch routes flow again for the stopped app.
    assert!(!cluster.route_manager.is_suppressed("app-a"));
    assert!(cluster.route_manager.send_routes().await);
    let entity = cluster.route_rx.recv().await.unwrap();
    assert_eq!(entity.route, "a.example.com");
    assert_eq!(entity.ip, "10.0.1.17");

    // The detector keeps re-triggering, but cooldown holds: still
    // exactly one platform stop and one history row.
    advance(Duration::from_secs(60)).await;
    assert_eq!(cluster.platform.stop_calls().len(), 1);
    let rows = cluster
        .store
        .retrieve_scaling_histories("app-a", 0, -1, Order::Asc, true)
        .unwrap();
    assert_eq!(rows.len(), 1);

    // Cold start (the listener's path): the engine starts the app and
    // suspends catch-route emission before returning.
    cluster.engine.start_app("app-a").await.unwrap();
    assert_eq!(cluster.platform.start_calls(), vec!["app-a"]);
    assert!(cluster.route_manager.is_suppressed("app-a"));

    // Next send tick emits nothing for the running app.
    while cluster.route_rx.try_recv().is_ok() {}
    assert!(cluster.route_manager.send_routes().await);
    tokio::task::yield_now().await;
    assert!(cluster.route_rx.try_recv().is_err());

    let rows = cluster
        .store
        .retrieve_scaling_histories("app-a", 0, -1, Order::Asc, true)
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].scaling_type, ScalingType::Start2Zero);
    assert_eq!(rows[1].status, ScalingStatus::Succeeded);

    cluster.shutdown_tx.send(true).unwrap();
}

#[tokio::test(start_paused = true)]
async fn traffic_keeps_an_app_alive() {
    let cluster = boot();

    cluster.registry.add("app-a", 60);
    cluster.platform.set_app("app-a", AppState::Started, 1);

    // A request every 30 seconds never lets silence reach 60 s.
    for _ in 0..6 {
        cluster.envelope_tx.send(http_timer("app-a")).await.unwrap();
        advance(Duration::from_secs(30)).await;
    }

    assert!(cluster.platform.stop_calls().is_empty());
    cluster.shutdown_tx.send(true).unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_deadline_leaves_routes_suppressed_state_alone() {
    let cluster = boot();

    cluster.registry.add("app-c", 30);
    cluster.platform.set_app("app-c", AppState::Started, 1);
    cluster.platform.freeze("app-c");

    cluster.envelope_tx.send(http_timer("app-c")).await.unwrap();
    // Breach at 30 s; the stop then polls for the full 120 s deadline.
    advance(Duration::from_secs(200)).await;

    let rows = cluster
        .store
        .retrieve_scaling_histories("app-c", 0, -1, Order::Asc, true)
        .unwrap();
    assert!(!rows.is_empty());
    assert_eq!(rows[0].status, ScalingStatus::Failed);
    assert_eq!(rows[0].message, "failed to stop application in 120 seconds");
    assert!(!cluster.route_manager.is_suppressed("app-c"));

    cluster.shutdown_tx.send(true).unwrap();
}
