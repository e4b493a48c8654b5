//! scale2zero — scale-to-zero autoscaler daemon.
//!
//! Observes ingress telemetry for enrolled apps, stops the ones that go
//! silent past their breach window, registers catch routes so their
//! hostnames resolve to the hijack listener, and cold-starts them again
//! on the next request.
//!
//! # Usage
//!
//! ```text
//! scale2zero -c /etc/scale2zero/config.yaml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use zeroscale_core::{Config, Trigger};
use zeroscale_detector::{spawn_trigger_workers, IdlenessDetector, StopAppFn};
use zeroscale_engine::{RouteToggleFn, ScalingEngine};
use zeroscale_intake::{NdjsonStreamConnector, Nozzle, StreamConnector};
use zeroscale_listener::{ResolveAppFn, RouteListener, StartAppFn};
use zeroscale_platform::{HttpPlatform, PlatformClient};
use zeroscale_registry::{AppRegistry, RegistryRefresher};
use zeroscale_routes::{RouteEmitter, RouteManager};
use zeroscale_state::StateStore;

#[derive(Parser)]
#[command(name = "scale2zero", about = "Scale-to-zero autoscaler")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short = 'c', long = "config")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("scale2zero starting");

    // ── Shared infrastructure ──────────────────────────────────────

    let store = StateStore::open(&config.store.path)?;
    info!(path = ?config.store.path, "state store opened");

    let registry = AppRegistry::new();
    let refresher = RegistryRefresher::new(
        registry.clone(),
        store.clone(),
        Duration::from_secs(config.registry.app_refresh_interval_secs),
    );

    let platform: Arc<dyn PlatformClient> = Arc::new(HttpPlatform::new(
        config.platform.api_url.clone(),
        config.platform.routing_api_url.clone(),
        config.platform.auth_token.clone(),
    ));

    // Bounded channels; producers block when full, which is the
    // overload policy end to end.
    let (envelope_tx, envelope_rx) = mpsc::channel(config.envelope_chan_size);
    let (trigger_tx, trigger_rx) = mpsc::channel(config.trigger_chan_size);
    let (route_tx, route_rx) = mpsc::channel(config.route_chan_size);

    // ── Routing ────────────────────────────────────────────────────

    let route_manager = Arc::new(RouteManager::new(
        platform.clone(),
        registry.clone(),
        route_tx,
        config.route_listener.ip.clone(),
        config.route_listener.port,
        Duration::from_secs(config.route_manager.send_route_interval_secs),
        Duration::from_secs(config.route_manager.refresh_app_route_interval_secs),
    ));
    let route_emitter = RouteEmitter::new(
        platform.clone(),
        Duration::from_secs(config.route_emitter.flush_interval_secs),
        route_rx,
    );

    // ── Scaling engine ─────────────────────────────────────────────

    // The engine and the route manager only know each other through
    // these capabilities; neither holds a reference to the other.
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
        Duration::from_secs(config.cool_down_secs),
        Duration::from_secs(config.scaling_engine.start_stop_deadline_secs),
        config.scaling_engine.lock_size,
    ));

    // ── Detection ──────────────────────────────────────────────────

    let detector = IdlenessDetector::new(
        envelope_rx,
        trigger_tx,
        registry.clone(),
        Duration::from_secs(config.aggregator.evaluation_interval_secs),
        Duration::from_secs(config.aggregator.app_refresh_interval_secs),
    );

    let stop_app: StopAppFn = {
        let engine = engine.clone();
        Arc::new(move |trigger: Trigger| {
            let engine = engine.clone();
            Box::pin(async move { engine.stop_app(&trigger).await })
        })
    };

    // ── Hijack listener ────────────────────────────────────────────

    let start_app: StartAppFn = {
        let engine = engine.clone();
        Arc::new(move |app_id: String| {
            let engine = engine.clone();
            Box::pin(async move { engine.start_app(&app_id).await })
        })
    };
    let resolve_app: ResolveAppFn = {
        let manager = route_manager.clone();
        Arc::new(move |host: &str| manager.app_id_by_route(host))
    };
    let listener_addr = SocketAddr::from(([0, 0, 0, 0], config.route_listener.port));
    let route_listener = RouteListener::bind(listener_addr, start_app, resolve_app).await?;

    // ── Spawn background tasks ─────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    tasks.push(tokio::spawn(refresher.run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(route_emitter.run(shutdown_rx.clone())));
    tasks.push(tokio::spawn(
        route_manager.clone().run_refresh(shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(
        route_manager.clone().run_send(shutdown_rx.clone()),
    ));
    tasks.push(tokio::spawn(detector.run(shutdown_rx.clone())));

    tasks.extend(spawn_trigger_workers(
        config.trigger_worker_count,
        trigger_rx,
        stop_app,
        shutdown_rx.clone(),
    ));

    let connector: Arc<dyn StreamConnector> =
        Arc::new(NdjsonStreamConnector::new(config.nozzle.egress_addr.clone()));
    for index in 0..config.nozzle.count {
        let nozzle = Nozzle::new(
            index,
            config.nozzle.shard_id.clone(),
            connector.clone(),
            registry.clone(),
            envelope_tx.clone(),
        );
        tasks.push(tokio::spawn(nozzle.run(shutdown_rx.clone())));
    }
    drop(envelope_tx);

    {
        let shutdown_rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = route_listener.serve(shutdown_rx).await {
                tracing::error!(error = %e, "route listener exited");
            }
        }));
    }

    // ── API server (foreground) ────────────────────────────────────

    let api_state = zeroscale_api::ApiState {
        store: store.clone(),
        registry: registry.clone(),
    };
    let router = zeroscale_api::build_router(api_state);
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_server.port));
    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
    info!(addr = %api_addr, "api server listening");

    let server = axum::serve(api_listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    server.await?;

    // Background tasks exit at their next suspension point; in-flight
    // scaling actions run to completion or deadline first.
    for task in tasks {
        let _ = task.await;
    }

    info!("scale2zero stopped");
    Ok(())
}
