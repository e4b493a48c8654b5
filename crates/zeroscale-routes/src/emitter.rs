//! The route emitter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use zeroscale_core::RouteEntity;
use zeroscale_platform::PlatformClient;

/// Batches route entities from the route channel and bulk-registers
/// them with the routing API every flush interval. Batching amortizes
/// routing-API cost; a failed flush drops the batch because the route
/// manager's send loop re-emits everything on its next tick anyway.
pub struct RouteEmitter {
    platform: Arc<dyn PlatformClient>,
    flush_interval: Duration,
    route_rx: mpsc::Receiver<RouteEntity>,
}

impl RouteEmitter {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        flush_interval: Duration,
        route_rx: mpsc::Receiver<RouteEntity>,
    ) -> Self {
        Self {
            platform,
            flush_interval,
            route_rx,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            flush_secs = self.flush_interval.as_secs(),
            "route emitter started"
        );
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut batch: Vec<RouteEntity> = Vec::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush(&mut batch).await,
                maybe = self.route_rx.recv() => {
                    match maybe {
                        Some(entity) => batch.push(entity),
                        None => {
                            self.flush(&mut batch).await;
                            debug!("route channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("route emitter shutting down");
                    break;
                }
            }
        }
    }

    async fn flush(&self, batch: &mut Vec<RouteEntity>) {
        if batch.is_empty() {
            return;
        }
        debug!(count = batch.len(), "registering route batch");
        if let Err(e) = self.platform.register_routes(batch).await {
            warn!(error = %e, dropped = batch.len(), "route batch registration failed");
        }
        batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroscale_platform::FakePlatform;

    fn entity(route: &str) -> RouteEntity {
        RouteEntity {
            route: route.to_string(),
            ip: "10.0.1.17".to_string(),
            port: 8081,
            ttl: 120,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_batches_on_the_interval() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let emitter = RouteEmitter::new(platform.clone(), Duration::from_secs(5), rx);
        let handle = tokio::spawn(emitter.run(shutdown_rx));

        tx.send(entity("a.example.com")).await.unwrap();
        tx.send(entity("b.example.com")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let registered = platform.registered_routes();
        assert_eq!(registered.len(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_drops_the_batch() {
        let platform = Arc::new(FakePlatform::new());
        platform.set_fail_register_routes(true);
        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let emitter = RouteEmitter::new(platform.clone(), Duration::from_secs(5), rx);
        let handle = tokio::spawn(emitter.run(shutdown_rx));

        tx.send(entity("a.example.com")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        // The failed batch was dropped, not retried.
        platform.set_fail_register_routes(false);
        tx.send(entity("b.example.com")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let registered = platform.registered_routes();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].route, "b.example.com");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_flushes_and_exits() {
        let platform = Arc::new(FakePlatform::new());
        let (tx, rx) = mpsc::channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let emitter = RouteEmitter::new(platform.clone(), Duration::from_secs(60), rx);
        let handle = tokio::spawn(emitter.run(shutdown_rx));

        tx.send(entity("a.example.com")).await.unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(platform.registered_routes().len(), 1);
    }
}
