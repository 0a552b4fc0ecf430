mod config;

use config::AppConfig;
use ingest::IngestConfig;
use log::{error, info};
use miette::IntoDiagnostic;
use notify::{EventGateway, NotifyConfig, SubscriberRegistry};
use provider::{ProviderClient, TokenBucket};
use std::sync::Arc;
use std::time::Duration;
use stream::{CacheRepository, HttpAuthenticator, HybridProgressStore, StreamConfig, StreamServer};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Wires the three subsystems spec.md describes — ingestion, notification
/// fan-out, and the realtime progress channel — into one process under a
/// single root cancellation token, matching the teacher's `ingest_main`
/// shape of one `tokio::main` that spawns its workers and joins them on
/// shutdown.
#[tokio::main]
async fn main() -> miette::Result<()> {
    env_logger::init();

    let app_config = AppConfig::config().into_diagnostic()?;
    let ingest_config = IngestConfig::config().into_diagnostic()?;
    let notify_config = NotifyConfig::config().into_diagnostic()?;
    let stream_config = StreamConfig::config().into_diagnostic()?;

    info!("running pending migrations");
    db::migrations::run_migrations().into_diagnostic()?;

    let pool = db::get_pool(app_config.db_pool_size).into_diagnostic()?;
    let cancel = CancellationToken::new();

    // --- Notification fan-out ---
    let registry = Arc::new(SubscriberRegistry::new(Duration::from_secs(
        notify_config.inactivity_timeout_secs,
    )));
    let udp_socket = Arc::new(UdpSocket::bind(&notify_config.udp_bind_addr).await.into_diagnostic()?);
    let gateway = EventGateway::new(pool.clone(), registry.clone(), udp_socket.clone());

    let udp_intake = tokio::spawn({
        let registry = registry.clone();
        let pool = pool.clone();
        let socket = udp_socket.clone();
        let spacing = Duration::from_millis(notify_config.reconnect_sync_spacing_ms);
        let cancel = cancel.clone();
        async move { notify::udp::run_intake_loop(socket, registry, pool, spacing, cancel).await }
    });

    let cleanup_loop = tokio::spawn({
        let registry = registry.clone();
        let interval = Duration::from_secs(notify_config.cleanup_interval_secs);
        let cancel = cancel.clone();
        async move { notify::udp::run_cleanup_loop(registry, interval, cancel).await }
    });

    let http_router = notify::http::routes(Arc::new(gateway.clone()));
    let http_listener = TcpListener::bind(&notify_config.http_bind_addr).await.into_diagnostic()?;
    let http_server = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(err) = axum::serve(http_listener, http_router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("event gateway HTTP server error: {err}");
            }
        }
    });

    // --- Ingestion pipeline ---
    let bucket = Arc::new(TokenBucket::new(
        ingest_config.rate_limit.refill_per_second,
        ingest_config.rate_limit.burst,
    ));
    let provider_client = ProviderClient::new(
        ingest_config.provider_base_url.clone(),
        ingest_config.provider_api_key.clone(),
        bucket,
    );
    let ingest_task = tokio::spawn({
        let pool = pool.clone();
        let gateway = gateway.clone();
        let cfg = ingest_config.clone();
        let cancel = cancel.clone();
        async move { ingest::run_scheduler(pool, provider_client, gateway, cfg, cancel).await }
    });

    // --- Realtime progress channel ---
    let cache = CacheRepository::new(&stream_config.cache_url, stream_config.cache_ttl_days).into_diagnostic()?;
    let (write_tx, write_rx) = tokio::sync::mpsc::channel(stream_config.write_channel_capacity);
    let store = HybridProgressStore::new(
        cache,
        pool.clone(),
        write_tx,
        Duration::from_millis(stream_config.durable_fallback_deadline_ms),
    );

    let drainer = tokio::spawn({
        let pool = pool.clone();
        let cancel = cancel.clone();
        let batch_size = stream_config.batch_size;
        let flush_interval = Duration::from_secs(stream_config.batch_flush_interval_secs);
        async move { stream::run_batch_drainer(write_rx, pool, batch_size, flush_interval, cancel).await }
    });

    let authenticator: Arc<dyn stream::Authenticator> = Arc::new(HttpAuthenticator::new(app_config.auth_base_url.clone()));
    let stream_server = Arc::new(StreamServer::new(stream_config, store.clone(), authenticator));
    let stream_task = tokio::spawn({
        let server = stream_server.clone();
        let cancel = cancel.clone();
        async move {
            if let Err(err) = server.run(cancel).await {
                error!("progress stream server error: {err}");
            }
        }
    });

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("shutdown signal received, cancelling all subsystems");
    cancel.cancel();
    store.close();

    let (udp_result, cleanup_result, http_result, ingest_result, stream_result, drainer_result) =
        tokio::join!(udp_intake, cleanup_loop, http_server, ingest_task, stream_task, drainer);

    for result in [udp_result, cleanup_result, http_result, ingest_result, stream_result, drainer_result] {
        if let Err(err) = result {
            error!("a subsystem task panicked during shutdown: {err}");
        }
    }

    info!("shutdown complete");
    Ok(())
}
