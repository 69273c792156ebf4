//! Module orchestration -- assembly, channel wiring, and lifecycle management.
//!
//! Builds every component in dependency order, runs the dispatch loop
//! that connects sources to the store and the enricher, and coordinates
//! graceful shutdown.
//!
//! # Startup Order
//!
//! 1. Store (opens the embedded log, spawns GC + ips coalescer)
//! 2. Enricher (spawns cache tickers)
//! 3. Dispatch loop (filter -> store + 2x enrich per observation)
//! 4. Read API
//! 5. Sources (NetFlow listener, SNI capture) -- started last so nothing
//!    is observed before the pipeline below is ready
//!
//! # Shutdown Order (SIGINT/SIGTERM)
//!
//! 1. Sources (no new observations)
//! 2. Dispatch loop (drains the in-flight observation)
//! 3. Enricher (stops tickers; in-flight enrichments have completed)
//! 4. Read API
//! 5. Store (flushes pending merges, closes the log)

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lanaudit_api::ApiServer;
use lanaudit_core::config::LanauditConfig;
use lanaudit_core::pipeline::Pipeline;
use lanaudit_core::types::{Action, FlowObservation};
use lanaudit_core::FlowFilter;
use lanaudit_enrich::{DnsPtrResolver, Enricher, IntelClient, PtrResolver, ShodanClient};
use lanaudit_netflow::NetflowSource;
use lanaudit_sni::SniSource;
use lanaudit_store::Store;

/// Build everything, run until a shutdown signal, then tear down in order.
pub async fn run(config: LanauditConfig) -> Result<()> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    let store = Arc::new(Store::open(&config.store).context("failed to open store")?);
    tracing::info!(path = %config.store.data_dir().display(), "store opened");

    let resolver = DnsPtrResolver::new(&config.enrich.dns)
        .map_err(|e| anyhow::anyhow!("failed to build resolver: {}", e))?;
    let intel = ShodanClient::new(config.enrich.shodan_api_key.clone());
    let enricher = Arc::new(Enricher::new(
        &config.enrich,
        resolver,
        intel,
        Arc::clone(&store),
    ));
    tracing::info!("enricher initialized");

    let filter = FlowFilter::new(
        config.filter.cidr,
        config.filter.exclusions.iter().copied(),
    );

    // 관측 파이프는 용량 1 — 보강이 밀리면 수집기가 send에서 막힌다
    let (observation_tx, observation_rx) = mpsc::channel::<FlowObservation>(1);

    let dispatch_cancel = CancellationToken::new();
    let dispatcher = spawn_dispatch_loop(
        observation_rx,
        filter,
        Arc::clone(&store),
        Arc::clone(&enricher),
        dispatch_cancel.clone(),
    );

    let mut api = ApiServer::new(config.api.clone(), Arc::clone(&store));
    api.start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start read api: {}", e))?;

    let mut netflow = NetflowSource::new(config.netflow.clone(), observation_tx.clone());
    netflow
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start netflow source: {}", e))?;

    let mut sni = SniSource::new(config.sni.clone(), observation_tx);
    sni.start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start sni source: {}", e))?;

    tracing::info!("lanaudit running -- all modules active");
    let signal = wait_for_shutdown_signal().await?;
    tracing::info!(signal, "shutdown signal received");

    // Sources first: no new observations enter the pipeline.
    if let Err(e) = sni.stop().await {
        tracing::error!(error = %e, "failed to stop sni source");
    }
    if let Err(e) = netflow.stop().await {
        tracing::error!(error = %e, "failed to stop netflow source");
    }

    dispatch_cancel.cancel();
    let _ = dispatcher.await;

    enricher.dispose().await;
    tracing::debug!("enricher disposed");

    if let Err(e) = api.stop().await {
        tracing::error!(error = %e, "failed to stop read api");
    }

    store
        .dispose()
        .await
        .map_err(|e| anyhow::anyhow!("failed to close store: {}", e))?;
    tracing::info!("lanaudit shut down");
    Ok(())
}

/// Spawn the loop connecting sources to the store and the enricher.
///
/// Each kept observation is recorded as an action, then both endpoints
/// are enriched concurrently. The loop waits for both enrichments before
/// taking the next observation -- that is what propagates backpressure
/// to the sources.
pub fn spawn_dispatch_loop<R, C>(
    mut observations: mpsc::Receiver<FlowObservation>,
    filter: FlowFilter,
    store: Arc<Store>,
    enricher: Arc<Enricher<R, C>>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: PtrResolver + 'static,
    C: IntelClient + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_observation = observations.recv() => {
                    let Some(observation) = maybe_observation else {
                        tracing::debug!("observation channel closed, dispatch loop exiting");
                        break;
                    };

                    if !filter.keeps(&observation) {
                        tracing::debug!(%observation, "ignoring observation outside audited network");
                        continue;
                    }

                    let action = Action::from(&observation);
                    if let Err(e) = store.store_action(&action) {
                        tracing::warn!(%action, error = %e, "store action failed");
                    }

                    tokio::join!(
                        enricher.enrich(observation.src_ip),
                        enricher.enrich(observation.dst_ip),
                    );
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("dispatch loop cancelled");
                    break;
                }
            }
        }
    })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
