//! Notifier binary
//!
//! `notifier connect` consumes the notification topic, dispatches callbacks
//! and serves `/health` and `/metrics` until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::jetstream;
use clap::{CommandFactory, Parser};
use fspiop::{JwsSigner, Signer, StaticSigner};
use notifier_core::cli::{Cli, Command, ConnectArgs};
use notifier_core::commit::{CommitCoordinator, CommitMode};
use notifier_core::ingest::IngestionLoop;
use notifier_core::kernel::{
    nats, CachedEndpointLookup, DispatchSettings, HttpCallbackTransport, JetStreamProducer,
    JetStreamSource, NotifierDeps,
};
use notifier_core::metrics::Metrics;
use notifier_core::server::{self, AppState};
use notifier_core::span::{LoggingSpanExporter, SpanCorrelator};
use notifier_core::{render_topic, Config, DispatcherContext};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "notifier";
const CONSUMER_GROUP: &str = "notifier";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(Command::Connect(args)) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    // Loads .env before the filter reads RUST_LOG
    let config = Config::from_env().context("Failed to load configuration")?;

    let default_filter = if config.log_enabled {
        "info,notifier_core=debug"
    } else {
        "info,notifier_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting notifier");
    run(config, args).await
}

async fn run(config: Config, args: ConnectArgs) -> Result<()> {
    let topic = render_topic(&config.topic_template, &args.message_type, &args.action);
    let fulfil_topic = args
        .produce_to_topic
        .clone()
        .unwrap_or_else(|| render_topic(&config.topic_template, "transfer", "fulfil"));
    tracing::info!(topic = %topic, fulfil_topic = %fulfil_topic, "resolved topics");

    let metrics = Arc::new(
        Metrics::new(!config.metrics_disabled).context("Failed to register metrics")?,
    );

    let signer: Arc<dyn Signer> = match &config.jws_signing_key_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "signing callbacks with RS256 key");
            Arc::new(
                JwsSigner::from_pem_file(path)
                    .with_context(|| format!("Failed to load signing key {}", path.display()))?,
            )
        }
        None => {
            tracing::warn!("JWS_SIGNING_KEY_PATH not set, using static callback signature");
            Arc::new(StaticSigner::new(config.mock_jws_signature.clone()))
        }
    };

    // Broker
    let client = nats::connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")?;
    let js = jetstream::new(client.clone());

    let mode = CommitMode::from_auto_commit(config.consumer_auto_commit);
    let source = JetStreamSource::new(
        &js,
        &topic,
        CONSUMER_GROUP,
        mode,
        config.consumer_batch_size,
        config.consumer_fetch_timeout,
    )
    .await
    .context("Failed to create consumer")?;
    let producer = JetStreamProducer::new(js.clone(), &[fulfil_topic.as_str()])
        .await
        .context("Failed to prepare fulfil topic")?;

    // Outbound HTTP
    let endpoints = CachedEndpointLookup::new(
        &config.switch_endpoint,
        config.endpoint_cache_expires_in,
        config.endpoint_cache_generate_timeout,
    )
    .context("Failed to create endpoint lookup")?;
    let transport = HttpCallbackTransport::new(config.callback_timeout)
        .context("Failed to create callback transport")?;

    let correlator = SpanCorrelator::new(
        SERVICE_NAME,
        config.tracestate_vendor.clone(),
        Arc::new(LoggingSpanExporter),
    );

    let deps = NotifierDeps::new(
        Arc::new(endpoints),
        Arc::new(transport),
        Arc::new(producer),
        signer,
        metrics.clone(),
        correlator,
        DispatchSettings {
            fulfilment: config.transfers_fulfilment.clone(),
            fulfil_topic,
            log_payloads: config.log_enabled,
        },
    );
    let ctx = Arc::new(DispatcherContext::new(
        deps,
        CommitCoordinator::new(mode, metrics.clone()),
    ));

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    // Health / metrics side channel
    let listener = server::bind(&config.bind_address()).await?;
    let state = AppState::new(topic, Some(client.clone()), metrics);
    let server_handle = tokio::spawn(server::serve(listener, state, shutdown_rx.clone()));

    let stats = IngestionLoop::new(Arc::new(source), ctx, shutdown_rx).run().await;
    tracing::info!(
        batches = stats.batches,
        messages = stats.messages,
        failed_batches = stats.failed_batches,
        "consumer stopped"
    );

    match server_handle.await {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "health server task panicked"),
    }

    if let Err(e) = client.flush().await {
        tracing::warn!(error = %e, "failed to flush broker connection");
    }

    tracing::info!("notifier stopped");
    Ok(())
}
