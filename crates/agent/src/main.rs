//! Oversubscription agent - node contention detection
//!
//! Runs on every node of the cluster, turning usage snapshots from the
//! telemetry collector into contention signals for the oversubscription
//! controller.

use anyhow::Result;
use oversub_lib::{
    detector::CpuContentionDetector,
    external::ExternalPipelineStage,
    health::{components, HealthRegistry},
    models::UsageSnapshot,
    observability::{AgentMetrics, StructuredLogger},
    pipeline::{ContentionSink, DetectionLoopBuilder, JsonFeedSource, Stage},
    usage::{CumulativeRateCpu, EwmaCpu, InstantaneousCpu, UsageExtractor},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting oversub-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        threshold = config.utilization_threshold,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SNAPSHOT_SOURCE).await;
    health_registry.register(components::PIPELINE).await;
    health_registry.register(components::API).await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION);

    // Assemble the pipeline innermost-first: sink, then the head stage
    let sink = ContentionSink::new(logger.clone());
    let contention_feed = sink.feed();
    let head: Box<dyn Stage<UsageSnapshot>> = match &config.external_command {
        Some(command) => {
            info!(command = %command, "Delegating detection to external pipeline");
            Box::new(
                ExternalPipelineStage::new(command, Box::new(sink))
                    .with_timeout(Duration::from_secs(config.external_timeout_secs)),
            )
        }
        None => Box::new(CpuContentionDetector::new(
            config.utilization_threshold,
            build_extractor(&config)?,
            Box::new(sink),
        )?),
    };

    let detection_loop = DetectionLoopBuilder::new()
        .source(Box::new(JsonFeedSource::new(&config.snapshot_feed)))
        .head(head)
        .interval(Duration::from_secs(config.cycle_interval_secs))
        .logger(logger.clone())
        .health(health_registry.clone())
        .build()?;

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        contention_feed,
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));
    let loop_handle = tokio::spawn(detection_loop.run(shutdown_tx.subscribe()));

    health_registry.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;
    api_handle.abort();

    Ok(())
}

fn build_extractor(config: &config::AgentConfig) -> Result<Box<dyn UsageExtractor>> {
    Ok(match config.usage_strategy {
        config::UsageStrategy::Instantaneous => Box::new(InstantaneousCpu),
        config::UsageStrategy::Rate => Box::new(CumulativeRateCpu::new()),
        config::UsageStrategy::Ewma => Box::new(EwmaCpu::new(
            config.ewma_alpha,
            Box::new(InstantaneousCpu),
        )?),
    })
}
