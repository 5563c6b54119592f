//! Health Agent - node and container health evaluation
//!
//! Runs on each cluster node, reads raw CPU/memory samples from the
//! collection pipeline on stdin and writes health state changes to stdout.

use anyhow::Result;
use health_core::probes::components;
use health_core::telemetry::HEARTBEAT_EVENT;
use health_core::{
    parse_metrics_to_collect, resolve_identity, CapacityCache, ClusterDataSource,
    ComponentHealth, PolicyTable, ProbeRegistry, Properties, SampleClassifier, StateStore,
    StructuredLogger, TelemetrySink, TracingTelemetry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod pipeline;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries health records
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting health-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        cluster_id = %config.cluster_id,
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.node_name);
    let telemetry: Arc<dyn TelemetrySink> = if config.disable_telemetry {
        Arc::new(TracingTelemetry::disabled())
    } else {
        Arc::new(TracingTelemetry::new(&config.telemetry_context(AGENT_VERSION)))
    };

    let probes = ProbeRegistry::new();

    // A broken policy file degrades to fail-open evaluation, it never stops the agent
    let policies = config.load_policies().unwrap_or_else(|e| {
        warn!(error = %format!("{:#}", e), "Policy file unusable, evaluating without policies");
        let mut properties = Properties::new();
        properties.insert("operation".to_string(), "load_policies".to_string());
        telemetry.report_exception(&e, &properties);
        PolicyTable::empty()
    });
    probes.record_policy(&policies.missing()).await;
    let monitors_configured = policies.len();

    let source: Arc<dyn ClusterDataSource> = Arc::new(config.cluster_source());
    let identity = resolve_identity(source.as_ref(), config.identity(), telemetry.as_ref()).await;

    let store = Arc::new(StateStore::new());
    let cache = Arc::new(CapacityCache::new(
        source,
        identity.node_name.clone(),
        config.refresh_interval(),
        telemetry.clone(),
    ));
    let outcome = cache.refresh(Instant::now()).await;
    probes.record_capacity(outcome, cache.is_resolved()).await;

    let classifier = SampleClassifier::new(
        identity,
        parse_metrics_to_collect(&config.metrics_to_collect),
        Arc::new(policies),
        cache.clone(),
        store.clone(),
        telemetry.clone(),
    );
    probes
        .set(components::PIPELINE, ComponentHealth::healthy())
        .await;

    logger.log_startup(AGENT_VERSION, monitors_configured);

    let app_state = Arc::new(api::AppState::new(probes.clone(), store.clone()));
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });
    let refresh_handle = tokio::spawn(refresh_loop(cache.clone(), probes.clone()));
    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        telemetry.clone(),
        store.clone(),
        config.heartbeat_interval(),
    ));

    probes.set_initialized(true).await;

    let pipeline = pipeline::Pipeline::new(&classifier, telemetry.as_ref(), config.batch_size);
    let input = BufReader::new(tokio::io::stdin());
    let output = tokio::io::stdout();

    let reason = tokio::select! {
        result = pipeline.run(input, output) => match result {
            Ok(stats) => {
                info!(?stats, "Input closed");
                "input closed"
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Pipeline failed");
                probes
                    .set(components::PIPELINE, ComponentHealth::unhealthy(e.to_string()))
                    .await;
                "pipeline failed"
            }
        },
        _ = tokio::signal::ctrl_c() => "SIGINT received",
    };

    logger.log_shutdown(reason);
    refresh_handle.abort();
    heartbeat_handle.abort();
    api_handle.abort();

    Ok(())
}

/// Keep capacity fresh between batches and mirror the result into the probes
async fn refresh_loop(cache: Arc<CapacityCache>, probes: ProbeRegistry) {
    let mut ticker = tokio::time::interval(cache.refresh_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let outcome = cache.refresh(Instant::now()).await;
        probes.record_capacity(outcome, cache.is_resolved()).await;
    }
}

async fn heartbeat_loop(telemetry: Arc<dyn TelemetrySink>, store: Arc<StateStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        let mut properties = Properties::new();
        properties.insert("MonitorInstances".to_string(), store.len().to_string());
        telemetry.report_event(HEARTBEAT_EVENT, &properties);
    }
}
