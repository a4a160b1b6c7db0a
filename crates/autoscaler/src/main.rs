//! Swarm Autoscaler - replica autoscaling for Docker Swarm services
//!
//! This binary runs on a Swarm manager node, samples the containers of each
//! configured service and adjusts replica counts on sustained load.

use anyhow::{Context, Result};
use autoscaler_lib::{
    collector::{CycleSchedulerBuilder, SchedulerConfig},
    health::{components, HealthRegistry},
    observability::{AutoscalerMetrics, StructuredLogger},
    orchestrator::{Actuator, DockerSwarm, DryRunActuator, IntentDispatcher},
};
use std::sync::Arc;
use swarm_autoscaler::{api, config};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting swarm-autoscaler");

    // Any configuration error is fatal: nothing is monitored with a bad config
    let config = config::load().map_err(|e| {
        error!(error = %format!("{:#}", e), "Refusing to start with invalid configuration");
        e
    })?;
    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "swarm-autoscaler".to_string());

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::DISCOVERY).await;
    health_registry.register(components::ACTUATOR).await;

    let metrics = AutoscalerMetrics::new();
    let logger = StructuredLogger::new(instance);
    let services: Vec<_> = config.enabled_services().cloned().collect();
    logger.log_startup(AUTOSCALER_VERSION, services.len(), config.dry_run);

    let swarm = Arc::new(DockerSwarm::connect().context("Failed to connect to Docker")?);
    let actuator: Arc<dyn Actuator> = if config.dry_run {
        Arc::new(DryRunActuator)
    } else {
        swarm.clone()
    };

    let (scheduler, intents) = CycleSchedulerBuilder::new()
        .discovery(swarm.clone())
        .stats(swarm)
        .services(services)
        .config(SchedulerConfig::from(&config))
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()?;

    let dispatcher = IntentDispatcher::new(
        actuator,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));
    let dispatcher_handle = tokio::spawn(dispatcher.run(intents, shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    let _ = scheduler_handle.await;
    let _ = dispatcher_handle.await;
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
