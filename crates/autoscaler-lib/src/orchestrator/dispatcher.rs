//! Hands scaling intents to the actuator
//!
//! Runs as its own task so a slow orchestrator API never holds up an
//! evaluation cycle. Failed updates are not retried: the next cycle re-reads
//! the replica count and decides again.

use super::Actuator;
use crate::health::{components, HealthRegistry};
use crate::models::ScalingIntent;
use crate::observability::{AutoscalerMetrics, StructuredLogger};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

pub struct IntentDispatcher {
    actuator: Arc<dyn Actuator>,
    health: HealthRegistry,
    metrics: AutoscalerMetrics,
    logger: StructuredLogger,
}

impl IntentDispatcher {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        health: HealthRegistry,
        metrics: AutoscalerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            actuator,
            health,
            metrics,
            logger,
        }
    }

    /// Apply one intent; returns whether the orchestrator accepted it
    pub async fn dispatch(&self, intent: &ScalingIntent) -> bool {
        if !intent.is_actionable() {
            return true;
        }

        match self
            .actuator
            .set_replicas(&intent.service, intent.target_replicas)
            .await
        {
            Ok(()) => {
                self.logger.log_actuation(intent, None);
                self.health.set_healthy(components::ACTUATOR).await;
                true
            }
            Err(e) => {
                let error = format!("{:#}", e);
                self.logger.log_actuation(intent, Some(&error));
                self.metrics.inc_actuation_failures();
                self.health.set_degraded(components::ACTUATOR, error).await;
                false
            }
        }
    }

    /// Consume intents until the channel closes or shutdown is signalled
    pub async fn run(
        self,
        mut intents: mpsc::Receiver<ScalingIntent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting intent dispatcher");

        loop {
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => {
                        self.dispatch(&intent).await;
                    }
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }

        info!("Intent dispatcher stopped");
    }
}
