use std::sync::Arc;

use crate::{
    config::RuntimeConfig,
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};
use super::orchestrator::Orchestrator;

/// Builder for constructing an [`Orchestrator`].
pub struct OrchestratorBuilder {
    cfg: RuntimeConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (context, resource and component lifecycle,
    /// failures, state changes) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds one subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Builds the orchestrator.
    ///
    /// Creates the event bus and spawns the subscriber workers and the bus listener,
    /// so it must be called from within a Tokio runtime.
    pub fn build(self) -> Arc<Orchestrator> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        Arc::new(Orchestrator::new_internal(self.cfg, bus, subs))
    }
}
