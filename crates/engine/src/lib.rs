//! Linewise queue engine
//!
//! Ticket scheduling, wait-time estimation, queue health scoring and
//! cross-queue load balancing on top of a pluggable [`Store`].

pub mod balancer;
pub mod clock;
pub mod config;
pub mod error;
pub mod eta;
pub mod events;
pub mod health;
pub mod ordering;
pub mod repository;
pub mod scheduler;
pub mod state;

use std::sync::Arc;

pub use balancer::{
    AgentReallocationSuggestion, AlgorithmRecommendation, BalanceStatus, Confidence,
    LoadBalanceAnalysis, LoadBalancer, OptimizationReport, QueueLoad, SuggestionPriority,
    TransferSuggestion,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use error::{ConflictKind, EngineError, EngineResult};
pub use eta::{estimate_seconds, EtaEstimator, EtaRefreshSummary, QueueSnapshot};
pub use events::{ChannelSink, EventBroadcaster, EventSink, TicketEvent, WebhookSink};
pub use health::{
    HealthAlert, HealthAlertKind, HealthMetrics, HealthStatus, QueueHealth, QueueHealthMonitor,
    Severity,
};
pub use ordering::SelectionPolicy;
pub use repository::{
    MemoryStore, PgStore, QueueDirectory, Store, TicketRepository, TicketWindowStats,
};
pub use scheduler::{NewTicket, QueueScheduler};
pub use state::{Transition, TRANSFER_PRIORITY_BOOST};

/// All engine services over one store and clock
#[derive(Clone)]
pub struct Engine {
    pub scheduler: QueueScheduler,
    pub estimator: EtaEstimator,
    pub health: QueueHealthMonitor,
    pub balancer: LoadBalancer,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            scheduler: QueueScheduler::new(Arc::clone(&store), Arc::clone(&clock), config.clone()),
            estimator: EtaEstimator::new(Arc::clone(&store), Arc::clone(&clock), config.clone()),
            health: QueueHealthMonitor::new(Arc::clone(&store), Arc::clone(&clock), config.clone()),
            balancer: LoadBalancer::new(store, clock, config),
        }
    }

    /// Publish scheduler events through `events`
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.scheduler = self.scheduler.with_events(events);
        self
    }
}
