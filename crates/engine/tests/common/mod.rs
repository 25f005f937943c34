//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use linewise_engine::{Engine, EngineConfig, FixedClock, MemoryStore};
use linewise_shared::{AgentId, AgentProfile, Queue, QueueAlgorithm, QueueId, TenantId, Ticket, TicketStatus};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

pub const T0: OffsetDateTime = datetime!(2024-03-01 09:00 UTC);

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<FixedClock>,
    pub engine: Engine,
    pub tenant: TenantId,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(T0));
        let engine = Engine::new(store.clone(), clock.clone(), EngineConfig::default());
        Self {
            store,
            clock,
            engine,
            tenant: TenantId::new(),
        }
    }

    pub fn queue(&self, name: &str, sla_seconds: i64, algorithm: QueueAlgorithm) -> QueueId {
        self.store
            .add_queue(Queue::new(self.tenant, name, sla_seconds).with_algorithm(algorithm))
    }

    pub fn agent(&self, name: &str, queues: &[QueueId]) -> AgentId {
        let agent = self.store.add_agent(AgentProfile::new(self.tenant, name));
        for queue in queues {
            self.store.assign(*queue, agent);
        }
        agent
    }

    /// WAITING ticket created `offset_secs` after T0
    pub fn waiting(&self, queue: QueueId, offset_secs: i64, priority: i32) -> Ticket {
        let ticket = Ticket::new(queue, format!("T-{offset_secs}"), T0 + Duration::seconds(offset_secs))
            .with_priority(priority);
        self.store.put_ticket(ticket.clone());
        ticket
    }

    /// CLOSED ticket with the given service duration, ended `ended_secs` after T0
    pub fn closed(&self, queue: QueueId, ended_secs: i64, service_secs: i64) -> Ticket {
        let ended = T0 + Duration::seconds(ended_secs);
        let started = ended - Duration::seconds(service_secs);
        let mut ticket = Ticket::new(queue, "H-000", started - Duration::seconds(30));
        ticket.status = TicketStatus::Closed;
        ticket.called_at = Some(started);
        ticket.started_at = Some(started);
        ticket.ended_at = Some(ended);
        self.store.put_ticket(ticket.clone());
        ticket
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }
}
