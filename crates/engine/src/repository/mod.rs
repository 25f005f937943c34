//! Repositories - persistence abstraction for tickets and the queue read model
//!
//! The scheduling and estimation logic only talks to these traits, so
//! aggregations are explicit methods (`count_queued_ahead`,
//! `average_service_seconds`, `available_agent_count`) rather than query text.
//!
//! Two implementations ship with the engine:
//! - [`PgStore`]: Postgres, row-level locks (`FOR UPDATE`, `SKIP LOCKED`)
//! - [`MemoryStore`]: single process, one lock around all state

use async_trait::async_trait;
use linewise_shared::{
    AgentId, AgentProfile, Queue, QueueId, TenantId, Ticket, TicketId, TicketStatus,
    TicketTransfer,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::EngineResult;
use crate::ordering::SelectionPolicy;
use crate::state::Transition;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Ticket counts over a trailing time window of one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TicketWindowStats {
    pub total: u64,
    /// Tickets whose wait (until called, or until now) exceeded the SLA
    pub sla_breached: u64,
    /// Tickets at or above the high-priority threshold
    pub high_priority: u64,
}

/// Ticket persistence
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn get_ticket(&self, id: TicketId) -> EngineResult<Option<Ticket>>;

    /// Store a newly created ticket. With `max_queued`, fails with
    /// `Conflict(QueueFull)` when the queue already holds that many queued
    /// tickets; the count and the insert are one unit of work.
    async fn insert_ticket(&self, ticket: &Ticket, max_queued: Option<u32>) -> EngineResult<()>;

    /// WAITING and TRANSFERRED tickets of a queue, oldest first
    async fn queued_tickets(&self, queue_id: QueueId) -> EngineResult<Vec<Ticket>>;

    /// WAITING tickets of a queue, oldest first
    async fn waiting_tickets(&self, queue_id: QueueId, limit: Option<usize>) -> EngineResult<Vec<Ticket>>;

    /// Queued tickets in the ticket's queue served before it under `policy`
    async fn count_queued_ahead(&self, ticket: &Ticket, policy: &SelectionPolicy) -> EngineResult<u64>;

    /// Mean service duration over the `limit` most recently closed tickets
    async fn average_service_seconds(&self, queue_id: QueueId, limit: usize) -> EngineResult<Option<f64>>;

    async fn count_by_status(&self, queue_id: QueueId, status: TicketStatus) -> EngineResult<u64>;

    async fn count_created_since(&self, queue_id: QueueId, since: OffsetDateTime) -> EngineResult<u64>;

    /// Counts used for algorithm recommendations
    async fn window_stats(
        &self,
        queue_id: QueueId,
        since: OffsetDateTime,
        sla_seconds: i64,
        high_priority_threshold: i32,
        now: OffsetDateTime,
    ) -> EngineResult<TicketWindowStats>;

    /// Write the advisory ETA; ignored unless the ticket is still WAITING.
    /// Returns whether a row was updated.
    async fn set_eta(&self, ticket_id: TicketId, eta_seconds: Option<i64>) -> EngineResult<bool>;

    /// Atomically check the agent holds no active ticket, select the next
    /// queued ticket under `policy`, move it to CALLED and mark the agent BUSY.
    async fn claim_next(
        &self,
        queue: &Queue,
        agent_id: AgentId,
        policy: &SelectionPolicy,
        now: OffsetDateTime,
    ) -> EngineResult<Option<Ticket>>;

    /// Lock one ticket, apply `transition`, persist. When the transition
    /// releases the agent, the ticket's agent is made AVAILABLE in the same
    /// unit of work; an explicit `release_agent` must match it. A transition
    /// back to an active status fails with `Conflict(AgentAlreadyActive)` if
    /// the agent meanwhile holds another active ticket.
    async fn apply_transition(
        &self,
        ticket_id: TicketId,
        transition: &Transition,
        release_agent: Option<AgentId>,
        now: OffsetDateTime,
    ) -> EngineResult<Ticket>;

    /// Transfer history of a ticket, oldest first
    async fn transfers_for(&self, ticket_id: TicketId) -> EngineResult<Vec<TicketTransfer>>;
}

/// Read model for queues, services and agents
#[async_trait]
pub trait QueueDirectory: Send + Sync {
    async fn get_queue(&self, id: QueueId) -> EngineResult<Option<Queue>>;

    /// ACTIVE queues ordered by name; all tenants when `tenant` is `None`
    async fn active_queues(&self, tenant: Option<TenantId>) -> EngineResult<Vec<Queue>>;

    async fn get_agent(&self, id: AgentId) -> EngineResult<Option<AgentProfile>>;

    /// Agents with an active assignment to the queue
    async fn queue_agents(&self, queue_id: QueueId) -> EngineResult<Vec<AgentProfile>>;

    /// Agents with an active assignment to the queue and status AVAILABLE
    async fn available_agent_count(&self, queue_id: QueueId) -> EngineResult<u32>;
}

/// Everything the engine needs from storage
pub trait Store: TicketRepository + QueueDirectory {}

impl<T: TicketRepository + QueueDirectory> Store for T {}
