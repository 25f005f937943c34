//! In-memory store (single node, tests and development)
//!
//! A single `RwLock` guards all state. Mutations hold the write lock for the
//! whole read-check-modify-write, which gives `claim_next` and every
//! transition the same atomicity the Postgres store gets from row locks.

use std::collections::HashMap;

use async_trait::async_trait;
use linewise_shared::{
    AgentId, AgentProfile, AgentStatus, Queue, QueueAssignment, QueueId, QueueStatus, TenantId,
    Ticket, TicketId, TicketStatus, TicketTransfer,
};
use parking_lot::RwLock;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{QueueDirectory, TicketRepository, TicketWindowStats};
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::ordering::SelectionPolicy;
use crate::state::Transition;

#[derive(Default)]
struct MemoryState {
    queues: HashMap<QueueId, Queue>,
    agents: HashMap<AgentId, AgentProfile>,
    assignments: Vec<QueueAssignment>,
    tickets: HashMap<TicketId, Ticket>,
    transfers: Vec<TicketTransfer>,
}

impl MemoryState {
    fn tickets_in(&self, queue_id: QueueId) -> impl Iterator<Item = &Ticket> {
        self.tickets.values().filter(move |t| t.queue_id == queue_id)
    }

    fn sorted_by_age(mut tickets: Vec<Ticket>) -> Vec<Ticket> {
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tickets
    }

    fn assigned_agents(&self, queue_id: QueueId) -> impl Iterator<Item = &AgentProfile> {
        self.assignments
            .iter()
            .filter(move |a| a.queue_id == queue_id && a.is_active)
            .filter_map(|a| self.agents.get(&a.agent_id))
    }

    fn holds_active_ticket(&self, agent_id: AgentId, except: Option<TicketId>) -> bool {
        self.tickets.values().any(|t| {
            t.agent_id == Some(agent_id) && t.status.is_active() && Some(t.id) != except
        })
    }

    fn release(&mut self, agent_id: AgentId) {
        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.status = AgentStatus::Available;
        }
    }
}

/// In-memory policy-free store
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queue(&self, queue: Queue) -> QueueId {
        let id = queue.id;
        self.state.write().queues.insert(id, queue);
        id
    }

    pub fn set_queue_status(&self, queue_id: QueueId, status: QueueStatus) {
        if let Some(queue) = self.state.write().queues.get_mut(&queue_id) {
            queue.status = status;
        }
    }

    pub fn add_agent(&self, agent: AgentProfile) -> AgentId {
        let id = agent.id;
        self.state.write().agents.insert(id, agent);
        id
    }

    pub fn set_agent_status(&self, agent_id: AgentId, status: AgentStatus) {
        if let Some(agent) = self.state.write().agents.get_mut(&agent_id) {
            agent.status = status;
        }
    }

    /// Create or reactivate an agent's assignment to a queue
    pub fn assign(&self, queue_id: QueueId, agent_id: AgentId) {
        let mut state = self.state.write();
        match state
            .assignments
            .iter_mut()
            .find(|a| a.queue_id == queue_id && a.agent_id == agent_id)
        {
            Some(existing) => existing.is_active = true,
            None => state.assignments.push(QueueAssignment {
                queue_id,
                agent_id,
                is_active: true,
            }),
        }
    }

    pub fn unassign(&self, queue_id: QueueId, agent_id: AgentId) {
        let mut state = self.state.write();
        for assignment in state
            .assignments
            .iter_mut()
            .filter(|a| a.queue_id == queue_id && a.agent_id == agent_id)
        {
            assignment.is_active = false;
        }
    }

    /// Insert a ticket in any state, for seeding history
    pub fn put_ticket(&self, ticket: Ticket) -> TicketId {
        let id = ticket.id;
        self.state.write().tickets.insert(id, ticket);
        id
    }
}

#[async_trait]
impl TicketRepository for MemoryStore {
    async fn get_ticket(&self, id: TicketId) -> EngineResult<Option<Ticket>> {
        Ok(self.state.read().tickets.get(&id).cloned())
    }

    async fn insert_ticket(&self, ticket: &Ticket, max_queued: Option<u32>) -> EngineResult<()> {
        let mut state = self.state.write();
        if state.tickets.contains_key(&ticket.id) {
            return Err(EngineError::Validation(format!(
                "ticket {} already exists",
                ticket.id
            )));
        }
        if let Some(max_queued) = max_queued {
            let queued = state
                .tickets_in(ticket.queue_id)
                .filter(|t| t.status.is_queued())
                .count();
            if queued >= max_queued as usize {
                return Err(EngineError::Conflict(ConflictKind::QueueFull));
            }
        }
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn queued_tickets(&self, queue_id: QueueId) -> EngineResult<Vec<Ticket>> {
        let state = self.state.read();
        let tickets = state
            .tickets_in(queue_id)
            .filter(|t| t.status.is_queued())
            .cloned()
            .collect();
        Ok(MemoryState::sorted_by_age(tickets))
    }

    async fn waiting_tickets(&self, queue_id: QueueId, limit: Option<usize>) -> EngineResult<Vec<Ticket>> {
        let state = self.state.read();
        let tickets = state
            .tickets_in(queue_id)
            .filter(|t| t.status == TicketStatus::Waiting)
            .cloned()
            .collect();
        let mut tickets = MemoryState::sorted_by_age(tickets);
        if let Some(limit) = limit {
            tickets.truncate(limit);
        }
        Ok(tickets)
    }

    async fn count_queued_ahead(&self, ticket: &Ticket, policy: &SelectionPolicy) -> EngineResult<u64> {
        let state = self.state.read();
        Ok(policy.count_ahead(ticket, state.tickets_in(ticket.queue_id)) as u64)
    }

    async fn average_service_seconds(&self, queue_id: QueueId, limit: usize) -> EngineResult<Option<f64>> {
        let state = self.state.read();
        let mut closed: Vec<(OffsetDateTime, f64)> = state
            .tickets_in(queue_id)
            .filter(|t| t.status == TicketStatus::Closed)
            .filter_map(|t| {
                let ended = t.ended_at?;
                let duration = t.service_duration()?;
                Some((ended, duration.as_seconds_f64()))
            })
            .collect();
        closed.sort_by(|a, b| b.0.cmp(&a.0));
        closed.truncate(limit);

        if closed.is_empty() {
            return Ok(None);
        }
        let total: f64 = closed.iter().map(|(_, secs)| secs).sum();
        Ok(Some(total / closed.len() as f64))
    }

    async fn count_by_status(&self, queue_id: QueueId, status: TicketStatus) -> EngineResult<u64> {
        let state = self.state.read();
        Ok(state.tickets_in(queue_id).filter(|t| t.status == status).count() as u64)
    }

    async fn count_created_since(&self, queue_id: QueueId, since: OffsetDateTime) -> EngineResult<u64> {
        let state = self.state.read();
        Ok(state
            .tickets_in(queue_id)
            .filter(|t| t.created_at >= since)
            .count() as u64)
    }

    async fn window_stats(
        &self,
        queue_id: QueueId,
        since: OffsetDateTime,
        sla_seconds: i64,
        high_priority_threshold: i32,
        now: OffsetDateTime,
    ) -> EngineResult<TicketWindowStats> {
        let state = self.state.read();
        let stats = state
            .tickets_in(queue_id)
            .filter(|t| t.created_at >= since)
            .fold(TicketWindowStats::default(), |mut stats, t| {
                stats.total += 1;
                if t.wait_seconds(now) > sla_seconds {
                    stats.sla_breached += 1;
                }
                if t.priority >= high_priority_threshold {
                    stats.high_priority += 1;
                }
                stats
            });
        Ok(stats)
    }

    async fn set_eta(&self, ticket_id: TicketId, eta_seconds: Option<i64>) -> EngineResult<bool> {
        let mut state = self.state.write();
        match state.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.status == TicketStatus::Waiting => {
                ticket.eta_seconds = eta_seconds;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_next(
        &self,
        queue: &Queue,
        agent_id: AgentId,
        policy: &SelectionPolicy,
        now: OffsetDateTime,
    ) -> EngineResult<Option<Ticket>> {
        let mut state = self.state.write();

        if !state.agents.contains_key(&agent_id) {
            return Err(EngineError::NotFound(format!("agent {}", agent_id)));
        }
        if state.holds_active_ticket(agent_id, None) {
            return Err(EngineError::Conflict(ConflictKind::AgentAlreadyActive));
        }

        let Some(next_id) = policy.select_next(state.tickets_in(queue.id)).map(|t| t.id) else {
            return Ok(None);
        };
        let Some(ticket) = state.tickets.get_mut(&next_id) else {
            return Ok(None);
        };

        let mut updated = ticket.clone();
        Transition::Call { agent_id }.apply(&mut updated, now)?;
        *ticket = updated.clone();

        if let Some(agent) = state.agents.get_mut(&agent_id) {
            agent.status = AgentStatus::Busy;
        }
        Ok(Some(updated))
    }

    async fn apply_transition(
        &self,
        ticket_id: TicketId,
        transition: &Transition,
        release_agent: Option<AgentId>,
        now: OffsetDateTime,
    ) -> EngineResult<Ticket> {
        let mut state = self.state.write();
        let current = state
            .tickets
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("ticket {}", ticket_id)))?;

        let release = transition.agent_to_release(&current, release_agent)?;
        let mut updated = current.clone();
        transition.apply(&mut updated, now)?;

        if transition.occupies_agent() {
            if let Some(agent_id) = updated.agent_id {
                if state.holds_active_ticket(agent_id, Some(ticket_id)) {
                    return Err(EngineError::Conflict(ConflictKind::AgentAlreadyActive));
                }
            }
        }

        if let Transition::Transfer { reason, .. } = transition {
            state.transfers.push(TicketTransfer {
                id: Uuid::new_v4(),
                ticket_id,
                from_queue_id: current.queue_id,
                to_queue_id: updated.queue_id,
                reason: reason.clone(),
                priority_before: current.priority,
                priority_after: updated.priority,
                transferred_at: now,
            });
        }
        if let Some(agent_id) = release {
            state.release(agent_id);
        }
        if transition.occupies_agent() {
            if let Some(agent) = updated.agent_id.and_then(|id| state.agents.get_mut(&id)) {
                agent.status = AgentStatus::Busy;
            }
        }

        state.tickets.insert(ticket_id, updated.clone());
        Ok(updated)
    }

    async fn transfers_for(&self, ticket_id: TicketId) -> EngineResult<Vec<TicketTransfer>> {
        let state = self.state.read();
        let mut transfers: Vec<TicketTransfer> = state
            .transfers
            .iter()
            .filter(|t| t.ticket_id == ticket_id)
            .cloned()
            .collect();
        transfers.sort_by(|a, b| a.transferred_at.cmp(&b.transferred_at));
        Ok(transfers)
    }
}

#[async_trait]
impl QueueDirectory for MemoryStore {
    async fn get_queue(&self, id: QueueId) -> EngineResult<Option<Queue>> {
        Ok(self.state.read().queues.get(&id).cloned())
    }

    async fn active_queues(&self, tenant: Option<TenantId>) -> EngineResult<Vec<Queue>> {
        let state = self.state.read();
        let mut queues: Vec<Queue> = state
            .queues
            .values()
            .filter(|q| q.is_active())
            .filter(|q| tenant.map_or(true, |tenant| q.tenant_id == tenant))
            .cloned()
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(queues)
    }

    async fn get_agent(&self, id: AgentId) -> EngineResult<Option<AgentProfile>> {
        Ok(self.state.read().agents.get(&id).cloned())
    }

    async fn queue_agents(&self, queue_id: QueueId) -> EngineResult<Vec<AgentProfile>> {
        let state = self.state.read();
        let mut agents: Vec<AgentProfile> = state.assigned_agents(queue_id).cloned().collect();
        agents.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(agents)
    }

    async fn available_agent_count(&self, queue_id: QueueId) -> EngineResult<u32> {
        let state = self.state.read();
        Ok(state
            .assigned_agents(queue_id)
            .filter(|a| a.is_available())
            .count() as u32)
    }
}
