//! Queue scheduler
//!
//! Selects the next ticket of a queue and drives every ticket transition.
//! Each operation takes the caller's tenant explicitly; a ticket or queue of
//! another tenant is reported as not found.

use std::sync::Arc;

use linewise_shared::{
    AgentId, CustomerId, Queue, QueueAlgorithm, QueueId, TenantId, Ticket, TicketChannel,
    TicketId,
};
use serde::{Deserialize, Serialize};
use time::Time;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::eta::EtaEstimator;
use crate::events::{EventBroadcaster, TicketEvent};
use crate::ordering::SelectionPolicy;
use crate::repository::Store;
use crate::state::Transition;

/// Ticket intake request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTicket {
    pub queue_id: QueueId,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Display label; generated when absent
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub channel: TicketChannel,
    #[serde(default)]
    pub priority: i32,
}

impl NewTicket {
    pub fn new(queue_id: QueueId) -> Self {
        Self {
            queue_id,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn with_channel(mut self, channel: TicketChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }
}

/// `<queue initial>-<daily sequence>`, e.g. `B-007`
fn display_number(queue: &Queue, sequence: u64) -> String {
    let initial = queue
        .name
        .chars()
        .find(|c| c.is_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('Q');
    format!("{}-{:03}", initial, sequence)
}

#[derive(Clone)]
pub struct QueueScheduler {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    eta: EtaEstimator,
    events: EventBroadcaster,
}

impl QueueScheduler {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let eta = EtaEstimator::new(Arc::clone(&store), Arc::clone(&clock), config);
        Self {
            store,
            clock,
            eta,
            events: EventBroadcaster::new(),
        }
    }

    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = events;
        self
    }

    pub fn estimator(&self) -> &EtaEstimator {
        &self.eta
    }

    async fn tenant_queue(&self, tenant: TenantId, queue_id: QueueId) -> EngineResult<Queue> {
        match self.store.get_queue(queue_id).await? {
            Some(queue) if queue.tenant_id == tenant => Ok(queue),
            _ => Err(EngineError::NotFound(format!("queue {}", queue_id))),
        }
    }

    /// Load a ticket and its queue, both owned by `tenant`
    async fn tenant_ticket(&self, tenant: TenantId, ticket_id: TicketId) -> EngineResult<(Ticket, Queue)> {
        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("ticket {}", ticket_id)))?;
        let queue = self
            .tenant_queue(tenant, ticket.queue_id)
            .await
            .map_err(|_| EngineError::NotFound(format!("ticket {}", ticket_id)))?;
        Ok((ticket, queue))
    }

    /// Ticket that would be served next, without claiming it
    pub async fn get_next_ticket(
        &self,
        tenant: TenantId,
        queue_id: QueueId,
        algorithm: Option<QueueAlgorithm>,
    ) -> EngineResult<Option<Ticket>> {
        let queue = self.tenant_queue(tenant, queue_id).await?;
        let policy = SelectionPolicy::for_queue(&queue, algorithm, self.clock.now());
        let queued = self.store.queued_tickets(queue.id).await?;
        Ok(policy.select_next(&queued).cloned())
    }

    /// Claim the next ticket of `queue_id` for `agent_id`
    pub async fn call_next(
        &self,
        tenant: TenantId,
        agent_id: AgentId,
        queue_id: QueueId,
    ) -> EngineResult<Option<Ticket>> {
        let queue = self
            .store
            .get_queue(queue_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("queue {}", queue_id)))?;
        if queue.tenant_id != tenant {
            return Err(EngineError::Validation(format!(
                "queue {} does not belong to tenant {}",
                queue_id, tenant
            )));
        }
        if !queue.is_active() {
            return Err(EngineError::Validation(format!(
                "queue {} is {}",
                queue.name, queue.status
            )));
        }

        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("agent {}", agent_id)))?;
        if agent.tenant_id != tenant {
            return Err(EngineError::Validation(format!(
                "agent {} does not belong to tenant {}",
                agent_id, tenant
            )));
        }

        let now = self.clock.now();
        let policy = SelectionPolicy::for_queue(&queue, None, now);
        let Some(ticket) = self.store.claim_next(&queue, agent_id, &policy, now).await? else {
            tracing::debug!(queue_id = %queue_id, agent_id = %agent_id, "Queue empty, nothing to call");
            return Ok(None);
        };

        tracing::info!(
            ticket_id = %ticket.id,
            queue_id = %queue_id,
            agent_id = %agent_id,
            number = %ticket.number,
            algorithm = %policy.algorithm,
            "Ticket called"
        );
        self.events.publish(TicketEvent::TicketCalled {
            tenant_id: tenant,
            ticket: ticket.clone(),
            agent_id,
        });
        Ok(Some(ticket))
    }

    async fn transition(
        &self,
        tenant: TenantId,
        ticket_id: TicketId,
        transition: Transition,
        release_agent: Option<AgentId>,
    ) -> EngineResult<Ticket> {
        self.tenant_ticket(tenant, ticket_id).await?;
        let ticket = self
            .store
            .apply_transition(ticket_id, &transition, release_agent, self.clock.now())
            .await?;

        tracing::info!(
            ticket_id = %ticket_id,
            queue_id = %ticket.queue_id,
            transition = transition.name(),
            status = %ticket.status,
            "Ticket transitioned"
        );
        Ok(ticket)
    }

    pub async fn start_service(&self, tenant: TenantId, ticket_id: TicketId) -> EngineResult<Ticket> {
        let ticket = self
            .transition(tenant, ticket_id, Transition::StartService, None)
            .await?;
        self.events.publish(TicketEvent::ServiceStarted {
            tenant_id: tenant,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Close a CALLED or IN_SERVICE ticket and make its agent AVAILABLE.
    /// A given `agent_id` must be the agent serving the ticket.
    pub async fn close_ticket(
        &self,
        tenant: TenantId,
        ticket_id: TicketId,
        agent_id: Option<AgentId>,
    ) -> EngineResult<Ticket> {
        let ticket = self
            .transition(tenant, ticket_id, Transition::Close, agent_id)
            .await?;
        self.events.publish(TicketEvent::TicketClosed {
            tenant_id: tenant,
            released_agent: ticket.agent_id,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    pub async fn mark_no_show(
        &self,
        tenant: TenantId,
        ticket_id: TicketId,
        agent_id: Option<AgentId>,
    ) -> EngineResult<Ticket> {
        let ticket = self
            .transition(tenant, ticket_id, Transition::NoShow, agent_id)
            .await?;
        self.events.publish(TicketEvent::TicketNoShow {
            tenant_id: tenant,
            released_agent: ticket.agent_id,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    pub async fn pause_ticket(&self, tenant: TenantId, ticket_id: TicketId) -> EngineResult<Ticket> {
        let ticket = self
            .transition(tenant, ticket_id, Transition::Pause, None)
            .await?;
        self.events.publish(TicketEvent::TicketPaused {
            tenant_id: tenant,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    pub async fn resume_ticket(&self, tenant: TenantId, ticket_id: TicketId) -> EngineResult<Ticket> {
        let ticket = self
            .transition(tenant, ticket_id, Transition::Resume, None)
            .await?;
        self.events.publish(TicketEvent::TicketResumed {
            tenant_id: tenant,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }

    /// Move a queued ticket to another queue of the same tenant
    pub async fn transfer_ticket(
        &self,
        tenant: TenantId,
        ticket_id: TicketId,
        target_queue_id: QueueId,
        reason: impl Into<String>,
    ) -> EngineResult<Ticket> {
        let (ticket, source) = self.tenant_ticket(tenant, ticket_id).await?;
        let target = self
            .store
            .get_queue(target_queue_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("queue {}", target_queue_id)))?;

        if target.tenant_id != source.tenant_id {
            return Err(EngineError::Conflict(ConflictKind::CrossTenantTransfer));
        }
        if target.id == ticket.queue_id {
            return Err(EngineError::Conflict(ConflictKind::SameQueueTransfer));
        }

        let reason = reason.into();
        let transition = Transition::Transfer {
            target_queue: target.id,
            reason: reason.clone(),
        };
        let transferred = self
            .store
            .apply_transition(ticket_id, &transition, None, self.clock.now())
            .await?;

        tracing::info!(
            ticket_id = %ticket_id,
            from_queue_id = %source.id,
            to_queue_id = %target.id,
            priority = transferred.priority,
            reason = %reason,
            "Ticket transferred"
        );
        self.events.publish(TicketEvent::TicketTransferred {
            tenant_id: tenant,
            ticket: transferred.clone(),
            from_queue_id: source.id,
            reason,
        });
        Ok(transferred)
    }

    /// Create a WAITING ticket, estimate its wait and announce it
    pub async fn enqueue(&self, tenant: TenantId, request: NewTicket) -> EngineResult<Ticket> {
        let queue = self.tenant_queue(tenant, request.queue_id).await?;
        if !queue.is_active() {
            return Err(EngineError::Validation(format!(
                "queue {} is {}",
                queue.name, queue.status
            )));
        }

        let now = self.clock.now();
        let number = match request.number {
            Some(number) if number.trim().is_empty() => {
                return Err(EngineError::Validation("ticket number is empty".to_string()));
            }
            Some(number) => number,
            None => {
                let start_of_day = now.replace_time(Time::MIDNIGHT);
                let issued_today = self.store.count_created_since(queue.id, start_of_day).await?;
                display_number(&queue, issued_today + 1)
            }
        };

        let mut ticket = Ticket::new(queue.id, number, now)
            .with_priority(request.priority)
            .with_channel(request.channel);
        if let Some(customer_id) = request.customer_id {
            ticket = ticket.with_customer(customer_id);
        }
        self.store.insert_ticket(&ticket, queue.max_capacity).await?;

        match self.eta.calculate_eta(&ticket).await {
            Ok(eta) => {
                if self.store.set_eta(ticket.id, eta).await? {
                    ticket.eta_seconds = eta;
                }
            }
            Err(e) => {
                tracing::warn!(ticket_id = %ticket.id, error = %e, "Failed to estimate wait for new ticket");
            }
        }

        tracing::info!(
            ticket_id = %ticket.id,
            queue_id = %queue.id,
            number = %ticket.number,
            priority = ticket.priority,
            channel = %ticket.channel,
            eta_seconds = ?ticket.eta_seconds,
            "Ticket created"
        );
        self.events.publish(TicketEvent::TicketCreated {
            tenant_id: tenant,
            ticket: ticket.clone(),
        });
        Ok(ticket)
    }
}
