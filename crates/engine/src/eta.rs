//! Wait-time estimation
//!
//! `eta = round(tickets_ahead / max(available_agents, 1) * avg_service_seconds)`
//!
//! The average service time comes from the most recent closed tickets of the
//! queue and falls back to the queue's SLA when there is no history, the
//! aggregate query fails, or it does not finish within the configured timeout.
//! Estimates are advisory and never feed back into ordering.

use std::sync::Arc;

use linewise_shared::{Queue, QueueId, Ticket, TicketStatus};
use serde::Serialize;
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ordering::SelectionPolicy;
use crate::repository::Store;
use crate::state::TRANSFER_PRIORITY_BOOST;

/// Pure estimator formula
pub fn estimate_seconds(tickets_ahead: u64, available_agents: u32, avg_service_seconds: f64) -> i64 {
    let agents = available_agents.max(1) as f64;
    ((tickets_ahead as f64 / agents) * avg_service_seconds).round() as i64
}

/// Per-queue aggregates computed once per pass
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub queue: Queue,
    pub policy: SelectionPolicy,
    /// Queued tickets in serving order
    pub queued: Vec<Ticket>,
    pub available_agents: u32,
    pub avg_service_seconds: f64,
    pub taken_at: OffsetDateTime,
}

impl QueueSnapshot {
    pub fn queue_id(&self) -> QueueId {
        self.queue.id
    }

    pub fn waiting_count(&self) -> usize {
        self.queued.len()
    }

    pub fn late_count(&self) -> usize {
        self.queued
            .iter()
            .filter(|t| t.is_late(self.policy.late_cutoff))
            .count()
    }

    /// Waiting tickets per available agent; an unstaffed queue counts ten times heavier
    pub fn load_ratio(&self) -> f64 {
        let waiting = self.waiting_count() as f64;
        if self.available_agents == 0 {
            waiting * 10.0
        } else {
            waiting / self.available_agents as f64
        }
    }

    /// ETA of a ticket already queued here
    pub fn eta_for(&self, ticket: &Ticket) -> i64 {
        let ahead = self.policy.count_ahead(ticket, &self.queued) as u64;
        estimate_seconds(ahead, self.available_agents, self.avg_service_seconds)
    }

    /// ETA the ticket would get if it were transferred into this queue
    pub fn eta_if_transferred(&self, ticket: &Ticket) -> i64 {
        let mut moved = ticket.clone();
        moved.queue_id = self.queue.id;
        moved.priority = moved.priority.saturating_add(TRANSFER_PRIORITY_BOOST);
        moved.status = TicketStatus::Transferred;
        self.eta_for(&moved)
    }

    /// WAITING tickets, oldest first
    pub fn oldest_waiting(&self, limit: usize) -> Vec<&Ticket> {
        let mut waiting: Vec<&Ticket> = self
            .queued
            .iter()
            .filter(|t| t.status == TicketStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        waiting.truncate(limit);
        waiting
    }
}

/// Summary of one batch refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EtaRefreshSummary {
    pub queues_scanned: usize,
    pub tickets_updated: usize,
    pub failures: usize,
}

/// Estimates wait times for waiting tickets
#[derive(Clone)]
pub struct EtaEstimator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl EtaEstimator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Estimated wait for a ticket; `None` unless it is WAITING
    pub async fn calculate_eta(&self, ticket: &Ticket) -> EngineResult<Option<i64>> {
        if ticket.status != TicketStatus::Waiting {
            return Ok(None);
        }

        let queue = self
            .store
            .get_queue(ticket.queue_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("queue {}", ticket.queue_id)))?;

        let now = self.clock.now();
        let policy = SelectionPolicy::for_queue(&queue, None, now);
        let avg_service = self.average_service_seconds(&queue).await;
        let ahead = self.store.count_queued_ahead(ticket, &policy).await?;
        let agents = self.store.available_agent_count(queue.id).await?;

        Ok(Some(estimate_seconds(ahead, agents, avg_service)))
    }

    /// Historical mean service time, or the SLA when unavailable
    pub async fn average_service_seconds(&self, queue: &Queue) -> f64 {
        let fallback = queue.sla_seconds as f64;
        let query = self
            .store
            .average_service_seconds(queue.id, self.config.history_window);

        match tokio::time::timeout(self.config.aggregate_timeout, query).await {
            Ok(Ok(Some(avg))) => avg,
            Ok(Ok(None)) => fallback,
            Ok(Err(e)) => {
                tracing::warn!(
                    queue_id = %queue.id,
                    error = %e,
                    "Service time aggregate failed, falling back to SLA"
                );
                fallback
            }
            Err(_) => {
                tracing::warn!(
                    queue_id = %queue.id,
                    timeout_ms = self.config.aggregate_timeout.as_millis() as u64,
                    "Service time aggregate timed out, falling back to SLA"
                );
                fallback
            }
        }
    }

    /// Load queued tickets, staffing and service time of a queue
    pub async fn snapshot(&self, queue: &Queue) -> EngineResult<QueueSnapshot> {
        let now = self.clock.now();
        let policy = SelectionPolicy::for_queue(queue, None, now);

        let mut queued = self.store.queued_tickets(queue.id).await?;
        policy.sort(&mut queued);
        let available_agents = self.store.available_agent_count(queue.id).await?;
        let avg_service_seconds = self.average_service_seconds(queue).await;

        Ok(QueueSnapshot {
            queue: queue.clone(),
            policy,
            queued,
            available_agents,
            avg_service_seconds,
            taken_at: now,
        })
    }

    /// Recompute and store the ETA of every WAITING ticket of one queue
    pub async fn refresh_queue(&self, queue: &Queue) -> EngineResult<usize> {
        let snapshot = self.snapshot(queue).await?;
        let mut updated = 0;

        for ticket in snapshot
            .queued
            .iter()
            .filter(|t| t.status == TicketStatus::Waiting)
        {
            let eta = snapshot.eta_for(ticket);
            if ticket.eta_seconds == Some(eta) {
                continue;
            }
            if self.store.set_eta(ticket.id, Some(eta)).await? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Batch pass over every ACTIVE queue
    pub async fn refresh_all(&self) -> EngineResult<EtaRefreshSummary> {
        let queues = self.store.active_queues(None).await?;
        let mut summary = EtaRefreshSummary::default();

        for queue in &queues {
            summary.queues_scanned += 1;
            match self.refresh_queue(queue).await {
                Ok(updated) => summary.tickets_updated += updated,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(
                        queue_id = %queue.id,
                        error = %e,
                        "Failed to refresh ETAs for queue"
                    );
                }
            }
        }

        tracing::info!(
            queues = summary.queues_scanned,
            updated = summary.tickets_updated,
            failures = summary.failures,
            "ETA refresh complete"
        );
        Ok(summary)
    }
}
