//! Next-ticket ordering policies
//!
//! One comparison drives every place the engine needs "who is served first":
//! picking the next ticket, counting tickets ahead for an ETA, and placing a
//! ticket hypothetically in another queue when suggesting transfers.
//!
//! - FIFO: oldest `created_at` first
//! - PRIORITY: highest priority first, then oldest
//! - SLA: late tickets (created at or before `now - sla_seconds`) first, then
//!   highest priority, then oldest
//!
//! Ticket id is the final tie-break so the order is total and matches the
//! `ORDER BY` used by the Postgres store.

use std::cmp::Ordering;

use linewise_shared::{Queue, QueueAlgorithm, Ticket};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub algorithm: QueueAlgorithm,
    /// Tickets created at or before this instant are late (SLA only)
    pub late_cutoff: OffsetDateTime,
}

impl SelectionPolicy {
    pub fn new(algorithm: QueueAlgorithm, late_cutoff: OffsetDateTime) -> Self {
        Self {
            algorithm,
            late_cutoff,
        }
    }

    /// Policy of a queue, optionally overriding its configured algorithm
    pub fn for_queue(queue: &Queue, algorithm: Option<QueueAlgorithm>, now: OffsetDateTime) -> Self {
        Self::new(
            algorithm.unwrap_or(queue.algorithm),
            queue.late_cutoff(now),
        )
    }

    /// `Less` when `a` is served before `b`
    pub fn compare(&self, a: &Ticket, b: &Ticket) -> Ordering {
        let by_created = || a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id));
        match self.algorithm {
            QueueAlgorithm::Fifo => by_created(),
            QueueAlgorithm::Priority => b.priority.cmp(&a.priority).then_with(by_created),
            QueueAlgorithm::Sla => {
                let a_late = a.is_late(self.late_cutoff);
                let b_late = b.is_late(self.late_cutoff);
                b_late
                    .cmp(&a_late)
                    .then_with(|| b.priority.cmp(&a.priority))
                    .then_with(by_created)
            }
        }
    }

    pub fn precedes(&self, a: &Ticket, b: &Ticket) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// First queued ticket under this policy
    pub fn select_next<'a, I>(&self, tickets: I) -> Option<&'a Ticket>
    where
        I: IntoIterator<Item = &'a Ticket>,
    {
        tickets
            .into_iter()
            .filter(|t| t.status.is_queued())
            .min_by(|a, b| self.compare(a, b))
    }

    /// Number of queued tickets served before `ticket`
    pub fn count_ahead<'a, I>(&self, ticket: &Ticket, tickets: I) -> usize
    where
        I: IntoIterator<Item = &'a Ticket>,
    {
        tickets
            .into_iter()
            .filter(|other| other.id != ticket.id && other.status.is_queued())
            .filter(|other| self.precedes(other, ticket))
            .count()
    }

    /// Sort tickets into serving order
    pub fn sort(&self, tickets: &mut [Ticket]) {
        tickets.sort_by(|a, b| self.compare(a, b));
    }
}
