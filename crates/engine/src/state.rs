//! Ticket state machine
//!
//! ```text
//! WAITING ──call──▶ CALLED ──start──▶ IN_SERVICE ◀──resume── PAUSED
//!    │    ▲            │  │               │  │                  ▲
//!    │    └─call───┐   │  └──close───┐    │  └──────pause───────┘
//!    │ transfer    │   no_show       ▼    └──close──▶ CLOSED
//!    ▼             │   ▼            CLOSED
//! TRANSFERRED ─────┘  NO_SHOW
//! ```
//!
//! Transitions are pure: stores load and lock the ticket row, call
//! [`Transition::apply`], and persist the result only if it succeeded.

use linewise_shared::{AgentId, QueueId, Ticket, TicketStatus};
use time::OffsetDateTime;

use crate::error::{ConflictKind, EngineError, EngineResult};

/// Priority added to a ticket every time it is transferred
pub const TRANSFER_PRIORITY_BOOST: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Call { agent_id: AgentId },
    StartService,
    Close,
    NoShow,
    Pause,
    Resume,
    Transfer { target_queue: QueueId, reason: String },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::StartService => "start_service",
            Self::Close => "close",
            Self::NoShow => "no_show",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Transfer { .. } => "transfer",
        }
    }

    /// Statuses this transition may start from
    pub fn allowed_from(&self) -> &'static [TicketStatus] {
        match self {
            Self::Call { .. } | Self::Transfer { .. } => {
                &[TicketStatus::Waiting, TicketStatus::Transferred]
            }
            Self::StartService | Self::NoShow => &[TicketStatus::Called],
            Self::Close => &[TicketStatus::InService, TicketStatus::Called],
            Self::Pause => &[TicketStatus::InService],
            Self::Resume => &[TicketStatus::Paused],
        }
    }

    pub fn target_status(&self) -> TicketStatus {
        match self {
            Self::Call { .. } => TicketStatus::Called,
            Self::StartService | Self::Resume => TicketStatus::InService,
            Self::Close => TicketStatus::Closed,
            Self::NoShow => TicketStatus::NoShow,
            Self::Pause => TicketStatus::Paused,
            Self::Transfer { .. } => TicketStatus::Transferred,
        }
    }

    /// Whether the serving agent becomes AVAILABLE afterwards
    pub fn releases_agent(&self) -> bool {
        matches!(self, Self::Close | Self::NoShow)
    }

    /// Agent to make AVAILABLE after this transition. An explicit `requested`
    /// agent must be the one serving the ticket.
    pub fn agent_to_release(
        &self,
        ticket: &Ticket,
        requested: Option<AgentId>,
    ) -> EngineResult<Option<AgentId>> {
        if !self.releases_agent() {
            return Ok(None);
        }
        match (requested, ticket.agent_id) {
            (Some(requested), Some(holder)) if requested != holder => {
                Err(EngineError::Validation(format!(
                    "agent {} is not serving ticket {}",
                    requested, ticket.number
                )))
            }
            (requested, holder) => Ok(holder.or(requested)),
        }
    }

    /// Whether the ticket ends up holding its agent, so the one active
    /// ticket per agent rule has to be checked again
    pub fn occupies_agent(&self) -> bool {
        self.target_status().is_active()
    }

    /// Apply the transition to `ticket` in place.
    ///
    /// On error the ticket is left untouched.
    pub fn apply(&self, ticket: &mut Ticket, now: OffsetDateTime) -> EngineResult<()> {
        if !self.allowed_from().contains(&ticket.status) {
            return Err(EngineError::Validation(format!(
                "cannot {} ticket {} in status {}",
                self.name(),
                ticket.number,
                ticket.status
            )));
        }

        match self {
            Self::Call { agent_id } => {
                ticket.called_at = Some(later_of(now, ticket.created_at));
                ticket.agent_id = Some(*agent_id);
                ticket.eta_seconds = None;
            }
            Self::StartService => {
                ticket.started_at = Some(later_of(now, ticket.called_at.unwrap_or(now)));
            }
            Self::Close | Self::NoShow => {
                let floor = ticket.started_at.or(ticket.called_at).unwrap_or(now);
                ticket.ended_at = Some(later_of(now, floor));
            }
            Self::Pause | Self::Resume => {}
            Self::Transfer { target_queue, .. } => {
                if *target_queue == ticket.queue_id {
                    return Err(EngineError::Conflict(ConflictKind::SameQueueTransfer));
                }
                ticket.queue_id = *target_queue;
                ticket.priority = ticket.priority.saturating_add(TRANSFER_PRIORITY_BOOST);
                ticket.agent_id = None;
                ticket.eta_seconds = None;
            }
        }

        ticket.status = self.target_status();
        Ok(())
    }
}

/// Keep lifecycle timestamps monotonic when clocks disagree slightly
fn later_of(now: OffsetDateTime, floor: OffsetDateTime) -> OffsetDateTime {
    if now < floor {
        floor
    } else {
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    const T0: OffsetDateTime = datetime!(2024-03-01 09:00 UTC);

    fn waiting() -> Ticket {
        Ticket::new(QueueId::new(), "A-001", T0)
    }

    #[test]
    fn test_full_lifecycle_sets_each_timestamp_once() {
        let agent = AgentId::new();
        let mut ticket = waiting();
        ticket.eta_seconds = Some(120);

        Transition::Call { agent_id: agent }
            .apply(&mut ticket, T0 + Duration::seconds(60))
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Called);
        assert_eq!(ticket.agent_id, Some(agent));
        assert_eq!(ticket.eta_seconds, None);

        Transition::StartService
            .apply(&mut ticket, T0 + Duration::seconds(90))
            .unwrap();
        Transition::Pause.apply(&mut ticket, T0 + Duration::seconds(100)).unwrap();
        assert_eq!(ticket.status, TicketStatus::Paused);
        Transition::Resume.apply(&mut ticket, T0 + Duration::seconds(110)).unwrap();
        Transition::Close.apply(&mut ticket, T0 + Duration::seconds(200)).unwrap();

        assert_eq!(ticket.status, TicketStatus::Closed);
        assert_eq!(ticket.called_at, Some(T0 + Duration::seconds(60)));
        assert_eq!(ticket.started_at, Some(T0 + Duration::seconds(90)));
        assert_eq!(ticket.ended_at, Some(T0 + Duration::seconds(200)));
    }

    #[test]
    fn test_illegal_transition_leaves_ticket_untouched() {
        let mut ticket = waiting();
        let before = ticket.clone();

        let err = Transition::StartService.apply(&mut ticket, T0).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(ticket, before);

        let err = Transition::Close.apply(&mut ticket, T0).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(ticket, before);
    }

    #[test]
    fn test_terminal_tickets_are_immutable() {
        let mut ticket = waiting();
        Transition::Call { agent_id: AgentId::new() }.apply(&mut ticket, T0).unwrap();
        Transition::NoShow.apply(&mut ticket, T0).unwrap();
        assert_eq!(ticket.status, TicketStatus::NoShow);

        let all = [
            Transition::Call { agent_id: AgentId::new() },
            Transition::StartService,
            Transition::Close,
            Transition::NoShow,
            Transition::Pause,
            Transition::Resume,
            Transition::Transfer { target_queue: QueueId::new(), reason: String::new() },
        ];
        for transition in all {
            assert!(transition.apply(&mut ticket, T0).is_err(), "{}", transition.name());
        }
    }

    #[test]
    fn test_close_allowed_straight_from_called() {
        let mut ticket = waiting();
        Transition::Call { agent_id: AgentId::new() }.apply(&mut ticket, T0).unwrap();
        Transition::Close.apply(&mut ticket, T0 + Duration::seconds(5)).unwrap();
        assert_eq!(ticket.status, TicketStatus::Closed);
        assert!(ticket.started_at.is_none());
    }

    #[test]
    fn test_paused_ticket_cannot_be_closed() {
        let mut ticket = waiting();
        Transition::Call { agent_id: AgentId::new() }.apply(&mut ticket, T0).unwrap();
        Transition::StartService.apply(&mut ticket, T0).unwrap();
        Transition::Pause.apply(&mut ticket, T0).unwrap();
        assert!(matches!(
            Transition::Close.apply(&mut ticket, T0),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_transfer_moves_queue_and_boosts_priority() {
        let mut ticket = waiting().with_priority(2);
        ticket.eta_seconds = Some(300);
        let target = QueueId::new();

        Transition::Transfer { target_queue: target, reason: "rebalance".into() }
            .apply(&mut ticket, T0)
            .unwrap();
        assert_eq!(ticket.status, TicketStatus::Transferred);
        assert_eq!(ticket.queue_id, target);
        assert_eq!(ticket.priority, 2 + TRANSFER_PRIORITY_BOOST);
        assert_eq!(ticket.agent_id, None);
        assert_eq!(ticket.eta_seconds, None);

        // a transferred ticket can be called in its new queue
        Transition::Call { agent_id: AgentId::new() }.apply(&mut ticket, T0).unwrap();
        assert_eq!(ticket.status, TicketStatus::Called);
    }

    #[test]
    fn test_transfer_to_same_queue_conflicts() {
        let mut ticket = waiting();
        let before = ticket.clone();
        let err = Transition::Transfer { target_queue: ticket.queue_id, reason: String::new() }
            .apply(&mut ticket, T0)
            .unwrap_err();
        assert!(err.is_conflict(ConflictKind::SameQueueTransfer));
        assert_eq!(ticket, before);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let mut ticket = waiting();
        Transition::Call { agent_id: AgentId::new() }
            .apply(&mut ticket, T0 + Duration::seconds(30))
            .unwrap();
        // clock skew: start reported before the call
        Transition::StartService.apply(&mut ticket, T0).unwrap();
        assert_eq!(ticket.started_at, ticket.called_at);
    }

    #[test]
    fn test_release_must_name_the_serving_agent() {
        let serving = AgentId::new();
        let mut ticket = waiting();
        Transition::Call { agent_id: serving }.apply(&mut ticket, T0).unwrap();

        assert_eq!(Transition::Close.agent_to_release(&ticket, None).unwrap(), Some(serving));
        assert_eq!(
            Transition::NoShow.agent_to_release(&ticket, Some(serving)).unwrap(),
            Some(serving)
        );
        assert!(matches!(
            Transition::Close.agent_to_release(&ticket, Some(AgentId::new())),
            Err(EngineError::Validation(_))
        ));
        // non-releasing transitions ignore the argument
        assert_eq!(
            Transition::StartService.agent_to_release(&ticket, Some(AgentId::new())).unwrap(),
            None
        );
    }

    #[test]
    fn test_only_call_start_and_resume_occupy_the_agent() {
        let occupying: Vec<&str> = [
            Transition::Call { agent_id: AgentId::new() },
            Transition::StartService,
            Transition::Close,
            Transition::NoShow,
            Transition::Pause,
            Transition::Resume,
            Transition::Transfer { target_queue: QueueId::new(), reason: String::new() },
        ]
        .iter()
        .filter(|t| t.occupies_agent())
        .map(|t| t.name())
        .collect();
        assert_eq!(occupying, vec!["call", "start_service", "resume"]);
    }
}
