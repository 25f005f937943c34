//! Common types used across Linewise

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::LineError;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_wrapper!(
    /// Tenant (organization) ID wrapper
    TenantId
);
id_wrapper!(
    /// Queue ID wrapper
    QueueId
);
id_wrapper!(
    /// Ticket ID wrapper
    TicketId
);
id_wrapper!(
    /// Agent profile ID wrapper
    AgentId
);
id_wrapper!(
    /// Customer ID wrapper
    CustomerId
);
id_wrapper!(
    /// Service ID wrapper
    ServiceId
);

// =============================================================================
// Enums
// =============================================================================

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Called,
    InService,
    Paused,
    Transferred,
    Closed,
    NoShow,
}

impl Default for TicketStatus {
    fn default() -> Self {
        Self::Waiting
    }
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 7] = [
        Self::Waiting,
        Self::Called,
        Self::InService,
        Self::Paused,
        Self::Transferred,
        Self::Closed,
        Self::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Called => "called",
            Self::InService => "in_service",
            Self::Paused => "paused",
            Self::Transferred => "transferred",
            Self::Closed => "closed",
            Self::NoShow => "no_show",
        }
    }

    /// Tickets an agent is currently holding
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Called | Self::InService)
    }

    /// Tickets still waiting to be called in their owning queue.
    /// A transferred ticket waits in its destination queue.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Waiting | Self::Transferred)
    }

    /// CLOSED and NO_SHOW tickets are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::NoShow)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == name)
            .ok_or_else(|| LineError::Validation(format!("Invalid ticket status: {}", s)))
    }
}

/// Next-ticket selection algorithm configured on a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAlgorithm {
    Fifo,
    Priority,
    Sla,
}

impl Default for QueueAlgorithm {
    fn default() -> Self {
        Self::Fifo
    }
}

impl QueueAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Priority => "priority",
            Self::Sla => "sla",
        }
    }
}

impl std::fmt::Display for QueueAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueAlgorithm {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "priority" => Ok(Self::Priority),
            "sla" => Ok(Self::Sla),
            _ => Err(LineError::Validation(format!("Invalid queue algorithm: {}", s))),
        }
    }
}

/// Operational status of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Active,
    Paused,
    Closed,
}

impl Default for QueueStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "closed" => Ok(Self::Closed),
            _ => Err(LineError::Validation(format!("Invalid queue status: {}", s))),
        }
    }
}

/// Agent availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Paused,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Available
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "busy" => Ok(Self::Busy),
            "paused" => Ok(Self::Paused),
            _ => Err(LineError::Validation(format!("Invalid agent status: {}", s))),
        }
    }
}

/// Channel a ticket was issued through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketChannel {
    Web,
    Kiosk,
    Mobile,
    Sms,
    Phone,
    WalkIn,
}

impl Default for TicketChannel {
    fn default() -> Self {
        Self::WalkIn
    }
}

impl TicketChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Kiosk => "kiosk",
            Self::Mobile => "mobile",
            Self::Sms => "sms",
            Self::Phone => "phone",
            Self::WalkIn => "walk_in",
        }
    }
}

impl std::fmt::Display for TicketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketChannel {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "kiosk" => Ok(Self::Kiosk),
            "mobile" => Ok(Self::Mobile),
            "sms" => Ok(Self::Sms),
            "phone" => Ok(Self::Phone),
            "walk_in" | "walkin" => Ok(Self::WalkIn),
            _ => Err(LineError::Validation(format!("Invalid ticket channel: {}", s))),
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A customer's place in a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub queue_id: QueueId,
    pub customer_id: Option<CustomerId>,
    pub agent_id: Option<AgentId>,
    pub number: String,
    pub channel: TicketChannel,
    pub priority: i32,
    pub status: TicketStatus,
    pub eta_seconds: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub called_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
}

impl Ticket {
    /// Create a WAITING ticket in the given queue
    pub fn new(queue_id: QueueId, number: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id: TicketId::new(),
            queue_id,
            customer_id: None,
            agent_id: None,
            number: number.into(),
            channel: TicketChannel::default(),
            priority: 0,
            status: TicketStatus::Waiting,
            eta_seconds: None,
            created_at,
            called_at: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
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

    /// Late tickets were created at or before the SLA cutoff
    pub fn is_late(&self, cutoff: OffsetDateTime) -> bool {
        self.created_at <= cutoff
    }

    /// Seconds spent waiting: until called, or until `now` if never called
    pub fn wait_seconds(&self, now: OffsetDateTime) -> i64 {
        let until = self.called_at.unwrap_or(now);
        (until - self.created_at).whole_seconds().max(0)
    }

    /// Service duration of a finished ticket
    pub fn service_duration(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) if ended >= started => Some(ended - started),
            _ => None,
        }
    }
}

/// A service line customers wait in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub id: QueueId,
    pub tenant_id: TenantId,
    pub name: String,
    pub service_id: ServiceId,
    /// SLA of the queue's service, in seconds
    pub sla_seconds: i64,
    pub algorithm: QueueAlgorithm,
    pub status: QueueStatus,
    pub max_capacity: Option<u32>,
}

impl Queue {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, sla_seconds: i64) -> Self {
        Self {
            id: QueueId::new(),
            tenant_id,
            name: name.into(),
            service_id: ServiceId::new(),
            sla_seconds,
            algorithm: QueueAlgorithm::default(),
            status: QueueStatus::default(),
            max_capacity: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: QueueAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_max_capacity(mut self, max_capacity: u32) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }

    pub fn with_status(mut self, status: QueueStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == QueueStatus::Active
    }

    /// Tickets created at or before this instant are late
    pub fn late_cutoff(&self, now: OffsetDateTime) -> OffsetDateTime {
        now - Duration::seconds(self.sla_seconds)
    }
}

/// An agent serving one or more queues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub status: AgentStatus,
}

impl AgentProfile {
    pub fn new(tenant_id: TenantId, display_name: impl Into<String>) -> Self {
        Self {
            id: AgentId::new(),
            tenant_id,
            display_name: display_name.into(),
            status: AgentStatus::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Available
    }
}

/// Agent-to-queue assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAssignment {
    pub queue_id: QueueId,
    pub agent_id: AgentId,
    pub is_active: bool,
}

/// History record written for every ticket transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketTransfer {
    pub id: Uuid,
    pub ticket_id: TicketId,
    pub from_queue_id: QueueId,
    pub to_queue_id: QueueId,
    pub reason: String,
    pub priority_before: i32,
    pub priority_after: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub transferred_at: OffsetDateTime,
}
