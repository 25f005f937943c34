//! Ticket state-change events
//!
//! Events are published after the mutation committed. Delivery is
//! fire-and-forget: sinks run on spawned tasks, failures are logged and never
//! reach the caller.

use std::sync::Arc;

use async_trait::async_trait;
use linewise_shared::{AgentId, QueueId, TenantId, Ticket, TicketId, TicketStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// A committed ticket state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    TicketCreated {
        tenant_id: TenantId,
        ticket: Ticket,
    },
    TicketCalled {
        tenant_id: TenantId,
        ticket: Ticket,
        agent_id: AgentId,
    },
    ServiceStarted {
        tenant_id: TenantId,
        ticket: Ticket,
    },
    TicketClosed {
        tenant_id: TenantId,
        ticket: Ticket,
        released_agent: Option<AgentId>,
    },
    TicketNoShow {
        tenant_id: TenantId,
        ticket: Ticket,
        released_agent: Option<AgentId>,
    },
    TicketPaused {
        tenant_id: TenantId,
        ticket: Ticket,
    },
    TicketResumed {
        tenant_id: TenantId,
        ticket: Ticket,
    },
    TicketTransferred {
        tenant_id: TenantId,
        ticket: Ticket,
        from_queue_id: QueueId,
        reason: String,
    },
}

impl TicketEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TicketCreated { .. } => "ticket_created",
            Self::TicketCalled { .. } => "ticket_called",
            Self::ServiceStarted { .. } => "service_started",
            Self::TicketClosed { .. } => "ticket_closed",
            Self::TicketNoShow { .. } => "ticket_no_show",
            Self::TicketPaused { .. } => "ticket_paused",
            Self::TicketResumed { .. } => "ticket_resumed",
            Self::TicketTransferred { .. } => "ticket_transferred",
        }
    }

    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::TicketCreated { ticket, .. }
            | Self::TicketCalled { ticket, .. }
            | Self::ServiceStarted { ticket, .. }
            | Self::TicketClosed { ticket, .. }
            | Self::TicketNoShow { ticket, .. }
            | Self::TicketPaused { ticket, .. }
            | Self::TicketResumed { ticket, .. }
            | Self::TicketTransferred { ticket, .. } => ticket,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            Self::TicketCreated { tenant_id, .. }
            | Self::TicketCalled { tenant_id, .. }
            | Self::ServiceStarted { tenant_id, .. }
            | Self::TicketClosed { tenant_id, .. }
            | Self::TicketNoShow { tenant_id, .. }
            | Self::TicketPaused { tenant_id, .. }
            | Self::TicketResumed { tenant_id, .. }
            | Self::TicketTransferred { tenant_id, .. } => *tenant_id,
        }
    }

    pub fn ticket_id(&self) -> TicketId {
        self.ticket().id
    }

    pub fn status(&self) -> TicketStatus {
        self.ticket().status
    }
}

/// Receives published events
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &TicketEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// In-process fan-out over a tokio broadcast channel
#[derive(Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<TicketEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn deliver(&self, event: &TicketEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // No subscribers is not a failure
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// POSTs each event as JSON to a webhook
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event: &TicketEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let response = self.client.post(&self.url).json(event).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("event webhook returned {}: {}", status, body).into());
        }
        Ok(())
    }
}

/// Publishes events to every registered sink
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Hand the event to every sink on its own task
    pub fn publish(&self, event: TicketEvent) {
        if self.sinks.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                if let Err(e) = sink.deliver(&event).await {
                    tracing::warn!(
                        sink = sink.name(),
                        event_type = event.event_type(),
                        ticket_id = %event.ticket_id(),
                        error = %e,
                        "Failed to deliver ticket event"
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn created_event() -> TicketEvent {
        TicketEvent::TicketCreated {
            tenant_id: TenantId::new(),
            ticket: Ticket::new(QueueId::new(), "A-001", datetime!(2024-03-01 09:00 UTC)),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(created_event()).unwrap();
        assert_eq!(json["type"], "ticket_created");
        assert_eq!(json["ticket"]["number"], "A-001");
        assert_eq!(json["ticket"]["status"], "waiting");
    }

    #[tokio::test]
    async fn test_channel_sink_receives_published_event() {
        let channel = ChannelSink::new(16);
        let mut rx = channel.subscribe();
        let broadcaster = EventBroadcaster::new().with_sink(Arc::new(channel));

        let event = created_event();
        broadcaster.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
        assert_eq!(received.event_type(), "ticket_created");
    }

    #[tokio::test]
    async fn test_publish_without_sinks_is_noop() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.sink_count(), 0);
        broadcaster.publish(created_event());
    }

    #[test]
    fn test_event_timestamps_come_from_ticket() {
        let event = created_event();
        let created: OffsetDateTime = event.ticket().created_at;
        assert_eq!(created, datetime!(2024-03-01 09:00 UTC));
        assert_eq!(event.status(), TicketStatus::Waiting);
    }
}
