//! Alert notification delivery
//!
//! Posts queue health alerts to an incoming webhook (Slack-compatible payload)

use linewise_engine::{HealthAlert, QueueHealth, Severity};
use serde_json::{json, Value};
use time::OffsetDateTime;

/// Alerts at or above this severity are forwarded
pub const NOTIFY_SEVERITY: Severity = Severity::High;

/// Webhook notifier for queue health alerts
#[derive(Clone)]
pub struct AlertNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl AlertNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Alerts on `health` that should be forwarded
    pub fn notifiable<'a>(health: &'a QueueHealth) -> impl Iterator<Item = &'a HealthAlert> + 'a {
        health
            .alerts
            .iter()
            .filter(|alert| alert.severity >= NOTIFY_SEVERITY)
    }

    /// Send one alert for a queue
    pub async fn send_alert(
        &self,
        health: &QueueHealth,
        alert: &HealthAlert,
        at: OffsetDateTime,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(ref webhook_url) = self.webhook_url else {
            tracing::warn!("Alert webhook URL not configured, skipping notification");
            return Ok(());
        };

        let payload = alert_payload(health, alert, at);
        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                "Failed to send queue alert"
            );
            return Err(format!("Alert webhook returned {}: {}", status, body).into());
        }

        tracing::info!(
            queue_id = %health.queue_id,
            kind = alert.kind.as_str(),
            "Sent queue alert"
        );
        Ok(())
    }
}

fn alert_payload(health: &QueueHealth, alert: &HealthAlert, at: OffsetDateTime) -> Value {
    let emoji = match alert.severity {
        Severity::Critical => ":rotating_light:",
        Severity::High => ":warning:",
        Severity::Medium => ":large_orange_diamond:",
        Severity::Low => ":information_source:",
    };

    let color = match alert.severity {
        Severity::Critical => "#FF0000",
        Severity::High => "#FFA500",
        Severity::Medium => "#FFFF00",
        Severity::Low => "#00BFFF",
    };

    json!({
        "text": format!("{} *Queue Alert: {}*", emoji, health.queue_name),
        "attachments": [{
            "color": color,
            "fields": [
                { "title": "Severity", "value": alert.severity.as_str(), "short": true },
                { "title": "Type", "value": alert.kind.as_str(), "short": true },
                { "title": "Description", "value": alert.message, "short": false },
                { "title": "Health Score", "value": health.health_score.to_string(), "short": true },
                { "title": "Waiting", "value": health.metrics.waiting_count.to_string(), "short": true },
                { "title": "Queue ID", "value": health.queue_id.to_string(), "short": true }
            ],
            "footer": "Linewise Queue Monitoring",
            "ts": at.unix_timestamp()
        }]
    })
}
