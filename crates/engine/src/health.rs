//! Queue health scoring
//!
//! Score starts at 100:
//! - capacity usage > 90%: -30, > 70%: -15
//! - late tickets: -5 each, at most -40
//! - tickets waiting with no available agent: -50
//!
//! floored at 0. Buckets: critical < 30, warning < 60, else good.

use std::sync::Arc;

use linewise_shared::{Queue, QueueId, TenantId, TicketStatus};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::eta::{EtaEstimator, QueueSnapshot};
use crate::repository::Store;

/// Waiting tickets sampled for the average ETA
const ETA_SAMPLE_SIZE: usize = 10;

/// Alert severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthAlertKind {
    Capacity,
    SlaBreach,
    NoAgents,
    HighWaitTime,
}

impl HealthAlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::SlaBreach => "sla_breach",
            Self::NoAgents => "no_agents",
            Self::HighWaitTime => "high_wait_time",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthAlert {
    pub kind: HealthAlertKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Good,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u8) -> Self {
        if score < 30 {
            Self::Critical
        } else if score < 60 {
            Self::Warning
        } else {
            Self::Good
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthMetrics {
    pub waiting_count: u64,
    pub late_count: u64,
    pub in_service_count: u64,
    pub available_agents: u32,
    /// Waiting tickets as a share of `max_capacity`; `None` when uncapped
    pub capacity_usage_percent: Option<f64>,
    /// Late tickets as a share of waiting tickets
    pub sla_breach_rate: f64,
    /// Mean ETA over the oldest waiting tickets
    pub average_eta_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueHealth {
    pub queue_id: QueueId,
    pub queue_name: String,
    pub health_score: u8,
    pub status: HealthStatus,
    pub alerts: Vec<HealthAlert>,
    pub metrics: HealthMetrics,
}

impl QueueHealth {
    pub fn worst_severity(&self) -> Option<Severity> {
        self.alerts.iter().map(|a| a.severity).max()
    }
}

/// Score and alerts derived from a snapshot
pub fn assess(snapshot: &QueueSnapshot, in_service_count: u64) -> QueueHealth {
    let queue = &snapshot.queue;
    let waiting = snapshot.waiting_count() as u64;
    let late = snapshot.late_count() as u64;
    let available = snapshot.available_agents;

    let capacity_usage = queue
        .max_capacity
        .filter(|max| *max > 0)
        .map(|max| waiting as f64 / max as f64 * 100.0);
    let sla_breach_rate = if waiting == 0 {
        0.0
    } else {
        late as f64 / waiting as f64
    };

    let sample = snapshot.oldest_waiting(ETA_SAMPLE_SIZE);
    let average_eta = if sample.is_empty() {
        None
    } else {
        let total: i64 = sample.iter().map(|t| snapshot.eta_for(t)).sum();
        Some(total as f64 / sample.len() as f64)
    };

    let mut alerts = Vec::new();
    if let Some(max) = queue.max_capacity {
        if waiting as f64 >= 0.9 * max as f64 {
            alerts.push(HealthAlert {
                kind: HealthAlertKind::Capacity,
                severity: Severity::High,
                message: format!("Queue {} is near capacity ({}/{})", queue.name, waiting, max),
            });
        }
    }
    if late > 0 {
        let severity = if sla_breach_rate > 0.5 {
            Severity::High
        } else {
            Severity::Medium
        };
        alerts.push(HealthAlert {
            kind: HealthAlertKind::SlaBreach,
            severity,
            message: format!(
                "{} of {} waiting tickets in {} exceeded the {}s SLA",
                late, waiting, queue.name, queue.sla_seconds
            ),
        });
    }
    if available == 0 && waiting > 0 {
        alerts.push(HealthAlert {
            kind: HealthAlertKind::NoAgents,
            severity: Severity::Critical,
            message: format!("No available agents for {} waiting tickets in {}", waiting, queue.name),
        });
    }
    if let Some(avg) = average_eta {
        if avg > 2.0 * queue.sla_seconds as f64 {
            alerts.push(HealthAlert {
                kind: HealthAlertKind::HighWaitTime,
                severity: Severity::Medium,
                message: format!(
                    "Average estimated wait in {} is {:.0}s, over twice the {}s SLA",
                    queue.name, avg, queue.sla_seconds
                ),
            });
        }
    }

    let mut score: i64 = 100;
    match capacity_usage {
        Some(usage) if usage > 90.0 => score -= 30,
        Some(usage) if usage > 70.0 => score -= 15,
        _ => {}
    }
    score -= (late as i64 * 5).min(40);
    if available == 0 && waiting > 0 {
        score -= 50;
    }
    let health_score = score.clamp(0, 100) as u8;

    QueueHealth {
        queue_id: queue.id,
        queue_name: queue.name.clone(),
        health_score,
        status: HealthStatus::from_score(health_score),
        alerts,
        metrics: HealthMetrics {
            waiting_count: waiting,
            late_count: late,
            in_service_count,
            available_agents: available,
            capacity_usage_percent: capacity_usage,
            sla_breach_rate,
            average_eta_seconds: average_eta,
        },
    }
}

#[derive(Clone)]
pub struct QueueHealthMonitor {
    store: Arc<dyn Store>,
    estimator: EtaEstimator,
}

impl QueueHealthMonitor {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let estimator = EtaEstimator::new(Arc::clone(&store), clock, config);
        Self { store, estimator }
    }

    pub async fn get_queue_health(&self, tenant: TenantId, queue_id: QueueId) -> EngineResult<QueueHealth> {
        let queue = match self.store.get_queue(queue_id).await? {
            Some(queue) if queue.tenant_id == tenant => queue,
            _ => return Err(EngineError::NotFound(format!("queue {}", queue_id))),
        };
        self.health_of(&queue).await
    }

    pub async fn health_of(&self, queue: &Queue) -> EngineResult<QueueHealth> {
        let snapshot = self.estimator.snapshot(queue).await?;
        let in_service = self
            .store
            .count_by_status(queue.id, TicketStatus::InService)
            .await?;
        Ok(assess(&snapshot, in_service))
    }

    /// Health of every ACTIVE queue; all tenants when `tenant` is `None`
    pub async fn check_all(&self, tenant: Option<TenantId>) -> EngineResult<Vec<QueueHealth>> {
        let queues = self.store.active_queues(tenant).await?;
        let mut reports = Vec::with_capacity(queues.len());

        for queue in &queues {
            match self.health_of(queue).await {
                Ok(health) => {
                    if health.status != HealthStatus::Good {
                        tracing::warn!(
                            queue_id = %queue.id,
                            score = health.health_score,
                            status = health.status.as_str(),
                            alerts = health.alerts.len(),
                            "Queue health degraded"
                        );
                    }
                    reports.push(health);
                }
                Err(e) => {
                    tracing::error!(queue_id = %queue.id, error = %e, "Failed to compute queue health");
                }
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::SelectionPolicy;
    use linewise_shared::{Ticket, TicketStatus};
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    fn snapshot(queue: Queue, ages_secs: &[i64], agents: u32) -> QueueSnapshot {
        let policy = SelectionPolicy::for_queue(&queue, None, NOW);
        let mut queued: Vec<Ticket> = ages_secs
            .iter()
            .enumerate()
            .map(|(i, age)| Ticket::new(queue.id, format!("A-{i}"), NOW - Duration::seconds(*age)))
            .collect();
        policy.sort(&mut queued);
        QueueSnapshot {
            avg_service_seconds: queue.sla_seconds as f64,
            queue,
            policy,
            queued,
            available_agents: agents,
            taken_at: NOW,
        }
    }

    #[test]
    fn test_empty_queue_is_healthy() {
        let queue = Queue::new(TenantId::new(), "Support", 600);
        let health = assess(&snapshot(queue.clone(), &[], 0), 0);
        assert_eq!(health.health_score, 100);
        assert_eq!(health.status, HealthStatus::Good);
        assert!(health.alerts.is_empty());
        assert_eq!(health.metrics.average_eta_seconds, None);

        let staffed = assess(&snapshot(queue, &[], 2), 0);
        assert_eq!(staffed.health_score, 100);
    }

    #[test]
    fn test_no_agents_is_critical() {
        let queue = Queue::new(TenantId::new(), "Support", 600);
        let health = assess(&snapshot(queue, &[10, 20], 0), 0);
        assert_eq!(health.health_score, 50);
        assert_eq!(health.worst_severity(), Some(Severity::Critical));
        assert!(health.alerts.iter().any(|a| a.kind == HealthAlertKind::NoAgents));
    }

    #[test]
    fn test_late_penalty_caps_at_forty() {
        let queue = Queue::new(TenantId::new(), "Support", 60);
        let ages: Vec<i64> = (0..12).map(|i| 120 + i).collect();
        let health = assess(&snapshot(queue, &ages, 20), 0);
        assert_eq!(health.metrics.late_count, 12);
        assert_eq!(health.health_score, 60);
        assert_eq!(health.status, HealthStatus::Good);

        let breach = health
            .alerts
            .iter()
            .find(|a| a.kind == HealthAlertKind::SlaBreach)
            .unwrap();
        assert_eq!(breach.severity, Severity::High);
    }

    #[test]
    fn test_sla_breach_medium_when_minority_late() {
        let queue = Queue::new(TenantId::new(), "Support", 600);
        let health = assess(&snapshot(queue, &[700, 10, 20], 3), 0);
        let breach = health
            .alerts
            .iter()
            .find(|a| a.kind == HealthAlertKind::SlaBreach)
            .unwrap();
        assert_eq!(breach.severity, Severity::Medium);
        assert_eq!(health.health_score, 95);
    }

    #[test]
    fn test_capacity_alert_and_penalty() {
        let queue = Queue::new(TenantId::new(), "Support", 6000).with_max_capacity(10);
        let health = assess(&snapshot(queue.clone(), &[1, 2, 3, 4, 5, 6, 7, 8, 9], 9), 0);
        assert!(health.alerts.iter().any(|a| a.kind == HealthAlertKind::Capacity));
        // 90% is not above 90%
        assert_eq!(health.health_score, 85);

        let moderate = assess(&snapshot(queue, &[1, 2, 3, 4, 5, 6, 7, 8], 9), 0);
        assert_eq!(moderate.health_score, 85);
        assert!(moderate.alerts.is_empty());
    }

    #[test]
    fn test_high_wait_time_alert() {
        // avg service 60s, one agent, ten waiting: mean ETA over 0..9 positions = 270s > 2 * 60
        let queue = Queue::new(TenantId::new(), "Support", 60);
        let ages: Vec<i64> = (0..10).map(|i| 50 - i).collect();
        let health = assess(&snapshot(queue, &ages, 1), 0);
        assert_eq!(health.metrics.average_eta_seconds, Some(270.0));
        assert!(health.alerts.iter().any(|a| a.kind == HealthAlertKind::HighWaitTime));
    }

    #[test]
    fn test_status_buckets() {
        assert_eq!(HealthStatus::from_score(29), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(30), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(59), HealthStatus::Warning);
        assert_eq!(HealthStatus::from_score(60), HealthStatus::Good);
        assert_eq!(TicketStatus::InService.as_str(), "in_service");
    }
}
