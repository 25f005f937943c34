//! Periodic maintenance jobs
//!
//! Each job is one pass over every active queue; the cron schedule in
//! `main` decides how often a pass runs.

use std::sync::Arc;

use linewise_engine::{Clock, Engine, EngineResult, EtaRefreshSummary};

use crate::notifier::AlertNotifier;

/// Outcome of one health pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthCheckSummary {
    pub queues_checked: usize,
    pub unhealthy: usize,
    pub alerts_raised: usize,
    pub alerts_sent: usize,
    pub delivery_failures: usize,
}

/// Recompute the stored ETA of every waiting ticket
///
/// The estimator logs the pass summary itself.
pub async fn eta_refresh(engine: &Engine) -> EngineResult<EtaRefreshSummary> {
    engine.estimator.refresh_all().await
}

/// Score every active queue, log its alerts and forward the severe ones
pub async fn health_check(
    engine: &Engine,
    notifier: &AlertNotifier,
    clock: &Arc<dyn Clock>,
) -> EngineResult<HealthCheckSummary> {
    let reports = engine.health.check_all(None).await?;
    let mut summary = HealthCheckSummary {
        queues_checked: reports.len(),
        ..Default::default()
    };

    for health in &reports {
        if !health.alerts.is_empty() {
            summary.unhealthy += 1;
        }

        for alert in &health.alerts {
            summary.alerts_raised += 1;
            tracing::warn!(
                queue_id = %health.queue_id,
                queue = %health.queue_name,
                score = health.health_score,
                kind = alert.kind.as_str(),
                severity = %alert.severity,
                "{}",
                alert.message
            );
        }

        if !notifier.is_configured() {
            continue;
        }

        for alert in AlertNotifier::notifiable(health) {
            match notifier.send_alert(health, alert, clock.now()).await {
                Ok(()) => summary.alerts_sent += 1,
                Err(e) => {
                    summary.delivery_failures += 1;
                    tracing::error!(
                        queue_id = %health.queue_id,
                        error = %e,
                        "Failed to deliver queue alert"
                    );
                }
            }
        }
    }

    tracing::info!(
        queues = summary.queues_checked,
        unhealthy = summary.unhealthy,
        alerts = summary.alerts_raised,
        sent = summary.alerts_sent,
        "Health check complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use linewise_engine::{EngineConfig, FixedClock, MemoryStore};
    use linewise_shared::{AgentProfile, Queue, Ticket};
    use time::macros::datetime;
    use time::Duration;

    fn setup() -> (Arc<MemoryStore>, Arc<dyn Clock>, Engine) {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(datetime!(2024-03-01 09:00 UTC)));
        let engine = Engine::new(store.clone(), clock.clone(), EngineConfig::default());
        (store, clock, engine)
    }

    #[tokio::test]
    async fn test_eta_refresh_pass() {
        let (store, clock, engine) = setup();
        let tenant = linewise_shared::TenantId::new();
        let queue = store.add_queue(Queue::new(tenant, "Desk", 120));
        let agent = store.add_agent(AgentProfile::new(tenant, "Ana"));
        store.assign(queue, agent);
        for i in 0..3 {
            store.put_ticket(Ticket::new(queue, format!("D-{i}"), clock.now() + Duration::seconds(i)));
        }

        let summary = eta_refresh(&engine).await.unwrap();
        assert_eq!(summary.queues_scanned, 1);
        assert_eq!(summary.tickets_updated, 3);
    }

    #[tokio::test]
    async fn test_health_check_counts_alerts_without_webhook() {
        let (store, clock, engine) = setup();
        let tenant = linewise_shared::TenantId::new();
        let staffed = store.add_queue(Queue::new(tenant, "Staffed", 600));
        let agent = store.add_agent(AgentProfile::new(tenant, "Ana"));
        store.assign(staffed, agent);
        let empty = store.add_queue(Queue::new(tenant, "Unstaffed", 600));
        store.put_ticket(Ticket::new(empty, "U-001", clock.now()));

        let notifier = AlertNotifier::new(None);
        let summary = health_check(&engine, &notifier, &clock).await.unwrap();
        assert_eq!(summary.queues_checked, 2);
        assert_eq!(summary.unhealthy, 1);
        assert!(summary.alerts_raised >= 1);
        assert_eq!(summary.alerts_sent, 0);
        assert_eq!(summary.delivery_failures, 0);
    }
}
