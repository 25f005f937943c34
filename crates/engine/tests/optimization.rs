//! Integration tests for estimation, health and load balancing
//!
//! Scenarios run end to end through the engine services against the
//! in-memory store with a fixed clock.

mod common;

use common::{Fixture, T0};
use linewise_engine::{
    BalanceStatus, Confidence, HealthAlertKind, HealthStatus, Severity, TicketRepository,
};
use linewise_shared::{AgentStatus, QueueAlgorithm, TenantId, Ticket, TicketStatus};
use time::Duration;

// ============================================================================
// ETA
// ============================================================================

#[tokio::test]
async fn test_eta_scenario_uses_history_and_position() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 600, QueueAlgorithm::Fifo);
    fx.agent("Ana", &[queue]);
    fx.closed(queue, -60, 120);
    fx.waiting(queue, 0, 0);
    fx.waiting(queue, 10, 0);
    let third = fx.waiting(queue, 20, 0);
    fx.advance(30);

    let eta = fx.engine.estimator.calculate_eta(&third).await.unwrap();
    assert_eq!(eta, Some(240));
}

#[tokio::test]
async fn test_eta_is_none_unless_waiting() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 600, QueueAlgorithm::Fifo);
    let waiting = fx.waiting(queue, 0, 0);

    for status in TicketStatus::ALL {
        let mut ticket = waiting.clone();
        ticket.status = status;
        let eta = fx.engine.estimator.calculate_eta(&ticket).await.unwrap();
        assert_eq!(eta.is_some(), status == TicketStatus::Waiting, "{status}");
    }
}

#[tokio::test]
async fn test_eta_falls_back_to_sla_without_history() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 450, QueueAlgorithm::Fifo);
    // no agents at all: clamped to one
    fx.waiting(queue, 0, 0);
    let second = fx.waiting(queue, 5, 0);

    let eta = fx.engine.estimator.calculate_eta(&second).await.unwrap();
    assert_eq!(eta, Some(450));
}

#[tokio::test]
async fn test_eta_counts_transferred_tickets_ahead() {
    let fx = Fixture::new();
    let desk = fx.queue("Desk", 100, QueueAlgorithm::Priority);
    let phone = fx.queue("Phone", 100, QueueAlgorithm::Priority);
    let moved = fx.waiting(phone, 30, 0);
    let local = fx.waiting(desk, 0, 0);

    fx.engine
        .scheduler
        .transfer_ticket(fx.tenant, moved.id, desk, "rebalance")
        .await
        .unwrap();

    // the transferred ticket outranks the local one through its boost
    let eta = fx.engine.estimator.calculate_eta(&local).await.unwrap();
    assert_eq!(eta, Some(100));
}

#[tokio::test]
async fn test_transferred_ticket_carries_no_eta_but_delays_others() {
    let fx = Fixture::new();
    let desk = fx.queue("Desk", 100, QueueAlgorithm::Priority);
    let phone = fx.queue("Phone", 100, QueueAlgorithm::Priority);
    fx.agent("Ana", &[desk]);
    let moved = fx.waiting(phone, 30, 0);
    let local = fx.waiting(desk, 0, 0);

    let moved = fx
        .engine
        .scheduler
        .transfer_ticket(fx.tenant, moved.id, desk, "rebalance")
        .await
        .unwrap();
    assert_eq!(moved.status, TicketStatus::Transferred);
    assert_eq!(fx.engine.estimator.calculate_eta(&moved).await.unwrap(), None);

    let summary = fx.engine.estimator.refresh_all().await.unwrap();
    assert_eq!(summary.failures, 0);

    let stored_moved = fx.store.get_ticket(moved.id).await.unwrap().unwrap();
    assert_eq!(stored_moved.eta_seconds, None);
    let stored_local = fx.store.get_ticket(local.id).await.unwrap().unwrap();
    assert_eq!(stored_local.eta_seconds, Some(100));
}

#[tokio::test]
async fn test_refresh_all_updates_waiting_only() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 60, QueueAlgorithm::Fifo);
    let agent = fx.agent("Ana", &[queue]);
    fx.waiting(queue, 0, 0);
    let second = fx.waiting(queue, 1, 0);
    let third = fx.waiting(queue, 2, 0);

    let summary = fx.engine.estimator.refresh_all().await.unwrap();
    assert_eq!(summary.queues_scanned, 1);
    assert_eq!(summary.failures, 0);
    // every ticket starts without an ETA
    assert_eq!(summary.tickets_updated, 3);

    let stored = fx.store.get_ticket(third.id).await.unwrap().unwrap();
    assert_eq!(stored.eta_seconds, Some(120));

    // idempotent
    let again = fx.engine.estimator.refresh_all().await.unwrap();
    assert_eq!(again.tickets_updated, 0);

    let called = fx.engine.scheduler.call_next(fx.tenant, agent, queue).await.unwrap().unwrap();
    assert_eq!(called.eta_seconds, None);
    let stored = fx.store.get_ticket(second.id).await.unwrap().unwrap();
    assert_eq!(stored.eta_seconds, Some(60));
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_idle_staffed_queue_is_healthy() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 600, QueueAlgorithm::Fifo);
    fx.agent("Ana", &[queue]);

    let health = fx.engine.health.get_queue_health(fx.tenant, queue).await.unwrap();
    assert_eq!(health.health_score, 100);
    assert_eq!(health.status, HealthStatus::Good);
    assert!(health.alerts.is_empty());
}

#[tokio::test]
async fn test_unstaffed_backlog_raises_critical_alert() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 60, QueueAlgorithm::Fifo);
    let agent = fx.agent("Ana", &[queue]);
    fx.store.set_agent_status(agent, AgentStatus::Paused);
    for i in 0..4 {
        fx.waiting(queue, i, 0);
    }
    fx.advance(600);

    let health = fx.engine.health.get_queue_health(fx.tenant, queue).await.unwrap();
    // -20 for four late tickets, -50 for no agents
    assert_eq!(health.health_score, 30);
    assert_eq!(health.status, HealthStatus::Warning);
    assert_eq!(health.worst_severity(), Some(Severity::Critical));
    assert!(health.alerts.iter().any(|a| a.kind == HealthAlertKind::NoAgents));
    assert!(health.alerts.iter().any(|a| a.kind == HealthAlertKind::SlaBreach));
    assert_eq!(health.metrics.late_count, 4);
}

#[tokio::test]
async fn test_check_all_covers_active_queues() {
    let fx = Fixture::new();
    let desk = fx.queue("Desk", 600, QueueAlgorithm::Fifo);
    let phone = fx.queue("Phone", 600, QueueAlgorithm::Fifo);
    fx.store.set_queue_status(phone, linewise_shared::QueueStatus::Closed);

    let reports = fx.engine.health.check_all(None).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].queue_id, desk);

    let other = fx.engine.health.check_all(Some(TenantId::new())).await.unwrap();
    assert!(other.is_empty());
}

// ============================================================================
// Load balancing
// ============================================================================

#[tokio::test]
async fn test_transfer_suggestion_scenario() {
    let fx = Fixture::new();
    let a = fx.queue("A", 600, QueueAlgorithm::Fifo);
    let b = fx.queue("B", 600, QueueAlgorithm::Fifo);
    fx.agent("Ana", &[a]);
    fx.agent("Ben", &[b]);
    fx.agent("Cat", &[b]);
    for i in 0..5 {
        fx.waiting(a, i * 10, 0);
    }
    fx.waiting(b, 0, 0);
    fx.advance(60);

    let balancer = &fx.engine.balancer;
    let analysis = balancer.analyze_load_balance(fx.tenant).await.unwrap();
    assert_eq!(analysis.status, BalanceStatus::NeedsBalancing);

    let suggestions = balancer.suggest_transfers(fx.tenant, 10).await.unwrap();
    assert!(!suggestions.is_empty());
    assert!(suggestions
        .iter()
        .any(|s| s.from_queue_id == a && s.to_queue_id == b && s.estimated_time_saved_minutes > 1.0));
}

#[tokio::test]
async fn test_reallocation_and_report() {
    let fx = Fixture::new();
    let busy = fx.queue("Busy", 600, QueueAlgorithm::Fifo);
    let quiet = fx.queue("Quiet", 600, QueueAlgorithm::Fifo);
    fx.agent("Ana", &[busy]);
    let idle = fx.agent("Ben", &[quiet]);
    for i in 0..8 {
        fx.waiting(busy, i, 0);
    }

    let balancer = &fx.engine.balancer;
    let moves = balancer.suggest_agent_reallocation(fx.tenant).await.unwrap();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].agent_id, idle);
    assert_eq!(moves[0].to_queue_id, busy);
    assert_eq!(moves[0].impact_score, 80.0);

    let report = balancer.get_optimization_report(fx.tenant).await.unwrap();
    assert_eq!(report.tenant_id, fx.tenant);
    assert_eq!(report.load_balance.queues.len(), 2);
    assert_eq!(report.agent_reallocation_suggestions, moves);
    assert_eq!(report.algorithm_recommendations.len(), 2);
    assert_eq!(report.generated_at, T0);
    assert!(report.transfer_suggestions.len() <= 10);
}

#[tokio::test]
async fn test_recommend_algorithm_from_history() {
    let fx = Fixture::new();
    let queue = fx.queue("Desk", 60, QueueAlgorithm::Fifo);

    let sparse = fx
        .engine
        .balancer
        .recommend_algorithm(fx.tenant, queue)
        .await
        .unwrap();
    assert_eq!(sparse.confidence, Confidence::Low);
    assert_eq!(sparse.recommended_algorithm, QueueAlgorithm::Fifo);

    // 20 tickets in the last day, 5 of them waited past the 60s SLA
    for i in 0..20 {
        let created = T0 - Duration::hours(20) + Duration::minutes(i);
        let mut ticket = Ticket::new(queue, format!("H-{i}"), created);
        ticket.status = TicketStatus::Closed;
        let waited = if i < 5 { 300 } else { 30 };
        ticket.called_at = Some(created + Duration::seconds(waited));
        ticket.started_at = ticket.called_at;
        ticket.ended_at = ticket.called_at.map(|c| c + Duration::seconds(90));
        fx.store.put_ticket(ticket);
    }

    let recommendation = fx
        .engine
        .balancer
        .recommend_algorithm(fx.tenant, queue)
        .await
        .unwrap();
    assert_eq!(recommendation.sample_size, 20);
    assert_eq!(recommendation.recommended_algorithm, QueueAlgorithm::Sla);
    assert_eq!(recommendation.confidence, Confidence::Medium);
    assert!(recommendation.changes_algorithm());
}
