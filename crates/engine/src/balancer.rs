//! Cross-queue load balancing and optimization
//!
//! Every pass loads one [`QueueSnapshot`] per ACTIVE queue of the tenant and
//! evaluates all suggestions against those snapshots, so a pass issues a
//! fixed number of aggregate queries regardless of how many tickets it scans.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use linewise_shared::{
    AgentId, AgentProfile, Queue, QueueAlgorithm, QueueId, TenantId, TicketId,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::eta::{EtaEstimator, QueueSnapshot};
use crate::repository::Store;

/// Above this load ratio a queue is overloaded
const OVERLOADED_RATIO: f64 = 3.0;
/// Below this load ratio (with staff) a queue can absorb transfers
const UNDERLOADED_RATIO: f64 = 1.5;
/// Oldest waiting tickets considered per overloaded queue
const TRANSFER_CANDIDATES_PER_QUEUE: usize = 5;
/// Minimum wait reduction worth a transfer
const MIN_TIME_SAVED_SECONDS: i64 = 60;
/// A needy queue also has more than this many tickets waiting
const NEEDY_MIN_WAITING: usize = 5;
/// A spare queue has fewer than this many tickets waiting
const SPARE_MAX_WAITING: usize = 2;
/// Days of history used for algorithm recommendations
const RECOMMENDATION_WINDOW_DAYS: i64 = 7;
const MIN_RECOMMENDATION_SAMPLE: u64 = 10;
const HIGH_CONFIDENCE_SAMPLE: u64 = 100;
const SLA_BREACH_RATE_THRESHOLD: f64 = 0.2;
const HIGH_PRIORITY_RATE_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    Optimal,
    NeedsBalancing,
    Critical,
}

impl BalanceStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Optimal
        } else if score >= 50.0 {
            Self::NeedsBalancing
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueLoad {
    pub queue_id: QueueId,
    pub queue_name: String,
    pub waiting_count: usize,
    pub available_agents: u32,
    pub load_ratio: f64,
}

impl QueueLoad {
    fn from_snapshot(snapshot: &QueueSnapshot) -> Self {
        Self {
            queue_id: snapshot.queue.id,
            queue_name: snapshot.queue.name.clone(),
            waiting_count: snapshot.waiting_count(),
            available_agents: snapshot.available_agents,
            load_ratio: snapshot.load_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadBalanceAnalysis {
    pub queues: Vec<QueueLoad>,
    pub total_waiting: usize,
    pub total_available_agents: u32,
    pub balance_score: f64,
    pub status: BalanceStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Low,
    Medium,
    High,
}

impl SuggestionPriority {
    pub fn from_time_saved(seconds: i64) -> Self {
        if seconds > 300 {
            Self::High
        } else if seconds > 120 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSuggestion {
    pub ticket_id: TicketId,
    pub ticket_number: String,
    pub from_queue_id: QueueId,
    pub from_queue_name: String,
    pub to_queue_id: QueueId,
    pub to_queue_name: String,
    pub current_eta_seconds: i64,
    pub estimated_eta_seconds: i64,
    pub estimated_time_saved_seconds: i64,
    pub estimated_time_saved_minutes: f64,
    pub priority: SuggestionPriority,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentReallocationSuggestion {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub from_queue_id: QueueId,
    pub from_queue_name: String,
    pub to_queue_id: QueueId,
    pub to_queue_name: String,
    pub to_queue_load_ratio: f64,
    pub impact_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmRecommendation {
    pub queue_id: QueueId,
    pub queue_name: String,
    pub current_algorithm: QueueAlgorithm,
    pub recommended_algorithm: QueueAlgorithm,
    pub confidence: Confidence,
    pub reason: String,
    pub sample_size: u64,
    pub sla_breach_rate: f64,
    pub high_priority_rate: f64,
}

impl AlgorithmRecommendation {
    pub fn changes_algorithm(&self) -> bool {
        self.current_algorithm != self.recommended_algorithm
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationReport {
    pub tenant_id: TenantId,
    pub load_balance: LoadBalanceAnalysis,
    pub transfer_suggestions: Vec<TransferSuggestion>,
    pub agent_reallocation_suggestions: Vec<AgentReallocationSuggestion>,
    pub algorithm_recommendations: Vec<AlgorithmRecommendation>,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

/// Load ratios and balance score across queues
pub fn analyze(snapshots: &[QueueSnapshot]) -> LoadBalanceAnalysis {
    let queues: Vec<QueueLoad> = snapshots.iter().map(QueueLoad::from_snapshot).collect();
    let total_waiting: usize = queues.iter().map(|q| q.waiting_count).sum();
    let total_available_agents: u32 = queues.iter().map(|q| q.available_agents).sum();

    let balance_score = if total_waiting == 0 {
        100.0
    } else {
        let max = queues.iter().map(|q| q.load_ratio).fold(f64::MIN, f64::max);
        let min = queues.iter().map(|q| q.load_ratio).fold(f64::MAX, f64::min);
        (100.0 - (max - min) * 10.0).max(0.0)
    };

    LoadBalanceAnalysis {
        queues,
        total_waiting,
        total_available_agents,
        balance_score,
        status: BalanceStatus::from_score(balance_score),
    }
}

/// Greedy transfer matching from overloaded to underloaded queues
pub fn plan_transfers(snapshots: &[QueueSnapshot], max_suggestions: usize) -> Vec<TransferSuggestion> {
    let mut suggestions = Vec::new();
    if max_suggestions == 0 {
        return suggestions;
    }

    let overloaded: Vec<&QueueSnapshot> = snapshots
        .iter()
        .filter(|s| s.load_ratio() > OVERLOADED_RATIO)
        .collect();
    let underloaded: Vec<&QueueSnapshot> = snapshots
        .iter()
        .filter(|s| s.load_ratio() < UNDERLOADED_RATIO && s.available_agents > 0)
        .collect();
    if overloaded.is_empty() || underloaded.is_empty() {
        return suggestions;
    }

    for source in overloaded {
        for ticket in source.oldest_waiting(TRANSFER_CANDIDATES_PER_QUEUE) {
            let current_eta = source.eta_for(ticket);

            let best = underloaded.iter().find_map(|target| {
                let target_eta = target.eta_if_transferred(ticket);
                let saved = (current_eta - target_eta).max(0);
                (saved > MIN_TIME_SAVED_SECONDS).then_some((target, target_eta, saved))
            });

            if let Some((target, target_eta, saved)) = best {
                suggestions.push(TransferSuggestion {
                    ticket_id: ticket.id,
                    ticket_number: ticket.number.clone(),
                    from_queue_id: source.queue.id,
                    from_queue_name: source.queue.name.clone(),
                    to_queue_id: target.queue.id,
                    to_queue_name: target.queue.name.clone(),
                    current_eta_seconds: current_eta,
                    estimated_eta_seconds: target_eta,
                    estimated_time_saved_seconds: saved,
                    estimated_time_saved_minutes: saved as f64 / 60.0,
                    priority: SuggestionPriority::from_time_saved(saved),
                });
                if suggestions.len() >= max_suggestions {
                    return suggestions;
                }
            }
        }
    }
    suggestions
}

/// Pair queues needing help with queues that have idle agents
pub fn plan_reallocations(
    snapshots: &[QueueSnapshot],
    agents: &HashMap<QueueId, Vec<AgentProfile>>,
) -> Vec<AgentReallocationSuggestion> {
    let needy: Vec<&QueueSnapshot> = snapshots
        .iter()
        .filter(|s| s.load_ratio() > OVERLOADED_RATIO && s.waiting_count() > NEEDY_MIN_WAITING)
        .collect();
    let spare: Vec<&QueueSnapshot> = snapshots
        .iter()
        .filter(|s| s.available_agents > 0 && s.waiting_count() < SPARE_MAX_WAITING)
        .collect();

    let no_agents = Vec::new();
    let mut suggested: HashSet<AgentId> = HashSet::new();
    let mut suggestions = Vec::new();

    for needy_queue in &needy {
        let serving_needy: HashSet<AgentId> = agents
            .get(&needy_queue.queue.id)
            .unwrap_or(&no_agents)
            .iter()
            .map(|a| a.id)
            .collect();
        let ratio = needy_queue.load_ratio();

        for spare_queue in &spare {
            if spare_queue.queue.id == needy_queue.queue.id {
                continue;
            }
            let candidate = agents
                .get(&spare_queue.queue.id)
                .unwrap_or(&no_agents)
                .iter()
                .find(|a| {
                    a.is_available() && !serving_needy.contains(&a.id) && !suggested.contains(&a.id)
                });

            if let Some(agent) = candidate {
                suggested.insert(agent.id);
                suggestions.push(AgentReallocationSuggestion {
                    agent_id: agent.id,
                    agent_name: agent.display_name.clone(),
                    from_queue_id: spare_queue.queue.id,
                    from_queue_name: spare_queue.queue.name.clone(),
                    to_queue_id: needy_queue.queue.id,
                    to_queue_name: needy_queue.queue.name.clone(),
                    to_queue_load_ratio: ratio,
                    impact_score: (ratio * 10.0).min(100.0),
                });
            }
        }
    }
    suggestions
}

/// Pick an ordering policy from recent ticket history
pub fn recommend(
    queue: &Queue,
    total: u64,
    sla_breached: u64,
    high_priority: u64,
) -> AlgorithmRecommendation {
    let rate = |count: u64| if total == 0 { 0.0 } else { count as f64 / total as f64 };
    let sla_breach_rate = rate(sla_breached);
    let high_priority_rate = rate(high_priority);

    let (recommended, confidence, reason) = if total < MIN_RECOMMENDATION_SAMPLE {
        (
            queue.algorithm,
            Confidence::Low,
            format!("Only {} tickets in the last {} days; keeping current algorithm", total, RECOMMENDATION_WINDOW_DAYS),
        )
    } else {
        let confidence = if total < HIGH_CONFIDENCE_SAMPLE {
            Confidence::Medium
        } else {
            Confidence::High
        };
        if sla_breach_rate > SLA_BREACH_RATE_THRESHOLD {
            (
                QueueAlgorithm::Sla,
                confidence,
                format!("{:.0}% of tickets breached the SLA", sla_breach_rate * 100.0),
            )
        } else if high_priority_rate > HIGH_PRIORITY_RATE_THRESHOLD {
            (
                QueueAlgorithm::Priority,
                confidence,
                format!("{:.0}% of tickets are high priority", high_priority_rate * 100.0),
            )
        } else {
            (
                QueueAlgorithm::Fifo,
                confidence,
                "SLA breaches and high-priority volume are low".to_string(),
            )
        }
    };

    AlgorithmRecommendation {
        queue_id: queue.id,
        queue_name: queue.name.clone(),
        current_algorithm: queue.algorithm,
        recommended_algorithm: recommended,
        confidence,
        reason,
        sample_size: total,
        sla_breach_rate,
        high_priority_rate,
    }
}

#[derive(Clone)]
pub struct LoadBalancer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    estimator: EtaEstimator,
    config: EngineConfig,
}

impl LoadBalancer {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let estimator = EtaEstimator::new(Arc::clone(&store), Arc::clone(&clock), config.clone());
        Self {
            store,
            clock,
            estimator,
            config,
        }
    }

    async fn snapshots(&self, tenant: TenantId) -> EngineResult<Vec<QueueSnapshot>> {
        let queues = self.store.active_queues(Some(tenant)).await?;
        let mut snapshots = Vec::with_capacity(queues.len());
        for queue in &queues {
            snapshots.push(self.estimator.snapshot(queue).await?);
        }
        Ok(snapshots)
    }

    async fn agents_by_queue(
        &self,
        snapshots: &[QueueSnapshot],
    ) -> EngineResult<HashMap<QueueId, Vec<AgentProfile>>> {
        let mut agents = HashMap::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let queue_id = snapshot.queue_id();
            agents.insert(queue_id, self.store.queue_agents(queue_id).await?);
        }
        Ok(agents)
    }

    async fn recommend_for(&self, queue: &Queue) -> EngineResult<AlgorithmRecommendation> {
        let now = self.clock.now();
        let since = now - Duration::days(RECOMMENDATION_WINDOW_DAYS);
        let stats = self
            .store
            .window_stats(
                queue.id,
                since,
                queue.sla_seconds,
                self.config.high_priority_threshold,
                now,
            )
            .await?;
        Ok(recommend(queue, stats.total, stats.sla_breached, stats.high_priority))
    }

    pub async fn analyze_load_balance(&self, tenant: TenantId) -> EngineResult<LoadBalanceAnalysis> {
        let snapshots = self.snapshots(tenant).await?;
        Ok(analyze(&snapshots))
    }

    pub async fn suggest_transfers(
        &self,
        tenant: TenantId,
        max_suggestions: usize,
    ) -> EngineResult<Vec<TransferSuggestion>> {
        let snapshots = self.snapshots(tenant).await?;
        Ok(plan_transfers(&snapshots, max_suggestions))
    }

    pub async fn suggest_agent_reallocation(
        &self,
        tenant: TenantId,
    ) -> EngineResult<Vec<AgentReallocationSuggestion>> {
        let snapshots = self.snapshots(tenant).await?;
        let agents = self.agents_by_queue(&snapshots).await?;
        Ok(plan_reallocations(&snapshots, &agents))
    }

    pub async fn recommend_algorithm(
        &self,
        tenant: TenantId,
        queue_id: QueueId,
    ) -> EngineResult<AlgorithmRecommendation> {
        let queue = match self.store.get_queue(queue_id).await? {
            Some(queue) if queue.tenant_id == tenant => queue,
            _ => return Err(EngineError::NotFound(format!("queue {}", queue_id))),
        };
        self.recommend_for(&queue).await
    }

    /// Full optimization pass over one tenant
    pub async fn get_optimization_report(&self, tenant: TenantId) -> EngineResult<OptimizationReport> {
        let snapshots = self.snapshots(tenant).await?;
        let agents = self.agents_by_queue(&snapshots).await?;

        let mut algorithm_recommendations = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            algorithm_recommendations.push(self.recommend_for(&snapshot.queue).await?);
        }

        let report = OptimizationReport {
            tenant_id: tenant,
            load_balance: analyze(&snapshots),
            transfer_suggestions: plan_transfers(&snapshots, self.config.max_transfer_suggestions),
            agent_reallocation_suggestions: plan_reallocations(&snapshots, &agents),
            algorithm_recommendations,
            generated_at: self.clock.now(),
        };

        tracing::info!(
            tenant_id = %tenant,
            queues = report.load_balance.queues.len(),
            balance_score = report.load_balance.balance_score,
            transfers = report.transfer_suggestions.len(),
            reallocations = report.agent_reallocation_suggestions.len(),
            "Optimization report generated"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::SelectionPolicy;
    use linewise_shared::Ticket;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

    fn snapshot(name: &str, waiting: usize, agents: u32) -> QueueSnapshot {
        let queue = Queue::new(TenantId::new(), name, 600);
        let policy = SelectionPolicy::for_queue(&queue, None, NOW);
        let queued = (0..waiting)
            .map(|i| Ticket::new(queue.id, format!("{name}-{i}"), NOW - Duration::seconds(100 - i as i64)))
            .collect();
        QueueSnapshot {
            avg_service_seconds: 600.0,
            queue,
            policy,
            queued,
            available_agents: agents,
            taken_at: NOW,
        }
    }

    #[test]
    fn test_balance_score_with_nothing_waiting() {
        let analysis = analyze(&[snapshot("A", 0, 0), snapshot("B", 0, 3)]);
        assert_eq!(analysis.balance_score, 100.0);
        assert_eq!(analysis.status, BalanceStatus::Optimal);

        let empty = analyze(&[]);
        assert_eq!(empty.balance_score, 100.0);
    }

    #[test]
    fn test_balance_score_penalizes_unstaffed_queue() {
        // ratios: 2 * 10 = 20 and 0.5
        let analysis = analyze(&[snapshot("A", 2, 0), snapshot("B", 1, 2)]);
        assert_eq!(analysis.queues[0].load_ratio, 20.0);
        assert_eq!(analysis.balance_score, 0.0);
        assert_eq!(analysis.status, BalanceStatus::Critical);
    }

    #[test]
    fn test_balance_status_buckets() {
        // ratios 5 and 0.5
        let analysis = analyze(&[snapshot("A", 5, 1), snapshot("B", 1, 2)]);
        assert_eq!(analysis.balance_score, 55.0);
        assert_eq!(analysis.status, BalanceStatus::NeedsBalancing);
    }

    #[test]
    fn test_transfers_from_overloaded_to_underloaded() {
        let snapshots = [snapshot("A", 5, 1), snapshot("B", 1, 2)];
        let suggestions = plan_transfers(&snapshots, 10);

        assert!(!suggestions.is_empty());
        for s in &suggestions {
            assert_eq!(s.from_queue_name, "A");
            assert_eq!(s.to_queue_name, "B");
            assert!(s.estimated_time_saved_minutes > 1.0);
        }
        // the oldest ticket of A is served next anyway
        assert!(suggestions.iter().all(|s| s.ticket_number != "A-0"));

        let capped = plan_transfers(&snapshots, 1);
        assert_eq!(capped.len(), 1);
        assert!(plan_transfers(&snapshots, 0).is_empty());
    }

    #[test]
    fn test_no_transfers_without_underloaded_target() {
        let snapshots = [snapshot("A", 5, 1), snapshot("B", 5, 0)];
        assert!(plan_transfers(&snapshots, 10).is_empty());
    }

    #[test]
    fn test_suggestion_priority_thresholds() {
        assert_eq!(SuggestionPriority::from_time_saved(301), SuggestionPriority::High);
        assert_eq!(SuggestionPriority::from_time_saved(300), SuggestionPriority::Medium);
        assert_eq!(SuggestionPriority::from_time_saved(121), SuggestionPriority::Medium);
        assert_eq!(SuggestionPriority::from_time_saved(61), SuggestionPriority::Low);
    }

    #[test]
    fn test_reallocation_moves_idle_agent_once() {
        let needy = snapshot("A", 8, 1);
        let spare_b = snapshot("B", 0, 1);
        let spare_c = snapshot("C", 1, 1);

        let tenant = needy.queue.tenant_id;
        let shared_agent = AgentProfile::new(tenant, "Bo");
        let mut agents = HashMap::new();
        agents.insert(needy.queue.id, vec![AgentProfile::new(tenant, "Ada")]);
        agents.insert(spare_b.queue.id, vec![shared_agent.clone()]);
        agents.insert(spare_c.queue.id, vec![shared_agent.clone(), AgentProfile::new(tenant, "Cy")]);

        let suggestions = plan_reallocations(&[needy, spare_b, spare_c], &agents);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].agent_name, "Bo");
        assert_eq!(suggestions[1].agent_name, "Cy");
        assert_eq!(suggestions[0].impact_score, 80.0);
    }

    #[test]
    fn test_reallocation_skips_agents_already_serving_needy_queue() {
        let needy = snapshot("A", 8, 1);
        let spare = snapshot("B", 0, 1);
        let agent = AgentProfile::new(needy.queue.tenant_id, "Bo");

        let mut agents = HashMap::new();
        agents.insert(needy.queue.id, vec![agent.clone()]);
        agents.insert(spare.queue.id, vec![agent]);
        assert!(plan_reallocations(&[needy, spare], &agents).is_empty());
    }

    #[test]
    fn test_recommendation_rules() {
        let queue = Queue::new(TenantId::new(), "A", 600);

        let sparse = recommend(&queue, 9, 9, 9);
        assert_eq!(sparse.recommended_algorithm, queue.algorithm);
        assert_eq!(sparse.confidence, Confidence::Low);

        let breaching = recommend(&queue, 50, 11, 40);
        assert_eq!(breaching.recommended_algorithm, QueueAlgorithm::Sla);
        assert_eq!(breaching.confidence, Confidence::Medium);

        let urgent = recommend(&queue, 100, 20, 31);
        assert_eq!(urgent.recommended_algorithm, QueueAlgorithm::Priority);
        assert_eq!(urgent.confidence, Confidence::High);

        let calm = recommend(&queue, 100, 20, 30);
        assert_eq!(calm.recommended_algorithm, QueueAlgorithm::Fifo);
    }
}
