//! Postgres store
//!
//! Every mutation runs in one transaction. `claim_next` locks the agent row
//! and then the selected ticket with `FOR UPDATE SKIP LOCKED`, so concurrent
//! callers on the same queue never receive the same ticket, and the
//! `idx_tickets_one_active_per_agent` index backs the one-active-ticket rule.

use async_trait::async_trait;
use linewise_shared::{
    AgentId, AgentProfile, Queue, QueueAlgorithm, QueueId, TenantId, Ticket, TicketId,
    TicketStatus, TicketTransfer,
};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{QueueDirectory, TicketRepository, TicketWindowStats};
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::ordering::SelectionPolicy;
use crate::state::Transition;

const TICKET_COLUMNS: &str = "id, queue_id, customer_id, agent_id, number, channel, priority, \
     status, eta_seconds, created_at, called_at, started_at, ended_at";

const QUEUE_SELECT: &str = "SELECT q.id, q.tenant_id, q.name, q.service_id, s.sla_seconds, \
     q.algorithm, q.status, q.max_capacity \
     FROM queues q JOIN services s ON s.id = q.service_id";

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    queue_id: Uuid,
    customer_id: Option<Uuid>,
    agent_id: Option<Uuid>,
    number: String,
    channel: String,
    priority: i32,
    status: String,
    eta_seconds: Option<i64>,
    created_at: OffsetDateTime,
    called_at: Option<OffsetDateTime>,
    started_at: Option<OffsetDateTime>,
    ended_at: Option<OffsetDateTime>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = EngineError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id.into(),
            queue_id: row.queue_id.into(),
            customer_id: row.customer_id.map(Into::into),
            agent_id: row.agent_id.map(Into::into),
            number: row.number,
            channel: row.channel.parse()?,
            priority: row.priority,
            status: row.status.parse()?,
            eta_seconds: row.eta_seconds,
            created_at: row.created_at,
            called_at: row.called_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    service_id: Uuid,
    sla_seconds: i64,
    algorithm: String,
    status: String,
    max_capacity: Option<i32>,
}

impl TryFrom<QueueRow> for Queue {
    type Error = EngineError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(Queue {
            id: row.id.into(),
            tenant_id: row.tenant_id.into(),
            name: row.name,
            service_id: row.service_id.into(),
            sla_seconds: row.sla_seconds,
            algorithm: row.algorithm.parse()?,
            status: row.status.parse()?,
            max_capacity: row.max_capacity.and_then(|c| u32::try_from(c).ok()),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    tenant_id: Uuid,
    display_name: String,
    current_status: String,
}

impl TryFrom<AgentRow> for AgentProfile {
    type Error = EngineError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        Ok(AgentProfile {
            id: row.id.into(),
            tenant_id: row.tenant_id.into(),
            display_name: row.display_name,
            status: row.current_status.parse()?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: Uuid,
    ticket_id: Uuid,
    from_queue_id: Uuid,
    to_queue_id: Uuid,
    reason: String,
    priority_before: i32,
    priority_after: i32,
    transferred_at: OffsetDateTime,
}

impl From<TransferRow> for TicketTransfer {
    fn from(row: TransferRow) -> Self {
        TicketTransfer {
            id: row.id,
            ticket_id: row.ticket_id.into(),
            from_queue_id: row.from_queue_id.into(),
            to_queue_id: row.to_queue_id.into(),
            reason: row.reason,
            priority_before: row.priority_before,
            priority_after: row.priority_after,
            transferred_at: row.transferred_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WindowRow {
    total: i64,
    sla_breached: i64,
    high_priority: i64,
}

fn into_tickets(rows: Vec<TicketRow>) -> EngineResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

/// `ORDER BY` clause matching [`SelectionPolicy::compare`]; `$2` is the late cutoff
fn order_clause(algorithm: QueueAlgorithm) -> &'static str {
    match algorithm {
        QueueAlgorithm::Fifo => "created_at ASC, id ASC",
        QueueAlgorithm::Priority => "priority DESC, created_at ASC, id ASC",
        QueueAlgorithm::Sla => "(created_at <= $2) DESC, priority DESC, created_at ASC, id ASC",
    }
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_ticket(tx: &mut Transaction<'_, Postgres>, ticket: &Ticket) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE tickets SET
                queue_id = $2,
                agent_id = $3,
                priority = $4,
                status = $5,
                eta_seconds = $6,
                called_at = $7,
                started_at = $8,
                ended_at = $9
            WHERE id = $1
            "#,
        )
        .bind(ticket.id.0)
        .bind(ticket.queue_id.0)
        .bind(ticket.agent_id.map(|a| a.0))
        .bind(ticket.priority)
        .bind(ticket.status.as_str())
        .bind(ticket.eta_seconds)
        .bind(ticket.called_at)
        .bind(ticket.started_at)
        .bind(ticket.ended_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn set_agent_status(
        tx: &mut Transaction<'_, Postgres>,
        agent_id: AgentId,
        status: &str,
    ) -> EngineResult<()> {
        sqlx::query("UPDATE agent_profiles SET current_status = $2, updated_at = NOW() WHERE id = $1")
            .bind(agent_id.0)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TicketRepository for PgStore {
    async fn get_ticket(&self, id: TicketId) -> EngineResult<Option<Ticket>> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Ticket::try_from).transpose()
    }

    async fn insert_ticket(&self, ticket: &Ticket, max_queued: Option<u32>) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(max_queued) = max_queued {
            // Serialize intake per queue so the count stays valid until commit
            sqlx::query("SELECT id FROM queues WHERE id = $1 FOR UPDATE")
                .bind(ticket.queue_id.0)
                .fetch_optional(&mut *tx)
                .await?;
            let queued: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM tickets WHERE queue_id = $1 AND status IN ('waiting', 'transferred')",
            )
            .bind(ticket.queue_id.0)
            .fetch_one(&mut *tx)
            .await?;
            if queued >= i64::from(max_queued) {
                tx.rollback().await.ok();
                return Err(EngineError::Conflict(ConflictKind::QueueFull));
            }
        }

        sqlx::query(&format!(
            "INSERT INTO tickets ({TICKET_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(ticket.id.0)
        .bind(ticket.queue_id.0)
        .bind(ticket.customer_id.map(|c| c.0))
        .bind(ticket.agent_id.map(|a| a.0))
        .bind(&ticket.number)
        .bind(ticket.channel.as_str())
        .bind(ticket.priority)
        .bind(ticket.status.as_str())
        .bind(ticket.eta_seconds)
        .bind(ticket.created_at)
        .bind(ticket.called_at)
        .bind(ticket.started_at)
        .bind(ticket.ended_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn queued_tickets(&self, queue_id: QueueId) -> EngineResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE queue_id = $1 AND status IN ('waiting', 'transferred') \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(queue_id.0)
        .fetch_all(&self.pool)
        .await?;
        into_tickets(rows)
    }

    async fn waiting_tickets(&self, queue_id: QueueId, limit: Option<usize>) -> EngineResult<Vec<Ticket>> {
        // LIMIT NULL means no limit
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE queue_id = $1 AND status = 'waiting' \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(queue_id.0)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;
        into_tickets(rows)
    }

    async fn count_queued_ahead(&self, ticket: &Ticket, policy: &SelectionPolicy) -> EngineResult<u64> {
        let filter = match policy.algorithm {
            QueueAlgorithm::Fifo => "(created_at, id) < ($2, $3)",
            QueueAlgorithm::Priority => {
                "(priority > $4 OR (priority = $4 AND (created_at, id) < ($2, $3)))"
            }
            QueueAlgorithm::Sla => {
                "(((created_at <= $5) AND NOT $6) \
                 OR ((created_at <= $5) = $6 \
                     AND (priority > $4 OR (priority = $4 AND (created_at, id) < ($2, $3)))))"
            }
        };
        let sql = format!(
            "SELECT COUNT(*) FROM tickets \
             WHERE queue_id = $1 AND status IN ('waiting', 'transferred') AND {filter}"
        );

        let query = sqlx::query_scalar::<_, i64>(&sql)
            .bind(ticket.queue_id.0)
            .bind(ticket.created_at)
            .bind(ticket.id.0);
        let query = match policy.algorithm {
            QueueAlgorithm::Fifo => query,
            QueueAlgorithm::Priority => query.bind(ticket.priority),
            QueueAlgorithm::Sla => query
                .bind(ticket.priority)
                .bind(policy.late_cutoff)
                .bind(ticket.is_late(policy.late_cutoff)),
        };
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn average_service_seconds(&self, queue_id: QueueId, limit: usize) -> EngineResult<Option<f64>> {
        let avg: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(EXTRACT(EPOCH FROM (ended_at - started_at)))::FLOAT8
            FROM (
                SELECT started_at, ended_at
                FROM tickets
                WHERE queue_id = $1
                  AND status = 'closed'
                  AND started_at IS NOT NULL
                  AND ended_at >= started_at
                ORDER BY ended_at DESC
                LIMIT $2
            ) recent
            "#,
        )
        .bind(queue_id.0)
        .bind(limit as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(avg)
    }

    async fn count_by_status(&self, queue_id: QueueId, status: TicketStatus) -> EngineResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE queue_id = $1 AND status = $2")
                .bind(queue_id.0)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_created_since(&self, queue_id: QueueId, since: OffsetDateTime) -> EngineResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE queue_id = $1 AND created_at >= $2")
                .bind(queue_id.0)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn window_stats(
        &self,
        queue_id: QueueId,
        since: OffsetDateTime,
        sla_seconds: i64,
        high_priority_threshold: i32,
        now: OffsetDateTime,
    ) -> EngineResult<TicketWindowStats> {
        let row: WindowRow = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (
                    WHERE FLOOR(EXTRACT(EPOCH FROM (COALESCE(called_at, $3) - created_at))) > $4
                ) AS sla_breached,
                COUNT(*) FILTER (WHERE priority >= $5) AS high_priority
            FROM tickets
            WHERE queue_id = $1 AND created_at >= $2
            "#,
        )
        .bind(queue_id.0)
        .bind(since)
        .bind(now)
        .bind(sla_seconds)
        .bind(high_priority_threshold)
        .fetch_one(&self.pool)
        .await?;

        Ok(TicketWindowStats {
            total: row.total.max(0) as u64,
            sla_breached: row.sla_breached.max(0) as u64,
            high_priority: row.high_priority.max(0) as u64,
        })
    }

    async fn set_eta(&self, ticket_id: TicketId, eta_seconds: Option<i64>) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE tickets SET eta_seconds = $2 WHERE id = $1 AND status = 'waiting'",
        )
        .bind(ticket_id.0)
        .bind(eta_seconds)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(
        &self,
        queue: &Queue,
        agent_id: AgentId,
        policy: &SelectionPolicy,
        now: OffsetDateTime,
    ) -> EngineResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;

        // Serialize claims per agent
        let agent: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM agent_profiles WHERE id = $1 FOR UPDATE")
                .bind(agent_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        if agent.is_none() {
            tx.rollback().await.ok();
            return Err(EngineError::NotFound(format!("agent {}", agent_id)));
        }

        let already_active: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM tickets WHERE agent_id = $1 AND status IN ('called', 'in_service'))",
        )
        .bind(agent_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if already_active {
            tx.rollback().await.ok();
            return Err(EngineError::Conflict(ConflictKind::AgentAlreadyActive));
        }

        let select = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE queue_id = $1 AND status IN ('waiting', 'transferred') \
             ORDER BY {} LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
            order_clause(policy.algorithm)
        );
        let query = sqlx::query_as::<_, TicketRow>(&select).bind(queue.id.0);
        let query = match policy.algorithm {
            QueueAlgorithm::Sla => query.bind(policy.late_cutoff),
            QueueAlgorithm::Fifo | QueueAlgorithm::Priority => query,
        };
        let Some(row) = query.fetch_optional(&mut *tx).await? else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let mut ticket = Ticket::try_from(row)?;
        Transition::Call { agent_id }.apply(&mut ticket, now)?;
        Self::write_ticket(&mut tx, &ticket).await?;
        Self::set_agent_status(&mut tx, agent_id, "busy").await?;

        tx.commit().await?;
        Ok(Some(ticket))
    }

    async fn apply_transition(
        &self,
        ticket_id: TicketId,
        transition: &Transition,
        release_agent: Option<AgentId>,
        now: OffsetDateTime,
    ) -> EngineResult<Ticket> {
        let mut tx = self.pool.begin().await?;

        let row: Option<TicketRow> = sqlx::query_as(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1 FOR UPDATE"
        ))
        .bind(ticket_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await.ok();
            return Err(EngineError::NotFound(format!("ticket {}", ticket_id)));
        };

        let current = Ticket::try_from(row)?;
        let mut updated = current.clone();
        let release = match transition
            .agent_to_release(&current, release_agent)
            .and_then(|release| transition.apply(&mut updated, now).map(|()| release))
        {
            Ok(release) => release,
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        let occupied_agent = updated.agent_id.filter(|_| transition.occupies_agent());
        if let Some(agent_id) = occupied_agent {
            sqlx::query("SELECT id FROM agent_profiles WHERE id = $1 FOR UPDATE")
                .bind(agent_id.0)
                .fetch_optional(&mut *tx)
                .await?;
            let busy_elsewhere: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM tickets \
                 WHERE agent_id = $1 AND id <> $2 AND status IN ('called', 'in_service'))",
            )
            .bind(agent_id.0)
            .bind(ticket_id.0)
            .fetch_one(&mut *tx)
            .await?;
            if busy_elsewhere {
                tx.rollback().await.ok();
                return Err(EngineError::Conflict(ConflictKind::AgentAlreadyActive));
            }
        }

        Self::write_ticket(&mut tx, &updated).await?;

        if let Transition::Transfer { reason, .. } = transition {
            sqlx::query(
                r#"
                INSERT INTO ticket_transfers
                    (id, ticket_id, from_queue_id, to_queue_id, reason,
                     priority_before, priority_after, transferred_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(ticket_id.0)
            .bind(current.queue_id.0)
            .bind(updated.queue_id.0)
            .bind(reason)
            .bind(current.priority)
            .bind(updated.priority)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(agent_id) = release {
            Self::set_agent_status(&mut tx, agent_id, "available").await?;
        }
        if let Some(agent_id) = occupied_agent {
            Self::set_agent_status(&mut tx, agent_id, "busy").await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn transfers_for(&self, ticket_id: TicketId) -> EngineResult<Vec<TicketTransfer>> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            r#"
            SELECT id, ticket_id, from_queue_id, to_queue_id, reason,
                   priority_before, priority_after, transferred_at
            FROM ticket_transfers
            WHERE ticket_id = $1
            ORDER BY transferred_at ASC
            "#,
        )
        .bind(ticket_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TicketTransfer::from).collect())
    }
}

#[async_trait]
impl QueueDirectory for PgStore {
    async fn get_queue(&self, id: QueueId) -> EngineResult<Option<Queue>> {
        let row: Option<QueueRow> = sqlx::query_as(&format!("{QUEUE_SELECT} WHERE q.id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Queue::try_from).transpose()
    }

    async fn active_queues(&self, tenant: Option<TenantId>) -> EngineResult<Vec<Queue>> {
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "{QUEUE_SELECT} WHERE q.status = 'active' \
             AND ($1::uuid IS NULL OR q.tenant_id = $1) \
             ORDER BY q.name ASC, q.id ASC"
        ))
        .bind(tenant.map(|t| t.0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Queue::try_from).collect()
    }

    async fn get_agent(&self, id: AgentId) -> EngineResult<Option<AgentProfile>> {
        let row: Option<AgentRow> = sqlx::query_as(
            "SELECT id, tenant_id, display_name, current_status FROM agent_profiles WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AgentProfile::try_from).transpose()
    }

    async fn queue_agents(&self, queue_id: QueueId) -> EngineResult<Vec<AgentProfile>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            r#"
            SELECT a.id, a.tenant_id, a.display_name, a.current_status
            FROM agent_profiles a
            JOIN queue_assignments qa ON qa.agent_id = a.id
            WHERE qa.queue_id = $1 AND qa.is_active
            ORDER BY a.display_name ASC, a.id ASC
            "#,
        )
        .bind(queue_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AgentProfile::try_from).collect()
    }

    async fn available_agent_count(&self, queue_id: QueueId) -> EngineResult<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM agent_profiles a
            JOIN queue_assignments qa ON qa.agent_id = a.id
            WHERE qa.queue_id = $1 AND qa.is_active AND a.current_status = 'available'
            "#,
        )
        .bind(queue_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u32)
    }
}
