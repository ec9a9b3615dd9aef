use chrono::{Duration, Utc};
use neo4rs::query;

use crate::errors::{AppError, AppResult};
use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{Agent, AgentStatus};

/// Stale-agent grace period: heartbeats older than this are eligible for
/// reclamation by the external reaper collaborator.
const STALE_GRACE_MINUTES: i64 = 10;

#[derive(Clone)]
pub struct AgentRegistry {
    session: GraphSession,
}

impl AgentRegistry {
    pub fn new(session: GraphSession) -> Self {
        Self { session }
    }

    pub async fn heartbeat(&self, agent_id: &str, organization_id: Option<&str>, status: AgentStatus) -> AppResult<Agent> {
        let now = Utc::now();
        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"MERGE (a:Agent {id: $id})
                       ON CREATE SET a.organization_id = $organization_id
                       SET a.status = $status, a.last_heartbeat = $now"#,
                )
                .param("id", agent_id)
                .param("organization_id", organization_id)
                .param("status", status_str(status))
                .param("now", now.to_rfc3339()),
            )
            .await;

        match result {
            Ok(_) => self.session.commit(txn).await.map_err(|_| AppError::ServiceUnavailable)?,
            Err(e) => {
                self.session.rollback(txn).await;
                return Err(AppError::Internal(e.into()));
            }
        }

        Ok(Agent {
            id: agent_id.to_string(),
            organization_id: organization_id.map(String::from),
            status,
            last_heartbeat: now,
        })
    }

    pub async fn list_active(&self, organization_id: &str) -> AppResult<Vec<Agent>> {
        self.session
            .read(
                query("MATCH (a:Agent {organization_id: $org}) WHERE a.status <> 'stale' RETURN a")
                    .param("org", organization_id),
                row_to_agent,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)
    }

    /// Agents whose heartbeat has aged past the grace period and have not
    /// already been marked stale. The reaper calls this, then releases each
    /// agent's claims through `TaskService::release`.
    pub async fn list_reclaimable(&self) -> AppResult<Vec<Agent>> {
        let cutoff = Utc::now() - Duration::minutes(STALE_GRACE_MINUTES);
        self.session
            .read(
                query("MATCH (a:Agent) WHERE a.last_heartbeat < $cutoff AND a.status <> 'stale' RETURN a")
                    .param("cutoff", cutoff.to_rfc3339()),
                row_to_agent,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)
    }

    pub async fn mark_stale(&self, agent_id: &str) -> AppResult<()> {
        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(query("MATCH (a:Agent {id: $id}) SET a.status = 'stale'").param("id", agent_id))
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await.map_err(|_| AppError::ServiceUnavailable)?;
                Ok(())
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(AppError::Internal(e.into()))
            }
        }
    }
}

fn status_str(s: AgentStatus) -> &'static str {
    match s {
        AgentStatus::Active => "active",
        AgentStatus::Busy => "busy",
        AgentStatus::Idle => "idle",
        AgentStatus::Stale => "stale",
    }
}

fn row_to_agent(row: neo4rs::Row) -> anyhow::Result<Agent> {
    let node: neo4rs::Node = row.get("a")?;
    let status = match node.get::<String>("status").unwrap_or_default().as_str() {
        "active" => AgentStatus::Active,
        "busy" => AgentStatus::Busy,
        "stale" => AgentStatus::Stale,
        _ => AgentStatus::Idle,
    };

    Ok(Agent {
        id: node.get("id")?,
        organization_id: node.get("organization_id").ok(),
        status,
        last_heartbeat: parse_timestamp(&node.get::<String>("last_heartbeat").unwrap_or_default()),
    })
}
