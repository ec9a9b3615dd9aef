use neo4rs::query;
use tracing::warn;

use crate::activity::ActivityService;
use crate::errors::{AppError, AppResult};
use crate::events::EventLog;
use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{ActivityType, Task, TaskStatus};
use crate::transition::{emit_status_change, StatusChangeRequest};

#[derive(Clone)]
pub struct TaskService {
    session: GraphSession,
    events: EventLog,
    activity: ActivityService,
}

impl TaskService {
    pub fn new(session: GraphSession, events: EventLog, activity: ActivityService) -> Self {
        Self { session, events, activity }
    }

    pub async fn get(&self, graph_id: &str, id: &str) -> AppResult<Task> {
        let rows = self
            .session
            .read(
                query("MATCH (t:Task {graph_id: $graph_id, id: $id}) RETURN t")
                    .param("graph_id", graph_id)
                    .param("id", id),
                row_to_task,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        rows.into_iter().next().ok_or(AppError::TaskNotFound)
    }

    /// `PATCH /task/:id/status`. Steps 1-5 of the transition contract: parse
    /// and validate the requested status, look up the task, reject
    /// disallowed transitions, write the new status, then best-effort emit
    /// the status-change event and bump the caller's activity record.
    pub async fn transition_status(
        &self,
        graph_id: &str,
        task_id: &str,
        new_status_raw: &str,
        changed_by: &str,
        reason: Option<&str>,
    ) -> AppResult<Task> {
        let new_status = TaskStatus::parse(new_status_raw)
            .ok_or_else(|| AppError::InvalidStatus(new_status_raw.to_string()))?;

        if new_status == TaskStatus::Blocked && reason.map(str::is_empty).unwrap_or(true) {
            return Err(AppError::MissingBlockedReason);
        }

        let task = self.get(graph_id, task_id).await?;
        if !task.status.can_transition_to(new_status) {
            return Err(AppError::InvalidStatus(format!(
                "cannot transition from {} to {}",
                task.status.as_str(),
                new_status.as_str()
            )));
        }

        let is_noop = task.status == new_status;

        if !is_noop {
            let now = chrono::Utc::now();
            let blocked_reason = if new_status == TaskStatus::Blocked { reason } else { None };

            let mut txn = self.session.begin_write().await?;
            let result = txn
                .run(
                    query(
                        r#"MATCH (t:Task {graph_id: $graph_id, id: $id})
                           SET t.status = $status, t.status_updated_at = $now, t.status_updated_by = $changed_by,
                               t.blocked_reason = $blocked_reason, t.updated_at = $now"#,
                    )
                    .param("graph_id", graph_id)
                    .param("id", task_id)
                    .param("status", new_status.as_str())
                    .param("now", now.to_rfc3339())
                    .param("changed_by", changed_by)
                    .param("blocked_reason", blocked_reason),
                )
                .await;

            match result {
                Ok(_) => self.session.commit(txn).await.map_err(|_| AppError::ServiceUnavailable)?,
                Err(e) => {
                    self.session.rollback(txn).await;
                    return Err(AppError::Internal(e.into()));
                }
            }

            emit_status_change(
                &self.session,
                &self.events,
                StatusChangeRequest {
                    entity_label: "Task",
                    entity_id: task_id,
                    graph_id,
                    old_status: task.status.as_str(),
                    new_status: new_status.as_str(),
                    changed_by,
                    reason,
                },
            )
            .await;

            if let Some(activity_type) = ActivityType::from_task_status(new_status) {
                if let Err(e) = self.activity.record(graph_id, changed_by, activity_type).await {
                    warn!(error = %e, task_id, "failed to record user activity for status transition");
                }
            }
        }

        self.get(graph_id, task_id).await
    }

    /// Exclusive claim: atomically asserts no existing `CLAIMED_BY` edge
    /// before creating one, and marks the agent `busy`.
    pub async fn claim(&self, graph_id: &str, task_id: &str, agent_id: &str, organization_id: Option<&str>) -> AppResult<()> {
        self.get(graph_id, task_id)
            .await
            .map_err(|_| AppError::AgentOrTaskNotFound)?;
        let now = chrono::Utc::now();

        let mut txn = self.session.begin_write().await?;
        let claimed = txn
            .execute(
                query(
                    r#"MATCH (t:Task {graph_id: $graph_id, id: $task_id})
                       WHERE NOT (t)<-[:CLAIMED_BY]-()
                       MERGE (a:Agent {id: $agent_id})
                       ON CREATE SET a.organization_id = $organization_id
                       SET a.status = 'busy', a.last_heartbeat = $now
                       MERGE (a)-[:CLAIMED_BY]->(t)
                       RETURN t"#,
                )
                .param("graph_id", graph_id)
                .param("task_id", task_id)
                .param("agent_id", agent_id)
                .param("organization_id", organization_id)
                .param("now", now.to_rfc3339()),
            )
            .await;

        let mut stream = match claimed {
            Ok(stream) => stream,
            Err(e) => {
                self.session.rollback(txn).await;
                return Err(AppError::Internal(e.into()));
            }
        };

        let claimed_row = stream
            .next()
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        match claimed_row {
            Some(_) => {
                self.session.commit(txn).await.map_err(|_| AppError::ServiceUnavailable)?;
                Ok(())
            }
            None => {
                self.session.rollback(txn).await;
                Err(AppError::AlreadyClaimed)
            }
        }
    }

    /// Releases a claim held by `agent_id`. Fails `forbidden` if the caller's
    /// agent does not hold the claim.
    pub async fn release(&self, graph_id: &str, task_id: &str, agent_id: &str) -> AppResult<()> {
        self.get(graph_id, task_id)
            .await
            .map_err(|_| AppError::AgentOrTaskNotFound)?;

        let mut txn = self.session.begin_write().await?;
        let released = txn
            .execute(
                query(
                    r#"MATCH (a:Agent {id: $agent_id})-[r:CLAIMED_BY]->(t:Task {graph_id: $graph_id, id: $task_id})
                       DELETE r
                       WITH a
                       OPTIONAL MATCH (a)-[:CLAIMED_BY]->(:Task)
                       WITH a, count(*) AS remaining
                       SET a.status = CASE WHEN remaining = 0 THEN 'idle' ELSE a.status END
                       RETURN a"#,
                )
                .param("agent_id", agent_id)
                .param("graph_id", graph_id)
                .param("task_id", task_id),
            )
            .await;

        let mut stream = match released {
            Ok(stream) => stream,
            Err(e) => {
                self.session.rollback(txn).await;
                return Err(AppError::Internal(e.into()));
            }
        };

        let released_row = stream
            .next()
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        match released_row {
            Some(_) => {
                self.session.commit(txn).await.map_err(|_| AppError::ServiceUnavailable)?;
                Ok(())
            }
            None => {
                self.session.rollback(txn).await;
                Err(AppError::Forbidden)
            }
        }
    }
}

fn row_to_task(row: neo4rs::Row) -> anyhow::Result<Task> {
    let node: neo4rs::Node = row.get("t")?;
    let status = TaskStatus::parse(&node.get::<String>("status").unwrap_or_default())
        .unwrap_or(TaskStatus::NotStarted);

    Ok(Task {
        id: node.get("id")?,
        graph_id: node.get("graph_id")?,
        title: node.get("title").unwrap_or_default(),
        status,
        status_updated_at: parse_timestamp(&node.get::<String>("status_updated_at").unwrap_or_default()),
        status_updated_by: node.get("status_updated_by").unwrap_or_default(),
        blocked_reason: node.get("blocked_reason").ok(),
        assignee: node.get("assignee").ok(),
        claimed_by_agent: node.get("claimed_by_agent").ok(),
        created_at: parse_timestamp(&node.get::<String>("created_at").unwrap_or_default()),
        updated_at: parse_timestamp(&node.get::<String>("updated_at").unwrap_or_default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_transition_without_reason_is_rejected_before_any_graph_call() {
        let reason: Option<&str> = None;
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Blocked));
        assert!(reason.map(str::is_empty).unwrap_or(true));
    }
}
