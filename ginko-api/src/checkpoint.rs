use neo4rs::query;

use crate::errors::{AppError, AppResult};
use crate::graph::{parse_timestamp, GraphSession};
use crate::models::Checkpoint;

/// Append-only progress snapshots for a task/agent pair. Never updated or
/// deleted by the core.
#[derive(Clone)]
pub struct CheckpointStore {
    session: GraphSession,
}

impl CheckpointStore {
    pub fn new(session: GraphSession) -> Self {
        Self { session }
    }

    pub async fn create(&self, checkpoint: Checkpoint) -> AppResult<Checkpoint> {
        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"CREATE (c:Checkpoint {
                        id: $id, graph_id: $graph_id, task_id: $task_id, agent_id: $agent_id,
                        git_commit: $git_commit, files_modified: $files_modified,
                        events_since: $events_since, message: $message, created_at: $created_at
                    })"#,
                )
                .param("id", checkpoint.id.clone())
                .param("graph_id", checkpoint.graph_id.clone())
                .param("task_id", checkpoint.task_id.clone())
                .param("agent_id", checkpoint.agent_id.clone())
                .param("git_commit", checkpoint.git_commit.clone())
                .param("files_modified", checkpoint.files_modified.clone())
                .param("events_since", checkpoint.events_since)
                .param("message", checkpoint.message.clone())
                .param("created_at", checkpoint.created_at.to_rfc3339()),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await.map_err(|_| AppError::ServiceUnavailable)?;
                Ok(checkpoint)
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(AppError::Internal(e.into()))
            }
        }
    }

    pub async fn list_for_task(&self, graph_id: &str, task_id: &str) -> AppResult<Vec<Checkpoint>> {
        self.session
            .read(
                query("MATCH (c:Checkpoint {graph_id: $graph_id, task_id: $task_id}) RETURN c ORDER BY c.created_at DESC")
                    .param("graph_id", graph_id)
                    .param("task_id", task_id),
                row_to_checkpoint,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)
    }
}

fn row_to_checkpoint(row: neo4rs::Row) -> anyhow::Result<Checkpoint> {
    let node: neo4rs::Node = row.get("c")?;
    Ok(Checkpoint {
        id: node.get("id")?,
        graph_id: node.get("graph_id")?,
        task_id: node.get("task_id")?,
        agent_id: node.get("agent_id")?,
        git_commit: node.get("git_commit").ok(),
        files_modified: node.get("files_modified").unwrap_or_default(),
        events_since: node.get("events_since").unwrap_or(0),
        message: node.get("message").ok(),
        created_at: parse_timestamp(&node.get::<String>("created_at").unwrap_or_default()),
    })
}
