use neo4rs::query;

use crate::epic::{parse_status, status_str};
use crate::errors::{AppError, AppResult};
use crate::events::EventLog;
use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{EntityStatus, Sprint};
use crate::transition::{emit_status_change, StatusChangeRequest};

#[derive(Clone)]
pub struct SprintService {
    session: GraphSession,
    events: EventLog,
}

impl SprintService {
    pub fn new(session: GraphSession, events: EventLog) -> Self {
        Self { session, events }
    }

    pub async fn get(&self, graph_id: &str, id: &str) -> AppResult<Sprint> {
        let rows = self
            .session
            .read(
                query("MATCH (s:Sprint {graphId: $graph_id, id: $id}) RETURN s")
                    .param("graph_id", graph_id)
                    .param("id", id),
                row_to_sprint,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        rows.into_iter().next().ok_or(AppError::GraphNotFound)
    }

    pub async fn create(&self, graph_id: &str, raw_id: &str, epic_id: &str, title: &str) -> AppResult<Sprint> {
        let id = Sprint::canonical_id(raw_id).ok_or(AppError::MissingField("id"))?;
        let now = chrono::Utc::now();
        let sprint = Sprint {
            id,
            graph_id: graph_id.to_string(),
            epic_id: epic_id.to_string(),
            title: title.to_string(),
            status: EntityStatus::Draft,
            created_at: now,
            updated_at: now,
        };

        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"CREATE (s:Sprint {
                        graphId: $graph_id, id: $id, epicId: $epic_id, title: $title,
                        status: $status, createdAt: $created_at, updatedAt: $updated_at
                    })"#,
                )
                .param("graph_id", sprint.graph_id.clone())
                .param("id", sprint.id.clone())
                .param("epic_id", sprint.epic_id.clone())
                .param("title", sprint.title.clone())
                .param("status", status_str(sprint.status))
                .param("created_at", sprint.created_at.to_rfc3339())
                .param("updated_at", sprint.updated_at.to_rfc3339()),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await?;
                Ok(sprint)
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(AppError::Internal(e.into()))
            }
        }
    }

    pub async fn transition_status(&self, graph_id: &str, id: &str, new_status: EntityStatus, changed_by: &str) -> AppResult<Sprint> {
        let sprint = self.get(graph_id, id).await?;
        let now = chrono::Utc::now();

        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query("MATCH (s:Sprint {graphId: $graph_id, id: $id}) SET s.status = $status, s.updatedAt = $now")
                    .param("graph_id", graph_id)
                    .param("id", id)
                    .param("status", status_str(new_status))
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

        emit_status_change(
            &self.session,
            &self.events,
            StatusChangeRequest {
                entity_label: "Sprint",
                entity_id: id,
                graph_id,
                old_status: status_str(sprint.status),
                new_status: status_str(new_status),
                changed_by,
                reason: None,
            },
        )
        .await;

        self.get(graph_id, id).await
    }
}

fn row_to_sprint(row: neo4rs::Row) -> anyhow::Result<Sprint> {
    let node: neo4rs::Node = row.get("s")?;
    let status = parse_status(&node.get::<String>("status").unwrap_or_default()).unwrap_or(EntityStatus::Draft);

    Ok(Sprint {
        id: node.get("id")?,
        graph_id: node.get("graphId")?,
        epic_id: node.get("epicId").unwrap_or_default(),
        title: node.get("title").unwrap_or_default(),
        status,
        created_at: parse_timestamp(&node.get::<String>("createdAt").unwrap_or_default()),
        updated_at: parse_timestamp(&node.get::<String>("updatedAt").unwrap_or_default()),
    })
}
