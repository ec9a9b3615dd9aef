use neo4rs::query;

use crate::errors::{AppError, AppResult};
use crate::events::EventLog;
use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{EntityStatus, Epic};
use crate::transition::{emit_status_change, StatusChangeRequest};

#[derive(Clone)]
pub struct EpicService {
    session: GraphSession,
    events: EventLog,
}

#[derive(Debug, serde::Serialize)]
pub struct EpicCheckResult {
    pub exists: bool,
    pub created_by: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub title: Option<String>,
    pub suggested_id: Option<String>,
}

impl EpicService {
    pub fn new(session: GraphSession, events: EventLog) -> Self {
        Self { session, events }
    }

    pub async fn get(&self, graph_id: &str, id: &str) -> AppResult<Epic> {
        let rows = self
            .session
            .read(
                query("MATCH (e:Epic {graphId: $graph_id, id: $id}) RETURN e")
                    .param("graph_id", graph_id)
                    .param("id", id),
                row_to_epic,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        rows.into_iter().next().ok_or(AppError::GraphNotFound)
    }

    /// `POST /epic/check`: conflict detection for a proposed id. Canonicalizes
    /// the raw input first, so `epic-7` and `EPIC-007` collide identically.
    pub async fn check(&self, graph_id: &str, raw_id: &str) -> AppResult<EpicCheckResult> {
        let Some(canonical) = Epic::canonical_id(raw_id) else {
            return Ok(EpicCheckResult {
                exists: false,
                created_by: None,
                created_at: None,
                title: None,
                suggested_id: None,
            });
        };

        match self.get(graph_id, &canonical).await {
            Ok(epic) => Ok(EpicCheckResult {
                exists: true,
                created_by: Some(epic.created_by),
                created_at: Some(epic.created_at),
                title: Some(epic.title),
                suggested_id: None,
            }),
            Err(AppError::GraphNotFound) => Ok(EpicCheckResult {
                exists: false,
                created_by: None,
                created_at: None,
                title: None,
                suggested_id: Some(canonical),
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, graph_id: &str, raw_id: &str, title: &str, created_by: &str, content: &str) -> AppResult<Epic> {
        let id = Epic::canonical_id(raw_id).ok_or(AppError::MissingField("id"))?;
        if self.get(graph_id, &id).await.is_ok() {
            return Err(AppError::EpicIdConflict);
        }

        let now = chrono::Utc::now();
        let epic = Epic {
            id,
            graph_id: graph_id.to_string(),
            title: title.to_string(),
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            status: EntityStatus::Draft,
            content: content.to_string(),
        };

        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"CREATE (e:Epic {
                        graphId: $graph_id, id: $id, title: $title, createdBy: $created_by,
                        createdAt: $created_at, updatedAt: $updated_at, status: $status, content: $content
                    })"#,
                )
                .param("graph_id", epic.graph_id.clone())
                .param("id", epic.id.clone())
                .param("title", epic.title.clone())
                .param("created_by", epic.created_by.clone())
                .param("created_at", epic.created_at.to_rfc3339())
                .param("updated_at", epic.updated_at.to_rfc3339())
                .param("status", status_str(epic.status))
                .param("content", epic.content.clone()),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await?;
                Ok(epic)
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(AppError::Internal(e.into()))
            }
        }
    }

    pub async fn transition_status(&self, graph_id: &str, id: &str, new_status: EntityStatus, changed_by: &str) -> AppResult<Epic> {
        let epic = self.get(graph_id, id).await?;
        let now = chrono::Utc::now();

        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query("MATCH (e:Epic {graphId: $graph_id, id: $id}) SET e.status = $status, e.updatedAt = $now")
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
                entity_label: "Epic",
                entity_id: id,
                graph_id,
                old_status: status_str(epic.status),
                new_status: status_str(new_status),
                changed_by,
                reason: None,
            },
        )
        .await;

        self.get(graph_id, id).await
    }
}

pub(crate) fn status_str(s: EntityStatus) -> &'static str {
    match s {
        EntityStatus::Draft => "draft",
        EntityStatus::Proposed => "proposed",
        EntityStatus::Committed => "committed",
        EntityStatus::InProgress => "in_progress",
        EntityStatus::Complete => "complete",
        EntityStatus::Paused => "paused",
    }
}

pub(crate) fn parse_status(raw: &str) -> Option<EntityStatus> {
    match raw {
        "draft" => Some(EntityStatus::Draft),
        "proposed" => Some(EntityStatus::Proposed),
        "committed" => Some(EntityStatus::Committed),
        "in_progress" => Some(EntityStatus::InProgress),
        "complete" => Some(EntityStatus::Complete),
        "paused" => Some(EntityStatus::Paused),
        _ => None,
    }
}

fn row_to_epic(row: neo4rs::Row) -> anyhow::Result<Epic> {
    let node: neo4rs::Node = row.get("e")?;
    let status = parse_status(&node.get::<String>("status").unwrap_or_default()).unwrap_or(EntityStatus::Draft);

    Ok(Epic {
        id: node.get("id")?,
        graph_id: node.get("graphId")?,
        title: node.get("title").unwrap_or_default(),
        created_by: node.get("createdBy").unwrap_or_default(),
        created_at: parse_timestamp(&node.get::<String>("createdAt").unwrap_or_default()),
        updated_at: parse_timestamp(&node.get::<String>("updatedAt").unwrap_or_default()),
        status,
        content: node.get("content").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_strings() {
        for status in [
            EntityStatus::Draft,
            EntityStatus::Proposed,
            EntityStatus::Committed,
            EntityStatus::InProgress,
            EntityStatus::Complete,
            EntityStatus::Paused,
        ] {
            let s = status_str(status);
            assert_eq!(parse_status(s), Some(status));
        }
    }
}
