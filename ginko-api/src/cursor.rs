use anyhow::Result;
use neo4rs::{query, Row};

use crate::events::EventLog;
use crate::graph::GraphSession;
use crate::models::{EventCategory, SessionCursor};

/// Named read heads pinned at one event within a `(project_id, branch)`
/// partition. `read_backward` honors the legacy overload where a caller
/// passes an event id directly instead of a cursor id.
#[derive(Clone)]
pub struct CursorStore {
    session: GraphSession,
    events: EventLog,
}

impl CursorStore {
    pub fn new(session: GraphSession, events: EventLog) -> Self {
        Self { session, events }
    }

    pub async fn get(&self, id: &str) -> Result<Option<SessionCursor>> {
        let rows = self
            .session
            .read(
                query("MATCH (c:Cursor {id: $id}) RETURN c").param("id", id),
                row_to_cursor,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn create(
        &self,
        organization_id: Option<&str>,
        project_id: &str,
        branch: Option<&str>,
        current_event_id: &str,
    ) -> Result<SessionCursor> {
        let cursor = SessionCursor {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: organization_id.map(String::from),
            project_id: project_id.to_string(),
            branch: branch.map(String::from),
            current_event_id: current_event_id.to_string(),
        };

        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"CREATE (c:Cursor {
                        id: $id, organization_id: $organization_id, project_id: $project_id,
                        branch: $branch, current_event_id: $current_event_id
                    })"#,
                )
                .param("id", cursor.id.clone())
                .param("organization_id", cursor.organization_id.clone())
                .param("project_id", cursor.project_id.clone())
                .param("branch", cursor.branch.clone())
                .param("current_event_id", cursor.current_event_id.clone()),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await?;
                Ok(cursor)
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(e.into())
            }
        }
    }

    /// Repositions the cursor onto a newly-appended event, the
    /// `(cursor)-[:POSITIONED_AT]->(newEvent)` side effect of a
    /// cursor-advancing append.
    pub async fn reposition(&self, cursor_id: &str, event_id: &str) -> Result<()> {
        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"MATCH (c:Cursor {id: $cursor_id}), (e:Event {id: $event_id})
                       SET c.current_event_id = $event_id
                       MERGE (c)-[:POSITIONED_AT]->(e)"#,
                )
                .param("cursor_id", cursor_id)
                .param("event_id", event_id),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await?;
                Ok(())
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(e.into())
            }
        }
    }

    /// Resolves `anchor` as a cursor id first, falling back to treating it
    /// as an event id directly for callers that never adopted the
    /// disambiguated form. Returns `None` if neither interpretation
    /// resolves to an anchor event.
    pub async fn resolve_anchor_event_id(&self, anchor: &str) -> Result<Option<String>> {
        if let Some(cursor) = self.get(anchor).await? {
            return Ok(Some(cursor.current_event_id));
        }
        if self.events.get_by_id(anchor).await?.is_some() {
            return Ok(Some(anchor.to_string()));
        }
        Ok(None)
    }

    pub async fn read_backward(
        &self,
        anchor: &str,
        limit: usize,
        categories: Option<&[EventCategory]>,
    ) -> Result<Option<Vec<crate::models::Event>>> {
        let Some(anchor_event_id) = self.resolve_anchor_event_id(anchor).await? else {
            return Ok(None);
        };
        Ok(Some(
            self.events
                .read_backward(&anchor_event_id, limit, categories)
                .await?,
        ))
    }
}

fn row_to_cursor(row: Row) -> Result<SessionCursor> {
    let node: neo4rs::Node = row.get("c")?;
    Ok(SessionCursor {
        id: node.get("id")?,
        organization_id: node.get("organization_id").ok(),
        project_id: node.get("project_id")?,
        branch: node.get("branch").ok(),
        current_event_id: node.get("current_event_id")?,
    })
}
