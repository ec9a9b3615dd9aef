use anyhow::Result;
use neo4rs::{query, Row};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{Event, EventCategory, Impact};

/// Appends `Event` nodes linked by `:NEXT` within a `(project_id, branch)`
/// partition, and serves backward reads over that same order. Mirrors the
/// teacher's `EventService` (`event_service.rs`) as a thin domain layer over
/// the graph session rather than a NATS publisher.
#[derive(Clone)]
pub struct EventLog {
    session: GraphSession,
}

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:ADR|PRD|TASK)-\d+").expect("static pattern is valid"))
}

impl EventLog {
    pub fn new(session: GraphSession) -> Self {
        Self { session }
    }

    /// Idempotent on `event.id`: re-posting the same id is a no-op and
    /// returns the already-stored event rather than erroring.
    pub async fn append(&self, event: Event) -> Result<Event> {
        if let Some(existing) = self.get_by_id(&event.id).await? {
            return Ok(existing);
        }

        let mut txn = self.session.begin_write().await?;
        let branch = event.branch.clone().unwrap_or_default();

        let result = txn
            .run(
                query(
                    r#"CREATE (e:Event {
                           id: $id, user_id: $user_id, organization_id: $organization_id,
                           project_id: $project_id, graph_id: $graph_id, branch: $branch,
                           timestamp: $timestamp, category: $category, description: $description,
                           files: $files, impact: $impact, pressure: $pressure, tags: $tags,
                           shared: $shared, commit_hash: $commit_hash
                       })
                       WITH e
                       OPTIONAL MATCH (tail:Event {project_id: $project_id, branch: $branch})
                       WHERE NOT (tail)-[:NEXT]->() AND tail.id <> $id
                       FOREACH (_ IN CASE WHEN tail IS NULL THEN [] ELSE [1] END |
                           MERGE (tail)-[:NEXT]->(e)
                       )"#,
                )
                .param("id", event.id.clone())
                .param("user_id", event.user_id.clone())
                .param("organization_id", event.organization_id.clone())
                .param("project_id", event.project_id.clone())
                .param("graph_id", event.graph_id.clone())
                .param("branch", branch)
                .param("timestamp", event.timestamp.to_rfc3339())
                .param("category", category_str(event.category))
                .param("description", event.description.clone())
                .param("files", event.files.clone())
                .param("impact", impact_str(event.impact))
                .param("pressure", event.pressure)
                .param("tags", event.tags.clone())
                .param("shared", event.shared)
                .param("commit_hash", event.commit_hash.clone()),
            )
            .await;

        match result {
            Ok(_) => {
                self.link_recent_activity(&mut txn, &event).await?;
                self.session.commit(txn).await?;
                Ok(event)
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(e.into())
            }
        }
    }

    /// `(Event)-[:RECENT_ACTIVITY]->(Task)` for every task id mentioned in
    /// the event's description, best-effort: a missing task is skipped
    /// rather than failing the append.
    async fn link_recent_activity(&self, txn: &mut neo4rs::Txn, event: &Event) -> Result<()> {
        for task_id in extract_document_ids(&event.description) {
            if let Err(e) = txn
                .run(
                    query(
                        r#"MATCH (e:Event {id: $event_id}), (t:Task {graph_id: $graph_id, id: $task_id})
                           MERGE (e)-[:RECENT_ACTIVITY]->(t)"#,
                    )
                    .param("event_id", event.id.clone())
                    .param("graph_id", event.graph_id.clone())
                    .param("task_id", task_id.clone()),
                )
                .await
            {
                warn!(error = %e, task_id, "failed to link recent-activity edge");
            }
        }
        Ok(())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Event>> {
        let rows = self
            .session
            .read(
                query("MATCH (e:Event {id: $id}) RETURN e").param("id", id),
                row_to_event,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Reverse-chronological events in the same `(project_id, branch)`
    /// partition as `anchor_id`, up to `limit`, honoring the `:NEXT` total
    /// order over the `timestamp` tiebreaker. Category/branch filters are
    /// applied after the graph query returns rows, per the lazy-sequence
    /// contract.
    pub async fn read_backward(
        &self,
        anchor_id: &str,
        limit: usize,
        categories: Option<&[EventCategory]>,
    ) -> Result<Vec<Event>> {
        let limit = limit.min(200) as i64;
        let rows = self
            .session
            .read(
                query(
                    r#"MATCH (anchor:Event {id: $anchor_id})
                       MATCH path = (e:Event)-[:NEXT*0..]->(anchor)
                       WITH e, length(path) AS distance
                       RETURN e ORDER BY distance ASC LIMIT $limit"#,
                )
                .param("anchor_id", anchor_id)
                .param("limit", limit),
                row_to_event,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter(|e| categories.map(|cs| cs.contains(&e.category)).unwrap_or(true))
            .collect())
    }

    /// Most-recent-first page over a graph's events, independent of the
    /// `:NEXT` linked-list traversal used by `read_backward` — this is the
    /// paged view behind team activity feeds, filterable by member and
    /// category and bounded by an optional `since` timestamp.
    pub async fn list_paged(
        &self,
        graph_id: &str,
        limit: usize,
        offset: usize,
        since: Option<&chrono::DateTime<chrono::Utc>>,
        categories: Option<&[EventCategory]>,
        user_id: Option<&str>,
    ) -> Result<Vec<Event>> {
        let limit = limit.min(200) as i64;
        let since_timestamp = since.map(|t| t.to_rfc3339());

        let rows = self
            .session
            .read(
                query(
                    r#"MATCH (e:Event {graph_id: $graph_id})
                       WHERE ($since_timestamp IS NULL OR e.timestamp > $since_timestamp)
                         AND ($user_id IS NULL OR e.user_id = $user_id)
                       RETURN e ORDER BY e.timestamp DESC SKIP $offset LIMIT $limit"#,
                )
                .param("graph_id", graph_id)
                .param("since_timestamp", since_timestamp)
                .param("user_id", user_id)
                .param("offset", offset as i64)
                .param("limit", limit),
                row_to_event,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter(|e| categories.map(|cs| cs.contains(&e.category)).unwrap_or(true))
            .collect())
    }

    /// Events strictly after `since_id` in chronological order, for the
    /// streaming and long-poll endpoints.
    pub async fn read_forward_since(
        &self,
        graph_id: &str,
        since_id: Option<&str>,
        categories: Option<&[EventCategory]>,
        agent_id: Option<&str>,
    ) -> Result<Vec<Event>> {
        let since_timestamp = match since_id {
            Some(id) => match self.get_by_id(id).await? {
                Some(anchor) => Some(anchor.timestamp.to_rfc3339()),
                None => None,
            },
            None => None,
        };

        let rows = self
            .session
            .read(
                query(
                    r#"MATCH (e:Event {graph_id: $graph_id})
                       WHERE $since_timestamp IS NULL OR e.timestamp > $since_timestamp
                       RETURN e ORDER BY e.timestamp ASC"#,
                )
                .param("graph_id", graph_id)
                .param("since_timestamp", since_timestamp),
                row_to_event,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter(|e| categories.map(|cs| cs.contains(&e.category)).unwrap_or(true))
            .filter(|e| agent_id.map(|a| e.tags.iter().any(|t| t == a)).unwrap_or(true))
            .collect())
    }
}

/// Extracts `ADR-123`, `PRD-45`, `TASK-7`-shaped document ids from free text,
/// used both for `RECENT_ACTIVITY` linking on append and for the composite
/// initial-load's document discovery.
pub fn extract_document_ids(text: &str) -> Vec<String> {
    task_id_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn category_str(c: EventCategory) -> &'static str {
    match c {
        EventCategory::Fix => "fix",
        EventCategory::Feature => "feature",
        EventCategory::Decision => "decision",
        EventCategory::Insight => "insight",
        EventCategory::Git => "git",
        EventCategory::Achievement => "achievement",
        EventCategory::StatusChange => "status_change",
    }
}

fn impact_str(i: Impact) -> &'static str {
    match i {
        Impact::Low => "low",
        Impact::Medium => "medium",
        Impact::High => "high",
    }
}

pub(crate) fn row_to_event(row: Row) -> Result<Event> {
    let node: neo4rs::Node = row.get("e")?;
    let category = match node.get::<String>("category").unwrap_or_default().as_str() {
        "fix" => EventCategory::Fix,
        "feature" => EventCategory::Feature,
        "decision" => EventCategory::Decision,
        "insight" => EventCategory::Insight,
        "git" => EventCategory::Git,
        "achievement" => EventCategory::Achievement,
        _ => EventCategory::StatusChange,
    };
    let impact = match node.get::<String>("impact").unwrap_or_default().as_str() {
        "medium" => Impact::Medium,
        "high" => Impact::High,
        _ => Impact::Low,
    };

    Ok(Event {
        id: node.get("id")?,
        user_id: node.get("user_id")?,
        organization_id: node.get("organization_id").ok(),
        project_id: node.get("project_id")?,
        graph_id: node.get("graph_id")?,
        branch: node.get("branch").ok(),
        timestamp: parse_timestamp(&node.get::<String>("timestamp")?),
        category,
        description: node.get("description").unwrap_or_default(),
        files: node.get("files").unwrap_or_default(),
        impact,
        pressure: node.get("pressure").ok(),
        tags: node.get("tags").unwrap_or_default(),
        shared: node.get("shared").unwrap_or(false),
        commit_hash: node.get("commit_hash").ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_document_ids_from_description() {
        let ids = extract_document_ids("implements ADR-12 and references TASK-7, see PRD-3 too");
        assert_eq!(ids, vec!["ADR-12", "TASK-7", "PRD-3"]);
    }

    #[test]
    fn extracts_no_ids_when_absent() {
        assert!(extract_document_ids("nothing to see here").is_empty());
    }
}
