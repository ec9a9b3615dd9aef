use neo4rs::query;
use tracing::warn;

use crate::events::EventLog;
use crate::graph::GraphSession;
use crate::models::{Event, EventCategory, Impact};

/// Shared primitive behind every task/sprint/epic status transition: an
/// entity-specific write happens first (inside the caller's own
/// transaction), and only once that commits does this emit the
/// `status_change` event and `(Entity)-[:HAS_EVENT]->(Event)` edge. Event
/// emission is best-effort — its failure is logged but never reverts the
/// already-committed status change, and it is never attempted at all when
/// `old_status == new_status` (idempotence) or when the entity write itself
/// failed.
pub struct StatusChangeRequest<'a> {
    pub entity_label: &'static str,
    pub entity_id: &'a str,
    pub graph_id: &'a str,
    pub old_status: &'a str,
    pub new_status: &'a str,
    pub changed_by: &'a str,
    pub reason: Option<&'a str>,
}

pub async fn emit_status_change(session: &GraphSession, events: &EventLog, req: StatusChangeRequest<'_>) {
    if req.old_status == req.new_status {
        return;
    }

    let mut description = format!(
        "{} {} changed from {} to {}",
        req.entity_label, req.entity_id, req.old_status, req.new_status
    );
    if let Some(reason) = req.reason {
        description.push_str(&format!(" ({reason})"));
    }

    let event = Event::new(
        req.changed_by.to_string(),
        None,
        req.entity_id.to_string(),
        req.graph_id.to_string(),
        None,
        EventCategory::StatusChange,
        description,
        Impact::Low,
    );

    let event = match events.append(event).await {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, entity_id = req.entity_id, "failed to append status_change event");
            return;
        }
    };

    if let Err(e) = link_has_event(session, req.entity_label, req.entity_id, req.graph_id, &event.id).await {
        warn!(error = %e, entity_id = req.entity_id, "failed to link HAS_EVENT edge");
    }
}

async fn link_has_event(
    session: &GraphSession,
    entity_label: &str,
    entity_id: &str,
    graph_id: &str,
    event_id: &str,
) -> anyhow::Result<()> {
    // Epic/Sprint nodes carry a camelCase `graphId` property while
    // Task/Event use snake_case `graph_id` — the entity label picks which
    // spelling this MATCH needs.
    let graph_id_prop = match entity_label {
        "Epic" | "Sprint" => "graphId",
        _ => "graph_id",
    };
    let cypher = format!(
        "MATCH (entity:{entity_label} {{id: $entity_id, {graph_id_prop}: $graph_id}}), (e:Event {{id: $event_id}}) \
         MERGE (entity)-[:HAS_EVENT]->(e)"
    );

    let mut txn = session.begin_write().await?;
    let result = txn
        .run(
            query(&cypher)
                .param("entity_id", entity_id)
                .param("graph_id", graph_id)
                .param("event_id", event_id),
        )
        .await;

    match result {
        Ok(_) => {
            session.commit(txn).await?;
            Ok(())
        }
        Err(e) => {
            session.rollback(txn).await;
            Err(e.into())
        }
    }
}
