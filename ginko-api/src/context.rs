use neo4rs::query;
use std::time::Instant;

use crate::errors::AppResult;
use crate::events::extract_document_ids;
use crate::graph::GraphSession;
use crate::models::{Event, EventCategory, Impact};

const MAX_EXPANSION_NODES: usize = 50;
const DEFAULT_DOCUMENT_DEPTH: u32 = 2;

#[derive(Clone)]
pub struct ContextService {
    session: GraphSession,
}

#[derive(Debug, serde::Serialize)]
pub struct InitialLoad {
    pub principal_events: Vec<Event>,
    pub team_events: Vec<Event>,
    pub document_ids: Vec<String>,
    pub related_documents: Vec<String>,
    pub estimated_token_cost: u64,
    pub elapsed_ms: u64,
}

pub struct InitialLoadRequest<'a> {
    pub graph_id: &'a str,
    pub project_id: &'a str,
    pub user_id: &'a str,
    pub principal_limit: usize,
    pub team_limit: usize,
    pub document_depth: Option<u32>,
}

impl ContextService {
    pub fn new(session: GraphSession) -> Self {
        Self { session }
    }

    /// Composite snapshot: the principal's recent events, team-worthy events,
    /// document ids extracted from both by pattern match, documents
    /// reachable from that set by up to `documentDepth` hops (bounded to 50
    /// nodes), an estimated token cost, and timing metadata. Read-only, may
    /// be served from any consistent snapshot.
    pub async fn initial_load(&self, req: InitialLoadRequest<'_>) -> AppResult<InitialLoad> {
        let started = Instant::now();

        let principal_events = self
            .session
            .read(
                query(
                    "MATCH (e:Event {graph_id: $graph_id, project_id: $project_id, user_id: $user_id}) \
                     RETURN e ORDER BY e.timestamp DESC LIMIT $limit",
                )
                .param("graph_id", req.graph_id)
                .param("project_id", req.project_id)
                .param("user_id", req.user_id)
                .param("limit", req.principal_limit as i64),
                crate::events::row_to_event,
            )
            .await?;

        let team_events_raw = self
            .session
            .read(
                query(
                    "MATCH (e:Event {graph_id: $graph_id, project_id: $project_id}) \
                     WHERE e.category IN ['decision', 'achievement', 'git'] \
                     RETURN e ORDER BY e.timestamp DESC LIMIT $limit",
                )
                .param("graph_id", req.graph_id)
                .param("project_id", req.project_id)
                .param("limit", (req.team_limit * 4) as i64),
                crate::events::row_to_event,
            )
            .await?;

        let team_events: Vec<Event> = team_events_raw
            .into_iter()
            .filter(|e| e.is_team_worthy() || e.shared || e.impact == Impact::High)
            .take(req.team_limit)
            .collect();

        let mut document_ids: Vec<String> = principal_events
            .iter()
            .chain(team_events.iter())
            .flat_map(|e| extract_document_ids(&e.description))
            .collect();
        document_ids.sort();
        document_ids.dedup();

        let depth = req.document_depth.unwrap_or(DEFAULT_DOCUMENT_DEPTH).max(1);
        let related_documents = self.expand_related(req.graph_id, &document_ids, depth).await?;

        let estimated_token_cost = estimate_token_cost(&principal_events, &team_events, &related_documents);

        Ok(InitialLoad {
            principal_events,
            team_events,
            document_ids,
            related_documents,
            estimated_token_cost,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Expands from the seed document ids along `IMPLEMENTS | REFERENCES |
    /// DEPENDS_ON` up to `depth` hops, bounded to `MAX_EXPANSION_NODES`
    /// total.
    async fn expand_related(&self, graph_id: &str, seed_ids: &[String], depth: u32) -> AppResult<Vec<String>> {
        if seed_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Variable-length hop bounds must be literal in Cypher, not bound
        // parameters, so `depth` (an internal, non-user-controlled value
        // capped by `DEFAULT_DOCUMENT_DEPTH`/caller input validation) is
        // interpolated directly into the statement text.
        let cypher = format!(
            r#"MATCH (seed {{graph_id: $graph_id}}) WHERE seed.id IN $seed_ids
               MATCH (seed)-[:IMPLEMENTS|REFERENCES|DEPENDS_ON*1..{depth}]-(related)
               RETURN DISTINCT related.id AS id LIMIT $limit"#
        );

        let rows: Vec<String> = self
            .session
            .read(
                query(&cypher)
                    .param("graph_id", graph_id)
                    .param("seed_ids", seed_ids.to_vec())
                    .param("limit", MAX_EXPANSION_NODES as i64),
                |row| Ok(row.get::<String>("id")?),
            )
            .await?;

        Ok(rows)
    }
}

/// Rough token-cost estimate: ~4 characters per token, summed over event
/// descriptions and related document ids. A heuristic for client-side
/// budgeting, not a billing figure.
fn estimate_token_cost(principal: &[Event], team: &[Event], related: &[String]) -> u64 {
    let chars: usize = principal
        .iter()
        .chain(team.iter())
        .map(|e| e.description.len())
        .sum::<usize>()
        + related.iter().map(|d| d.len()).sum::<usize>();
    (chars / 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventCategory;

    #[test]
    fn estimates_token_cost_from_description_length() {
        let event = Event::new(
            "u1".into(),
            None,
            "p1".into(),
            "g1".into(),
            None,
            EventCategory::Insight,
            "x".repeat(400),
            Impact::Low,
        );
        let cost = estimate_token_cost(&[event], &[], &[]);
        assert_eq!(cost, 100);
    }
}
