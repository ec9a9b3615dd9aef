use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph as Neo4jGraph, Query};
use tracing::{info, warn};

use crate::config::GraphConfig;

/// Parse an RFC3339 timestamp stored on a node property, falling back to
/// the current time if a row was ever written with a malformed value.
/// Shared by every entity module's row-mapping function.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Owns the pooled driver connection to the property graph store and
/// exposes `read`/`write` scopes, mirroring the teacher's `Database` wrapper
/// over `sqlx::PgPool` but against a Cypher-speaking backend.
#[derive(Clone)]
pub struct GraphSession {
    graph: Neo4jGraph,
}

impl GraphSession {
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let graph = Neo4jGraph::new(&config.uri, &config.user, &config.password)
            .await
            .map_err(|e| anyhow!("failed to connect to graph store: {e}"))?;

        info!("graph session pool established");
        Ok(Self { graph })
    }

    /// Run a read-only query and return every row, mapped by the caller.
    pub async fn read<T, F>(&self, q: Query, map: F) -> Result<Vec<T>>
    where
        F: Fn(neo4rs::Row) -> Result<T>,
    {
        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| anyhow!("graph read failed: {e}"))?;

        let mut out = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| anyhow!("graph read stream error: {e}"))?
        {
            out.push(map(row)?);
        }
        Ok(out)
    }

    /// Begin a write transaction. Callers MUST route every exit path
    /// through `commit` or `rollback` — there is no implicit release on
    /// drop, so a transaction that is neither committed nor rolled back
    /// leaks a server-side session until the driver times it out.
    pub async fn begin_write(&self) -> Result<neo4rs::Txn> {
        self.graph
            .start_txn()
            .await
            .map_err(|e| anyhow!("failed to start write transaction: {e}"))
    }

    pub async fn commit(&self, txn: neo4rs::Txn) -> Result<()> {
        txn.commit()
            .await
            .map_err(|e| anyhow!("failed to commit write transaction: {e}"))
    }

    pub async fn rollback(&self, txn: neo4rs::Txn) {
        if let Err(e) = txn.rollback().await {
            warn!(error = %e, "failed to roll back write transaction");
        }
    }

    /// Create indexes idempotently at startup, the Cypher-native counterpart
    /// to the teacher's `sqlx::migrate!`-driven `Database::migrate`.
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE INDEX project_graph_id IF NOT EXISTS FOR (p:Project) ON (p.graphId)",
            "CREATE INDEX project_namespace IF NOT EXISTS FOR (p:Project) ON (p.namespace)",
            "CREATE INDEX project_user_id IF NOT EXISTS FOR (p:Project) ON (p.userId)",
            "CREATE INDEX task_graph_lookup IF NOT EXISTS FOR (t:Task) ON (t.graph_id, t.id)",
            "CREATE INDEX event_id IF NOT EXISTS FOR (e:Event) ON (e.id)",
            "CREATE INDEX epic_graph_lookup IF NOT EXISTS FOR (e:Epic) ON (e.graphId, e.id)",
            "CREATE INDEX sprint_graph_lookup IF NOT EXISTS FOR (s:Sprint) ON (s.graphId, s.id)",
            "CREATE INDEX agent_id IF NOT EXISTS FOR (a:Agent) ON (a.id)",
        ];

        for stmt in statements {
            self.graph
                .run(query(stmt))
                .await
                .map_err(|e| anyhow!("failed to apply schema statement `{stmt}`: {e}"))?;
        }

        info!("graph schema indexes ensured");
        Ok(())
    }

    pub fn driver(&self) -> &Neo4jGraph {
        &self.graph
    }
}

impl std::fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSession").finish_non_exhaustive()
    }
}
