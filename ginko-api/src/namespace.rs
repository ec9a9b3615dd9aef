use anyhow::Result;
use chrono::Utc;
use neo4rs::{query, Row};
use tracing::info;

use crate::errors::AppError;
use crate::graph::{parse_timestamp, GraphSession};
use crate::models::{Graph, GraphStatus, GraphVisibility};

/// CRUD over the `Project` node label — the graph namespace itself. Named
/// distinctly from `graph::GraphSession` (the session manager) to keep
/// "the store" and "a namespace within it" from colliding in imports.
#[derive(Clone)]
pub struct NamespaceService {
    session: GraphSession,
}

impl NamespaceService {
    pub fn new(session: GraphSession) -> Self {
        Self { session }
    }

    pub async fn create(
        &self,
        user_id: &str,
        project_name: &str,
        project_path: Option<&str>,
        visibility: GraphVisibility,
        organization: Option<&str>,
    ) -> Result<Graph> {
        let mut graph = Graph::new(user_id.to_string(), project_name.to_string(), project_path.map(String::from));
        graph.visibility = visibility;
        graph.organization = organization.map(String::from);
        graph.status = GraphStatus::Initializing;

        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    r#"CREATE (p:Project {
                        graphId: $graph_id, namespace: $namespace, projectName: $project_name,
                        projectPath: $project_path, visibility: $visibility, organization: $organization,
                        userId: $user_id, documentCounts: 0, status: $status, totalDocuments: 0,
                        createdAt: $created_at, updatedAt: $updated_at
                    })"#,
                )
                .param("graph_id", graph.graph_id.clone())
                .param("namespace", graph.namespace.clone())
                .param("project_name", graph.project_name.clone())
                .param("project_path", graph.project_path.clone())
                .param("visibility", visibility_str(graph.visibility))
                .param("organization", graph.organization.clone())
                .param("user_id", user_id)
                .param("status", status_str(graph.status))
                .param("created_at", graph.created_at.to_rfc3339())
                .param("updated_at", graph.updated_at.to_rfc3339()),
            )
            .await;

        match result {
            Ok(_) => {
                self.session.commit(txn).await?;
                graph.status = GraphStatus::Ready;
                info!(graph_id = %graph.graph_id, "namespace created");
                Ok(graph)
            }
            Err(e) => {
                self.session.rollback(txn).await;
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, graph_id: &str) -> Result<Option<Graph>, AppError> {
        let rows = self
            .session
            .read(
                query("MATCH (p:Project {graphId: $graph_id}) RETURN p").param("graph_id", graph_id),
                row_to_graph,
            )
            .await
            .map_err(|_| AppError::ServiceUnavailable)?;

        Ok(rows.into_iter().next())
    }

    /// Namespaces the caller owns. Team-membership-derived access is
    /// layered on by the caller joining against the identity store (access
    /// is restrictive — plain membership without owner/admin role does not
    /// widen `/user/graph` results, only capability resolution for a single
    /// known `graphId`).
    pub async fn list_owned(&self, user_id: &str) -> Result<Vec<Graph>> {
        self.session
            .read(
                query("MATCH (p:Project {userId: $user_id}) RETURN p ORDER BY p.createdAt")
                    .param("user_id", user_id),
                row_to_graph,
            )
            .await
    }

    pub async fn list_by_ids(&self, graph_ids: &[String]) -> Result<Vec<Graph>> {
        if graph_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.session
            .read(
                query("MATCH (p:Project) WHERE p.graphId IN $ids RETURN p").param("ids", graph_ids.to_vec()),
                row_to_graph,
            )
            .await
    }

    pub async fn touch_document_counts(&self, graph_id: &str, total_documents: i64) -> Result<()> {
        let mut txn = self.session.begin_write().await?;
        let result = txn
            .run(
                query(
                    "MATCH (p:Project {graphId: $graph_id}) SET p.totalDocuments = $total, p.updatedAt = $now",
                )
                .param("graph_id", graph_id)
                .param("total", total_documents)
                .param("now", Utc::now().to_rfc3339()),
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
}

fn visibility_str(v: GraphVisibility) -> &'static str {
    match v {
        GraphVisibility::Private => "private",
        GraphVisibility::Organization => "organization",
        GraphVisibility::Public => "public",
    }
}

fn status_str(s: GraphStatus) -> &'static str {
    match s {
        GraphStatus::Created => "created",
        GraphStatus::Initializing => "initializing",
        GraphStatus::Ready => "ready",
    }
}

fn row_to_graph(row: Row) -> Result<Graph> {
    let node: neo4rs::Node = row.get("p")?;
    let visibility = match node.get::<String>("visibility").unwrap_or_default().as_str() {
        "organization" => GraphVisibility::Organization,
        "public" => GraphVisibility::Public,
        _ => GraphVisibility::Private,
    };
    let status = match node.get::<String>("status").unwrap_or_default().as_str() {
        "created" => GraphStatus::Created,
        "ready" => GraphStatus::Ready,
        _ => GraphStatus::Initializing,
    };

    Ok(Graph {
        graph_id: node.get("graphId")?,
        namespace: node.get("namespace")?,
        project_name: node.get("projectName")?,
        project_path: node.get("projectPath").ok(),
        visibility,
        organization: node.get("organization").ok(),
        user_id: node.get("userId")?,
        document_counts: node.get("documentCounts").unwrap_or(0),
        status,
        total_documents: node.get("totalDocuments").unwrap_or(0),
        created_at: parse_timestamp(&node.get::<String>("createdAt")?),
        updated_at: parse_timestamp(&node.get::<String>("updatedAt")?),
        extra: Default::default(),
    })
}
