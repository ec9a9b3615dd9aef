use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::Sse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::Principal;
use crate::errors::{AppError, AppResult};
use crate::models::{
    Agent, AgentStatus, Checkpoint, Epic, EntityStatus, Event, EventCategory, Graph,
    GraphVisibility, Impact, Role, Sprint, Task, TeamInvitation, TeamMember, UserActivity,
};
use crate::state::AppState;
use crate::stream::StreamFilter;

/// Mirrors the teacher's per-endpoint request/response structs in `api.rs`:
/// one pair per handler, deserialized straight off the wire with serde's
/// default camelCase rename so the JSON contract matches what a JS/TS client
/// expects while the Rust side stays snake_case.

// --- Graph -------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInitRequest {
    pub project_name: String,
    pub project_path: Option<String>,
    #[serde(default)]
    pub visibility: Option<GraphVisibility>,
    pub organization: Option<String>,
    pub team_name: Option<String>,
}

pub async fn graph_init(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<GraphInitRequest>,
) -> AppResult<Json<Graph>> {
    let graph = state
        .namespaces
        .create(
            &principal.user_id,
            &req.project_name,
            req.project_path.as_deref(),
            req.visibility.unwrap_or(GraphVisibility::Private),
            req.organization.as_deref(),
        )
        .await
        .map_err(AppError::Internal)?;

    let team_name = req.team_name.unwrap_or_else(|| req.project_name.clone());
    if let Err(e) = state.identity.create_team(&graph.graph_id, &team_name, &principal.user_id).await {
        tracing::warn!(error = %e, graph_id = %graph.graph_id, "failed to create owning team for new graph");
    }

    Ok(Json(graph))
}

pub async fn get_graph(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(graph_id): Path<String>,
) -> AppResult<Json<Graph>> {
    state.access.resolve(&principal, &graph_id, crate::models::Capability::Read).await?;
    state
        .namespaces
        .get(&graph_id)
        .await?
        .ok_or(AppError::GraphNotFound)
        .map(Json)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGraphProject {
    #[serde(flatten)]
    pub graph: Graph,
    pub source: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGraphResponse {
    pub default_graph_id: Option<String>,
    pub source: &'static str,
    pub projects: Vec<UserGraphProject>,
}

/// `GET /user/graph`: owned namespaces plus namespaces reached through
/// `owner`/`admin` team membership, restrictive per the access model — a
/// listed project only ever reflects a `graphId` the caller can already
/// resolve capabilities for, and plain `member`/`viewer` team roles never
/// widen the set of graphs this listing surfaces (the permissive variant
/// that surfaced those is the privilege-escalation gap §9 closes).
pub async fn user_graph(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
) -> AppResult<Json<UserGraphResponse>> {
    let owned = state.namespaces.list_owned(&principal.user_id).await.map_err(AppError::Internal)?;
    let owned_ids: std::collections::HashSet<&str> = owned.iter().map(|g| g.graph_id.as_str()).collect();

    let member_teams = state
        .identity
        .list_teams_for_member(&principal.user_id)
        .await
        .map_err(AppError::Internal)?;
    let team_graph_ids: Vec<String> = member_teams
        .into_iter()
        .map(|t| t.graph_id)
        .filter(|id| !owned_ids.contains(id.as_str()))
        .collect();
    let team_graphs = state.namespaces.list_by_ids(&team_graph_ids).await.map_err(AppError::Internal)?;

    let default_graph_id = state
        .config
        .default_graph_id
        .clone()
        .or_else(|| owned.first().map(|g| g.graph_id.clone()));

    let has_owned = !owned.is_empty();
    let has_team = !team_graphs.is_empty();

    let mut projects: Vec<UserGraphProject> = owned
        .into_iter()
        .map(|graph| UserGraphProject { graph, source: "owner" })
        .collect();
    projects.extend(team_graphs.into_iter().map(|graph| UserGraphProject { graph, source: "team_member" }));

    let source = if has_owned {
        "owner"
    } else if has_team {
        "team_member"
    } else {
        "none"
    };

    Ok(Json(UserGraphResponse { default_graph_id, source, projects }))
}

// --- Events --------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEventRequest {
    pub id: Option<String>,
    pub project_id: String,
    pub graph_id: String,
    pub branch: Option<String>,
    pub category: EventCategory,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub impact: Impact,
    pub pressure: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub shared: bool,
    pub commit_hash: Option<String>,
}

impl Default for Impact {
    fn default() -> Self {
        Impact::Low
    }
}

pub async fn publish_event(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<PublishEventRequest>,
) -> AppResult<Json<Event>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;

    let mut event = Event::new(
        principal.user_id.clone(),
        principal.organization_id.clone(),
        req.project_id,
        req.graph_id.clone(),
        req.branch,
        req.category,
        req.description,
        req.impact,
    );
    if let Some(id) = req.id {
        event.id = id;
    }
    event.files = req.files;
    event.pressure = req.pressure;
    event.tags = req.tags;
    event.shared = req.shared;
    event.commit_hash = req.commit_hash;

    let category_label = format!("{:?}", event.category);
    let stored = state.events.append(event).await.map_err(AppError::Internal)?;
    state.metrics.record_event_appended(&req.graph_id, &category_label);

    Ok(Json(stored))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsBackwardQuery {
    pub graph_id: String,
    pub anchor: String,
    pub limit: Option<usize>,
    pub categories: Option<Vec<EventCategory>>,
}

pub async fn read_events_backward(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Query(q): Query<EventsBackwardQuery>,
) -> AppResult<Json<Vec<Event>>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;

    let events = state
        .cursors
        .read_backward(&q.anchor, q.limit.unwrap_or(50), q.categories.as_deref())
        .await
        .map_err(AppError::Internal)?
        .ok_or(AppError::CursorNotFound)?;

    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub graph_id: String,
    pub since: Option<String>,
    pub categories: Option<Vec<EventCategory>>,
    pub agent_id: Option<String>,
    pub wait_seconds: Option<u64>,
}

pub async fn events_stream(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Query(q): Query<StreamQuery>,
) -> AppResult<Json<crate::stream::LongPollResponse>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;

    let filter = StreamFilter {
        graph_id: q.graph_id,
        since: q.since,
        categories: q.categories,
        agent_id: q.agent_id,
    };
    let wait = q.wait_seconds.map(std::time::Duration::from_secs);

    let response = state.stream.poll_since(&filter, wait).await.map_err(AppError::Internal)?;
    Ok(Json(response))
}

pub async fn events_sse(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Query(q): Query<StreamQuery>,
) -> AppResult<Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;

    state.metrics.record_sse_connection_change(1);
    let filter = StreamFilter {
        graph_id: q.graph_id,
        since: q.since,
        categories: q.categories,
        agent_id: q.agent_id,
    };
    Ok(state.stream.sse(filter))
}

// --- Context ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialLoadQuery {
    pub graph_id: String,
    pub project_id: String,
    pub principal_limit: Option<usize>,
    pub team_limit: Option<usize>,
    pub document_depth: Option<u32>,
}

pub async fn context_initial_load(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Query(q): Query<InitialLoadQuery>,
) -> AppResult<Json<crate::context::InitialLoad>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;

    let result = state
        .context
        .initial_load(crate::context::InitialLoadRequest {
            graph_id: &q.graph_id,
            project_id: &q.project_id,
            user_id: &principal.user_id,
            principal_limit: q.principal_limit.unwrap_or(20),
            team_limit: q.team_limit.unwrap_or(20),
            document_depth: q.document_depth,
        })
        .await?;

    Ok(Json(result))
}

// --- Epic --------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicCheckRequest {
    pub graph_id: String,
    pub id: String,
}

pub async fn epic_check(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<EpicCheckRequest>,
) -> AppResult<Json<crate::epic::EpicCheckResult>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Read).await?;
    let result = state.epics.check(&req.graph_id, &req.id).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicDecomposeRequest {
    pub graph_id: String,
    pub id: String,
}

pub async fn epic_decompose(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<EpicDecomposeRequest>,
) -> AppResult<Json<Vec<crate::ai::TaskSuggestion>>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Read).await?;
    let epic = state.epics.get(&req.graph_id, &req.id).await?;
    let suggestions = state.ai.decompose(&epic.title, &epic.content).await?;
    Ok(Json(suggestions))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicCreateRequest {
    pub graph_id: String,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
}

pub async fn epic_create(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<EpicCreateRequest>,
) -> AppResult<Json<Epic>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    let epic = state
        .epics
        .create(&req.graph_id, &req.id, &req.title, &principal.user_id, &req.content)
        .await?;
    Ok(Json(epic))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityLookupQuery {
    pub graph_id: String,
}

pub async fn epic_get(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Query(q): Query<EntityLookupQuery>,
) -> AppResult<Json<Epic>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let epic = state.epics.get(&q.graph_id, &id).await?;
    Ok(Json(epic))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStatusRequest {
    pub graph_id: String,
    pub status: EntityStatus,
}

pub async fn epic_transition_status(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<EntityStatusRequest>,
) -> AppResult<Json<Epic>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    let epic = state
        .epics
        .transition_status(&req.graph_id, &id, req.status, &principal.user_id)
        .await?;
    state.metrics.record_status_transition("Epic", crate::epic::status_str(req.status));
    Ok(Json(epic))
}

// --- Sprint --------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintCreateRequest {
    pub graph_id: String,
    pub id: String,
    pub epic_id: String,
    pub title: String,
}

pub async fn sprint_create(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<SprintCreateRequest>,
) -> AppResult<Json<Sprint>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    let sprint = state.sprints.create(&req.graph_id, &req.id, &req.epic_id, &req.title).await?;
    Ok(Json(sprint))
}

pub async fn sprint_get(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Query(q): Query<EntityLookupQuery>,
) -> AppResult<Json<Sprint>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let sprint = state.sprints.get(&q.graph_id, &id).await?;
    Ok(Json(sprint))
}

pub async fn sprint_transition_status(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<EntityStatusRequest>,
) -> AppResult<Json<Sprint>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    let sprint = state
        .sprints
        .transition_status(&req.graph_id, &id, req.status, &principal.user_id)
        .await?;
    state.metrics.record_status_transition("Sprint", crate::epic::status_str(req.status));
    Ok(Json(sprint))
}

// --- Task ------------------------------------------------------------------

pub async fn task_get(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Query(q): Query<EntityLookupQuery>,
) -> AppResult<Json<Task>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let task = state.tasks.get(&q.graph_id, &id).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusRequest {
    pub graph_id: String,
    pub status: String,
    pub reason: Option<String>,
}

pub async fn task_transition_status(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<TaskStatusRequest>,
) -> AppResult<Json<Task>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    let task = state
        .tasks
        .transition_status(&req.graph_id, &id, &req.status, &principal.user_id, req.reason.as_deref())
        .await?;
    state.metrics.record_status_transition("Task", &req.status);
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskClaimRequest {
    pub graph_id: String,
    pub agent_id: String,
    pub organization_id: Option<String>,
}

pub async fn task_claim(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<TaskClaimRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;

    let result = state
        .tasks
        .claim(&req.graph_id, &id, &req.agent_id, req.organization_id.as_deref())
        .await;

    state.metrics.record_task_claim(matches!(result, Err(AppError::AlreadyClaimed)));
    result?;
    Ok(Json(json!({ "claimed": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReleaseRequest {
    pub graph_id: String,
    pub agent_id: String,
}

pub async fn task_release(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<TaskReleaseRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    state.tasks.release(&req.graph_id, &id, &req.agent_id).await?;
    Ok(Json(json!({ "released": true })))
}

pub async fn task_activity(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Query(q): Query<EntityLookupQuery>,
) -> AppResult<Json<crate::activity::TaskActivitySummary>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let summary = state.activity.task_hotness(&q.graph_id, &id).await.map_err(AppError::Internal)?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointCreateRequest {
    pub graph_id: String,
    pub agent_id: String,
    pub git_commit: Option<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub events_since: i64,
    pub message: Option<String>,
}

pub async fn task_checkpoint_create(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Json(req): Json<CheckpointCreateRequest>,
) -> AppResult<Json<Checkpoint>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    let checkpoint = Checkpoint::new(
        req.graph_id,
        id,
        req.agent_id,
        req.git_commit,
        req.files_modified,
        req.events_since,
        req.message,
    );
    let stored = state.checkpoints.create(checkpoint).await?;
    Ok(Json(stored))
}

pub async fn task_checkpoint_list(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path(id): Path<String>,
    Query(q): Query<EntityLookupQuery>,
) -> AppResult<Json<Vec<Checkpoint>>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let checkpoints = state.checkpoints.list_for_task(&q.graph_id, &id).await?;
    Ok(Json(checkpoints))
}

// --- Agent -------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHeartbeatRequest {
    pub agent_id: String,
    pub organization_id: Option<String>,
    #[serde(default = "default_agent_status")]
    pub status: AgentStatus,
}

fn default_agent_status() -> AgentStatus {
    AgentStatus::Active
}

pub async fn agent_heartbeat(
    State(state): State<AppState>,
    axum::Extension(_principal): axum::Extension<Principal>,
    Json(req): Json<AgentHeartbeatRequest>,
) -> AppResult<Json<Agent>> {
    let agent = state
        .agents
        .heartbeat(&req.agent_id, req.organization_id.as_deref(), req.status)
        .await?;
    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAgentsQuery {
    pub organization_id: String,
}

pub async fn agent_list_active(
    State(state): State<AppState>,
    axum::Extension(_principal): axum::Extension<Principal>,
    Query(q): Query<ActiveAgentsQuery>,
) -> AppResult<Json<Vec<Agent>>> {
    let agents = state.agents.list_active(&q.organization_id).await?;
    Ok(Json(agents))
}

// --- Team ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamJoinPreviewQuery {
    pub code: String,
}

pub async fn team_join_preview(
    State(state): State<AppState>,
    axum::Extension(_principal): axum::Extension<Principal>,
    Query(q): Query<TeamJoinPreviewQuery>,
) -> AppResult<Json<TeamInvitation>> {
    let invitation = state.teams.preview(&q.code).await?;
    Ok(Json(invitation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamJoinAcceptRequest {
    pub code: String,
    pub organization_id: Option<String>,
}

pub async fn team_join_accept(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<TeamJoinAcceptRequest>,
) -> AppResult<Json<TeamMember>> {
    let member = state
        .teams
        .accept(&req.code, &principal.user_id, req.organization_id.as_deref())
        .await?;
    state.metrics.record_team_membership_change("join");
    Ok(Json(member))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamActivityQuery {
    pub graph_id: String,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub category: Option<EventCategory>,
    pub member_id: Option<String>,
}

pub async fn team_activity(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Query(q): Query<TeamActivityQuery>,
) -> AppResult<Json<Vec<Event>>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let categories = q.category.map(|c| vec![c]);
    let events = state
        .events
        .list_paged(
            &q.graph_id,
            q.limit.unwrap_or(50),
            q.offset.unwrap_or(0),
            q.since.as_ref(),
            categories.as_deref(),
            q.member_id.as_deref(),
        )
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(events))
}

pub async fn team_members_list(
    State(state): State<AppState>,
    axum::Extension(_principal): axum::Extension<Principal>,
    Path(team_id): Path<String>,
) -> AppResult<Json<Vec<TeamMember>>> {
    let members = state.teams.list_members(&team_id).await?;
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamInviteRequest {
    pub email: String,
    #[serde(default = "default_invite_role")]
    pub role: Role,
    #[serde(default = "default_invite_expiry_days")]
    pub expires_in_days: i64,
}

fn default_invite_role() -> Role {
    Role::Member
}

fn default_invite_expiry_days() -> i64 {
    7
}

pub async fn team_invite(
    State(state): State<AppState>,
    axum::Extension(_principal): axum::Extension<Principal>,
    Path(team_id): Path<String>,
    Json(req): Json<TeamInviteRequest>,
) -> AppResult<Json<TeamInvitation>> {
    let invitation = state.teams.invite(&team_id, &req.email, req.role, req.expires_in_days).await?;
    Ok(Json(invitation))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberQuery {
    pub organization_id: Option<String>,
}

pub async fn team_remove_member(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Path((team_id, user_id)): Path<(String, String)>,
    Query(q): Query<RemoveMemberQuery>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .teams
        .remove_member(&team_id, &principal.user_id, &user_id, q.organization_id.as_deref())
        .await?;
    state.metrics.record_team_membership_change("remove");
    Ok(Json(json!({ "removed": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSyncRequest {
    pub team_id: String,
}

pub async fn membership_sync(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<MembershipSyncRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state.teams.touch_membership_sync(&req.team_id, &principal.user_id).await?;
    Ok(Json(json!({ "synced": true })))
}

// --- User activity -----------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityRequest {
    pub graph_id: String,
    pub activity_type: crate::models::ActivityType,
}

pub async fn record_user_activity(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Json(req): Json<UserActivityRequest>,
) -> AppResult<Json<serde_json::Value>> {
    state.access.resolve(&principal, &req.graph_id, crate::models::Capability::Write).await?;
    state
        .activity
        .record(&req.graph_id, &principal.user_id, req.activity_type)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "recorded": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityQuery {
    pub graph_id: String,
    pub user_id: Option<String>,
}

pub async fn get_user_activity(
    State(state): State<AppState>,
    axum::Extension(principal): axum::Extension<Principal>,
    Query(q): Query<UserActivityQuery>,
) -> AppResult<Json<Option<UserActivity>>> {
    state.access.resolve(&principal, &q.graph_id, crate::models::Capability::Read).await?;
    let user_id = q.user_id.as_deref().unwrap_or(&principal.user_id);
    let activity = state.activity.get(&q.graph_id, user_id).await.map_err(AppError::Internal)?;
    Ok(Json(activity))
}

// --- Billing -------------------------------------------------------------

/// `POST /webhooks/stripe`: the raw request body and `stripe-signature`
/// header are needed verbatim for HMAC verification, so this handler takes
/// the body as bytes rather than a `Json<T>` extractor the way every other
/// handler does.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    state.billing.handle(&body, signature).await?;
    state.metrics.record_billing_webhook("stripe");
    Ok(Json(json!({ "received": true })))
}

// --- Health --------------------------------------------------------------

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
