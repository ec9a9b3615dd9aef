use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A multi-tenant namespace. Owns every other graph-native entity via
/// `graph_id`; never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub graph_id: String,
    pub namespace: String,
    pub project_name: String,
    pub project_path: Option<String>,
    pub visibility: GraphVisibility,
    pub organization: Option<String>,
    pub user_id: String,
    pub document_counts: i64,
    pub status: GraphStatus,
    pub total_documents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphVisibility {
    Private,
    Organization,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphStatus {
    Created,
    Initializing,
    Ready,
}

impl Graph {
    pub fn new(user_id: String, project_name: String, project_path: Option<String>) -> Self {
        let now = Utc::now();
        let graph_id = Uuid::new_v4().to_string();
        Self {
            namespace: format!("ns_{}", graph_id),
            graph_id,
            project_name,
            project_path,
            visibility: GraphVisibility::Private,
            organization: None,
            user_id,
            document_counts: 0,
            status: GraphStatus::Created,
            total_documents: 0,
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }
}

/// An immutable, append-only stream entry. Linked into a total order by
/// `:NEXT` edges within `(project_id, branch)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub user_id: String,
    pub organization_id: Option<String>,
    pub project_id: String,
    pub graph_id: String,
    pub branch: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub category: EventCategory,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub impact: Impact,
    pub pressure: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub shared: bool,
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Fix,
    Feature,
    Decision,
    Insight,
    Git,
    Achievement,
    StatusChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: String,
        organization_id: Option<String>,
        project_id: String,
        graph_id: String,
        branch: Option<String>,
        category: EventCategory,
        description: String,
        impact: Impact,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            organization_id,
            project_id,
            graph_id,
            branch,
            timestamp: Utc::now(),
            category,
            description,
            files: Vec::new(),
            impact,
            pressure: None,
            tags: Vec::new(),
            shared: false,
            commit_hash: None,
        }
    }

    /// Events counted toward "team activity": shared or high-impact
    /// decisions, achievements, and git events.
    pub fn is_team_worthy(&self) -> bool {
        matches!(
            self.category,
            EventCategory::Decision | EventCategory::Achievement | EventCategory::Git
        ) && (self.shared || self.impact == Impact::High)
    }
}

/// A named read head pinned at one event within a `(project_id, branch)`
/// partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCursor {
    pub id: String,
    pub organization_id: Option<String>,
    pub project_id: String,
    pub branch: Option<String>,
    pub current_event_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Draft,
    Proposed,
    Committed,
    InProgress,
    Complete,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub graph_id: String,
    pub title: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: EntityStatus,
    pub content: String,
}

impl Epic {
    /// Canonicalize a free-form id into `EPIC-###` (zero-padded to 3 digits,
    /// wider if the number itself is wider).
    pub fn canonical_id(raw: &str) -> Option<String> {
        canonicalize_id(raw, "EPIC")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub graph_id: String,
    pub epic_id: String,
    pub title: String,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sprint {
    pub fn canonical_id(raw: &str) -> Option<String> {
        canonicalize_id(raw, "SPRINT")
    }
}

fn canonicalize_id(raw: &str, prefix: &str) -> Option<String> {
    let raw = raw.trim();
    let upper = raw.to_uppercase();
    let digits: String = if let Some(rest) = upper.strip_prefix(&format!("{}-", prefix)) {
        rest.chars().filter(|c| c.is_ascii_digit()).collect()
    } else {
        upper.chars().filter(|c| c.is_ascii_digit()).collect()
    };
    if digits.is_empty() {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    Some(format!("{}-{:03}", prefix, n))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Blocked,
    Complete,
}

impl TaskStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Complete => "complete",
        }
    }

    /// `not_started -> in_progress -> complete`; `in_progress <-> blocked`;
    /// resetting to `not_started` from anywhere else is disallowed.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if *self == next {
            return true; // no-op transitions are handled, never rejected
        }
        matches!(
            (*self, next),
            (NotStarted, InProgress)
                | (InProgress, Complete)
                | (InProgress, Blocked)
                | (Blocked, InProgress)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub graph_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub status_updated_at: DateTime<Utc>,
    pub status_updated_by: String,
    pub blocked_reason: Option<String>,
    pub assignee: Option<String>,
    pub claimed_by_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Busy,
    Idle,
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub organization_id: Option<String>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub graph_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub git_commit: Option<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub events_since: i64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        graph_id: String,
        task_id: String,
        agent_id: String,
        git_commit: Option<String>,
        files_modified: Vec<String>,
        events_since: i64,
        message: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            graph_id,
            task_id,
            agent_id,
            git_commit,
            files_modified,
            events_since,
            message,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SessionStart,
    TaskStart,
    TaskComplete,
    TaskBlock,
    EventLogged,
}

impl ActivityType {
    pub fn from_task_status(status: TaskStatus) -> Option<Self> {
        match status {
            TaskStatus::InProgress => Some(Self::TaskStart),
            TaskStatus::Complete => Some(Self::TaskComplete),
            TaskStatus::Blocked => Some(Self::TaskBlock),
            TaskStatus::NotStarted => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivity {
    pub graph_id: String,
    pub user_id: String,
    pub last_activity_at: DateTime<Utc>,
    pub last_activity_type: ActivityType,
    pub session_count: i64,
}

/// Classification bands for a task's `hotness` score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HotnessLevel {
    Cold,
    Warm,
    Hot,
    Blazing,
}

impl HotnessLevel {
    pub fn classify(score: u32) -> Self {
        match score {
            0 => Self::Cold,
            1..=29 => Self::Warm,
            30..=69 => Self::Hot,
            _ => Self::Blazing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Read,
    Write,
    Admin,
}

impl Capability {
    /// `role → capability set`, per the restrictive `/user/graph` semantics:
    /// owner/admin get full access, member gets read+write, viewer gets
    /// read-only.
    pub fn set_for_role(role: Role) -> &'static [Capability] {
        match role {
            Role::Owner | Role::Admin => &[Capability::Read, Capability::Write, Capability::Admin],
            Role::Member => &[Capability::Read, Capability::Write],
            Role::Viewer => &[Capability::Read],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub graph_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub team_id: String,
    pub user_id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamInvitation {
    pub id: String,
    pub team_id: String,
    pub code: String,
    pub email: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TeamInvitation {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Trialing,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_status: SubscriptionStatus,
    pub plan_tier: String,
    pub seat_count: i32,
    pub payment_status: PaymentStatus,
    pub payment_attempt_count: i32,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub payment_failed_at: Option<DateTime<Utc>>,
}

impl Default for Organization {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            subscription_status: SubscriptionStatus::None,
            plan_tier: "free".to_string(),
            seat_count: 2,
            payment_status: PaymentStatus::Ok,
            payment_attempt_count: 0,
            last_payment_at: None,
            payment_failed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epic_id_canonicalization() {
        assert_eq!(Epic::canonical_id("epic-7").as_deref(), Some("EPIC-007"));
        assert_eq!(Epic::canonical_id("EPIC-042").as_deref(), Some("EPIC-042"));
        assert_eq!(Epic::canonical_id("7").as_deref(), Some("EPIC-007"));
        assert_eq!(Epic::canonical_id("no-digits-here"), None);
    }

    #[test]
    fn task_status_transitions() {
        assert!(TaskStatus::NotStarted.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Complete));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Blocked));
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Complete.can_transition_to(TaskStatus::NotStarted));
        assert!(!TaskStatus::NotStarted.can_transition_to(TaskStatus::Complete));
        assert!(TaskStatus::Complete.can_transition_to(TaskStatus::Complete));
    }

    #[test]
    fn hotness_classification_bands() {
        assert_eq!(HotnessLevel::classify(0), HotnessLevel::Cold);
        assert_eq!(HotnessLevel::classify(29), HotnessLevel::Warm);
        assert_eq!(HotnessLevel::classify(30), HotnessLevel::Hot);
        assert_eq!(HotnessLevel::classify(100), HotnessLevel::Blazing);
    }

    #[test]
    fn capability_sets_are_restrictive_by_role() {
        assert_eq!(
            Capability::set_for_role(Role::Viewer),
            &[Capability::Read]
        );
        assert_eq!(
            Capability::set_for_role(Role::Member),
            &[Capability::Read, Capability::Write]
        );
        assert!(Capability::set_for_role(Role::Admin).contains(&Capability::Admin));
    }
}
