use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::{
    InvitationStatus, Organization, PaymentStatus, Role, SubscriptionStatus, Team, TeamInvitation,
    TeamMember,
};

/// The relational identity/billing store: teams, memberships, invitations,
/// organizations, and the billing audit log. Mirrors the teacher's
/// `Database` connection-pool pattern (`database.rs`), scoped to the
/// entities that stay relational rather than graph-native per the data
/// model's deliberate split.
#[derive(Clone)]
pub struct IdentityStore {
    pool: PgPool,
}

impl IdentityStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("identity store connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("identity store migrations completed");
        Ok(())
    }

    // --- Teams -----------------------------------------------------------

    pub async fn create_team(&self, graph_id: &str, name: &str, owner_user_id: &str) -> Result<Team> {
        let team_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO teams (id, graph_id, name, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&team_id)
        .bind(graph_id)
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES ($1, $2, 'owner', $3)",
        )
        .bind(&team_id)
        .bind(owner_user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Team {
            id: team_id,
            graph_id: graph_id.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    pub async fn get_team_by_graph_id(&self, graph_id: &str) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT id, graph_id, name, created_at FROM teams WHERE graph_id = $1")
            .bind(graph_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Team {
            id: r.get("id"),
            graph_id: r.get("graph_id"),
            name: r.get("name"),
            created_at: r.get("created_at"),
        }))
    }

    /// Teams the user belongs to with `owner`/`admin` role — the basis for
    /// the team-membership branch of `/user/graph`'s namespace listing.
    /// Plain `member`/`viewer` roles grant capabilities on a `graphId` the
    /// caller already names (see `access.rs`) but must not widen the set of
    /// graphs this listing surfaces; that is the privilege-escalation gap
    /// the restrictive semantics close.
    pub async fn list_teams_for_member(&self, user_id: &str) -> Result<Vec<Team>> {
        let rows = sqlx::query(
            r#"SELECT t.id, t.graph_id, t.name, t.created_at
               FROM teams t
               JOIN team_members m ON m.team_id = t.id
               WHERE m.user_id = $1 AND m.role IN ('owner', 'admin')"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Team {
                id: r.get("id"),
                graph_id: r.get("graph_id"),
                name: r.get("name"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn get_membership(&self, team_id: &str, user_id: &str) -> Result<Option<TeamMember>> {
        let row = sqlx::query(
            "SELECT team_id, user_id, role, joined_at, last_sync_at FROM team_members WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_member))
    }

    pub async fn list_members(&self, team_id: &str) -> Result<Vec<TeamMember>> {
        let rows = sqlx::query(
            "SELECT team_id, user_id, role, joined_at, last_sync_at FROM team_members WHERE team_id = $1 ORDER BY joined_at",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_member).collect())
    }

    pub async fn owner_count(&self, team_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM team_members WHERE team_id = $1 AND role = 'owner'",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn add_member(&self, team_id: &str, user_id: &str, role: Role) -> Result<()> {
        sqlx::query(
            "INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(team_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, team_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM team_members WHERE team_id = $1 AND user_id = $2")
            .bind(team_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch_member_sync(&self, team_id: &str, user_id: &str, synced_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE team_members SET last_sync_at = $3 WHERE team_id = $1 AND user_id = $2",
        )
        .bind(team_id)
        .bind(user_id)
        .bind(synced_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Invitations -------------------------------------------------------

    pub async fn create_invitation(
        &self,
        team_id: &str,
        code: &str,
        email: &str,
        role: Role,
        expires_at: DateTime<Utc>,
    ) -> Result<TeamInvitation> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"INSERT INTO team_invitations (id, team_id, code, email, role, status, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)"#,
        )
        .bind(&id)
        .bind(team_id)
        .bind(code)
        .bind(email)
        .bind(role.as_str())
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(TeamInvitation {
            id,
            team_id: team_id.to_string(),
            code: code.to_string(),
            email: email.to_string(),
            role,
            status: InvitationStatus::Pending,
            expires_at,
            created_at: now,
        })
    }

    pub async fn get_invitation_by_code(&self, code: &str) -> Result<Option<TeamInvitation>> {
        let row = sqlx::query(
            "SELECT id, team_id, code, email, role, status, expires_at, created_at FROM team_invitations WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_invitation))
    }

    pub async fn set_invitation_status(&self, id: &str, status: InvitationStatus) -> Result<()> {
        sqlx::query("UPDATE team_invitations SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(invitation_status_str(status))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Organizations -----------------------------------------------------

    pub async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let row = sqlx::query(
            r#"SELECT id, stripe_customer_id, stripe_subscription_id, subscription_status,
                      plan_tier, seat_count, payment_status, payment_attempt_count,
                      last_payment_at, payment_failed_at
               FROM organizations WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_org))
    }

    pub async fn get_organization_by_customer_id(&self, customer_id: &str) -> Result<Option<Organization>> {
        let row = sqlx::query(
            r#"SELECT id, stripe_customer_id, stripe_subscription_id, subscription_status,
                      plan_tier, seat_count, payment_status, payment_attempt_count,
                      last_payment_at, payment_failed_at
               FROM organizations WHERE stripe_customer_id = $1"#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_org))
    }

    pub async fn upsert_organization(&self, org: &Organization) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO organizations
                 (id, stripe_customer_id, stripe_subscription_id, subscription_status,
                  plan_tier, seat_count, payment_status, payment_attempt_count,
                  last_payment_at, payment_failed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (id) DO UPDATE SET
                 stripe_customer_id = EXCLUDED.stripe_customer_id,
                 stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                 subscription_status = EXCLUDED.subscription_status,
                 plan_tier = EXCLUDED.plan_tier,
                 seat_count = EXCLUDED.seat_count,
                 payment_status = EXCLUDED.payment_status,
                 payment_attempt_count = EXCLUDED.payment_attempt_count,
                 last_payment_at = EXCLUDED.last_payment_at,
                 payment_failed_at = EXCLUDED.payment_failed_at"#,
        )
        .bind(&org.id)
        .bind(&org.stripe_customer_id)
        .bind(&org.stripe_subscription_id)
        .bind(subscription_status_str(org.subscription_status))
        .bind(&org.plan_tier)
        .bind(org.seat_count)
        .bind(payment_status_str(org.payment_status))
        .bind(org.payment_attempt_count)
        .bind(org.last_payment_at)
        .bind(org.payment_failed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Billing audit log --------------------------------------------------

    /// Append-only audit trail of dispatched webhook events, keyed by the
    /// provider's event id for idempotence. Swallows failures: audit logging
    /// must never fail the webhook response.
    pub async fn record_billing_event(&self, provider_event_id: &str, event_type: &str, payload: &Value) {
        let result = sqlx::query(
            r#"INSERT INTO billing_events (id, provider_event_id, event_type, payload, created_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (provider_event_id) DO NOTHING"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(provider_event_id)
        .bind(event_type)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(error = %e, provider_event_id, "failed to record billing audit event");
        }
    }

    /// True if this provider event id has already been recorded — the basis
    /// for webhook idempotence beyond the audit log.
    pub async fn has_processed_billing_event(&self, provider_event_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 as present FROM billing_events WHERE provider_event_id = $1")
            .bind(provider_event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

fn row_to_member(row: sqlx::postgres::PgRow) -> TeamMember {
    let role_str: String = row.get("role");
    TeamMember {
        team_id: row.get("team_id"),
        user_id: row.get("user_id"),
        role: Role::parse(&role_str).unwrap_or(Role::Viewer),
        joined_at: row.get("joined_at"),
        last_sync_at: row.get("last_sync_at"),
    }
}

fn row_to_invitation(row: sqlx::postgres::PgRow) -> TeamInvitation {
    let role_str: String = row.get("role");
    let status_str: String = row.get("status");
    TeamInvitation {
        id: row.get("id"),
        team_id: row.get("team_id"),
        code: row.get("code"),
        email: row.get("email"),
        role: Role::parse(&role_str).unwrap_or(Role::Viewer),
        status: match status_str.as_str() {
            "pending" => InvitationStatus::Pending,
            "accepted" => InvitationStatus::Accepted,
            "revoked" => InvitationStatus::Revoked,
            _ => InvitationStatus::Expired,
        },
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn invitation_status_str(status: InvitationStatus) -> &'static str {
    match status {
        InvitationStatus::Pending => "pending",
        InvitationStatus::Accepted => "accepted",
        InvitationStatus::Expired => "expired",
        InvitationStatus::Revoked => "revoked",
    }
}

fn row_to_org(row: sqlx::postgres::PgRow) -> Organization {
    let sub_status: String = row.get("subscription_status");
    let pay_status: String = row.get("payment_status");
    Organization {
        id: row.get("id"),
        stripe_customer_id: row.get("stripe_customer_id"),
        stripe_subscription_id: row.get("stripe_subscription_id"),
        subscription_status: match sub_status.as_str() {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "trialing" => SubscriptionStatus::Trialing,
            _ => SubscriptionStatus::None,
        },
        plan_tier: row.get("plan_tier"),
        seat_count: row.get("seat_count"),
        payment_status: if pay_status == "failed" {
            PaymentStatus::Failed
        } else {
            PaymentStatus::Ok
        },
        payment_attempt_count: row.get("payment_attempt_count"),
        last_payment_at: row.get("last_payment_at"),
        payment_failed_at: row.get("payment_failed_at"),
    }
}

fn subscription_status_str(status: SubscriptionStatus) -> &'static str {
    match status {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::PastDue => "past_due",
        SubscriptionStatus::Canceled => "canceled",
        SubscriptionStatus::Trialing => "trialing",
        SubscriptionStatus::None => "none",
    }
}

fn payment_status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Ok => "ok",
        PaymentStatus::Failed => "failed",
    }
}
