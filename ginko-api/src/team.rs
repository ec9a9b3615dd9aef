use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::warn;

use crate::errors::{AppError, AppResult};
use crate::identity::IdentityStore;
use crate::models::{InvitationStatus, Role, TeamInvitation, TeamMember};

/// Notified on every membership change so the provider-side subscription
/// quantity can be kept in sync. Modeled as a trait, the same seam the
/// identity provider uses, so `billing::BillingService` can implement it
/// without `team.rs` depending on the Stripe HTTP client directly.
#[async_trait]
pub trait SeatSyncNotifier: Send + Sync {
    async fn sync_seats(&self, organization_id: &str, seat_count: i64);
}

/// No-op notifier for organizations that have no billing relationship yet.
pub struct NoopSeatSync;

#[async_trait]
impl SeatSyncNotifier for NoopSeatSync {
    async fn sync_seats(&self, _organization_id: &str, _seat_count: i64) {}
}

#[derive(Clone)]
pub struct TeamService {
    identity: IdentityStore,
    seat_sync: Arc<dyn SeatSyncNotifier>,
}

const INVITATION_CODE_LEN: usize = 24;

impl TeamService {
    pub fn new(identity: IdentityStore, seat_sync: Arc<dyn SeatSyncNotifier>) -> Self {
        Self { identity, seat_sync }
    }

    fn generate_code() -> String {
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::thread_rng();
        (0..INVITATION_CODE_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect()
    }

    pub async fn invite(&self, team_id: &str, email: &str, role: Role, expires_in_days: i64) -> AppResult<TeamInvitation> {
        let code = Self::generate_code();
        let expires_at = Utc::now() + Duration::days(expires_in_days);
        self.identity
            .create_invitation(team_id, &code, email, role, expires_at)
            .await
            .map_err(|e| AppError::Internal(e))
    }

    /// `GET /team/join?code`: refuses expired or already-used invitations,
    /// flipping a still-pending-but-expired row to `expired` as a side
    /// effect of the read.
    pub async fn preview(&self, code: &str) -> AppResult<TeamInvitation> {
        let mut invitation = self
            .identity
            .get_invitation_by_code(code)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::InvitationNotFound)?;

        if invitation.status == InvitationStatus::Pending && invitation.is_expired() {
            self.identity
                .set_invitation_status(&invitation.id, InvitationStatus::Expired)
                .await
                .map_err(AppError::Internal)?;
            invitation.status = InvitationStatus::Expired;
        }

        if invitation.status != InvitationStatus::Pending {
            return Err(AppError::InvitationNotFound);
        }

        Ok(invitation)
    }

    /// `POST /team/join`: any authenticated user may redeem a valid code.
    /// Idempotent: an existing membership surfaces as `already_member` with
    /// the current role rather than silently re-adding. `organization_id` is
    /// resolved by the caller from the team's graph namespace, since the
    /// identity store has no direct team-to-organization link.
    pub async fn accept(&self, code: &str, user_id: &str, organization_id: Option<&str>) -> AppResult<TeamMember> {
        let invitation = self.preview(code).await?;

        if let Some(existing) = self
            .identity
            .get_membership(&invitation.team_id, user_id)
            .await
            .map_err(AppError::Internal)?
        {
            return Err(AppError::AlreadyMember { role: existing.role.as_str().to_string() });
        }

        self.identity
            .add_member(&invitation.team_id, user_id, invitation.role)
            .await
            .map_err(AppError::Internal)?;
        self.identity
            .set_invitation_status(&invitation.id, InvitationStatus::Accepted)
            .await
            .map_err(AppError::Internal)?;

        self.trigger_seat_sync(&invitation.team_id, organization_id).await;

        self.identity
            .get_membership(&invitation.team_id, user_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::InvitationNotFound)
    }

    /// `DELETE /teams/:id/members/:userId`: allowed for the team owner or
    /// for self-removal. Refuses to strip the team's last owner.
    pub async fn remove_member(&self, team_id: &str, caller_id: &str, target_user_id: &str, organization_id: Option<&str>) -> AppResult<()> {
        let caller_membership = self
            .identity
            .get_membership(team_id, caller_id)
            .await
            .map_err(AppError::Internal)?;

        let is_self_removal = caller_id == target_user_id;
        let is_owner = matches!(caller_membership.as_ref().map(|m| m.role), Some(Role::Owner));

        if !is_self_removal && !is_owner {
            return Err(AppError::Forbidden);
        }

        let target = self
            .identity
            .get_membership(team_id, target_user_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or(AppError::InvitationNotFound)?;

        if target.role == Role::Owner {
            let owners = self.identity.owner_count(team_id).await.map_err(AppError::Internal)?;
            if owners <= 1 {
                return Err(AppError::Forbidden);
            }
        }

        self.identity
            .remove_member(team_id, target_user_id)
            .await
            .map_err(AppError::Internal)?;

        self.trigger_seat_sync(team_id, organization_id).await;
        Ok(())
    }

    pub async fn list_members(&self, team_id: &str) -> AppResult<Vec<TeamMember>> {
        self.identity.list_members(team_id).await.map_err(AppError::Internal)
    }

    pub async fn touch_membership_sync(&self, team_id: &str, user_id: &str) -> AppResult<()> {
        self.identity
            .touch_member_sync(team_id, user_id, Utc::now())
            .await
            .map_err(AppError::Internal)
    }

    async fn trigger_seat_sync(&self, team_id: &str, organization_id: Option<&str>) {
        let Some(organization_id) = organization_id else {
            return;
        };
        match self.identity.list_members(team_id).await {
            Ok(members) => self.seat_sync.sync_seats(organization_id, members.len() as i64).await,
            Err(e) => warn!(error = %e, team_id, "failed to compute seat count for sync"),
        }
    }
}
