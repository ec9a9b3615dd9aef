use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use crate::config::BillingConfig;
use crate::errors::{AppError, AppResult};
use crate::identity::IdentityStore;
use crate::models::{Organization, PaymentStatus, SubscriptionStatus};
use crate::team::SeatSyncNotifier;

type HmacSha256 = Hmac<Sha256>;

/// Tolerance for the timestamp embedded in `stripe-signature`, matching the
/// provider's own replay window.
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Verifies and dispatches inbound payment-provider webhooks. Grounded on
/// the teacher's `billing.rs::report_to_stripe` for the outbound `reqwest`
/// style; the inbound signature check and event dispatch are new, since the
/// teacher only reported usage records and never consumed webhooks.
#[derive(Clone)]
pub struct WebhookHandler {
    identity: IdentityStore,
    config: BillingConfig,
}

impl WebhookHandler {
    pub fn new(identity: IdentityStore, config: BillingConfig) -> Self {
        Self { identity, config }
    }

    /// Verifies `stripe-signature` (`t=<unix>,v1=<hex hmac>[,v1=<hex hmac>...]`)
    /// against the configured webhook secret, then dispatches on event type.
    /// A bad signature is rejected with 400 before any state is touched; a
    /// recognized, verified event that later fails to apply surfaces as an
    /// internal error so the provider retries, but audit logging never fails
    /// the response.
    pub async fn handle(&self, raw_body: &[u8], signature_header: &str) -> AppResult<()> {
        let secret = self
            .config
            .stripe_webhook_secret
            .as_deref()
            .ok_or(AppError::MissingField("stripe_webhook_secret"))?;

        if !verify_signature(raw_body, signature_header, secret) {
            return Err(AppError::InvalidSignature);
        }

        let payload: Value = serde_json::from_slice(raw_body).map_err(|e| AppError::Internal(e.into()))?;
        let event_id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or(AppError::MissingField("id"))?
            .to_string();
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if self
            .identity
            .has_processed_billing_event(&event_id)
            .await
            .map_err(AppError::Internal)?
        {
            info!(event_id, event_type, "billing webhook already processed, skipping");
            return Ok(());
        }

        let data = payload.pointer("/data/object").cloned().unwrap_or(Value::Null);
        self.dispatch(&event_type, &data).await?;

        // Recorded only once dispatch has actually applied the update: the
        // audit row doubles as the idempotency key (`has_processed_billing_event`
        // above), so writing it before a failed dispatch would make the
        // provider's retry a permanent no-op instead of a retry.
        self.identity.record_billing_event(&event_id, &event_type, &payload).await;

        Ok(())
    }

    async fn dispatch(&self, event_type: &str, data: &Value) -> AppResult<()> {
        match event_type {
            "customer.subscription.updated" => self.on_subscription_updated(data).await,
            "customer.subscription.deleted" => self.on_subscription_deleted(data).await,
            "invoice.payment_failed" => self.on_payment_failed(data).await,
            "invoice.payment_succeeded" => self.on_payment_succeeded(data).await,
            "checkout.session.completed" => self.on_checkout_completed(data).await,
            other => {
                info!(event_type = other, "unhandled billing webhook event type, ignoring");
                Ok(())
            }
        }
    }

    async fn organization_for(&self, data: &Value) -> AppResult<Organization> {
        let customer_id = data
            .get("customer")
            .and_then(Value::as_str)
            .ok_or(AppError::MissingField("customer"))?;

        self.identity
            .get_organization_by_customer_id(customer_id)
            .await
            .map_err(AppError::Internal)?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("no organization for stripe customer {customer_id}")))
    }

    async fn on_subscription_updated(&self, data: &Value) -> AppResult<()> {
        let mut org = self.organization_for(data).await?;

        org.stripe_subscription_id = data.get("id").and_then(Value::as_str).map(String::from);
        let status = data.get("status").and_then(Value::as_str).unwrap_or_default();
        org.subscription_status = match status {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "trialing" => SubscriptionStatus::Trialing,
            _ => org.subscription_status,
        };
        if let Some(quantity) = data.pointer("/items/data/0/quantity").and_then(Value::as_i64) {
            org.seat_count = quantity as i32;
        }

        self.identity.upsert_organization(&org).await.map_err(AppError::Internal)?;
        Ok(())
    }

    async fn on_subscription_deleted(&self, data: &Value) -> AppResult<()> {
        let mut org = self.organization_for(data).await?;
        org.plan_tier = "free".to_string();
        org.seat_count = 2;
        org.stripe_subscription_id = None;
        org.subscription_status = SubscriptionStatus::Canceled;

        self.identity.upsert_organization(&org).await.map_err(AppError::Internal)?;
        Ok(())
    }

    async fn on_payment_failed(&self, data: &Value) -> AppResult<()> {
        let mut org = self.organization_for(data).await?;
        org.payment_status = PaymentStatus::Failed;
        org.payment_attempt_count += 1;
        org.payment_failed_at = Some(chrono::Utc::now());

        self.identity.upsert_organization(&org).await.map_err(AppError::Internal)?;
        Ok(())
    }

    async fn on_payment_succeeded(&self, data: &Value) -> AppResult<()> {
        let mut org = self.organization_for(data).await?;
        org.payment_status = PaymentStatus::Ok;
        org.payment_attempt_count = 0;
        org.payment_failed_at = None;
        org.last_payment_at = Some(chrono::Utc::now());

        self.identity.upsert_organization(&org).await.map_err(AppError::Internal)?;
        Ok(())
    }

    /// Links the checkout session's customer/subscription to an
    /// organization, preferring `metadata.organizationId` since a brand-new
    /// customer has no prior `organizations` row to look up by customer id.
    async fn on_checkout_completed(&self, data: &Value) -> AppResult<()> {
        let customer_id = data.get("customer").and_then(Value::as_str).map(String::from);
        let subscription_id = data.get("subscription").and_then(Value::as_str).map(String::from);
        let organization_id = data.pointer("/metadata/organizationId").and_then(Value::as_str).map(String::from);

        let mut org = match organization_id {
            Some(id) => self
                .identity
                .get_organization(&id)
                .await
                .map_err(AppError::Internal)?
                .unwrap_or(Organization { id, ..Organization::default() }),
            None => {
                let Some(customer_id) = &customer_id else {
                    return Err(AppError::MissingField("metadata.organizationId"));
                };
                self.identity
                    .get_organization_by_customer_id(customer_id)
                    .await
                    .map_err(AppError::Internal)?
                    .ok_or_else(|| AppError::Internal(anyhow::anyhow!("checkout.session.completed for unknown organization")))?
            }
        };

        org.stripe_customer_id = customer_id.or(org.stripe_customer_id);
        org.stripe_subscription_id = subscription_id.or(org.stripe_subscription_id);
        org.plan_tier = "team".to_string();

        self.identity.upsert_organization(&org).await.map_err(AppError::Internal)?;
        Ok(())
    }
}

/// `t=<unix>,v1=<hex>` with constant-time comparison of the computed digest,
/// rejecting timestamps outside the replay tolerance.
fn verify_signature(payload: &[u8], header: &str, secret: &str) -> bool {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t.parse().ok();
        } else if let Some(v1) = part.strip_prefix("v1=") {
            signatures.push(v1);
        }
    }

    let (Some(timestamp), false) = (timestamp, signatures.is_empty()) else {
        return false;
    };

    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    signatures
        .iter()
        .any(|sig| sig.len() == expected.len() && bool::from(sig.as_bytes().ct_eq(expected.as_bytes())))
}

/// Pushes the team's current seat count to the payment provider's
/// subscription quantity, reusing the teacher's raw-`reqwest` integration
/// style (`billing.rs::report_to_stripe`) rather than a Stripe SDK, since no
/// example in the corpus depends on one.
pub struct StripeSeatSync {
    identity: IdentityStore,
    client: Client,
    secret_key: Option<String>,
}

impl StripeSeatSync {
    pub fn new(identity: IdentityStore, secret_key: Option<String>) -> Self {
        Self { identity, client: Client::new(), secret_key }
    }
}

#[async_trait]
impl SeatSyncNotifier for StripeSeatSync {
    async fn sync_seats(&self, organization_id: &str, seat_count: i64) {
        let Some(secret_key) = &self.secret_key else {
            return;
        };

        let org = match self.identity.get_organization(organization_id).await {
            Ok(Some(org)) => org,
            Ok(None) => {
                warn!(organization_id, "seat sync skipped: no organization record");
                return;
            }
            Err(e) => {
                warn!(error = %e, organization_id, "seat sync skipped: organization lookup failed");
                return;
            }
        };

        let Some(subscription_id) = &org.stripe_subscription_id else {
            return;
        };

        let response = self
            .client
            .post(format!("https://api.stripe.com/v1/subscriptions/{subscription_id}"))
            .basic_auth(secret_key, Option::<&str>::None)
            .form(&[("items[0][quantity]", seat_count.to_string())])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(organization_id, seat_count, "seat count synced to payment provider");
            }
            Ok(resp) => {
                warn!(organization_id, status = resp.status().as_u16(), "seat sync request rejected by payment provider");
            }
            Err(e) => {
                error!(error = %e, organization_id, "seat sync request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_a_correctly_computed_signature() {
        let secret = "whsec_test";
        let payload = b"{\"id\":\"evt_1\"}";
        let timestamp = chrono::Utc::now().timestamp();

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let digest = hex::encode(mac.finalize().into_bytes());

        let header = format!("t={timestamp},v1={digest}");
        assert!(verify_signature(payload, &header, secret));
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let secret = "whsec_test";
        let timestamp = chrono::Utc::now().timestamp();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(b"{\"id\":\"evt_1\"}");
        let digest = hex::encode(mac.finalize().into_bytes());

        let header = format!("t={timestamp},v1={digest}");
        assert!(!verify_signature(b"{\"id\":\"evt_2\"}", &header, secret));
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let secret = "whsec_test";
        let payload = b"{}";
        let stale_timestamp = chrono::Utc::now().timestamp() - 3600;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(stale_timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let digest = hex::encode(mac.finalize().into_bytes());

        let header = format!("t={stale_timestamp},v1={digest}");
        assert!(!verify_signature(payload, &header, secret));
    }
}
