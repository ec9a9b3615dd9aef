use tracing::warn;

use crate::auth::Principal;
use crate::errors::AppError;
use crate::identity::IdentityStore;
use crate::models::Capability;
use crate::namespace::NamespaceService;

/// Resolves a principal's capability set for a graph namespace: ownership
/// first, team membership second, `access_denied` otherwise. Mirrors the
/// restrictive `/user/graph` semantics — plain team membership without an
/// owner/admin role does not widen access, it only participates in capability
/// resolution for a single known `graphId`.
#[derive(Clone)]
pub struct AccessGate {
    namespaces: NamespaceService,
    identity: IdentityStore,
}

impl AccessGate {
    pub fn new(namespaces: NamespaceService, identity: IdentityStore) -> Self {
        Self { namespaces, identity }
    }

    /// Step 4-6 of the authentication & access algorithm: look up the graph,
    /// resolve the principal's capability set, and check the requested
    /// capability is a member of it.
    pub async fn resolve(&self, principal: &Principal, graph_id: &str, requested: Capability) -> Result<Capability, AppError> {
        let graph = self
            .namespaces
            .get(graph_id)
            .await?
            .ok_or(AppError::GraphNotFound)?;

        let granted = if graph.user_id == principal.user_id {
            Capability::Admin
        } else {
            let team = self
                .identity
                .get_team_by_graph_id(graph_id)
                .await
                .map_err(|e| {
                    warn!(error = %e, graph_id, "team lookup failed during access resolution");
                    AppError::ServiceUnavailable
                })?
                .ok_or(AppError::AccessDenied)?;

            let membership = self
                .identity
                .get_membership(&team.id, &principal.user_id)
                .await
                .map_err(|e| {
                    warn!(error = %e, graph_id, "membership lookup failed during access resolution");
                    AppError::ServiceUnavailable
                })?
                .ok_or(AppError::AccessDenied)?;

            *Capability::set_for_role(membership.role)
                .iter()
                .max()
                .expect("role capability sets are never empty")
        };

        if requested <= granted {
            Ok(granted)
        } else {
            Err(AppError::AccessDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_subset_ordering() {
        assert!(Capability::Read <= Capability::Admin);
        assert!(Capability::Write <= Capability::Admin);
        assert!(!(Capability::Admin <= Capability::Read));
    }
}
