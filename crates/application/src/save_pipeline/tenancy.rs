use std::sync::Arc;

use keeper_core::{AppError, AppResult, TenantId};
use keeper_domain::ActorKey;

use crate::change_tracker::EntityState;

use super::{SaveChangesContext, SaveChangesInterceptor};

/// Resolves the tenant a commit runs for.
pub trait TenantProvider: Send + Sync {
    /// Returns the current tenant.
    fn current_tenant(&self) -> AppResult<TenantId>;
}

/// Stamps tenant ownership on new entities and rejects cross-tenant writes.
pub struct TenantSaveChangesInterceptor {
    tenant_provider: Arc<dyn TenantProvider>,
}

impl TenantSaveChangesInterceptor {
    /// Creates the interceptor.
    #[must_use]
    pub fn new(tenant_provider: Arc<dyn TenantProvider>) -> Self {
        Self { tenant_provider }
    }
}

impl<A: ActorKey> SaveChangesInterceptor<A> for TenantSaveChangesInterceptor {
    fn saving_changes(&self, context: &mut SaveChangesContext<'_, A>) -> AppResult<()> {
        let tenant_id = self.tenant_provider.current_tenant()?;

        for entry in context.entries_mut() {
            let state = entry.state();
            let Some(tenant_owned) = entry.entity_mut().multi_tenant() else {
                continue;
            };

            match state {
                EntityState::Added => tenant_owned.set_tenant_id(tenant_id),
                EntityState::Modified | EntityState::Deleted => {
                    let owner = tenant_owned.tenant_id();
                    if owner != Some(tenant_id) {
                        let owner = owner.map_or_else(|| "none".to_owned(), |id| id.to_string());
                        return Err(AppError::Forbidden(format!(
                            "expected tenant '{tenant_id}', entity belongs to tenant '{owner}'"
                        )));
                    }
                }
                EntityState::Unchanged => {}
            }
        }

        Ok(())
    }
}
