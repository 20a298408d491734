use keeper_core::TenantId;

/// Entity partitioned by tenant.
pub trait MultiTenant {
    /// Returns the owning tenant, `None` until first stamped.
    fn tenant_id(&self) -> Option<TenantId>;

    /// Assigns the owning tenant.
    fn set_tenant_id(&mut self, tenant_id: TenantId);
}
