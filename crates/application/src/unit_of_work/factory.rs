use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use keeper_core::AppResult;
use keeper_domain::{ActorKey, KeyValues};

use crate::persistence_ports::{Clock, EntityReader, EntityStore, SystemClock};
use crate::save_pipeline::{
    ActorResolver, AuditSettings, SaveChangesInterceptor, SavePipeline,
};

use super::UnitOfWork;

/// Creates units of work sharing one store and one save pipeline.
pub struct UnitOfWorkFactory<A: ActorKey> {
    store: Arc<dyn EntityStore>,
    pipeline: Arc<SavePipeline<A>>,
}

impl<A: ActorKey> UnitOfWorkFactory<A> {
    /// Starts configuring a factory over the given store.
    #[must_use]
    pub fn builder(store: Arc<dyn EntityStore>) -> UnitOfWorkFactoryBuilder<A> {
        UnitOfWorkFactoryBuilder {
            store,
            clock: None,
            actor_resolver: None,
            interceptors: Vec::new(),
            settings: AuditSettings::default(),
        }
    }

    /// Creates a fresh, empty unit of work.
    #[must_use]
    pub fn create(&self) -> UnitOfWork<A> {
        UnitOfWork::new(self.store.clone(), self.pipeline.clone())
    }
}

#[async_trait]
impl<A: ActorKey> EntityReader for UnitOfWorkFactory<A> {
    async fn find_no_tracking(
        &self,
        entity_type: &str,
        key_values: &KeyValues,
    ) -> AppResult<Option<Value>> {
        let unit_of_work = self.create();
        unit_of_work
            .find_document_no_tracking(entity_type, key_values)
            .await
    }
}

/// Startup configuration for a [`UnitOfWorkFactory`].
pub struct UnitOfWorkFactoryBuilder<A: ActorKey> {
    store: Arc<dyn EntityStore>,
    clock: Option<Arc<dyn Clock>>,
    actor_resolver: Option<Arc<dyn ActorResolver<A>>>,
    interceptors: Vec<Arc<dyn SaveChangesInterceptor<A>>>,
    settings: AuditSettings,
}

impl<A: ActorKey> UnitOfWorkFactoryBuilder<A> {
    /// Overrides the commit clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the per-commit actor resolver.
    #[must_use]
    pub fn with_actor_resolver(mut self, resolver: Arc<dyn ActorResolver<A>>) -> Self {
        self.actor_resolver = Some(resolver);
        self
    }

    /// Appends a save-changes interceptor. Interceptors run in registration order.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn SaveChangesInterceptor<A>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Sets the audit integration shape and actor policy.
    #[must_use]
    pub fn with_settings(mut self, settings: AuditSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validates the configuration and builds the factory.
    pub fn build(self) -> AppResult<UnitOfWorkFactory<A>> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let pipeline = SavePipeline::new(
            clock,
            self.actor_resolver,
            self.interceptors,
            self.settings,
        )?;

        Ok(UnitOfWorkFactory {
            store: self.store,
            pipeline: Arc::new(pipeline),
        })
    }
}
