//! The per-bundle view of the framework.

use std::fmt;
use std::sync::Arc;

use keystone_core::{
    BundleId, Filter, ListenerId, Properties, ServiceFactory, ServiceListener, ServiceObject,
    ServiceReference, ServiceRegistration, ServiceRegistry, ServiceResult, ServiceTracker,
    SharedFilter, TrackerCustomizer, downcast_service,
};
use keystone_dm::{Component, DependencyManager};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Handed to a bundle's activator. Every registry call made through the
/// context is attributed to the bundle, so the framework can clean up after
/// it when it stops.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(serde::Deserialize, Default)]
/// #[serde(default)]
/// struct GreeterConfig { greeting: String }
///
/// fn start(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
///     let cfg: GreeterConfig = ctx.get_config()?;
///     self.registration = Some(ctx.register_service(
///         "Greeter",
///         service_object(Arc::new(cfg.greeting)),
///         Properties::new(),
///     )?);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct BundleContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: BundleId,
    name: String,
    config: Arc<serde_json::Value>,
    registry: Arc<ServiceRegistry>,
    manager: Arc<DependencyManager>,
}

impl BundleContext {
    pub(crate) fn new(
        id: BundleId,
        name: impl Into<String>,
        config: serde_json::Value,
        registry: Arc<ServiceRegistry>,
        manager: Arc<DependencyManager>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                name: name.into(),
                config: Arc::new(config),
                registry,
                manager,
            }),
        }
    }

    pub fn bundle_id(&self) -> BundleId {
        self.inner.id
    }

    pub fn bundle_name(&self) -> &str {
        &self.inner.name
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.inner.registry
    }

    // ─── Configuration ───────────────────────────────────────────────────────

    /// Raw configuration section of this bundle (`bundles.<name>`), an empty
    /// object when absent.
    pub fn config(&self) -> &serde_json::Value {
        &self.inner.config
    }

    /// Deserializes the bundle's configuration section into `T`.
    ///
    /// Use `#[serde(default)]` on `T` to make every field optional.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: DeserializeOwned,
    {
        T::deserialize(self.inner.config.as_ref())
    }

    // ─── Services ────────────────────────────────────────────────────────────

    pub fn register_service(
        &self,
        name: &str,
        service: ServiceObject,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        self.inner
            .registry
            .register_service(self.inner.id, name, service, properties)
    }

    pub fn register_service_factory(
        &self,
        name: &str,
        factory: Arc<dyn ServiceFactory>,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        self.inner
            .registry
            .register_service_factory(self.inner.id, name, factory, properties)
    }

    pub fn unregister_service(&self, registration: &ServiceRegistration) -> ServiceResult<()> {
        self.inner.registry.unregister_service(registration)
    }

    /// Retained references to the matching services, best-ranked first.
    /// Each must be released with
    /// [`release_service_reference`](Self::release_service_reference).
    pub fn get_service_references(
        &self,
        name: Option<&str>,
        filter: Option<&dyn Filter>,
    ) -> ServiceResult<Vec<ServiceReference>> {
        self.inner
            .registry
            .get_service_references(self.inner.id, name, filter)
    }

    pub fn release_service_reference(&self, reference: &ServiceReference) -> ServiceResult<()> {
        self.inner
            .registry
            .release_service_reference(self.inner.id, reference)
    }

    pub fn get_service(&self, reference: &ServiceReference) -> ServiceResult<Option<ServiceObject>> {
        self.inner.registry.get_service(self.inner.id, reference)
    }

    pub fn unget_service(&self, reference: &ServiceReference) -> ServiceResult<bool> {
        self.inner.registry.unget_service(self.inner.id, reference)
    }

    /// Calls `f` with the best-ranked service published under `name`, then
    /// gives the service and its reference back.
    ///
    /// Returns `None` when no matching service exists or it is not a `T`.
    pub fn use_service<T, R>(&self, name: &str, f: impl FnOnce(Arc<T>) -> R) -> Option<R>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let registry = &self.inner.registry;
        let consumer = self.inner.id;

        let references = match registry.get_service_references(consumer, Some(name), None) {
            Ok(references) => references,
            Err(e) => {
                warn!(bundle = %consumer, service = name, error = %e, "Service lookup failed");
                return None;
            }
        };
        let mut references = references.into_iter();
        let best = references.next()?;
        for other in references {
            self.release_or_warn(&other);
        }

        let result = match registry.get_service(consumer, &best) {
            Ok(Some(object)) => {
                let result = downcast_service::<T>(&object).map(f);
                if let Err(e) = registry.unget_service(consumer, &best) {
                    warn!(bundle = %consumer, service = name, error = %e, "Failed to unget service");
                }
                result
            }
            Ok(None) => None,
            Err(e) => {
                warn!(bundle = %consumer, service = name, error = %e, "Failed to get service");
                None
            }
        };
        self.release_or_warn(&best);
        result
    }

    fn release_or_warn(&self, reference: &ServiceReference) {
        if let Err(e) = self
            .inner
            .registry
            .release_service_reference(self.inner.id, reference)
        {
            warn!(
                bundle = %self.inner.id,
                service_id = reference.service_id(),
                error = %e,
                "Failed to release service reference"
            );
        }
    }

    pub fn add_service_listener(
        &self,
        filter: Option<SharedFilter>,
        listener: Arc<dyn ServiceListener>,
    ) -> ListenerId {
        self.inner
            .registry
            .add_service_listener(self.inner.id, filter, listener)
    }

    pub fn remove_service_listener(&self, id: ListenerId) -> bool {
        self.inner.registry.remove_service_listener(id)
    }

    /// Creates and opens a tracker owned by this bundle.
    pub fn track_services(
        &self,
        name: Option<&str>,
        filter: Option<SharedFilter>,
        customizer: Arc<dyn TrackerCustomizer>,
    ) -> ServiceResult<ServiceTracker> {
        let tracker = ServiceTracker::new(
            Arc::clone(&self.inner.registry),
            self.inner.id,
            name,
            filter,
            customizer,
        );
        tracker.open()?;
        Ok(tracker)
    }

    // ─── Components ──────────────────────────────────────────────────────────

    /// The bundle's dependency manager. Components added to it are destroyed
    /// when the bundle stops.
    pub fn dependency_manager(&self) -> &Arc<DependencyManager> {
        &self.inner.manager
    }

    /// Creates a component owned by this bundle. It does nothing until it is
    /// passed to [`DependencyManager::add`].
    pub fn create_component(&self, name: impl Into<String>) -> Component {
        self.inner.manager.create_component(name)
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle", &self.inner.id)
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::service_object;
    use serde::Deserialize;

    fn context(id: u64, registry: &Arc<ServiceRegistry>, config: serde_json::Value) -> BundleContext {
        let bundle = BundleId(id);
        BundleContext::new(
            bundle,
            format!("bundle-{id}"),
            config,
            Arc::clone(registry),
            Arc::new(DependencyManager::new(bundle, Arc::clone(registry))),
        )
    }

    #[derive(Debug, Deserialize, Default, PartialEq)]
    #[serde(default)]
    struct GreeterConfig {
        greeting: String,
        repeat: u32,
    }

    #[test]
    fn test_get_config() {
        let registry = Arc::new(ServiceRegistry::new());
        let ctx = context(1, &registry, serde_json::json!({ "greeting": "hi" }));

        let cfg: GreeterConfig = ctx.get_config().unwrap();
        assert_eq!(
            cfg,
            GreeterConfig {
                greeting: "hi".into(),
                repeat: 0
            }
        );

        let empty = context(2, &registry, serde_json::json!({}));
        assert_eq!(
            empty.get_config::<GreeterConfig>().unwrap(),
            GreeterConfig::default()
        );
    }

    #[test]
    fn test_registrations_are_attributed_to_the_bundle() {
        let registry = Arc::new(ServiceRegistry::new());
        let ctx = context(7, &registry, serde_json::json!({}));

        let reg = ctx
            .register_service(
                "Greeter",
                service_object(Arc::new("hi".to_string())),
                Properties::new(),
            )
            .unwrap();

        assert_eq!(reg.bundle(), BundleId(7));
        assert_eq!(registry.registered_services(BundleId(7)).len(), 1);
    }

    #[test]
    fn test_use_service_prefers_ranking_and_returns_everything() {
        let registry = Arc::new(ServiceRegistry::new());
        let provider = context(1, &registry, serde_json::json!({}));
        let consumer = context(2, &registry, serde_json::json!({}));

        provider
            .register_service(
                "Greeter",
                service_object(Arc::new("low".to_string())),
                Properties::new(),
            )
            .unwrap();
        provider
            .register_service(
                "Greeter",
                service_object(Arc::new("high".to_string())),
                Properties::new().with(keystone_core::SERVICE_RANKING, 10),
            )
            .unwrap();

        let greeting = consumer.use_service::<String, _>("Greeter", |s| s.to_string());
        assert_eq!(greeting.as_deref(), Some("high"));
        assert!(registry.services_in_use(BundleId(2)).is_empty());

        assert!(consumer.use_service::<String, _>("Missing", |_| ()).is_none());
        assert!(consumer.use_service::<u32, _>("Greeter", |_| ()).is_none());
        assert!(registry.services_in_use(BundleId(2)).is_empty());
    }
}
