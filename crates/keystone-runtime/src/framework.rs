//! The framework: owns the service registry and drives bundle lifecycles.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use keystone_runtime::Framework;
//!
//! // Loads keystone.toml from the current directory, if present.
//! let framework = Framework::new();
//! framework.install_bundle(GREETER)?;
//!
//! // Starts every bundle, then waits for Ctrl+C / SIGTERM.
//! framework.run().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use keystone_core::{BundleId, ServiceRegistry};
use keystone_dm::DependencyManager;
use parking_lot::{Mutex, RwLock};
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::bundle::{
    BUNDLES, BundleActivator, BundleDescriptor, BundleInfo, BundleState,
    KEYSTONE_BUNDLE_API_VERSION, format_api_version,
};
use crate::config::{ConfigLoader, ConfigResult, KeystoneConfig};
use crate::context::BundleContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

// =============================================================================
// BundleEntry (internal)
// =============================================================================

struct BundleEntry {
    id: BundleId,
    name: String,
    version: String,
    context: BundleContext,
    /// Held for the whole of a start, stop or uninstall, which serializes
    /// lifecycle operations on one bundle.
    activator: Mutex<Box<dyn BundleActivator>>,
    state: Mutex<BundleState>,
}

impl BundleEntry {
    fn state(&self) -> BundleState {
        *self.state.lock()
    }

    fn set_state(&self, state: BundleState) {
        let old = std::mem::replace(&mut *self.state.lock(), state);
        debug!(bundle = %self.id, name = %self.name, from = %old, to = %state, "Bundle state changed");
    }

    fn state_error(&self, state: BundleState, operation: &'static str) -> RuntimeError {
        RuntimeError::BundleState {
            name: self.name.clone(),
            state: state.as_str(),
            operation,
        }
    }
}

// =============================================================================
// Framework
// =============================================================================

/// Owns the [`ServiceRegistry`] and the installed bundles.
///
/// Bundle ids start at 1; [`BundleId::FRAMEWORK`] is reserved for the
/// framework itself. Stopping a bundle calls its activator's `stop`, destroys
/// its components, then unregisters whatever it still has registered and
/// releases whatever it still holds.
pub struct Framework {
    config: KeystoneConfig,
    registry: Arc<ServiceRegistry>,
    /// Installed bundles in install order.
    bundles: RwLock<Vec<Arc<BundleEntry>>>,
    next_bundle_id: AtomicU64,
    running: AtomicBool,
    shut_down: AtomicBool,
}

impl Framework {
    /// Creates a framework from the configuration found in the current
    /// directory, falling back to defaults when it cannot be loaded.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                KeystoneConfig::default()
            });

        Self::from_config(&config)
    }

    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    /// Initializes logging from `config.logging`, then creates the framework.
    pub fn from_config(config: &KeystoneConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            framework = %config.framework.name,
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Framework initialized from configuration"
        );

        Self::with_config(config.clone())
    }

    /// Creates the framework without touching the global logger.
    pub fn with_config(config: KeystoneConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ServiceRegistry::new()),
            bundles: RwLock::new(Vec::new()),
            next_bundle_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &KeystoneConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.framework.name
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // ─── Installation ────────────────────────────────────────────────────────

    /// Installs the bundle described by `descriptor`.
    ///
    /// Descriptors built against an incompatible API are rejected.
    pub fn install_bundle(&self, descriptor: BundleDescriptor) -> RuntimeResult<BundleId> {
        if !descriptor.is_compatible() {
            let found = format_api_version(descriptor.api_version);
            let host = format_api_version(KEYSTONE_BUNDLE_API_VERSION);
            error!(
                bundle = descriptor.name,
                descriptor_version = %found,
                host_version = %host,
                "Bundle API version mismatch"
            );
            return Err(RuntimeError::IncompatibleBundle {
                name: descriptor.name.to_string(),
                found,
                host,
            });
        }
        self.install_activator(descriptor.name, descriptor.version, descriptor.instantiate())
    }

    /// Installs a bundle from an already constructed activator.
    pub fn install_activator(
        &self,
        name: &str,
        version: &str,
        activator: Box<dyn BundleActivator>,
    ) -> RuntimeResult<BundleId> {
        let mut bundles = self.bundles.write();
        if bundles.iter().any(|b| b.name == name) {
            warn!(bundle = name, "Bundle already installed");
            return Err(RuntimeError::BundleExists(name.to_string()));
        }

        let id = BundleId(self.next_bundle_id.fetch_add(1, Ordering::Relaxed));
        let manager = Arc::new(DependencyManager::new(id, Arc::clone(&self.registry)));
        let context = BundleContext::new(
            id,
            name,
            self.config.bundle_section(name),
            Arc::clone(&self.registry),
            manager,
        );

        bundles.push(Arc::new(BundleEntry {
            id,
            name: name.to_string(),
            version: version.to_string(),
            context,
            activator: Mutex::new(activator),
            state: Mutex::new(BundleState::Installed),
        }));

        info!(bundle = %id, name, version, "Bundle installed");
        Ok(id)
    }

    /// Installs every descriptor contributed to [`BUNDLES`]. Descriptors that
    /// fail to install are logged and skipped.
    pub fn install_static_bundles(&self) -> Vec<BundleId> {
        let mut installed = Vec::new();
        for descriptor in BUNDLES {
            match self.install_bundle(*descriptor) {
                Ok(id) => installed.push(id),
                Err(e) => error!(bundle = descriptor.name, error = %e, "Skipping static bundle"),
            }
        }
        installed
    }

    /// Stops the bundle if needed and removes it from the framework.
    pub fn uninstall_bundle(&self, id: BundleId) -> RuntimeResult<()> {
        let entry = self.entry(id)?;
        let stop_result = {
            let mut activator = entry.activator.lock();
            let result = match entry.state() {
                BundleState::Uninstalled => {
                    return Err(entry.state_error(BundleState::Uninstalled, "uninstall"));
                }
                BundleState::Active => self.stop_locked(&entry, activator.as_mut()),
                _ => Ok(()),
            };
            entry.set_state(BundleState::Uninstalled);
            result
        };

        self.bundles.write().retain(|b| b.id != id);
        info!(bundle = %id, name = %entry.name, "Bundle uninstalled");
        stop_result
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Starts a bundle. Starting an active bundle does nothing.
    ///
    /// When the activator fails, everything the bundle registered so far is
    /// cleaned up and the bundle returns to [`BundleState::Installed`].
    pub fn start_bundle(&self, id: BundleId) -> RuntimeResult<()> {
        let entry = self.entry(id)?;
        let mut activator = entry.activator.lock();

        match entry.state() {
            BundleState::Active => return Ok(()),
            state @ BundleState::Uninstalled => return Err(entry.state_error(state, "start")),
            BundleState::Installed | BundleState::Starting | BundleState::Stopping => {}
        }

        entry.set_state(BundleState::Starting);
        debug!(bundle = %id, name = %entry.name, "Starting bundle");

        match activator.start(&entry.context) {
            Ok(()) => {
                entry.set_state(BundleState::Active);
                info!(
                    bundle = %id,
                    name = %entry.name,
                    components = entry.context.dependency_manager().len(),
                    "Bundle started"
                );
                Ok(())
            }
            Err(e) => {
                error!(bundle = %id, name = %entry.name, error = %e, "Bundle failed to start");
                self.release_bundle_resources(&entry);
                entry.set_state(BundleState::Installed);
                Err(RuntimeError::BundleStart {
                    name: entry.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stops a bundle. Stopping a bundle that is not active does nothing.
    ///
    /// The bundle is torn down even when its activator's `stop` fails; the
    /// failure is reported afterwards.
    pub fn stop_bundle(&self, id: BundleId) -> RuntimeResult<()> {
        let entry = self.entry(id)?;
        let mut activator = entry.activator.lock();

        match entry.state() {
            BundleState::Active => self.stop_locked(&entry, activator.as_mut()),
            state @ BundleState::Uninstalled => Err(entry.state_error(state, "stop")),
            _ => Ok(()),
        }
    }

    fn stop_locked(
        &self,
        entry: &BundleEntry,
        activator: &mut dyn BundleActivator,
    ) -> RuntimeResult<()> {
        entry.set_state(BundleState::Stopping);
        debug!(bundle = %entry.id, name = %entry.name, "Stopping bundle");

        let result = activator.stop(&entry.context);
        if let Err(e) = &result {
            error!(bundle = %entry.id, name = %entry.name, error = %e, "Bundle failed to stop cleanly");
        }

        self.release_bundle_resources(entry);
        entry.set_state(BundleState::Installed);
        info!(bundle = %entry.id, name = %entry.name, "Bundle stopped");

        result.map_err(|e| RuntimeError::BundleStop {
            name: entry.name.clone(),
            message: e.to_string(),
        })
    }

    /// Destroys the bundle's components, then reclaims the registrations,
    /// listeners and references it left behind.
    fn release_bundle_resources(&self, entry: &BundleEntry) {
        let id = entry.id;
        entry.context.dependency_manager().remove_all();

        if self.config.framework.warn_on_leaks {
            let registrations = self.registry.registered_services(id).len();
            let in_use = self.registry.services_in_use(id).len();
            if registrations > 0 || in_use > 0 {
                warn!(
                    bundle = %id,
                    name = %entry.name,
                    registrations,
                    services_in_use = in_use,
                    "Bundle left services behind"
                );
            }
        }

        self.registry.clear_service_registrations(id);
        self.registry.clear_service_listeners(id);
        self.registry.clear_references_for(id);
    }

    /// Starts every installed bundle in install order. Failures are logged and
    /// the remaining bundles are still started; the first failure is returned.
    pub fn start_all(&self) -> RuntimeResult<()> {
        let mut first_error = None;
        for id in self.bundle_ids() {
            if let Err(e) = self.start_bundle(id) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stops every bundle in reverse install order. Failures are logged and
    /// the remaining bundles are still stopped; the first failure is returned.
    pub fn stop_all(&self) -> RuntimeResult<()> {
        let mut first_error = None;
        for id in self.bundle_ids().into_iter().rev() {
            if let Err(e) = self.stop_bundle(id) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// State of an installed bundle, `None` once it is uninstalled.
    pub fn bundle_state(&self, id: BundleId) -> Option<BundleState> {
        self.entry(id).ok().map(|e| e.state())
    }

    pub fn bundle_id(&self, name: &str) -> Option<BundleId> {
        self.bundles
            .read()
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.id)
    }

    pub fn bundle_context(&self, id: BundleId) -> Option<BundleContext> {
        self.entry(id).ok().map(|e| e.context.clone())
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.read().len()
    }

    pub fn bundles(&self) -> Vec<BundleInfo> {
        let entries: Vec<Arc<BundleEntry>> = self.bundles.read().clone();
        entries
            .iter()
            .map(|e| BundleInfo {
                id: e.id,
                name: e.name.clone(),
                version: e.version.clone(),
                state: e.state(),
                registered_services: self.registry.registered_services(e.id).len(),
                services_in_use: self.registry.services_in_use(e.id).len(),
            })
            .collect()
    }

    fn bundle_ids(&self) -> Vec<BundleId> {
        self.bundles.read().iter().map(|b| b.id).collect()
    }

    fn entry(&self, id: BundleId) -> RuntimeResult<Arc<BundleEntry>> {
        self.bundles
            .read()
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(RuntimeError::BundleNotFound(id))
    }

    // ─── Running ─────────────────────────────────────────────────────────────

    /// Starts the bundles (when `framework.auto_start` is set), waits for
    /// Ctrl+C or SIGTERM, then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.launch();
        info!(framework = %self.name(), "Keystone is now running. Press Ctrl+C to stop.");

        let waited = wait_for_shutdown().await;
        self.shutdown();
        waited
    }

    /// Like [`run`](Self::run), but shuts down when `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.launch();
        shutdown.await;
        self.shutdown();
        Ok(())
    }

    fn launch(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!(framework = %self.name(), "Framework is already running");
            return;
        }
        if self.config.framework.auto_start
            && let Err(e) = self.start_all()
        {
            warn!(error = %e, "Some bundles failed to start");
        }
    }

    /// Stops and uninstalls every bundle, then shuts the registry down.
    /// Calling it again does nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(framework = %self.name(), "Shutting down");

        if let Err(e) = self.stop_all() {
            warn!(error = %e, "Some bundles failed to stop cleanly");
        }
        for id in self.bundle_ids().into_iter().rev() {
            if let Err(e) = self.uninstall_bundle(id) {
                debug!(bundle = %id, error = %e, "Uninstall during shutdown failed");
            }
        }
        self.registry.shutdown();
        self.running.store(false, Ordering::Release);

        info!(framework = %self.name(), "Framework stopped");
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .map_err(|e| RuntimeError::Signal(e.to_string()))?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.map_err(|e| RuntimeError::Signal(e.to_string()))?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .map_err(|e| RuntimeError::Signal(e.to_string()))?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// FrameworkBuilder
// =============================================================================

/// Builder for a [`Framework`] with custom configuration sources.
///
/// ```rust,ignore
/// let framework = Framework::builder()
///     .config_file("config/keystone.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct FrameworkBuilder {
    config_loader: ConfigLoader,
}

impl FrameworkBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    pub fn merge(mut self, config: KeystoneConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and creates the framework.
    pub fn build(self) -> ConfigResult<Framework> {
        let config = self.config_loader.load()?;
        Ok(Framework::from_config(&config))
    }
}

impl Default for FrameworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::{Properties, ServiceEvent, service_object};
    use keystone_dm::{BoxError, ComponentState, ServiceDependency};

    type Hook = Box<dyn FnMut(&BundleContext) -> Result<(), BoxError> + Send>;

    struct ScriptedActivator {
        on_start: Hook,
        on_stop: Hook,
    }

    impl ScriptedActivator {
        fn boxed(
            on_start: impl FnMut(&BundleContext) -> Result<(), BoxError> + Send + 'static,
            on_stop: impl FnMut(&BundleContext) -> Result<(), BoxError> + Send + 'static,
        ) -> Box<dyn BundleActivator> {
            Box::new(Self {
                on_start: Box::new(on_start),
                on_stop: Box::new(on_stop),
            })
        }
    }

    impl BundleActivator for ScriptedActivator {
        fn start(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
            (self.on_start)(ctx)
        }

        fn stop(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
            (self.on_stop)(ctx)
        }
    }

    /// Registers `name` on start and leaves it registered.
    fn publisher(name: &'static str) -> Box<dyn BundleActivator> {
        ScriptedActivator::boxed(
            move |ctx| {
                ctx.register_service(
                    name,
                    service_object(Arc::new(name.to_string())),
                    Properties::new(),
                )?;
                Ok(())
            },
            |_| Ok(()),
        )
    }

    fn framework() -> Framework {
        Framework::with_config(KeystoneConfig::default())
    }

    #[test]
    fn test_bundle_lifecycle_cleans_up() {
        let fw = framework();
        let id = fw.install_activator("provider", "1.0.0", publisher("Foo")).unwrap();
        assert_eq!(id, BundleId(1));
        assert_eq!(fw.bundle_state(id), Some(BundleState::Installed));

        fw.start_bundle(id).unwrap();
        assert_eq!(fw.bundle_state(id), Some(BundleState::Active));
        assert_eq!(fw.registry().registered_services(id).len(), 1);

        // Starting twice does nothing.
        fw.start_bundle(id).unwrap();
        assert_eq!(fw.registry().registration_count(), 1);

        fw.stop_bundle(id).unwrap();
        assert_eq!(fw.bundle_state(id), Some(BundleState::Installed));
        assert_eq!(fw.registry().registration_count(), 0);

        fw.stop_bundle(id).unwrap();
        fw.uninstall_bundle(id).unwrap();
        assert_eq!(fw.bundle_state(id), None);
        assert!(matches!(
            fw.start_bundle(id),
            Err(RuntimeError::BundleNotFound(_))
        ));
    }

    #[test]
    fn test_install_rejects_duplicates_and_incompatible_descriptors() {
        fn create() -> Box<dyn BundleActivator> {
            publisher("Foo")
        }

        let fw = framework();
        fw.install_bundle(BundleDescriptor::new("foo", create)).unwrap();
        assert!(matches!(
            fw.install_bundle(BundleDescriptor::new("foo", create)),
            Err(RuntimeError::BundleExists(_))
        ));

        let future = BundleDescriptor {
            api_version: 0x0002_0000,
            ..BundleDescriptor::new("future", create)
        };
        assert!(matches!(
            fw.install_bundle(future),
            Err(RuntimeError::IncompatibleBundle { .. })
        ));
        assert_eq!(fw.bundle_count(), 1);
    }

    #[test]
    fn test_failed_start_is_rolled_back() {
        let fw = framework();
        let id = fw
            .install_activator(
                "broken",
                "0.1.0",
                ScriptedActivator::boxed(
                    |ctx| {
                        ctx.register_service(
                            "Half",
                            service_object(Arc::new(1u32)),
                            Properties::new(),
                        )?;
                        Err("database unreachable".into())
                    },
                    |_| Ok(()),
                ),
            )
            .unwrap();

        let err = fw.start_bundle(id).unwrap_err();
        assert!(matches!(err, RuntimeError::BundleStart { ref message, .. } if message == "database unreachable"));
        assert_eq!(fw.bundle_state(id), Some(BundleState::Installed));
        assert_eq!(fw.registry().registration_count(), 0);
    }

    #[test]
    fn test_failed_stop_still_tears_down() {
        let fw = framework();
        let provider = fw.install_activator("provider", "1.0.0", publisher("Foo")).unwrap();
        let consumer = fw
            .install_activator(
                "consumer",
                "1.0.0",
                ScriptedActivator::boxed(
                    |ctx| {
                        let refs = ctx.get_service_references(Some("Foo"), None)?;
                        for r in &refs {
                            ctx.get_service(r)?;
                        }
                        ctx.add_service_listener(None, Arc::new(|_: &ServiceEvent| {}));
                        Ok(())
                    },
                    |_| Err("refusing to stop".into()),
                ),
            )
            .unwrap();
        fw.start_all().unwrap();
        assert_eq!(fw.registry().services_in_use(consumer).len(), 1);
        assert_eq!(fw.registry().stats().listeners, 1);

        assert!(matches!(
            fw.stop_bundle(consumer),
            Err(RuntimeError::BundleStop { .. })
        ));
        assert_eq!(fw.bundle_state(consumer), Some(BundleState::Installed));
        assert!(fw.registry().services_in_use(consumer).is_empty());
        assert_eq!(fw.registry().stats().listeners, 0);
        assert_eq!(fw.registry().stats().references, 0);
        assert_eq!(fw.bundle_state(provider), Some(BundleState::Active));
    }

    #[test]
    fn test_components_follow_bundles() {
        let fw = framework();
        fw.install_activator(
            "provider",
            "1.0.0",
            ScriptedActivator::boxed(
                |ctx| {
                    let component = ctx.create_component("foo-provider");
                    component.add_interface(
                        "Foo",
                        service_object(Arc::new("foo".to_string())),
                        Properties::new(),
                    )?;
                    ctx.dependency_manager().add(component);
                    Ok(())
                },
                |_| Ok(()),
            ),
        )
        .unwrap();

        let consumer_component: Arc<Mutex<Option<keystone_dm::Component>>> =
            Arc::new(Mutex::new(None));
        let slot = Arc::clone(&consumer_component);
        let consumer = fw
            .install_activator(
                "consumer",
                "1.0.0",
                ScriptedActivator::boxed(
                    move |ctx| {
                        let component = ctx.create_component("foo-consumer");
                        component
                            .add_service_dependency(ServiceDependency::new("Foo").required(true));
                        ctx.dependency_manager().add(component.clone());
                        *slot.lock() = Some(component);
                        Ok(())
                    },
                    |_| Ok(()),
                ),
            )
            .unwrap();

        fw.start_all().unwrap();
        let component = consumer_component.lock().clone().unwrap();
        assert_eq!(component.state(), ComponentState::TrackingOptional);
        assert!(
            fw.bundle_context(consumer)
                .unwrap()
                .dependency_manager()
                .all_components_active()
        );

        let provider = fw.bundle_id("provider").unwrap();
        fw.stop_bundle(provider).unwrap();
        // Started components keep their instance and wait for a new Foo.
        assert_eq!(
            component.state(),
            ComponentState::InstantiatedAndWaitingForRequired
        );

        fw.stop_all().unwrap();
        assert_eq!(component.state(), ComponentState::Inactive);
        assert!(fw.bundle_context(consumer).unwrap().dependency_manager().is_empty());
    }

    #[test]
    fn test_bundle_receives_its_config_section() {
        let mut config = KeystoneConfig::default();
        config.bundles.insert(
            "greeter".to_string(),
            serde_json::json!({ "greeting": "Hej" }),
        );
        let fw = Framework::with_config(config);

        let seen = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&seen);
        let id = fw
            .install_activator(
                "greeter",
                "1.0.0",
                ScriptedActivator::boxed(
                    move |ctx| {
                        *sink.lock() = ctx.config()["greeting"].as_str().unwrap_or("").to_string();
                        Ok(())
                    },
                    |_| Ok(()),
                ),
            )
            .unwrap();
        fw.start_bundle(id).unwrap();

        assert_eq!(seen.lock().as_str(), "Hej");
    }

    #[test]
    fn test_bundles_info() {
        let fw = framework();
        let a = fw.install_activator("a", "1.0.0", publisher("A")).unwrap();
        fw.install_activator("b", "2.0.0", publisher("B")).unwrap();
        fw.start_bundle(a).unwrap();

        let infos = fw.bundles();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "a");
        assert_eq!(infos[0].state, BundleState::Active);
        assert_eq!(infos[0].registered_services, 1);
        assert_eq!(infos[1].version, "2.0.0");
        assert_eq!(infos[1].state, BundleState::Installed);
    }

    #[tokio::test]
    async fn test_run_until_starts_and_shuts_down() {
        let fw = framework();
        let id = fw.install_activator("provider", "1.0.0", publisher("Foo")).unwrap();

        let registry = Arc::clone(fw.registry());
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        fw.run_until(async move {
            flag.store(registry.registration_count() == 1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert!(observed.load(Ordering::SeqCst));
        assert!(!fw.is_running());
        assert_eq!(fw.bundle_state(id), None);
        assert_eq!(fw.registry().registration_count(), 0);

        // A second shutdown is a no-op.
        fw.shutdown();
    }
}
