//! Per-bundle component management.

use std::sync::Arc;

use keystone_core::{BundleId, ServiceRegistry};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::component::{Component, ComponentId, ComponentInfo, ComponentState};
use crate::error::{ComponentError, ComponentResult};

/// Owns the components of one bundle.
///
/// Components added to the manager are started; removing them stops and
/// destroys them.
pub struct DependencyManager {
    bundle: BundleId,
    registry: Arc<ServiceRegistry>,
    components: Mutex<Vec<Component>>,
}

impl DependencyManager {
    pub fn new(bundle: BundleId, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            bundle,
            registry,
            components: Mutex::new(Vec::new()),
        }
    }

    /// The bundle the managed components act for.
    pub fn bundle(&self) -> BundleId {
        self.bundle
    }

    /// Creates an inactive component bound to this manager's bundle. It is
    /// not managed until passed to [`add`](Self::add).
    pub fn create_component(&self, name: impl Into<String>) -> Component {
        Component::new(name, self.bundle, Arc::clone(&self.registry))
    }

    /// Takes ownership of `component` and starts it.
    pub fn add(&self, component: Component) {
        debug!(bundle = %self.bundle, component = %component.name(), "Adding component");
        self.components.lock().push(component.clone());
        component.start();
    }

    /// Stops, destroys and forgets a component.
    pub fn remove(&self, id: ComponentId) -> ComponentResult<()> {
        let component = {
            let mut components = self.components.lock();
            let pos = components
                .iter()
                .position(|c| c.id() == id)
                .ok_or_else(|| ComponentError::illegal_state(format!("component {id} is not managed")))?;
            components.remove(pos)
        };
        component.destroy();
        Ok(())
    }

    /// Removes every component, most recently added first.
    pub fn remove_all(&self) {
        let components = std::mem::take(&mut *self.components.lock());
        if components.is_empty() {
            return;
        }
        info!(bundle = %self.bundle, count = components.len(), "Removing all components");
        for component in components.iter().rev() {
            component.destroy();
        }
    }

    /// Handles of the managed components.
    pub fn components(&self) -> Vec<Component> {
        self.components.lock().clone()
    }

    /// Number of managed components.
    pub fn len(&self) -> usize {
        self.components.lock().len()
    }

    /// `true` when no component is managed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` when every managed component is running.
    pub fn all_components_active(&self) -> bool {
        self.components
            .lock()
            .iter()
            .all(|c| c.state() == ComponentState::TrackingOptional)
    }

    /// Snapshots of every managed component.
    pub fn info(&self) -> Vec<ComponentInfo> {
        self.components().iter().map(Component::info).collect()
    }
}

impl Drop for DependencyManager {
    fn drop(&mut self) {
        self.remove_all();
    }
}
