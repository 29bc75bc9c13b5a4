//! # Keystone DM
//!
//! Dependency-managed components on top of the Keystone service registry.
//!
//! A [`Component`] declares the services it provides and the services it
//! needs. It is initialized once its required dependencies are available,
//! started once its instance-bound dependencies are too, and its provided
//! interfaces are registered only while it runs. A [`DependencyManager`]
//! owns the components of one bundle.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keystone_dm::prelude::*;
//!
//! let manager = DependencyManager::new(bundle, registry.clone());
//! let component = manager.create_component("greeter");
//! component.set_callbacks(
//!     LifecycleCallbacks::new()
//!         .on_start(|| { tracing::info!("greeter up"); Ok(()) })
//! )?;
//! component.add_interface("Greeter", service_object(greeter), Properties::new())?;
//! component.add_service_dependency(
//!     ServiceDependency::new("Logger")
//!         .required(true)
//!         .on_set(|logger| println!("logger: {:?}", logger.map(|e| e.service_id()))),
//! );
//! manager.add(component);
//! ```

pub mod component;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod manager;

pub use component::{
    COMPONENT_ID, Component, ComponentId, ComponentInfo, ComponentState, DependencyInfo,
    InterfaceInfo, LifecycleCallbacks, calculate_new_state,
};
pub use dependency::{
    DependencyEvent, DependencyId, ServiceDependency, ServiceSlot, UpdateStrategy, service_slot,
};
pub use error::{BoxError, ComponentError, ComponentResult};
pub use executor::SerialExecutor;
pub use manager::DependencyManager;

/// Prelude for common imports.
pub mod prelude {
    pub use super::component::{Component, ComponentState, LifecycleCallbacks};
    pub use super::dependency::{
        DependencyEvent, ServiceDependency, ServiceSlot, UpdateStrategy, service_slot,
    };
    pub use super::error::{BoxError, ComponentError, ComponentResult};
    pub use super::manager::DependencyManager;
}
