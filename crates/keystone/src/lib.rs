//! # Keystone
//!
//! A dynamic, service-oriented component runtime.
//!
//! Bundles publish services into a shared registry and consume the services
//! of other bundles. Components declare the services they need and move
//! through a managed lifecycle as those services come and go.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ install/start ┌──────────┐ register/get ┌─────────────────┐
//! │ Framework │──────────────▶│  Bundle  │─────────────▶│ ServiceRegistry │
//! │ (runtime) │               │ activator│              │     (core)      │
//! └───────────┘               └──────────┘              └─────────────────┘
//!                                  │ add                       │ events
//!                                  ▼                           ▼
//!                          ┌──────────────────┐        ┌────────────────┐
//!                          │ DependencyManager│───────▶│   Component    │
//!                          │       (dm)       │        │ state machine  │
//!                          └──────────────────┘        └────────────────┘
//! ```
//!
//! - **core**: properties, filters, the registry, references and trackers
//! - **dm**: service dependencies, the serial executor and components
//! - **runtime**: the framework, bundle contexts, configuration and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keystone::prelude::*;
//!
//! struct Hello;
//!
//! impl BundleActivator for Hello {
//!     fn start(&mut self, ctx: &BundleContext) -> Result<(), BoxError> {
//!         let component = ctx.create_component("hello");
//!         component.add_interface(
//!             "Greeter",
//!             service_object(Arc::new("hello".to_string())),
//!             Properties::new(),
//!         )?;
//!         ctx.dependency_manager().add(component);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let framework = Framework::new();
//!     framework.install_activator("hello", "0.1.0", Box::new(Hello))?;
//!     framework.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: `keystone.toml` configuration files
//! - `yaml-config`: `keystone.yaml` configuration files
//! - `json-log`: JSON log output

pub use keystone_core as core;
pub use keystone_dm as dm;
pub use keystone_runtime as runtime;

pub use keystone_runtime::bundle;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use keystone::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Framework and bundles
    pub use keystone_runtime::{
        BundleActivator, BundleContext, BundleDescriptor, BundleState, Framework, KeystoneConfig,
        RuntimeError, RuntimeResult,
    };

    // Services
    pub use keystone_core::{
        BundleId, Filter, Properties, SERVICE_RANKING, SERVICE_REPLACES, ServiceError,
        ServiceEvent, ServiceEventKind, ServiceFactory, ServiceListener, ServiceObject,
        ServiceReference, ServiceRegistration, ServiceRegistry, ServiceResult, ServiceTracker,
        SharedFilter, TrackedService, TrackerCustomizer, downcast_service, filter,
        service_object,
    };

    // Components
    pub use keystone_dm::{
        BoxError, Component, ComponentError, ComponentResult, ComponentState, DependencyEvent,
        DependencyManager, LifecycleCallbacks, ServiceDependency, ServiceSlot, UpdateStrategy,
        service_slot,
    };

    pub use keystone_runtime::tracing::{debug, error, info, trace, warn};
}
