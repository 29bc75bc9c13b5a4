//! # Keystone Core
//!
//! The service layer of the Keystone component runtime.
//!
//! Bundles publish services into a [`ServiceRegistry`] and consume the
//! services of other bundles through counted [`ServiceReference`]s. The
//! registry delivers [`ServiceEvent`]s to listeners, and a
//! [`ServiceTracker`] turns those events into added / modified / removed /
//! swapped notifications for a filtered set of services.
//!
//! ```text
//! ┌──────────┐  register   ┌─────────────────┐  events   ┌────────────────┐
//! │ Provider │────────────▶│ ServiceRegistry │──────────▶│ ServiceTracker │
//! │  bundle  │             │                 │◀──────────│   (consumer)   │
//! └──────────┘             └─────────────────┘  get/unget└────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keystone_core::prelude::*;
//!
//! let registry = Arc::new(ServiceRegistry::new());
//! let reg = registry.register_service(
//!     BundleId(1),
//!     "Greeter",
//!     service_object(Arc::new("hello".to_string())),
//!     Properties::new().with(SERVICE_RANKING, 10),
//! )?;
//!
//! let refs = registry.get_service_references(BundleId(2), Some("Greeter"), None)?;
//! let greeter = registry.get_service(BundleId(2), &refs[0])?;
//! ```

pub mod bundle;
pub mod error;
pub mod event;
pub mod filter;
pub mod properties;
pub mod reference;
pub mod registration;
pub mod registry;
pub mod tracker;

pub use bundle::{BundleId, ServiceId, ServiceObject, downcast_service, service_object};
pub use error::{ServiceError, ServiceResult};
pub use event::{
    LISTENER_HOOK_SERVICE_NAME, ListenerHook, ListenerId, ListenerInfo, ServiceEvent,
    ServiceEventKind, ServiceListener,
};
pub use filter::{Filter, SharedFilter};
pub use properties::{
    DEFAULT_RANKING, OBJECTCLASS, Properties, SERVICE_ID, SERVICE_RANKING, SERVICE_REPLACES,
    SERVICE_VERSION,
};
pub use reference::ServiceReference;
pub use registration::{RegistrationState, ServiceFactory, ServiceRegistration, ServiceSource};
pub use registry::{RegistryStats, ServiceRegistry};
pub use tracker::{ServiceTracker, TrackedService, TrackerCustomizer};

/// Prelude for common imports.
pub mod prelude {
    pub use super::bundle::{BundleId, ServiceObject, downcast_service, service_object};
    pub use super::error::{ServiceError, ServiceResult};
    pub use super::event::{ServiceEvent, ServiceEventKind, ServiceListener};
    pub use super::filter::{Filter, SharedFilter};
    pub use super::properties::{Properties, SERVICE_RANKING, SERVICE_REPLACES};
    pub use super::registration::{ServiceFactory, ServiceRegistration};
    pub use super::registry::ServiceRegistry;
    pub use super::tracker::{ServiceTracker, TrackedService, TrackerCustomizer};
}
