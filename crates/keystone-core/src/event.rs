//! Service events, listeners and listener hooks.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::bundle::BundleId;
use crate::filter::SharedFilter;
use crate::registration::ServiceRegistration;

/// Service name under which [`ListenerHook`]s are registered.
///
/// The registered object must be an `Arc<dyn ListenerHook>` wrapped with
/// [`service_object`](crate::service_object).
pub const LISTENER_HOOK_SERVICE_NAME: &str = "keystone.listener_hook";

/// What happened to a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceEventKind {
    /// A service was published.
    Registered,
    /// Properties changed and still match the listener's filter.
    Modified,
    /// Properties changed and no longer match the listener's filter.
    ModifiedEndMatch,
    /// The service is being withdrawn. The registration is still usable for
    /// the duration of the callback.
    Unregistering,
}

/// A registry notification.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    /// What happened.
    pub kind: ServiceEventKind,
    /// The registration concerned.
    pub registration: ServiceRegistration,
}

/// Receives [`ServiceEvent`]s.
///
/// Listeners are always invoked with no registry lock held, so they may call
/// back into the registry.
pub trait ServiceListener: Send + Sync {
    /// Called for every event matching the listener's filter.
    fn service_changed(&self, event: &ServiceEvent);
}

impl<F> ServiceListener for F
where
    F: Fn(&ServiceEvent) + Send + Sync,
{
    fn service_changed(&self, event: &ServiceEvent) {
        self(event)
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes a listener to [`ListenerHook`]s.
#[derive(Clone)]
pub struct ListenerInfo {
    /// The listener.
    pub id: ListenerId,
    /// The bundle that added it.
    pub bundle: BundleId,
    /// Its filter, if any.
    pub filter: Option<SharedFilter>,
    /// `true` when reported through [`ListenerHook::removed`].
    pub removed: bool,
}

impl fmt::Debug for ListenerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerInfo")
            .field("id", &self.id)
            .field("bundle", &self.bundle)
            .field("filtered", &self.filter.is_some())
            .field("removed", &self.removed)
            .finish()
    }
}

/// Observes service listeners being added and removed.
///
/// A hook is told about every listener already present when it is
/// registered, and about each later addition or removal.
pub trait ListenerHook: Send + Sync {
    /// Listeners were added.
    fn added(&self, listeners: &[ListenerInfo]);

    /// Listeners were removed.
    fn removed(&self, listeners: &[ListenerInfo]);
}

pub(crate) type SharedListener = Arc<dyn ServiceListener>;
pub(crate) type SharedHook = Arc<dyn ListenerHook>;
