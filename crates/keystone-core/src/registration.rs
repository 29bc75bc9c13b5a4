//! Service registrations.
//!
//! A [`ServiceRegistration`] is the registry's record of one published
//! service. It is a cheap, cloneable handle: every clone retains the
//! underlying record and dropping the last clone destroys it, so
//! destruction is deferred for as long as any reference or listener still
//! holds it.
//!
//! # Validity
//!
//! ```text
//! register_service()   ──► Valid
//! unregister_service() ──► Unregistering  (listeners are notified)
//!                      ──► Invalid        (references invalidated)
//! ```
//!
//! The state only moves forward.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::bundle::{BundleId, ServiceId, ServiceObject};
use crate::properties::{OBJECTCLASS, Properties, SERVICE_ID};

/// Produces a service object per consuming bundle.
///
/// The registry calls [`get_service`](Self::get_service) when a reference's
/// usage count goes from 0 to 1 and [`unget_service`](Self::unget_service)
/// when it drops back to 0. Factories must not call back into the registry
/// for the reference they are resolving.
pub trait ServiceFactory: Send + Sync {
    /// Creates (or looks up) the object handed to `consumer`.
    ///
    /// Returning `None` makes the corresponding `get_service` return `None`.
    fn get_service(&self, consumer: BundleId, properties: &Properties) -> Option<ServiceObject>;

    /// Returns an object previously produced for `consumer`.
    fn unget_service(&self, consumer: BundleId, properties: &Properties, service: ServiceObject) {
        let _ = (consumer, properties, service);
    }
}

/// Where a registration's service object comes from.
#[derive(Clone)]
pub enum ServiceSource {
    /// A single shared object.
    Object(ServiceObject),
    /// A per-consumer factory.
    Factory(Arc<dyn ServiceFactory>),
}

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegistrationState {
    /// Published and resolvable.
    Valid,
    /// `unregister_service` is notifying listeners; still resolvable.
    Unregistering,
    /// Withdrawn. Never becomes valid again.
    Invalid,
}

impl RegistrationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Valid,
            1 => Self::Unregistering,
            _ => Self::Invalid,
        }
    }
}

struct RegistrationInner {
    id: ServiceId,
    bundle: BundleId,
    name: String,
    properties: RwLock<Properties>,
    source: ServiceSource,
    state: AtomicU8,
}

/// Handle to one published service.
#[derive(Clone)]
pub struct ServiceRegistration {
    inner: Arc<RegistrationInner>,
}

impl ServiceRegistration {
    pub(crate) fn new(
        id: ServiceId,
        bundle: BundleId,
        name: &str,
        mut properties: Properties,
        source: ServiceSource,
    ) -> Self {
        properties.set(OBJECTCLASS, name);
        properties.set(SERVICE_ID, id);
        Self {
            inner: Arc::new(RegistrationInner {
                id,
                bundle,
                name: name.to_string(),
                properties: RwLock::new(properties),
                source,
                state: AtomicU8::new(0),
            }),
        }
    }

    /// The registry-assigned service id.
    pub fn service_id(&self) -> ServiceId {
        self.inner.id
    }

    /// The bundle that registered the service.
    pub fn bundle(&self) -> BundleId {
        self.inner.bundle
    }

    /// The registered service name.
    pub fn service_name(&self) -> &str {
        &self.inner.name
    }

    /// Snapshot of the current properties.
    pub fn properties(&self) -> Properties {
        self.inner.properties.read().clone()
    }

    /// Reads a single property.
    pub fn property(&self, key: &str) -> Option<String> {
        self.inner.properties.read().get(key).map(str::to_string)
    }

    /// The current ranking.
    pub fn ranking(&self) -> i64 {
        self.inner.properties.read().ranking()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegistrationState {
        RegistrationState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// `true` until the registration has been fully withdrawn.
    pub fn is_valid(&self) -> bool {
        self.state() != RegistrationState::Invalid
    }

    /// `true` when the service is produced by a [`ServiceFactory`].
    pub fn is_factory(&self) -> bool {
        matches!(self.inner.source, ServiceSource::Factory(_))
    }

    /// Number of live handles to this registration, including the
    /// registry's own while it is registered.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns `true` when both handles refer to the same registration.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn source(&self) -> &ServiceSource {
        &self.inner.source
    }

    /// Valid → Unregistering. Fails if unregistration already started.
    pub(crate) fn begin_unregister(&self) -> bool {
        self.inner
            .state
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn invalidate(&self) {
        self.inner.state.store(2, Ordering::Release);
    }

    /// Replaces the properties, keeping the registry-owned keys, and returns
    /// the previous snapshot.
    pub(crate) fn replace_properties(&self, mut properties: Properties) -> Properties {
        properties.set(OBJECTCLASS, &self.inner.name);
        properties.set(SERVICE_ID, self.inner.id);
        std::mem::replace(&mut *self.inner.properties.write(), properties)
    }

    /// Produces the object handed to `consumer`.
    pub(crate) fn resolve(&self, consumer: BundleId) -> Option<ServiceObject> {
        match &self.inner.source {
            ServiceSource::Object(object) => Some(Arc::clone(object)),
            ServiceSource::Factory(factory) => {
                let props = self.properties();
                factory.get_service(consumer, &props)
            }
        }
    }

    /// Gives an object obtained through [`resolve`](Self::resolve) back.
    pub(crate) fn release(&self, consumer: BundleId, service: ServiceObject) {
        if let ServiceSource::Factory(factory) = &self.inner.source {
            let props = self.properties();
            factory.unget_service(consumer, &props, service);
        }
    }
}

impl PartialEq for ServiceRegistration {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ServiceRegistration {}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("service_id", &self.inner.id)
            .field("bundle", &self.inner.bundle)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("factory", &self.is_factory())
            .finish()
    }
}
