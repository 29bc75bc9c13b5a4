//! Service references.
//!
//! A [`ServiceReference`] is a per-(consumer, registration) handle with two
//! independent counters:
//!
//! - the **reference count** tracks how many sites of the consumer hold the
//!   handle; releasing it to zero removes the reference from the registry;
//! - the **usage count** tracks outstanding `get_service` calls without a
//!   matching `unget_service`; the resolved object is cached while it is
//!   non-zero and handed back to the registration when it drops to zero.
//!
//! Both counters are only mutated by the registry, under the reference's own
//! lock. Resolving the object on first use happens under a separate lock, so
//! a slow factory only holds up other first uses of the same reference.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::bundle::{BundleId, ServiceId, ServiceObject};
use crate::properties::Properties;
use crate::registration::ServiceRegistration;

pub(crate) struct ReferenceCounts {
    pub(crate) reference_count: usize,
    pub(crate) usage_count: usize,
    pub(crate) service: Option<ServiceObject>,
    /// Set once the registration was withdrawn.
    pub(crate) invalidated: bool,
    /// Set once the reference left the registry's table.
    pub(crate) removed: bool,
}

struct ReferenceInner {
    consumer: BundleId,
    registration: ServiceRegistration,
    counts: Mutex<ReferenceCounts>,
    resolving: Mutex<()>,
}

/// A consumer's handle to a [`ServiceRegistration`].
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<ReferenceInner>,
}

impl ServiceReference {
    pub(crate) fn new(consumer: BundleId, registration: ServiceRegistration) -> Self {
        Self {
            inner: Arc::new(ReferenceInner {
                consumer,
                registration,
                counts: Mutex::new(ReferenceCounts {
                    reference_count: 1,
                    usage_count: 0,
                    service: None,
                    invalidated: false,
                    removed: false,
                }),
                resolving: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn counts(&self) -> MutexGuard<'_, ReferenceCounts> {
        self.inner.counts.lock()
    }

    /// Serializes `get_service` calls on this reference. Never taken while
    /// the registry tables or the counts are locked.
    pub(crate) fn resolving(&self) -> MutexGuard<'_, ()> {
        self.inner.resolving.lock()
    }

    /// The bundle this reference was created for.
    pub fn consumer(&self) -> BundleId {
        self.inner.consumer
    }

    /// The referenced registration.
    pub fn registration(&self) -> &ServiceRegistration {
        &self.inner.registration
    }

    /// Id of the referenced service.
    pub fn service_id(&self) -> ServiceId {
        self.inner.registration.service_id()
    }

    /// Name of the referenced service.
    pub fn service_name(&self) -> &str {
        self.inner.registration.service_name()
    }

    /// The bundle that registered the referenced service.
    pub fn owner(&self) -> BundleId {
        self.inner.registration.bundle()
    }

    /// Snapshot of the registration's current properties.
    pub fn properties(&self) -> Properties {
        self.inner.registration.properties()
    }

    /// Reads a single property of the registration.
    pub fn property(&self, key: &str) -> Option<String> {
        self.inner.registration.property(key)
    }

    /// Ranking of the referenced service.
    pub fn ranking(&self) -> i64 {
        self.inner.registration.ranking()
    }

    /// `false` once the registration was withdrawn or the reference released.
    pub fn is_valid(&self) -> bool {
        let counts = self.counts();
        !counts.invalidated && !counts.removed && self.inner.registration.is_valid()
    }

    /// Current reference count.
    pub fn reference_count(&self) -> usize {
        self.counts().reference_count
    }

    /// Current usage count.
    pub fn usage_count(&self) -> usize {
        self.counts().usage_count
    }

    /// Returns `true` when both handles are the same reference.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Orders references best-first: higher ranking, then lower service id.
    pub fn cmp_rank(&self, other: &Self) -> Ordering {
        other
            .ranking()
            .cmp(&self.ranking())
            .then_with(|| self.service_id().cmp(&other.service_id()))
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ServiceReference {}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        f.debug_struct("ServiceReference")
            .field("consumer", &self.inner.consumer)
            .field("service_id", &self.service_id())
            .field("name", &self.service_name())
            .field("reference_count", &counts.reference_count)
            .field("usage_count", &counts.usage_count)
            .field("invalidated", &counts.invalidated)
            .finish()
    }
}
