//! Service trackers.
//!
//! A [`ServiceTracker`] follows every registration that matches a service
//! name and/or filter on behalf of one bundle. For each tracked service it
//! holds a reference and one usage, obtained when the service is added and
//! given back when it is removed.
//!
//! ```text
//! open()  ──► listener installed, existing services scanned ──► added(..)
//! Registered / Modified (now matching)                       ──► added(..)
//! Registered with service.replaces = <tracked id>             ──► swapped(old, new)
//! Modified (still matching)                                   ──► modified(..)
//! ModifiedEndMatch / Unregistering                            ──► removed(..)
//! close() ──► removed(..) for everything still tracked
//! ```
//!
//! Customizer callbacks run with no tracker or registry lock held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::bundle::{BundleId, ServiceId, ServiceObject, downcast_service};
use crate::error::ServiceResult;
use crate::event::{ListenerId, ServiceEvent, ServiceEventKind};
use crate::filter::{Filter, SharedFilter};
use crate::properties::{Properties, SERVICE_REPLACES};
use crate::reference::ServiceReference;
use crate::registration::{RegistrationState, ServiceRegistration};
use crate::registry::ServiceRegistry;

/// A service currently held by a tracker.
#[derive(Clone)]
pub struct TrackedService {
    reference: ServiceReference,
    service: ServiceObject,
}

impl TrackedService {
    /// The tracker's reference to the service.
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// The resolved service object.
    pub fn service(&self) -> &ServiceObject {
        &self.service
    }

    /// Downcasts the service object.
    pub fn service_as<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        downcast_service::<T>(&self.service)
    }

    /// Id of the tracked service.
    pub fn service_id(&self) -> ServiceId {
        self.reference.service_id()
    }

    /// Current ranking of the tracked service.
    pub fn ranking(&self) -> i64 {
        self.reference.ranking()
    }

    /// Current properties of the tracked service.
    pub fn properties(&self) -> Properties {
        self.reference.properties()
    }
}

impl std::fmt::Debug for TrackedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedService")
            .field("service_id", &self.service_id())
            .field("name", &self.reference.service_name())
            .finish()
    }
}

/// Receives tracker notifications.
pub trait TrackerCustomizer: Send + Sync {
    /// A matching service appeared.
    fn added(&self, service: &TrackedService);

    /// A tracked service's properties changed and it still matches.
    fn modified(&self, service: &TrackedService) {
        let _ = service;
    }

    /// A tracked service went away or stopped matching.
    fn removed(&self, service: &TrackedService);

    /// `new` replaced `old` in one step. Defaults to add-then-remove.
    fn swapped(&self, old: &TrackedService, new: &TrackedService) {
        self.added(new);
        self.removed(old);
    }
}

enum Arrival {
    Added,
    Duplicate,
    Swapped(TrackedService),
    Closed,
}

struct TrackerInner {
    registry: Arc<ServiceRegistry>,
    bundle: BundleId,
    name: Option<String>,
    filter: Option<SharedFilter>,
    customizer: Arc<dyn TrackerCustomizer>,
    tracked: Mutex<Vec<TrackedService>>,
    listener: Mutex<Option<ListenerId>>,
    open: AtomicBool,
}

impl TrackerInner {
    fn matcher(&self) -> SharedFilter {
        let name = self.name.clone();
        let filter = self.filter.clone();
        Arc::new(move |props: &Properties| {
            name.as_deref().is_none_or(|n| props.object_class() == Some(n))
                && filter.as_ref().is_none_or(|f| f.matches(props))
        })
    }

    fn handle(&self, event: &ServiceEvent) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        let service_id = event.registration.service_id();
        match event.kind {
            ServiceEventKind::Registered => self.arrive(&event.registration),
            ServiceEventKind::Modified => {
                let current = self
                    .tracked
                    .lock()
                    .iter()
                    .find(|t| t.service_id() == service_id)
                    .cloned();
                match current {
                    Some(tracked) => self.customizer.modified(&tracked),
                    None => self.arrive(&event.registration),
                }
            }
            ServiceEventKind::ModifiedEndMatch | ServiceEventKind::Unregistering => {
                self.depart(service_id)
            }
        }
    }

    fn arrive(&self, registration: &ServiceRegistration) {
        match self.registry.get_service_reference(self.bundle, registration) {
            Ok(reference) => self.track(reference),
            Err(e) => debug!(
                bundle = %self.bundle,
                service_id = registration.service_id(),
                error = %e,
                "Tracker could not reference arriving service"
            ),
        }
    }

    fn track(&self, reference: ServiceReference) {
        let service = match self.registry.get_service(self.bundle, &reference) {
            Ok(Some(service)) => service,
            _ => {
                if let Err(e) = self.registry.release_service_reference(self.bundle, &reference) {
                    debug!(bundle = %self.bundle, error = %e, "Tracker release failed");
                }
                return;
            }
        };
        let arrived = TrackedService { reference, service };
        let replaces = arrived.reference.properties().get_u64(SERVICE_REPLACES);

        let outcome = {
            let mut tracked = self.tracked.lock();
            // An Unregistering event that ran before this lock was taken found
            // nothing to remove; the registration state tells us it left.
            if !self.open.load(Ordering::Acquire)
                || arrived.reference.registration().state() != RegistrationState::Valid
            {
                Arrival::Closed
            } else if tracked.iter().any(|t| t.service_id() == arrived.service_id()) {
                Arrival::Duplicate
            } else if let Some(pos) =
                replaces.and_then(|id| tracked.iter().position(|t| t.service_id() == id))
            {
                Arrival::Swapped(std::mem::replace(&mut tracked[pos], arrived.clone()))
            } else {
                tracked.push(arrived.clone());
                Arrival::Added
            }
        };

        match outcome {
            Arrival::Added => {
                trace!(bundle = %self.bundle, service_id = arrived.service_id(), "Tracker added service");
                self.customizer.added(&arrived);
            }
            Arrival::Swapped(old) => {
                trace!(
                    bundle = %self.bundle,
                    old = old.service_id(),
                    new = arrived.service_id(),
                    "Tracker swapped service"
                );
                self.customizer.swapped(&old, &arrived);
                self.forget(&old);
            }
            Arrival::Duplicate | Arrival::Closed => self.forget(&arrived),
        }
    }

    fn depart(&self, service_id: ServiceId) {
        let removed = {
            let mut tracked = self.tracked.lock();
            tracked
                .iter()
                .position(|t| t.service_id() == service_id)
                .map(|pos| tracked.remove(pos))
        };
        if let Some(old) = removed {
            trace!(bundle = %self.bundle, service_id, "Tracker removed service");
            self.customizer.removed(&old);
            self.forget(&old);
        }
    }

    fn forget(&self, tracked: &TrackedService) {
        if let Err(e) = self.registry.unget_service(self.bundle, &tracked.reference) {
            debug!(bundle = %self.bundle, error = %e, "Tracker unget failed");
        }
        if let Err(e) = self
            .registry
            .release_service_reference(self.bundle, &tracked.reference)
        {
            debug!(bundle = %self.bundle, error = %e, "Tracker release failed");
        }
    }
}

/// Tracks the services matching a name and/or filter.
pub struct ServiceTracker {
    inner: Arc<TrackerInner>,
}

impl ServiceTracker {
    /// Creates a closed tracker. Call [`open`](Self::open) to start tracking.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        bundle: BundleId,
        name: Option<&str>,
        filter: Option<SharedFilter>,
        customizer: Arc<dyn TrackerCustomizer>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                registry,
                bundle,
                name: name.map(str::to_string),
                filter,
                customizer,
                tracked: Mutex::new(Vec::new()),
                listener: Mutex::new(None),
                open: AtomicBool::new(false),
            }),
        }
    }

    /// Installs the listener, then reports every matching service already
    /// registered. Opening an open tracker does nothing.
    pub fn open(&self) -> ServiceResult<()> {
        let inner = &self.inner;
        {
            let mut listener = inner.listener.lock();
            if listener.is_some() {
                return Ok(());
            }
            inner.open.store(true, Ordering::Release);
            let weak: Weak<TrackerInner> = Arc::downgrade(inner);
            let id = inner.registry.add_service_listener(
                inner.bundle,
                Some(inner.matcher()),
                Arc::new(move |event: &ServiceEvent| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle(event);
                    }
                }),
            );
            *listener = Some(id);
        }

        let existing = inner.registry.get_service_references(
            inner.bundle,
            inner.name.as_deref(),
            inner.filter.as_deref(),
        )?;
        for reference in existing {
            inner.track(reference);
        }
        debug!(
            bundle = %inner.bundle,
            service = ?inner.name,
            tracked = inner.tracked.lock().len(),
            "Service tracker opened"
        );
        Ok(())
    }

    /// Removes the listener and reports every tracked service as removed.
    pub fn close(&self) {
        let inner = &self.inner;
        let Some(id) = inner.listener.lock().take() else {
            return;
        };
        inner.open.store(false, Ordering::Release);
        inner.registry.remove_service_listener(id);

        let drained = std::mem::take(&mut *inner.tracked.lock());
        for tracked in &drained {
            inner.customizer.removed(tracked);
            inner.forget(tracked);
        }
        debug!(bundle = %inner.bundle, service = ?inner.name, "Service tracker closed");
    }

    /// `true` between [`open`](Self::open) and [`close`](Self::close).
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Snapshot of the tracked services in arrival order.
    pub fn tracked(&self) -> Vec<TrackedService> {
        self.inner.tracked.lock().clone()
    }

    /// The best tracked service: highest ranking, then lowest id.
    pub fn highest(&self) -> Option<TrackedService> {
        self.inner
            .tracked
            .lock()
            .iter()
            .min_by(|a, b| a.reference.cmp_rank(&b.reference))
            .cloned()
    }

    /// Number of tracked services.
    pub fn len(&self) -> usize {
        self.inner.tracked.lock().len()
    }

    /// `true` when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ServiceTracker {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::service_object;
    use crate::properties::SERVICE_RANKING;
    use crate::registration::ServiceFactory;
    use std::sync::mpsc;

    const PROVIDER: BundleId = BundleId(1);
    const CONSUMER: BundleId = BundleId(2);

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl TrackerCustomizer for Journal {
        fn added(&self, service: &TrackedService) {
            self.0.lock().push(format!("added {}", service.service_id()));
        }

        fn modified(&self, service: &TrackedService) {
            self.0.lock().push(format!("modified {}", service.service_id()));
        }

        fn removed(&self, service: &TrackedService) {
            self.0.lock().push(format!("removed {}", service.service_id()));
        }

        fn swapped(&self, old: &TrackedService, new: &TrackedService) {
            self.0
                .lock()
                .push(format!("swapped {} {}", old.service_id(), new.service_id()));
        }
    }

    fn register(registry: &ServiceRegistry, name: &str, props: Properties) -> ServiceRegistration {
        registry
            .register_service(PROVIDER, name, service_object(Arc::new(name.to_string())), props)
            .unwrap()
    }

    #[test]
    fn test_open_scans_and_follows_events() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = Arc::new(Journal::default());
        let a = register(&registry, "Foo", Properties::new());
        register(&registry, "Bar", Properties::new());

        let tracker = ServiceTracker::new(registry.clone(), CONSUMER, Some("Foo"), None, journal.clone());
        tracker.open().unwrap();
        let b = register(&registry, "Foo", Properties::new());
        assert_eq!(tracker.len(), 2);
        assert_eq!(registry.services_in_use(CONSUMER).len(), 2);

        registry.unregister_service(&a).unwrap();
        tracker.close();

        assert_eq!(
            journal.0.lock().as_slice(),
            &[
                format!("added {}", a.service_id()),
                format!("added {}", b.service_id()),
                format!("removed {}", a.service_id()),
                format!("removed {}", b.service_id()),
            ]
        );
        assert_eq!(registry.stats().references, 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_replacement_is_reported_as_swap() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = Arc::new(Journal::default());
        let tracker = ServiceTracker::new(registry.clone(), CONSUMER, Some("Foo"), None, journal.clone());
        tracker.open().unwrap();

        let old = register(&registry, "Foo", Properties::new());
        let new = register(
            &registry,
            "Foo",
            Properties::new().with(SERVICE_REPLACES, old.service_id()),
        );
        registry.unregister_service(&old).unwrap();

        assert_eq!(
            journal.0.lock().as_slice(),
            &[
                format!("added {}", old.service_id()),
                format!("swapped {} {}", old.service_id(), new.service_id()),
            ]
        );
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.tracked()[0].service_id(), new.service_id());
    }

    #[test]
    fn test_modified_and_end_match() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = Arc::new(Journal::default());
        let english: SharedFilter = Arc::new(crate::filter::property_equals("lang", "en"));
        let tracker = ServiceTracker::new(registry.clone(), CONSUMER, None, Some(english), journal.clone());
        tracker.open().unwrap();

        let reg = register(&registry, "Greeter", Properties::new().with("lang", "en"));
        registry
            .set_service_properties(&reg, Properties::new().with("lang", "en").with("v", 2))
            .unwrap();
        registry
            .set_service_properties(&reg, Properties::new().with("lang", "fr"))
            .unwrap();
        registry
            .set_service_properties(&reg, Properties::new().with("lang", "en"))
            .unwrap();

        let id = reg.service_id();
        assert_eq!(
            journal.0.lock().as_slice(),
            &[
                format!("added {id}"),
                format!("modified {id}"),
                format!("removed {id}"),
                format!("added {id}"),
            ]
        );
    }

    #[test]
    fn test_highest_prefers_ranking() {
        let registry = Arc::new(ServiceRegistry::new());
        let tracker = ServiceTracker::new(
            registry.clone(),
            CONSUMER,
            Some("Foo"),
            None,
            Arc::new(Journal::default()),
        );
        tracker.open().unwrap();
        register(&registry, "Foo", Properties::new());
        let best = register(&registry, "Foo", Properties::new().with(SERVICE_RANKING, 5));
        register(&registry, "Foo", Properties::new().with(SERVICE_RANKING, 5));

        let highest = tracker.highest().unwrap();
        assert_eq!(highest.service_id(), best.service_id());
        assert_eq!(highest.service_as::<String>().unwrap().as_str(), "Foo");
    }

    #[test]
    fn test_drop_closes_tracker() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = Arc::new(Journal::default());
        register(&registry, "Foo", Properties::new());
        {
            let tracker = ServiceTracker::new(registry.clone(), CONSUMER, Some("Foo"), None, journal.clone());
            tracker.open().unwrap();
        }
        assert_eq!(journal.0.lock().len(), 2);
        assert_eq!(registry.stats().listeners, 0);
        assert_eq!(registry.stats().references, 0);
    }

    /// Blocks in `get_service` until told to go on.
    struct GatedFactory {
        entered: mpsc::Sender<()>,
        proceed: Mutex<mpsc::Receiver<()>>,
    }

    impl ServiceFactory for GatedFactory {
        fn get_service(&self, _consumer: BundleId, _properties: &Properties) -> Option<ServiceObject> {
            self.entered.send(()).unwrap();
            self.proceed.lock().recv().unwrap();
            Some(service_object(Arc::new("gated".to_string())))
        }
    }

    #[test]
    fn test_service_withdrawn_while_resolving_is_not_tracked() {
        let registry = Arc::new(ServiceRegistry::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (proceed_tx, proceed_rx) = mpsc::channel();
        let reg = registry
            .register_service_factory(
                PROVIDER,
                "Foo",
                Arc::new(GatedFactory {
                    entered: entered_tx,
                    proceed: Mutex::new(proceed_rx),
                }),
                Properties::new(),
            )
            .unwrap();

        let journal = Arc::new(Journal::default());
        let tracker = Arc::new(ServiceTracker::new(
            registry.clone(),
            CONSUMER,
            Some("Foo"),
            None,
            journal.clone(),
        ));
        let opener = {
            let tracker = tracker.clone();
            std::thread::spawn(move || tracker.open().unwrap())
        };
        entered_rx.recv().unwrap();

        // Parks the unregistration after the tracker saw Unregistering but
        // before the registration is invalidated.
        let (unregistering_tx, unregistering_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let resume_rx = Mutex::new(resume_rx);
        let service_id = reg.service_id();
        registry.add_service_listener(
            PROVIDER,
            None,
            Arc::new(move |event: &ServiceEvent| {
                if event.kind == ServiceEventKind::Unregistering
                    && event.registration.service_id() == service_id
                {
                    unregistering_tx.send(()).unwrap();
                    resume_rx.lock().recv().unwrap();
                }
            }),
        );
        let unregisterer = {
            let registry = registry.clone();
            let reg = reg.clone();
            std::thread::spawn(move || registry.unregister_service(&reg).unwrap())
        };
        unregistering_rx.recv().unwrap();

        proceed_tx.send(()).unwrap();
        opener.join().unwrap();
        assert!(tracker.is_empty());
        assert!(journal.0.lock().is_empty());

        resume_tx.send(()).unwrap();
        unregisterer.join().unwrap();
        assert!(tracker.is_empty());
        assert_eq!(registry.stats().references, 0);
    }
}
