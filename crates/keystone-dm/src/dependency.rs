//! Service dependencies of a component.
//!
//! A [`ServiceDependency`] describes which services a component needs and
//! how it wants to hear about them. Once added to a
//! [`Component`](crate::Component) it is backed by a
//! [`ServiceTracker`], whose notifications are turned into
//! [`DependencyEvent`]s and queued on the component's executor.

use std::fmt;
use std::sync::{Arc, Weak};

use keystone_core::{
    Filter, Properties, ServiceId, ServiceObject, ServiceReference, ServiceTracker, SharedFilter,
    TrackedService, TrackerCustomizer, downcast_service,
};
use parking_lot::RwLock;
use serde::Serialize;

use crate::component::{ComponentInner, EventKind};

/// How a live component observes changes of a dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum UpdateStrategy {
    /// The component is stopped before and restarted after the change, with
    /// its provided interfaces unregistered in between.
    #[default]
    Suspend,
    /// Callbacks are invoked on the running component, which synchronizes
    /// access itself.
    Locking,
}

/// A field kept pointing at a dependency's best service.
pub type ServiceSlot = Arc<RwLock<Option<ServiceObject>>>;

/// Creates an empty [`ServiceSlot`].
pub fn service_slot() -> ServiceSlot {
    Arc::new(RwLock::new(None))
}

/// Identifies a dependency within its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DependencyId(pub u64);

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One matched service of a dependency.
///
/// The properties are a snapshot taken when the event was produced; a
/// `Changed` event replaces the snapshot.
#[derive(Clone)]
pub struct DependencyEvent {
    reference: ServiceReference,
    service: ServiceObject,
    properties: Properties,
}

impl DependencyEvent {
    pub(crate) fn from_tracked(tracked: &TrackedService) -> Self {
        Self {
            reference: tracked.reference().clone(),
            service: Arc::clone(tracked.service()),
            properties: tracked.properties(),
        }
    }

    /// The component's reference to the service.
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// The service object.
    pub fn service(&self) -> &ServiceObject {
        &self.service
    }

    /// Downcasts the service object.
    pub fn service_as<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        downcast_service::<T>(&self.service)
    }

    /// Properties snapshot.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Id of the matched service.
    pub fn service_id(&self) -> ServiceId {
        self.reference.service_id()
    }

    /// Ranking according to the snapshot.
    pub fn ranking(&self) -> i64 {
        self.properties.ranking()
    }

    /// Best-first ordering: higher ranking, then lower service id.
    pub(crate) fn outranks(&self, other: &Self) -> bool {
        (self.ranking(), std::cmp::Reverse(self.service_id()))
            > (other.ranking(), std::cmp::Reverse(other.service_id()))
    }
}

impl fmt::Debug for DependencyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyEvent")
            .field("service_id", &self.service_id())
            .field("ranking", &self.ranking())
            .finish()
    }
}

/// Picks the best-ranked event.
pub(crate) fn best_of(events: &[DependencyEvent]) -> Option<&DependencyEvent> {
    events
        .iter()
        .reduce(|best, e| if e.outranks(best) { e } else { best })
}

pub(crate) type SetFn = Arc<dyn Fn(Option<&DependencyEvent>) + Send + Sync>;
pub(crate) type EventFn = Arc<dyn Fn(&DependencyEvent) + Send + Sync>;
pub(crate) type SwapFn = Arc<dyn Fn(&DependencyEvent, &DependencyEvent) + Send + Sync>;

/// The callbacks of one dependency. Absent callbacks are skipped.
#[derive(Clone, Default)]
pub(crate) struct DependencyCallbacks {
    pub(crate) set: Option<SetFn>,
    pub(crate) add: Option<EventFn>,
    pub(crate) change: Option<EventFn>,
    pub(crate) remove: Option<EventFn>,
    pub(crate) swap: Option<SwapFn>,
}

impl DependencyCallbacks {
    pub(crate) fn is_configured(&self) -> bool {
        self.set.is_some()
            || self.add.is_some()
            || self.change.is_some()
            || self.remove.is_some()
            || self.swap.is_some()
    }
}

/// Describes a service a component depends on.
///
/// # Example
///
/// ```rust,ignore
/// let logger = service_slot();
/// let dep = ServiceDependency::new("Logger")
///     .required(true)
///     .strategy(UpdateStrategy::Locking)
///     .on_add(|event| println!("logger {} arrived", event.service_id()))
///     .auto_inject(logger.clone());
/// component.add_service_dependency(dep);
/// ```
#[derive(Clone, Default)]
pub struct ServiceDependency {
    pub(crate) service_name: Option<String>,
    pub(crate) filter: Option<SharedFilter>,
    pub(crate) required: bool,
    pub(crate) strategy: UpdateStrategy,
    pub(crate) callbacks: DependencyCallbacks,
    pub(crate) auto_inject: Option<ServiceSlot>,
}

impl ServiceDependency {
    /// An optional dependency on services registered under `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::default()
        }
    }

    /// An optional dependency on every service matching `filter`.
    pub fn for_filter(filter: impl Filter + 'static) -> Self {
        Self {
            filter: Some(Arc::new(filter)),
            ..Self::default()
        }
    }

    /// Narrows the dependency with an additional filter.
    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Makes the dependency required (or optional again).
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Sets the update strategy.
    pub fn strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Called with the best-ranked service (or `None`) whenever it may have
    /// changed.
    pub fn on_set(mut self, f: impl Fn(Option<&DependencyEvent>) + Send + Sync + 'static) -> Self {
        self.callbacks.set = Some(Arc::new(f));
        self
    }

    /// Called for each matched service that becomes visible.
    pub fn on_add(mut self, f: impl Fn(&DependencyEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.add = Some(Arc::new(f));
        self
    }

    /// Called when a matched service's properties change.
    pub fn on_change(mut self, f: impl Fn(&DependencyEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.change = Some(Arc::new(f));
        self
    }

    /// Called for each matched service that stops being visible.
    pub fn on_remove(mut self, f: impl Fn(&DependencyEvent) + Send + Sync + 'static) -> Self {
        self.callbacks.remove = Some(Arc::new(f));
        self
    }

    /// Called with `(old, new)` when one service replaces another.
    ///
    /// Without it a replacement is delivered as add(new) then remove(old).
    pub fn on_swap(
        mut self,
        f: impl Fn(&DependencyEvent, &DependencyEvent) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.swap = Some(Arc::new(f));
        self
    }

    /// Keeps `slot` pointing at the best-ranked service.
    pub fn auto_inject(mut self, slot: ServiceSlot) -> Self {
        self.auto_inject = Some(slot);
        self
    }

    /// The service name, if the dependency has one.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// `true` for required dependencies.
    pub fn is_required(&self) -> bool {
        self.required
    }
}

impl fmt::Debug for ServiceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDependency")
            .field("service_name", &self.service_name)
            .field("filtered", &self.filter.is_some())
            .field("required", &self.required)
            .field("strategy", &self.strategy)
            .field("auto_inject", &self.auto_inject.is_some())
            .finish()
    }
}

/// A dependency attached to a component.
pub(crate) struct Dependency {
    pub(crate) id: DependencyId,
    pub(crate) config: ServiceDependency,
    pub(crate) instance_bound: bool,
    pub(crate) available: bool,
    pub(crate) tracker: Option<ServiceTracker>,
}

impl Dependency {
    pub(crate) fn new(id: DependencyId, config: ServiceDependency) -> Self {
        Self {
            id,
            config,
            instance_bound: false,
            available: false,
            tracker: None,
        }
    }

    pub(crate) fn view(&self) -> DependencyView {
        DependencyView {
            id: self.id,
            required: self.config.required,
            instance_bound: self.instance_bound,
            strategy: self.config.strategy,
            callbacks: self.config.callbacks.clone(),
            auto_inject: self.config.auto_inject.clone(),
        }
    }
}

/// What the component needs of a dependency to run its callbacks with the
/// bookkeeping lock released.
#[derive(Clone)]
pub(crate) struct DependencyView {
    pub(crate) id: DependencyId,
    pub(crate) required: bool,
    pub(crate) instance_bound: bool,
    pub(crate) strategy: UpdateStrategy,
    pub(crate) callbacks: DependencyCallbacks,
    pub(crate) auto_inject: Option<ServiceSlot>,
}

impl DependencyView {
    pub(crate) fn invoke_set(&self, best: Option<&DependencyEvent>) {
        if let Some(set) = &self.callbacks.set {
            set(best);
        }
    }

    pub(crate) fn invoke_add(&self, event: &DependencyEvent) {
        if let Some(add) = &self.callbacks.add {
            add(event);
        }
    }

    pub(crate) fn invoke_change(&self, event: &DependencyEvent) {
        if let Some(change) = &self.callbacks.change {
            change(event);
        }
    }

    pub(crate) fn invoke_remove(&self, event: &DependencyEvent) {
        if let Some(remove) = &self.callbacks.remove {
            remove(event);
        }
    }

    pub(crate) fn invoke_swap(&self, old: &DependencyEvent, new: &DependencyEvent) {
        match &self.callbacks.swap {
            Some(swap) => swap(old, new),
            None => {
                self.invoke_add(new);
                self.invoke_remove(old);
            }
        }
    }

    pub(crate) fn inject(&self, best: Option<&DependencyEvent>) {
        if let Some(slot) = &self.auto_inject {
            *slot.write() = best.map(|e| Arc::clone(e.service()));
        }
    }
}

/// Forwards tracker notifications to the owning component.
pub(crate) struct DependencyCustomizer {
    pub(crate) component: Weak<ComponentInner>,
    pub(crate) dependency: DependencyId,
}

impl DependencyCustomizer {
    fn forward(&self, kind: EventKind) {
        if let Some(component) = self.component.upgrade() {
            ComponentInner::submit_event(&component, self.dependency, kind);
        }
    }
}

impl TrackerCustomizer for DependencyCustomizer {
    fn added(&self, service: &TrackedService) {
        self.forward(EventKind::Added(DependencyEvent::from_tracked(service)));
    }

    fn modified(&self, service: &TrackedService) {
        self.forward(EventKind::Changed(DependencyEvent::from_tracked(service)));
    }

    fn removed(&self, service: &TrackedService) {
        self.forward(EventKind::Removed(DependencyEvent::from_tracked(service)));
    }

    fn swapped(&self, old: &TrackedService, new: &TrackedService) {
        self.forward(EventKind::Swapped(
            DependencyEvent::from_tracked(old),
            DependencyEvent::from_tracked(new),
        ));
    }
}
