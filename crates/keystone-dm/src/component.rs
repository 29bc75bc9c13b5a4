//! Dependency-managed components.
//!
//! A [`Component`] bundles lifecycle callbacks, provided interfaces and
//! service dependencies. It activates once its required dependencies are
//! satisfied and deactivates when they go away.
//!
//! # States
//!
//! ```text
//! Inactive
//!   │ ▲   start() / stop()
//!   ▼ │
//! WaitingForRequired
//!   │ ▲   required dependencies available: init() / stopped: deinit()
//!   ▼ │
//! InstantiatedAndWaitingForRequired
//!   │ ▲   instance-bound dependencies available: start() / dependency lost or stopped: stop()
//!   ▼ │
//! TrackingOptional
//! ```
//!
//! Transitions and their side effects:
//!
//! - `Inactive → WaitingForRequired`: dependency tracking starts, optional
//!   dependencies first.
//! - `WaitingForRequired → InstantiatedAndWaitingForRequired`: `add` for the
//!   required dependencies, auto-injection, `init`.
//! - `InstantiatedAndWaitingForRequired → TrackingOptional`: `add` for
//!   instance-bound and optional dependencies, auto-injection, `start`,
//!   provided interfaces registered.
//! - The reverse edges undo this in the opposite order. A failing `stop` or
//!   `deinit` is logged and recorded, and the teardown carries on.
//! - A failing `init` or `start` aborts the transition: the `add`s of that
//!   step are compensated with `remove`s and the component stays where it
//!   was until it is stopped or started again.
//!
//! # Events
//!
//! Dependency events and public mutations are queued on the component's
//! [`SerialExecutor`], so callbacks of one component never run concurrently.
//! Callbacks run with no component or registry lock held.
//!
//! While tracking, any add, change, remove or swap of a
//! [`UpdateStrategy::Suspend`] dependency is bracketed by `stop` and `start`,
//! with the provided interfaces unregistered in between. If that `start`
//! fails the component is stopped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use keystone_core::{
    BundleId, Properties, SERVICE_VERSION, ServiceError, ServiceId, ServiceObject,
    ServiceRegistration, ServiceRegistry, ServiceTracker,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::dependency::{
    Dependency, DependencyCustomizer, DependencyEvent, DependencyId, DependencyView,
    ServiceDependency, UpdateStrategy, best_of,
};
use crate::error::{BoxError, ComponentError, ComponentResult};
use crate::executor::SerialExecutor;

/// Property stamped on every interface a component registers.
pub const COMPONENT_ID: &str = "component.id";

// =============================================================================
// State machine
// =============================================================================

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComponentState {
    /// Not started.
    Inactive,
    /// Started; some required dependency is missing.
    WaitingForRequired,
    /// Initialized; waiting for instance-bound dependencies or for `start`.
    InstantiatedAndWaitingForRequired,
    /// Running, with provided interfaces registered.
    TrackingOptional,
}

impl ComponentState {
    /// Number of states.
    pub const COUNT: usize = 4;

    /// Stable name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::WaitingForRequired => "WAITING_FOR_REQUIRED",
            Self::InstantiatedAndWaitingForRequired => "INSTANTIATED_AND_WAITING_FOR_REQUIRED",
            Self::TrackingOptional => "TRACKING_OPTIONAL",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes the single next state reachable from `current`.
///
/// `required_available` covers required dependencies that are not
/// instance-bound; `instance_bound_available` covers the instance-bound
/// required ones. Returns `current` at a fixed point.
pub fn calculate_new_state(
    current: ComponentState,
    started: bool,
    required_available: bool,
    instance_bound_available: bool,
) -> ComponentState {
    use ComponentState::*;
    match current {
        Inactive if started => WaitingForRequired,
        Inactive => Inactive,
        WaitingForRequired if !started => Inactive,
        WaitingForRequired if required_available => InstantiatedAndWaitingForRequired,
        WaitingForRequired => WaitingForRequired,
        InstantiatedAndWaitingForRequired if !started => WaitingForRequired,
        InstantiatedAndWaitingForRequired if required_available && instance_bound_available => {
            TrackingOptional
        }
        InstantiatedAndWaitingForRequired => InstantiatedAndWaitingForRequired,
        TrackingOptional if started && required_available && instance_bound_available => {
            TrackingOptional
        }
        TrackingOptional => InstantiatedAndWaitingForRequired,
    }
}

/// Upper bound on transitions per settle; two full passes over the states.
const MAX_TRANSITIONS: usize = 2 * ComponentState::COUNT;

// =============================================================================
// Callbacks & public types
// =============================================================================

type LifecycleFn = Arc<dyn Fn() -> Result<(), BoxError> + Send + Sync>;
type TransitionObserver = Arc<dyn Fn(ComponentState, ComponentState) + Send + Sync>;

/// The `init`/`start`/`stop`/`deinit` callbacks of a component.
#[derive(Clone, Default)]
pub struct LifecycleCallbacks {
    init: Option<LifecycleFn>,
    start: Option<LifecycleFn>,
    stop: Option<LifecycleFn>,
    deinit: Option<LifecycleFn>,
}

impl LifecycleCallbacks {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the required dependencies are first satisfied.
    pub fn on_init(mut self, f: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    /// Called before the provided interfaces are registered.
    pub fn on_start(mut self, f: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.start = Some(Arc::new(f));
        self
    }

    /// Called after the provided interfaces are unregistered.
    pub fn on_stop(mut self, f: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.stop = Some(Arc::new(f));
        self
    }

    /// Called when the component is torn down.
    pub fn on_deinit(mut self, f: impl Fn() -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        self.deinit = Some(Arc::new(f));
        self
    }
}

#[derive(Clone, Copy)]
enum Lifecycle {
    Init,
    Start,
    Stop,
    Deinit,
}

impl Lifecycle {
    fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Deinit => "deinit",
        }
    }

    fn pick(self, callbacks: &LifecycleCallbacks) -> Option<LifecycleFn> {
        match self {
            Self::Init => callbacks.init.clone(),
            Self::Start => callbacks.start.clone(),
            Self::Stop => callbacks.stop.clone(),
            Self::Deinit => callbacks.deinit.clone(),
        }
    }
}

/// Identifies a component within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

/// Snapshot of a component, see [`Component::info`].
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: String,
    pub bundle: BundleId,
    pub state: ComponentState,
    pub active: bool,
    pub dependencies: Vec<DependencyInfo>,
    pub interfaces: Vec<InterfaceInfo>,
}

/// Snapshot of one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyInfo {
    pub id: DependencyId,
    pub service_name: Option<String>,
    pub required: bool,
    pub instance_bound: bool,
    pub available: bool,
    pub strategy: UpdateStrategy,
    pub matched: usize,
}

/// Snapshot of one provided interface.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub version: Option<String>,
    pub service_id: Option<ServiceId>,
    pub properties: Properties,
}

// =============================================================================
// Internals
// =============================================================================

pub(crate) enum EventKind {
    Added(DependencyEvent),
    Changed(DependencyEvent),
    Removed(DependencyEvent),
    Swapped(DependencyEvent, DependencyEvent),
}

struct ProvidedInterface {
    name: String,
    version: Option<String>,
    service: ServiceObject,
    properties: Properties,
    registration: Option<ServiceRegistration>,
}

type Snapshot = Vec<(DependencyView, Vec<DependencyEvent>)>;

struct ComponentCore {
    state: ComponentState,
    started: bool,
    /// Set after a failed `init`/`start`; cleared by the next start/stop.
    halted: bool,
    /// `start` succeeded and `stop` was not called since.
    running: bool,
    dependencies: Vec<Dependency>,
    events: HashMap<DependencyId, Vec<DependencyEvent>>,
    interfaces: Vec<ProvidedInterface>,
    callbacks: LifecycleCallbacks,
}

impl ComponentCore {
    fn dependency_mut(&mut self, id: DependencyId) -> Option<&mut Dependency> {
        self.dependencies.iter_mut().find(|d| d.id == id)
    }

    /// (required available, instance-bound available)
    fn availability(&self) -> (bool, bool) {
        let mut required = true;
        let mut instance_bound = true;
        for dep in self.dependencies.iter().filter(|d| d.config.required && !d.available) {
            if dep.instance_bound {
                instance_bound = false;
            } else {
                required = false;
            }
        }
        (required, instance_bound)
    }

    fn snapshot(&self, select: impl Fn(&Dependency) -> bool) -> Snapshot {
        self.dependencies
            .iter()
            .filter(|d| select(d))
            .map(|d| (d.view(), self.events.get(&d.id).cloned().unwrap_or_default()))
            .collect()
    }
}

pub(crate) struct ComponentInner {
    id: ComponentId,
    name: String,
    bundle: BundleId,
    registry: Arc<ServiceRegistry>,
    executor: SerialExecutor,
    core: Mutex<ComponentCore>,
    active: AtomicBool,
    next_dependency: AtomicU64,
    observers: Mutex<Vec<TransitionObserver>>,
    last_error: Mutex<Option<ComponentError>>,
}

impl ComponentInner {
    fn submit(this: &Arc<Self>, task: impl FnOnce(&Arc<Self>) + Send + 'static) {
        let component = Arc::clone(this);
        this.executor.execute(move || task(&component));
    }

    pub(crate) fn submit_event(this: &Arc<Self>, dependency: DependencyId, kind: EventKind) {
        Self::submit(this, move |component| component.handle_event(dependency, kind));
    }

    fn state(&self) -> ComponentState {
        self.core.lock().state
    }

    fn record(&self, error: ComponentError) {
        error!(component = %self.name, id = %self.id, error = %error, "Component error");
        *self.last_error.lock() = Some(error);
    }

    // ─── Settling ────────────────────────────────────────────────────────────

    fn handle_change(self: &Arc<Self>) {
        if let Err(e) = self.settle() {
            self.record(e);
        }
    }

    fn settle(self: &Arc<Self>) -> ComponentResult<()> {
        for _ in 0..MAX_TRANSITIONS {
            let (current, next) = {
                let core = self.core.lock();
                if core.halted {
                    return Ok(());
                }
                let (required, instance_bound) = core.availability();
                (
                    core.state,
                    calculate_new_state(core.state, core.started, required, instance_bound),
                )
            };
            if current == next {
                return Ok(());
            }
            if let Err(e) = self.perform_transition(current, next) {
                self.core.lock().halted = true;
                return Err(e);
            }
            self.notify(current, next);
        }
        error!(component = %self.name, "Component state did not settle");
        Err(ComponentError::invariant(format!(
            "component '{}' did not settle within {MAX_TRANSITIONS} transitions",
            self.name
        )))
    }

    fn perform_transition(
        self: &Arc<Self>,
        from: ComponentState,
        to: ComponentState,
    ) -> ComponentResult<()> {
        use ComponentState::*;
        match (from, to) {
            (Inactive, WaitingForRequired) => {
                self.start_tracking(|_| true)?;
                self.core.lock().state = to;
            }
            (WaitingForRequired, InstantiatedAndWaitingForRequired) => {
                let group = self
                    .core
                    .lock()
                    .snapshot(|d| d.config.required && !d.instance_bound);
                deliver_added(&group);
                if let Err(e) = self.invoke(Lifecycle::Init) {
                    deliver_removed(&group);
                    return Err(e);
                }
                self.core.lock().state = to;
            }
            (InstantiatedAndWaitingForRequired, TrackingOptional) => {
                let group = self
                    .core
                    .lock()
                    .snapshot(|d| !d.config.required || d.instance_bound);
                deliver_added(&group);
                if let Err(e) = self.invoke(Lifecycle::Start) {
                    deliver_removed(&group);
                    return Err(e);
                }
                {
                    let mut core = self.core.lock();
                    core.running = true;
                    core.state = to;
                }
                self.register_interfaces();
                info!(component = %self.name, id = %self.id, "Component active");
            }
            (TrackingOptional, InstantiatedAndWaitingForRequired) => {
                self.unregister_interfaces();
                self.core.lock().state = to;
                self.stop_body();
                let optional = self.core.lock().snapshot(|d| !d.config.required);
                deliver_removed(&optional);
                let bound = self
                    .core
                    .lock()
                    .snapshot(|d| d.config.required && d.instance_bound);
                deliver_removed(&bound);
            }
            (InstantiatedAndWaitingForRequired, WaitingForRequired) => {
                self.core.lock().state = to;
                if let Err(e) = self.invoke(Lifecycle::Deinit) {
                    self.record(e);
                }
                let group = self
                    .core
                    .lock()
                    .snapshot(|d| d.config.required && !d.instance_bound);
                deliver_removed(&group);
            }
            (WaitingForRequired, Inactive) => {
                self.core.lock().state = to;
                self.stop_tracking();
            }
            _ => {
                return Err(ComponentError::invariant(format!(
                    "no transition from {from} to {to}"
                )));
            }
        }
        Ok(())
    }

    fn notify(&self, from: ComponentState, to: ComponentState) {
        debug!(component = %self.name, id = %self.id, from = %from, to = %to, "Component state transition");
        let observers = self.observers.lock().clone();
        for observer in observers {
            observer(from, to);
        }
    }

    fn invoke(&self, which: Lifecycle) -> ComponentResult<()> {
        let callback = which.pick(&self.core.lock().callbacks);
        let Some(callback) = callback else {
            return Ok(());
        };
        trace!(component = %self.name, callback = which.name(), "Invoking lifecycle callback");
        callback().map_err(|e| ComponentError::callback(&self.name, which.name(), &e))
    }

    /// Calls `stop` if the body is running. Failures are recorded.
    fn stop_body(&self) {
        let was_running = std::mem::replace(&mut self.core.lock().running, false);
        if was_running && let Err(e) = self.invoke(Lifecycle::Stop) {
            self.record(e);
        }
    }

    // ─── Suspend / resume ────────────────────────────────────────────────────

    fn mutate(self: &Arc<Self>, state: ComponentState, view: &DependencyView, f: impl FnOnce()) {
        let suspend = state == ComponentState::TrackingOptional
            && view.strategy == UpdateStrategy::Suspend
            && (view.callbacks.is_configured() || view.auto_inject.is_some());
        if !suspend {
            f();
            return;
        }

        trace!(component = %self.name, dependency = %view.id, "Suspending component");
        self.unregister_interfaces();
        self.stop_body();
        f();
        match self.invoke(Lifecycle::Start) {
            Ok(()) => {
                self.core.lock().running = true;
                self.register_interfaces();
            }
            Err(e) => {
                self.record(e);
                warn!(component = %self.name, "Resume failed, stopping component");
                self.core.lock().started = false;
                self.active.store(false, Ordering::Release);
                self.handle_change();
            }
        }
    }

    // ─── Dependency events ───────────────────────────────────────────────────

    fn handle_event(self: &Arc<Self>, id: DependencyId, kind: EventKind) {
        match kind {
            EventKind::Added(event) => self.handle_added(id, event),
            EventKind::Changed(event) => self.handle_changed(id, event),
            EventKind::Removed(event) => self.handle_removed(id, event),
            EventKind::Swapped(old, new) => self.handle_swapped(id, old, new),
        }
    }

    fn handle_added(self: &Arc<Self>, id: DependencyId, event: DependencyEvent) {
        let (view, best, state) = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            let Some(dep) = core.dependency_mut(id) else {
                trace!(component = %self.name, dependency = %id, "Event for a removed dependency");
                return;
            };
            dep.available = true;
            let view = dep.view();
            let events = core.events.entry(id).or_default();
            events.push(event.clone());
            (view, best_of(events).cloned(), core.state)
        };

        if is_live(state, &view) {
            self.mutate(state, &view, || {
                view.invoke_add(&event);
                view.invoke_set(best.as_ref());
                view.inject(best.as_ref());
            });
        }
        self.handle_change();
    }

    fn handle_changed(self: &Arc<Self>, id: DependencyId, event: DependencyEvent) {
        let (view, best, state) = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            let Some(dep) = core.dependency_mut(id) else {
                return;
            };
            let view = dep.view();
            let events = core.events.entry(id).or_default();
            let Some(slot) = events.iter_mut().find(|e| e.service_id() == event.service_id())
            else {
                debug!(component = %self.name, service_id = event.service_id(), "Change for an unknown service");
                return;
            };
            *slot = event.clone();
            (view, best_of(events).cloned(), core.state)
        };

        if is_live(state, &view) {
            self.mutate(state, &view, || {
                view.invoke_change(&event);
                view.invoke_set(best.as_ref());
                view.inject(best.as_ref());
            });
        }
    }

    fn handle_removed(self: &Arc<Self>, id: DependencyId, event: DependencyEvent) {
        {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            let events = core.events.get(&id);
            let remaining = events.map_or(0, |events| {
                events.len()
                    - usize::from(events.iter().any(|e| e.service_id() == event.service_id()))
            });
            let Some(dep) = core.dependency_mut(id) else {
                return;
            };
            dep.available = remaining > 0;
        }
        self.handle_change();

        let (view, best, state) = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            let Some(dep) = core.dependency_mut(id) else {
                return;
            };
            let view = dep.view();
            let Some(events) = core.events.get_mut(&id) else {
                return;
            };
            let Some(pos) = events.iter().position(|e| e.service_id() == event.service_id())
            else {
                return;
            };
            events.remove(pos);
            (view, best_of(events).cloned(), core.state)
        };

        if is_live(state, &view) {
            self.mutate(state, &view, || {
                view.invoke_remove(&event);
                view.invoke_set(best.as_ref());
                view.inject(best.as_ref());
            });
        }
    }

    fn handle_swapped(self: &Arc<Self>, id: DependencyId, old: DependencyEvent, new: DependencyEvent) {
        let (view, best, state) = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            let Some(dep) = core.dependency_mut(id) else {
                return;
            };
            dep.available = true;
            let view = dep.view();
            let events = core.events.entry(id).or_default();
            match events.iter_mut().find(|e| e.service_id() == old.service_id()) {
                Some(slot) => *slot = new.clone(),
                None => events.push(new.clone()),
            }
            (view, best_of(events).cloned(), core.state)
        };

        if is_live(state, &view) {
            self.mutate(state, &view, || {
                view.invoke_swap(&old, &new);
                view.invoke_set(best.as_ref());
                view.inject(best.as_ref());
            });
        }
        self.handle_change();
    }

    // ─── Tracking ────────────────────────────────────────────────────────────

    fn start_tracking(self: &Arc<Self>, select: impl Fn(&Dependency) -> bool) -> ComponentResult<()> {
        let mut pending: Vec<(DependencyId, ServiceDependency)> = self
            .core
            .lock()
            .dependencies
            .iter()
            .filter(|d| d.tracker.is_none() && select(d))
            .map(|d| (d.id, d.config.clone()))
            .collect();
        pending.sort_by_key(|(_, config)| config.required);

        for (id, config) in pending {
            let tracker = ServiceTracker::new(
                Arc::clone(&self.registry),
                self.bundle,
                config.service_name.as_deref(),
                config.filter.clone(),
                Arc::new(DependencyCustomizer {
                    component: Arc::downgrade(self),
                    dependency: id,
                }),
            );
            tracker.open()?;
            if let Some(dep) = self.core.lock().dependency_mut(id) {
                dep.tracker = Some(tracker);
            }
        }
        Ok(())
    }

    /// Closes every tracker and forgets matched services. Instance-bound
    /// marks are cleared since the instance they were bound to is gone.
    fn stop_tracking(&self) {
        let trackers: Vec<ServiceTracker> = {
            let mut guard = self.core.lock();
            let core = &mut *guard;
            core.events.clear();
            core.dependencies
                .iter_mut()
                .filter_map(|d| {
                    d.instance_bound = false;
                    d.available = false;
                    d.tracker.take()
                })
                .collect()
        };
        for tracker in trackers {
            tracker.close();
        }
    }

    // ─── Interfaces ──────────────────────────────────────────────────────────

    fn register_interfaces(&self) {
        let pending: Vec<(usize, String, ServiceObject, Properties)> = self
            .core
            .lock()
            .interfaces
            .iter()
            .enumerate()
            .filter(|(_, i)| i.registration.is_none())
            .map(|(idx, i)| {
                let mut props = i.properties.clone();
                props.set(COMPONENT_ID, self.id);
                if let Some(version) = &i.version {
                    props.set(SERVICE_VERSION, version);
                }
                (idx, i.name.clone(), Arc::clone(&i.service), props)
            })
            .collect();

        for (idx, name, service, props) in pending {
            match self.registry.register_service(self.bundle, &name, service, props) {
                Ok(registration) => {
                    let orphan = {
                        let mut core = self.core.lock();
                        match core.interfaces.get_mut(idx) {
                            Some(interface) if interface.name == name => {
                                interface.registration = Some(registration);
                                None
                            }
                            _ => Some(registration),
                        }
                    };
                    if let Some(registration) = orphan
                        && let Err(e) = self.registry.unregister_service(&registration)
                    {
                        warn!(component = %self.name, service = %name, error = %e, "Failed to unregister orphaned interface");
                    }
                }
                Err(e) => self.record(e.into()),
            }
        }
    }

    fn unregister_interfaces(&self) {
        let registrations: Vec<ServiceRegistration> = self
            .core
            .lock()
            .interfaces
            .iter_mut()
            .filter_map(|i| i.registration.take())
            .collect();
        for registration in registrations {
            if let Err(e) = self.registry.unregister_service(&registration) {
                warn!(component = %self.name, error = %e, "Failed to unregister provided interface");
            }
        }
    }

    // ─── Tasks ───────────────────────────────────────────────────────────────

    fn add_dependency_task(self: &Arc<Self>, id: DependencyId, config: ServiceDependency) {
        let bound = {
            let mut core = self.core.lock();
            let mut dependency = Dependency::new(id, config);
            dependency.instance_bound = core.state != ComponentState::Inactive;
            let bound = dependency.instance_bound;
            core.dependencies.push(dependency);
            core.events.entry(id).or_default();
            bound
        };
        if !bound {
            return;
        }
        if let Err(e) = self.start_tracking(|d| d.id == id) {
            self.record(e);
        }
        // Re-evaluate after the events queued by the new tracker.
        Self::submit(self, |component| component.handle_change());
    }

    fn remove_dependency_task(self: &Arc<Self>, id: DependencyId) {
        let removed = {
            let mut core = self.core.lock();
            let pos = core.dependencies.iter().position(|d| d.id == id);
            pos.map(|pos| {
                core.events.remove(&id);
                core.dependencies.remove(pos)
            })
        };
        let Some(mut dependency) = removed else {
            warn!(component = %self.name, dependency = %id, "Removing an unknown dependency");
            return;
        };
        dependency.view().inject(None);
        if let Some(tracker) = dependency.tracker.take() {
            tracker.close();
        }
        self.handle_change();
    }
}

fn is_live(state: ComponentState, view: &DependencyView) -> bool {
    match state {
        ComponentState::TrackingOptional => true,
        ComponentState::InstantiatedAndWaitingForRequired => view.required && !view.instance_bound,
        _ => false,
    }
}

fn deliver_added(group: &Snapshot) {
    for (view, events) in group {
        for event in events {
            view.invoke_add(event);
        }
        let best = best_of(events);
        view.invoke_set(best);
        view.inject(best);
    }
}

fn deliver_removed(group: &Snapshot) {
    for (view, events) in group {
        for event in events {
            view.invoke_remove(event);
        }
        view.invoke_set(None);
        view.inject(None);
    }
}

impl Drop for ComponentInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        for interface in &mut core.interfaces {
            if let Some(registration) = interface.registration.take() {
                warn!(component = %self.name, service = %interface.name, "Component dropped while its interface is registered");
                if let Err(e) = self.registry.unregister_service(&registration) {
                    warn!(component = %self.name, error = %e, "Failed to unregister provided interface");
                }
            }
        }
    }
}

// =============================================================================
// Component
// =============================================================================

/// A dependency-managed component.
///
/// Handles are cheap to clone; all clones control the same component.
///
/// # Example
///
/// ```rust,ignore
/// let component = Component::new("greeter", bundle, registry.clone());
/// component.set_callbacks(LifecycleCallbacks::new().on_start(|| Ok(())))?;
/// component.add_interface("Greeter", service_object(greeter), Properties::new())?;
/// component.add_service_dependency(ServiceDependency::new("Logger").required(true));
/// component.start();
/// ```
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

impl Component {
    /// Creates an inactive component publishing and consuming on behalf of
    /// `bundle`.
    pub fn new(name: impl Into<String>, bundle: BundleId, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            inner: Arc::new(ComponentInner {
                id: ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.into(),
                bundle,
                registry,
                executor: SerialExecutor::new(),
                core: Mutex::new(ComponentCore {
                    state: ComponentState::Inactive,
                    started: false,
                    halted: false,
                    running: false,
                    dependencies: Vec::new(),
                    events: HashMap::new(),
                    interfaces: Vec::new(),
                    callbacks: LifecycleCallbacks::default(),
                }),
                active: AtomicBool::new(false),
                next_dependency: AtomicU64::new(1),
                observers: Mutex::new(Vec::new()),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn bundle(&self) -> BundleId {
        self.inner.bundle
    }

    /// Current state.
    pub fn state(&self) -> ComponentState {
        self.inner.state()
    }

    /// `true` between [`start`](Self::start) and the completion of
    /// [`stop`](Self::stop).
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// `true` when running with its interfaces registered.
    pub fn is_available(&self) -> bool {
        self.state() == ComponentState::TrackingOptional
    }

    /// The most recent callback or bookkeeping error.
    pub fn last_error(&self) -> Option<ComponentError> {
        self.inner.last_error.lock().clone()
    }

    /// Replaces the lifecycle callbacks. Not allowed while active.
    pub fn set_callbacks(&self, callbacks: LifecycleCallbacks) -> ComponentResult<()> {
        if self.is_active() {
            return Err(ComponentError::illegal_state(format!(
                "cannot change callbacks of active component '{}'",
                self.inner.name
            )));
        }
        self.inner.core.lock().callbacks = callbacks;
        Ok(())
    }

    /// Observes every state transition as `(from, to)`.
    pub fn on_transition(&self, f: impl Fn(ComponentState, ComponentState) + Send + Sync + 'static) {
        self.inner.observers.lock().push(Arc::new(f));
    }

    /// Adds a provided interface, registered while the component runs.
    pub fn add_interface(
        &self,
        name: &str,
        service: ServiceObject,
        properties: Properties,
    ) -> ComponentResult<()> {
        self.push_interface(name, None, service, properties)
    }

    /// Adds a provided interface carrying a `service.version` property.
    pub fn add_interface_with_version(
        &self,
        name: &str,
        version: &str,
        service: ServiceObject,
        properties: Properties,
    ) -> ComponentResult<()> {
        self.push_interface(name, Some(version.to_string()), service, properties)
    }

    fn push_interface(
        &self,
        name: &str,
        version: Option<String>,
        service: ServiceObject,
        properties: Properties,
    ) -> ComponentResult<()> {
        if name.is_empty() {
            return Err(ServiceError::illegal_argument("interface name must not be empty").into());
        }
        let interface = ProvidedInterface {
            name: name.to_string(),
            version,
            service,
            properties,
            registration: None,
        };
        ComponentInner::submit(&self.inner, move |component| {
            let running = {
                let mut core = component.core.lock();
                core.interfaces.push(interface);
                core.state == ComponentState::TrackingOptional && core.running
            };
            if running {
                component.register_interfaces();
            }
        });
        Ok(())
    }

    /// Removes every provided interface named `name`, unregistering it if
    /// needed.
    pub fn remove_interface(&self, name: &str) {
        let name = name.to_string();
        ComponentInner::submit(&self.inner, move |component| {
            let registrations: Vec<ServiceRegistration> = {
                let mut core = component.core.lock();
                let (removed, kept) = std::mem::take(&mut core.interfaces)
                    .into_iter()
                    .partition::<Vec<_>, _>(|i| i.name == name);
                core.interfaces = kept;
                removed.into_iter().filter_map(|i| i.registration).collect()
            };
            for registration in registrations {
                if let Err(e) = component.registry.unregister_service(&registration) {
                    warn!(component = %component.name, service = %name, error = %e, "Failed to unregister removed interface");
                }
            }
        });
    }

    /// Adds a dependency. Dependencies added once the component has started
    /// are instance-bound.
    pub fn add_service_dependency(&self, dependency: ServiceDependency) -> DependencyId {
        let id = DependencyId(self.inner.next_dependency.fetch_add(1, Ordering::Relaxed));
        ComponentInner::submit(&self.inner, move |component| {
            component.add_dependency_task(id, dependency)
        });
        id
    }

    /// Removes a dependency, stopping its tracker.
    pub fn remove_service_dependency(&self, id: DependencyId) {
        ComponentInner::submit(&self.inner, move |component| component.remove_dependency_task(id));
    }

    /// Starts the component; it activates once its dependencies allow.
    pub fn start(&self) {
        self.inner.active.store(true, Ordering::Release);
        ComponentInner::submit(&self.inner, |component| {
            {
                let mut core = component.core.lock();
                core.started = true;
                core.halted = false;
            }
            component.handle_change();
        });
    }

    /// Stops the component, tearing it down to [`ComponentState::Inactive`].
    pub fn stop(&self) {
        ComponentInner::submit(&self.inner, |component| {
            {
                let mut core = component.core.lock();
                core.started = false;
                core.halted = false;
            }
            component.handle_change();
            component.active.store(false, Ordering::Release);
        });
    }

    /// Stops the component and drops its dependencies and interfaces.
    pub fn destroy(&self) {
        self.stop();
        ComponentInner::submit(&self.inner, |component| {
            component.stop_tracking();
            component.unregister_interfaces();
            let mut core = component.core.lock();
            core.dependencies.clear();
            core.events.clear();
            core.interfaces.clear();
            debug!(component = %component.name, id = %component.id, "Component destroyed");
        });
    }

    /// Snapshot of the component's bookkeeping.
    pub fn info(&self) -> ComponentInfo {
        let core = self.inner.core.lock();
        ComponentInfo {
            id: self.inner.id,
            name: self.inner.name.clone(),
            bundle: self.inner.bundle,
            state: core.state,
            active: self.is_active(),
            dependencies: core
                .dependencies
                .iter()
                .map(|d| DependencyInfo {
                    id: d.id,
                    service_name: d.config.service_name.clone(),
                    required: d.config.required,
                    instance_bound: d.instance_bound,
                    available: d.available,
                    strategy: d.config.strategy,
                    matched: core.events.get(&d.id).map_or(0, Vec::len),
                })
                .collect(),
            interfaces: core
                .interfaces
                .iter()
                .map(|i| InterfaceInfo {
                    name: i.name.clone(),
                    version: i.version.clone(),
                    service_id: i.registration.as_ref().map(ServiceRegistration::service_id),
                    properties: i.properties.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::service_slot;
    use keystone_core::{SERVICE_REPLACES, downcast_service, service_object};
    use std::sync::atomic::AtomicUsize;
    use ComponentState::*;

    const PROVIDER: BundleId = BundleId(1);
    const CONSUMER: BundleId = BundleId(2);

    type Journal = Arc<Mutex<Vec<String>>>;

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn lifecycle(journal: &Journal) -> LifecycleCallbacks {
        let (a, b, c, d) = (journal.clone(), journal.clone(), journal.clone(), journal.clone());
        LifecycleCallbacks::new()
            .on_init(move || {
                a.lock().push("init".into());
                Ok(())
            })
            .on_start(move || {
                b.lock().push("start".into());
                Ok(())
            })
            .on_stop(move || {
                c.lock().push("stop".into());
                Ok(())
            })
            .on_deinit(move || {
                d.lock().push("deinit".into());
                Ok(())
            })
    }

    fn logged(journal: &Journal, dep: ServiceDependency, label: &'static str) -> ServiceDependency {
        let (a, r) = (journal.clone(), journal.clone());
        dep.on_add(move |e| a.lock().push(format!("add {label}#{}", e.service_id())))
            .on_remove(move |e| r.lock().push(format!("remove {label}#{}", e.service_id())))
    }

    fn publish(registry: &ServiceRegistry, name: &str) -> ServiceRegistration {
        registry
            .register_service(PROVIDER, name, service_object(Arc::new(name.to_string())), Properties::new())
            .unwrap()
    }

    fn component(registry: &Arc<ServiceRegistry>, journal: &Journal) -> Component {
        let component = Component::new("test", CONSUMER, registry.clone());
        component.set_callbacks(lifecycle(journal)).unwrap();
        component
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().clone()
    }

    #[test]
    fn test_calculate_new_state() {
        assert_eq!(calculate_new_state(Inactive, false, true, true), Inactive);
        assert_eq!(calculate_new_state(Inactive, true, false, false), WaitingForRequired);
        assert_eq!(calculate_new_state(WaitingForRequired, true, false, true), WaitingForRequired);
        assert_eq!(
            calculate_new_state(WaitingForRequired, true, true, false),
            InstantiatedAndWaitingForRequired
        );
        assert_eq!(calculate_new_state(WaitingForRequired, false, true, true), Inactive);
        assert_eq!(
            calculate_new_state(InstantiatedAndWaitingForRequired, true, true, true),
            TrackingOptional
        );
        assert_eq!(
            calculate_new_state(InstantiatedAndWaitingForRequired, true, false, true),
            InstantiatedAndWaitingForRequired
        );
        assert_eq!(
            calculate_new_state(InstantiatedAndWaitingForRequired, false, true, true),
            WaitingForRequired
        );
        assert_eq!(calculate_new_state(TrackingOptional, true, true, true), TrackingOptional);
        assert_eq!(
            calculate_new_state(TrackingOptional, true, true, false),
            InstantiatedAndWaitingForRequired
        );
        assert_eq!(
            calculate_new_state(TrackingOptional, false, true, true),
            InstantiatedAndWaitingForRequired
        );
    }

    #[test]
    fn test_required_service_activates_and_deactivates() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let foo = publish(&registry, "Foo");

        let component = component(&registry, &journal);
        component.add_service_dependency(ServiceDependency::new("Foo").required(true));
        component.start();
        assert_eq!(component.state(), TrackingOptional);
        assert!(component.is_available());

        registry.unregister_service(&foo).unwrap();
        assert_eq!(component.state(), InstantiatedAndWaitingForRequired);
        let stops = entries(&journal).iter().filter(|e| *e == "stop").count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_activation_visits_every_state_in_order() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        publish(&registry, "Foo");

        let component = component(&registry, &journal);
        let visited = Arc::new(Mutex::new(Vec::new()));
        let sink = visited.clone();
        component.on_transition(move |from, to| sink.lock().push((from, to)));
        component.add_service_dependency(ServiceDependency::new("Foo").required(true));
        component.start();

        assert_eq!(
            *visited.lock(),
            vec![
                (Inactive, WaitingForRequired),
                (WaitingForRequired, InstantiatedAndWaitingForRequired),
                (InstantiatedAndWaitingForRequired, TrackingOptional),
            ]
        );
        assert_eq!(entries(&journal), vec!["init", "start"]);
    }

    #[test]
    fn test_activation_is_independent_of_arrival_order() {
        for order in [["A", "B"], ["B", "A"]] {
            let registry = Arc::new(ServiceRegistry::new());
            let journal = journal();
            let component = component(&registry, &journal);
            component.add_service_dependency(ServiceDependency::new("A").required(true));
            component.add_service_dependency(ServiceDependency::new("B").required(true));
            component.start();
            assert_eq!(component.state(), WaitingForRequired);

            publish(&registry, order[0]);
            assert_eq!(component.state(), WaitingForRequired);
            publish(&registry, order[1]);
            assert_eq!(component.state(), TrackingOptional);
            assert_eq!(entries(&journal), vec!["init", "start"]);
        }
    }

    #[test]
    fn test_losing_last_required_service_leaves_tracking() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let first = publish(&registry, "Foo");
        let second = publish(&registry, "Foo");

        let component = component(&registry, &journal);
        component.add_service_dependency(logged(&journal, ServiceDependency::new("Foo").required(true), "foo"));
        component.start();

        registry.unregister_service(&first).unwrap();
        assert_eq!(component.state(), TrackingOptional);
        registry.unregister_service(&second).unwrap();
        assert_eq!(component.state(), InstantiatedAndWaitingForRequired);

        assert_eq!(
            entries(&journal),
            vec![
                "add foo#1".to_string(),
                "init".into(),
                "start".into(),
                "stop".into(),
                "add foo#2".into(),
                "start".into(),
                "stop".into(),
                "remove foo#1".into(),
                "start".into(),
                "stop".into(),
                "remove foo#2".into(),
            ]
        );
    }

    #[test]
    fn test_interfaces_registered_only_while_tracking() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let foo = publish(&registry, "Foo");

        let component = component(&registry, &journal);
        component
            .add_interface_with_version("Bar", "1.2.0", service_object(Arc::new(7u32)), Properties::new())
            .unwrap();
        component.add_service_dependency(ServiceDependency::new("Foo").required(true));
        component.start();

        let bars = registry.get_service_references(BundleId(9), Some("Bar"), None).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].property(SERVICE_VERSION).as_deref(), Some("1.2.0"));
        assert_eq!(
            bars[0].property(COMPONENT_ID),
            Some(component.id().to_string())
        );
        assert!(component.info().interfaces[0].service_id.is_some());

        registry.unregister_service(&foo).unwrap();
        assert!(!bars[0].is_valid());
        assert!(registry.get_service_references(BundleId(9), Some("Bar"), None).unwrap().is_empty());
    }

    #[test]
    fn test_remove_interface_tolerates_withdrawn_registration() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let component = component(&registry, &journal);
        component
            .add_interface("Bar", service_object(Arc::new(7u32)), Properties::new())
            .unwrap();
        component
            .add_interface("Baz", service_object(Arc::new(8u32)), Properties::new())
            .unwrap();
        component.start();
        assert_eq!(registry.registered_services(CONSUMER).len(), 2);

        // Someone else withdraws Bar behind the component's back.
        let bar = registry
            .registered_services(CONSUMER)
            .into_iter()
            .find(|r| r.service_name() == "Bar")
            .unwrap();
        registry.unregister_service(&bar).unwrap();

        component.remove_interface("Bar");
        component.remove_interface("Baz");
        assert!(registry.registered_services(CONSUMER).is_empty());
        assert!(component.info().interfaces.is_empty());
        assert!(component.is_available());
    }

    #[test]
    fn test_suspend_strategy_brackets_optional_changes() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let component = component(&registry, &journal);
        component.add_service_dependency(logged(&journal, ServiceDependency::new("Opt"), "opt"));
        component.start();
        assert_eq!(component.state(), TrackingOptional);

        let opt = publish(&registry, "Opt");
        registry.unregister_service(&opt).unwrap();

        let id = opt.service_id();
        assert_eq!(
            entries(&journal),
            vec![
                "init".to_string(),
                "start".into(),
                "stop".into(),
                format!("add opt#{id}"),
                "start".into(),
                "stop".into(),
                format!("remove opt#{id}"),
                "start".into(),
            ]
        );
    }

    #[test]
    fn test_locking_strategy_keeps_component_running() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let component = component(&registry, &journal);
        component.add_service_dependency(logged(
            &journal,
            ServiceDependency::new("Opt").strategy(UpdateStrategy::Locking),
            "opt",
        ));
        component.start();

        let opt = publish(&registry, "Opt");
        registry.unregister_service(&opt).unwrap();

        let id = opt.service_id();
        assert_eq!(
            entries(&journal),
            vec![
                "init".to_string(),
                "start".into(),
                format!("add opt#{id}"),
                format!("remove opt#{id}"),
            ]
        );
    }

    #[test]
    fn test_replacement_is_swapped_without_losing_availability() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let slot = service_slot();
        let old = publish(&registry, "Foo");

        let component = component(&registry, &journal);
        let sink = journal.clone();
        component.add_service_dependency(
            ServiceDependency::new("Foo")
                .required(true)
                .strategy(UpdateStrategy::Locking)
                .auto_inject(slot.clone())
                .on_swap(move |old, new| {
                    sink.lock().push(format!("swap {}->{}", old.service_id(), new.service_id()))
                }),
        );
        component.start();

        let new = registry
            .register_service(
                PROVIDER,
                "Foo",
                service_object(Arc::new("replacement".to_string())),
                Properties::new().with(SERVICE_REPLACES, old.service_id()),
            )
            .unwrap();
        registry.unregister_service(&old).unwrap();

        assert_eq!(component.state(), TrackingOptional);
        assert_eq!(
            entries(&journal),
            vec![
                "init".to_string(),
                "start".into(),
                format!("swap {}->{}", old.service_id(), new.service_id()),
            ]
        );
        let injected = slot.read().clone().unwrap();
        assert_eq!(downcast_service::<String>(&injected).unwrap().as_str(), "replacement");
    }

    #[test]
    fn test_change_is_suspended_while_tracking() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let opt = publish(&registry, "Opt");

        let component = component(&registry, &journal);
        let sink = journal.clone();
        component.add_service_dependency(
            ServiceDependency::new("Opt")
                .on_change(move |e| sink.lock().push(format!("change opt#{}", e.service_id()))),
        );
        component.start();
        assert_eq!(component.state(), TrackingOptional);
        journal.lock().clear();

        registry
            .set_service_properties(&opt, Properties::new().with("color", "red"))
            .unwrap();

        assert_eq!(component.state(), TrackingOptional);
        assert_eq!(
            entries(&journal),
            vec![
                "stop".to_string(),
                format!("change opt#{}", opt.service_id()),
                "start".into(),
            ]
        );
    }

    #[test]
    fn test_swap_is_suspended_while_tracking() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let old = publish(&registry, "Foo");

        let component = component(&registry, &journal);
        let sink = journal.clone();
        component.add_service_dependency(
            ServiceDependency::new("Foo")
                .required(true)
                .on_swap(move |old, new| {
                    sink.lock().push(format!("swap {}->{}", old.service_id(), new.service_id()))
                }),
        );
        component.start();
        journal.lock().clear();

        let new = registry
            .register_service(
                PROVIDER,
                "Foo",
                service_object(Arc::new("replacement".to_string())),
                Properties::new().with(SERVICE_REPLACES, old.service_id()),
            )
            .unwrap();

        assert_eq!(component.state(), TrackingOptional);
        assert_eq!(
            entries(&journal),
            vec![
                "stop".to_string(),
                format!("swap {}->{}", old.service_id(), new.service_id()),
                "start".into(),
            ]
        );
    }

    #[test]
    fn test_swap_while_instantiated() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let old = publish(&registry, "Foo");
        let bar = publish(&registry, "Bar");

        let component = component(&registry, &journal);
        let (w, c) = (journal.clone(), journal.clone());
        component.add_service_dependency(
            ServiceDependency::new("Foo")
                .required(true)
                .on_swap(move |old, new| {
                    w.lock().push(format!("swap {}->{}", old.service_id(), new.service_id()))
                })
                .on_change(move |e| c.lock().push(format!("change foo#{}", e.service_id()))),
        );
        component.add_service_dependency(ServiceDependency::new("Bar").required(true));
        component.start();
        assert_eq!(component.state(), TrackingOptional);

        registry.unregister_service(&bar).unwrap();
        assert_eq!(component.state(), InstantiatedAndWaitingForRequired);
        journal.lock().clear();

        let new = registry
            .register_service(
                PROVIDER,
                "Foo",
                service_object(Arc::new("replacement".to_string())),
                Properties::new().with(SERVICE_REPLACES, old.service_id()),
            )
            .unwrap();
        registry
            .set_service_properties(
                &new,
                Properties::new().with(SERVICE_REPLACES, old.service_id()).with("color", "red"),
            )
            .unwrap();

        assert_eq!(component.state(), InstantiatedAndWaitingForRequired);
        assert_eq!(
            entries(&journal),
            vec![
                format!("swap {}->{}", old.service_id(), new.service_id()),
                format!("change foo#{}", new.service_id()),
            ]
        );
    }

    #[test]
    fn test_failed_resume_stops_component() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let failing = Arc::new(AtomicBool::new(false));

        let component = Component::new("fragile", CONSUMER, registry.clone());
        let flag = failing.clone();
        component
            .set_callbacks(LifecycleCallbacks::new().on_start(move || {
                if flag.load(Ordering::SeqCst) {
                    Err("lost connection".into())
                } else {
                    Ok(())
                }
            }))
            .unwrap();
        component
            .add_interface("Bar", service_object(Arc::new(7u32)), Properties::new())
            .unwrap();
        component.add_service_dependency(logged(&journal, ServiceDependency::new("Opt"), "opt"));
        component.start();
        assert!(component.is_available());

        let opt = publish(&registry, "Opt");
        assert!(component.is_available());
        failing.store(true, Ordering::SeqCst);
        registry.unregister_service(&opt).unwrap();

        assert_eq!(component.state(), Inactive);
        assert!(!component.is_active());
        assert!(!component.is_available());
        assert!(registry.get_service_references(BundleId(9), Some("Bar"), None).unwrap().is_empty());
        assert!(matches!(
            component.last_error(),
            Some(ComponentError::Callback { callback: "start", .. })
        ));
    }

    #[test]
    fn test_dependency_added_while_active_is_instance_bound() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let component = component(&registry, &journal);
        component.start();
        assert_eq!(component.state(), TrackingOptional);

        let id = component.add_service_dependency(logged(&journal, ServiceDependency::new("Baz").required(true), "baz"));
        assert_eq!(component.state(), InstantiatedAndWaitingForRequired);
        let info = component.info();
        assert!(info.dependencies.iter().any(|d| d.id == id && d.instance_bound));

        let baz = publish(&registry, "Baz");
        assert_eq!(component.state(), TrackingOptional);
        assert_eq!(
            entries(&journal),
            vec![
                "init".to_string(),
                "start".into(),
                "stop".into(),
                format!("add baz#{}", baz.service_id()),
                "start".into(),
            ]
        );

        component.stop();
        assert_eq!(component.state(), Inactive);
        assert!(!component.info().dependencies[0].instance_bound);
    }

    #[test]
    fn test_failing_init_is_compensated_and_not_retried() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        publish(&registry, "Foo");

        let component = Component::new("broken", CONSUMER, registry.clone());
        let sink = journal.clone();
        component
            .set_callbacks(LifecycleCallbacks::new().on_init(move || {
                sink.lock().push("init".into());
                Err("no database".into())
            }))
            .unwrap();
        component.add_service_dependency(logged(&journal, ServiceDependency::new("Foo").required(true), "foo"));
        component.start();

        assert_eq!(component.state(), WaitingForRequired);
        assert_eq!(entries(&journal), vec!["add foo#1", "init", "remove foo#1"]);
        assert!(matches!(
            component.last_error(),
            Some(ComponentError::Callback { callback: "init", .. })
        ));

        publish(&registry, "Foo");
        assert_eq!(component.state(), WaitingForRequired);
        assert_eq!(journal.lock().len(), 3);

        component.stop();
        assert_eq!(component.state(), Inactive);
        assert!(!component.is_active());
    }

    #[test]
    fn test_failing_stop_does_not_block_teardown() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        let foo = publish(&registry, "Foo");
        let opt = publish(&registry, "Opt");

        let component = Component::new("stubborn", CONSUMER, registry.clone());
        let (i, s, t, d) = (journal.clone(), journal.clone(), journal.clone(), journal.clone());
        component
            .set_callbacks(
                LifecycleCallbacks::new()
                    .on_init(move || {
                        i.lock().push("init".into());
                        Ok(())
                    })
                    .on_start(move || {
                        s.lock().push("start".into());
                        Ok(())
                    })
                    .on_stop(move || {
                        t.lock().push("stop".into());
                        Err("still busy".into())
                    })
                    .on_deinit(move || {
                        d.lock().push("deinit".into());
                        Ok(())
                    }),
            )
            .unwrap();
        component.add_service_dependency(logged(&journal, ServiceDependency::new("Foo").required(true), "foo"));
        component.add_service_dependency(logged(
            &journal,
            ServiceDependency::new("Opt").strategy(UpdateStrategy::Locking),
            "opt",
        ));
        component.start();
        assert_eq!(component.state(), TrackingOptional);
        journal.lock().clear();

        registry.unregister_service(&foo).unwrap();
        assert_eq!(component.state(), InstantiatedAndWaitingForRequired);
        assert_eq!(
            entries(&journal),
            vec![
                "stop".to_string(),
                format!("remove opt#{}", opt.service_id()),
                format!("remove foo#{}", foo.service_id()),
            ]
        );
        assert!(matches!(
            component.last_error(),
            Some(ComponentError::Callback { callback: "stop", .. })
        ));

        journal.lock().clear();
        component.stop();
        assert_eq!(component.state(), Inactive);
        assert_eq!(entries(&journal), vec!["deinit"]);
    }

    #[test]
    fn test_concurrent_events_never_overlap_callbacks() {
        let registry = Arc::new(ServiceRegistry::new());
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let adds = Arc::new(AtomicUsize::new(0));
        let removes = Arc::new(AtomicUsize::new(0));

        let guard = |counter: Arc<AtomicUsize>| {
            let (running, overlaps) = (running.clone(), overlaps.clone());
            move |_: &DependencyEvent| {
                if running.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                counter.fetch_add(1, Ordering::SeqCst);
                running.fetch_sub(1, Ordering::SeqCst);
            }
        };

        let component = Component::new("busy", CONSUMER, registry.clone());
        component.add_service_dependency(
            ServiceDependency::new("Foo")
                .strategy(UpdateStrategy::Locking)
                .on_add(guard(adds.clone()))
                .on_remove(guard(removes.clone())),
        );
        component.start();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let reg = publish(&registry, "Foo");
                        registry.unregister_service(&reg).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(adds.load(Ordering::SeqCst), 400);
        assert_eq!(removes.load(Ordering::SeqCst), 400);
        assert_eq!(component.state(), TrackingOptional);
        assert_eq!(component.info().dependencies[0].matched, 0);
    }

    #[test]
    fn test_removing_dependency_clears_injection() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        publish(&registry, "Foo");
        let slot = service_slot();

        let component = component(&registry, &journal);
        let id = component.add_service_dependency(
            ServiceDependency::new("Foo").required(true).auto_inject(slot.clone()),
        );
        component.start();
        assert!(slot.read().is_some());

        component.remove_service_dependency(id);
        assert!(slot.read().is_none());
        assert_eq!(component.state(), TrackingOptional);
        assert!(component.info().dependencies.is_empty());
    }

    #[test]
    fn test_callbacks_cannot_change_while_active() {
        let registry = Arc::new(ServiceRegistry::new());
        let component = Component::new("c", CONSUMER, registry);
        component.start();
        let result = component.set_callbacks(LifecycleCallbacks::new());
        assert!(matches!(result, Err(ComponentError::IllegalState(_))));
        component.stop();
        assert!(component.set_callbacks(LifecycleCallbacks::new()).is_ok());
    }

    #[test]
    fn test_destroy_releases_registry_resources() {
        let registry = Arc::new(ServiceRegistry::new());
        let journal = journal();
        publish(&registry, "Foo");

        let component = component(&registry, &journal);
        component
            .add_interface("Bar", service_object(Arc::new(1u8)), Properties::new())
            .unwrap();
        component.add_service_dependency(ServiceDependency::new("Foo").required(true));
        component.start();
        assert_eq!(registry.registered_services(CONSUMER).len(), 1);

        component.destroy();
        assert_eq!(component.state(), Inactive);
        assert!(registry.registered_services(CONSUMER).is_empty());
        assert!(registry.services_in_use(CONSUMER).is_empty());
        assert_eq!(registry.stats().listeners, 0);
        assert_eq!(entries(&journal), vec!["init", "start", "stop", "deinit"]);
    }
}
