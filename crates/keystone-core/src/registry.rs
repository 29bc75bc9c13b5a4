//! The service registry.
//!
//! [`ServiceRegistry`] owns every registration and every reference, and is
//! the single source of service events. There is no global instance; the
//! framework creates one and hands `Arc<ServiceRegistry>` to whoever needs
//! it.
//!
//! # Locking
//!
//! One reader/writer lock guards the membership tables (registrations per
//! bundle, references per consumer, listeners, listener hooks). Counters of
//! a [`ServiceReference`] are mutated under the reference's own lock while
//! the table lock is held, so a reference cannot leave the table while its
//! counters change.
//!
//! - Service factories are invoked with only the reference lock held, never
//!   under the table's write lock.
//! - Listeners and hooks are invoked with no lock held.
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_core::{BundleId, Properties, ServiceRegistry, service_object};
//!
//! let registry = ServiceRegistry::new();
//! let provider = BundleId(1);
//! let consumer = BundleId(2);
//!
//! let reg = registry.register_service(provider, "Greeter", service_object(greeter), Properties::new())?;
//! let reference = registry.get_service_reference(consumer, &reg)?;
//! let service = registry.get_service(consumer, &reference)?;
//! // …use it…
//! registry.unget_service(consumer, &reference)?;
//! registry.release_service_reference(consumer, &reference)?;
//! registry.unregister_service(&reg)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::bundle::{BundleId, ServiceId, ServiceObject, downcast_service};
use crate::error::{ServiceError, ServiceResult};
use crate::event::{
    LISTENER_HOOK_SERVICE_NAME, ListenerHook, ListenerId, ListenerInfo, ServiceEvent,
    ServiceEventKind, ServiceListener, SharedHook, SharedListener,
};
use crate::filter::{Filter, SharedFilter};
use crate::properties::Properties;
use crate::reference::ServiceReference;
use crate::registration::{RegistrationState, ServiceFactory, ServiceRegistration, ServiceSource};

// =============================================================================
// Tables (internal)
// =============================================================================

struct ListenerEntry {
    id: ListenerId,
    bundle: BundleId,
    filter: Option<SharedFilter>,
    listener: SharedListener,
}

impl ListenerEntry {
    fn accepts(&self, properties: &Properties) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(properties))
    }

    fn info(&self, removed: bool) -> ListenerInfo {
        ListenerInfo {
            id: self.id,
            bundle: self.bundle,
            filter: self.filter.clone(),
            removed,
        }
    }
}

struct HookEntry {
    service_id: ServiceId,
    hook: SharedHook,
}

#[derive(Default)]
struct RegistryTables {
    registrations: HashMap<BundleId, Vec<ServiceRegistration>>,
    references: HashMap<BundleId, HashMap<ServiceId, ServiceReference>>,
    listeners: Vec<ListenerEntry>,
    hooks: Vec<HookEntry>,
}

impl RegistryTables {
    /// Returns the consumer's reference to `registration`, creating it with a
    /// reference count of 1 or retaining the existing one.
    fn reference_for(
        &mut self,
        consumer: BundleId,
        registration: &ServiceRegistration,
    ) -> ServiceResult<ServiceReference> {
        let refs = self.references.entry(consumer).or_default();
        let service_id = registration.service_id();
        if let Some(existing) = refs.get(&service_id) {
            existing.counts().reference_count += 1;
            return Ok(existing.clone());
        }

        refs.try_reserve(1).map_err(|e| {
            error!(consumer = %consumer, service_id, "Failed to allocate service reference");
            ServiceError::out_of_memory(e.to_string())
        })?;
        let reference = ServiceReference::new(consumer, registration.clone());
        refs.insert(service_id, reference.clone());
        trace!(consumer = %consumer, service_id, "Service reference created");
        Ok(reference)
    }

    fn remove_reference(&mut self, reference: &ServiceReference) {
        let consumer = reference.consumer();
        if let Some(refs) = self.references.get_mut(&consumer) {
            let same = refs
                .get(&reference.service_id())
                .is_some_and(|r| r.ptr_eq(reference));
            if same {
                refs.remove(&reference.service_id());
            }
            if refs.is_empty() {
                self.references.remove(&consumer);
            }
        }
    }
}

/// Snapshot of the registry's table sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Registered services.
    pub registrations: usize,
    /// Live references across all consumers.
    pub references: usize,
    /// References with a non-zero usage count.
    pub references_in_use: usize,
    /// Registered service listeners.
    pub listeners: usize,
    /// Registered listener hooks.
    pub listener_hooks: usize,
}

// =============================================================================
// ServiceRegistry
// =============================================================================

/// Thread-safe publish/consume registry with reference and usage counting.
pub struct ServiceRegistry {
    tables: RwLock<RegistryTables>,
    next_service_id: AtomicU64,
    next_listener_id: AtomicU64,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(RegistryTables::default()),
            next_service_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
        }
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Publishes `service` under `name` on behalf of `bundle`.
    ///
    /// The properties are stamped with `objectClass` and `service.id` and a
    /// [`ServiceEventKind::Registered`] event is delivered to matching
    /// listeners before this returns.
    pub fn register_service(
        &self,
        bundle: BundleId,
        name: &str,
        service: ServiceObject,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        self.register(bundle, name, ServiceSource::Object(service), properties)
    }

    /// Publishes a per-consumer [`ServiceFactory`] under `name`.
    pub fn register_service_factory(
        &self,
        bundle: BundleId,
        name: &str,
        factory: Arc<dyn ServiceFactory>,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        self.register(bundle, name, ServiceSource::Factory(factory), properties)
    }

    fn register(
        &self,
        bundle: BundleId,
        name: &str,
        source: ServiceSource,
        properties: Properties,
    ) -> ServiceResult<ServiceRegistration> {
        if name.is_empty() {
            error!(bundle = %bundle, "Refusing to register a service without a name");
            return Err(ServiceError::illegal_argument(
                "service name must not be empty",
            ));
        }

        let hook = if name == LISTENER_HOOK_SERVICE_NAME {
            let hook = match &source {
                ServiceSource::Object(object) => downcast_service::<dyn ListenerHook>(object),
                ServiceSource::Factory(_) => None,
            };
            match hook {
                Some(hook) => Some(hook),
                None => {
                    error!(bundle = %bundle, "Listener hook service does not wrap an Arc<dyn ListenerHook>");
                    return Err(ServiceError::illegal_argument(
                        "listener hook services must wrap an Arc<dyn ListenerHook>",
                    ));
                }
            }
        } else {
            None
        };

        let service_id = self.next_service_id.fetch_add(1, Ordering::Relaxed);
        let registration = ServiceRegistration::new(service_id, bundle, name, properties, source);

        let present_listeners = {
            let mut guard = self.tables.write();
            let tables = &mut *guard;
            let list = tables.registrations.entry(bundle).or_default();
            let reserved = list.try_reserve(1).and_then(|()| {
                if hook.is_some() {
                    tables.hooks.try_reserve(1)
                } else {
                    Ok(())
                }
            });
            if let Err(e) = reserved {
                if list.is_empty() {
                    tables.registrations.remove(&bundle);
                }
                error!(bundle = %bundle, service = %name, "Failed to allocate service registration");
                return Err(ServiceError::out_of_memory(e.to_string()));
            }
            list.push(registration.clone());

            match &hook {
                Some(hook) => {
                    tables.hooks.push(HookEntry {
                        service_id,
                        hook: Arc::clone(hook),
                    });
                    tables.listeners.iter().map(|l| l.info(false)).collect()
                }
                None => Vec::new(),
            }
        };

        if let Some(hook) = hook
            && !present_listeners.is_empty()
        {
            hook.added(&present_listeners);
        }

        debug!(bundle = %bundle, service = %name, service_id, "Service registered");
        self.fire_event(ServiceEventKind::Registered, &registration, None);
        Ok(registration)
    }

    /// Withdraws a registration.
    ///
    /// In order: the registration leaves its bundle's list, an
    /// [`ServiceEventKind::Unregistering`] event is delivered (listeners may
    /// still use the registration), every outstanding reference is
    /// invalidated, the registration is marked invalid, and the registry's
    /// own hold is released.
    ///
    /// Returns [`ServiceError::IllegalState`] when called twice.
    pub fn unregister_service(&self, registration: &ServiceRegistration) -> ServiceResult<()> {
        let service_id = registration.service_id();
        let bundle = registration.bundle();
        if !registration.begin_unregister() {
            warn!(bundle = %bundle, service_id, "Service is already unregistered");
            return Err(ServiceError::illegal_state(format!(
                "service {service_id} is already unregistered"
            )));
        }

        let (held, hook) = {
            let mut guard = self.tables.write();
            let tables = &mut *guard;
            let mut held = None;
            if let Some(list) = tables.registrations.get_mut(&bundle) {
                if let Some(pos) = list.iter().position(|r| r.ptr_eq(registration)) {
                    held = Some(list.remove(pos));
                }
                if list.is_empty() {
                    tables.registrations.remove(&bundle);
                }
            }
            let hook = tables
                .hooks
                .iter()
                .position(|h| h.service_id == service_id)
                .map(|pos| tables.hooks.remove(pos));
            (held, hook)
        };
        if held.is_none() {
            error!(
                bundle = %bundle,
                service_id,
                "Registration missing from its bundle's list while unregistering"
            );
        }
        drop(hook);

        self.fire_event(ServiceEventKind::Unregistering, registration, None);

        {
            let tables = self.tables.write();
            for refs in tables.references.values() {
                if let Some(reference) = refs.get(&service_id) {
                    reference.counts().invalidated = true;
                }
            }
            registration.invalidate();
        }

        debug!(
            bundle = %bundle,
            service = %registration.service_name(),
            service_id,
            "Service unregistered"
        );
        drop(held);
        Ok(())
    }

    /// Replaces a registration's properties and notifies listeners.
    ///
    /// Listeners whose filter matches the new properties receive
    /// [`ServiceEventKind::Modified`]; those that only matched the old ones
    /// receive [`ServiceEventKind::ModifiedEndMatch`].
    pub fn set_service_properties(
        &self,
        registration: &ServiceRegistration,
        properties: Properties,
    ) -> ServiceResult<()> {
        if registration.state() != RegistrationState::Valid {
            return Err(ServiceError::illegal_state(format!(
                "service {} is not registered",
                registration.service_id()
            )));
        }
        let previous = registration.replace_properties(properties);
        trace!(service_id = registration.service_id(), "Service properties replaced");
        self.fire_event(ServiceEventKind::Modified, registration, Some(&previous));
        Ok(())
    }

    // ─── References ──────────────────────────────────────────────────────────

    /// Returns `consumer`'s reference to `registration`.
    ///
    /// Idempotent per (consumer, registration): a second call returns the
    /// same reference with its reference count incremented.
    pub fn get_service_reference(
        &self,
        consumer: BundleId,
        registration: &ServiceRegistration,
    ) -> ServiceResult<ServiceReference> {
        let mut tables = self.tables.write();
        if !registration.is_valid() {
            return Err(ServiceError::illegal_state(format!(
                "service {} is not registered",
                registration.service_id()
            )));
        }
        tables.reference_for(consumer, registration)
    }

    /// Returns one retained reference per valid registration matching `name`
    /// and `filter`, best-ranked first (ties broken by lower service id).
    pub fn get_service_references(
        &self,
        consumer: BundleId,
        name: Option<&str>,
        filter: Option<&dyn Filter>,
    ) -> ServiceResult<Vec<ServiceReference>> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let mut matches: Vec<ServiceRegistration> = tables
            .registrations
            .values()
            .flatten()
            .filter(|r| r.state() == RegistrationState::Valid)
            .filter(|r| name.is_none_or(|n| r.service_name() == n))
            .filter(|r| filter.is_none_or(|f| f.matches(&r.properties())))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.ranking()
                .cmp(&a.ranking())
                .then_with(|| a.service_id().cmp(&b.service_id()))
        });

        let mut references = Vec::new();
        let reserved = references.try_reserve(matches.len()).and_then(|()| {
            tables
                .references
                .entry(consumer)
                .or_default()
                .try_reserve(matches.len())
        });
        if let Err(e) = reserved {
            error!(consumer = %consumer, "Failed to allocate service references");
            return Err(ServiceError::out_of_memory(e.to_string()));
        }
        for registration in &matches {
            references.push(tables.reference_for(consumer, registration)?);
        }
        Ok(references)
    }

    /// Increments a reference's reference count.
    pub fn retain_service_reference(
        &self,
        bundle: BundleId,
        reference: &ServiceReference,
    ) -> ServiceResult<()> {
        check_consumer(bundle, reference, "retain_service_reference")?;
        let _tables = self.tables.read();
        let mut counts = reference.counts();
        if counts.removed {
            return Err(released_error(reference));
        }
        counts.reference_count += 1;
        Ok(())
    }

    /// Decrements a reference's reference count.
    ///
    /// At zero the reference leaves the registry's table. Outstanding usage
    /// is force-released with a warning, since a reference must never be
    /// dropped while its service is in use.
    pub fn release_service_reference(
        &self,
        bundle: BundleId,
        reference: &ServiceReference,
    ) -> ServiceResult<()> {
        check_consumer(bundle, reference, "release_service_reference")?;
        let orphaned = {
            let mut tables = self.tables.write();
            let mut counts = reference.counts();
            if counts.removed {
                return Err(released_error(reference));
            }
            counts.reference_count -= 1;
            if counts.reference_count > 0 {
                return Ok(());
            }

            counts.removed = true;
            let orphaned = if counts.usage_count > 0 {
                warn!(
                    bundle = %bundle,
                    service = %reference.service_name(),
                    service_id = reference.service_id(),
                    usage_count = counts.usage_count,
                    "Service reference released while the service is still in use; forcing unget"
                );
                counts.usage_count = 0;
                counts.service.take()
            } else {
                None
            };
            drop(counts);
            tables.remove_reference(reference);
            orphaned
        };

        trace!(bundle = %bundle, service_id = reference.service_id(), "Service reference removed");
        if let Some(service) = orphaned {
            reference.registration().release(bundle, service);
        }
        Ok(())
    }

    // ─── Service usage ───────────────────────────────────────────────────────

    /// Obtains the service behind `reference` and increments its usage count.
    ///
    /// The first use resolves the object through the registration (calling
    /// its factory, if any) and caches it; later calls reuse the cache.
    /// Returns `Ok(None)` when the registration was withdrawn or the factory
    /// produced nothing.
    pub fn get_service(
        &self,
        consumer: BundleId,
        reference: &ServiceReference,
    ) -> ServiceResult<Option<ServiceObject>> {
        check_consumer(consumer, reference, "get_service")?;
        let _resolving = reference.resolving();
        {
            let _tables = self.tables.read();
            let mut counts = reference.counts();
            if counts.removed {
                return Err(released_error(reference));
            }
            if counts.invalidated || !reference.registration().is_valid() {
                debug!(
                    consumer = %consumer,
                    service_id = reference.service_id(),
                    "get_service on a withdrawn service"
                );
                return Ok(None);
            }
            if counts.usage_count > 0 {
                counts.usage_count += 1;
                return Ok(counts.service.clone());
            }
        }

        // No lock is held while the factory runs.
        let Some(service) = reference.registration().resolve(consumer) else {
            warn!(
                consumer = %consumer,
                service = %reference.service_name(),
                service_id = reference.service_id(),
                "Service factory produced no service"
            );
            return Ok(None);
        };

        let outcome = {
            let _tables = self.tables.read();
            let mut counts = reference.counts();
            if counts.removed {
                Err(released_error(reference))
            } else if counts.invalidated {
                Ok(None)
            } else {
                counts.usage_count = 1;
                counts.service = Some(Arc::clone(&service));
                return Ok(Some(service));
            }
        };
        debug!(
            consumer = %consumer,
            service_id = reference.service_id(),
            "Reference went away while its service was resolved"
        );
        reference.registration().release(consumer, service);
        outcome
    }

    /// Decrements `reference`'s usage count; at zero the cached object is
    /// handed back to the registration.
    ///
    /// Returns `Ok(false)` when there was no outstanding usage.
    pub fn unget_service(
        &self,
        consumer: BundleId,
        reference: &ServiceReference,
    ) -> ServiceResult<bool> {
        check_consumer(consumer, reference, "unget_service")?;
        let released = {
            let _tables = self.tables.read();
            let mut counts = reference.counts();
            if counts.removed {
                return Err(released_error(reference));
            }
            if counts.usage_count == 0 {
                warn!(
                    consumer = %consumer,
                    service_id = reference.service_id(),
                    "unget_service without a matching get_service"
                );
                return Ok(false);
            }
            counts.usage_count -= 1;
            if counts.usage_count == 0 {
                counts.service.take()
            } else {
                None
            }
        };

        if let Some(service) = released {
            reference.registration().release(consumer, service);
        }
        Ok(true)
    }

    // ─── Bundle teardown ─────────────────────────────────────────────────────

    /// Force-releases every usage and reference held by `bundle`.
    ///
    /// Anything still held indicates a missing unget/release by that bundle
    /// and is logged as a warning before being reclaimed.
    pub fn clear_references_for(&self, bundle: BundleId) {
        let orphaned: Vec<(ServiceRegistration, ServiceObject)> = {
            let mut tables = self.tables.write();
            let Some(refs) = tables.references.remove(&bundle) else {
                return;
            };

            let mut orphaned = Vec::new();
            for reference in refs.into_values() {
                let mut counts = reference.counts();
                if counts.reference_count > 0 || counts.usage_count > 0 {
                    warn!(
                        bundle = %bundle,
                        service = %reference.service_name(),
                        service_id = reference.service_id(),
                        reference_count = counts.reference_count,
                        usage_count = counts.usage_count,
                        "Dangling service reference; releasing it"
                    );
                }
                counts.removed = true;
                counts.reference_count = 0;
                counts.usage_count = 0;
                if let Some(service) = counts.service.take() {
                    orphaned.push((reference.registration().clone(), service));
                }
            }
            orphaned
        };

        for (registration, service) in orphaned {
            registration.release(bundle, service);
        }
    }

    /// Unregisters every service `bundle` left registered, with a warning
    /// per registration.
    pub fn clear_service_registrations(&self, bundle: BundleId) {
        let leftovers = self
            .tables
            .read()
            .registrations
            .get(&bundle)
            .cloned()
            .unwrap_or_default();

        for registration in leftovers {
            warn!(
                bundle = %bundle,
                service = %registration.service_name(),
                service_id = registration.service_id(),
                "Dangling service registration; unregistering it"
            );
            if let Err(e) = self.unregister_service(&registration) {
                debug!(error = %e, "Dangling registration was unregistered concurrently");
            }
        }
    }

    /// Tears the registry down: no registration may survive this call.
    pub fn shutdown(&self) {
        let (bundles, consumers): (Vec<BundleId>, Vec<BundleId>) = {
            let tables = self.tables.read();
            (
                tables.registrations.keys().copied().collect(),
                tables.references.keys().copied().collect(),
            )
        };
        for bundle in bundles {
            self.clear_service_registrations(bundle);
        }
        for consumer in consumers {
            self.clear_references_for(consumer);
        }
        info!("Service registry shut down");
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    /// Adds a listener for events whose registration properties match
    /// `filter` (all events when `None`).
    pub fn add_service_listener(
        &self,
        bundle: BundleId,
        filter: Option<SharedFilter>,
        listener: Arc<dyn ServiceListener>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let entry = ListenerEntry {
            id,
            bundle,
            filter,
            listener,
        };
        let info = entry.info(false);

        let hooks: Vec<SharedHook> = {
            let mut tables = self.tables.write();
            tables.listeners.push(entry);
            tables.hooks.iter().map(|h| Arc::clone(&h.hook)).collect()
        };
        for hook in hooks {
            hook.added(std::slice::from_ref(&info));
        }

        trace!(bundle = %bundle, listener = %id, "Service listener added");
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_service_listener(&self, id: ListenerId) -> bool {
        let (entry, hooks) = {
            let mut tables = self.tables.write();
            let Some(pos) = tables.listeners.iter().position(|l| l.id == id) else {
                return false;
            };
            let entry = tables.listeners.remove(pos);
            let hooks: Vec<SharedHook> =
                tables.hooks.iter().map(|h| Arc::clone(&h.hook)).collect();
            (entry, hooks)
        };

        let info = entry.info(true);
        for hook in hooks {
            hook.removed(std::slice::from_ref(&info));
        }
        trace!(bundle = %entry.bundle, listener = %id, "Service listener removed");
        true
    }

    /// Removes every listener `bundle` left installed, with a warning per
    /// listener. Returns how many were removed.
    pub fn clear_service_listeners(&self, bundle: BundleId) -> usize {
        let (removed, hooks) = {
            let mut tables = self.tables.write();
            let (removed, kept): (Vec<ListenerEntry>, Vec<ListenerEntry>) =
                std::mem::take(&mut tables.listeners)
                    .into_iter()
                    .partition(|l| l.bundle == bundle);
            tables.listeners = kept;
            let hooks: Vec<SharedHook> =
                tables.hooks.iter().map(|h| Arc::clone(&h.hook)).collect();
            (removed, hooks)
        };
        if removed.is_empty() {
            return 0;
        }

        let infos: Vec<ListenerInfo> = removed.iter().map(|l| l.info(true)).collect();
        for entry in &removed {
            warn!(bundle = %bundle, listener = %entry.id, "Dangling service listener; removing it");
        }
        for hook in hooks {
            hook.removed(&infos);
        }
        removed.len()
    }

    fn fire_event(
        &self,
        kind: ServiceEventKind,
        registration: &ServiceRegistration,
        previous: Option<&Properties>,
    ) {
        let properties = registration.properties();
        let targets: Vec<(SharedListener, ServiceEventKind)> = {
            let tables = self.tables.read();
            tables
                .listeners
                .iter()
                .filter_map(|entry| {
                    if entry.accepts(&properties) {
                        Some((Arc::clone(&entry.listener), kind))
                    } else if kind == ServiceEventKind::Modified
                        && previous.is_some_and(|old| entry.accepts(old))
                    {
                        Some((Arc::clone(&entry.listener), ServiceEventKind::ModifiedEndMatch))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (listener, kind) in targets {
            listener.service_changed(&ServiceEvent {
                kind,
                registration: registration.clone(),
            });
        }
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    /// Services currently registered by `bundle`.
    pub fn registered_services(&self, bundle: BundleId) -> Vec<ServiceRegistration> {
        self.tables
            .read()
            .registrations
            .get(&bundle)
            .cloned()
            .unwrap_or_default()
    }

    /// References of `bundle` with a non-zero usage count.
    pub fn services_in_use(&self, bundle: BundleId) -> Vec<ServiceReference> {
        let tables = self.tables.read();
        tables
            .references
            .get(&bundle)
            .map(|refs| {
                refs.values()
                    .filter(|r| r.usage_count() > 0)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bundles currently using `registration`'s service, in id order.
    pub fn using_bundles(&self, registration: &ServiceRegistration) -> Vec<BundleId> {
        let tables = self.tables.read();
        let mut bundles: Vec<BundleId> = tables
            .references
            .iter()
            .filter(|(_, refs)| {
                refs.get(&registration.service_id())
                    .is_some_and(|r| r.usage_count() > 0)
            })
            .map(|(bundle, _)| *bundle)
            .collect();
        bundles.sort();
        bundles
    }

    /// Total number of registered services.
    pub fn registration_count(&self) -> usize {
        self.tables.read().registrations.values().map(Vec::len).sum()
    }

    /// Returns table sizes for diagnostics.
    pub fn stats(&self) -> RegistryStats {
        let tables = self.tables.read();
        let mut stats = RegistryStats {
            registrations: tables.registrations.values().map(Vec::len).sum(),
            listeners: tables.listeners.len(),
            listener_hooks: tables.hooks.len(),
            ..Default::default()
        };
        for reference in tables.references.values().flat_map(HashMap::values) {
            stats.references += 1;
            if reference.usage_count() > 0 {
                stats.references_in_use += 1;
            }
        }
        stats
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        let remaining: usize = self.tables.get_mut().registrations.values().map(Vec::len).sum();
        if remaining > 0 {
            warn!(remaining, "Service registry dropped with services still registered");
        }
    }
}

fn check_consumer(bundle: BundleId, reference: &ServiceReference, operation: &str) -> ServiceResult<()> {
    if reference.consumer() == bundle {
        return Ok(());
    }
    error!(
        bundle = %bundle,
        consumer = %reference.consumer(),
        service_id = reference.service_id(),
        operation,
        "Service reference used by a bundle that does not own it"
    );
    Err(ServiceError::illegal_argument(format!(
        "bundle {bundle} does not own the reference to service {}",
        reference.service_id()
    )))
}

fn released_error(reference: &ServiceReference) -> ServiceError {
    ServiceError::illegal_state(format!(
        "reference to service {} was already released",
        reference.service_id()
    ))
}

// =============================================================================
// Tests
// =============================================================================
