//! Runtime event delivery.
//!
//! The host runtime reports every event that can falsify a cached attribute
//! lookup through the [`RuntimeObserver`] trait. Observers are registered on
//! an [`ObserverHub`] shared by the runtime and every type it creates, so a
//! type's destructor can report its own destruction without reaching back
//! into the runtime.
//!
//! Delivery is synchronous: when a notification method returns, every
//! registered observer has seen the event.

use crate::object::TypeId;
use cinder_core::InternedString;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Events
// =============================================================================

/// What changed about a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// `type.__dict__[name]` was assigned.
    AttrSet(InternedString),
    /// `type.__dict__[name]` was deleted.
    AttrDeleted(InternedString),
    /// `__bases__` was reassigned.
    BasesChanged,
    /// A descriptor hosted under `name` gained or lost its setter.
    DescriptorKindChanged(InternedString),
    /// An ancestor of the type changed in a way that alters resolution.
    AncestorChanged,
    /// An instance's `__dict__` was replaced wholesale.
    InstanceDictReplaced,
    /// The type's instance-shadow bit was set by a write of `name`.
    InstanceShadowed(InternedString),
    /// The shared split-dict keys of the type were replaced.
    KeysChanged,
    /// Explicit bump requested by the host without a state change.
    Explicit,
}

impl MutationKind {
    /// Whether the event is followed by a version bump of the type.
    #[inline]
    pub fn bumps_version(&self) -> bool {
        matches!(
            self,
            Self::AttrSet(_)
                | Self::AttrDeleted(_)
                | Self::BasesChanged
                | Self::DescriptorKindChanged(_)
                | Self::AncestorChanged
                | Self::InstanceShadowed(_)
                | Self::KeysChanged
                | Self::Explicit
        )
    }
}

/// Why every cache must be dropped at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkReason {
    /// The version counter wrapped around.
    VersionOverflow,
    /// A type with too many dependents was destroyed.
    DependentsOverflow,
    /// Requested by the host or a test.
    Manual,
}

/// Kinds of instrumentation hooks the host can install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Function call events.
    Call,
    /// Function return events.
    Return,
    /// Line events (debugger stepping).
    Line,
    /// Exception events.
    Exception,
    /// Passive sampling profiler.
    Profile,
    /// Full tracing function.
    Trace,
}

// =============================================================================
// Observer Trait
// =============================================================================

/// Receiver for runtime events that affect cached attribute access.
///
/// Implementations must not call back into the runtime's mutation primitives;
/// they are invoked while a mutation is in flight.
pub trait RuntimeObserver: Send + Sync {
    /// A type was mutated. Called before the type's version is bumped.
    fn mutation_observed(&self, ty: TypeId, kind: &MutationKind);

    /// A type is being destroyed. Called from the type's destructor.
    fn type_destroyed(&self, _ty: TypeId) {}

    /// The first instrumentation hook was added (`true`) or the last one
    /// removed (`false`).
    fn instrumentation_state_changed(&self, _active: bool) {}

    /// Every cache must be dropped.
    fn bulk_invalidate(&self, _reason: BulkReason) {}
}

/// Handle returned by [`ObserverHub::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

// =============================================================================
// Observer Hub
// =============================================================================

/// Fan-out point for runtime events.
pub struct ObserverHub {
    observers: RwLock<Vec<(ObserverId, Arc<dyn RuntimeObserver>)>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
}

impl ObserverHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
        }
    }

    /// Register an observer.
    pub fn register(&self, observer: Arc<dyn RuntimeObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Check if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Total events delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    // Observers may register further observers; never hold the lock while
    // delivering.
    fn snapshot(&self) -> Vec<Arc<dyn RuntimeObserver>> {
        self.observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect()
    }

    fn deliver(&self, f: impl Fn(&dyn RuntimeObserver)) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        for observer in self.snapshot() {
            f(observer.as_ref());
        }
    }

    /// Deliver `mutation_observed`.
    pub fn mutation_observed(&self, ty: TypeId, kind: &MutationKind) {
        self.deliver(|o| o.mutation_observed(ty, kind));
    }

    /// Deliver `type_destroyed`.
    pub fn type_destroyed(&self, ty: TypeId) {
        self.deliver(|o| o.type_destroyed(ty));
    }

    /// Deliver `instrumentation_state_changed`.
    pub fn instrumentation_state_changed(&self, active: bool) {
        self.deliver(|o| o.instrumentation_state_changed(active));
    }

    /// Deliver `bulk_invalidate`.
    pub fn bulk_invalidate(&self, reason: BulkReason) {
        self.deliver(|o| o.bulk_invalidate(reason));
    }
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHub")
            .field("observers", &self.len())
            .field("delivered", &self.delivered())
            .finish()
    }
}

// =============================================================================
// Recording Observer
// =============================================================================

/// An event as seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    /// `mutation_observed`.
    Mutation(TypeId, MutationKind),
    /// `type_destroyed`.
    Destroyed(TypeId),
    /// `instrumentation_state_changed`.
    Instrumentation(bool),
    /// `bulk_invalidate`.
    Bulk(BulkReason),
}

/// Observer that records every event, for tests and debugging.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: parking_lot::Mutex<Vec<RecordedEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all recorded events.
    pub fn take(&self) -> Vec<RecordedEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Copy of the recorded events.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

impl RuntimeObserver for RecordingObserver {
    fn mutation_observed(&self, ty: TypeId, kind: &MutationKind) {
        self.events
            .lock()
            .push(RecordedEvent::Mutation(ty, kind.clone()));
    }

    fn type_destroyed(&self, ty: TypeId) {
        self.events.lock().push(RecordedEvent::Destroyed(ty));
    }

    fn instrumentation_state_changed(&self, active: bool) {
        self.events
            .lock()
            .push(RecordedEvent::Instrumentation(active));
    }

    fn bulk_invalidate(&self, reason: BulkReason) {
        self.events.lock().push(RecordedEvent::Bulk(reason));
    }
}
