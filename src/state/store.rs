//! Reactive state store
//!
//! A keyed container of immutable state slices. Each slice type has its own
//! serialization domain: a reentrant dispatch lock that covers reduction,
//! replacement and subscriber notification, so subscribers see updates in
//! dispatch order and a handler may read or dispatch back into the store.
//!
//! A dispatch made from inside a handler of the same slice is queued and
//! applied once the current fan-out has reached every subscriber.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};

/// Marker for values that can live in the store
pub trait State: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> State for T {}

/// A pure transition of one slice
///
/// Reducers are total: they cannot fail.
pub trait Action: Send + Sync + 'static {
    type State: State;

    fn reduce(&self, state: Self::State) -> Self::State;
}

/// Handle returned from [`Store::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Transition waiting for the running fan-out to finish
type Deferred<S> = Box<dyn FnOnce(Option<S>) -> Option<S> + Send>;

struct Slice<S: State> {
    dispatch_lock: ReentrantMutex<()>,
    /// `None` until the slice is provided
    value: RwLock<Option<S>>,
    subscribers: Mutex<Vec<(SubscriptionId, Handler<S>)>>,
    /// Set while subscribers are being notified; only the lock holder touches it
    publishing: AtomicBool,
    deferred: Mutex<VecDeque<Deferred<S>>>,
}

/// Clears `publishing` even if a handler unwinds
struct PublishingGuard<'a>(&'a AtomicBool);

impl Drop for PublishingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: State> Slice<S> {
    fn new() -> Self {
        Self {
            dispatch_lock: ReentrantMutex::new(()),
            value: RwLock::new(None),
            subscribers: Mutex::new(Vec::new()),
            publishing: AtomicBool::new(false),
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    fn handlers(&self) -> Vec<Handler<S>> {
        self.subscribers.lock().iter().map(|(_, h)| h.clone()).collect()
    }

    /// Apply `transition` to the current value and notify; caller holds the
    /// dispatch lock
    ///
    /// Called again from a handler of this slice, the transition is queued
    /// behind the fan-out in progress so no subscriber is handed a value
    /// that was already superseded.
    fn transition(&self, transition: Deferred<S>) {
        if self.publishing.load(Ordering::SeqCst) {
            self.deferred.lock().push_back(transition);
            return;
        }

        self.publishing.store(true, Ordering::SeqCst);
        let _publishing = PublishingGuard(&self.publishing);

        let mut next = Some(transition);
        while let Some(transition) = next.take() {
            let current = self.value.read().clone();
            if let Some(value) = transition(current) {
                *self.value.write() = Some(value.clone());
                for handler in self.handlers() {
                    handler(&value);
                }
            }
            next = self.deferred.lock().pop_front();
        }
    }
}

/// Type-erased view of a slice
trait AnySlice: Send + Sync {
    fn remove_subscriber(&self, id: SubscriptionId) -> bool;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<S: State> AnySlice for Slice<S> {
    fn remove_subscriber(&self, id: SubscriptionId) -> bool {
        let _serial = self.dispatch_lock.lock();
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Process-wide registry of state slices
///
/// The store is an explicit object handed to whoever needs it; nothing in
/// here is global.
pub struct Store {
    slices: RwLock<HashMap<TypeId, Arc<dyn AnySlice>>>,
    next_id: AtomicU64,
}

impl Store {
    pub fn new() -> Self {
        Self {
            slices: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Slice for `S`, created empty on first use
    fn slice<S: State>(&self) -> Arc<Slice<S>> {
        let type_id = TypeId::of::<S>();
        if let Some(existing) = self.slices.read().get(&type_id).cloned() {
            if let Ok(slice) = existing.into_any().downcast::<Slice<S>>() {
                return slice;
            }
        }

        let mut slices = self.slices.write();
        let entry = slices
            .entry(type_id)
            .or_insert_with(|| Arc::new(Slice::<S>::new()))
            .clone();
        drop(slices);

        match entry.into_any().downcast::<Slice<S>>() {
            Ok(slice) => slice,
            // TypeId keys guarantee the concrete type
            Err(_) => unreachable!("slice registered under a foreign TypeId"),
        }
    }

    fn existing_slice<S: State>(&self) -> Option<Arc<Slice<S>>> {
        let entry = self.slices.read().get(&TypeId::of::<S>())?.clone();
        entry.into_any().downcast::<Slice<S>>().ok()
    }

    /// Register (or replace) a slice value
    ///
    /// Existing subscribers are notified with the new value.
    pub fn provide<S: State>(&self, initial: S) {
        let slice = self.slice::<S>();
        let _serial = slice.dispatch_lock.lock();
        slice.transition(Box::new(move |_| Some(initial)));
    }

    /// Apply an action to the slice it targets
    ///
    /// Returns `false` when the slice was never provided; the action is
    /// dropped in that case. A dispatch queued behind a running fan-out
    /// returns `true` before it is applied.
    pub fn dispatch<A: Action>(&self, action: A) -> bool {
        let Some(slice) = self.existing_slice::<A::State>() else {
            tracing::trace!(
                slice = std::any::type_name::<A::State>(),
                "dispatch to unregistered slice ignored"
            );
            return false;
        };

        let _serial = slice.dispatch_lock.lock();
        if slice.value.read().is_none() {
            return false;
        }
        slice.transition(Box::new(move |current| current.map(|state| action.reduce(state))));
        true
    }

    /// Latest value of a slice, `None` if it was never provided
    pub fn current_state<S: State>(&self) -> Option<S> {
        let slice = self.existing_slice::<S>()?;
        let value = slice.value.read().clone();
        value
    }

    /// Register a handler for every update of slice `S`
    ///
    /// The handler runs once immediately with the current value, if the
    /// slice has one, and then after every successful dispatch.
    pub fn subscribe<S, F>(&self, handler: F) -> SubscriptionId
    where
        S: State,
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handler: Handler<S> = Arc::new(handler);
        let slice = self.slice::<S>();

        let _serial = slice.dispatch_lock.lock();
        slice.subscribers.lock().push((id, handler.clone()));

        let current = slice.value.read().clone();
        if let Some(current) = current {
            handler(&current);
        }
        id
    }

    /// Remove a previously registered handler
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let slices: Vec<Arc<dyn AnySlice>> = self.slices.read().values().cloned().collect();
        for slice in slices {
            if slice.remove_subscriber(id) {
                return;
            }
        }
    }

    /// Drop every slice and subscriber
    pub fn reset(&self) {
        self.slices.write().clear();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
