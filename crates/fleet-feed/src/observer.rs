//! # Observer Registry
//!
//! Typed observer lists shared between a background task and its handles.
//!
//! Observers are invoked synchronously from the owning task, in registration
//! order. The registry hands out a [`Subscription`] per runtime registration;
//! dropping it unregisters the observer. Observers registered on a builder
//! before spawn live as long as the task.

use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Ordered list of observers of type `O`.
pub struct Observers<O: ?Sized> {
    inner: Arc<RwLock<Registry<O>>>,
}

struct Registry<O: ?Sized> {
    next_id: u64,
    entries: Vec<(u64, Arc<O>)>,
}

impl<O: ?Sized> Clone for Observers<O> {
    fn clone(&self) -> Self {
        Observers {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: ?Sized> Default for Observers<O> {
    fn default() -> Self {
        Observers {
            inner: Arc::new(RwLock::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<O: ?Sized + Send + Sync + 'static> Observers<O> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer for the lifetime of the registry.
    pub fn attach(&self, observer: Arc<O>) {
        self.insert(observer);
    }

    /// Registers an observer until the returned subscription is dropped.
    pub fn subscribe(&self, observer: Arc<O>) -> Subscription {
        let id = self.insert(observer);
        let registry: Weak<RwLock<Registry<O>>> = Arc::downgrade(&self.inner);

        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
                    registry.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Returns the current observers, in registration order.
    ///
    /// The lock is released before the caller invokes anything, so an observer
    /// may subscribe or unsubscribe from inside a callback.
    pub fn snapshot(&self) -> Vec<Arc<O>> {
        let registry = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        registry.entries.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Returns true if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, observer: Arc<O>) -> u64 {
        let mut registry = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, observer));
        id
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// Handle for a runtime observer registration.
///
/// Dropping the subscription unregisters the observer.
#[must_use = "dropping a Subscription unregisters the observer immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unregisters the observer now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keeps the observer registered for the lifetime of the registry.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Counter: Send + Sync {
        fn hit(&self);
    }

    #[derive(Default)]
    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn hit(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notify(observers: &Observers<dyn Counter>) {
        for observer in observers.snapshot() {
            observer.hit();
        }
    }

    #[test]
    fn test_attach_and_subscribe() {
        let observers: Observers<dyn Counter> = Observers::new();
        let permanent = Arc::new(Hits::default());
        let scoped = Arc::new(Hits::default());

        observers.attach(permanent.clone());
        let subscription = observers.subscribe(scoped.clone());
        assert_eq!(observers.len(), 2);

        notify(&observers);
        drop(subscription);
        notify(&observers);

        assert_eq!(permanent.0.load(Ordering::SeqCst), 2);
        assert_eq!(scoped.0.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_detach_keeps_observer() {
        let observers: Observers<dyn Counter> = Observers::new();
        observers.subscribe(Arc::new(Hits::default())).detach();
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let observers: Observers<dyn Counter> = Observers::new();
        let subscription = observers.subscribe(Arc::new(Hits::default()));
        drop(observers);
        subscription.unsubscribe();
    }
}
