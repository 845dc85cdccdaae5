//! Callback registries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::lock;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of callbacks.
pub(crate) struct Registry<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T: 'static> Registry<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.callbacks).push((id, Arc::new(callback)));
        let registry: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { id, registry }
    }

    /// Call every callback with `value`, in subscription order.
    ///
    /// Callbacks run without the registry lock held, so they may subscribe
    /// or unsubscribe. Changes take effect from the next notification.
    pub(crate) fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = lock(&self.callbacks)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

impl<T: 'static> Unsubscribe for Registry<T> {
    fn remove(&self, id: u64) {
        lock(&self.callbacks).retain(|(existing, _)| *existing != id);
    }
}

/// A registered callback.
///
/// Dropping a `Subscription` keeps the callback registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unsubscribe>,
}

impl Subscription {
    /// Stop receiving notifications.
    ///
    /// Safe to call from inside a callback. A notification already being
    /// delivered to other subscribers is not affected.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_subscription_order() {
        let registry = Registry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            let _ = registry.subscribe(move |v: &u32| seen.lock().unwrap().push((tag, *v)));
        }
        registry.notify(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = Registry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subscription = {
            let seen = seen.clone();
            registry.subscribe(move |v: &u32| seen.lock().unwrap().push(*v))
        };
        registry.notify(&1);
        subscription.unsubscribe();
        registry.notify(&2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Registry::<u32>::new();
        let subscription = registry.subscribe(|_: &u32| {});
        drop(registry);
        subscription.unsubscribe();
    }

    #[test]
    fn test_subscribe_from_inside_callback() {
        let registry = Registry::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));

        let _ = {
            let registry = registry.clone();
            let count = count.clone();
            registry.clone().subscribe(move |_: &u32| {
                let count = count.clone();
                let _ = registry.subscribe(move |_: &u32| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            })
        };

        registry.notify(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        registry.notify(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
