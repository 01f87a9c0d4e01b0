//! Listener registration with scoped ownership.
//!
//! Components hand back one opaque [`Subscription`] per listener
//! registration instead of raw signal ids; dropping (or cancelling) the
//! guard detaches the listener, and a component tears all of its own
//! registrations down by clearing the `Vec<Subscription>` it holds.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A list of listeners for one event.
pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener; it stays attached for the lifetime of the
    /// returned guard.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::new(listener)));
            id
        };

        let registry = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(registry) = Weak::upgrade(&registry) {
                    registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Invoke every registered listener with `value`.
    ///
    /// Listeners run outside the registry lock, so a listener may subscribe
    /// or unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let registry = self.inner.lock();
            registry.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(value);
        }
    }

    /// Detach every listener at once.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Opaque handle to one listener registration.
///
/// Dropping it detaches the listener.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Detach now instead of at drop time.
    pub fn cancel(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_starts_empty() {
        let listeners: Listeners<u32> = Listeners::default();
        listeners.emit(&1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn emit_reaches_every_listener() {
        let listeners: Listeners<u32> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _a = listeners.subscribe({
            let count = Arc::clone(&count);
            move |value| {
                count.fetch_add(*value as usize, Ordering::SeqCst);
            }
        });
        let _b = listeners.subscribe({
            let count = Arc::clone(&count);
            move |value| {
                count.fetch_add(*value as usize, Ordering::SeqCst);
            }
        });

        listeners.emit(&3);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn dropping_the_guard_detaches() {
        let listeners: Listeners<()> = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let sub = listeners.subscribe({
            let count = Arc::clone(&count);
            move |()| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        listeners.emit(&());
        drop(sub);
        listeners.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn cancel_detaches_immediately() {
        let listeners: Listeners<()> = Listeners::new();
        let sub = listeners.subscribe(|()| {});
        assert_eq!(listeners.len(), 1);
        sub.cancel();
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn clear_detaches_everything_at_once() {
        let listeners: Listeners<()> = Listeners::new();
        let _a = listeners.subscribe(|()| {});
        let _b = listeners.subscribe(|()| {});
        listeners.clear();
        assert_eq!(listeners.len(), 0);
        // Guards outliving the teardown are harmless.
        drop(_a);
    }

    #[test]
    fn listener_may_subscribe_from_inside_emit() {
        let listeners: Listeners<()> = Listeners::new();
        let inner = listeners.clone();
        let _sub = listeners.subscribe(move |()| {
            inner.subscribe(|()| {}).cancel();
        });
        listeners.emit(&());
    }

    #[test]
    fn guard_outliving_registry_is_harmless() {
        let listeners: Listeners<()> = Listeners::new();
        let sub = listeners.subscribe(|()| {});
        drop(listeners);
        drop(sub);
    }
}
