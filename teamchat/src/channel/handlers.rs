//! Listener registries with panic isolation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T: ?Sized> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

/// An ordered set of handlers for one kind of event.
pub struct HandlerRegistry<T: ?Sized> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: ?Sized> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }
}

impl<T: ?Sized + 'static> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. It stays registered until the returned
    /// [`Subscription`] is unsubscribed.
    pub fn register(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let id = slots.next_id;
            slots.next_id += 1;
            slots.handlers.push((id, Arc::new(handler)));
            id
        };

        let slots: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(slots) = slots.upgrade() {
                    let mut slots = slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                    slots.handlers.retain(|(slot, _)| *slot != id);
                }
            })),
        }
    }

    /// Invoke every handler in registration order.
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    /// Returns how many handlers panicked.
    pub fn dispatch(&self, value: &T) -> usize {
        let snapshot: Vec<Handler<T>> = {
            let slots = self.slots.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            slots.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        let mut panicked = 0;
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(value))).is_err() {
                error!("event handler panicked");
                panicked += 1;
            }
        }
        panicked
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .handlers
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by every handler registration.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the handler. Dropping a subscription without calling this
    /// leaves the handler registered.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
