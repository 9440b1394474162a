//! Observer registry with RAII unsubscription.
//!
//! Every `observe`/`subscribe`/window listener in this crate hands out a
//! [`Subscription`]; dropping it unregisters the callback. Callbacks are
//! cloned out of the registry before they run, so a callback may subscribe,
//! unsubscribe or trigger further events without a `RefCell` conflict.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

struct Entry<E: ?Sized> {
    id: u64,
    alive: Rc<Cell<bool>>,
    callback: Rc<dyn Fn(&E)>,
}

struct Registry<E: ?Sized> {
    next_id: u64,
    entries: Vec<Entry<E>>,
}

/// Shared list of callbacks for events of type `E`.
///
/// Cloning yields another handle to the same registry.
pub struct Subscribers<E: ?Sized> {
    inner: Rc<RefCell<Registry<E>>>,
}

impl<E: ?Sized + 'static> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register `callback`; it stays registered until the returned guard drops.
    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        let alive = Rc::new(Cell::new(true));
        let id = {
            let mut registry = self.inner.borrow_mut();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Entry {
                id,
                alive: alive.clone(),
                callback: Rc::new(callback),
            });
            id
        };

        let registry: Weak<RefCell<Registry<E>>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            alive.set(false);
            if let Some(registry) = registry.upgrade() {
                registry.borrow_mut().entries.retain(|e| e.id != id);
            }
        })
    }

    /// Invoke every live callback with `event`, in registration order.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<(Rc<Cell<bool>>, Rc<dyn Fn(&E)>)> = self
            .inner
            .borrow()
            .entries
            .iter()
            .map(|e| (e.alive.clone(), e.callback.clone()))
            .collect();

        for (alive, callback) in callbacks {
            // Unsubscribed by an earlier callback of this same emit.
            if alive.get() {
                callback(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: ?Sized + 'static> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ?Sized> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: ?Sized> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.inner.borrow().entries.len())
            .finish()
    }
}

/// Registration guard. Dropping it runs the cleanup exactly once.
#[must_use = "dropping a Subscription unregisters it immediately"]
pub struct Subscription {
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// A guard with nothing to release.
    pub fn empty() -> Self {
        Self { cleanup: None }
    }

    /// Release now instead of at drop.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cleanup.is_some())
            .finish()
    }
}
