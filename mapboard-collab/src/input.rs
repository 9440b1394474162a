//! Window-level release signals.
//!
//! A drag that leaves the map surface never sees its pointer-up. Hosts
//! forward the window's own `mouseup` and `blur` here, and every drag-like
//! controller treats either one as a synthetic release.

use crate::subscription::{Subscribers, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEvent {
    MouseUp,
    Blur,
}

/// Registry of window-level release listeners, shared by the host and all
/// attached controllers.
#[derive(Debug, Clone, Default)]
pub struct WindowEvents {
    listeners: Subscribers<WindowEvent>,
}

impl WindowEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_release(&self, callback: impl Fn(WindowEvent) + 'static) -> Subscription {
        self.listeners.subscribe(move |ev: &WindowEvent| callback(*ev))
    }

    /// Called by the host when the window reports `event`.
    pub fn dispatch(&self, event: WindowEvent) {
        log::trace!("window {:?}", event);
        self.listeners.emit(&event);
    }

    /// Number of registered listeners; zero once every controller is gone.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_dispatch_and_teardown() {
        let window = WindowEvents::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let sub = window.on_release(move |ev| s.borrow_mut().push(ev));
        assert_eq!(window.listener_count(), 1);

        window.dispatch(WindowEvent::MouseUp);
        window.dispatch(WindowEvent::Blur);
        assert_eq!(*seen.borrow(), vec![WindowEvent::MouseUp, WindowEvent::Blur]);

        drop(sub);
        assert_eq!(window.listener_count(), 0);
    }
}
