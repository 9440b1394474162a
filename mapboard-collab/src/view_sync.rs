//! Two-way binding between the local map viewport and the shared `mapView`.
//!
//! ```text
//!            drag_start                 drag_end / window release
//!   Idle ───────────────▶ LocalDrag ──────────────────────────────▶ Idle
//!    │ ▲                   (samples written at ≤ view_sample_hz,     │
//!    │ │                    remote updates deferred)                 │
//!    ▼ │                                                  re-apply current mapView
//!   RemoteApplying  (set_view in progress; viewport events ignored)
//! ```

use crate::config::SessionConfig;
use crate::document::DocumentStore;
use crate::input::WindowEvents;
use crate::subscription::Subscription;
use crate::throttle::SampleLimiter;
use mapboard_core::geo::{LatLng, LatLngBounds, MapView};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Instant;

/// The host's map widget.
pub trait MapViewport {
    /// Current zoom and center.
    fn view(&self) -> MapView;

    /// Move the map. `zoom: None` keeps the current zoom.
    fn set_view(&self, center: LatLng, zoom: Option<i32>, animate: bool);

    /// Geographic extent of the visible container.
    fn bounds(&self) -> LatLngBounds;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSyncState {
    Idle,
    LocalDrag,
    RemoteApplying,
}

struct ViewSyncInner {
    doc: Rc<DocumentStore>,
    viewport: Rc<dyn MapViewport>,
    state: Cell<ViewSyncState>,
    limiter: RefCell<SampleLimiter>,
}

/// Keeps the viewport and `mapView` in step until dropped.
pub struct ViewSync {
    inner: Rc<ViewSyncInner>,
    _subscriptions: Vec<Subscription>,
}

impl ViewSync {
    pub fn attach(
        doc: Rc<DocumentStore>,
        viewport: Rc<dyn MapViewport>,
        window: &WindowEvents,
        config: &SessionConfig,
    ) -> Self {
        let inner = Rc::new(ViewSyncInner {
            doc: doc.clone(),
            viewport,
            state: Cell::new(ViewSyncState::Idle),
            limiter: RefCell::new(SampleLimiter::from_hz(config.view_sample_hz)),
        });

        let weak: Weak<ViewSyncInner> = Rc::downgrade(&inner);
        let on_doc = doc.observe_map_view(move |view| {
            if let Some(inner) = weak.upgrade() {
                inner.on_shared_view(view);
            }
        });

        let weak = Rc::downgrade(&inner);
        let on_release = window.on_release(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.release();
            }
        });

        // Join the room's current view.
        if let Some(view) = doc.read_map_view() {
            inner.apply_shared(view);
        }

        Self {
            inner,
            _subscriptions: vec![on_doc, on_release],
        }
    }

    pub fn state(&self) -> ViewSyncState {
        self.inner.state.get()
    }

    /// Pointer-down / drag start on the map.
    pub fn drag_start(&self, now: Instant) {
        self.inner.drag_start(now);
    }

    /// The viewport moved (fires continuously during a drag).
    pub fn viewport_moved(&self, now: Instant) {
        self.inner.viewport_moved(now);
    }

    /// Move or zoom finished (move-end / zoom-end / inertia stop).
    pub fn viewport_settled(&self, now: Instant) {
        self.inner.viewport_settled(now);
    }

    /// Trailing-edge flush; call from the host's frame loop.
    pub fn tick(&self, now: Instant) {
        self.inner.tick(now);
    }

    pub fn drag_end(&self, _now: Instant) {
        self.inner.release();
    }
}

impl ViewSyncInner {
    fn drag_start(&self, _now: Instant) {
        if self.state.get() == ViewSyncState::Idle {
            self.limiter.borrow_mut().reset();
            self.state.set(ViewSyncState::LocalDrag);
            log::trace!("view drag started");
        }
    }

    fn viewport_moved(&self, now: Instant) {
        if self.state.get() != ViewSyncState::LocalDrag {
            return;
        }
        let fire = self.limiter.borrow_mut().sample(now);
        if fire {
            self.write_if_changed();
        }
    }

    fn viewport_settled(&self, _now: Instant) {
        if self.state.get() == ViewSyncState::RemoteApplying {
            return;
        }
        self.limiter.borrow_mut().flush();
        self.write_if_changed();
    }

    fn tick(&self, now: Instant) {
        if self.state.get() != ViewSyncState::LocalDrag {
            return;
        }
        let fire = self.limiter.borrow_mut().poll(now);
        if fire {
            self.write_if_changed();
        }
    }

    /// End of a drag, real or synthetic.
    fn release(&self) {
        if self.state.get() != ViewSyncState::LocalDrag {
            return;
        }
        let pending = self.limiter.borrow_mut().flush();
        if pending {
            self.write_if_changed();
        }
        self.state.set(ViewSyncState::Idle);
        log::trace!("view drag ended");

        // Remote updates that landed during the drag.
        if let Some(view) = self.doc.read_map_view() {
            self.apply_shared(view);
        }
    }

    fn write_if_changed(&self) {
        let local = self.viewport.view();
        if !local.is_valid() {
            return;
        }
        if self.doc.read_map_view() != Some(local) {
            log::trace!("writing mapView zoom={} center={:?}", local.zoom, local.center);
            self.doc.write_map_view(&local);
        }
    }

    fn on_shared_view(&self, view: Option<&MapView>) {
        match self.state.get() {
            ViewSyncState::LocalDrag => log::trace!("mapView change deferred until drag ends"),
            ViewSyncState::RemoteApplying => {}
            ViewSyncState::Idle => {
                if let Some(view) = view {
                    self.apply_shared(*view);
                }
            }
        }
    }

    fn apply_shared(&self, view: MapView) {
        if !view.is_valid() {
            log::debug!("ignoring invalid mapView {:?}", view);
            return;
        }
        let current = self.viewport.view();
        if current == view {
            return;
        }

        let previous = self.state.replace(ViewSyncState::RemoteApplying);
        if current.zoom != view.zoom {
            self.viewport.set_view(view.center, Some(view.zoom), true);
        } else {
            self.viewport.set_view(view.center, None, false);
        }
        self.state.set(previous);
    }
}
