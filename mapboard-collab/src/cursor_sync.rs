//! Live cursors of everyone in the room.
//!
//! Outbound: the local pointer is kept in a local-only record and pushed to
//! presence. Button changes go out at once; pure movement is rate limited
//! with a trailing flush from [`CursorSync::tick`].
//!
//! Inbound: every presence entry becomes one cursor on the host's
//! [`CursorLayer`], added once, updated on change and removed exactly once.

use crate::awareness::ClientId;
use crate::config::SessionConfig;
use crate::input::WindowEvents;
use crate::presence::{PresenceDiff, PresenceStore};
use crate::subscription::Subscription;
use crate::throttle::SampleLimiter;
use mapboard_core::geo::{LatLng, Point};
use mapboard_core::presence::{PresenceEntry, PresenceField, Tool};
use mapboard_core::UserColor;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorIcon {
    Hand,
    HandFist,
    Pen,
}

impl CursorIcon {
    pub fn for_state(tool: Tool, mouse_pressed: bool) -> Self {
        match (tool, mouse_pressed) {
            (Tool::Draw, _) => CursorIcon::Pen,
            (Tool::Move, true) => CursorIcon::HandFist,
            (Tool::Move, false) => CursorIcon::Hand,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorView {
    pub client_id: ClientId,
    pub is_local: bool,
    pub icon: CursorIcon,
    pub label: String,
    pub color: UserColor,
    /// Container pixels.
    pub position: Point,
}

impl CursorView {
    fn from_entry(client_id: ClientId, is_local: bool, entry: &PresenceEntry) -> Self {
        Self {
            client_id,
            is_local,
            icon: CursorIcon::for_state(entry.tool, entry.mouse_pressed),
            label: entry.username.clone(),
            color: entry.user_color,
            position: entry.mouse_container_point,
        }
    }
}

/// Host-side cursor overlay.
pub trait CursorLayer {
    fn add(&self, cursor: &CursorView);
    fn update(&self, cursor: &CursorView);
    fn remove(&self, client_id: ClientId);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LocalPointer {
    pressed: bool,
    position: Point,
    lat_lng: Option<LatLng>,
}

struct Outbound {
    sent: LocalPointer,
    pending: LocalPointer,
    limiter: SampleLimiter,
}

struct CursorSyncInner {
    presence: PresenceStore<PresenceEntry>,
    layer: Rc<dyn CursorLayer>,
    outbound: RefCell<Outbound>,
    shown: RefCell<BTreeMap<ClientId, CursorView>>,
}

pub struct CursorSync {
    inner: Rc<CursorSyncInner>,
    _subscriptions: Vec<Subscription>,
}

impl CursorSync {
    pub fn attach(
        presence: PresenceStore<PresenceEntry>,
        layer: Rc<dyn CursorLayer>,
        window: &WindowEvents,
        config: &SessionConfig,
    ) -> Self {
        let start = presence.local().map_or(
            LocalPointer {
                pressed: false,
                position: Point::ZERO,
                lat_lng: None,
            },
            |entry| LocalPointer {
                pressed: entry.mouse_pressed,
                position: entry.mouse_container_point,
                lat_lng: entry.mouse_lat_lng,
            },
        );
        let inner = Rc::new(CursorSyncInner {
            presence: presence.clone(),
            layer,
            outbound: RefCell::new(Outbound {
                sent: start,
                pending: start,
                limiter: SampleLimiter::from_hz(config.cursor_broadcast_hz),
            }),
            shown: RefCell::new(BTreeMap::new()),
        });

        let weak = Rc::downgrade(&inner);
        let on_presence = presence.subscribe(move |diff| {
            if let Some(inner) = weak.upgrade() {
                inner.on_presence(diff);
            }
        });

        let weak = Rc::downgrade(&inner);
        let on_release = window.on_release(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.release();
            }
        });

        let everyone: Vec<ClientId> = presence.snapshot().keys().copied().collect();
        for id in everyone {
            inner.refresh(id);
        }

        Self {
            inner,
            _subscriptions: vec![on_presence, on_release],
        }
    }

    pub fn pointer_down(&self, position: Point, lat_lng: Option<LatLng>, now: Instant) {
        self.inner.pointer(Some(true), position, lat_lng, now);
    }

    pub fn pointer_move(&self, position: Point, lat_lng: Option<LatLng>, now: Instant) {
        self.inner.pointer(None, position, lat_lng, now);
    }

    pub fn pointer_up(&self, position: Point, lat_lng: Option<LatLng>, now: Instant) {
        self.inner.pointer(Some(false), position, lat_lng, now);
    }

    /// Send a throttled position once its window has passed.
    pub fn tick(&self, now: Instant) {
        let due = self.inner.outbound.borrow_mut().limiter.poll(now);
        if due {
            self.inner.commit();
        }
    }

    /// Cursors currently on the layer.
    pub fn shown(&self) -> Vec<ClientId> {
        self.inner.shown.borrow().keys().copied().collect()
    }
}

impl Drop for CursorSync {
    fn drop(&mut self) {
        let shown = std::mem::take(&mut *self.inner.shown.borrow_mut());
        for id in shown.keys() {
            self.inner.layer.remove(*id);
        }
    }
}

impl CursorSyncInner {
    fn pointer(&self, pressed: Option<bool>, position: Point, lat_lng: Option<LatLng>, now: Instant) {
        let send_now = {
            let mut out = self.outbound.borrow_mut();
            if let Some(pressed) = pressed {
                out.pending.pressed = pressed;
            }
            out.pending.position = position;
            if lat_lng.is_some() {
                out.pending.lat_lng = lat_lng;
            }

            if out.pending.pressed != out.sent.pressed {
                // Button changes carry the latest position with them.
                out.limiter.sample(now);
                out.limiter.flush();
                true
            } else if out.pending != out.sent {
                out.limiter.sample(now)
            } else {
                false
            }
        };
        if send_now {
            self.commit();
        }
    }

    /// Window-level mouse-up or blur: the button is no longer held.
    fn release(&self) {
        let changed = {
            let mut out = self.outbound.borrow_mut();
            out.pending.pressed = false;
            out.pending.pressed != out.sent.pressed
        };
        if changed {
            self.commit();
        }
    }

    /// Publish every field that differs from what was last sent, as one write.
    /// `sent` only advances once presence accepted the write.
    fn commit(&self) {
        let (pending, fields) = {
            let out = self.outbound.borrow();
            let (sent, pending) = (out.sent, out.pending);
            let mut fields = Vec::new();
            if pending.pressed != sent.pressed {
                fields.push(PresenceField::MousePressed(pending.pressed));
            }
            if pending.position != sent.position {
                fields.push(PresenceField::MouseContainerPoint(pending.position));
            }
            if let Some(ll) = pending.lat_lng.filter(|_| pending.lat_lng != sent.lat_lng) {
                fields.push(PresenceField::MouseLatLng(ll));
            }
            (pending, fields)
        };
        if fields.is_empty() {
            self.outbound.borrow_mut().sent = pending;
            return;
        }
        match self.presence.set_fields(fields) {
            Ok(()) => self.outbound.borrow_mut().sent = pending,
            Err(e) => log::debug!("cursor update rejected: {}", e),
        }
    }

    fn on_presence(&self, diff: &PresenceDiff) {
        for id in diff.changed() {
            self.refresh(id);
        }
        for &id in &diff.removed {
            let was_shown = self.shown.borrow_mut().remove(&id).is_some();
            if was_shown {
                self.layer.remove(id);
            }
        }
    }

    fn refresh(&self, id: ClientId) {
        let Some(entry) = self.presence.get(id) else {
            return;
        };
        let view = CursorView::from_entry(id, id == self.presence.client_id(), &entry);
        let previous = self.shown.borrow_mut().insert(id, view.clone());
        match previous {
            None => self.layer.add(&view),
            Some(old) if old != view => self.layer.update(&view),
            Some(_) => {}
        }
    }
}
