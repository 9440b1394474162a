//! One client's membership in a room.
//!
//! [`RoomSession::create`] wires the document, awareness and presence to a
//! [`PeerChannel`] and starts the handshake; the session is usable at once
//! but only [`ConnectionState::Ready`] after it has either received a peer's
//! document or found the room empty. Hosts drive it by calling
//! [`RoomSession::poll`] (or awaiting [`RoomSession::wait_ready`]) and attach
//! the controllers they need.
//!
//! Handshake:
//! ```text
//!   joiner                                  member
//!     │── SyncStep1(sv) ───────── broadcast ──▶│
//!     │── Awareness(local) ────── broadcast ──▶│
//!     │◀─────────── SyncStep2(diff) ── to joiner│
//!     │◀─────────── SyncStep1(sv) ──── to joiner│
//!     │◀─────────── Awareness(local) ─ to joiner│
//!     │── SyncStep2(diff) ──────── to member ─▶│
//! ```

use crate::awareness::{Awareness, ClientId, UpdateOrigin};
use crate::broadcast::{PeerChannel, RoomHub};
use crate::config::SessionConfig;
use crate::cursor_sync::{CursorLayer, CursorSync};
use crate::document::{DocumentError, DocumentStore};
use crate::input::WindowEvents;
use crate::prefs::{PrefsStore, USERNAME_KEY, USER_COLOR_KEY};
use crate::presence::PresenceStore;
use crate::protocol::{Frame, MessageType, ProtocolError};
use crate::stroke_sync::{StrokeCanvas, StrokeSync};
use crate::subscription::Subscription;
use crate::view_sync::{MapViewport, ViewSync};
use mapboard_core::names::random_username;
use mapboard_core::presence::{PresenceEntry, PresenceField, SchemaError, Tool};
use mapboard_core::UserColor;
use rand::Rng;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake sent, no peer document received yet.
    Connecting,
    Ready,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("room not ready after {0:?}")]
    Timeout(Duration),
    #[error("session closed")]
    Closed,
}

type Channel = RefCell<Box<dyn PeerChannel>>;

/// Shared with the forwarding closures.
struct Link {
    client_id: ClientId,
    channel: Channel,
}

impl Link {
    fn send(&self, frame: Frame) {
        if let Err(e) = self.channel.borrow_mut().send(frame) {
            log::warn!("client {} send failed: {}", self.client_id, e);
        }
    }
}

pub struct RoomSession {
    room_id: String,
    config: SessionConfig,
    link: Rc<Link>,
    doc: Rc<DocumentStore>,
    awareness: Rc<Awareness>,
    presence: PresenceStore<PresenceEntry>,
    prefs: Rc<dyn PrefsStore>,
    window: WindowEvents,
    state: Cell<ConnectionState>,
    ready_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

impl RoomSession {
    /// Connect to `room_id` on an in-process hub.
    pub fn join(
        hub: &Arc<RoomHub>,
        room_id: &str,
        prefs: Rc<dyn PrefsStore>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let link = hub.connect(&config.channel_room(room_id));
        Self::create(room_id, Box::new(link), prefs, config)
    }

    pub fn create(
        room_id: &str,
        channel: Box<dyn PeerChannel>,
        prefs: Rc<dyn PrefsStore>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        if !channel.is_connected() {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        let client_id = channel.client_id();
        let alone = channel.peer_count() == 0;
        let link = Rc::new(Link {
            client_id,
            channel: RefCell::new(channel),
        });

        let doc = Rc::new(DocumentStore::new());
        let awareness = Rc::new(Awareness::new(client_id));

        let mut rng = rand::thread_rng();
        let initial = initial_entry(prefs.as_ref(), &mut rng);
        let presence = PresenceStore::with_schema(awareness.clone(), &initial, || {
            PresenceEntry::initial(random_username(&mut rng), UserColor::random(&mut rng))
        })?;

        let mut subscriptions = Vec::new();

        let out = link.clone();
        subscriptions.push(doc.observe_local_updates(move |update| {
            out.send(Frame::update(out.client_id, update.to_vec()));
        }));

        let out = link.clone();
        let weak_awareness = Rc::downgrade(&awareness);
        subscriptions.push(awareness.on_update(move |event| {
            if event.origin != UpdateOrigin::Local {
                return;
            }
            let Some(awareness) = weak_awareness.upgrade() else {
                return;
            };
            match Frame::awareness(out.client_id, &awareness.encode_local()) {
                Ok(frame) => out.send(frame),
                Err(e) => log::warn!("awareness not sent: {}", e),
            }
        }));

        let prefs_out = prefs.clone();
        let watched = presence.clone();
        subscriptions.push(presence.subscribe(move |diff| {
            if diff.changed().any(|id| id == client_id) {
                if let Some(entry) = watched.local() {
                    persist_prefs(prefs_out.as_ref(), &entry);
                }
            }
        }));

        let session = Self {
            room_id: room_id.to_string(),
            config,
            link,
            doc,
            awareness,
            presence,
            prefs,
            window: WindowEvents::new(),
            state: Cell::new(ConnectionState::Connecting),
            ready_callbacks: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(subscriptions),
        };

        if let Some(entry) = session.presence.local() {
            persist_prefs(session.prefs.as_ref(), &entry);
        }

        log::info!("client {} joining room {:?}", client_id, session.room_id);
        session.announce();
        if alone {
            session.become_ready();
        }
        Ok(session)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn client_id(&self) -> ClientId {
        self.link.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn doc(&self) -> &Rc<DocumentStore> {
        &self.doc
    }

    pub fn awareness(&self) -> &Rc<Awareness> {
        &self.awareness
    }

    pub fn presence(&self) -> &PresenceStore<PresenceEntry> {
        &self.presence
    }

    /// Where the host forwards window-level mouse-up and blur.
    pub fn window(&self) -> &WindowEvents {
        &self.window
    }

    /// Run `callback` once the room is ready; immediately if it already is.
    pub fn on_ready(&self, callback: impl FnOnce() + 'static) {
        match self.state.get() {
            ConnectionState::Ready => callback(),
            ConnectionState::Connecting => self.ready_callbacks.borrow_mut().push(Box::new(callback)),
            ConnectionState::Closed => log::debug!("on_ready after close ignored"),
        }
    }

    /// Poll the channel until the room is ready.
    pub async fn wait_ready(&self) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + self.config.ready_timeout;
        loop {
            self.poll();
            match self.state.get() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Closed => return Err(SessionError::Closed),
                ConnectionState::Connecting => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SessionError::Timeout(self.config.ready_timeout));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Process every frame waiting on the channel. Returns how many were
    /// handled.
    pub fn poll(&self) -> usize {
        if self.state.get() == ConnectionState::Closed {
            return 0;
        }

        let mut frames = Vec::new();
        let mut lagged = false;
        let mut closed = false;
        {
            let mut channel = self.link.channel.borrow_mut();
            loop {
                match channel.try_recv() {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(ProtocolError::Lagged(n)) => {
                        log::warn!("client {} lagged by {} frames", self.link.client_id, n);
                        lagged = true;
                    }
                    Err(ProtocolError::ConnectionClosed) => {
                        closed = true;
                        break;
                    }
                    Err(e) => log::debug!("dropping frame: {}", e),
                }
            }
        }

        let handled = frames.len();
        for frame in frames {
            if let Err(e) = self.handle(frame) {
                log::debug!("frame rejected: {}", e);
            }
        }

        if lagged {
            log::info!("client {} resyncing", self.link.client_id);
            self.announce();
        }
        if closed {
            log::info!("client {} lost its channel", self.link.client_id);
            self.shutdown();
        } else if self.state.get() == ConnectionState::Connecting
            && self.link.channel.borrow().peer_count() == 0
        {
            self.become_ready();
        }
        handled
    }

    pub fn attach_view_sync(&self, viewport: Rc<dyn MapViewport>) -> ViewSync {
        ViewSync::attach(self.doc.clone(), viewport, &self.window, &self.config)
    }

    pub fn attach_stroke_sync(
        &self,
        viewport: Rc<dyn MapViewport>,
        canvas: Rc<dyn StrokeCanvas>,
    ) -> StrokeSync {
        StrokeSync::attach(
            self.doc.clone(),
            self.presence.clone(),
            viewport,
            canvas,
            &self.window,
            &self.config,
        )
    }

    pub fn attach_cursor_sync(&self, layer: Rc<dyn CursorLayer>) -> CursorSync {
        CursorSync::attach(self.presence.clone(), layer, &self.window, &self.config)
    }

    /// MOVE ↔ DRAW. Returns the new tool.
    pub fn toggle_tool(&self) -> Result<Tool, SessionError> {
        let current = self.presence.local().map(|e| e.tool).unwrap_or_default();
        let next = current.toggled();
        self.presence.set_field(PresenceField::Tool(next))?;
        Ok(next)
    }

    pub fn set_username(&self, username: &str) -> Result<(), SessionError> {
        self.presence
            .set_field(PresenceField::Username(username.to_string()))?;
        Ok(())
    }

    pub fn set_user_color(&self, color: UserColor) -> Result<(), SessionError> {
        self.presence.set_field(PresenceField::UserColor(color))?;
        Ok(())
    }

    /// Leave the room. Idempotent; also runs on drop.
    pub fn close(&self) {
        if self.state.get() == ConnectionState::Closed {
            return;
        }
        self.presence.clear_local();
        // Disconnecting makes the hub announce our Leave.
        self.shutdown();
        log::info!("client {} left room {:?}", self.link.client_id, self.room_id);
    }

    fn shutdown(&self) {
        self.state.set(ConnectionState::Closed);
        self.link.channel.borrow_mut().disconnect();
        self.ready_callbacks.borrow_mut().clear();
        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        drop(subscriptions);
    }

    /// Broadcast our state vector and presence.
    fn announce(&self) {
        let id = self.link.client_id;
        self.link.send(Frame::sync_step1(id, self.doc.state_vector()));
        match Frame::awareness(id, &self.awareness.encode_local()) {
            Ok(frame) => self.link.send(frame),
            Err(e) => log::warn!("awareness not sent: {}", e),
        }
    }

    fn handle(&self, frame: Frame) -> Result<(), SessionError> {
        let id = self.link.client_id;
        if frame.from == id {
            return Ok(());
        }
        match frame.msg_type {
            MessageType::SyncStep1 => {
                let diff = self.doc.diff_since(&frame.payload)?;
                self.link.send(Frame::sync_step2(id, frame.from, diff));
                // Only a broadcast request gets our own state vector back;
                // answering a reply would ping-pong forever.
                if frame.to.is_none() {
                    self.link
                        .send(Frame::sync_step1(id, self.doc.state_vector()).addressed_to(frame.from));
                    let awareness = Frame::awareness(id, &self.awareness.encode_local())?;
                    self.link.send(awareness.addressed_to(frame.from));
                }
            }
            MessageType::SyncStep2 => {
                self.doc.apply_remote_update(&frame.payload)?;
                self.become_ready();
            }
            MessageType::Update => self.doc.apply_remote_update(&frame.payload)?,
            MessageType::Awareness => {
                self.awareness.apply_remote(&frame.awareness_update()?);
            }
            MessageType::Leave => {
                log::debug!("client {} left", frame.from);
                self.awareness.remove_states(&[frame.from], UpdateOrigin::Remote);
            }
        }
        Ok(())
    }

    fn become_ready(&self) {
        if self.state.get() != ConnectionState::Connecting {
            return;
        }
        self.state.set(ConnectionState::Ready);
        log::info!("client {} ready in room {:?}", self.link.client_id, self.room_id);
        let callbacks = std::mem::take(&mut *self.ready_callbacks.borrow_mut());
        for callback in callbacks {
            callback();
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Last used name and colour, or fresh random ones.
fn initial_entry<R: Rng + ?Sized>(prefs: &dyn PrefsStore, rng: &mut R) -> PresenceEntry {
    let username = prefs
        .get(USERNAME_KEY)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| random_username(rng));
    let color = prefs
        .get(USER_COLOR_KEY)
        .and_then(|name| name.parse::<UserColor>().ok())
        .unwrap_or_else(|| UserColor::random(rng));
    PresenceEntry::initial(username, color)
}

fn persist_prefs(prefs: &dyn PrefsStore, entry: &PresenceEntry) {
    let result = prefs
        .set(USERNAME_KEY, &entry.username)
        .and_then(|_| prefs.set(USER_COLOR_KEY, entry.user_color.name()));
    if let Err(e) = result {
        log::warn!("could not save preferences: {}", e);
    }
}
