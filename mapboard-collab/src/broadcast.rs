//! In-process room transport.
//!
//! A [`RoomHub`] maps room names to [`BroadcastGroup`]s. Each group fans a
//! frame out to every member through one tokio broadcast channel; each
//! member holds a [`HubLink`] that buffers up to `capacity` frames before it
//! lags. Links filter out their own frames and frames addressed to others.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use crate::awareness::ClientId;
use crate::protocol::{Frame, ProtocolError};

/// A multi-peer link for one room, as seen by one client.
pub trait PeerChannel {
    /// Id assigned to this connection.
    fn client_id(&self) -> ClientId;

    /// Send to the room (or to `frame.to`).
    fn send(&mut self, frame: Frame) -> Result<(), ProtocolError>;

    /// Next frame meant for this client, without blocking.
    fn try_recv(&mut self) -> Result<Option<Frame>, ProtocolError>;

    /// Other members currently in the room.
    fn peer_count(&self) -> usize;

    fn is_connected(&self) -> bool;

    /// Leave the room. Remaining members receive a `Leave` frame for this
    /// client, whether or not the session said goodbye itself.
    fn disconnect(&mut self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Send/drop counters, updated without taking a lock.
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// BroadcastGroup
// ───────────────────────────────────────────────────────────────────

/// All members of one room share one broadcast channel.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    peers: RwLock<HashSet<ClientId>>,
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: RwLock::new(HashSet::new()),
            capacity,
            stats: AtomicBroadcastStats::new(),
        }
    }

    fn join(&self, client_id: ClientId) -> broadcast::Receiver<Arc<Vec<u8>>> {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.insert(client_id);
        self.sender.subscribe()
    }

    fn leave(&self, client_id: ClientId) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        peers.remove(&client_id)
    }

    /// Encode once and fan out. Returns the number of receivers reached,
    /// including the sender's own.
    pub fn broadcast(&self, frame: &Frame) -> Result<usize, ProtocolError> {
        let encoded = Arc::new(frame.encode()?);
        let count = self.sender.send(encoded).unwrap_or(0);
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn has_peer(&self, client_id: ClientId) -> bool {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&client_id)
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peer_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn record_dropped(&self, n: u64) {
        self.stats.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }
}

// ───────────────────────────────────────────────────────────────────
// RoomHub
// ───────────────────────────────────────────────────────────────────

/// Room name → broadcast group. Rooms are created on first connect and
/// dropped when their last member disconnects.
pub struct RoomHub {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomHub {
    pub fn new(default_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        })
    }

    pub fn get_or_create(&self, room: &str) -> Arc<BroadcastGroup> {
        {
            let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(group) = rooms.get(room) {
                return group.clone();
            }
        }

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    /// Join `room` under a fresh random client id.
    pub fn connect(self: &Arc<Self>, room: &str) -> HubLink {
        let group = self.get_or_create(room);
        let mut client_id = ClientId::from(rand::random::<u32>());
        while group.has_peer(client_id) {
            client_id = ClientId::from(rand::random::<u32>());
        }
        let receiver = group.join(client_id);
        log::debug!("client {} joined room {:?}", client_id, room);

        HubLink {
            client_id,
            room: room.to_string(),
            group,
            receiver,
            hub: Arc::downgrade(self),
            connected: true,
        }
    }

    pub fn remove_if_empty(&self, room: &str) -> bool {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        match rooms.get(room) {
            Some(group) if group.peer_count() == 0 => {
                rooms.remove(room);
                true
            }
            _ => false,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn active_rooms(&self) -> Vec<String> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

// ───────────────────────────────────────────────────────────────────
// HubLink
// ───────────────────────────────────────────────────────────────────

pub struct HubLink {
    client_id: ClientId,
    room: String,
    group: Arc<BroadcastGroup>,
    receiver: broadcast::Receiver<Arc<Vec<u8>>>,
    hub: Weak<RoomHub>,
    connected: bool,
}

impl HubLink {
    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }
}

impl PeerChannel for HubLink {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn send(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.group.broadcast(&frame)?;
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(bytes) => {
                    let frame = Frame::decode(&bytes)?;
                    if frame.is_for(self.client_id) {
                        return Ok(Some(frame));
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(n)) => {
                    self.group.record_dropped(n);
                    return Err(ProtocolError::Lagged(n));
                }
                Err(TryRecvError::Closed) => return Err(ProtocolError::ConnectionClosed),
            }
        }
    }

    fn peer_count(&self) -> usize {
        let members = self.group.peer_count();
        if self.connected {
            members.saturating_sub(1)
        } else {
            members
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if !std::mem::replace(&mut self.connected, false) {
            return;
        }
        self.group.leave(self.client_id);
        if let Err(e) = self.group.broadcast(&Frame::leave(self.client_id)) {
            log::warn!("leave of client {} not announced: {}", self.client_id, e);
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_if_empty(&self.room);
        }
        log::debug!("client {} left room {:?}", self.client_id, self.room);
    }
}

impl Drop for HubLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_connect_assigns_distinct_ids() {
        let hub = RoomHub::new(16);
        let a = hub.connect("room");
        let b = hub.connect("room");
        assert_ne!(a.client_id(), b.client_id());
        assert_eq!(a.peer_count(), 1);
        assert_eq!(hub.room_count(), 1);
    }

    #[test]
    fn test_frames_skip_sender() {
        let hub = RoomHub::new(16);
        let mut a = hub.connect("room");
        let mut b = hub.connect("room");

        a.send(Frame::update(a.client_id(), vec![1, 2, 3])).unwrap();

        assert_eq!(a.try_recv().unwrap(), None);
        let got = b.try_recv().unwrap().unwrap();
        assert_eq!(got.payload, vec![1, 2, 3]);
        assert_eq!(got.from, a.client_id());
    }

    #[test]
    fn test_addressed_frames() {
        let hub = RoomHub::new(16);
        let mut a = hub.connect("room");
        let mut b = hub.connect("room");
        let mut c = hub.connect("room");

        a.send(Frame::sync_step2(a.client_id(), b.client_id(), vec![9]))
            .unwrap();

        assert!(b.try_recv().unwrap().is_some());
        assert!(c.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_rooms_are_isolated() {
        let hub = RoomHub::new(16);
        let mut a = hub.connect("one");
        let mut b = hub.connect("two");
        a.send(Frame::update(a.client_id(), vec![1])).unwrap();
        assert!(b.try_recv().unwrap().is_none());
        assert_eq!(hub.room_count(), 2);
    }

    #[test]
    fn test_disconnect_removes_empty_room() {
        let hub = RoomHub::new(16);
        let mut a = hub.connect("room");
        let b = hub.connect("room");

        a.disconnect();
        assert!(!a.is_connected());
        assert_eq!(b.peer_count(), 0);
        assert!(matches!(
            a.send(Frame::leave(a.client_id())),
            Err(ProtocolError::ConnectionClosed)
        ));
        assert_eq!(hub.room_count(), 1);

        drop(b);
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_dropped_link_announces_leave() {
        let hub = RoomHub::new(16);
        let a = hub.connect("room");
        let mut b = hub.connect("room");
        let a_id = a.client_id();

        drop(a);
        let frame = b.try_recv().unwrap().unwrap();
        assert_eq!(frame.msg_type, MessageType::Leave);
        assert_eq!(frame.from, a_id);
        assert!(b.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_lagged_receiver_reports() {
        let hub = RoomHub::new(2);
        let mut a = hub.connect("room");
        let mut b = hub.connect("room");
        for i in 0..5u8 {
            a.send(Frame::update(a.client_id(), vec![i])).unwrap();
        }
        assert!(matches!(b.try_recv(), Err(ProtocolError::Lagged(3))));
        // The newest frames are still there after the lag is reported.
        assert!(b.try_recv().unwrap().is_some());
        assert_eq!(b.group().stats().messages_dropped, 3);
    }

    #[test]
    fn test_broadcast_stats() {
        let group = BroadcastGroup::new(8);
        let _rx = group.join(1);
        group.broadcast(&Frame::leave(1)).unwrap();
        group.broadcast(&Frame::leave(1)).unwrap();
        let stats = group.stats();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.active_peers, 1);
        assert_eq!(group.capacity(), 8);
    }
}
