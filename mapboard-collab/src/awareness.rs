//! Awareness: the ephemeral per-client state channel.
//!
//! Each client owns one JSON state and a monotonically increasing clock.
//! Remote updates older than what we already hold are ignored, and a `null`
//! state means the client left. Every change is reported to listeners as one
//! [`AwarenessEvent`] carrying `added`/`updated`/`removed` ids and whether it
//! came from a local write or a remote broadcast.

use crate::subscription::{Subscribers, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

/// Per-connection client id, unique for the lifetime of a connection.
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwarenessChanges {
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
}

impl AwarenessChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessEvent {
    pub changes: AwarenessChanges,
    pub origin: UpdateOrigin,
}

// ───────────────────────────────────────────────────────────────────
// Wire form
// ───────────────────────────────────────────────────────────────────

/// One client's state as broadcast. `state` is JSON text; `None` or
/// `"null"` means removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessEntry {
    pub client_id: ClientId,
    pub clock: u32,
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub entries: Vec<AwarenessEntry>,
}

// ───────────────────────────────────────────────────────────────────
// Awareness
// ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct AwarenessInner {
    states: BTreeMap<ClientId, Value>,
    clocks: HashMap<ClientId, u32>,
}

pub struct Awareness {
    client_id: ClientId,
    inner: RefCell<AwarenessInner>,
    listeners: Subscribers<AwarenessEvent>,
}

impl Awareness {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            inner: RefCell::new(AwarenessInner::default()),
            listeners: Subscribers::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn local_state(&self) -> Option<Value> {
        self.inner.borrow().states.get(&self.client_id).cloned()
    }

    pub fn state(&self, client_id: ClientId) -> Option<Value> {
        self.inner.borrow().states.get(&client_id).cloned()
    }

    pub fn states(&self) -> BTreeMap<ClientId, Value> {
        self.inner.borrow().states.clone()
    }

    pub fn clock(&self, client_id: ClientId) -> Option<u32> {
        self.inner.borrow().clocks.get(&client_id).copied()
    }

    pub fn on_update(&self, callback: impl Fn(&AwarenessEvent) + 'static) -> Subscription {
        self.listeners.subscribe(callback)
    }

    /// Replace the local state; `None` withdraws it.
    pub fn set_local_state(&self, state: Option<Value>) {
        let id = self.client_id;
        let mut changes = AwarenessChanges::default();
        {
            let mut inner = self.inner.borrow_mut();
            let clock = inner.clocks.get(&id).map_or(0, |c| c.wrapping_add(1));
            inner.clocks.insert(id, clock);

            let state = state.filter(|s| !s.is_null());
            let had_state = inner.states.contains_key(&id);
            match state {
                Some(state) => {
                    inner.states.insert(id, state);
                    if had_state {
                        changes.updated.push(id);
                    } else {
                        changes.added.push(id);
                    }
                }
                None => {
                    if inner.states.remove(&id).is_some() {
                        changes.removed.push(id);
                    }
                }
            }
        }
        self.notify(changes, UpdateOrigin::Local);
    }

    /// Set one top-level key of the local state object.
    pub fn set_local_state_field(&self, key: &str, value: Value) {
        self.set_local_state_fields([(key.to_string(), value)]);
    }

    /// Set several keys as one update.
    pub fn set_local_state_fields(&self, fields: impl IntoIterator<Item = (String, Value)>) {
        let mut object = match self.local_state() {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in fields {
            object.insert(key, value);
        }
        self.set_local_state(Some(Value::Object(object)));
    }

    /// Merge a remote broadcast. Entries about our own id are ignored.
    pub fn apply_remote(&self, update: &AwarenessUpdate) -> AwarenessChanges {
        let mut changes = AwarenessChanges::default();
        {
            let mut inner = self.inner.borrow_mut();
            for entry in &update.entries {
                if entry.client_id == self.client_id {
                    continue;
                }
                let state = match entry.state.as_deref().map(serde_json::from_str::<Value>) {
                    None => None,
                    Some(Ok(Value::Null)) => None,
                    Some(Ok(value)) => Some(value),
                    Some(Err(e)) => {
                        log::debug!("dropping awareness entry for {}: {}", entry.client_id, e);
                        continue;
                    }
                };

                let id = entry.client_id;
                let known = inner.states.contains_key(&id);
                let fresh = match inner.clocks.get(&id) {
                    None => true,
                    Some(&clock) => clock < entry.clock || (clock == entry.clock && state.is_none() && known),
                };
                if !fresh {
                    log::trace!("stale awareness clock {} for {}", entry.clock, id);
                    continue;
                }

                inner.clocks.insert(id, entry.clock);
                match state {
                    Some(state) => {
                        inner.states.insert(id, state);
                        if known {
                            changes.updated.push(id);
                        } else {
                            changes.added.push(id);
                        }
                    }
                    None => {
                        if inner.states.remove(&id).is_some() {
                            changes.removed.push(id);
                        }
                    }
                }
            }
        }
        self.notify(changes.clone(), UpdateOrigin::Remote);
        changes
    }

    /// Drop states of clients the channel reported gone.
    pub fn remove_states(&self, client_ids: &[ClientId], origin: UpdateOrigin) {
        let mut changes = AwarenessChanges::default();
        {
            let mut inner = self.inner.borrow_mut();
            for &id in client_ids {
                if id == self.client_id && origin == UpdateOrigin::Remote {
                    continue;
                }
                if inner.states.remove(&id).is_some() {
                    let clock = inner.clocks.get(&id).map_or(0, |c| c.wrapping_add(1));
                    inner.clocks.insert(id, clock);
                    changes.removed.push(id);
                }
            }
        }
        self.notify(changes, origin);
    }

    /// Encode the given clients' current states for broadcast.
    pub fn encode(&self, client_ids: &[ClientId]) -> AwarenessUpdate {
        let inner = self.inner.borrow();
        let entries = client_ids
            .iter()
            .filter_map(|id| {
                let clock = *inner.clocks.get(id)?;
                let state = inner.states.get(id).map(|s| s.to_string());
                Some(AwarenessEntry {
                    client_id: *id,
                    clock,
                    state,
                })
            })
            .collect();
        AwarenessUpdate { entries }
    }

    pub fn encode_local(&self) -> AwarenessUpdate {
        self.encode(&[self.client_id])
    }

    fn notify(&self, changes: AwarenessChanges, origin: UpdateOrigin) {
        if changes.is_empty() {
            return;
        }
        self.listeners.emit(&AwarenessEvent { changes, origin });
    }
}
