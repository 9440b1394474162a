//! Validated view of the awareness channel.
//!
//! [`PresenceStore`] keeps the last valid state of every client, keyed by
//! client id. Raw awareness states are untrusted: each one goes through the
//! store's `parse` function and anything it rejects is dropped, leaving the
//! previous entry for that client in place.
//!
//! One awareness event is applied as one batch (`added`/`updated` first,
//! then `removed`) and subscribers see a single [`PresenceDiff`] afterwards.

use crate::awareness::{Awareness, AwarenessEvent, ClientId, UpdateOrigin};
use crate::subscription::{Subscribers, Subscription};
use mapboard_core::presence::{PresenceEntry, PresenceField, SchemaError};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

/// Net effect of one applied batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceDiff {
    pub origin: UpdateOrigin,
    pub added: Vec<ClientId>,
    pub updated: Vec<ClientId>,
    pub removed: Vec<ClientId>,
}

impl PresenceDiff {
    fn new(origin: UpdateOrigin) -> Self {
        Self {
            origin,
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Ids added or updated in this batch.
    pub fn changed(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.added.iter().chain(self.updated.iter()).copied()
    }
}

type ParseFn<T> = dyn Fn(&Value) -> Result<T, SchemaError>;

struct PresenceInner<T> {
    awareness: Rc<Awareness>,
    parse: Box<ParseFn<T>>,
    snapshot: RefCell<BTreeMap<ClientId, T>>,
    listeners: Subscribers<PresenceDiff>,
    awareness_sub: RefCell<Option<Subscription>>,
}

/// Cheap to clone; clones share one snapshot.
pub struct PresenceStore<T> {
    inner: Rc<PresenceInner<T>>,
}

impl<T> Clone for PresenceStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> PresenceStore<T> {
    /// Bind to `awareness` and publish the local state.
    ///
    /// `initial` is validated first; if `parse` rejects it, `fallback`
    /// supplies the state instead. If that is rejected too, construction
    /// fails and nothing is broadcast.
    pub fn new(
        awareness: Rc<Awareness>,
        parse: impl Fn(&Value) -> Result<T, SchemaError> + 'static,
        initial: Value,
        fallback: impl FnOnce() -> Value,
    ) -> Result<Self, SchemaError> {
        let initial = match parse(&initial) {
            Ok(_) => initial,
            Err(e) => {
                log::debug!("initial presence rejected ({}), using fallback", e);
                let fallback = fallback();
                parse(&fallback)?;
                fallback
            }
        };

        let inner = Rc::new(PresenceInner {
            awareness: awareness.clone(),
            parse: Box::new(parse),
            snapshot: RefCell::new(BTreeMap::new()),
            listeners: Subscribers::new(),
            awareness_sub: RefCell::new(None),
        });

        let weak: Weak<PresenceInner<T>> = Rc::downgrade(&inner);
        let sub = awareness.on_update(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.apply(event);
            }
        });
        *inner.awareness_sub.borrow_mut() = Some(sub);

        awareness.set_local_state(Some(initial));
        Ok(Self { inner })
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.awareness.client_id()
    }

    pub fn awareness(&self) -> &Rc<Awareness> {
        &self.inner.awareness
    }

    pub fn snapshot(&self) -> BTreeMap<ClientId, T> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn get(&self, client_id: ClientId) -> Option<T> {
        self.inner.snapshot.borrow().get(&client_id).cloned()
    }

    pub fn local(&self) -> Option<T> {
        self.get(self.client_id())
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.inner.snapshot.borrow().contains_key(&client_id)
    }

    pub fn len(&self) -> usize {
        self.inner.snapshot.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, callback: impl Fn(&PresenceDiff) + 'static) -> Subscription {
        self.inner.listeners.subscribe(callback)
    }

    /// Write one field of the local state.
    pub fn set_local_field(&self, key: &str, value: Value) -> Result<(), SchemaError> {
        self.set_local_fields([(key.to_string(), value)])
    }

    /// Write several fields as one broadcast. The merged state must still
    /// pass validation, otherwise nothing is written.
    pub fn set_local_fields(
        &self,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), SchemaError> {
        let fields: Vec<(String, Value)> = fields.into_iter().collect();
        let mut candidate = match self.inner.awareness.local_state() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in &fields {
            candidate.insert(key.clone(), value.clone());
        }
        (self.inner.parse)(&Value::Object(candidate))?;
        self.inner.awareness.set_local_state_fields(fields);
        Ok(())
    }

    /// Withdraw the local state, e.g. when leaving the room.
    pub fn clear_local(&self) {
        self.inner.awareness.set_local_state(None);
    }
}

impl PresenceStore<PresenceEntry> {
    /// Store over the core presence schema.
    pub fn with_schema(
        awareness: Rc<Awareness>,
        initial: &PresenceEntry,
        fallback: impl FnOnce() -> PresenceEntry,
    ) -> Result<Self, SchemaError> {
        Self::new(awareness, PresenceEntry::parse, initial.to_json(), || {
            fallback().to_json()
        })
    }

    pub fn set_field(&self, field: PresenceField) -> Result<(), SchemaError> {
        self.set_local_field(field.key(), field.to_value())
    }

    pub fn set_fields(&self, fields: impl IntoIterator<Item = PresenceField>) -> Result<(), SchemaError> {
        self.set_local_fields(
            fields
                .into_iter()
                .map(|f| (f.key().to_string(), f.to_value())),
        )
    }
}

impl<T: Clone + PartialEq + 'static> PresenceInner<T> {
    fn apply(&self, event: &AwarenessEvent) {
        let local_id = self.awareness.client_id();
        let mut diff = PresenceDiff::new(event.origin);

        // Local events only ever touch our own slot; remote ones never do.
        let to_parse: Vec<ClientId> = event
            .changes
            .added
            .iter()
            .chain(event.changes.updated.iter())
            .copied()
            .filter(|id| match event.origin {
                UpdateOrigin::Local => *id == local_id,
                UpdateOrigin::Remote => *id != local_id,
            })
            .collect();

        {
            let mut snapshot = self.snapshot.borrow_mut();
            for id in to_parse {
                let Some(raw) = self.awareness.state(id) else {
                    continue;
                };
                match (self.parse)(&raw) {
                    Ok(entry) => match snapshot.insert(id, entry.clone()) {
                        None => diff.added.push(id),
                        Some(previous) if previous != entry => diff.updated.push(id),
                        Some(_) => {}
                    },
                    Err(e) => log::debug!("dropping presence from {}: {}", id, e),
                }
            }
            for &id in &event.changes.removed {
                if snapshot.remove(&id).is_some() {
                    diff.removed.push(id);
                }
            }
        }

        if !diff.is_empty() {
            self.listeners.emit(&diff);
        }
    }
}
