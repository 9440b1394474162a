//! The replicated room document.
//!
//! Layout of the underlying [`yrs::Doc`]:
//!
//! ```text
//! mapState: Map
//!   position: { zoom: number, center: [lat, lng] }        (last writer wins)
//! strokes: Array<Map>                                     (append only)
//!   { id, authorId, seed, color, done?, bounds?: [[lat,lng],[lat,lng]],
//!     points: Array<[x, y]> }                             (append only)
//! ```
//!
//! [`DocumentStore`] exposes typed read/write/observe paths over that
//! layout. yrs observers record which paths a committed transaction touched;
//! after every local write or remote update only those paths are read back
//! and their observers notified, so observers receive values, never raw
//! CRDT deltas, and a point append costs the same however large the
//! document grows.

use crate::subscription::{Subscribers, Subscription};
use mapboard_core::geo::{point_from_pair, LatLng, LatLngBounds, MapView, Point};
use mapboard_core::stroke::{new_stroke_id, NewStroke, Stroke};
use mapboard_core::UserColor;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use yrs::types::{Change, Event, PathSegment};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, DeepObservable, Doc, In, Map, MapPrelim, MapRef,
    Observable, Out, ReadTxn, StateVector, Transact, TransactionMut, Update,
};

const MAP_STATE: &str = "mapState";
const POSITION: &str = "position";
const STROKES: &str = "strokes";
const COLOR: &str = "color";
const DONE: &str = "done";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DocumentError {
    #[error("malformed update: {0}")]
    Decode(String),
    #[error("update could not be applied: {0}")]
    Apply(String),
    #[error("malformed state vector: {0}")]
    StateVector(String),
}

/// Materialized document contents, for convergence checks.
#[derive(Debug, Clone, PartialEq)]
pub struct DocSnapshot {
    pub map_view: Option<MapView>,
    pub strokes: Vec<Stroke>,
}

/// Write handle for a stroke this client created.
#[derive(Clone)]
pub struct StrokeHandle {
    id: String,
    record: MapRef,
    points: ArrayRef,
}

impl StrokeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for StrokeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrokeHandle").field("id", &self.id).finish()
    }
}

/// Paths touched by committed transactions since the last notification.
/// Stroke positions are indices into `strokes`, valid until the next
/// transaction.
#[derive(Debug, Default)]
struct Touched {
    map_view: bool,
    added: BTreeSet<u32>,
    grown: BTreeSet<u32>,
    finished: BTreeSet<u32>,
}

impl Touched {
    fn is_empty(&self) -> bool {
        !self.map_view && self.added.is_empty() && self.grown.is_empty() && self.finished.is_empty()
    }

    fn record(&mut self, txn: &TransactionMut, event: &Event) {
        match event {
            Event::Array(e) => match e.path().front() {
                // The strokes array itself.
                None => {
                    let mut index = 0u32;
                    for change in e.delta(txn) {
                        match change {
                            Change::Added(items) => {
                                let n = items.len() as u32;
                                self.added.extend(index..index + n);
                                index += n;
                            }
                            Change::Retain(n) => index += n,
                            Change::Removed(_) => {}
                        }
                    }
                }
                // `points` of the record at that index.
                Some(PathSegment::Index(i)) => {
                    self.grown.insert(*i);
                }
                Some(PathSegment::Key(_)) => {}
            },
            Event::Map(e) => {
                if let Some(PathSegment::Index(i)) = e.path().front() {
                    if e.keys(txn).contains_key(DONE) {
                        self.finished.insert(*i);
                    }
                }
            }
            _ => {}
        }
    }
}

fn lock(touched: &Mutex<Touched>) -> MutexGuard<'_, Touched> {
    touched.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What observers last saw.
#[derive(Default)]
struct Observed {
    map_view: Option<MapView>,
    stroke_ids: HashSet<String>,
}

pub struct DocumentStore {
    doc: Doc,
    map_state: MapRef,
    strokes: ArrayRef,
    touched: Arc<Mutex<Touched>>,
    observed: RefCell<Observed>,
    map_view_subs: Subscribers<Option<MapView>>,
    stroke_subs: Subscribers<[Stroke]>,
    point_subs: RefCell<HashMap<String, Subscribers<[Point]>>>,
    finish_subs: RefCell<HashMap<String, Subscribers<Stroke>>>,
    local_update_subs: Subscribers<[u8]>,
    _yrs_observers: Vec<yrs::Subscription>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        let doc = Doc::new();
        let map_state = doc.get_or_insert_map(MAP_STATE);
        let strokes = doc.get_or_insert_array(STROKES);
        let touched = Arc::new(Mutex::new(Touched::default()));

        let t = touched.clone();
        let view_observer = map_state.observe(move |_txn, _event| {
            lock(&t).map_view = true;
        });
        let t = touched.clone();
        let strokes_observer = strokes.observe_deep(move |txn, events| {
            let mut touched = lock(&t);
            for event in events.iter() {
                touched.record(txn, event);
            }
        });

        Self {
            doc,
            map_state,
            strokes,
            touched,
            observed: RefCell::new(Observed::default()),
            map_view_subs: Subscribers::new(),
            stroke_subs: Subscribers::new(),
            point_subs: RefCell::new(HashMap::new()),
            finish_subs: RefCell::new(HashMap::new()),
            local_update_subs: Subscribers::new(),
            _yrs_observers: vec![view_observer, strokes_observer],
        }
    }

    // ── mapView ─────────────────────────────────────────────────

    /// Current shared view; `None` before the first write or if the stored
    /// value is malformed.
    pub fn read_map_view(&self) -> Option<MapView> {
        let txn = self.doc.transact();
        match self.map_state.get(&txn, POSITION) {
            Some(Out::Any(any)) => map_view_from_any(&any),
            _ => None,
        }
    }

    pub fn write_map_view(&self, view: &MapView) {
        let update = {
            let mut txn = self.doc.transact_mut();
            self.map_state.insert(&mut txn, POSITION, map_view_to_any(view));
            txn.encode_update_v1()
        };
        self.after_local_write(update);
    }

    pub fn observe_map_view(&self, callback: impl Fn(Option<&MapView>) + 'static) -> Subscription {
        self.map_view_subs
            .subscribe(move |view: &Option<MapView>| callback(view.as_ref()))
    }

    // ── strokes ─────────────────────────────────────────────────

    /// Every well-formed stroke, in document order.
    pub fn read_strokes(&self) -> Vec<Stroke> {
        let txn = self.doc.transact();
        self.strokes
            .iter(&txn)
            .filter_map(|entry| match entry {
                Out::YMap(record) => stroke_from_map(&txn, &record),
                _ => None,
            })
            .collect()
    }

    pub fn read_stroke(&self, id: &str) -> Option<Stroke> {
        self.read_strokes().into_iter().find(|s| s.id == id)
    }

    pub fn stroke_count(&self) -> usize {
        let txn = self.doc.transact();
        self.strokes.len(&txn) as usize
    }

    /// Append a stroke record with its first point.
    pub fn append_stroke(&self, stroke: NewStroke) -> StrokeHandle {
        let id = new_stroke_id();
        let mut fields: Vec<(String, In)> = vec![
            ("id".into(), In::Any(Any::String(id.as_str().into()))),
            ("authorId".into(), In::Any(Any::Number(stroke.author_id as f64))),
            ("seed".into(), In::Any(Any::Number(stroke.seed))),
            (COLOR.into(), In::Any(Any::String(stroke.color.name().into()))),
        ];
        if let Some(bounds) = stroke.bounds {
            fields.push(("bounds".into(), In::Any(bounds_to_any(&bounds))));
        }

        let (handle, update) = {
            let mut txn = self.doc.transact_mut();
            let record: MapRef = self.strokes.push_back(&mut txn, MapPrelim::from_iter(fields));
            let points: ArrayRef = record.insert(
                &mut txn,
                "points",
                ArrayPrelim::from(vec![point_to_any(stroke.first_point)]),
            );
            (StrokeHandle { id, record, points }, txn.encode_update_v1())
        };
        log::debug!("stroke {} started", handle.id);
        self.after_local_write(update);
        handle
    }

    /// Append one point to a stroke this client created.
    pub fn append_point(&self, handle: &StrokeHandle, point: Point) {
        let update = {
            let mut txn = self.doc.transact_mut();
            handle.points.push_back(&mut txn, point_to_any(point));
            txn.encode_update_v1()
        };
        self.after_local_write(update);
    }

    /// Mark a stroke this client created as done. `color`, when given, is
    /// the colour it was last drawn in and becomes its final stored colour.
    pub fn finish_stroke(&self, handle: &StrokeHandle, color: Option<UserColor>) {
        let update = {
            let mut txn = self.doc.transact_mut();
            if let Some(color) = color {
                let recorded = match handle.record.get(&txn, COLOR) {
                    Some(Out::Any(Any::String(name))) => name.parse::<UserColor>().ok(),
                    _ => None,
                };
                if recorded != Some(color) {
                    handle
                        .record
                        .insert(&mut txn, COLOR, Any::String(color.name().into()));
                }
            }
            handle.record.insert(&mut txn, DONE, Any::Bool(true));
            txn.encode_update_v1()
        };
        log::debug!("stroke {} finished", handle.id);
        self.after_local_write(update);
    }

    /// Fires with the strokes appended since the last notification.
    pub fn observe_strokes(&self, callback: impl Fn(&[Stroke]) + 'static) -> Subscription {
        self.stroke_subs.subscribe(callback)
    }

    /// Fires with the full point list whenever stroke `id` grows.
    pub fn observe_stroke_points(
        &self,
        id: &str,
        callback: impl Fn(&[Point]) + 'static,
    ) -> Subscription {
        let subs = self
            .point_subs
            .borrow_mut()
            .entry(id.to_string())
            .or_default()
            .clone();
        subs.subscribe(callback)
    }

    /// Fires once with the final record when stroke `id` is marked done.
    pub fn observe_stroke_finished(
        &self,
        id: &str,
        callback: impl Fn(&Stroke) + 'static,
    ) -> Subscription {
        let subs = self
            .finish_subs
            .borrow_mut()
            .entry(id.to_string())
            .or_default()
            .clone();
        subs.subscribe(callback)
    }

    // ── replication ─────────────────────────────────────────────

    /// Fires with the v1 update of every local write. Remote updates are
    /// never re-emitted here.
    pub fn observe_local_updates(&self, callback: impl Fn(&[u8]) + 'static) -> Subscription {
        self.local_update_subs.subscribe(callback)
    }

    pub fn apply_remote_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        let update = Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let result = {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(update)
                .map_err(|e| DocumentError::Apply(e.to_string()))
        };
        self.notify_observers();
        result
    }

    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Everything this document has that a peer with `state_vector` lacks.
    pub fn diff_since(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e| DocumentError::StateVector(e.to_string()))?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    pub fn encode_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    pub fn snapshot(&self) -> DocSnapshot {
        DocSnapshot {
            map_view: self.read_map_view(),
            strokes: self.read_strokes(),
        }
    }

    fn after_local_write(&self, update: Vec<u8>) {
        self.local_update_subs.emit(&update[..]);
        self.notify_observers();
    }

    fn stroke_at<T: ReadTxn>(&self, txn: &T, index: u32) -> Option<Stroke> {
        match self.strokes.get(txn, index)? {
            Out::YMap(record) => stroke_from_map(txn, &record),
            _ => None,
        }
    }

    /// Read back only the paths the last transactions touched and notify
    /// their observers. No borrow is held while callbacks run.
    fn notify_observers(&self) {
        let touched = std::mem::take(&mut *lock(&self.touched));
        if touched.is_empty() {
            return;
        }

        let view = if touched.map_view {
            Some(self.read_map_view())
        } else {
            None
        };
        let (added, grown, finished) = {
            let txn = self.doc.transact();
            let read = |set: &BTreeSet<u32>| -> Vec<Stroke> {
                set.iter().filter_map(|&i| self.stroke_at(&txn, i)).collect()
            };
            let grown: BTreeSet<u32> = touched.grown.difference(&touched.added).copied().collect();
            let finished: BTreeSet<u32> = touched.finished.difference(&touched.added).copied().collect();
            (read(&touched.added), read(&grown), read(&finished))
        };

        let (view_changed, added) = {
            let mut observed = self.observed.borrow_mut();
            let view_changed = match view {
                Some(view) if observed.map_view != view => {
                    observed.map_view = view;
                    true
                }
                _ => false,
            };
            let added: Vec<Stroke> = added
                .into_iter()
                .filter(|stroke| observed.stroke_ids.insert(stroke.id.clone()))
                .collect();
            (view_changed, added)
        };

        self.point_subs.borrow_mut().retain(|_, subs| !subs.is_empty());
        self.finish_subs.borrow_mut().retain(|_, subs| !subs.is_empty());

        if view_changed {
            self.map_view_subs.emit(&view.flatten());
        }
        if !added.is_empty() {
            self.stroke_subs.emit(&added[..]);
        }
        for stroke in &grown {
            let subs = self.point_subs.borrow().get(&stroke.id).cloned();
            if let Some(subs) = subs {
                subs.emit(&stroke.points[..]);
            }
        }
        for stroke in finished.iter().filter(|s| s.done) {
            let subs = self.finish_subs.borrow().get(&stroke.id).cloned();
            if let Some(subs) = subs {
                subs.emit(stroke);
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// yrs value conversion
// ───────────────────────────────────────────────────────────────────

fn pair_to_any(a: f64, b: f64) -> Any {
    Any::Array(vec![Any::Number(a), Any::Number(b)].into())
}

fn point_to_any(p: Point) -> Any {
    pair_to_any(p.x, p.y)
}

fn lat_lng_to_any(ll: LatLng) -> Any {
    pair_to_any(ll.lat, ll.lng)
}

fn bounds_to_any(bounds: &LatLngBounds) -> Any {
    Any::Array(vec![lat_lng_to_any(bounds.south_west), lat_lng_to_any(bounds.north_east)].into())
}

fn map_view_to_any(view: &MapView) -> Any {
    let mut fields = HashMap::new();
    fields.insert("zoom".to_string(), Any::Number(f64::from(view.zoom)));
    fields.insert("center".to_string(), lat_lng_to_any(view.center));
    Any::Map(Arc::new(fields))
}

fn any_number(any: &Any) -> Option<f64> {
    match any {
        Any::Number(n) if n.is_finite() => Some(*n),
        Any::BigInt(n) => Some(*n as f64),
        _ => None,
    }
}

fn any_pair(any: &Any) -> Option<[f64; 2]> {
    match any {
        Any::Array(items) if items.len() == 2 => Some([any_number(&items[0])?, any_number(&items[1])?]),
        _ => None,
    }
}

fn map_view_from_any(any: &Any) -> Option<MapView> {
    let Any::Map(fields) = any else {
        return None;
    };
    let zoom = any_number(fields.get("zoom")?)?;
    let center = LatLng::from(any_pair(fields.get("center")?)?);
    let view = MapView::new(zoom.round() as i32, center);
    view.is_valid().then_some(view)
}

fn bounds_from_any(any: &Any) -> Option<LatLngBounds> {
    match any {
        Any::Array(items) if items.len() == 2 => Some(LatLngBounds::new(
            any_pair(&items[0])?.into(),
            any_pair(&items[1])?.into(),
        )),
        _ => None,
    }
}

fn points_from_array<T: ReadTxn>(txn: &T, points: &ArrayRef) -> Vec<Point> {
    points
        .iter(txn)
        .filter_map(|entry| match entry {
            Out::Any(any) => any_pair(&any).map(point_from_pair),
            _ => None,
        })
        .collect()
}

fn stroke_from_map<T: ReadTxn>(txn: &T, record: &MapRef) -> Option<Stroke> {
    let id = match record.get(txn, "id")? {
        Out::Any(Any::String(id)) => id.to_string(),
        _ => return None,
    };
    let author_id = match record.get(txn, "authorId")? {
        Out::Any(any) => any_number(&any).filter(|n| *n >= 0.0)? as u64,
        _ => return None,
    };
    let seed = match record.get(txn, "seed")? {
        Out::Any(any) => any_number(&any)?,
        _ => return None,
    };
    let color = match record.get(txn, COLOR) {
        Some(Out::Any(Any::String(name))) => name.parse().unwrap_or_default(),
        _ => UserColor::default(),
    };
    let bounds = match record.get(txn, "bounds") {
        Some(Out::Any(any)) => bounds_from_any(&any),
        _ => None,
    };
    let done = matches!(record.get(txn, DONE), Some(Out::Any(Any::Bool(true))));
    let points = match record.get(txn, "points")? {
        Out::YArray(points) => points_from_array(txn, &points),
        _ => return None,
    };
    Some(Stroke {
        id,
        author_id,
        seed,
        points,
        color,
        bounds,
        done,
    })
}
