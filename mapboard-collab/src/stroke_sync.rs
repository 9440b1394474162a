//! Freehand drawing on top of the map.
//!
//! Local pointer input becomes append-only stroke records in the shared
//! document. Every stroke in the document, local or remote, is rendered as
//! a smoothed SVG outline anchored to the viewport bounds it was drawn in.
//! Until its author lifts the pointer a stroke follows the author's live
//! presence colour; once done it keeps the colour stored in its record.

use crate::awareness::ClientId;
use crate::config::SessionConfig;
use crate::document::{DocumentStore, StrokeHandle};
use crate::input::WindowEvents;
use crate::presence::{PresenceDiff, PresenceStore};
use crate::subscription::Subscription;
use crate::view_sync::MapViewport;
use mapboard_core::geo::{LatLngBounds, Point};
use mapboard_core::outline::{stroke_svg_path, BrushOptions};
use mapboard_core::presence::{PresenceEntry, Tool};
use mapboard_core::stroke::{NewStroke, Stroke};
use mapboard_core::UserColor;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::{Rc, Weak};

/// One rendered stroke, ready for the host's overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeFrame {
    pub stroke_id: String,
    pub author_id: ClientId,
    /// SVG path data of the filled outline, in container pixels.
    pub path: String,
    pub color: UserColor,
    /// Map area the container pixels are relative to.
    pub bounds: Option<LatLngBounds>,
}

/// Overlay layer the host draws strokes into.
pub trait StrokeCanvas {
    /// Draw or replace the stroke with `frame.stroke_id`.
    fn draw(&self, frame: &StrokeFrame);

    fn erase(&self, stroke_id: &str);
}

struct Rendered {
    author_id: ClientId,
    stored_color: UserColor,
    bounds: Option<LatLngBounds>,
    points: Vec<Point>,
    drawn_color: UserColor,
    finished: bool,
    _points_sub: Subscription,
    _finish_sub: Subscription,
}

struct StrokeSyncInner {
    doc: Rc<DocumentStore>,
    presence: PresenceStore<PresenceEntry>,
    viewport: Rc<dyn MapViewport>,
    canvas: Rc<dyn StrokeCanvas>,
    brush: BrushOptions,
    current: RefCell<Option<StrokeHandle>>,
    rendered: RefCell<BTreeMap<String, Rendered>>,
}

/// Draws and records strokes until dropped; dropping erases them.
pub struct StrokeSync {
    inner: Rc<StrokeSyncInner>,
    _subscriptions: Vec<Subscription>,
}

impl StrokeSync {
    pub fn attach(
        doc: Rc<DocumentStore>,
        presence: PresenceStore<PresenceEntry>,
        viewport: Rc<dyn MapViewport>,
        canvas: Rc<dyn StrokeCanvas>,
        window: &WindowEvents,
        config: &SessionConfig,
    ) -> Self {
        let inner = Rc::new(StrokeSyncInner {
            doc: doc.clone(),
            presence: presence.clone(),
            viewport,
            canvas,
            brush: config.brush(),
            current: RefCell::new(None),
            rendered: RefCell::new(BTreeMap::new()),
        });

        let weak = Rc::downgrade(&inner);
        let on_strokes = doc.observe_strokes(move |strokes| {
            if let Some(inner) = weak.upgrade() {
                StrokeSyncInner::track_all(&inner, strokes);
            }
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
                inner.pointer_up();
            }
        });

        StrokeSyncInner::track_all(&inner, &doc.read_strokes());

        Self {
            inner,
            _subscriptions: vec![on_strokes, on_presence, on_release],
        }
    }

    /// Only armed while the local tool is DRAW.
    pub fn is_armed(&self) -> bool {
        self.inner.is_armed()
    }

    pub fn is_drawing(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    pub fn pointer_down(&self, point: Point) {
        self.inner.pointer_down(point);
    }

    pub fn pointer_move(&self, point: Point) {
        self.inner.pointer_move(point);
    }

    pub fn pointer_up(&self) {
        self.inner.pointer_up();
    }

    /// Ids of the strokes currently on the canvas.
    pub fn rendered_ids(&self) -> Vec<String> {
        self.inner.rendered.borrow().keys().cloned().collect()
    }
}

impl Drop for StrokeSync {
    fn drop(&mut self) {
        self.inner.pointer_up();
        let rendered = std::mem::take(&mut *self.inner.rendered.borrow_mut());
        for id in rendered.keys() {
            self.inner.canvas.erase(id);
        }
    }
}

impl StrokeSyncInner {
    fn is_armed(&self) -> bool {
        self.presence
            .local()
            .is_some_and(|entry| entry.tool == Tool::Draw)
    }

    fn pointer_down(&self, point: Point) {
        let Some(local) = self.presence.local() else {
            log::debug!("pointer down without local presence");
            return;
        };
        if local.tool != Tool::Draw {
            log::trace!("pointer down ignored, tool is {}", local.tool.as_str());
            return;
        }

        let stroke = NewStroke::new(
            &mut rand::thread_rng(),
            self.presence.client_id(),
            point,
            local.user_color,
            Some(self.viewport.bounds()),
        );
        let handle = self.doc.append_stroke(stroke);
        *self.current.borrow_mut() = Some(handle);
    }

    fn pointer_move(&self, point: Point) {
        let handle = self.current.borrow().clone();
        match handle {
            Some(handle) => self.doc.append_point(&handle, point),
            None => log::trace!("pointer move with no stroke in progress"),
        }
    }

    /// Finish the stroke in progress, fixing its colour in the record.
    fn pointer_up(&self) {
        let handle = self.current.borrow_mut().take();
        if let Some(handle) = handle {
            let color = self.presence.local().map(|entry| entry.user_color);
            self.doc.finish_stroke(&handle, color);
        }
    }

    fn track_all(this: &Rc<Self>, strokes: &[Stroke]) {
        for stroke in strokes {
            Self::track(this, stroke);
        }
    }

    fn track(this: &Rc<Self>, stroke: &Stroke) {
        if this.rendered.borrow().contains_key(&stroke.id) {
            return;
        }

        let weak: Weak<Self> = Rc::downgrade(this);
        let id = stroke.id.clone();
        let points_sub = this.doc.observe_stroke_points(&stroke.id, move |points| {
            if let Some(inner) = weak.upgrade() {
                inner.on_points(&id, points);
            }
        });
        let weak: Weak<Self> = Rc::downgrade(this);
        let finish_sub = this.doc.observe_stroke_finished(&stroke.id, move |stroke| {
            if let Some(inner) = weak.upgrade() {
                inner.on_finished(stroke);
            }
        });

        this.rendered.borrow_mut().insert(
            stroke.id.clone(),
            Rendered {
                author_id: stroke.author_id,
                stored_color: stroke.color,
                bounds: stroke.bounds,
                points: stroke.points.clone(),
                drawn_color: stroke.color,
                finished: stroke.done,
                _points_sub: points_sub,
                _finish_sub: finish_sub,
            },
        );
        this.redraw(&stroke.id);
    }

    fn on_points(&self, id: &str, points: &[Point]) {
        {
            let mut rendered = self.rendered.borrow_mut();
            let Some(entry) = rendered.get_mut(id) else {
                return;
            };
            entry.points = points.to_vec();
        }
        self.redraw(id);
    }

    fn on_finished(&self, stroke: &Stroke) {
        {
            let mut rendered = self.rendered.borrow_mut();
            let Some(entry) = rendered.get_mut(&stroke.id) else {
                return;
            };
            entry.finished = true;
            entry.stored_color = stroke.color;
            entry.points = stroke.points.clone();
            if entry.drawn_color == stroke.color {
                return;
            }
        }
        self.redraw(&stroke.id);
    }

    /// Stored colour once finished. Before that the author's live colour
    /// while present, else the stored one.
    fn effective_color(&self, entry: &Rendered) -> UserColor {
        if entry.finished {
            return entry.stored_color;
        }
        self.presence
            .get(entry.author_id)
            .map_or(entry.stored_color, |author| author.user_color)
    }

    fn on_presence(&self, diff: &PresenceDiff) {
        let authors: HashSet<ClientId> = diff.changed().chain(diff.removed.iter().copied()).collect();
        let stale: Vec<String> = self
            .rendered
            .borrow()
            .iter()
            .filter(|(_, r)| {
                !r.finished
                    && authors.contains(&r.author_id)
                    && self.effective_color(r) != r.drawn_color
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            self.redraw(&id);
        }
    }

    fn redraw(&self, id: &str) {
        let frame = {
            let mut rendered = self.rendered.borrow_mut();
            let Some(entry) = rendered.get_mut(id) else {
                return;
            };
            entry.drawn_color = self.effective_color(entry);
            StrokeFrame {
                stroke_id: id.to_string(),
                author_id: entry.author_id,
                path: stroke_svg_path(&entry.points, &self.brush),
                color: entry.drawn_color,
                bounds: entry.bounds,
            }
        };
        self.canvas.draw(&frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awareness::Awareness;
    use crate::input::WindowEvent;
    use crate::view_sync::tests::FakeViewport;
    use mapboard_core::geo::{LatLng, MapView};
    use mapboard_core::presence::PresenceField;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeCanvas {
        drawn: RefCell<HashMap<String, StrokeFrame>>,
        draw_calls: RefCell<usize>,
        erased: RefCell<Vec<String>>,
    }

    impl StrokeCanvas for FakeCanvas {
        fn draw(&self, frame: &StrokeFrame) {
            *self.draw_calls.borrow_mut() += 1;
            self.drawn
                .borrow_mut()
                .insert(frame.stroke_id.clone(), frame.clone());
        }

        fn erase(&self, stroke_id: &str) {
            self.drawn.borrow_mut().remove(stroke_id);
            self.erased.borrow_mut().push(stroke_id.to_string());
        }
    }

    struct Rig {
        doc: Rc<DocumentStore>,
        presence: PresenceStore<PresenceEntry>,
        canvas: Rc<FakeCanvas>,
        window: WindowEvents,
        sync: StrokeSync,
    }

    fn rig(client_id: ClientId, doc: Rc<DocumentStore>) -> Rig {
        let awareness = Rc::new(Awareness::new(client_id));
        let presence = PresenceStore::with_schema(
            awareness,
            &PresenceEntry::initial("ann", UserColor::Red),
            || PresenceEntry::initial("fallback", UserColor::Black),
        )
        .unwrap();
        let canvas = Rc::new(FakeCanvas::default());
        let window = WindowEvents::new();
        let viewport = FakeViewport::new(MapView::new(5, LatLng::new(0.0, 0.0)));
        let sync = StrokeSync::attach(
            doc.clone(),
            presence.clone(),
            viewport,
            canvas.clone(),
            &window,
            &SessionConfig::default(),
        );
        Rig {
            doc,
            presence,
            canvas,
            window,
            sync,
        }
    }

    fn drawing_rig() -> Rig {
        let rig = rig(1, Rc::new(DocumentStore::new()));
        rig.presence.set_field(PresenceField::Tool(Tool::Draw)).unwrap();
        rig
    }

    #[test]
    fn test_not_armed_in_move_mode() {
        let rig = rig(1, Rc::new(DocumentStore::new()));
        assert!(!rig.sync.is_armed());
        rig.sync.pointer_down(Point::new(1.0, 1.0));
        assert_eq!(rig.doc.stroke_count(), 0);
        assert!(!rig.sync.is_drawing());
    }

    #[test]
    fn test_draw_appends_record() {
        let rig = drawing_rig();
        rig.sync.pointer_down(Point::new(0.0, 0.0));
        rig.sync.pointer_move(Point::new(5.0, 0.0));
        rig.sync.pointer_move(Point::new(10.0, 0.0));
        rig.sync.pointer_up();

        let strokes = rig.doc.read_strokes();
        assert_eq!(strokes.len(), 1);
        let stroke = &strokes[0];
        assert_eq!(stroke.author_id, 1);
        assert_eq!(stroke.color, UserColor::Red);
        assert_eq!(stroke.points.len(), 3);
        assert!((0.0..1000.0).contains(&stroke.seed));
        assert!(stroke.bounds.is_some());

        let drawn = rig.canvas.drawn.borrow();
        let frame = drawn.get(&stroke.id).unwrap();
        assert!(frame.path.starts_with('M'));
        assert_eq!(frame.color, UserColor::Red);
    }

    #[test]
    fn test_move_without_stroke_is_ignored() {
        let rig = drawing_rig();
        rig.sync.pointer_move(Point::new(1.0, 1.0));
        assert_eq!(rig.doc.stroke_count(), 0);
    }

    #[test]
    fn test_window_release_ends_stroke() {
        let rig = drawing_rig();
        rig.sync.pointer_down(Point::new(0.0, 0.0));
        rig.window.dispatch(WindowEvent::Blur);
        assert!(!rig.sync.is_drawing());

        rig.sync.pointer_move(Point::new(3.0, 3.0));
        assert_eq!(rig.doc.read_strokes()[0].points.len(), 1);
    }

    #[test]
    fn test_existing_strokes_rendered_on_attach() {
        let doc = Rc::new(DocumentStore::new());
        doc.append_stroke(NewStroke {
            author_id: 9,
            seed: 1.0,
            first_point: Point::new(2.0, 2.0),
            color: UserColor::Green,
            bounds: None,
        });

        let rig = rig(1, doc);
        assert_eq!(rig.sync.rendered_ids().len(), 1);
        let drawn = rig.canvas.drawn.borrow();
        let frame = drawn.values().next().unwrap();
        assert_eq!(frame.author_id, 9);
        assert_eq!(frame.color, UserColor::Green);
    }

    #[test]
    fn test_remote_points_redraw() {
        let rig = drawing_rig();
        let peer = DocumentStore::new();
        let handle = peer.append_stroke(NewStroke {
            author_id: 2,
            seed: 3.0,
            first_point: Point::new(0.0, 0.0),
            color: UserColor::Blue,
            bounds: None,
        });
        rig.doc.apply_remote_update(&peer.encode_state()).unwrap();
        let before = *rig.canvas.draw_calls.borrow();

        let sv = rig.doc.state_vector();
        peer.append_point(&handle, Point::new(4.0, 4.0));
        rig.doc
            .apply_remote_update(&peer.diff_since(&sv).unwrap())
            .unwrap();

        assert_eq!(*rig.canvas.draw_calls.borrow(), before + 1);
        assert_eq!(rig.doc.read_stroke(handle.id()).unwrap().points.len(), 2);
    }

    #[test]
    fn test_finished_stroke_keeps_color() {
        let rig = drawing_rig();
        rig.sync.pointer_down(Point::new(0.0, 0.0));
        rig.sync.pointer_up();
        let id = rig.sync.rendered_ids()[0].clone();

        rig.presence
            .set_field(PresenceField::UserColor(UserColor::Violet))
            .unwrap();
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Red);
        let stroke = rig.doc.read_stroke(&id).unwrap();
        assert!(stroke.done);
        assert_eq!(stroke.color, UserColor::Red);
    }

    #[test]
    fn test_color_follows_author_until_finished() {
        let rig = drawing_rig();
        rig.sync.pointer_down(Point::new(0.0, 0.0));
        let id = rig.sync.rendered_ids()[0].clone();

        rig.presence
            .set_field(PresenceField::UserColor(UserColor::Violet))
            .unwrap();
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Violet);

        rig.sync.pointer_up();
        let stroke = rig.doc.read_stroke(&id).unwrap();
        assert!(stroke.done);
        assert_eq!(stroke.color, UserColor::Violet);

        rig.presence
            .set_field(PresenceField::UserColor(UserColor::Teal))
            .unwrap();
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Violet);
    }

    #[test]
    fn test_remote_finish_freezes_color() {
        let rig = drawing_rig();
        let remote = Awareness::new(2);
        remote.set_local_state(Some(PresenceEntry::initial("bob", UserColor::Orange).to_json()));
        rig.presence.awareness().apply_remote(&remote.encode_local());

        let peer = DocumentStore::new();
        let handle = peer.append_stroke(NewStroke {
            author_id: 2,
            seed: 3.0,
            first_point: Point::new(0.0, 0.0),
            color: UserColor::Blue,
            bounds: None,
        });
        rig.doc.apply_remote_update(&peer.encode_state()).unwrap();
        let id = handle.id().to_string();
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Orange);

        let sv = rig.doc.state_vector();
        peer.finish_stroke(&handle, Some(UserColor::Orange));
        rig.doc
            .apply_remote_update(&peer.diff_since(&sv).unwrap())
            .unwrap();

        let bob = PresenceEntry::initial("bob", UserColor::Pink);
        remote.set_local_state(Some(bob.to_json()));
        rig.presence.awareness().apply_remote(&remote.encode_local());
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Orange);

        remote.set_local_state(None);
        rig.presence.awareness().apply_remote(&remote.encode_local());
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Orange);
    }

    #[test]
    fn test_detach_finishes_stroke_in_progress() {
        let rig = drawing_rig();
        rig.sync.pointer_down(Point::new(0.0, 0.0));
        let Rig { doc, sync, .. } = rig;
        drop(sync);
        assert!(doc.read_strokes()[0].done);
    }

    #[test]
    fn test_absent_author_uses_stored_color() {
        let rig = drawing_rig();
        let remote = Awareness::new(2);
        remote.set_local_state(Some(PresenceEntry::initial("bob", UserColor::Orange).to_json()));
        rig.presence.awareness().apply_remote(&remote.encode_local());

        let peer = DocumentStore::new();
        peer.append_stroke(NewStroke {
            author_id: 2,
            seed: 3.0,
            first_point: Point::new(0.0, 0.0),
            color: UserColor::Blue,
            bounds: None,
        });
        rig.doc.apply_remote_update(&peer.encode_state()).unwrap();
        let id = rig.sync.rendered_ids()[0].clone();
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Orange);

        remote.set_local_state(None);
        rig.presence.awareness().apply_remote(&remote.encode_local());
        assert_eq!(rig.canvas.drawn.borrow()[&id].color, UserColor::Blue);
    }

    #[test]
    fn test_detach_erases_everything() {
        let rig = drawing_rig();
        rig.sync.pointer_down(Point::new(0.0, 0.0));
        rig.sync.pointer_up();
        rig.sync.pointer_down(Point::new(9.0, 9.0));
        rig.sync.pointer_up();

        let Rig {
            doc,
            canvas,
            window,
            sync,
            ..
        } = rig;
        drop(sync);
        assert_eq!(canvas.erased.borrow().len(), 2);
        assert!(canvas.drawn.borrow().is_empty());
        assert_eq!(window.listener_count(), 0);

        // Nothing is drawn after detach.
        let calls = *canvas.draw_calls.borrow();
        doc.append_stroke(NewStroke {
            author_id: 1,
            seed: 0.0,
            first_point: Point::ZERO,
            color: UserColor::Red,
            bounds: None,
        });
        assert_eq!(*canvas.draw_calls.borrow(), calls);
    }
}
