//! Recording fakes for the host-side traits.

#![allow(dead_code)]

use mapboard_collab::cursor_sync::{CursorLayer, CursorView};
use mapboard_collab::stroke_sync::{StrokeCanvas, StrokeFrame};
use mapboard_collab::view_sync::MapViewport;
use mapboard_collab::ClientId;
use mapboard_core::{LatLng, LatLngBounds, MapView};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

pub struct TestViewport {
    view: RefCell<MapView>,
    pub set_view_calls: RefCell<usize>,
}

impl TestViewport {
    pub fn new(view: MapView) -> Rc<Self> {
        Rc::new(Self {
            view: RefCell::new(view),
            set_view_calls: RefCell::new(0),
        })
    }

    /// The local user moved the map.
    pub fn pan_to(&self, view: MapView) {
        *self.view.borrow_mut() = view;
    }
}

impl MapViewport for TestViewport {
    fn view(&self) -> MapView {
        *self.view.borrow()
    }

    fn set_view(&self, center: LatLng, zoom: Option<i32>, _animate: bool) {
        let mut view = self.view.borrow_mut();
        view.center = center;
        if let Some(zoom) = zoom {
            view.zoom = zoom;
        }
        *self.set_view_calls.borrow_mut() += 1;
    }

    fn bounds(&self) -> LatLngBounds {
        let c = self.view.borrow().center;
        LatLngBounds::new(
            LatLng::new(c.lat - 0.5, c.lng - 0.5),
            LatLng::new(c.lat + 0.5, c.lng + 0.5),
        )
    }
}

#[derive(Default)]
pub struct TestCanvas {
    pub frames: RefCell<HashMap<String, StrokeFrame>>,
}

impl StrokeCanvas for TestCanvas {
    fn draw(&self, frame: &StrokeFrame) {
        self.frames
            .borrow_mut()
            .insert(frame.stroke_id.clone(), frame.clone());
    }

    fn erase(&self, stroke_id: &str) {
        self.frames.borrow_mut().remove(stroke_id);
    }
}

/// Counts add/remove calls per client.
#[derive(Default)]
pub struct TestCursors {
    pub visible: RefCell<BTreeMap<ClientId, CursorView>>,
    pub adds: RefCell<HashMap<ClientId, usize>>,
    pub removes: RefCell<HashMap<ClientId, usize>>,
}

impl TestCursors {
    pub fn adds(&self, id: ClientId) -> usize {
        self.adds.borrow().get(&id).copied().unwrap_or(0)
    }

    pub fn removes(&self, id: ClientId) -> usize {
        self.removes.borrow().get(&id).copied().unwrap_or(0)
    }
}

impl CursorLayer for TestCursors {
    fn add(&self, cursor: &CursorView) {
        *self.adds.borrow_mut().entry(cursor.client_id).or_default() += 1;
        self.visible.borrow_mut().insert(cursor.client_id, cursor.clone());
    }

    fn update(&self, cursor: &CursorView) {
        self.visible.borrow_mut().insert(cursor.client_id, cursor.clone());
    }

    fn remove(&self, client_id: ClientId) {
        *self.removes.borrow_mut().entry(client_id).or_default() += 1;
        self.visible.borrow_mut().remove(&client_id);
    }
}
