//! Headless host that stands in for the map widget and overlay layers.
//!
//! A [`Peer`] bundles one [`RoomSession`] with a simulated viewport, stroke
//! canvas and cursor layer, all of which just record and log what a real
//! UI would draw.

use log::{debug, info};
use mapboard_collab::prefs::FilePrefs;
use mapboard_collab::{
    ClientId, CursorLayer, CursorSync, CursorView, MapViewport, RoomHub, RoomSession,
    SessionConfig, SessionError, StrokeCanvas, StrokeFrame, StrokeSync, ViewSync,
};
use mapboard_core::{LatLng, LatLngBounds, MapView};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

/// Container size the simulated map pretends to have, in pixels.
const CONTAINER: (f64, f64) = (1024.0, 768.0);

pub struct SimViewport {
    peer: String,
    view: RefCell<MapView>,
}

impl SimViewport {
    pub fn new(peer: &str, view: MapView) -> Rc<Self> {
        Rc::new(Self {
            peer: peer.to_string(),
            view: RefCell::new(view),
        })
    }

    /// User input moved the map.
    pub fn pan_to(&self, view: MapView) {
        *self.view.borrow_mut() = view;
    }
}

impl MapViewport for SimViewport {
    fn view(&self) -> MapView {
        *self.view.borrow()
    }

    fn set_view(&self, center: LatLng, zoom: Option<i32>, animate: bool) {
        let mut view = self.view.borrow_mut();
        view.center = center;
        if let Some(zoom) = zoom {
            view.zoom = zoom;
        }
        info!(
            "[{}] viewport -> zoom {} center ({:.3}, {:.3}){}",
            self.peer,
            view.zoom,
            center.lat,
            center.lng,
            if animate { " (animated)" } else { "" }
        );
    }

    fn bounds(&self) -> LatLngBounds {
        let view = *self.view.borrow();
        // Web-mercator tiles are 256px; degrees per pixel at this zoom.
        let deg_per_px = 360.0 / (256.0 * 2f64.powi(view.zoom));
        let half_w = CONTAINER.0 / 2.0 * deg_per_px;
        let half_h = CONTAINER.1 / 2.0 * deg_per_px;
        LatLngBounds::new(
            LatLng::new(view.center.lat - half_h, view.center.lng - half_w),
            LatLng::new(view.center.lat + half_h, view.center.lng + half_w),
        )
    }
}

#[derive(Default)]
pub struct SimCanvas {
    peer: String,
    strokes: RefCell<HashMap<String, StrokeFrame>>,
}

impl SimCanvas {
    pub fn new(peer: &str) -> Rc<Self> {
        Rc::new(Self {
            peer: peer.to_string(),
            strokes: RefCell::new(HashMap::new()),
        })
    }

    pub fn stroke_count(&self) -> usize {
        self.strokes.borrow().len()
    }
}

impl StrokeCanvas for SimCanvas {
    fn draw(&self, frame: &StrokeFrame) {
        debug!(
            "[{}] draw stroke {} by {} in {} ({} bytes of path)",
            self.peer,
            frame.stroke_id,
            frame.author_id,
            frame.color,
            frame.path.len()
        );
        self.strokes
            .borrow_mut()
            .insert(frame.stroke_id.clone(), frame.clone());
    }

    fn erase(&self, stroke_id: &str) {
        self.strokes.borrow_mut().remove(stroke_id);
    }
}

#[derive(Default)]
pub struct SimCursors {
    peer: String,
    cursors: RefCell<BTreeMap<ClientId, CursorView>>,
}

impl SimCursors {
    pub fn new(peer: &str) -> Rc<Self> {
        Rc::new(Self {
            peer: peer.to_string(),
            cursors: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn visible(&self) -> Vec<CursorView> {
        self.cursors.borrow().values().cloned().collect()
    }
}

impl CursorLayer for SimCursors {
    fn add(&self, cursor: &CursorView) {
        info!(
            "[{}] cursor for {} ({}) appeared",
            self.peer, cursor.label, cursor.client_id
        );
        self.cursors.borrow_mut().insert(cursor.client_id, cursor.clone());
    }

    fn update(&self, cursor: &CursorView) {
        debug!(
            "[{}] cursor {} {:?} at ({:.0}, {:.0})",
            self.peer, cursor.label, cursor.icon, cursor.position.x, cursor.position.y
        );
        self.cursors.borrow_mut().insert(cursor.client_id, cursor.clone());
    }

    fn remove(&self, client_id: ClientId) {
        info!("[{}] cursor {} left", self.peer, client_id);
        self.cursors.borrow_mut().remove(&client_id);
    }
}

/// One simulated user. Controllers are declared before the session so they
/// detach before it closes.
pub struct Peer {
    pub name: String,
    pub viewport: Rc<SimViewport>,
    pub canvas: Rc<SimCanvas>,
    pub cursor_layer: Rc<SimCursors>,
    pub view: ViewSync,
    pub strokes: StrokeSync,
    pub cursors: CursorSync,
    pub session: RoomSession,
}

impl Peer {
    pub fn join(
        hub: &Arc<RoomHub>,
        room_id: &str,
        name: &str,
        prefs_dir: &Path,
        config: SessionConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let prefs = Rc::new(FilePrefs::open(prefs_dir.join(format!("{name}.json")))?);
        let session = RoomSession::join(hub, room_id, prefs, config)?;

        let viewport = SimViewport::new(name, MapView::new(3, LatLng::new(20.0, 0.0)));
        let canvas = SimCanvas::new(name);
        let cursor_layer = SimCursors::new(name);

        let view = session.attach_view_sync(viewport.clone());
        let strokes = session.attach_stroke_sync(viewport.clone(), canvas.clone());
        let cursors = session.attach_cursor_sync(cursor_layer.clone());

        Ok(Self {
            name: name.to_string(),
            viewport,
            canvas,
            cursor_layer,
            view,
            strokes,
            cursors,
            session,
        })
    }

    pub async fn wait_ready(&self) -> Result<(), SessionError> {
        self.session.wait_ready().await
    }
}
