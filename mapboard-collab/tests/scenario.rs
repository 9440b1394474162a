//! Two sessions sharing room `abc123` over the in-process hub.

mod common;

use common::{TestCanvas, TestCursors, TestViewport};
use mapboard_collab::awareness::Awareness;
use mapboard_collab::prefs::{MemoryPrefs, PrefsStore, USERNAME_KEY, USER_COLOR_KEY};
use mapboard_collab::{
    ClientId, ConnectionState, Frame, MapViewport, PeerChannel, RoomHub, RoomSession,
    SessionConfig, SessionError, Subscription, WindowEvent,
};
use mapboard_core::{LatLng, MapView, Point, PresenceEntry, PresenceField, Tool, UserColor};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn prefs(name: &str, color: &str) -> Rc<MemoryPrefs> {
    let prefs = Rc::new(MemoryPrefs::new());
    prefs.set(USERNAME_KEY, name).unwrap();
    prefs.set(USER_COLOR_KEY, color).unwrap();
    prefs
}

fn home() -> MapView {
    MapView::new(3, LatLng::new(0.0, 0.0))
}

fn join(hub: &Arc<RoomHub>, name: &str, color: &str) -> RoomSession {
    RoomSession::join(hub, "abc123", prefs(name, color), SessionConfig::default()).unwrap()
}

#[tokio::test]
async fn test_abc123_scenario() {
    let hub = RoomHub::new(256);

    // Peer A creates the room.
    let a = join(&hub, "abc", "Red");
    a.wait_ready().await.unwrap();
    a.presence()
        .set_fields([
            PresenceField::Username("abc".into()),
            PresenceField::UserColor(UserColor::Red),
            PresenceField::Tool(Tool::Move),
            PresenceField::MousePressed(false),
            PresenceField::MouseContainerPoint(Point::new(0.0, 0.0)),
        ])
        .unwrap();

    // Peer B joins and sees A's presence.
    let b = join(&hub, "bob", "Blue");
    assert_eq!(b.state(), ConnectionState::Connecting);
    a.poll();
    b.wait_ready().await.unwrap();
    a.poll();

    let seen = b.presence().snapshot();
    assert_eq!(seen[&a.client_id()].user_color, UserColor::Red);
    assert_eq!(seen[&a.client_id()].username, "abc");

    let a_viewport = TestViewport::new(home());
    let b_viewport = TestViewport::new(home());
    let a_view = a.attach_view_sync(a_viewport.clone());
    let _b_view = b.attach_view_sync(b_viewport.clone());
    let a_strokes = a.attach_stroke_sync(a_viewport.clone(), Rc::new(TestCanvas::default()));
    let b_canvas = Rc::new(TestCanvas::default());
    let _b_strokes = b.attach_stroke_sync(b_viewport.clone(), b_canvas.clone());

    // A draws.
    assert_eq!(a.toggle_tool().unwrap(), Tool::Draw);
    a_strokes.pointer_down(Point::new(0.0, 0.0));
    a_strokes.pointer_move(Point::new(1.0, 1.0));
    a_strokes.pointer_move(Point::new(2.0, 2.0));
    a_strokes.pointer_up();
    b.poll();

    let strokes = b.doc().read_strokes();
    assert_eq!(strokes.len(), 1);
    assert_eq!(
        strokes[0].points,
        vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(2.0, 2.0)]
    );
    assert_eq!(strokes[0].author_id, a.client_id());
    assert!(b_canvas.frames.borrow().contains_key(&strokes[0].id));

    // A pans.
    let now = Instant::now();
    a_view.drag_start(now);
    a_viewport.pan_to(MapView::new(10, LatLng::new(40.0, -70.0)));
    a_view.viewport_moved(now);
    a_view.drag_end(now + Duration::from_millis(5));
    b.poll();

    assert_eq!(b_viewport.view(), MapView::new(10, LatLng::new(40.0, -70.0)));
    assert_eq!(b.doc().snapshot(), a.doc().snapshot());
}

#[tokio::test]
async fn test_wait_ready_times_out_without_answer() {
    let hub = RoomHub::new(16);
    let _silent = join(&hub, "quiet", "Black");
    let config = SessionConfig {
        ready_timeout: Duration::from_millis(30),
        ..SessionConfig::default()
    };
    let late = RoomSession::join(&hub, "abc123", Rc::new(MemoryPrefs::new()), config).unwrap();
    assert!(matches!(late.wait_ready().await, Err(SessionError::Timeout(_))));
    assert_eq!(late.state(), ConnectionState::Connecting);
}

#[tokio::test]
async fn test_joiner_receives_existing_content() {
    let hub = RoomHub::new(256);
    let a = join(&hub, "abc", "Red");
    a.doc().write_map_view(&MapView::new(12, LatLng::new(51.5, -0.1)));

    let b = join(&hub, "bob", "Blue");
    a.poll();
    b.wait_ready().await.unwrap();

    let viewport = TestViewport::new(home());
    let _view = b.attach_view_sync(viewport.clone());
    assert_eq!(viewport.view(), MapView::new(12, LatLng::new(51.5, -0.1)));
}

#[test]
fn test_remote_cursors_follow_and_leave() {
    let hub = RoomHub::new(256);
    let a = join(&hub, "abc", "Red");
    let b = join(&hub, "bob", "Blue");
    a.poll();
    b.poll();

    let cursors = Rc::new(TestCursors::default());
    let _cursor_view = b.attach_cursor_sync(cursors.clone());
    let a_cursor = a.attach_cursor_sync(Rc::new(TestCursors::default()));
    assert_eq!(cursors.adds(a.client_id()), 1);

    let now = Instant::now();
    a_cursor.pointer_down(Point::new(30.0, 40.0), None, now);
    b.poll();
    let shown = cursors.visible.borrow()[&a.client_id()].clone();
    assert_eq!(shown.position, Point::new(30.0, 40.0));
    assert_eq!(shown.label, "abc");

    a.window().dispatch(WindowEvent::Blur);
    b.poll();
    assert!(!b.presence().get(a.client_id()).unwrap().mouse_pressed);

    let a_id = a.client_id();
    drop(a_cursor);
    drop(a);
    b.poll();
    assert_eq!(cursors.removes(a_id), 1);
    assert!(!b.presence().contains(a_id));
}

#[test]
fn test_three_peers_converge() {
    let hub = RoomHub::new(256);
    let peers: Vec<RoomSession> = ["a", "b", "c"]
        .iter()
        .map(|name| join(&hub, name, "Green"))
        .collect();
    for _ in 0..3 {
        for peer in &peers {
            peer.poll();
        }
    }
    assert!(peers.iter().all(|p| p.state() == ConnectionState::Ready));

    for (i, peer) in peers.iter().enumerate() {
        peer.doc()
            .write_map_view(&MapView::new(i as i32 + 1, LatLng::new(i as f64, 0.0)));
    }
    for _ in 0..3 {
        for peer in &peers {
            peer.poll();
        }
    }

    let reference = peers[0].doc().snapshot();
    assert!(reference.map_view.is_some());
    for peer in &peers[1..] {
        assert_eq!(peer.doc().snapshot(), reference);
        assert_eq!(peer.presence().len(), 3);
    }
}

fn record_removals(session: &RoomSession) -> (Rc<RefCell<Vec<ClientId>>>, Subscription) {
    let removed = Rc::new(RefCell::new(Vec::new()));
    let r = removed.clone();
    let sub = session
        .presence()
        .subscribe(move |diff| r.borrow_mut().extend(diff.removed.iter().copied()));
    (removed, sub)
}

#[test]
fn test_dropped_session_is_removed_on_peers() {
    let hub = RoomHub::new(256);
    let a = join(&hub, "abc", "Red");
    let b = join(&hub, "bob", "Blue");
    a.poll();
    b.poll();
    assert!(a.presence().contains(b.client_id()));

    let (removed, _sub) = record_removals(&a);
    let b_id = b.client_id();
    drop(b);
    a.poll();

    assert_eq!(*removed.borrow(), vec![b_id]);
    assert!(!a.presence().contains(b_id));
}

#[test]
fn test_vanished_link_is_removed_on_peers() {
    let hub = RoomHub::new(256);
    let a = join(&hub, "abc", "Red");

    // A member that announces itself and then disappears without a goodbye.
    let mut ghost = hub.connect(&SessionConfig::default().channel_room("abc123"));
    let ghost_id = ghost.client_id();
    let awareness = Awareness::new(ghost_id);
    awareness.set_local_state(Some(PresenceEntry::initial("ghost", UserColor::Teal).to_json()));
    ghost
        .send(Frame::awareness(ghost_id, &awareness.encode_local()).unwrap())
        .unwrap();
    a.poll();
    assert!(a.presence().contains(ghost_id));

    let (removed, _sub) = record_removals(&a);
    drop(ghost);
    a.poll();

    assert_eq!(*removed.borrow(), vec![ghost_id]);
    assert!(!a.presence().contains(ghost_id));
}
