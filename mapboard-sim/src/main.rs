//! mapboard-sim: two headless peers sharing one map room.
//!
//! Runs the canonical collaboration script end to end over the in-process
//! hub: join, presence exchange, a freehand stroke, a pan, cursor traffic
//! and a clean leave. Set `RUST_LOG=debug` for per-frame detail.
//!
//! Usage: `mapboard-sim [ROOM_ID]` (a random 21-character id by default).

mod host;

use host::Peer;
use log::{info, warn};
use mapboard_collab::{MapViewport, RoomHub, SessionConfig, WindowEvent};
use mapboard_core::{generate_room_id, LatLng, MapView, Point};
use std::time::{Duration, Instant};

fn pump(peers: &[&Peer]) {
    // A few rounds let request/response pairs settle.
    for _ in 0..3 {
        for peer in peers {
            peer.session.poll();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let room_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| generate_room_id(&mut rand::thread_rng()));
    let config = SessionConfig::default();
    let prefs_dir = std::env::temp_dir().join("mapboard-sim");
    let hub = RoomHub::new(config.broadcast_capacity);

    info!("Starting mapboard-sim in room {room_id}");

    let alice = Peer::join(&hub, &room_id, "alice", &prefs_dir, config.clone())?;
    alice.wait_ready().await?;

    let bob = Peer::join(&hub, &room_id, "bob", &prefs_dir, config.clone())?;
    alice.session.poll();
    bob.wait_ready().await?;
    pump(&[&alice, &bob]);

    for peer in [&alice, &bob] {
        let me = peer.session.presence().local();
        info!(
            "{} is {:?} ({} peers visible)",
            peer.name,
            me.map(|e| e.username),
            peer.session.presence().len()
        );
    }

    // Alice sketches a zigzag.
    let t0 = Instant::now();
    alice.session.toggle_tool()?;
    alice.strokes.pointer_down(Point::new(100.0, 100.0));
    alice.cursors.pointer_down(Point::new(100.0, 100.0), None, t0);
    for step in 1..=20 {
        let p = Point::new(100.0 + step as f64 * 10.0, if step % 2 == 0 { 100.0 } else { 130.0 });
        let now = t0 + Duration::from_millis(step * 16);
        alice.strokes.pointer_move(p);
        alice.cursors.pointer_move(p, None, now);
        alice.cursors.tick(now);
    }
    alice.strokes.pointer_up();
    alice.session.window().dispatch(WindowEvent::MouseUp);
    pump(&[&alice, &bob]);

    // Alice pans to the east coast.
    let t1 = Instant::now();
    alice.view.drag_start(t1);
    for step in 1..=10 {
        let lat = 20.0 + step as f64 * 2.0;
        let lng = -(step as f64) * 7.0;
        alice.viewport.pan_to(MapView::new(3 + step as i32 / 2, LatLng::new(lat, lng)));
        let now = t1 + Duration::from_millis(step * 8);
        alice.view.viewport_moved(now);
        alice.view.tick(now);
    }
    alice.viewport.pan_to(MapView::new(10, LatLng::new(40.0, -70.0)));
    alice.view.viewport_moved(t1 + Duration::from_millis(200));
    alice.view.drag_end(t1 + Duration::from_millis(210));
    pump(&[&alice, &bob]);

    let bob_view = bob.viewport.view();
    info!(
        "bob sees zoom {} at ({}, {}) and {} stroke(s); {} cursor(s)",
        bob_view.zoom,
        bob_view.center.lat,
        bob_view.center.lng,
        bob.canvas.stroke_count(),
        bob.cursor_layer.visible().len()
    );
    if bob.session.doc().snapshot() != alice.session.doc().snapshot() {
        warn!("documents diverged");
    }

    drop(alice);
    pump(&[&bob]);
    info!(
        "after alice left, bob sees {} peer(s) and still {} stroke(s)",
        bob.session.presence().len(),
        bob.canvas.stroke_count()
    );

    Ok(())
}
