//! # mapboard-collab: real-time room synchronization for shared maps
//!
//! Everything one client needs to take part in a room:
//!
//! - [`document`]: the replicated `yrs` document (`mapView` + strokes)
//! - [`awareness`] / [`presence`]: ephemeral per-peer state and its
//!   validated view
//! - [`view_sync`], [`stroke_sync`], [`cursor_sync`]: controllers binding
//!   a host map widget to the shared state
//! - [`session`]: room join, handshake, readiness and teardown
//! - [`protocol`] / [`broadcast`]: frames and the in-process room hub
//!
//! All of it is single-threaded: types use `Rc`/`RefCell` and observers run
//! synchronously on the thread that caused the change.

pub mod awareness;
pub mod broadcast;
pub mod config;
pub mod cursor_sync;
pub mod document;
pub mod input;
pub mod prefs;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod stroke_sync;
pub mod subscription;
pub mod throttle;
pub mod view_sync;

pub use awareness::{Awareness, ClientId, UpdateOrigin};
pub use broadcast::{HubLink, PeerChannel, RoomHub};
pub use config::SessionConfig;
pub use cursor_sync::{CursorIcon, CursorLayer, CursorSync, CursorView};
pub use document::{DocSnapshot, DocumentError, DocumentStore};
pub use input::{WindowEvent, WindowEvents};
pub use prefs::{FilePrefs, MemoryPrefs, PrefsError, PrefsStore};
pub use presence::{PresenceDiff, PresenceStore};
pub use protocol::{Frame, MessageType, ProtocolError};
pub use session::{ConnectionState, RoomSession, SessionError};
pub use stroke_sync::{StrokeCanvas, StrokeFrame, StrokeSync};
pub use subscription::{Subscribers, Subscription};
pub use view_sync::{MapViewport, ViewSync, ViewSyncState};
