//! # mapboard-core: shared data model for collaborative maps
//!
//! Plain types every peer agrees on, with no replication logic:
//!
//! - [`geo`]: `LatLng`, `LatLngBounds`, `MapView`, container `Point`s
//! - [`palette`]: the fixed user colour palette
//! - [`presence`]: presence payload schema and validation
//! - [`stroke`]: freehand stroke records
//! - [`outline`]: stroke outline geometry and SVG path data
//! - [`names`]: random usernames and room ids

pub mod geo;
pub mod names;
pub mod outline;
pub mod palette;
pub mod presence;
pub mod stroke;

pub use geo::{LatLng, LatLngBounds, MapView, Point};
pub use names::{generate_room_id, random_username};
pub use outline::{stroke_outline, stroke_svg_path, BrushOptions};
pub use palette::UserColor;
pub use presence::{PresenceEntry, PresenceField, SchemaError, Tool};
pub use stroke::{NewStroke, Stroke};
