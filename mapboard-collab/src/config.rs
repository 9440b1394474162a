//! Session tuning knobs.

use mapboard_core::outline::BrushOptions;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Samples per second written to `mapView` during a drag.
    pub view_sample_hz: f64,
    /// Cursor position broadcasts per second.
    pub cursor_broadcast_hz: f64,
    /// Stroke diameter in container pixels.
    pub brush_size: f64,
    /// Frames buffered per peer before it lags.
    pub broadcast_capacity: usize,
    /// How often `wait_ready` polls the channel.
    pub poll_interval: Duration,
    /// Upper bound for `wait_ready`.
    pub ready_timeout: Duration,
    /// Prepended to the room id to form the channel room name.
    pub room_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            view_sample_hz: 60.0,
            cursor_broadcast_hz: 30.0,
            brush_size: 8.0,
            broadcast_capacity: 256,
            poll_interval: Duration::from_millis(5),
            ready_timeout: Duration::from_secs(5),
            room_prefix: "mapboard-".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn channel_room(&self, room_id: &str) -> String {
        format!("{}{}", self.room_prefix, room_id)
    }

    pub fn brush(&self) -> BrushOptions {
        BrushOptions::with_size(self.brush_size)
    }
}
