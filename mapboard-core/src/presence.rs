//! Presence schema: the per-peer ephemeral state broadcast over awareness.
//!
//! Every payload received from a peer is untrusted JSON. [`PresenceEntry::parse`]
//! is the only way to obtain a typed entry; anything that fails the shape or
//! value checks is a [`SchemaError`] and must be dropped by the caller.

use crate::geo::{point_from_pair, point_to_pair, LatLng, Point};
use crate::palette::UserColor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Longest username accepted from any peer.
pub const MAX_USERNAME_LEN: usize = 50;

/// Active tool of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tool {
    #[default]
    Move,
    Draw,
}

impl Tool {
    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Move => "MOVE",
            Tool::Draw => "DRAW",
        }
    }

    /// MOVE ↔ DRAW, bound to the space bar by hosts.
    pub fn toggled(self) -> Self {
        match self {
            Tool::Move => Tool::Draw,
            Tool::Draw => Tool::Move,
        }
    }

    fn parse(raw: &str) -> Result<Self, SchemaError> {
        match raw {
            "MOVE" => Ok(Tool::Move),
            "DRAW" => Ok(Tool::Draw),
            other => Err(SchemaError::UnknownTool(other.to_string())),
        }
    }
}

/// Why a presence payload was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("presence payload is not an object")]
    NotAnObject,
    #[error("malformed presence payload: {0}")]
    Shape(String),
    #[error("username is {len} chars, limit is {MAX_USERNAME_LEN}")]
    UsernameTooLong { len: usize },
    #[error("userColor {0:?} is not a palette colour")]
    UnknownColor(String),
    #[error("tool {0:?} is not MOVE or DRAW")]
    UnknownTool(String),
    #[error("field {0} holds a non-finite coordinate")]
    NonFinite(&'static str),
}

/// Wire shape before value checks.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPresence {
    username: String,
    user_color: String,
    tool: String,
    mouse_pressed: bool,
    mouse_container_point: [f64; 2],
    #[serde(default)]
    mouse_lat_lng: Option<[f64; 2]>,
}

/// Validated presence of one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub username: String,
    pub user_color: UserColor,
    pub tool: Tool,
    pub mouse_pressed: bool,
    /// Pointer in map-container pixels.
    pub mouse_container_point: Point,
    /// Pointer in geographic coordinates, when the host reports it.
    pub mouse_lat_lng: Option<LatLng>,
}

impl PresenceEntry {
    /// Fresh entry for a user who has not touched the map yet.
    pub fn initial(username: impl Into<String>, user_color: UserColor) -> Self {
        Self {
            username: username.into(),
            user_color,
            tool: Tool::Move,
            mouse_pressed: false,
            mouse_container_point: Point::ZERO,
            mouse_lat_lng: None,
        }
    }

    /// Validate an untrusted payload.
    ///
    /// Unknown extra keys are ignored; missing or mistyped required keys,
    /// over-long usernames and colours outside the palette are rejected.
    pub fn parse(raw: &Value) -> Result<Self, SchemaError> {
        if !raw.is_object() {
            return Err(SchemaError::NotAnObject);
        }
        let wire = RawPresence::deserialize(raw).map_err(|e| SchemaError::Shape(e.to_string()))?;

        let len = wire.username.chars().count();
        if len > MAX_USERNAME_LEN {
            return Err(SchemaError::UsernameTooLong { len });
        }
        if wire.user_color.len() > UserColor::MAX_NAME_LEN {
            return Err(SchemaError::UnknownColor(wire.user_color));
        }
        let user_color = wire
            .user_color
            .parse::<UserColor>()
            .map_err(|e| SchemaError::UnknownColor(e.0))?;
        let tool = Tool::parse(&wire.tool)?;

        let [x, y] = wire.mouse_container_point;
        if !(x.is_finite() && y.is_finite()) {
            return Err(SchemaError::NonFinite("mouseContainerPoint"));
        }
        let mouse_lat_lng = match wire.mouse_lat_lng.map(LatLng::from) {
            Some(ll) if !ll.is_finite() => return Err(SchemaError::NonFinite("mouseLatLng")),
            other => other,
        };

        Ok(Self {
            username: wire.username,
            user_color,
            tool,
            mouse_pressed: wire.mouse_pressed,
            mouse_container_point: point_from_pair(wire.mouse_container_point),
            mouse_lat_lng,
        })
    }

    /// Wire form, the inverse of [`PresenceEntry::parse`].
    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "username": self.username,
            "userColor": self.user_color.name(),
            "tool": self.tool.as_str(),
            "mousePressed": self.mouse_pressed,
            "mouseContainerPoint": point_to_pair(self.mouse_container_point),
        });
        if let (Some(ll), Some(obj)) = (self.mouse_lat_lng, value.as_object_mut()) {
            obj.insert("mouseLatLng".into(), json!([ll.lat, ll.lng]));
        }
        value
    }
}

/// One field of the local presence, for single-field writes.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceField {
    Username(String),
    UserColor(UserColor),
    Tool(Tool),
    MousePressed(bool),
    MouseContainerPoint(Point),
    MouseLatLng(LatLng),
}

impl PresenceField {
    pub fn key(&self) -> &'static str {
        match self {
            PresenceField::Username(_) => "username",
            PresenceField::UserColor(_) => "userColor",
            PresenceField::Tool(_) => "tool",
            PresenceField::MousePressed(_) => "mousePressed",
            PresenceField::MouseContainerPoint(_) => "mouseContainerPoint",
            PresenceField::MouseLatLng(_) => "mouseLatLng",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PresenceField::Username(name) => json!(name),
            PresenceField::UserColor(color) => json!(color.name()),
            PresenceField::Tool(tool) => json!(tool.as_str()),
            PresenceField::MousePressed(pressed) => json!(pressed),
            PresenceField::MouseContainerPoint(p) => json!([p.x, p.y]),
            PresenceField::MouseLatLng(ll) => json!([ll.lat, ll.lng]),
        }
    }
}
