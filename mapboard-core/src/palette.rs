//! Fixed named-colour palette users pick their cursor and ink colour from.
//!
//! Peers exchange the colour *name*; the hex value is resolved locally so a
//! peer can never inject an arbitrary CSS colour.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserColor {
    #[default]
    Black,
    Red,
    Pink,
    Violet,
    Indigo,
    Blue,
    Cyan,
    Teal,
    Green,
    Lime,
    Yellow,
    Orange,
}

impl UserColor {
    pub const ALL: [UserColor; 12] = [
        UserColor::Black,
        UserColor::Red,
        UserColor::Pink,
        UserColor::Violet,
        UserColor::Indigo,
        UserColor::Blue,
        UserColor::Cyan,
        UserColor::Teal,
        UserColor::Green,
        UserColor::Lime,
        UserColor::Yellow,
        UserColor::Orange,
    ];

    /// Longest accepted colour key on the wire.
    pub const MAX_NAME_LEN: usize = 20;

    pub fn name(self) -> &'static str {
        match self {
            UserColor::Black => "Black",
            UserColor::Red => "Red",
            UserColor::Pink => "Pink",
            UserColor::Violet => "Violet",
            UserColor::Indigo => "Indigo",
            UserColor::Blue => "Blue",
            UserColor::Cyan => "Cyan",
            UserColor::Teal => "Teal",
            UserColor::Green => "Green",
            UserColor::Lime => "Lime",
            UserColor::Yellow => "Yellow",
            UserColor::Orange => "Orange",
        }
    }

    pub fn hex(self) -> &'static str {
        match self {
            UserColor::Black => "#000000",
            UserColor::Red => "#991b1b",
            UserColor::Pink => "#9d174d",
            UserColor::Violet => "#5b21b6",
            UserColor::Indigo => "#3730a3",
            UserColor::Blue => "#1e40af",
            UserColor::Cyan => "#155e75",
            UserColor::Teal => "#115e59",
            UserColor::Green => "#166534",
            UserColor::Lime => "#3f6212",
            UserColor::Yellow => "#854d0e",
            UserColor::Orange => "#9a3412",
        }
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        *Self::ALL.choose(rng).unwrap_or(&UserColor::Black)
    }
}

impl fmt::Display for UserColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown palette colour {0:?}")]
pub struct UnknownColor(pub String);

impl FromStr for UserColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}
