//! Blend modes
//!
//! Layer and pixel commands carry a blend mode byte. The text form uses the
//! SVG compositing name where one exists and a `-dp-` prefixed name
//! otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel blend mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BlendMode {
    /// Erase alpha
    Erase = 0,
    /// Plain source-over
    #[default]
    Normal = 1,
    /// Multiply
    Multiply = 2,
    /// Divide
    Divide = 3,
    /// Color burn
    Burn = 4,
    /// Color dodge
    Dodge = 5,
    /// Darken only
    Darken = 6,
    /// Lighten only
    Lighten = 7,
    /// Subtract
    Subtract = 8,
    /// Add
    Add = 9,
    /// Paint only where the destination is opaque
    Recolor = 10,
    /// Paint behind existing pixels
    Behind = 11,
    /// Erase a specific color
    ColorErase = 12,
    /// Screen
    Screen = 13,
    /// Overwrite destination pixels
    Replace = 255,
}

const ALL: [BlendMode; 15] = [
    BlendMode::Erase,
    BlendMode::Normal,
    BlendMode::Multiply,
    BlendMode::Divide,
    BlendMode::Burn,
    BlendMode::Dodge,
    BlendMode::Darken,
    BlendMode::Lighten,
    BlendMode::Subtract,
    BlendMode::Add,
    BlendMode::Recolor,
    BlendMode::Behind,
    BlendMode::ColorErase,
    BlendMode::Screen,
    BlendMode::Replace,
];

impl BlendMode {
    /// Wire value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Look up a mode by wire value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        ALL.into_iter().find(|mode| mode.as_u8() == value)
    }

    /// SVG compositing name used by the text form
    #[must_use]
    pub fn svg_name(self) -> &'static str {
        match self {
            Self::Erase => "-dp-erase",
            Self::Normal => "src-over",
            Self::Multiply => "multiply",
            Self::Divide => "-dp-divide",
            Self::Burn => "color-burn",
            Self::Dodge => "color-dodge",
            Self::Darken => "darken",
            Self::Lighten => "lighten",
            Self::Subtract => "-dp-minus",
            Self::Add => "plus",
            Self::Recolor => "src-atop",
            Self::Behind => "dst-over",
            Self::ColorErase => "-dp-cerase",
            Self::Screen => "screen",
            Self::Replace => "-dp-replace",
        }
    }

    /// Look up a mode by its SVG name
    #[must_use]
    pub fn from_svg_name(name: &str) -> Option<Self> {
        ALL.into_iter().find(|mode| mode.svg_name() == name)
    }

    /// Whether the mode can be used as a layer blend mode
    ///
    /// Erasing and replacing only make sense for brush and pixel commands.
    #[must_use]
    pub fn is_layer_mode(self) -> bool {
        !matches!(self, Self::Erase | Self::ColorErase | Self::Replace)
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.svg_name())
    }
}
