//! Ink color classification

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accent color used for checkbox outlines and marks (`#32B09C`)
pub const DEFAULT_INK_COLOR: InkColor = InkColor::new(0x32, 0xB0, 0x9C);

/// Per-channel tolerance for ink matching
pub const DEFAULT_COLOR_TOLERANCE: u8 = 25;

/// An RGB target color, serialized as `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InkColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl InkColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Format as `#RRGGBB`
    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Default for InkColor {
    fn default() -> Self {
        DEFAULT_INK_COLOR
    }
}

impl FromStr for InkColor {
    type Err = Error;

    /// Parse `#RRGGBB` or `RRGGBB` (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInkColor {
            value: s.to_string(),
        };

        let hex = s.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };

        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl TryFrom<String> for InkColor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<InkColor> for String {
    fn from(color: InkColor) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for InkColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Decides whether a pixel is "ink": every channel strictly within `tolerance` of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorMatcher {
    target: InkColor,
    tolerance: u8,
}

impl ColorMatcher {
    pub fn new(target: InkColor, tolerance: u8) -> Self {
        Self { target, tolerance }
    }

    pub fn target(&self) -> InkColor {
        self.target
    }

    pub fn tolerance(&self) -> u8 {
        self.tolerance
    }

    #[inline]
    pub fn is_ink(&self, r: u8, g: u8, b: u8) -> bool {
        r.abs_diff(self.target.r) < self.tolerance
            && g.abs_diff(self.target.g) < self.tolerance
            && b.abs_diff(self.target.b) < self.tolerance
    }

    /// Alpha is ignored, the raster is assumed to be composited onto an opaque background.
    #[inline]
    pub fn is_ink_pixel(&self, pixel: &image::Rgba<u8>) -> bool {
        let [r, g, b, _] = pixel.0;
        self.is_ink(r, g, b)
    }
}

impl Default for ColorMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_INK_COLOR, DEFAULT_COLOR_TOLERANCE)
    }
}
