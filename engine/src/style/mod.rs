//! # Style System
//!
//! The visual attributes an element carries: font, colors, background and
//! alignment. Unlike a cascading style sheet nothing here inherits. Every
//! element owns a complete [`ElementStyle`], so a group member bound to the
//! same column as a page element can look completely different from it.

use serde::{Deserialize, Serialize};

/// Font family used when nothing else is configured. Resolves to Helvetica.
pub const DEFAULT_FONT_FAMILY: &str = "Arial";
/// Font size used for new elements.
pub const DEFAULT_FONT_SIZE: f64 = 12.0;

/// The complete visual style of one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementStyle {
    pub font: FontSpec,
    /// Text color.
    #[serde(default)]
    pub color: Color,
    #[serde(default)]
    pub background: Background,
    #[serde(default)]
    pub align: TextAlign,
    #[serde(default)]
    pub vertical_align: VerticalAlign,
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self {
            font: FontSpec::default(),
            color: Color::BLACK,
            background: Background::Solid(Color::WHITE),
            align: TextAlign::Left,
            vertical_align: VerticalAlign::Middle,
        }
    }
}

/// Font selection for an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontSpec {
    pub family: String,
    /// Size in points. Only authoritative when `sizing` is `Pinned`; for
    /// `Auto` it is the last size the designer showed.
    pub size: f64,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub sizing: FontSizing,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: DEFAULT_FONT_FAMILY.to_string(),
            size: DEFAULT_FONT_SIZE,
            bold: false,
            italic: false,
            sizing: FontSizing::Auto,
        }
    }
}

impl FontSpec {
    /// Font weight as understood by the font registry.
    pub fn weight(&self) -> u32 {
        if self.bold {
            700
        } else {
            400
        }
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self.sizing, FontSizing::Pinned)
    }
}

/// How the rendered font size is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontSizing {
    /// Largest size at which the content fits the element box.
    #[default]
    Auto,
    /// Exactly `FontSpec::size`. Content that does not fit is clipped.
    Pinned,
}

/// Element background.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Background {
    #[default]
    Transparent,
    Solid(Color),
}

impl Background {
    /// The fill color, if anything is painted at all.
    pub fn fill(&self) -> Option<Color> {
        match self {
            Background::Transparent => None,
            Background::Solid(c) if c.a <= 0.0 => None,
            Background::Solid(c) => Some(*c),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerticalAlign {
    Top,
    #[default]
    Middle,
    Bottom,
}

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64, // 0.0 - 1.0
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };

    pub fn rgb(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    fn from_bytes(r: u8, g: u8, b: u8) -> Self {
        Self::rgb(r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0)
    }

    /// Parse `#rgb`, `#rrggbb` or one of a handful of color names.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            return Self::parse_hex(hex);
        }
        let named = match s.to_ascii_lowercase().as_str() {
            "black" => (0, 0, 0),
            "white" => (255, 255, 255),
            "red" => (255, 0, 0),
            "green" => (0, 128, 0),
            "blue" => (0, 0, 255),
            "yellow" => (255, 255, 0),
            "gray" | "grey" => (128, 128, 128),
            "lightgray" | "lightgrey" => (211, 211, 211),
            "orange" => (255, 165, 0),
            "navy" => (0, 0, 128),
            _ => return Self::parse_hex(s),
        };
        Some(Self::from_bytes(named.0, named.1, named.2))
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => Some(Self::from_bytes(
                channel(&hex[0..1].repeat(2))?,
                channel(&hex[1..2].repeat(2))?,
                channel(&hex[2..3].repeat(2))?,
            )),
            6 => Some(Self::from_bytes(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            _ => None,
        }
    }

    /// Every channel is a finite number in `0.0..=1.0`.
    pub fn is_valid(&self) -> bool {
        [self.r, self.g, self.b, self.a]
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
    }

    pub fn to_hex(&self) -> String {
        let byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", byte(self.r), byte(self.g), byte(self.b))
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}
