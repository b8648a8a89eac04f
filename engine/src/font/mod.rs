//! # Font Management
//!
//! Font lookup and text measurement for layout and PDF serialization.
//!
//! The standard PDF fonts (Helvetica, Times, Courier) need no embedding and
//! cover the families a designer usually picks ("Arial", "Times New Roman",
//! "Courier New" resolve to them). TrueType fonts registered at runtime are
//! embedded whole.

pub mod metrics;

pub use metrics::StandardFontMetrics;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::style::FontSpec;

/// Line height as a multiple of the font size.
pub const LINE_HEIGHT: f64 = 1.2;

/// A font registry that maps font family + weight + style to font data.
#[derive(Debug, Clone)]
pub struct FontRegistry {
    fonts: HashMap<FontKey, FontData>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FontKey {
    /// Lowercased family name.
    pub family: String,
    pub weight: u32,
    pub italic: bool,
}

impl FontKey {
    pub fn new(family: &str, weight: u32, italic: bool) -> Self {
        Self {
            family: family.trim().to_lowercase(),
            weight,
            italic,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FontData {
    /// One of the standard PDF fonts. No embedding needed.
    Standard(StandardFont),
    /// A TrueType font that is embedded into every document using it.
    Custom(Arc<CustomFont>),
}

static FALLBACK: FontData = FontData::Standard(StandardFont::Helvetica);

impl FontData {
    pub fn measure(&self, text: &str, font_size: f64) -> f64 {
        match self {
            FontData::Standard(f) => f.metrics().measure_string(text, font_size),
            FontData::Custom(f) => text.chars().map(|c| f.metrics.char_width(c, font_size)).sum(),
        }
    }

    /// Ascender and descender as fractions of an em.
    pub fn vertical_metrics(&self) -> (f64, f64) {
        match self {
            FontData::Standard(f) => {
                let m = f.metrics();
                (m.ascender as f64 / 1000.0, m.descender as f64 / 1000.0)
            }
            FontData::Custom(f) => {
                let upem = f.metrics.units_per_em as f64;
                (f.metrics.ascender as f64 / upem, f.metrics.descender as f64 / upem)
            }
        }
    }
}

/// A parsed TrueType font.
#[derive(Debug)]
pub struct CustomFont {
    /// Name used for the embedded font's `/BaseFont`.
    pub name: String,
    pub data: Vec<u8>,
    pub metrics: CustomFontMetrics,
}

/// Parsed metrics from a TrueType/OpenType font via ttf-parser.
#[derive(Debug, Clone)]
pub struct CustomFontMetrics {
    pub units_per_em: u16,
    pub advance_widths: HashMap<char, u16>,
    pub default_advance: u16,
    pub ascender: i16,
    pub descender: i16,
    /// Maps characters to their glyph IDs in the font.
    pub glyph_ids: HashMap<char, u16>,
}

impl CustomFontMetrics {
    /// Get the advance width of a character in points.
    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        let w = self
            .advance_widths
            .get(&ch)
            .copied()
            .unwrap_or(self.default_advance);
        (w as f64 / self.units_per_em as f64) * font_size
    }

    /// Advance width in PDF glyph space (thousandths of an em).
    pub fn pdf_width(&self, ch: char) -> f64 {
        let w = self
            .advance_widths
            .get(&ch)
            .copied()
            .unwrap_or(self.default_advance);
        w as f64 * 1000.0 / self.units_per_em as f64
    }

    /// Parse metrics from font data using ttf-parser.
    pub fn from_font_data(data: &[u8]) -> Option<Self> {
        let face = ttf_parser::Face::parse(data, 0).ok()?;
        let units_per_em = face.units_per_em();

        let mut advance_widths = HashMap::new();
        let mut glyph_ids = HashMap::new();
        let mut default_advance = 0u16;

        for code in 32u32..=0xFFFF {
            if let Some(ch) = char::from_u32(code) {
                if let Some(glyph_id) = face.glyph_index(ch) {
                    let advance = face.glyph_hor_advance(glyph_id).unwrap_or(0);
                    advance_widths.insert(ch, advance);
                    glyph_ids.insert(ch, glyph_id.0);
                    if ch == ' ' {
                        default_advance = advance;
                    }
                }
            }
        }

        if default_advance == 0 {
            default_advance = units_per_em / 2;
        }

        Some(CustomFontMetrics {
            units_per_em,
            advance_widths,
            default_advance,
            ascender: face.ascender(),
            descender: face.descender(),
            glyph_ids,
        })
    }
}

/// The standard PDF fonts the engine draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
}

impl StandardFont {
    /// The PDF name for this font.
    pub fn pdf_name(&self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
            Self::HelveticaBold => "Helvetica-Bold",
            Self::HelveticaOblique => "Helvetica-Oblique",
            Self::HelveticaBoldOblique => "Helvetica-BoldOblique",
            Self::TimesRoman => "Times-Roman",
            Self::TimesBold => "Times-Bold",
            Self::TimesItalic => "Times-Italic",
            Self::TimesBoldItalic => "Times-BoldItalic",
            Self::Courier => "Courier",
            Self::CourierBold => "Courier-Bold",
            Self::CourierOblique => "Courier-Oblique",
            Self::CourierBoldOblique => "Courier-BoldOblique",
        }
    }

    pub fn metrics(&self) -> StandardFontMetrics {
        match self {
            Self::Helvetica | Self::HelveticaOblique => metrics::HELVETICA_METRICS,
            Self::HelveticaBold | Self::HelveticaBoldOblique => metrics::HELVETICA_BOLD_METRICS,
            Self::TimesRoman | Self::TimesItalic => metrics::TIMES_METRICS,
            Self::TimesBold | Self::TimesBoldItalic => metrics::TIMES_BOLD_METRICS,
            Self::Courier | Self::CourierBold | Self::CourierOblique | Self::CourierBoldOblique => {
                metrics::COURIER_METRICS
            }
        }
    }
}

/// Map common family names onto the standard font families.
fn standard_family(family: &str) -> &'static str {
    match family {
        "times" | "times new roman" | "times-roman" | "serif" | "georgia" => "times",
        "courier" | "courier new" | "monospace" | "mono" | "consolas" => "courier",
        _ => "helvetica",
    }
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        let mut fonts = HashMap::new();

        let standard_mappings = [
            (("helvetica", 400, false), StandardFont::Helvetica),
            (("helvetica", 700, false), StandardFont::HelveticaBold),
            (("helvetica", 400, true), StandardFont::HelveticaOblique),
            (("helvetica", 700, true), StandardFont::HelveticaBoldOblique),
            (("times", 400, false), StandardFont::TimesRoman),
            (("times", 700, false), StandardFont::TimesBold),
            (("times", 400, true), StandardFont::TimesItalic),
            (("times", 700, true), StandardFont::TimesBoldItalic),
            (("courier", 400, false), StandardFont::Courier),
            (("courier", 700, false), StandardFont::CourierBold),
            (("courier", 400, true), StandardFont::CourierOblique),
            (("courier", 700, true), StandardFont::CourierBoldOblique),
        ];

        for ((family, weight, italic), font) in standard_mappings {
            fonts.insert(FontKey::new(family, weight, italic), FontData::Standard(font));
        }

        Self { fonts }
    }

    /// Look up a font. Unknown families map onto the closest standard font,
    /// falling back to Helvetica.
    pub fn resolve(&self, family: &str, weight: u32, italic: bool) -> &FontData {
        let snapped_weight = if weight >= 600 { 700 } else { 400 };
        let key = FontKey::new(family, snapped_weight, italic);
        if let Some(font) = self.fonts.get(&key) {
            return font;
        }
        // A custom family registered only in its regular face.
        if let Some(font) = self.fonts.get(&FontKey::new(family, 400, false)) {
            if matches!(font, FontData::Custom(_)) {
                return font;
            }
        }
        let key = FontKey::new(standard_family(&key.family), snapped_weight, italic);
        self.fonts.get(&key).unwrap_or(&FALLBACK)
    }

    /// Register a custom TrueType font. Returns `false` when the data cannot
    /// be parsed.
    pub fn register(&mut self, family: &str, weight: u32, italic: bool, data: Vec<u8>) -> bool {
        let Some(metrics) = CustomFontMetrics::from_font_data(&data) else {
            return false;
        };
        let name: String = family.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        let name = match (weight >= 600, italic) {
            (true, true) => format!("{}-BoldItalic", name),
            (true, false) => format!("{}-Bold", name),
            (false, true) => format!("{}-Italic", name),
            (false, false) => name,
        };
        self.fonts.insert(
            FontKey::new(family, weight, italic),
            FontData::Custom(Arc::new(CustomFont { name, data, metrics })),
        );
        true
    }

    /// Iterate over all registered fonts.
    pub fn iter(&self) -> impl Iterator<Item = (&FontKey, &FontData)> {
        self.fonts.iter()
    }
}

/// Shared font context used by layout and PDF serialization.
#[derive(Debug, Clone, Default)]
pub struct FontContext {
    registry: FontRegistry,
}

impl FontContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a TrueType file under `family`.
    pub fn register_file(
        &mut self,
        family: &str,
        bold: bool,
        italic: bool,
        path: &Path,
    ) -> std::io::Result<bool> {
        let data = std::fs::read(path)?;
        let weight = if bold { 700 } else { 400 };
        Ok(self.registry.register(family, weight, italic, data))
    }

    /// The font a style draws with.
    pub fn resolve(&self, font: &FontSpec) -> &FontData {
        self.registry.resolve(&font.family, font.weight(), font.italic)
    }

    /// Width of `text` in points at `size`.
    pub fn measure(&self, text: &str, font: &FontSpec, size: f64) -> f64 {
        self.resolve(font).measure(text, size)
    }

    pub fn line_height(&self, size: f64) -> f64 {
        size * LINE_HEIGHT
    }

    /// Access the underlying font registry.
    pub fn registry(&self) -> &FontRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FontRegistry {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(family: &str, bold: bool) -> FontSpec {
        FontSpec {
            family: family.into(),
            bold,
            ..FontSpec::default()
        }
    }

    #[test]
    fn test_helvetica_space_width() {
        let ctx = FontContext::new();
        let w = ctx.measure(" ", &spec("Helvetica", false), 12.0);
        assert!((w - 3.336).abs() < 0.001);
    }

    #[test]
    fn test_bold_wider() {
        let ctx = FontContext::new();
        let regular = ctx.measure("abc", &spec("Helvetica", false), 12.0);
        let bold = ctx.measure("abc", &spec("Helvetica", true), 12.0);
        assert!(bold > regular, "bold should be wider than regular");
    }

    #[test]
    fn test_family_aliases() {
        let ctx = FontContext::new();
        assert!(matches!(
            ctx.resolve(&spec("Arial", false)),
            FontData::Standard(StandardFont::Helvetica)
        ));
        assert!(matches!(
            ctx.resolve(&spec("Times New Roman", true)),
            FontData::Standard(StandardFont::TimesBold)
        ));
        assert!(matches!(
            ctx.resolve(&spec("Courier New", false)),
            FontData::Standard(StandardFont::Courier)
        ));
    }

    #[test]
    fn test_unknown_family_falls_back() {
        let ctx = FontContext::new();
        let a = ctx.measure("A", &spec("Helvetica", false), 12.0);
        let b = ctx.measure("A", &spec("NoSuchFont", false), 12.0);
        assert!((a - b).abs() < 0.001);
    }

    #[test]
    fn test_garbage_font_data_rejected() {
        let mut registry = FontRegistry::new();
        assert!(!registry.register("Broken", 400, false, vec![0, 1, 2, 3]));
    }
}
