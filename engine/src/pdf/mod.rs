//! # PDF Serializer
//!
//! Takes composed pages and writes a valid PDF file.
//!
//! This is a from-scratch PDF 1.7 writer. The subset needed for a template
//! page (filled rectangles, single-line text runs, images, clipping) is small
//! enough that owning the bytes is simpler than pulling in a PDF library.
//!
//! ## PDF Structure (simplified)
//!
//! ```text
//! %PDF-1.7            <- header
//! 1 0 obj ... endobj  <- objects (fonts, pages, content streams, etc.)
//! 2 0 obj ... endobj
//! ...
//! xref                <- cross-reference table (byte offsets of each object)
//! trailer             <- points to the root object
//! %%EOF
//! ```
//!
//! ## Fonts
//!
//! Standard fonts (Helvetica, Times, Courier) are plain Type1 references with
//! WinAnsiEncoding. Custom TrueType fonts are embedded whole as CIDFontType2
//! with Identity-H encoding: FontFile2, FontDescriptor, CIDFont, ToUnicode
//! CMap and the root Type0 dictionary.
//!
//! Layout coordinates have a top-left origin; PDF user space has a
//! bottom-left origin, so every y is flipped against the page height.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as FmtWrite; // for write! on String
use std::io::Write as IoWrite; // for write! on Vec<u8>
use std::sync::Arc;

use miniz_oxide::deflate::compress_to_vec_zlib;
use thiserror::Error;

use crate::font::{CustomFont, FontContext, FontData, StandardFont};
use crate::image_loader::{ImagePixelData, JpegColorSpace, LoadedImage};
use crate::layout::{DrawCommand, LayoutElement, LayoutPage};
use crate::style::Color;
use crate::transform::Rect;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to embed font '{family}': {message}")]
    Font { family: String, message: String },
}

/// Document information dictionary entries.
#[derive(Debug, Clone, Default)]
pub struct DocumentInfo {
    pub title: Option<String>,
    pub subject: Option<String>,
}

pub struct PdfWriter;

/// Font resources are keyed by what the PDF needs, not by the style that
/// asked for them: "Arial" and "Helvetica" share one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum FontRes {
    Standard(&'static str),
    Custom(String),
}

/// Tracks allocated PDF objects during writing.
struct PdfBuilder {
    objects: Vec<PdfObject>,
    /// Font resource -> object id, in /F index order.
    font_objects: Vec<(FontRes, usize)>,
    /// Image XObject ids, indexed as /Im0, /Im1, ...
    image_objects: Vec<usize>,
    /// Image identity -> index into `image_objects`.
    image_index: HashMap<*const LoadedImage, usize>,
    /// Fill opacity (0-255) -> ExtGState object id, indexed as /GS0, /GS1, ...
    ext_gstates: Vec<(u8, usize)>,
}

struct PdfObject {
    data: Vec<u8>,
}

impl Default for PdfWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write laid-out pages to a PDF byte vector.
    pub fn write(
        &self,
        pages: &[LayoutPage],
        info: &DocumentInfo,
        fonts: &FontContext,
    ) -> Result<Vec<u8>, PdfError> {
        let mut builder = PdfBuilder {
            objects: Vec::new(),
            font_objects: Vec::new(),
            image_objects: Vec::new(),
            image_index: HashMap::new(),
            ext_gstates: Vec::new(),
        };

        // 0 = placeholder (PDF objects are 1-indexed), 1 = Catalog, 2 = Pages
        for _ in 0..3 {
            builder.objects.push(PdfObject { data: vec![] });
        }

        self.register_fonts(&mut builder, pages, fonts)?;
        self.register_images(&mut builder, pages);
        self.register_opacities(&mut builder, pages);

        let font_resources = self.build_font_resource_dict(&builder.font_objects);
        let gstate_resources: Vec<String> = builder
            .ext_gstates
            .iter()
            .enumerate()
            .map(|(i, (_, obj_id))| format!("/GS{} {} 0 R", i, obj_id))
            .collect();
        let mut page_obj_ids = Vec::with_capacity(pages.len());

        for page in pages {
            let content = self.build_content_stream(page, &builder, fonts);
            let compressed = compress_to_vec_zlib(content.as_bytes(), 6);

            let content_obj_id = builder.objects.len();
            let mut content_data: Vec<u8> = Vec::new();
            let _ = write!(
                content_data,
                "<< /Length {} /Filter /FlateDecode >>\nstream\n",
                compressed.len()
            );
            content_data.extend_from_slice(&compressed);
            content_data.extend_from_slice(b"\nendstream");
            builder.objects.push(PdfObject { data: content_data });

            let xobjects = self.build_xobject_resource_dict(page, &builder);
            let mut resources = format!("/Font << {} >>", font_resources);
            if !xobjects.is_empty() {
                let _ = write!(resources, " /XObject << {} >>", xobjects);
            }
            if !gstate_resources.is_empty() {
                let _ = write!(resources, " /ExtGState << {} >>", gstate_resources.join(" "));
            }
            let page_obj_id = builder.objects.len();
            let page_dict = format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {:.2} {:.2}] \
                 /Contents {} 0 R /Resources << {} >> >>",
                page.width, page.height, content_obj_id, resources
            );
            builder.objects.push(PdfObject {
                data: page_dict.into_bytes(),
            });
            page_obj_ids.push(page_obj_id);
        }

        builder.objects[1].data = b"<< /Type /Catalog /Pages 2 0 R >>".to_vec();
        let kids: Vec<String> = page_obj_ids.iter().map(|id| format!("{} 0 R", id)).collect();
        builder.objects[2].data = format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_obj_ids.len()
        )
        .into_bytes();

        let info_obj_id = builder.objects.len();
        let mut dict = String::from("<< ");
        if let Some(ref title) = info.title {
            let _ = write!(dict, "/Title ({}) ", escape_pdf_string(title));
        }
        if let Some(ref subject) = info.subject {
            let _ = write!(dict, "/Subject ({}) ", escape_pdf_string(subject));
        }
        let _ = write!(
            dict,
            "/Producer (Rowpress {}) /Creator (Rowpress) >>",
            env!("CARGO_PKG_VERSION")
        );
        builder.objects.push(PdfObject {
            data: dict.into_bytes(),
        });

        Ok(self.serialize(&builder, info_obj_id))
    }

    fn build_content_stream(&self, page: &LayoutPage, builder: &PdfBuilder, fonts: &FontContext) -> String {
        let mut stream = String::new();
        for element in &page.elements {
            self.write_element(&mut stream, element, page.height, builder, fonts);
        }
        stream
    }

    /// Write a single layout element as PDF operators, inside its own
    /// graphics state so the clip never leaks.
    fn write_element(
        &self,
        stream: &mut String,
        element: &LayoutElement,
        page_height: f64,
        builder: &PdfBuilder,
        fonts: &FontContext,
    ) {
        stream.push_str("q\n");
        if let Some(clip) = element.clip {
            let r = flip(&clip, page_height);
            let _ = writeln!(stream, "{:.2} {:.2} {:.2} {:.2} re W n", r.x, r.y, r.width, r.height);
        }

        match &element.draw {
            DrawCommand::Rect { fill } => {
                let r = flip(&element.frame(), page_height);
                set_opacity(stream, builder, fill);
                let _ = write!(
                    stream,
                    "{:.3} {:.3} {:.3} rg\n{:.2} {:.2} {:.2} {:.2} re\nf\n",
                    fill.r, fill.g, fill.b, r.x, r.y, r.width, r.height
                );
            }

            DrawCommand::Text {
                lines,
                color,
                font,
                font_size,
            } => {
                let data = fonts.resolve(font);
                let res = font_res(data);
                let index = builder
                    .font_objects
                    .iter()
                    .position(|(r, _)| *r == res)
                    .unwrap_or(0);
                set_opacity(stream, builder, color);
                let _ = write!(
                    stream,
                    "BT\n{:.3} {:.3} {:.3} rg\n/F{} {:.2} Tf\n",
                    color.r, color.g, color.b, index, font_size
                );
                for line in lines {
                    let _ = writeln!(stream, "1 0 0 1 {:.2} {:.2} Tm", line.x, page_height - line.y);
                    match data {
                        FontData::Custom(custom) => {
                            let _ = writeln!(stream, "<{}> Tj", encode_glyphs(custom, &line.text));
                        }
                        FontData::Standard(_) => {
                            let _ = writeln!(stream, "({}) Tj", encode_winansi(&line.text));
                        }
                    }
                }
                stream.push_str("ET\n");
            }

            DrawCommand::Image { image } => {
                if let Some(idx) = builder.image_index.get(&Arc::as_ptr(image)) {
                    let r = flip(&element.frame(), page_height);
                    let _ = write!(
                        stream,
                        "{:.4} 0 0 {:.4} {:.2} {:.2} cm\n/Im{} Do\n",
                        r.width, r.height, r.x, r.y, idx
                    );
                }
            }
        }
        stream.push_str("Q\n");
    }

    /// One ExtGState per distinct translucent fill used on any page.
    fn register_opacities(&self, builder: &mut PdfBuilder, pages: &[LayoutPage]) {
        let mut used = BTreeSet::new();
        for element in pages.iter().flat_map(|p| &p.elements) {
            let color = match &element.draw {
                DrawCommand::Rect { fill } => fill,
                DrawCommand::Text { color, .. } => color,
                DrawCommand::Image { .. } => continue,
            };
            let alpha = opacity(color);
            if alpha < 255 {
                used.insert(alpha);
            }
        }
        for alpha in used {
            let obj_id = builder.objects.len();
            let value = alpha as f64 / 255.0;
            builder.objects.push(PdfObject {
                data: format!("<< /Type /ExtGState /ca {:.3} /CA {:.3} >>", value, value).into_bytes(),
            });
            builder.ext_gstates.push((alpha, obj_id));
        }
    }

    /// Register every font used across all pages, one PDF font object per
    /// resource.
    fn register_fonts(
        &self,
        builder: &mut PdfBuilder,
        pages: &[LayoutPage],
        fonts: &FontContext,
    ) -> Result<(), PdfError> {
        let mut used: HashMap<FontRes, (FontData, BTreeSet<char>)> = HashMap::new();
        for page in pages {
            for element in &page.elements {
                if let DrawCommand::Text { lines, font, .. } = &element.draw {
                    let data = fonts.resolve(font);
                    let entry = used
                        .entry(font_res(data))
                        .or_insert_with(|| (data.clone(), BTreeSet::new()));
                    for line in lines {
                        entry.1.extend(line.text.chars());
                    }
                }
            }
        }

        let mut keys: Vec<FontRes> = used.keys().cloned().collect();
        keys.sort();
        if keys.is_empty() {
            keys.push(FontRes::Standard(StandardFont::Helvetica.pdf_name()));
        }

        for key in keys {
            let obj_id = match used.get(&key) {
                Some((FontData::Custom(custom), chars)) => Self::write_custom_font_objects(builder, custom, chars)?,
                _ => {
                    let FontRes::Standard(name) = &key else {
                        continue;
                    };
                    let obj_id = builder.objects.len();
                    let font_dict = format!(
                        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                        name
                    );
                    builder.objects.push(PdfObject {
                        data: font_dict.into_bytes(),
                    });
                    obj_id
                }
            };
            builder.font_objects.push((key, obj_id));
        }
        Ok(())
    }

    /// Create one XObject per distinct image. The same decoded image drawn on
    /// several elements is embedded once.
    fn register_images(&self, builder: &mut PdfBuilder, pages: &[LayoutPage]) {
        for page in pages {
            for element in &page.elements {
                if let DrawCommand::Image { image } = &element.draw {
                    let ptr = Arc::as_ptr(image);
                    if builder.image_index.contains_key(&ptr) {
                        continue;
                    }
                    let xobj_id = Self::write_image_xobject(builder, image);
                    builder.image_index.insert(ptr, builder.image_objects.len());
                    builder.image_objects.push(xobj_id);
                }
            }
        }
    }

    /// Write a single image as one or two XObject PDF objects.
    /// Returns the main XObject ID.
    fn write_image_xobject(builder: &mut PdfBuilder, image: &LoadedImage) -> usize {
        match &image.pixel_data {
            ImagePixelData::Jpeg { data, color_space } => {
                let color_space = match color_space {
                    JpegColorSpace::DeviceRGB => "/DeviceRGB",
                    JpegColorSpace::DeviceGray => "/DeviceGray",
                };
                let obj_id = builder.objects.len();
                let mut obj_data: Vec<u8> = Vec::new();
                let _ = write!(
                    obj_data,
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} \
                     /ColorSpace {} /BitsPerComponent 8 /Filter /DCTDecode \
                     /Length {} >>\nstream\n",
                    image.width_px,
                    image.height_px,
                    color_space,
                    data.len()
                );
                obj_data.extend_from_slice(data);
                obj_data.extend_from_slice(b"\nendstream");
                builder.objects.push(PdfObject { data: obj_data });
                obj_id
            }

            ImagePixelData::Decoded { rgb, alpha } => {
                let smask_id = alpha.as_ref().map(|alpha_data| {
                    let compressed_alpha = compress_to_vec_zlib(alpha_data, 6);
                    let smask_obj_id = builder.objects.len();
                    let mut smask_data: Vec<u8> = Vec::new();
                    let _ = write!(
                        smask_data,
                        "<< /Type /XObject /Subtype /Image /Width {} /Height {} \
                         /ColorSpace /DeviceGray /BitsPerComponent 8 \
                         /Filter /FlateDecode /Length {} >>\nstream\n",
                        image.width_px,
                        image.height_px,
                        compressed_alpha.len()
                    );
                    smask_data.extend_from_slice(&compressed_alpha);
                    smask_data.extend_from_slice(b"\nendstream");
                    builder.objects.push(PdfObject { data: smask_data });
                    smask_obj_id
                });

                let compressed_rgb = compress_to_vec_zlib(rgb, 6);
                let smask_ref = smask_id
                    .map(|id| format!(" /SMask {} 0 R", id))
                    .unwrap_or_default();
                let obj_id = builder.objects.len();
                let mut obj_data: Vec<u8> = Vec::new();
                let _ = write!(
                    obj_data,
                    "<< /Type /XObject /Subtype /Image /Width {} /Height {} \
                     /ColorSpace /DeviceRGB /BitsPerComponent 8 \
                     /Filter /FlateDecode /Length {}{} >>\nstream\n",
                    image.width_px,
                    image.height_px,
                    compressed_rgb.len(),
                    smask_ref
                );
                obj_data.extend_from_slice(&compressed_rgb);
                obj_data.extend_from_slice(b"\nendstream");
                builder.objects.push(PdfObject { data: obj_data });
                obj_id
            }
        }
    }

    /// The /XObject resource dict entries for the images drawn on `page`.
    fn build_xobject_resource_dict(&self, page: &LayoutPage, builder: &PdfBuilder) -> String {
        let used: BTreeSet<usize> = page
            .elements
            .iter()
            .filter_map(|e| match &e.draw {
                DrawCommand::Image { image } => builder.image_index.get(&Arc::as_ptr(image)).copied(),
                _ => None,
            })
            .collect();
        used.iter()
            .map(|idx| format!("/Im{} {} 0 R", idx, builder.image_objects[*idx]))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Write the 5 CIDFont PDF objects for a custom TrueType font.
    /// Returns the object ID of the Type0 root font dictionary.
    fn write_custom_font_objects(
        builder: &mut PdfBuilder,
        font: &CustomFont,
        used_chars: &BTreeSet<char>,
    ) -> Result<usize, PdfError> {
        let face = ttf_parser::Face::parse(&font.data, 0).map_err(|e| PdfError::Font {
            family: font.name.clone(),
            message: e.to_string(),
        })?;
        let metrics = &font.metrics;
        let scale = 1000.0 / metrics.units_per_em as f64;

        let char_to_gid: Vec<(char, u16)> = used_chars
            .iter()
            .filter_map(|ch| metrics.glyph_ids.get(ch).map(|gid| (*ch, *gid)))
            .collect();

        // 1. FontFile2 stream
        let compressed_ttf = compress_to_vec_zlib(&font.data, 6);
        let fontfile2_id = builder.objects.len();
        let mut fontfile2_data: Vec<u8> = Vec::new();
        let _ = write!(
            fontfile2_data,
            "<< /Length {} /Length1 {} /Filter /FlateDecode >>\nstream\n",
            compressed_ttf.len(),
            font.data.len()
        );
        fontfile2_data.extend_from_slice(&compressed_ttf);
        fontfile2_data.extend_from_slice(b"\nendstream");
        builder.objects.push(PdfObject { data: fontfile2_data });

        // 2. FontDescriptor
        let bbox = face.global_bounding_box();
        let italic = font.name.ends_with("Italic");
        let bold = font.name.contains("-Bold");
        let font_descriptor_id = builder.objects.len();
        let descriptor = format!(
            "<< /Type /FontDescriptor /FontName /{} /Flags 4 \
             /FontBBox [{} {} {} {}] /ItalicAngle {} \
             /Ascent {} /Descent {} /CapHeight {} /StemV {} \
             /FontFile2 {} 0 R >>",
            font.name,
            (bbox.x_min as f64 * scale) as i32,
            (bbox.y_min as f64 * scale) as i32,
            (bbox.x_max as f64 * scale) as i32,
            (bbox.y_max as f64 * scale) as i32,
            if italic { -12 } else { 0 },
            (metrics.ascender as f64 * scale) as i32,
            (metrics.descender as f64 * scale) as i32,
            (face.capital_height().unwrap_or(metrics.ascender) as f64 * scale) as i32,
            if bold { 120 } else { 80 },
            fontfile2_id,
        );
        builder.objects.push(PdfObject {
            data: descriptor.into_bytes(),
        });

        // 3. CIDFont dictionary (DescendantFont)
        let cidfont_id = builder.objects.len();
        let cidfont = format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{} \
             /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
             /FontDescriptor {} 0 R /DW {} /W {} /CIDToGIDMap /Identity >>",
            font.name,
            font_descriptor_id,
            (metrics.default_advance as f64 * scale) as u32,
            build_w_array(font, &char_to_gid),
        );
        builder.objects.push(PdfObject {
            data: cidfont.into_bytes(),
        });

        // 4. ToUnicode CMap
        let tounicode_id = builder.objects.len();
        let cmap = build_tounicode_cmap(&char_to_gid, &font.name);
        let compressed_cmap = compress_to_vec_zlib(cmap.as_bytes(), 6);
        let mut tounicode_data: Vec<u8> = Vec::new();
        let _ = write!(
            tounicode_data,
            "<< /Length {} /Filter /FlateDecode >>\nstream\n",
            compressed_cmap.len()
        );
        tounicode_data.extend_from_slice(&compressed_cmap);
        tounicode_data.extend_from_slice(b"\nendstream");
        builder.objects.push(PdfObject { data: tounicode_data });

        // 5. Type0 font dictionary (the root, referenced by /Resources)
        let type0_id = builder.objects.len();
        let type0 = format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{} /Encoding /Identity-H \
             /DescendantFonts [{} 0 R] /ToUnicode {} 0 R >>",
            font.name, cidfont_id, tounicode_id,
        );
        builder.objects.push(PdfObject {
            data: type0.into_bytes(),
        });

        Ok(type0_id)
    }

    fn build_font_resource_dict(&self, font_objects: &[(FontRes, usize)]) -> String {
        font_objects
            .iter()
            .enumerate()
            .map(|(i, (_, obj_id))| format!("/F{} {} 0 R", i, obj_id))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Serialize all objects into the final PDF byte stream.
    fn serialize(&self, builder: &PdfBuilder, info_obj_id: usize) -> Vec<u8> {
        let mut output: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = vec![0; builder.objects.len()];

        output.extend_from_slice(b"%PDF-1.7\n");
        output.extend_from_slice(b"%\xe2\xe3\xcf\xd3\n");

        for (i, obj) in builder.objects.iter().enumerate().skip(1) {
            offsets[i] = output.len();
            let _ = write!(output, "{} 0 obj\n", i);
            output.extend_from_slice(&obj.data);
            output.extend_from_slice(b"\nendobj\n\n");
        }

        let xref_offset = output.len();
        let _ = write!(output, "xref\n0 {}\n", builder.objects.len());
        let _ = write!(output, "0000000000 65535 f \n");
        for offset in offsets.iter().skip(1) {
            let _ = write!(output, "{:010} 00000 n \n", offset);
        }

        let _ = write!(
            output,
            "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF\n",
            builder.objects.len(),
            info_obj_id,
            xref_offset
        );
        output
    }
}

fn font_res(data: &FontData) -> FontRes {
    match data {
        FontData::Standard(f) => FontRes::Standard(f.pdf_name()),
        FontData::Custom(c) => FontRes::Custom(c.name.clone()),
    }
}

/// Alpha quantized to the 0-255 steps the graphics states are keyed by.
fn opacity(color: &Color) -> u8 {
    (color.a.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Select the graphics state for a translucent color. Opaque colors need
/// none: each element starts from the page default inside its `q … Q`.
fn set_opacity(stream: &mut String, builder: &PdfBuilder, color: &Color) {
    let alpha = opacity(color);
    if alpha == 255 {
        return;
    }
    if let Some(index) = builder.ext_gstates.iter().position(|(a, _)| *a == alpha) {
        let _ = writeln!(stream, "/GS{} gs", index);
    }
}

/// Convert a top-left-origin rectangle to PDF user space.
fn flip(r: &Rect, page_height: f64) -> Rect {
    Rect::new(r.x, page_height - r.y - r.height, r.width, r.height)
}

fn encode_glyphs(font: &CustomFont, text: &str) -> String {
    let mut hex = String::with_capacity(text.len() * 4);
    for ch in text.chars() {
        let gid = font.metrics.glyph_ids.get(&ch).copied().unwrap_or(0);
        let _ = write!(hex, "{:04X}", gid);
    }
    hex
}

/// Encode text as a WinAnsi PDF string body. Unmappable characters become `?`.
fn encode_winansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let b = unicode_to_winansi(ch).unwrap_or(b'?');
        match b {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            0x20..=0x7E => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{:03o}", b);
            }
        }
    }
    out
}

/// Build the /W array for per-glyph widths in CIDFont.
/// Format: [gid [width] gid [width] ...]
fn build_w_array(font: &CustomFont, char_to_gid: &[(char, u16)]) -> String {
    let mut entries: Vec<(u16, u32)> = char_to_gid
        .iter()
        .map(|(ch, gid)| (*gid, font.metrics.pdf_width(*ch) as u32))
        .collect();
    entries.sort_by_key(|(gid, _)| *gid);
    entries.dedup_by_key(|(gid, _)| *gid);

    let mut result = String::from("[");
    for (gid, width) in &entries {
        let _ = write!(result, " {} [{}]", gid, width);
    }
    result.push_str(" ]");
    result
}

/// Build a ToUnicode CMap so text can be extracted and copied.
fn build_tounicode_cmap(char_to_gid: &[(char, u16)], font_name: &str) -> String {
    let mut gid_to_unicode: Vec<(u16, u32)> = char_to_gid.iter().map(|(ch, gid)| (*gid, *ch as u32)).collect();
    gid_to_unicode.sort_by_key(|(gid, _)| *gid);

    let mut cmap = String::new();
    cmap.push_str("/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n");
    cmap.push_str("/CIDSystemInfo\n<< /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    let _ = writeln!(cmap, "/CMapName /{}-UTF16 def", font_name);
    cmap.push_str("/CMapType 2 def\n1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    // At most 100 entries per beginbfchar block.
    for chunk in gid_to_unicode.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for &(gid, unicode) in chunk {
            if unicode > 0xFFFF {
                let utf16: Vec<u16> = char::from_u32(unicode)
                    .map(|c| c.encode_utf16(&mut [0; 2]).to_vec())
                    .unwrap_or_default();
                let hex: String = utf16.iter().map(|u| format!("{:04X}", u)).collect();
                let _ = writeln!(cmap, "<{:04X}> <{}>", gid, hex);
            } else {
                let _ = writeln!(cmap, "<{:04X}> <{:04X}>", gid, unicode);
            }
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

/// Escape special characters in a PDF string.
fn escape_pdf_string(s: &str) -> String {
    encode_winansi(s)
}

/// Map a Unicode codepoint to a WinAnsiEncoding byte value.
///
/// WinAnsiEncoding is based on Windows-1252. Most codepoints in
/// 0x20..=0x7E and 0xA0..=0xFF map directly. The 0x80..=0x9F range
/// contains special mappings for smart quotes, bullets, dashes, etc.
fn unicode_to_winansi(ch: char) -> Option<u8> {
    let cp = ch as u32;
    if (0x20..=0x7E).contains(&cp) || (0xA0..=0xFF).contains(&cp) {
        return Some(cp as u8);
    }
    match cp {
        0x20AC => Some(0x80), // Euro sign
        0x201A => Some(0x82), // Single low-9 quotation mark
        0x0192 => Some(0x83), // Latin small letter f with hook
        0x201E => Some(0x84), // Double low-9 quotation mark
        0x2026 => Some(0x85), // Horizontal ellipsis
        0x2020 => Some(0x86), // Dagger
        0x2021 => Some(0x87), // Double dagger
        0x02C6 => Some(0x88), // Modifier letter circumflex accent
        0x2030 => Some(0x89), // Per mille sign
        0x0160 => Some(0x8A), // Latin capital letter S with caron
        0x2039 => Some(0x8B), // Single left-pointing angle quotation
        0x0152 => Some(0x8C), // Latin capital ligature OE
        0x017D => Some(0x8E), // Latin capital letter Z with caron
        0x2018 => Some(0x91), // Left single quotation mark
        0x2019 => Some(0x92), // Right single quotation mark
        0x201C => Some(0x93), // Left double quotation mark
        0x201D => Some(0x94), // Right double quotation mark
        0x2022 => Some(0x95), // Bullet
        0x2013 => Some(0x96), // En dash
        0x2014 => Some(0x97), // Em dash
        0x02DC => Some(0x98), // Small tilde
        0x2122 => Some(0x99), // Trade mark sign
        0x0161 => Some(0x9A), // Latin small letter s with caron
        0x203A => Some(0x9B), // Single right-pointing angle quotation
        0x0153 => Some(0x9C), // Latin small ligature oe
        0x017E => Some(0x9E), // Latin small letter z with caron
        0x0178 => Some(0x9F), // Latin capital letter Y with diaeresis
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextLine;
    use crate::model::{ElementId, ItemId};
    use crate::style::{Color, FontSpec};

    fn page(elements: Vec<LayoutElement>) -> LayoutPage {
        LayoutPage {
            width: 595.0,
            height: 842.0,
            elements,
            warnings: vec![],
        }
    }

    fn text(x: f64, y: f64, s: &str, bold: bool) -> LayoutElement {
        LayoutElement {
            x,
            y,
            width: 100.0,
            height: 20.0,
            clip: Some(Rect::new(x, y, 100.0, 20.0)),
            draw: DrawCommand::Text {
                lines: vec![TextLine {
                    x: x + 2.0,
                    y: y + 14.0,
                    text: s.to_string(),
                    width: 30.0,
                }],
                color: Color::BLACK,
                font: FontSpec {
                    bold,
                    ..FontSpec::default()
                },
                font_size: 12.0,
            },
            source: ItemId::Element(ElementId(1)),
        }
    }

    fn write(pages: &[LayoutPage]) -> String {
        let bytes = PdfWriter::new()
            .write(pages, &DocumentInfo::default(), &FontContext::new())
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn first_stream(bytes: &[u8]) -> String {
        let start = bytes.windows(7).position(|w| w == b"stream\n").unwrap() + 7;
        let end = bytes[start..].windows(10).position(|w| w == b"\nendstream").unwrap() + start;
        let data = miniz_oxide::inflate::decompress_to_vec_zlib(&bytes[start..end]).unwrap();
        String::from_utf8(data).unwrap()
    }

    #[test]
    fn test_translucent_fill_uses_graphics_state() {
        let veil = LayoutElement {
            x: 10.0,
            y: 10.0,
            width: 50.0,
            height: 50.0,
            clip: None,
            draw: DrawCommand::Rect {
                fill: Color { a: 0.5, ..Color::rgb(1.0, 0.0, 0.0) },
            },
            source: ItemId::Element(ElementId(2)),
        };
        let bytes = PdfWriter::new()
            .write(&[page(vec![veil, text(10.0, 80.0, "Opaque", false)])], &DocumentInfo::default(), &FontContext::new())
            .unwrap();
        let out = String::from_utf8_lossy(&bytes).into_owned();
        assert!(out.contains("/Type /ExtGState /ca 0.502 /CA 0.502"));
        assert!(out.contains("/ExtGState << /GS0 "));

        let content = first_stream(&bytes);
        assert_eq!(content.matches(" gs").count(), 1);
        let gs = content.find("/GS0 gs").unwrap();
        assert!(gs < content.find(" rg").unwrap());
    }

    #[test]
    fn test_opaque_page_has_no_graphics_state() {
        let out = write(&[page(vec![text(10.0, 10.0, "Hi", false)])]);
        assert!(!out.contains("ExtGState"));
    }

    #[test]
    fn test_escape_pdf_string() {
        assert_eq!(escape_pdf_string("Hello (World)"), "Hello \\(World\\)");
        assert_eq!(escape_pdf_string("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_winansi_special_chars() {
        assert_eq!(encode_winansi("\u{20AC}"), "\\200");
        assert_eq!(encode_winansi("\u{4E2D}"), "?");
    }

    #[test]
    fn test_empty_page_produces_valid_pdf() {
        let out = write(&[page(vec![])]);
        assert!(out.starts_with("%PDF-1.7"));
        assert!(out.contains("xref"));
        assert!(out.contains("trailer"));
        assert!(out.trim_end().ends_with("%%EOF"));
        assert!(out.contains("/MediaBox [0 0 595.00 842.00]"));
    }

    #[test]
    fn test_info_dictionary() {
        let info = DocumentInfo {
            title: Some("Alice".into()),
            subject: None,
        };
        let bytes = PdfWriter::new()
            .write(&[page(vec![])], &info, &FontContext::new())
            .unwrap();
        let out = String::from_utf8_lossy(&bytes);
        assert!(out.contains("/Title (Alice)"));
        assert!(out.contains("/Producer (Rowpress"));
    }

    #[test]
    fn test_bold_font_registered_separately() {
        let out = write(&[page(vec![text(10.0, 10.0, "A", false), text(10.0, 40.0, "A", true)])]);
        assert!(out.contains("/BaseFont /Helvetica "));
        assert!(out.contains("/BaseFont /Helvetica-Bold"));
        assert!(!out.contains("CIDFontType2"));
    }

    #[test]
    fn test_flip_to_pdf_space() {
        assert_eq!(flip(&Rect::new(10.0, 20.0, 30.0, 40.0), 842.0), Rect::new(10.0, 782.0, 30.0, 40.0));
    }

    #[test]
    fn test_same_image_embedded_once() {
        let image = Arc::new(LoadedImage {
            pixel_data: ImagePixelData::Decoded {
                rgb: vec![255, 0, 0],
                alpha: None,
            },
            width_px: 1,
            height_px: 1,
        });
        let img = |y: f64| LayoutElement {
            x: 0.0,
            y,
            width: 10.0,
            height: 10.0,
            clip: None,
            draw: DrawCommand::Image {
                image: Arc::clone(&image),
            },
            source: ItemId::Element(ElementId(2)),
        };
        let out = write(&[page(vec![img(0.0), img(20.0)])]);
        assert_eq!(out.matches("/Subtype /Image").count(), 1);
        assert!(out.contains("/Im0"));
    }

    #[test]
    fn test_tounicode_cmap_format() {
        let cmap = build_tounicode_cmap(&[('A', 36), ('B', 37)], "TestFont");
        assert!(cmap.contains("begincmap"));
        assert!(cmap.contains("<0024> <0041>"));
        assert!(cmap.contains("<0025> <0042>"));
        assert!(cmap.contains("<0000> <FFFF>"));
    }
}
