//! # Page Composition
//!
//! Turns a template and one data row into a positioned [`LayoutPage`]: a flat,
//! bottom-to-top list of things to draw. The live preview and the PDF export
//! both go through [`compose`], so what the designer shows is what the batch
//! writes.
//!
//! Coordinates are page points with the origin at the top-left corner; the
//! PDF serializer flips them.

pub mod stack;

use std::sync::Arc;

use crate::condition::InclusionSet;
use crate::font::{FontContext, FontData};
use crate::image_loader::{ImageLookup, ImageResolver, LoadedImage};
use crate::model::{Drawable, Element, ElementId, ElementKind, Group, ImageSource, ItemId, Template};
use crate::source::Row;
use crate::style::{Color, ElementStyle, FontSpec, TextAlign, VerticalAlign};
use crate::transform::Rect;

pub use stack::{stack_group, Placement};

/// Horizontal and vertical padding between an element's box and its text.
pub const TEXT_INSET: f64 = 2.0;

/// A fully laid-out page ready for PDF serialization.
#[derive(Debug, Clone)]
pub struct LayoutPage {
    pub width: f64,
    pub height: f64,
    /// Bottom to top.
    pub elements: Vec<LayoutElement>,
    /// Problems that were absorbed while composing.
    pub warnings: Vec<LayoutWarning>,
}

impl LayoutPage {
    /// Number of image elements drawn without their image.
    pub fn image_fallbacks(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, LayoutWarning::ImageUnavailable { .. }))
            .count()
    }

    /// Text drawn by the element `id`, lines joined with `\n`.
    pub fn text_of(&self, id: ElementId) -> Option<String> {
        self.elements.iter().find_map(|e| match (&e.draw, e.source) {
            (DrawCommand::Text { lines, .. }, ItemId::Element(src)) if src == id => Some(
                lines
                    .iter()
                    .map(|l| l.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => None,
        })
    }

    /// Page-space boxes of everything drawn for `item`.
    pub fn frames_of(&self, item: ItemId) -> Vec<Rect> {
        self.elements
            .iter()
            .filter(|e| e.source == item)
            .map(|e| e.frame())
            .collect()
    }
}

/// A positioned element on a page.
#[derive(Debug, Clone)]
pub struct LayoutElement {
    /// Absolute position on the page (top-left corner).
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Drawing is confined to this page-space rectangle.
    pub clip: Option<Rect>,
    pub draw: DrawCommand,
    /// The template item this was produced from.
    pub source: ItemId,
}

impl LayoutElement {
    pub fn frame(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// What to actually draw for this element.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    /// A filled rectangle (element or group background).
    Rect { fill: Color },
    /// Single-line text runs.
    Text {
        lines: Vec<TextLine>,
        color: Color,
        font: FontSpec,
        font_size: f64,
    },
    /// An image stretched to the element box.
    Image { image: Arc<LoadedImage> },
}

/// One line of text. `y` is the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub x: f64,
    pub y: f64,
    pub text: String,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutWarning {
    ImageUnavailable {
        element: ElementId,
        reference: String,
        reason: String,
    },
}

/// Shared resources for composition.
#[derive(Clone, Copy)]
pub struct ComposeContext<'a> {
    pub fonts: &'a FontContext,
    pub images: &'a dyn ImageResolver,
}

/// Compose the page for `row`. Only elements in `inclusion` are drawn.
pub fn compose(
    template: &Template,
    row: &Row,
    inclusion: &InclusionSet,
    ctx: &ComposeContext<'_>,
) -> LayoutPage {
    let page = template.page();
    let mut out = LayoutPage {
        width: page.width,
        height: page.height,
        elements: Vec::new(),
        warnings: Vec::new(),
    };

    for drawable in template.drawables() {
        match drawable {
            Drawable::Element(element) => {
                if inclusion.contains(element.id) {
                    place_element(&mut out, element, element.frame, None, row, ctx);
                }
            }
            Drawable::Group(group) => place_group(&mut out, group, row, inclusion, ctx),
        }
    }
    out
}

fn place_group(
    out: &mut LayoutPage,
    group: &Group,
    row: &Row,
    inclusion: &InclusionSet,
    ctx: &ComposeContext<'_>,
) {
    let origin = group.frame;
    if let Some(fill) = group.background.fill() {
        out.elements.push(LayoutElement {
            x: origin.x,
            y: origin.y,
            width: origin.width,
            height: origin.height,
            clip: None,
            draw: DrawCommand::Rect { fill },
            source: ItemId::Group(group.id),
        });
    }
    for placement in stack_group(group, inclusion) {
        let Some(member) = group.member(placement.member) else {
            continue;
        };
        let frame = placement.frame.translate(origin.x, origin.y);
        let clip = placement.clip.translate(origin.x, origin.y);
        place_element(out, member, frame, Some(clip), row, ctx);
    }
}

fn place_element(
    out: &mut LayoutPage,
    element: &Element,
    frame: Rect,
    clip: Option<Rect>,
    row: &Row,
    ctx: &ComposeContext<'_>,
) {
    let source = ItemId::Element(element.id);
    let push = |out: &mut LayoutPage, draw: DrawCommand, clip: Option<Rect>| {
        out.elements.push(LayoutElement {
            x: frame.x,
            y: frame.y,
            width: frame.width,
            height: frame.height,
            clip,
            draw,
            source,
        });
    };

    if let Some(fill) = element.style.background.fill() {
        push(out, DrawCommand::Rect { fill }, clip);
    }

    let content_clip = match clip {
        Some(c) => c.intersection(&frame),
        None => Some(frame),
    };
    let Some(content_clip) = content_clip else {
        return;
    };

    match &element.kind {
        ElementKind::StaticText { text } => {
            if let Some(draw) = text_command(text, frame, &element.style, ctx.fonts) {
                push(out, draw, Some(content_clip));
            }
        }
        ElementKind::BoundField { column } => {
            if let Some(draw) = text_command(row.value(column), frame, &element.style, ctx.fonts) {
                push(out, draw, Some(content_clip));
            }
        }
        ElementKind::Image { source: image_source } => {
            let reference = match image_source {
                ImageSource::Fixed(r) => r.as_str(),
                ImageSource::Column(c) => row.value(c),
            };
            let reference = reference.trim();
            if reference.is_empty() {
                return;
            }
            match ctx.images.resolve(reference) {
                ImageLookup::Found(image) => push(out, DrawCommand::Image { image }, Some(content_clip)),
                ImageLookup::NotFound => {
                    image_warning(out, element.id, reference, "image not found".to_string())
                }
                ImageLookup::Failed(reason) => image_warning(out, element.id, reference, reason),
            }
        }
    }
}

fn image_warning(out: &mut LayoutPage, element: ElementId, reference: &str, reason: String) {
    tracing::warn!(%element, reference, reason = %reason, "drawing image element without its image");
    out.warnings.push(LayoutWarning::ImageUnavailable {
        element,
        reference: reference.to_string(),
        reason,
    });
}

fn text_command(text: &str, frame: Rect, style: &ElementStyle, fonts: &FontContext) -> Option<DrawCommand> {
    let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if lines.iter().all(|l| l.is_empty()) {
        return None;
    }
    let font = fonts.resolve(&style.font);
    let font_size = if style.font.is_pinned() {
        style.font.size
    } else {
        fit_font_size(&lines, frame, font, fonts)
    };
    Some(DrawCommand::Text {
        lines: position_lines(&lines, frame, style, font, font_size, fonts),
        color: style.color,
        font: style.font.clone(),
        font_size,
    })
}

/// Largest whole font size at which every line fits the box minus insets.
/// Never below 1.
pub fn fit_font_size(lines: &[&str], frame: Rect, font: &FontData, fonts: &FontContext) -> f64 {
    let avail_w = frame.width - 2.0 * TEXT_INSET;
    let avail_h = frame.height - 2.0 * TEXT_INSET;
    if avail_w <= 0.0 || avail_h <= 0.0 {
        return 1.0;
    }
    let widest_at_1 = lines.iter().map(|l| font.measure(l, 1.0)).fold(0.0, f64::max);
    let n = lines.len().max(1) as f64;

    let by_height = (avail_h / (fonts.line_height(1.0) * n)).floor();
    let by_width = if widest_at_1 > 0.0 {
        (avail_w / widest_at_1).floor()
    } else {
        by_height
    };
    let mut size = by_height.min(by_width).max(1.0);
    let fits = |s: f64| {
        lines.iter().all(|l| font.measure(l, s) <= avail_w + 1e-9)
            && fonts.line_height(s) * n <= avail_h + 1e-9
    };
    while size > 1.0 && !fits(size) {
        size -= 1.0;
    }
    size
}

fn position_lines(
    lines: &[&str],
    frame: Rect,
    style: &ElementStyle,
    font: &FontData,
    font_size: f64,
    fonts: &FontContext,
) -> Vec<TextLine> {
    let line_h = fonts.line_height(font_size);
    let block_h = line_h * lines.len() as f64;
    let top = match style.vertical_align {
        VerticalAlign::Top => frame.y + TEXT_INSET,
        VerticalAlign::Middle => frame.y + (frame.height - block_h) / 2.0,
        VerticalAlign::Bottom => frame.bottom() - TEXT_INSET - block_h,
    };
    let (ascent, descent) = font.vertical_metrics();
    let baseline_in_line = (line_h - (ascent - descent) * font_size) / 2.0 + ascent * font_size;

    lines
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let width = font.measure(text, font_size);
            let x = match style.align {
                TextAlign::Left => frame.x + TEXT_INSET,
                TextAlign::Center => frame.x + (frame.width - width) / 2.0,
                TextAlign::Right => frame.right() - TEXT_INSET - width,
            };
            TextLine {
                x,
                y: top + i as f64 * line_h + baseline_in_line,
                text: text.to_string(),
                width,
            }
        })
        .collect()
}
