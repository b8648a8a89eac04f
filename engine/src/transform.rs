//! # Coordinate Transforms
//!
//! Three coordinate spaces meet in the designer:
//!
//! ```text
//! model space   points, origin top-left of the page, independent of display
//! view space    canvas pixels: view = model * zoom + pan
//! export space  identical to model space (the PDF page is the model page)
//! ```
//!
//! Everything here is pure math. The editing session owns a [`Viewport`] and
//! asks these functions to map pointer positions into the model and model
//! rectangles onto the canvas. Nothing in this module touches the template.

use serde::{Deserialize, Serialize};

/// Default grid step in points. Gestures snap to this at release.
pub const DEFAULT_SNAP_STEP: f64 = 5.0;

/// Distance (in points) within which a dragged edge locks onto another edge.
pub const ALIGNMENT_TOLERANCE: f64 = 5.0;

/// Minimum amount of page, in view pixels, that panning must leave visible.
const VISIBLE_MARGIN: f64 = 20.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn distance(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// An axis-aligned rectangle, top-left origin, y growing downward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    /// Rectangle spanned by two arbitrary corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(
            a.x.min(b.x),
            a.y.min(b.y),
            (a.x - b.x).abs(),
            (a.y - b.y).abs(),
        )
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn with_origin(&self, origin: Point) -> Self {
        Self::from_origin_size(origin, self.size())
    }

    pub fn with_size(&self, size: Size) -> Self {
        Self::from_origin_size(self.origin(), size)
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// True when `other` lies entirely inside `self` (within `eps`).
    pub fn contains_rect(&self, other: &Rect, eps: f64) -> bool {
        other.x >= self.x - eps
            && other.y >= self.y - eps
            && other.right() <= self.right() + eps
            && other.bottom() <= self.bottom() + eps
    }

    /// Positive-area overlap.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// The overlapping region, or `None` when the overlap has no area.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 > x0 && y1 > y0 {
            Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// Allowed zoom range. The upper bound is 400%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomLimits {
    pub min: f64,
    pub max: f64,
}

impl Default for ZoomLimits {
    fn default() -> Self {
        Self { min: 0.25, max: 4.0 }
    }
}

impl ZoomLimits {
    pub fn clamp(&self, zoom: f64) -> f64 {
        if zoom.is_nan() {
            return self.min;
        }
        zoom.clamp(self.min, self.max)
    }
}

/// What the canvas currently shows: zoom factor, pan offset (view pixels of
/// the page origin) and the canvas size in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub zoom: f64,
    pub pan: Point,
    pub size: Size,
}

impl Viewport {
    pub fn new(size: Size) -> Self {
        Self {
            zoom: 1.0,
            pan: Point::ORIGIN,
            size,
        }
    }

    pub fn to_view(&self, p: Point) -> Point {
        model_to_view(p, self.zoom, self.pan)
    }

    pub fn to_model(&self, v: Point) -> Point {
        view_to_model(v, self.zoom, self.pan)
    }

    /// Zoom expressed as a whole percentage, for status display.
    pub fn zoom_percent(&self) -> u32 {
        (self.zoom * 100.0).round() as u32
    }
}

pub fn model_to_view(p: Point, zoom: f64, pan: Point) -> Point {
    Point::new(p.x * zoom + pan.x, p.y * zoom + pan.y)
}

pub fn view_to_model(v: Point, zoom: f64, pan: Point) -> Point {
    Point::new((v.x - pan.x) / zoom, (v.y - pan.y) / zoom)
}

pub fn rect_to_view(r: &Rect, zoom: f64, pan: Point) -> Rect {
    let o = model_to_view(r.origin(), zoom, pan);
    Rect::new(o.x, o.y, r.width * zoom, r.height * zoom)
}

pub fn rect_to_model(r: &Rect, zoom: f64, pan: Point) -> Rect {
    let o = view_to_model(r.origin(), zoom, pan);
    Rect::new(o.x, o.y, r.width / zoom, r.height / zoom)
}

/// Rezoom by `factor` around `cursor` (view space).
///
/// The model point under the cursor before the zoom is under the cursor
/// afterwards, unless pan clamping has to pull an off-page cursor position
/// back toward the page.
pub fn zoom_about(
    viewport: &Viewport,
    cursor: Point,
    factor: f64,
    page: Size,
    limits: ZoomLimits,
) -> Viewport {
    let anchor = viewport.to_model(cursor);
    let zoom = limits.clamp(viewport.zoom * factor);
    let pan = Point::new(cursor.x - anchor.x * zoom, cursor.y - anchor.y * zoom);
    clamp_pan(
        &Viewport {
            zoom,
            pan,
            size: viewport.size,
        },
        page,
    )
}

/// Keep at least a sliver of the page inside the viewport.
pub fn clamp_pan(viewport: &Viewport, page: Size) -> Viewport {
    let page_w = page.width * viewport.zoom;
    let page_h = page.height * viewport.zoom;
    let pan = Point::new(
        clamp_axis(viewport.pan.x, page_w, viewport.size.width),
        clamp_axis(viewport.pan.y, page_h, viewport.size.height),
    );
    Viewport { pan, ..*viewport }
}

fn clamp_axis(pan: f64, page_extent: f64, view_extent: f64) -> f64 {
    let margin = VISIBLE_MARGIN.min(page_extent).min(view_extent);
    let lo = margin - page_extent;
    let hi = view_extent - margin;
    if lo > hi {
        return pan;
    }
    pan.clamp(lo, hi)
}

/// The largest zoom that shows the whole page, with the page centered.
pub fn fit_to_viewport(page: Size, view: Size, limits: ZoomLimits) -> Viewport {
    let zoom = limits.clamp((view.width / page.width).min(view.height / page.height));
    let pan = Point::new(
        (view.width - page.width * zoom) / 2.0,
        (view.height - page.height * zoom) / 2.0,
    );
    Viewport {
        zoom,
        pan,
        size: view,
    }
}

/// Nearest multiple of `step`.
pub fn snap(value: f64, step: f64) -> f64 {
    if step <= 0.0 || !step.is_finite() {
        return value;
    }
    (value / step).round() * step
}

pub fn snap_point(p: Point, step: f64) -> Point {
    Point::new(snap(p.x, step), snap(p.y, step))
}

/// Snap a size to the grid, never collapsing below one step.
pub fn snap_size(s: Size, step: f64) -> Size {
    if step <= 0.0 || !step.is_finite() {
        return s;
    }
    Size::new(snap(s.width, step).max(step), snap(s.height, step).max(step))
}

/// Alignment-guide correction for a rectangle being dragged or resized.
///
/// Returns the `(dx, dy)` that moves the first edge found within `tolerance`
/// of an edge of one of `others` exactly onto it. While resizing only the
/// right and bottom edges move, so only those are compared.
pub fn edge_alignment(moving: &Rect, others: &[Rect], tolerance: f64, resize: bool) -> (f64, f64) {
    let xs: Vec<f64> = if resize {
        vec![moving.right()]
    } else {
        vec![moving.x, moving.right()]
    };
    let ys: Vec<f64> = if resize {
        vec![moving.bottom()]
    } else {
        vec![moving.y, moving.bottom()]
    };

    let mut dx = None;
    let mut dy = None;
    for other in others {
        if dx.is_none() {
            dx = nearest_edge(&xs, &[other.x, other.right()], tolerance);
        }
        if dy.is_none() {
            dy = nearest_edge(&ys, &[other.y, other.bottom()], tolerance);
        }
        if dx.is_some() && dy.is_some() {
            break;
        }
    }
    (dx.unwrap_or(0.0), dy.unwrap_or(0.0))
}

fn nearest_edge(edges: &[f64], targets: &[f64], tolerance: f64) -> Option<f64> {
    for &e in edges {
        for &t in targets {
            if (e - t).abs() <= tolerance {
                return Some(t - e);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A4: Size = Size {
        width: 595.0,
        height: 842.0,
    };

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn test_model_to_view_applies_zoom_then_pan() {
        let v = model_to_view(Point::new(10.0, 20.0), 2.0, Point::new(5.0, -5.0));
        assert_eq!(v, Point::new(25.0, 35.0));
    }

    #[test]
    fn test_zoom_is_clamped_to_limits() {
        let vp = Viewport::new(Size::new(800.0, 600.0));
        let zoomed = zoom_about(&vp, Point::new(100.0, 100.0), 100.0, A4, ZoomLimits::default());
        assert_eq!(zoomed.zoom, 4.0);
        let shrunk = zoom_about(&vp, Point::new(100.0, 100.0), 0.001, A4, ZoomLimits::default());
        assert_eq!(shrunk.zoom, 0.25);
    }

    #[test]
    fn test_pan_cannot_lose_the_page() {
        let vp = Viewport {
            zoom: 1.0,
            pan: Point::new(-10_000.0, 10_000.0),
            size: Size::new(800.0, 600.0),
        };
        let clamped = clamp_pan(&vp, A4);
        let page = rect_to_view(&Rect::new(0.0, 0.0, A4.width, A4.height), clamped.zoom, clamped.pan);
        let view = Rect::new(0.0, 0.0, 800.0, 600.0);
        assert!(page.intersects(&view));
    }

    #[test]
    fn test_fit_centers_page() {
        let vp = fit_to_viewport(A4, Size::new(1000.0, 842.0), ZoomLimits::default());
        assert!(approx(vp.zoom, 1.0));
        assert!(approx(vp.pan.x, (1000.0 - 595.0) / 2.0));
        assert!(approx(vp.pan.y, 0.0));
    }

    #[test]
    fn test_snap_rounds_to_nearest_step() {
        assert_eq!(snap(12.4, 5.0), 10.0);
        assert_eq!(snap(12.6, 5.0), 15.0);
        assert_eq!(snap(-2.6, 5.0), -5.0);
        assert_eq!(snap(7.3, 0.0), 7.3);
    }

    #[test]
    fn test_snap_size_never_below_step() {
        let s = snap_size(Size::new(1.0, 2.0), 5.0);
        assert_eq!(s, Size::new(5.0, 5.0));
    }

    #[test]
    fn test_edge_alignment_locks_nearby_edges() {
        let moving = Rect::new(103.0, 48.0, 50.0, 20.0);
        let other = Rect::new(100.0, 200.0, 80.0, 30.0);
        let (dx, dy) = edge_alignment(&moving, &[other], ALIGNMENT_TOLERANCE, false);
        assert!(approx(dx, -3.0));
        assert_eq!(dy, 0.0);
    }

    #[test]
    fn test_edge_alignment_resize_only_uses_far_edges() {
        let moving = Rect::new(103.0, 0.0, 75.0, 20.0);
        let other = Rect::new(100.0, 200.0, 80.0, 30.0);
        let (dx, _) = edge_alignment(&moving, &[other], ALIGNMENT_TOLERANCE, true);
        // right edge 178 snaps to 180, left edge is ignored
        assert!(approx(dx, 2.0));
    }

    proptest! {
        #[test]
        fn view_to_model_inverts_model_to_view(
            x in -5000.0f64..5000.0,
            y in -5000.0f64..5000.0,
            zoom in 0.25f64..4.0,
            px in -2000.0f64..2000.0,
            py in -2000.0f64..2000.0,
        ) {
            let p = Point::new(x, y);
            let pan = Point::new(px, py);
            let back = view_to_model(model_to_view(p, zoom, pan), zoom, pan);
            prop_assert!(approx(back.x, p.x) && approx(back.y, p.y));
        }

        #[test]
        fn zoom_keeps_point_under_cursor(
            mx in 0.0f64..595.0,
            my in 0.0f64..842.0,
            zoom in 0.25f64..4.0,
            factor in 0.5f64..2.0,
        ) {
            // Place the viewport so the chosen page point sits under the cursor.
            let cursor = Point::new(400.0, 300.0);
            let vp = Viewport {
                zoom,
                pan: Point::new(cursor.x - mx * zoom, cursor.y - my * zoom),
                size: Size::new(800.0, 600.0),
            };
            let before = vp.to_model(cursor);
            let after = zoom_about(&vp, cursor, factor, A4, ZoomLimits::default());
            let under = after.to_model(cursor);
            prop_assert!((under.x - before.x).abs() < 1e-6);
            prop_assert!((under.y - before.y).abs() < 1e-6);
        }

        #[test]
        fn snapping_is_idempotent(v in -10_000.0f64..10_000.0, step in 0.5f64..50.0) {
            let once = snap(v, step);
            prop_assert_eq!(snap(once, step), once);
        }
    }
}
