//! # Editing Session
//!
//! The state behind the designer canvas: the template being edited, its undo
//! history, what the canvas shows and what the user is doing with the mouse.
//!
//! Pointer positions arrive in view space and are mapped into the model
//! through the [`Viewport`]. While a drag is in progress the model is left
//! alone; the canvas asks [`EditorSession::live_frame`] where to draw the
//! dragged items. Releasing the mouse snaps the result to the grid and
//! records it as a single undo step.

use std::collections::BTreeSet;

use crate::condition::InclusionSet;
use crate::history::{History, DEFAULT_HISTORY_DEPTH};
use crate::layout::{compose, ComposeContext, LayoutPage};
use crate::model::{Command, Drawable, ElementId, ElementKind, GroupId, ItemId, ModelError, Template, ZStep};
use crate::source::Row;
use crate::transform::{
    edge_alignment, fit_to_viewport, rect_to_model, snap_point, snap_size, zoom_about, clamp_pan, Point, Rect, Size,
    Viewport, ZoomLimits, ALIGNMENT_TOLERANCE, DEFAULT_SNAP_STEP,
};

/// Zoom change per wheel notch.
const ZOOM_IN_STEP: f64 = 1.1;
const ZOOM_OUT_STEP: f64 = 0.9;

/// Size, in view pixels, of the resize handle at an item's bottom-right corner.
const HANDLE_SIZE: f64 = 8.0;

/// Smallest box a resize gesture can produce, in points.
const MIN_ITEM_SIZE: f64 = 1.0;

/// Height of a field newly placed into a group.
const MEMBER_HEIGHT: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditorOptions {
    pub snap_step: f64,
    pub history_depth: usize,
    pub zoom: ZoomLimits,
    /// Lock dragged edges onto nearby edges of other items.
    pub align_edges: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            snap_step: DEFAULT_SNAP_STEP,
            history_depth: DEFAULT_HISTORY_DEPTH,
            zoom: ZoomLimits::default(),
            align_edges: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Horizontal,
    Vertical,
    Both,
}

/// Result of asking for a group editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorOpen {
    Opened,
    /// That group's editor was already open.
    Focused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureKind {
    Move,
    Resize,
}

#[derive(Debug, Clone)]
struct Gesture {
    kind: GestureKind,
    /// Model-space pointer position at the start.
    start: Point,
    delta: Point,
    /// Items taking part, with their frames at the start.
    items: Vec<(ItemId, Rect)>,
}

pub struct EditorSession {
    template: Template,
    history: History,
    viewport: Viewport,
    options: EditorOptions,
    selection: BTreeSet<ItemId>,
    gesture: Option<Gesture>,
    group_editor: Option<GroupId>,
}

impl EditorSession {
    pub fn new(template: Template, viewport_size: Size, options: EditorOptions) -> Self {
        let viewport = fit_to_viewport(template.page().size(), viewport_size, options.zoom);
        Self {
            template,
            history: History::new(options.history_depth),
            viewport,
            options,
            selection: BTreeSet::new(),
            gesture: None,
            group_editor: None,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn selection(&self) -> &BTreeSet<ItemId> {
        &self.selection
    }

    pub fn group_editor(&self) -> Option<GroupId> {
        self.group_editor
    }

    // --- selection ---

    /// Select `item`. Without `additive` the previous selection is replaced;
    /// with it, `item` is toggled.
    pub fn select(&mut self, item: ItemId, additive: bool) {
        if self.template.item_frame(item).is_none() {
            return;
        }
        if additive {
            if !self.selection.remove(&item) {
                self.selection.insert(item);
            }
        } else {
            self.selection.clear();
            self.selection.insert(item);
        }
    }

    /// Rubber-band selection: every page-level item lying entirely inside
    /// `view_rect`. Returns how many items are selected.
    pub fn select_in_rect(&mut self, view_rect: Rect) -> usize {
        let area = rect_to_model(&normalized(view_rect), self.viewport.zoom, self.viewport.pan);
        self.selection = self
            .template
            .drawables()
            .iter()
            .filter(|d| area.contains_rect(&d.frame(), 1e-9))
            .map(Drawable::id)
            .collect();
        self.selection.len()
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Topmost page-level item under `view_point`.
    pub fn hit_test(&self, view_point: Point) -> Option<ItemId> {
        let p = self.viewport.to_model(view_point);
        self.template
            .drawables()
            .iter()
            .rev()
            .find(|d| d.frame().contains_point(p))
            .map(Drawable::id)
    }

    // --- gestures ---

    /// Start dragging whatever is under `view_point`. An unselected item
    /// becomes the selection; a selected one drags the whole selection.
    /// Returns `false` when nothing is under the pointer.
    pub fn begin_move(&mut self, view_point: Point) -> bool {
        let Some(hit) = self.hit_test(view_point) else {
            self.selection.clear();
            return false;
        };
        if !self.selection.contains(&hit) {
            self.select(hit, false);
        }
        let items = self
            .selection
            .iter()
            .filter_map(|id| self.template.item_frame(*id).map(|f| (*id, f)))
            .collect();
        self.gesture = Some(Gesture {
            kind: GestureKind::Move,
            start: self.viewport.to_model(view_point),
            delta: Point::ORIGIN,
            items,
        });
        true
    }

    /// Start resizing the topmost item whose bottom-right handle is under
    /// `view_point`.
    pub fn begin_resize(&mut self, view_point: Point) -> bool {
        let handle = HANDLE_SIZE / self.viewport.zoom;
        let p = self.viewport.to_model(view_point);
        let grabbed = self.template.drawables().iter().rev().find_map(|d| {
            let f = d.frame();
            let near = (p.x - f.right()).abs() <= handle && (p.y - f.bottom()).abs() <= handle;
            near.then(|| (d.id(), f))
        });
        let Some((item, frame)) = grabbed else {
            return false;
        };
        self.select(item, false);
        self.gesture = Some(Gesture {
            kind: GestureKind::Resize,
            start: p,
            delta: Point::ORIGIN,
            items: vec![(item, frame)],
        });
        true
    }

    pub fn drag_to(&mut self, view_point: Point) {
        let p = self.viewport.to_model(view_point);
        if let Some(g) = &mut self.gesture {
            g.delta = Point::new(p.x - g.start.x, p.y - g.start.y);
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.gesture.is_some()
    }

    /// Where `item` should be drawn right now: the in-progress gesture
    /// position if it takes part in one, its model frame otherwise.
    pub fn live_frame(&self, item: ItemId) -> Option<Rect> {
        let frame = self.template.item_frame(item)?;
        let Some(g) = &self.gesture else {
            return Some(frame);
        };
        if !g.items.iter().any(|(id, _)| *id == item) {
            return Some(frame);
        }
        self.gesture_frames(g, false)
            .into_iter()
            .find(|(id, _)| *id == item)
            .map(|(_, f)| f)
    }

    /// Finish the gesture: snap, record one undo step. Returns whether the
    /// template changed.
    pub fn end_gesture(&mut self) -> Result<bool, ModelError> {
        let Some(g) = self.gesture.take() else {
            return Ok(false);
        };
        let mut commands = Vec::new();
        for ((item, before), (_, after)) in g.items.iter().zip(self.gesture_frames(&g, true)) {
            match g.kind {
                GestureKind::Move if after.origin() != before.origin() => commands.push(match item {
                    ItemId::Element(id) => Command::MoveElement { id: *id, to: after.origin() },
                    ItemId::Group(id) => Command::MoveGroup { id: *id, to: after.origin() },
                }),
                GestureKind::Resize if after.size() != before.size() => commands.push(match item {
                    ItemId::Element(id) => Command::ResizeElement { id: *id, size: after.size() },
                    ItemId::Group(id) => Command::ResizeGroup { id: *id, size: after.size() },
                }),
                _ => {}
            }
        }
        if commands.is_empty() {
            return Ok(false);
        }
        self.history.apply(&mut self.template, Command::Batch(commands))?;
        Ok(true)
    }

    pub fn cancel_gesture(&mut self) {
        self.gesture = None;
    }

    /// Frames of the gesture's items for the current pointer position.
    fn gesture_frames(&self, g: &Gesture, snapped: bool) -> Vec<(ItemId, Rect)> {
        let step = self.options.snap_step;
        let mut frames: Vec<(ItemId, Rect)> = g
            .items
            .iter()
            .map(|(id, f)| {
                let frame = match g.kind {
                    GestureKind::Move => {
                        let mut origin = f.origin().offset(g.delta.x, g.delta.y);
                        if snapped {
                            origin = snap_point(origin, step);
                        }
                        f.with_origin(origin)
                    }
                    GestureKind::Resize => {
                        let mut size = Size::new(
                            (f.width + g.delta.x).max(MIN_ITEM_SIZE),
                            (f.height + g.delta.y).max(MIN_ITEM_SIZE),
                        );
                        if snapped {
                            size = snap_size(size, step);
                        }
                        f.with_size(size)
                    }
                };
                (*id, frame)
            })
            .collect();

        if self.options.align_edges {
            if let Some(bounds) = bounding(frames.iter().map(|(_, f)| *f)) {
                let others: Vec<Rect> = self
                    .template
                    .drawables()
                    .iter()
                    .filter(|d| !g.items.iter().any(|(id, _)| *id == d.id()))
                    .map(Drawable::frame)
                    .collect();
                let resize = g.kind == GestureKind::Resize;
                let (dx, dy) = edge_alignment(&bounds, &others, ALIGNMENT_TOLERANCE, resize);
                for (_, f) in &mut frames {
                    *f = if resize {
                        f.with_size(Size::new((f.width + dx).max(MIN_ITEM_SIZE), (f.height + dy).max(MIN_ITEM_SIZE)))
                    } else {
                        f.translate(dx, dy)
                    };
                }
            }
        }
        frames
    }

    // --- commands ---

    /// Apply and record `cmd`.
    pub fn execute(&mut self, cmd: Command) -> Result<(), ModelError> {
        self.history.apply(&mut self.template, cmd)?;
        self.prune();
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        self.gesture = None;
        let changed = self.history.undo(&mut self.template);
        self.prune();
        changed
    }

    pub fn redo(&mut self) -> bool {
        self.gesture = None;
        let changed = self.history.redo(&mut self.template);
        self.prune();
        changed
    }

    /// Remove every selected item as one undo step. Returns how many went.
    pub fn delete_selection(&mut self) -> Result<usize, ModelError> {
        let commands: Vec<Command> = self
            .selection
            .iter()
            .map(|item| match item {
                ItemId::Element(id) => Command::RemoveElement { id: *id },
                ItemId::Group(id) => Command::RemoveGroup { id: *id },
            })
            .collect();
        let n = commands.len();
        if n > 0 {
            self.execute(Command::Batch(commands))?;
        }
        Ok(n)
    }

    /// Center each selected item on the page along `axis`.
    pub fn center_selection(&mut self, axis: Axis) -> Result<(), ModelError> {
        let page = self.template.page();
        let mut commands = Vec::new();
        for item in &self.selection {
            let Some(f) = self.template.item_frame(*item) else {
                continue;
            };
            let mut to = f.origin();
            if matches!(axis, Axis::Horizontal | Axis::Both) {
                to.x = (page.width - f.width) / 2.0;
            }
            if matches!(axis, Axis::Vertical | Axis::Both) {
                to.y = (page.height - f.height) / 2.0;
            }
            if to != f.origin() {
                commands.push(match item {
                    ItemId::Element(id) => Command::MoveElement { id: *id, to },
                    ItemId::Group(id) => Command::MoveGroup { id: *id, to },
                });
            }
        }
        if commands.is_empty() {
            return Ok(());
        }
        self.execute(Command::Batch(commands))
    }

    pub fn raise(&mut self) -> Result<(), ModelError> {
        self.reorder_selection(ZStep::Forward)
    }

    pub fn lower(&mut self) -> Result<(), ModelError> {
        self.reorder_selection(ZStep::Backward)
    }

    pub fn reorder_selection(&mut self, step: ZStep) -> Result<(), ModelError> {
        // Moving up, the topmost item goes first so neighbours in the
        // selection do not swap back with each other.
        let mut items: Vec<(u64, ItemId)> = self
            .template
            .drawables()
            .iter()
            .filter(|d| self.selection.contains(&d.id()))
            .map(|d| (d.z(), d.id()))
            .collect();
        if matches!(step, ZStep::Forward | ZStep::ToBack) {
            items.reverse();
        }
        let commands: Vec<Command> = items
            .into_iter()
            .map(|(_, item)| Command::Reorder { item, step })
            .collect();
        if commands.is_empty() {
            return Ok(());
        }
        self.execute(Command::Batch(commands))
    }

    /// Put a second element bound to `column` at the bottom of `group`.
    /// The page-level element bound to the same column is untouched.
    pub fn place_field_in_group(&mut self, group: GroupId, column: &str) -> Result<ElementId, ModelError> {
        let g = self.template.group(group).ok_or(ModelError::UnknownGroup(group))?;
        let y = g.members.iter().map(|m| m.frame.bottom()).fold(0.0, f64::max);
        let index = g.members.len();
        let width = g.frame.width;
        let element = self.template.new_element(
            ElementKind::BoundField {
                column: column.to_string(),
            },
            Rect::new(0.0, y, width, MEMBER_HEIGHT),
        );
        let id = element.id;
        self.execute(Command::AddMember {
            group,
            element,
            index,
            condition: None,
        })?;
        Ok(id)
    }

    /// Drop selection entries and editor state for items that no longer exist.
    fn prune(&mut self) {
        let template = &self.template;
        self.selection.retain(|item| template.item_frame(*item).is_some());
        if let Some(g) = self.group_editor {
            if template.group(g).is_none() {
                self.group_editor = None;
            }
        }
    }

    // --- view ---

    /// Zoom around `cursor` by `notches` wheel steps (positive zooms in).
    pub fn zoom_at(&mut self, cursor: Point, notches: i32) {
        if notches == 0 {
            return;
        }
        let step = if notches > 0 { ZOOM_IN_STEP } else { ZOOM_OUT_STEP };
        let factor = step.powi(notches.abs());
        self.viewport = zoom_about(
            &self.viewport,
            cursor,
            factor,
            self.template.page().size(),
            self.options.zoom,
        );
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let moved = Viewport {
            pan: self.viewport.pan.offset(dx, dy),
            ..self.viewport
        };
        self.viewport = clamp_pan(&moved, self.template.page().size());
    }

    pub fn fit_to_window(&mut self) {
        self.viewport = fit_to_viewport(self.template.page().size(), self.viewport.size, self.options.zoom);
    }

    pub fn resize_viewport(&mut self, size: Size) {
        let resized = Viewport { size, ..self.viewport };
        self.viewport = clamp_pan(&resized, self.template.page().size());
    }

    // --- group editor ---

    /// Open the editor for `group`. Only one is open at a time; asking for
    /// the open one again just focuses it.
    pub fn open_group_editor(&mut self, group: GroupId) -> Result<EditorOpen, ModelError> {
        if self.template.group(group).is_none() {
            return Err(ModelError::UnknownGroup(group));
        }
        if self.group_editor == Some(group) {
            return Ok(EditorOpen::Focused);
        }
        self.group_editor = Some(group);
        Ok(EditorOpen::Opened)
    }

    pub fn close_group_editor(&mut self) {
        self.group_editor = None;
    }

    // --- preview ---

    /// Compose the page for `row` exactly as export would. Without a row
    /// every element is shown with empty values.
    pub fn preview(&self, row: Option<&Row>, ctx: &ComposeContext<'_>) -> LayoutPage {
        match row {
            Some(row) => {
                let inclusion = crate::condition::evaluate(&self.template, row);
                compose(&self.template, row, &inclusion, ctx)
            }
            None => compose(
                &self.template,
                &Row::new(),
                &InclusionSet::everything(&self.template),
                ctx,
            ),
        }
    }
}

fn normalized(r: Rect) -> Rect {
    Rect::from_corners(r.origin(), Point::new(r.x + r.width, r.y + r.height))
}

fn bounding(frames: impl Iterator<Item = Rect>) -> Option<Rect> {
    frames.reduce(|a, b| {
        Rect::from_corners(
            Point::new(a.x.min(b.x), a.y.min(b.y)),
            Point::new(a.right().max(b.right()), a.bottom().max(b.bottom())),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontContext;
    use crate::image_loader::NoImages;
    use crate::model::Page;

    fn no_align() -> EditorOptions {
        EditorOptions {
            align_edges: false,
            ..EditorOptions::default()
        }
    }

    /// A session at zoom 1, pan 0, with one 100x40 box at (100, 100).
    fn session(options: EditorOptions) -> (EditorSession, ElementId) {
        let mut t = Template::new(Page::A4);
        let e = t.new_element(
            ElementKind::StaticText { text: "box".into() },
            Rect::new(100.0, 100.0, 100.0, 40.0),
        );
        let id = e.id;
        t.apply(Command::AddElement { element: e }).unwrap();
        let mut s = EditorSession::new(t, Size::new(595.0, 842.0), options);
        s.viewport = Viewport::new(Size::new(595.0, 842.0));
        (s, id)
    }

    fn drag(s: &mut EditorSession, from: (f64, f64), to: (f64, f64)) {
        assert!(s.begin_move(Point::new(from.0, from.1)));
        s.drag_to(Point::new(to.0, to.1));
        s.end_gesture().unwrap();
    }

    #[test]
    fn test_move_is_snapped_on_release_only() {
        let (mut s, id) = session(no_align());
        assert!(s.begin_move(Point::new(110.0, 110.0)));
        s.drag_to(Point::new(123.0, 111.0));
        let live = s.live_frame(ItemId::Element(id)).unwrap();
        assert_eq!(live.origin(), Point::new(113.0, 101.0));
        assert_eq!(s.template().element(id).unwrap().frame.x, 100.0);

        assert!(s.end_gesture().unwrap());
        assert_eq!(s.template().element(id).unwrap().frame.origin(), Point::new(115.0, 100.0));
    }

    #[test]
    fn test_three_moves_undo_redo() {
        let (mut s, id) = session(no_align());
        drag(&mut s, (110.0, 110.0), (130.0, 110.0));
        drag(&mut s, (140.0, 110.0), (160.0, 110.0));
        drag(&mut s, (170.0, 110.0), (190.0, 110.0));
        assert_eq!(s.template().element(id).unwrap().frame.x, 160.0);

        assert!(s.undo() && s.undo() && s.undo());
        assert_eq!(s.template().element(id).unwrap().frame.x, 100.0);
        assert!(!s.undo());
        assert!(s.redo() && s.redo() && s.redo());
        assert_eq!(s.template().element(id).unwrap().frame.x, 160.0);

        s.undo();
        drag(&mut s, (150.0, 110.0), (155.0, 110.0));
        assert!(!s.redo());
    }

    #[test]
    fn test_resize_keeps_pinned_font() {
        let (mut s, id) = session(no_align());
        let mut style = s.template().element(id).unwrap().style.clone();
        style.font.sizing = crate::style::FontSizing::Pinned;
        style.font.size = 18.0;
        s.execute(Command::RestyleElement { id, style }).unwrap();

        assert!(s.begin_resize(Point::new(200.0, 140.0)));
        s.drag_to(Point::new(150.0, 131.0));
        assert!(s.end_gesture().unwrap());
        let e = s.template().element(id).unwrap();
        assert_eq!(e.frame.size(), Size::new(50.0, 30.0));
        assert_eq!(e.style.font.size, 18.0);
    }

    #[test]
    fn test_alignment_locks_edges() {
        let (mut s, id) = session(EditorOptions::default());
        let other = s.template.new_element(
            ElementKind::StaticText { text: "other".into() },
            Rect::new(300.0, 300.0, 50.0, 50.0),
        );
        s.execute(Command::AddElement { element: other }).unwrap();
        assert!(s.begin_move(Point::new(110.0, 110.0)));
        s.drag_to(Point::new(308.0, 110.0));
        let live = s.live_frame(ItemId::Element(id)).unwrap();
        assert_eq!(live.x, 300.0);
    }

    #[test]
    fn test_click_on_empty_page_clears_selection() {
        let (mut s, id) = session(no_align());
        s.select(ItemId::Element(id), false);
        assert!(!s.begin_move(Point::new(500.0, 700.0)));
        assert!(s.selection().is_empty());
        assert!(!s.end_gesture().unwrap());
    }

    #[test]
    fn test_rubber_band_selection() {
        let (mut s, id) = session(no_align());
        assert_eq!(s.select_in_rect(Rect::new(250.0, 200.0, -200.0, -150.0)), 1);
        assert!(s.selection().contains(&ItemId::Element(id)));
        assert_eq!(s.select_in_rect(Rect::new(0.0, 0.0, 150.0, 150.0)), 0);
    }

    #[test]
    fn test_additive_select_toggles() {
        let (mut s, id) = session(no_align());
        s.select(ItemId::Element(id), true);
        s.select(ItemId::Element(id), true);
        assert!(s.selection().is_empty());
    }

    #[test]
    fn test_delete_selection_is_one_step() {
        let (mut s, id) = session(no_align());
        let g = s.template.new_group("Group1", Rect::new(0.0, 300.0, 100.0, 100.0));
        let gid = g.id;
        s.execute(Command::AddGroup { group: g }).unwrap();
        s.select(ItemId::Element(id), false);
        s.select(ItemId::Group(gid), true);
        s.open_group_editor(gid).unwrap();

        assert_eq!(s.delete_selection().unwrap(), 2);
        assert!(s.template().element(id).is_none());
        assert_eq!(s.group_editor(), None);
        assert!(s.selection().is_empty());
        assert!(s.undo());
        assert!(s.template().element(id).is_some());
        assert!(s.template().group(gid).is_some());
    }

    #[test]
    fn test_center_selection() {
        let (mut s, id) = session(no_align());
        s.select(ItemId::Element(id), false);
        s.center_selection(Axis::Horizontal).unwrap();
        let f = s.template().element(id).unwrap().frame;
        assert_eq!(f.x, (595.0 - 100.0) / 2.0);
        assert_eq!(f.y, 100.0);
    }

    #[test]
    fn test_raise_and_lower() {
        let (mut s, id) = session(no_align());
        let other = s.template.new_element(
            ElementKind::StaticText { text: "top".into() },
            Rect::new(0.0, 0.0, 10.0, 10.0),
        );
        s.execute(Command::AddElement { element: other }).unwrap();
        s.select(ItemId::Element(id), false);
        s.raise().unwrap();
        let order: Vec<ItemId> = s.template().drawables().iter().map(Drawable::id).collect();
        assert_eq!(order.last(), Some(&ItemId::Element(id)));
        s.lower().unwrap();
        let order: Vec<ItemId> = s.template().drawables().iter().map(Drawable::id).collect();
        assert_eq!(order.first(), Some(&ItemId::Element(id)));
    }

    #[test]
    fn test_zoom_notches_and_limits() {
        let (mut s, _) = session(no_align());
        s.zoom_at(Point::new(100.0, 100.0), 1);
        assert!((s.viewport().zoom - 1.1).abs() < 1e-12);
        s.zoom_at(Point::new(100.0, 100.0), 100);
        assert_eq!(s.viewport().zoom, 4.0);
        s.zoom_at(Point::new(100.0, 100.0), -200);
        assert_eq!(s.viewport().zoom, 0.25);
    }

    #[test]
    fn test_zoom_keeps_point_under_cursor() {
        let (mut s, _) = session(no_align());
        let cursor = Point::new(200.0, 300.0);
        let before = s.viewport().to_model(cursor);
        s.zoom_at(cursor, 3);
        let after = s.viewport().to_model(cursor);
        assert!(before.distance(after) < 1e-9);
    }

    #[test]
    fn test_pan_keeps_page_visible() {
        let (mut s, _) = session(no_align());
        s.pan_by(-10_000.0, 0.0);
        assert!(s.viewport().pan.x + 595.0 * s.viewport().zoom >= 20.0 - 1e-9);
    }

    #[test]
    fn test_fit_to_window() {
        let (mut s, _) = session(no_align());
        s.resize_viewport(Size::new(297.5, 421.0));
        s.fit_to_window();
        assert!((s.viewport().zoom - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_group_editor_single_instance() {
        let (mut s, _) = session(no_align());
        let g = s.template.new_group("Group1", Rect::new(0.0, 300.0, 100.0, 100.0));
        let gid = g.id;
        s.execute(Command::AddGroup { group: g }).unwrap();
        assert_eq!(s.open_group_editor(gid).unwrap(), EditorOpen::Opened);
        assert_eq!(s.open_group_editor(gid).unwrap(), EditorOpen::Focused);
        s.close_group_editor();
        assert_eq!(s.open_group_editor(gid).unwrap(), EditorOpen::Opened);
        assert!(s.open_group_editor(GroupId(999)).is_err());
    }

    #[test]
    fn test_place_field_keeps_page_element() {
        let (mut s, _) = session(no_align());
        let page_el = s.template.new_element(
            ElementKind::BoundField { column: "Note".into() },
            Rect::new(0.0, 0.0, 100.0, 20.0),
        );
        let page_id = page_el.id;
        s.execute(Command::AddElement { element: page_el }).unwrap();
        let g = s.template.new_group("Group1", Rect::new(0.0, 300.0, 100.0, 100.0));
        let gid = g.id;
        s.execute(Command::AddGroup { group: g }).unwrap();

        let first = s.place_field_in_group(gid, "Note").unwrap();
        let second = s.place_field_in_group(gid, "Other").unwrap();
        assert_ne!(first, page_id);
        assert_eq!(s.template().group(gid).unwrap().member(second).unwrap().frame.y, MEMBER_HEIGHT);

        s.select(ItemId::Group(gid), false);
        s.delete_selection().unwrap();
        assert!(s.template().element(page_id).is_some());
    }

    #[test]
    fn test_preview_without_row_shows_everything() {
        let (s, id) = session(no_align());
        let fonts = FontContext::new();
        let ctx = ComposeContext {
            fonts: &fonts,
            images: &NoImages,
        };
        let page = s.preview(None, &ctx);
        assert_eq!(page.text_of(id).as_deref(), Some("box"));
    }
}
