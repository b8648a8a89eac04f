//! # Template Model
//!
//! The durable description of a page template: the page, the elements placed
//! on it and the groups that stack their members per row.
//!
//! Ownership is strict. A page-level element belongs to the page, a member
//! belongs to exactly one group. Placing a bound field into a group creates a
//! *second* element pointing at the same column with its own id, frame and
//! style, so there are no back-references between page and group and deleting
//! a group can never take the page element with it.
//!
//! The model is only mutated through [`Command`] values (see
//! [`Template::apply`]), each of which hands back its own inverse. That is
//! what the undo history records.

mod command;

pub use command::{Command, GroupAppearance, ModelError, ZStep};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::style::{Background, ElementStyle};
use crate::transform::{Rect, Size};

/// Identity of an element, page-level or group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

/// Identity of a group. Shares the id space with elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Anything that sits directly on the page and takes part in z-ordering or
/// selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ItemId {
    Element(ElementId),
    Group(GroupId),
}

impl From<ElementId> for ItemId {
    fn from(id: ElementId) -> Self {
        ItemId::Element(id)
    }
}

impl From<GroupId> for ItemId {
    fn from(id: GroupId) -> Self {
        ItemId::Group(id)
    }
}

/// Page dimensions in points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub width: f64,
    pub height: f64,
}

impl Page {
    pub const A4: Page = Page {
        width: 595.0,
        height: 842.0,
    };
    pub const B5: Page = Page {
        width: 516.0,
        height: 729.0,
    };

    /// Look up a named preset (case-insensitive).
    pub fn preset(name: &str) -> Option<Page> {
        match name.to_ascii_uppercase().as_str() {
            "A4" => Some(Page::A4),
            "B5" => Some(Page::B5),
            _ => None,
        }
    }

    /// Name of the preset these dimensions match (within a point), if any.
    pub fn preset_name(&self) -> Option<&'static str> {
        [("A4", Page::A4), ("B5", Page::B5)]
            .into_iter()
            .find(|(_, p)| (p.width - self.width).abs() < 1.0 && (p.height - self.height).abs() < 1.0)
            .map(|(name, _)| name)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::A4
    }
}

/// What an element shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ElementKind {
    /// Literal text, identical on every row.
    StaticText { text: String },
    /// The value of a data column for the current row.
    BoundField { column: String },
    /// An image, looked up by reference.
    Image { source: ImageSource },
}

impl ElementKind {
    /// The data column this element reads, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            ElementKind::BoundField { column } => Some(column),
            ElementKind::Image {
                source: ImageSource::Column(column),
            } => Some(column),
            _ => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.column().is_some()
    }
}

/// Where an image element gets its reference from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", content = "value", rename_all = "camelCase")]
pub enum ImageSource {
    /// A fixed file name, path, URL or data URI.
    Fixed(String),
    /// The row's value in this column is the reference.
    Column(String),
}

/// The two observed visibility predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// Show when the referenced value is missing or blank.
    Empty,
    /// Show when the referenced value has content.
    NonEmpty,
}

/// Show an element only when `predicate` holds for `column` on the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub predicate: Predicate,
}

impl Condition {
    pub fn when_filled(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            predicate: Predicate::NonEmpty,
        }
    }

    pub fn when_empty(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            predicate: Predicate::Empty,
        }
    }
}

/// A placed content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    pub kind: ElementKind,
    /// Page coordinates for page-level elements, group-relative for members.
    pub frame: Rect,
    #[serde(default)]
    pub style: ElementStyle,
    /// Stacking position among page-level items. Unused inside a group.
    pub z: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// A condition local to one group. Only ever hides members of that group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCondition {
    pub target: ElementId,
    pub condition: Condition,
}

/// A bounded box whose members are stacked vertically per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub frame: Rect,
    #[serde(default)]
    pub background: Background,
    /// Vertical gap between stacked members.
    #[serde(default)]
    pub spacing: f64,
    /// Members in stacking order.
    #[serde(default)]
    pub members: Vec<Element>,
    #[serde(default)]
    pub conditions: Vec<GroupCondition>,
    pub z: u64,
}

impl Group {
    pub fn member(&self, id: ElementId) -> Option<&Element> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn member_index(&self, id: ElementId) -> Option<usize> {
        self.members.iter().position(|m| m.id == id)
    }

    pub fn condition_for(&self, id: ElementId) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.target == id)
            .map(|c| &c.condition)
    }

    /// True when some member of this group reads `column`.
    pub fn binds_column(&self, column: &str) -> bool {
        self.members.iter().any(|m| m.kind.column() == Some(column))
    }
}

/// A page-level item in drawing order.
#[derive(Debug, Clone, Copy)]
pub enum Drawable<'a> {
    Element(&'a Element),
    Group(&'a Group),
}

impl<'a> Drawable<'a> {
    pub fn id(&self) -> ItemId {
        match self {
            Drawable::Element(e) => ItemId::Element(e.id),
            Drawable::Group(g) => ItemId::Group(g.id),
        }
    }

    pub fn z(&self) -> u64 {
        match self {
            Drawable::Element(e) => e.z,
            Drawable::Group(g) => g.z,
        }
    }

    pub fn frame(&self) -> Rect {
        match self {
            Drawable::Element(e) => e.frame,
            Drawable::Group(g) => g.frame,
        }
    }
}

/// The whole editable template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub(crate) page: Page,
    pub(crate) elements: BTreeMap<ElementId, Element>,
    pub(crate) groups: BTreeMap<GroupId, Group>,
    pub(crate) next_id: u64,
    pub(crate) next_z: u64,
}

impl Default for Template {
    fn default() -> Self {
        Self::new(Page::default())
    }
}

impl Template {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            elements: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_id: 1,
            next_z: 1,
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    /// Page-level elements, by id.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Find an element anywhere: on the page or inside a group.
    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements
            .get(&id)
            .or_else(|| self.groups.values().find_map(|g| g.member(id)))
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// The group owning `id`, or `None` for page-level or unknown elements.
    pub fn group_of(&self, id: ElementId) -> Option<&Group> {
        self.groups.values().find(|g| g.member(id).is_some())
    }

    /// Page-level elements and groups sorted bottom to top.
    pub fn drawables(&self) -> Vec<Drawable<'_>> {
        let mut items: Vec<Drawable<'_>> = self
            .elements
            .values()
            .map(Drawable::Element)
            .chain(self.groups.values().map(Drawable::Group))
            .collect();
        items.sort_by_key(|d| (d.z(), d.id()));
        items
    }

    /// Page-space frame of a page-level item.
    pub fn item_frame(&self, item: ItemId) -> Option<Rect> {
        match item {
            ItemId::Element(id) => self.elements.get(&id).map(|e| e.frame),
            ItemId::Group(id) => self.groups.get(&id).map(|g| g.frame),
        }
    }

    /// Every column any element or condition refers to.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut add = |e: &Element| {
            if let Some(c) = e.kind.column() {
                out.insert(c.to_string());
            }
            if let Some(cond) = &e.condition {
                out.insert(cond.column.clone());
            }
        };
        for e in self.elements.values() {
            add(e);
        }
        for g in self.groups.values() {
            for m in &g.members {
                add(m);
            }
        }
        for g in self.groups.values() {
            for c in &g.conditions {
                out.insert(c.condition.column.clone());
            }
        }
        out
    }

    /// Allocate a fresh element with default style. Not inserted; wrap it in
    /// [`Command::AddElement`] or [`Command::AddMember`].
    pub fn new_element(&mut self, kind: ElementKind, frame: Rect) -> Element {
        Element {
            id: ElementId(self.alloc_id()),
            kind,
            frame,
            style: ElementStyle::default(),
            z: self.alloc_z(),
            condition: None,
        }
    }

    /// Allocate a fresh, empty group. Not inserted.
    pub fn new_group(&mut self, name: impl Into<String>, frame: Rect) -> Group {
        Group {
            id: GroupId(self.alloc_id()),
            name: name.into(),
            frame,
            background: Background::Transparent,
            spacing: 0.0,
            members: Vec::new(),
            conditions: Vec::new(),
            z: self.alloc_z(),
        }
    }

    /// Name for the next group ("Group1", "Group2", ...).
    pub fn next_group_name(&self) -> String {
        let mut n = self.groups.len() + 1;
        loop {
            let name = format!("Group{}", n);
            if !self.groups.values().any(|g| g.name == name) {
                return name;
            }
            n += 1;
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn alloc_z(&mut self) -> u64 {
        let z = self.next_z;
        self.next_z += 1;
        z
    }

    fn id_in_use(&self, id: u64) -> bool {
        self.elements.contains_key(&ElementId(id))
            || self.groups.contains_key(&GroupId(id))
            || self
                .groups
                .values()
                .any(|g| g.members.iter().any(|m| m.id.0 == id))
    }

    /// Keep the allocators ahead of any id or z that entered from outside.
    fn note_allocated(&mut self, id: u64, z: u64) {
        self.next_id = self.next_id.max(id + 1);
        self.next_z = self.next_z.max(z + 1);
    }

    fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        if self.elements.contains_key(&id) {
            return self.elements.get_mut(&id);
        }
        self.groups
            .values_mut()
            .find_map(|g| g.members.iter_mut().find(|m| m.id == id))
    }
}
