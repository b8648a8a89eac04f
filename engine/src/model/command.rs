//! Reversible template mutations.
//!
//! [`Template::apply`] validates a command, performs it and returns the
//! command that undoes it. A rejected command leaves the template untouched.

use thiserror::Error;

use super::*;
use crate::style::Color;
use crate::transform::Point;

/// Every way the template can change.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AddElement { element: Element },
    RemoveElement { id: ElementId },
    /// Move a page element (page coordinates) or a member (group-relative).
    MoveElement { id: ElementId, to: Point },
    /// Change an element's box. Never touches the font size.
    ResizeElement { id: ElementId, size: Size },
    RestyleElement { id: ElementId, style: ElementStyle },
    SetContent { id: ElementId, kind: ElementKind },
    /// Visibility condition of a page-level element.
    SetCondition {
        id: ElementId,
        condition: Option<Condition>,
    },
    Reorder { item: ItemId, step: ZStep },
    RestoreZ { order: Vec<(ItemId, u64)> },
    AddGroup { group: Group },
    RemoveGroup { id: GroupId },
    MoveGroup { id: GroupId, to: Point },
    ResizeGroup { id: GroupId, size: Size },
    RestyleGroup { id: GroupId, appearance: GroupAppearance },
    AddMember {
        group: GroupId,
        element: Element,
        index: usize,
        condition: Option<Condition>,
    },
    RemoveMember { group: GroupId, member: ElementId },
    SetGroupCondition {
        group: GroupId,
        target: ElementId,
        condition: Option<Condition>,
    },
    SetPageSize { size: Size },
    /// Several commands applied as one undo step.
    Batch(Vec<Command>),
}

/// Direction of a z-order change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZStep {
    Forward,
    Backward,
    ToFront,
    ToBack,
}

/// The non-geometric attributes of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAppearance {
    pub name: String,
    pub background: Background,
    pub spacing: f64,
}

impl GroupAppearance {
    pub fn of(group: &Group) -> Self {
        Self {
            name: group.name.clone(),
            background: group.background,
            spacing: group.spacing,
        }
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("unknown {0}")]
    UnknownElement(ElementId),
    #[error("unknown {0}")]
    UnknownGroup(GroupId),
    #[error("id {0} is already in use")]
    DuplicateId(u64),
    #[error("invalid size {width} x {height}: both dimensions must be positive")]
    InvalidSize { width: f64, height: f64 },
    #[error("coordinates must be finite numbers")]
    NonFinite,
    #[error("column reference must not be empty")]
    EmptyColumn,
    #[error("font size {0} must be positive")]
    InvalidFontSize(f64),
    #[error("color channels must be finite numbers between 0 and 1")]
    InvalidColor,
    #[error("group spacing {0} must not be negative")]
    InvalidSpacing(f64),
    #[error("{member} is not a member of {group}")]
    NotAMember { group: GroupId, member: ElementId },
    #[error("member index {index} out of range for {group}")]
    MemberIndex { group: GroupId, index: usize },
    #[error("{0} belongs to a group; reorder it inside the group instead")]
    NotReorderable(ElementId),
    #[error("{0} belongs to a group; use a group condition instead")]
    MemberCondition(ElementId),
}

fn check_point(p: Point) -> Result<(), ModelError> {
    if p.x.is_finite() && p.y.is_finite() {
        Ok(())
    } else {
        Err(ModelError::NonFinite)
    }
}

fn check_size(s: Size) -> Result<(), ModelError> {
    if !s.width.is_finite() || !s.height.is_finite() {
        return Err(ModelError::NonFinite);
    }
    if s.width <= 0.0 || s.height <= 0.0 {
        return Err(ModelError::InvalidSize {
            width: s.width,
            height: s.height,
        });
    }
    Ok(())
}

fn check_frame(r: &Rect) -> Result<(), ModelError> {
    check_point(r.origin())?;
    check_size(r.size())
}

fn check_style(style: &ElementStyle) -> Result<(), ModelError> {
    let size = style.font.size;
    if !size.is_finite() || size <= 0.0 {
        return Err(ModelError::InvalidFontSize(size));
    }
    check_color(&style.color)?;
    check_background(&style.background)
}

fn check_color(color: &Color) -> Result<(), ModelError> {
    if color.is_valid() {
        Ok(())
    } else {
        Err(ModelError::InvalidColor)
    }
}

fn check_background(background: &Background) -> Result<(), ModelError> {
    match background {
        Background::Solid(c) => check_color(c),
        Background::Transparent => Ok(()),
    }
}

fn check_kind(kind: &ElementKind) -> Result<(), ModelError> {
    match kind.column() {
        Some(c) if c.trim().is_empty() => Err(ModelError::EmptyColumn),
        _ => Ok(()),
    }
}

fn check_condition(condition: Option<&Condition>) -> Result<(), ModelError> {
    match condition {
        Some(c) if c.column.trim().is_empty() => Err(ModelError::EmptyColumn),
        _ => Ok(()),
    }
}

fn check_element(e: &Element) -> Result<(), ModelError> {
    check_frame(&e.frame)?;
    check_style(&e.style)?;
    check_kind(&e.kind)?;
    check_condition(e.condition.as_ref())
}

fn check_spacing(spacing: f64) -> Result<(), ModelError> {
    if !spacing.is_finite() {
        return Err(ModelError::NonFinite);
    }
    if spacing < 0.0 {
        return Err(ModelError::InvalidSpacing(spacing));
    }
    Ok(())
}

impl Template {
    /// Perform `cmd` and return its inverse.
    pub fn apply(&mut self, cmd: Command) -> Result<Command, ModelError> {
        match cmd {
            Command::AddElement { element } => {
                check_element(&element)?;
                if self.id_in_use(element.id.0) {
                    return Err(ModelError::DuplicateId(element.id.0));
                }
                let id = element.id;
                self.note_allocated(element.id.0, element.z);
                self.elements.insert(id, element);
                Ok(Command::RemoveElement { id })
            }

            Command::RemoveElement { id } => {
                if let Some(group) = self.group_of(id).map(|g| g.id) {
                    return self.apply(Command::RemoveMember { group, member: id });
                }
                let element = self.elements.remove(&id).ok_or(ModelError::UnknownElement(id))?;
                Ok(Command::AddElement { element })
            }

            Command::MoveElement { id, to } => {
                check_point(to)?;
                let element = self.element_mut(id).ok_or(ModelError::UnknownElement(id))?;
                let from = element.frame.origin();
                element.frame = element.frame.with_origin(to);
                Ok(Command::MoveElement { id, to: from })
            }

            Command::ResizeElement { id, size } => {
                check_size(size)?;
                let element = self.element_mut(id).ok_or(ModelError::UnknownElement(id))?;
                let old = element.frame.size();
                element.frame = element.frame.with_size(size);
                Ok(Command::ResizeElement { id, size: old })
            }

            Command::RestyleElement { id, style } => {
                check_style(&style)?;
                let element = self.element_mut(id).ok_or(ModelError::UnknownElement(id))?;
                let old = std::mem::replace(&mut element.style, style);
                Ok(Command::RestyleElement { id, style: old })
            }

            Command::SetContent { id, kind } => {
                check_kind(&kind)?;
                let element = self.element_mut(id).ok_or(ModelError::UnknownElement(id))?;
                let old = std::mem::replace(&mut element.kind, kind);
                Ok(Command::SetContent { id, kind: old })
            }

            Command::SetCondition { id, condition } => {
                check_condition(condition.as_ref())?;
                if self.group_of(id).is_some() {
                    return Err(ModelError::MemberCondition(id));
                }
                let element = self.elements.get_mut(&id).ok_or(ModelError::UnknownElement(id))?;
                let old = std::mem::replace(&mut element.condition, condition);
                Ok(Command::SetCondition { id, condition: old })
            }

            Command::Reorder { item, step } => self.reorder(item, step),

            Command::RestoreZ { order } => {
                for (item, _) in &order {
                    self.check_item(*item)?;
                }
                let mut previous = Vec::with_capacity(order.len());
                for (item, z) in order {
                    previous.push((item, self.set_z(item, z)));
                    self.next_z = self.next_z.max(z + 1);
                }
                Ok(Command::RestoreZ { order: previous })
            }

            Command::AddGroup { group } => {
                check_frame(&group.frame)?;
                check_spacing(group.spacing)?;
                check_background(&group.background)?;
                if self.id_in_use(group.id.0) {
                    return Err(ModelError::DuplicateId(group.id.0));
                }
                let mut seen = std::collections::HashSet::new();
                for m in &group.members {
                    check_element(m)?;
                    if m.id.0 == group.id.0 || self.id_in_use(m.id.0) || !seen.insert(m.id) {
                        return Err(ModelError::DuplicateId(m.id.0));
                    }
                }
                for c in &group.conditions {
                    check_condition(Some(&c.condition))?;
                    if group.member(c.target).is_none() {
                        return Err(ModelError::NotAMember {
                            group: group.id,
                            member: c.target,
                        });
                    }
                }
                let id = group.id;
                self.note_allocated(id.0, group.z);
                for m in &group.members {
                    self.next_id = self.next_id.max(m.id.0 + 1);
                }
                self.groups.insert(id, group);
                Ok(Command::RemoveGroup { id })
            }

            Command::RemoveGroup { id } => {
                let group = self.groups.remove(&id).ok_or(ModelError::UnknownGroup(id))?;
                Ok(Command::AddGroup { group })
            }

            Command::MoveGroup { id, to } => {
                check_point(to)?;
                let group = self.groups.get_mut(&id).ok_or(ModelError::UnknownGroup(id))?;
                let from = group.frame.origin();
                group.frame = group.frame.with_origin(to);
                Ok(Command::MoveGroup { id, to: from })
            }

            Command::ResizeGroup { id, size } => {
                check_size(size)?;
                let group = self.groups.get_mut(&id).ok_or(ModelError::UnknownGroup(id))?;
                let old = group.frame.size();
                group.frame = group.frame.with_size(size);
                Ok(Command::ResizeGroup { id, size: old })
            }

            Command::RestyleGroup { id, appearance } => {
                check_spacing(appearance.spacing)?;
                check_background(&appearance.background)?;
                let group = self.groups.get_mut(&id).ok_or(ModelError::UnknownGroup(id))?;
                let old = GroupAppearance::of(group);
                group.name = appearance.name;
                group.background = appearance.background;
                group.spacing = appearance.spacing;
                Ok(Command::RestyleGroup { id, appearance: old })
            }

            Command::AddMember {
                group,
                element,
                index,
                condition,
            } => {
                check_element(&element)?;
                check_condition(condition.as_ref())?;
                if self.id_in_use(element.id.0) {
                    return Err(ModelError::DuplicateId(element.id.0));
                }
                let g = self.groups.get(&group).ok_or(ModelError::UnknownGroup(group))?;
                if index > g.members.len() {
                    return Err(ModelError::MemberIndex { group, index });
                }
                self.note_allocated(element.id.0, element.z);
                let member = element.id;
                let g = self.groups.get_mut(&group).ok_or(ModelError::UnknownGroup(group))?;
                g.members.insert(index, element);
                if let Some(condition) = condition {
                    g.conditions.push(GroupCondition {
                        target: member,
                        condition,
                    });
                }
                Ok(Command::RemoveMember { group, member })
            }

            Command::RemoveMember { group, member } => {
                let g = self.groups.get_mut(&group).ok_or(ModelError::UnknownGroup(group))?;
                let index = g
                    .member_index(member)
                    .ok_or(ModelError::NotAMember { group, member })?;
                let element = g.members.remove(index);
                let condition = g
                    .conditions
                    .iter()
                    .position(|c| c.target == member)
                    .map(|pos| g.conditions.remove(pos).condition);
                Ok(Command::AddMember {
                    group,
                    element,
                    index,
                    condition,
                })
            }

            Command::SetGroupCondition {
                group,
                target,
                condition,
            } => {
                check_condition(condition.as_ref())?;
                let g = self.groups.get_mut(&group).ok_or(ModelError::UnknownGroup(group))?;
                if g.member(target).is_none() {
                    return Err(ModelError::NotAMember {
                        group,
                        member: target,
                    });
                }
                let old = g
                    .conditions
                    .iter()
                    .position(|c| c.target == target)
                    .map(|pos| g.conditions.remove(pos).condition);
                if let Some(condition) = condition {
                    g.conditions.push(GroupCondition { target, condition });
                }
                Ok(Command::SetGroupCondition {
                    group,
                    target,
                    condition: old,
                })
            }

            Command::SetPageSize { size } => {
                check_size(size)?;
                let old = self.page.size();
                self.page = Page {
                    width: size.width,
                    height: size.height,
                };
                Ok(Command::SetPageSize { size: old })
            }

            Command::Batch(commands) => {
                let mut inverses = Vec::with_capacity(commands.len());
                for cmd in commands {
                    match self.apply(cmd) {
                        Ok(inverse) => inverses.push(inverse),
                        Err(e) => {
                            for inverse in inverses.into_iter().rev() {
                                // Inverses of commands that just succeeded cannot fail.
                                let _ = self.apply(inverse);
                            }
                            return Err(e);
                        }
                    }
                }
                inverses.reverse();
                Ok(Command::Batch(inverses))
            }
        }
    }

    fn check_item(&self, item: ItemId) -> Result<(), ModelError> {
        match item {
            ItemId::Element(id) if self.elements.contains_key(&id) => Ok(()),
            ItemId::Element(id) if self.group_of(id).is_some() => Err(ModelError::NotReorderable(id)),
            ItemId::Element(id) => Err(ModelError::UnknownElement(id)),
            ItemId::Group(id) if self.groups.contains_key(&id) => Ok(()),
            ItemId::Group(id) => Err(ModelError::UnknownGroup(id)),
        }
    }

    /// Set an item's z and return the old one. The item must exist.
    fn set_z(&mut self, item: ItemId, z: u64) -> u64 {
        match item {
            ItemId::Element(id) => self
                .elements
                .get_mut(&id)
                .map(|e| std::mem::replace(&mut e.z, z))
                .unwrap_or(z),
            ItemId::Group(id) => self
                .groups
                .get_mut(&id)
                .map(|g| std::mem::replace(&mut g.z, z))
                .unwrap_or(z),
        }
    }

    /// Move `item` within the stacking order. The set of z values in use is
    /// unchanged; they are just redistributed, so ties can never appear.
    fn reorder(&mut self, item: ItemId, step: ZStep) -> Result<Command, ModelError> {
        self.check_item(item)?;
        let order: Vec<(ItemId, u64)> = self.drawables().iter().map(|d| (d.id(), d.z())).collect();
        let zs: Vec<u64> = order.iter().map(|(_, z)| *z).collect();
        let mut ids: Vec<ItemId> = order.iter().map(|(id, _)| *id).collect();
        let Some(pos) = ids.iter().position(|id| *id == item) else {
            return Ok(Command::RestoreZ { order: Vec::new() });
        };
        let last = ids.len() - 1;
        let target = match step {
            ZStep::Forward => (pos + 1).min(last),
            ZStep::Backward => pos.saturating_sub(1),
            ZStep::ToFront => last,
            ZStep::ToBack => 0,
        };
        let moved = ids.remove(pos);
        ids.insert(target, moved);

        let mut previous = Vec::new();
        for (id, z) in ids.into_iter().zip(zs) {
            let old = self.set_z(id, z);
            if old != z {
                previous.push((id, old));
            }
        }
        Ok(Command::RestoreZ { order: previous })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::FontSizing;

    fn text(t: &mut Template, s: &str) -> ElementId {
        let e = t.new_element(
            ElementKind::StaticText { text: s.into() },
            Rect::new(10.0, 10.0, 100.0, 40.0),
        );
        let id = e.id;
        t.apply(Command::AddElement { element: e }).unwrap();
        id
    }

    #[test]
    fn test_rejects_color_outside_unit_range() {
        let mut t = Template::default();
        let id = text(&mut t, "a");
        let original = t.element(id).unwrap().style.clone();

        let mut style = t.element(id).unwrap().style.clone();
        style.color.r = f64::NAN;
        let err = t.apply(Command::RestyleElement { id, style }).unwrap_err();
        assert_eq!(err, ModelError::InvalidColor);

        let mut style = t.element(id).unwrap().style.clone();
        style.background = Background::Solid(Color::rgb(0.5, f64::INFINITY, 0.0));
        assert_eq!(
            t.apply(Command::RestyleElement { id, style }).unwrap_err(),
            ModelError::InvalidColor
        );

        let mut e = t.new_element(ElementKind::StaticText { text: "b".into() }, Rect::new(0.0, 0.0, 10.0, 10.0));
        e.style.color = Color::rgb(1.5, 0.0, 0.0);
        assert_eq!(t.apply(Command::AddElement { element: e }).unwrap_err(), ModelError::InvalidColor);
        assert_eq!(t.elements().count(), 1);
        assert_eq!(t.element(id).unwrap().style, original);
    }

    #[test]
    fn test_rejects_invalid_group_background() {
        let mut t = Template::default();
        let mut g = t.new_group("G", Rect::new(0.0, 0.0, 100.0, 100.0));
        g.background = Background::Solid(Color::rgb(-0.1, 0.0, 0.0));
        assert_eq!(t.apply(Command::AddGroup { group: g.clone() }).unwrap_err(), ModelError::InvalidColor);

        g.background = Background::Transparent;
        let id = g.id;
        t.apply(Command::AddGroup { group: g }).unwrap();
        let mut appearance = GroupAppearance::of(t.group(id).unwrap());
        appearance.background = Background::Solid(Color { a: f64::NAN, ..Color::WHITE });
        assert_eq!(
            t.apply(Command::RestyleGroup { id, appearance }).unwrap_err(),
            ModelError::InvalidColor
        );
        assert_eq!(t.group(id).unwrap().background, Background::Transparent);
    }

    #[test]
    fn test_move_returns_inverse() {
        let mut t = Template::default();
        let id = text(&mut t, "a");
        let inverse = t
            .apply(Command::MoveElement { id, to: Point::new(50.0, 60.0) })
            .unwrap();
        assert_eq!(t.element(id).unwrap().frame.origin(), Point::new(50.0, 60.0));
        t.apply(inverse).unwrap();
        assert_eq!(t.element(id).unwrap().frame.origin(), Point::new(10.0, 10.0));
    }

    #[test]
    fn test_resize_rejects_non_positive_sizes() {
        let mut t = Template::default();
        let id = text(&mut t, "a");
        let before = t.clone();
        let err = t
            .apply(Command::ResizeElement { id, size: Size::new(-5.0, 10.0) })
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidSize { .. }));
        assert_eq!(t, before);
    }

    #[test]
    fn test_resize_keeps_pinned_font_size() {
        let mut t = Template::default();
        let id = text(&mut t, "a");
        let mut style = t.element(id).unwrap().style.clone();
        style.font.size = 31.0;
        style.font.sizing = FontSizing::Pinned;
        t.apply(Command::RestyleElement { id, style }).unwrap();
        t.apply(Command::ResizeElement { id, size: Size::new(20.0, 10.0) }).unwrap();
        let font = &t.element(id).unwrap().style.font;
        assert_eq!(font.size, 31.0);
        assert_eq!(font.sizing, FontSizing::Pinned);
    }

    #[test]
    fn test_reorder_swaps_and_restores() {
        let mut t = Template::default();
        let a = text(&mut t, "a");
        let b = text(&mut t, "b");
        let c = text(&mut t, "c");
        let inverse = t
            .apply(Command::Reorder { item: a.into(), step: ZStep::ToFront })
            .unwrap();
        let order: Vec<ItemId> = t.drawables().iter().map(|d| d.id()).collect();
        assert_eq!(order, vec![b.into(), c.into(), a.into()]);
        t.apply(inverse).unwrap();
        let order: Vec<ItemId> = t.drawables().iter().map(|d| d.id()).collect();
        assert_eq!(order, vec![a.into(), b.into(), c.into()]);
    }

    #[test]
    fn test_reorder_never_creates_ties() {
        let mut t = Template::default();
        let a = text(&mut t, "a");
        text(&mut t, "b");
        t.apply(Command::Reorder { item: a.into(), step: ZStep::Forward }).unwrap();
        t.apply(Command::Reorder { item: a.into(), step: ZStep::Forward }).unwrap();
        let zs: Vec<u64> = t.drawables().iter().map(|d| d.z()).collect();
        assert_eq!(zs.len(), 2);
        assert_ne!(zs[0], zs[1]);
    }

    #[test]
    fn test_remove_group_keeps_page_element() {
        let mut t = Template::default();
        let page_el = t.new_element(
            ElementKind::BoundField { column: "Note".into() },
            Rect::new(0.0, 0.0, 50.0, 20.0),
        );
        let page_id = page_el.id;
        t.apply(Command::AddElement { element: page_el }).unwrap();

        let group = t.new_group("g", Rect::new(100.0, 100.0, 200.0, 200.0));
        let gid = group.id;
        t.apply(Command::AddGroup { group }).unwrap();
        let member = t.new_element(
            ElementKind::BoundField { column: "Note".into() },
            Rect::new(0.0, 0.0, 50.0, 20.0),
        );
        let member_id = member.id;
        t.apply(Command::AddMember { group: gid, element: member, index: 0, condition: None })
            .unwrap();
        assert_ne!(member_id, page_id);

        let inverse = t.apply(Command::RemoveGroup { id: gid }).unwrap();
        assert!(t.element(page_id).is_some());
        assert!(t.element(member_id).is_none());
        t.apply(inverse).unwrap();
        assert!(t.element(member_id).is_some());
    }

    #[test]
    fn test_remove_member_restores_condition() {
        let mut t = Template::default();
        let group = t.new_group("g", Rect::new(0.0, 0.0, 200.0, 200.0));
        let gid = group.id;
        t.apply(Command::AddGroup { group }).unwrap();
        let member = t.new_element(
            ElementKind::BoundField { column: "B".into() },
            Rect::new(0.0, 0.0, 50.0, 20.0),
        );
        let mid = member.id;
        t.apply(Command::AddMember {
            group: gid,
            element: member,
            index: 0,
            condition: Some(Condition::when_filled("A")),
        })
        .unwrap();
        let inverse = t.apply(Command::RemoveMember { group: gid, member: mid }).unwrap();
        assert!(t.group(gid).unwrap().conditions.is_empty());
        t.apply(inverse).unwrap();
        assert_eq!(
            t.group(gid).unwrap().condition_for(mid),
            Some(&Condition::when_filled("A"))
        );
    }

    #[test]
    fn test_member_condition_must_go_through_group() {
        let mut t = Template::default();
        let group = t.new_group("g", Rect::new(0.0, 0.0, 200.0, 200.0));
        let gid = group.id;
        t.apply(Command::AddGroup { group }).unwrap();
        let member = t.new_element(
            ElementKind::BoundField { column: "B".into() },
            Rect::new(0.0, 0.0, 50.0, 20.0),
        );
        let mid = member.id;
        t.apply(Command::AddMember { group: gid, element: member, index: 0, condition: None })
            .unwrap();
        let err = t
            .apply(Command::SetCondition { id: mid, condition: Some(Condition::when_empty("A")) })
            .unwrap_err();
        assert_eq!(err, ModelError::MemberCondition(mid));
    }

    #[test]
    fn test_failed_batch_rolls_back() {
        let mut t = Template::default();
        let a = text(&mut t, "a");
        let before = t.clone();
        let err = t.apply(Command::Batch(vec![
            Command::MoveElement { id: a, to: Point::new(1.0, 2.0) },
            Command::MoveElement { id: ElementId(999), to: Point::new(1.0, 2.0) },
        ]));
        assert!(err.is_err());
        assert_eq!(t, before);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut t = Template::default();
        let a = text(&mut t, "a");
        let copy = t.element(a).unwrap().clone();
        assert_eq!(
            t.apply(Command::AddElement { element: copy }),
            Err(ModelError::DuplicateId(a.0))
        );
    }
}
