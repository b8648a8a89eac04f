//! Vertical stacking of group members.
//!
//! Included members are placed top to bottom in definition order, each at its
//! own horizontal offset. Excluded members take no space, so whatever follows
//! them moves up. Every placement is clipped to the group box.

use crate::condition::InclusionSet;
use crate::model::{ElementId, Group};
use crate::transform::Rect;

/// Where one member lands for the current row, relative to the group box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub member: ElementId,
    /// The member's full box at its stacked position.
    pub frame: Rect,
    /// The visible part of `frame`, always inside the group box.
    pub clip: Rect,
}

/// Stack the included members of `group`.
pub fn stack_group(group: &Group, inclusion: &InclusionSet) -> Vec<Placement> {
    let bounds = Rect::new(0.0, 0.0, group.frame.width, group.frame.height);
    let spacing = group.spacing.max(0.0);
    let mut cursor = 0.0;
    let mut placements = Vec::new();

    for member in &group.members {
        if !inclusion.contains(member.id) {
            continue;
        }
        let frame = Rect::new(member.frame.x, cursor, member.frame.width, member.frame.height);
        cursor += member.frame.height + spacing;

        match frame.intersection(&bounds) {
            Some(clip) => placements.push(Placement {
                member: member.id,
                frame,
                clip,
            }),
            None => tracing::debug!(
                group = %group.id,
                member = %member.id,
                "member falls outside the group box"
            ),
        }
    }
    placements
}
