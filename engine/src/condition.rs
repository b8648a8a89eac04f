//! # Visibility Evaluation
//!
//! Decides, for one data row, which elements take part in the document.
//! Page-level conditions and group conditions are evaluated independently:
//! a group condition only ever hides members of its own group and only reads
//! columns bound inside that group.

use std::collections::HashSet;

use crate::model::{Condition, Element, ElementId, ElementKind, Group, Predicate, Template};
use crate::source::Row;

/// The elements (page-level and members) included for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InclusionSet {
    included: HashSet<ElementId>,
}

impl InclusionSet {
    pub fn contains(&self, id: ElementId) -> bool {
        self.included.contains(&id)
    }

    pub fn insert(&mut self, id: ElementId) {
        self.included.insert(id);
    }

    pub fn remove(&mut self, id: ElementId) {
        self.included.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.included.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }

    /// Everything in `template` included, conditions ignored. Used by the
    /// designer when no row is selected.
    pub fn everything(template: &Template) -> Self {
        let mut included: HashSet<ElementId> = template.elements().map(|e| e.id).collect();
        for g in template.groups() {
            included.extend(g.members.iter().map(|m| m.id));
        }
        Self { included }
    }
}

/// True for a missing value or one that is blank after trimming.
pub fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Whether `predicate` holds for `value`.
pub fn predicate_holds(predicate: Predicate, value: Option<&str>) -> bool {
    match predicate {
        Predicate::Empty => is_blank(value),
        Predicate::NonEmpty => !is_blank(value),
    }
}

/// Evaluate `condition` against `row`. A column the row does not have makes
/// the condition malformed, which counts as not satisfied.
fn condition_holds(condition: &Condition, row: &Row, owner: ElementId) -> bool {
    match row.lookup(&condition.column) {
        Some(value) => predicate_holds(condition.predicate, value),
        None => {
            tracing::warn!(
                element = %owner,
                column = %condition.column,
                "condition refers to a column the row does not contain; element excluded"
            );
            false
        }
    }
}

fn page_element_included(element: &Element, row: &Row) -> bool {
    element
        .condition
        .as_ref()
        .map(|c| condition_holds(c, row, element.id))
        .unwrap_or(true)
}

fn member_included(group: &Group, member: &Element, row: &Row) -> bool {
    if let Some(condition) = group.condition_for(member.id) {
        if !group.binds_column(&condition.column) {
            tracing::warn!(
                group = %group.id,
                element = %member.id,
                column = %condition.column,
                "group condition refers to a column outside its group; member excluded"
            );
            return false;
        }
        if !condition_holds(condition, row, member.id) {
            return false;
        }
    }
    match &member.kind {
        // Empty fields collapse so the members below move up.
        ElementKind::BoundField { column } => !is_blank(row.lookup(column).flatten()),
        _ => true,
    }
}

/// Compute the inclusion set for `row`. Pure: equal inputs give equal sets.
pub fn evaluate(template: &Template, row: &Row) -> InclusionSet {
    let mut included = HashSet::new();
    for element in template.elements() {
        if page_element_included(element, row) {
            included.insert(element.id);
        }
    }
    for group in template.groups() {
        for member in &group.members {
            if member_included(group, member, row) {
                included.insert(member.id);
            }
        }
    }
    InclusionSet { included }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Command;
    use crate::transform::Rect;
    use proptest::prelude::*;

    fn bound(t: &mut Template, column: &str) -> Element {
        t.new_element(
            ElementKind::BoundField { column: column.into() },
            Rect::new(0.0, 0.0, 100.0, 20.0),
        )
    }

    fn row(pairs: &[(&str, Option<&str>)]) -> Row {
        pairs.iter().map(|(k, v)| (*k, v.map(str::to_string))).collect()
    }

    #[test]
    fn test_blank_values() {
        assert!(is_blank(None));
        assert!(is_blank(Some("")));
        assert!(is_blank(Some("  \t")));
        assert!(!is_blank(Some(" x ")));
    }

    #[test]
    fn test_page_condition() {
        let mut t = Template::default();
        let mut e = bound(&mut t, "B");
        e.condition = Some(Condition::when_filled("A"));
        let id = e.id;
        t.apply(Command::AddElement { element: e }).unwrap();

        let shown = evaluate(&t, &row(&[("A", Some("x")), ("B", Some("y"))]));
        assert!(shown.contains(id));
        let hidden = evaluate(&t, &row(&[("A", Some(" ")), ("B", Some("y"))]));
        assert!(!hidden.contains(id));
    }

    #[test]
    fn test_missing_column_excludes() {
        let mut t = Template::default();
        let mut e = bound(&mut t, "B");
        e.condition = Some(Condition::when_empty("Nope"));
        let id = e.id;
        t.apply(Command::AddElement { element: e }).unwrap();
        assert!(!evaluate(&t, &row(&[("B", Some("y"))])).contains(id));
    }

    #[test]
    fn test_group_condition_scoped_to_group() {
        let mut t = Template::default();
        let page_note = bound(&mut t, "Note");
        let page_id = page_note.id;
        t.apply(Command::AddElement { element: page_note }).unwrap();

        let g = t.new_group("g", Rect::new(0.0, 0.0, 200.0, 200.0));
        let gid = g.id;
        t.apply(Command::AddGroup { group: g }).unwrap();
        let flag = bound(&mut t, "Flag");
        t.apply(Command::AddMember { group: gid, element: flag, index: 0, condition: None })
            .unwrap();
        let note = bound(&mut t, "Note");
        let note_id = note.id;
        t.apply(Command::AddMember {
            group: gid,
            element: note,
            index: 1,
            condition: Some(Condition::when_filled("Flag")),
        })
        .unwrap();

        let r = row(&[("Flag", None), ("Note", Some("n"))]);
        let set = evaluate(&t, &r);
        assert!(!set.contains(note_id));
        assert!(set.contains(page_id));
    }

    #[test]
    fn test_group_condition_on_foreign_column_excludes() {
        let mut t = Template::default();
        let g = t.new_group("g", Rect::new(0.0, 0.0, 200.0, 200.0));
        let gid = g.id;
        t.apply(Command::AddGroup { group: g }).unwrap();
        let note = bound(&mut t, "Note");
        let note_id = note.id;
        t.apply(Command::AddMember {
            group: gid,
            element: note,
            index: 0,
            condition: Some(Condition::when_filled("Elsewhere")),
        })
        .unwrap();
        let r = row(&[("Elsewhere", Some("x")), ("Note", Some("n"))]);
        assert!(!evaluate(&t, &r).contains(note_id));
    }

    #[test]
    fn test_blank_bound_member_collapses() {
        let mut t = Template::default();
        let g = t.new_group("g", Rect::new(0.0, 0.0, 200.0, 200.0));
        let gid = g.id;
        t.apply(Command::AddGroup { group: g }).unwrap();
        let note = bound(&mut t, "Note");
        let note_id = note.id;
        t.apply(Command::AddMember { group: gid, element: note, index: 0, condition: None })
            .unwrap();
        assert!(!evaluate(&t, &row(&[("Note", Some(""))])).contains(note_id));
        assert!(evaluate(&t, &row(&[("Note", Some("x"))])).contains(note_id));
    }

    proptest! {
        #[test]
        fn prop_toggle_is_reversible(a in proptest::option::of("[ a-z]{0,4}"), b in proptest::option::of("[ a-z]{0,4}")) {
            let mut t = Template::default();
            let mut e = bound(&mut t, "B");
            e.condition = Some(Condition::when_empty("A"));
            t.apply(Command::AddElement { element: e }).unwrap();

            let before = evaluate(&t, &row(&[("A", a.as_deref()), ("B", Some("v"))]));
            let _ = evaluate(&t, &row(&[("A", b.as_deref()), ("B", Some("v"))]));
            let again = evaluate(&t, &row(&[("A", a.as_deref()), ("B", Some("v"))]));
            prop_assert_eq!(before, again);
        }

        #[test]
        fn prop_empty_and_non_empty_are_complementary(v in proptest::option::of(".{0,6}")) {
            prop_assert_ne!(
                predicate_holds(Predicate::Empty, v.as_deref()),
                predicate_holds(Predicate::NonEmpty, v.as_deref())
            );
        }
    }
}
