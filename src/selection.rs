use std::rc::Rc;
use tracing::trace;

use crate::events::{EventBus, Subscription};
use crate::flat::FlatRef;

/// Keyboard modifiers held during a pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    /// Cmd on macOS; treated like ctrl.
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        meta: false,
        shift: false,
    };

    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }

    pub fn shift() -> Self {
        Self {
            shift: true,
            ..Self::NONE
        }
    }

    fn toggles(&self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    Click(Modifiers),
    /// A drag began on this row; it joins the selection without clearing it.
    DragStart,
}

/// Ordered multi-selection over flat rows.
///
/// Shift ranges are taken in rendered order between the anchor and the
/// picked row. The anchor is the last row added without shift (plain pick,
/// ctrl pick or drag start) and survives range picks, so consecutive shift
/// picks pivot around the same row.
#[derive(Default)]
pub struct SelectionModel {
    selected: Vec<FlatRef>,
    anchor: Option<FlatRef>,
    changes: EventBus<Vec<FlatRef>>,
}

impl SelectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// New selections are published here after every change.
    pub fn subscribe(&mut self) -> Subscription<Vec<FlatRef>> {
        self.changes.subscribe()
    }

    pub fn selection(&self) -> &[FlatRef] {
        &self.selected
    }

    pub fn anchor(&self) -> Option<&FlatRef> {
        self.anchor.as_ref()
    }

    pub fn is_selected(&self, node: &FlatRef) -> bool {
        self.selected.iter().any(|entry| entry.same_entry(node))
    }

    /// Apply a pick on `node` against the currently `rendered` rows.
    pub fn pick(&mut self, node: &FlatRef, pick: Pick, rendered: &[FlatRef]) {
        match pick {
            Pick::DragStart => {
                if self.is_selected(node) {
                    return;
                }
                self.selected.push(Rc::clone(node));
                self.anchor = Some(Rc::clone(node));
            }
            Pick::Click(modifiers) if modifiers.shift => self.select_range(node, rendered),
            Pick::Click(modifiers) if modifiers.toggles() => self.toggle(node),
            Pick::Click(_) => {
                self.selected = vec![Rc::clone(node)];
                self.anchor = Some(Rc::clone(node));
            }
        }
        trace!(
            event = "selection.pick",
            label = node.label(),
            ?pick,
            selected = self.selected.len()
        );
        self.publish();
    }

    /// Point entries for a re-flattened row at its replacement.
    pub fn replace(&mut self, old: &FlatRef, new: &FlatRef) {
        let mut changed = false;
        for entry in self.selected.iter_mut().chain(self.anchor.iter_mut()) {
            if Rc::ptr_eq(entry, old) {
                *entry = Rc::clone(new);
                changed = true;
            }
        }
        if changed {
            self.publish();
        }
    }

    /// Drop entries with no row in `list`, rebinding survivors to the rows
    /// currently in it.
    pub fn retain_present(&mut self, list: &[FlatRef]) {
        let rebind = |entry: &FlatRef| list.iter().find(|row| row.same_entry(entry)).cloned();
        let before = self.selected.len();
        self.selected = self.selected.iter().filter_map(rebind).collect();
        self.anchor = self.anchor.as_ref().and_then(rebind);
        if self.selected.len() != before {
            self.publish();
        }
    }

    pub fn clear(&mut self) {
        if self.selected.is_empty() {
            return;
        }
        self.selected.clear();
        self.anchor = None;
        self.publish();
    }

    fn select_range(&mut self, node: &FlatRef, rendered: &[FlatRef]) {
        let Some(anchor) = self.anchor.clone().or_else(|| self.selected.last().cloned()) else {
            self.selected = vec![Rc::clone(node)];
            self.anchor = Some(Rc::clone(node));
            return;
        };
        let position = |target: &FlatRef| rendered.iter().position(|row| row.same_entry(target));
        match (position(&anchor), position(node)) {
            (Some(from), Some(to)) => {
                let (start, end) = if from <= to { (from, to) } else { (to, from) };
                self.selected = rendered[start..=end].to_vec();
                self.anchor = Some(anchor);
            }
            _ => {
                self.selected = vec![Rc::clone(node)];
                self.anchor = Some(Rc::clone(node));
            }
        }
    }

    fn toggle(&mut self, node: &FlatRef) {
        let existing = self
            .selected
            .iter()
            .position(|entry| entry.same_entry(node) && entry.level() == node.level());
        match existing {
            Some(index) => {
                let removed = self.selected.remove(index);
                if self.anchor.as_ref().is_some_and(|a| a.same_entry(&removed)) {
                    self.anchor = self.selected.last().cloned();
                }
            }
            None => {
                self.selected.push(Rc::clone(node));
                self.anchor = Some(Rc::clone(node));
            }
        }
    }

    fn publish(&mut self) {
        self.changes.publish(self.selected.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatNode;
    use indextree::Arena;

    /// `[A(0), B(1), C(1), D(1), E(0)]`
    fn rows() -> Vec<FlatRef> {
        let mut arena = Arena::new();
        [("A", 0), ("B", 1), ("C", 1), ("D", 1), ("E", 0)]
            .iter()
            .map(|(label, level)| Rc::new(FlatNode::new(*label, *level, arena.new_node(()), false)))
            .collect()
    }

    fn labels(model: &SelectionModel) -> Vec<&str> {
        model.selection().iter().map(|row| row.label()).collect()
    }

    #[test]
    fn test_plain_shift_ctrl_scenario() {
        let rows = rows();
        let mut model = SelectionModel::new();

        model.pick(&rows[1], Pick::Click(Modifiers::NONE), &rows);
        assert_eq!(labels(&model), vec!["B"]);

        model.pick(&rows[3], Pick::Click(Modifiers::shift()), &rows);
        assert_eq!(labels(&model), vec!["B", "C", "D"]);

        model.pick(&rows[1], Pick::Click(Modifiers::ctrl()), &rows);
        assert_eq!(labels(&model), vec!["C", "D"]);
    }

    #[test]
    fn test_shift_on_empty_selection() {
        let rows = rows();
        let mut model = SelectionModel::new();
        model.pick(&rows[2], Pick::Click(Modifiers::shift()), &rows);
        assert_eq!(labels(&model), vec!["C"]);
    }

    #[test]
    fn test_shift_range_is_in_rendered_order_and_keeps_anchor() {
        let rows = rows();
        let mut model = SelectionModel::new();
        model.pick(&rows[3], Pick::Click(Modifiers::NONE), &rows);

        model.pick(&rows[0], Pick::Click(Modifiers::shift()), &rows);
        assert_eq!(labels(&model), vec!["A", "B", "C", "D"]);

        model.pick(&rows[4], Pick::Click(Modifiers::shift()), &rows);
        assert_eq!(labels(&model), vec!["D", "E"]);
        assert_eq!(model.anchor().map(|a| a.label()), Some("D"));
    }

    #[test]
    fn test_ctrl_and_meta_toggle() {
        let rows = rows();
        let mut model = SelectionModel::new();
        model.pick(&rows[0], Pick::Click(Modifiers::ctrl()), &rows);
        let meta = Modifiers {
            meta: true,
            ..Modifiers::NONE
        };
        model.pick(&rows[4], Pick::Click(meta), &rows);
        assert_eq!(labels(&model), vec!["A", "E"]);

        model.pick(&rows[4], Pick::Click(meta), &rows);
        assert_eq!(labels(&model), vec!["A"]);
    }

    #[test]
    fn test_drag_start_appends_once() {
        let rows = rows();
        let mut model = SelectionModel::new();
        model.pick(&rows[0], Pick::Click(Modifiers::NONE), &rows);

        model.pick(&rows[2], Pick::DragStart, &rows);
        model.pick(&rows[2], Pick::DragStart, &rows);
        model.pick(&rows[0], Pick::DragStart, &rows);

        assert_eq!(labels(&model), vec!["A", "C"]);
    }

    #[test]
    fn test_drag_start_moves_anchor() {
        let rows = rows();
        let mut model = SelectionModel::new();
        model.pick(&rows[0], Pick::Click(Modifiers::NONE), &rows);
        model.pick(&rows[2], Pick::DragStart, &rows);
        assert_eq!(model.anchor().map(|a| a.label()), Some("C"));

        model.pick(&rows[4], Pick::Click(Modifiers::shift()), &rows);
        assert_eq!(labels(&model), vec!["C", "D", "E"]);
    }

    #[test]
    fn test_equality_is_label_and_node() {
        let rows = rows();
        let mut model = SelectionModel::new();
        model.pick(&rows[1], Pick::Click(Modifiers::NONE), &rows);

        // A fresh row for the same node after re-flattening.
        let twin: FlatRef = Rc::new(FlatNode::new("B", 1, rows[1].data(), false));
        assert!(model.is_selected(&twin));
        model.pick(&twin, Pick::DragStart, &rows);
        assert_eq!(model.selection().len(), 1);
    }

    #[test]
    fn test_replace_and_retain() {
        let mut rows = rows();
        let mut model = SelectionModel::new();
        let changes = model.subscribe();
        model.pick(&rows[1], Pick::Click(Modifiers::NONE), &rows);
        model.pick(&rows[2], Pick::Click(Modifiers::ctrl()), &rows);

        let renamed: FlatRef = Rc::new(FlatNode::new("B2", 1, rows[1].data(), false));
        model.replace(&rows[1], &renamed);
        rows[1] = Rc::clone(&renamed);
        assert_eq!(labels(&model), vec!["B2", "C"]);

        rows.remove(2);
        model.retain_present(&rows);
        assert_eq!(labels(&model), vec!["B2"]);

        model.clear();
        assert!(model.selection().is_empty());

        let published: Vec<usize> = changes.drain().iter().map(Vec::len).collect();
        assert_eq!(published, vec![1, 2, 2, 1, 0]);
    }
}
