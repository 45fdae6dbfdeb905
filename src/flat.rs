use indextree::NodeId;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::tree::{NodeStore, TreeNode};

/// Maps the expanded state of a row to an icon id. Presentational only.
pub type IconResolver = Rc<dyn Fn(bool) -> String>;

/// Shared handle to a flat node. Identity is `Rc` pointer identity.
pub type FlatRef = Rc<FlatNode>;

/// Projection of one stored tree node into the flat list.
pub struct FlatNode {
    label: String,
    level: usize,
    data: NodeId,
    expandable: Cell<bool>,
    loading: Cell<bool>,
    visible: Cell<bool>,
    icon: Option<IconResolver>,
}

impl FlatNode {
    pub fn new(label: impl Into<String>, level: usize, data: NodeId, expandable: bool) -> Self {
        Self {
            label: label.into(),
            level,
            data,
            expandable: Cell::new(expandable),
            loading: Cell::new(false),
            visible: Cell::new(true),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: IconResolver) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// The stored domain node this row represents.
    pub fn data(&self) -> NodeId {
        self.data
    }

    pub fn is_expandable(&self) -> bool {
        self.expandable.get()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn icon(&self, expanded: bool) -> Option<String> {
        self.icon.as_ref().map(|resolve| resolve(expanded))
    }

    /// De-duplication identity: same label over the same domain node.
    pub fn same_entry(&self, other: &FlatNode) -> bool {
        self.data == other.data && self.label == other.label
    }

    pub(crate) fn set_expandable(&self, expandable: bool) {
        self.expandable.set(expandable);
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.loading.set(loading);
    }

    pub(crate) fn set_visible(&self, visible: bool) {
        self.visible.set(visible);
    }
}

impl fmt::Debug for FlatNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatNode")
            .field("label", &self.label)
            .field("level", &self.level)
            .field("data", &self.data)
            .field("expandable", &self.expandable.get())
            .field("loading", &self.loading.get())
            .field("visible", &self.visible.get())
            .finish()
    }
}

type IconFactory = Rc<dyn Fn(&TreeNode) -> IconResolver>;
type ExpandablePredicate = Rc<dyn Fn(&TreeNode) -> bool>;

/// Turns the direct children of a node into flat nodes at one level.
///
/// Depth one only; recursion belongs to the engine. The two hooks are the
/// per-tree customization points.
#[derive(Clone, Default)]
pub struct Flattener {
    icons: Option<IconFactory>,
    expandable: Option<ExpandablePredicate>,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_icons<F>(mut self, factory: F) -> Self
    where
        F: Fn(&TreeNode) -> IconResolver + 'static,
    {
        self.icons = Some(Rc::new(factory));
        self
    }

    /// Override the "may have children" decision, which defaults to the
    /// node's container declaration.
    pub fn with_expandable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TreeNode) -> bool + 'static,
    {
        self.expandable = Some(Rc::new(predicate));
        self
    }

    pub fn flatten_node(&self, store: &NodeStore, id: NodeId, level: usize) -> Option<FlatRef> {
        let node = store.get(id)?;
        let declared = match &self.expandable {
            Some(predicate) => predicate(node),
            None => node.container,
        };
        // A fetch that came back empty proves the container is a leaf.
        let proven_leaf = store.is_fetched(id) && store.child_count(id) == 0;
        let mut flat = FlatNode::new(node.label.clone(), level, id, declared && !proven_leaf);
        if let Some(factory) = &self.icons {
            flat = flat.with_icon(factory(node));
        }
        Some(Rc::new(flat))
    }

    /// One flat node per child, in the given order.
    pub fn transform(&self, store: &NodeStore, children: &[NodeId], level: usize) -> Vec<FlatRef> {
        children
            .iter()
            .filter_map(|id| self.flatten_node(store, *id, level))
            .collect()
    }
}

/// Index one past the contiguous descendant block of `list[index]`.
pub fn descendant_end(list: &[FlatRef], index: usize) -> usize {
    let Some(node) = list.get(index) else {
        return list.len();
    };
    let level = node.level();
    list[index + 1..]
        .iter()
        .position(|other| other.level() <= level)
        .map(|offset| index + 1 + offset)
        .unwrap_or(list.len())
}

/// Index of the parent row of `list[index]`, found by scanning backward for
/// the nearest strictly lower level. A level-0 row is its own parent.
pub fn parent_index(list: &[FlatRef], index: usize) -> Option<usize> {
    let node = list.get(index)?;
    if node.level() == 0 {
        return Some(index);
    }
    list[..index]
        .iter()
        .rposition(|other| other.level() < node.level())
}
