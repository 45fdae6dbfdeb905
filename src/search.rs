use indextree::NodeId;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::engine::TreeEngine;
use crate::flat::FlatRef;

/// State saved when a search begins, restored verbatim when it ends.
pub(crate) struct SearchSnapshot {
    pub(crate) list: Vec<FlatRef>,
    pub(crate) expanded: HashSet<NodeId>,
}

/// How well a label matches a query. Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Relevance {
    tier: u8,
    position: usize,
    length: usize,
}

impl Relevance {
    const NONE: Relevance = Relevance {
        tier: 4,
        position: 0,
        length: 0,
    };

    pub fn is_match(&self) -> bool {
        self.tier < Self::NONE.tier
    }
}

/// Substring matcher with relevance tiers: exact, prefix, word start, anywhere.
pub(crate) struct Matcher {
    needle: String,
    case_sensitive: bool,
}

impl Matcher {
    pub(crate) fn new(query: &str, case_sensitive: bool) -> Self {
        let needle = if case_sensitive {
            query.to_string()
        } else {
            query.to_lowercase()
        };
        Self {
            needle,
            case_sensitive,
        }
    }

    pub(crate) fn relevance(&self, label: &str) -> Relevance {
        let haystack = if self.case_sensitive {
            label.to_string()
        } else {
            label.to_lowercase()
        };
        let Some(position) = haystack.find(&self.needle) else {
            return Relevance::NONE;
        };
        let tier = if haystack == self.needle {
            0
        } else if position == 0 {
            1
        } else if haystack[..position]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_alphanumeric())
        {
            2
        } else {
            3
        };
        Relevance {
            tier,
            position,
            length: label.chars().count(),
        }
    }
}

impl TreeEngine {
    /// Filter the cached tree by label.
    ///
    /// Every cached node is laid out fully expanded; a row stays visible when
    /// it or one of its cached descendants matches. Siblings are ordered by
    /// relevance in the search projection only. An empty query ends the
    /// search.
    pub fn search(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            self.clear_search();
            return;
        }
        if self.search.is_none() {
            self.search = Some(SearchSnapshot {
                list: self.list.clone(),
                expanded: self.expansion.snapshot(),
            });
            info!(event = "search.begin", rows = self.list.len());
        }

        let matcher = Matcher::new(query, self.config.case_sensitive_search);
        let mut working = Vec::new();
        let mut expanded = HashSet::new();
        let root = self.store.root();
        self.collect_matches(root, 0, &matcher, &mut working, &mut expanded);

        let visible = working.iter().filter(|row| row.is_visible()).count();
        debug!(event = "search.apply", query, rows = working.len(), visible);
        self.list = working;
        self.expansion.replace_all(expanded);
        self.emit();
    }

    /// Restore the exact pre-search list and expansion set.
    pub fn clear_search(&mut self) {
        if self.restore_snapshot() {
            self.emit();
        }
    }

    pub fn is_searching(&self) -> bool {
        self.search.is_some()
    }

    pub(crate) fn restore_snapshot(&mut self) -> bool {
        let Some(snapshot) = self.search.take() else {
            return false;
        };
        self.list = snapshot.list;
        self.expansion.replace_all(snapshot.expanded);
        info!(event = "search.restore", rows = self.list.len());
        true
    }

    /// Append the rows for the cached children of `parent` to `out`.
    /// Returns whether anything in that subtree matched.
    fn collect_matches(
        &self,
        parent: NodeId,
        level: usize,
        matcher: &Matcher,
        out: &mut Vec<FlatRef>,
        expanded: &mut HashSet<NodeId>,
    ) -> bool {
        let Some(children) = self.store.children(parent) else {
            return false;
        };

        let mut blocks = Vec::with_capacity(children.len());
        for child in children {
            let Some(row) = self.flattener.flatten_node(&self.store, child, level) else {
                continue;
            };
            let relevance = matcher.relevance(row.label());
            let mut block = vec![row.clone()];
            let mut below = false;
            if self.store.is_fetched(child) {
                expanded.insert(child);
                below = self.collect_matches(child, level + 1, matcher, &mut block, expanded);
            }
            let visible = relevance.is_match() || below;
            row.set_visible(visible);
            row.set_loading(self.in_flight.contains_key(&child));
            blocks.push((relevance, block, visible));
        }

        // Stable, so equally ranked siblings keep their cached order.
        blocks.sort_by_key(|(relevance, _, _)| *relevance);
        let any_visible = blocks.iter().any(|(_, _, visible)| *visible);
        for (_, block, _) in blocks {
            out.extend(block);
        }
        any_visible
    }
}
