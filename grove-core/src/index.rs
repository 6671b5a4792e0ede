//! Index snapshot: flat item list, route map, and route tree
//!
//! The three structures are always updated together, so every item in the
//! map is reachable in the tree at its route's components and vice versa.
//! A published index is never mutated; the repository builds a new one (or
//! clones and edits a private copy) and swaps it in.

use crate::item::Item;
use crate::route::Route;
use crate::tree::{NodeRef, Tree};
use std::collections::HashMap;
use std::sync::Arc;

/// Sort policy for child listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildOrder {
    /// Ascending by route value
    #[default]
    Route,
    /// Oldest first by last-modified time, ties broken by route
    Chronological,
}

#[derive(Debug, Clone, Default)]
pub struct Index {
    items: Vec<Arc<Item>>,
    by_route: HashMap<Route, Arc<Item>>,
    tree: Tree<Arc<Item>>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from scanned items; later duplicates replace earlier ones
    pub fn from_items(items: impl IntoIterator<Item = Item>) -> crate::Result<Self> {
        let mut index = Self::new();
        for item in items {
            index.add(item)?;
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in insertion order
    pub fn items(&self) -> &[Arc<Item>] {
        &self.items
    }

    pub fn routes(&self) -> Vec<Route> {
        self.items.iter().map(|item| item.route().clone()).collect()
    }

    pub fn tree(&self) -> &Tree<Arc<Item>> {
        &self.tree
    }

    /// Exact route lookup
    pub fn get(&self, route: &Route) -> Option<&Arc<Item>> {
        self.by_route.get(route)
    }

    pub fn contains(&self, route: &Route) -> bool {
        self.by_route.contains_key(route)
    }

    pub fn parent(&self, route: &Route) -> Option<&Arc<Item>> {
        route.parent().and_then(|parent| self.by_route.get(&parent))
    }

    /// Items one level below `route`, sorted per `order`
    pub fn direct_children(&self, route: &Route, order: ChildOrder) -> Vec<Arc<Item>> {
        let Some(node) = self.tree.get_node(&route.components()) else {
            return Vec::new();
        };

        let mut children: Vec<Arc<Item>> = node.children().filter_map(|c| c.value().cloned()).collect();
        match order {
            ChildOrder::Route => children.sort_by(|a, b| a.route().cmp(b.route())),
            ChildOrder::Chronological => children.sort_by(|a, b| {
                a.last_modified()
                    .cmp(&b.last_modified())
                    .then_with(|| a.route().cmp(b.route()))
            }),
        }
        children
    }

    /// Every item below `route` accepted by `predicate`, in pre-order
    pub fn all_children<F>(&self, route: &Route, predicate: F) -> Vec<Arc<Item>>
    where
        F: Fn(&Item) -> bool,
    {
        let mut out = Vec::new();
        if let Some(node) = self.tree.get_node(&route.components()) {
            collect_descendants(node, &predicate, &mut out);
        }
        out
    }

    /// New index holding the item at `route` and its descendants down to
    /// `max_depth` levels below it (`None` for no limit)
    pub fn sub_index(&self, route: &Route, max_depth: Option<usize>) -> Index {
        let mut sub = Index::new();
        let Some(node) = self.tree.get_node(&route.components()) else {
            return sub;
        };

        let mut stack = vec![(node, 0usize)];
        while let Some((node, depth)) = stack.pop() {
            if let Some(item) = node.value() {
                sub.insert_valid(Arc::clone(item));
            }
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            let children: Vec<_> = node.children().collect();
            for child in children.into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        sub
    }

    /// Add an item, replacing any item already present at its route
    pub fn add(&mut self, item: impl Into<Arc<Item>>) -> crate::Result<()> {
        let item = item.into();
        let route = item.route().clone();

        // Tree first: a rejected path leaves the index untouched
        self.tree.insert(&route.components(), Arc::clone(&item))?;

        match self.by_route.insert(route.clone(), Arc::clone(&item)) {
            Some(_) => {
                if let Some(slot) = self.items.iter_mut().find(|i| *i.route() == route) {
                    *slot = item;
                }
            }
            None => self.items.push(item),
        }
        Ok(())
    }

    /// Remove the item at `route`. Descendant items stay in place; tree
    /// nodes left without value or children are pruned.
    pub fn remove(&mut self, route: &Route) -> Option<Arc<Item>> {
        let removed = self.by_route.remove(route)?;
        self.items.retain(|item| item.route() != route);

        let components = route.components();
        self.tree.take_value(&components);
        self.tree.prune(&components);
        Some(removed)
    }

    // Routes taken from an existing index always form valid tree paths.
    fn insert_valid(&mut self, item: Arc<Item>) {
        if let Err(e) = self.add(item) {
            tracing::warn!(error = %e, "dropping item with invalid route");
        }
    }
}

fn collect_descendants<F>(node: NodeRef<'_, Arc<Item>>, predicate: &F, out: &mut Vec<Arc<Item>>)
where
    F: Fn(&Item) -> bool,
{
    for child in node.children() {
        if let Some(item) = child.value() {
            if predicate(item) {
                out.push(Arc::clone(item));
            }
        }
        collect_descendants(child, predicate, out);
    }
}
