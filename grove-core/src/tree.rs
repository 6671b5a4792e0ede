//! Ordered N-ary trie keyed by path components
//!
//! Nodes live in an arena owned by the [`Tree`]; parents hold their
//! children by [`NodeId`] and every node keeps a non-owning `NodeId` back to
//! its parent, so there are no reference cycles. Children keep insertion
//! order; callers that want a different order sort the results themselves.

use crate::GroveError;

/// Index of a node inside a tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node<T> {
    name: String,
    value: Option<T>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed trie
#[derive(Debug, Clone)]
pub struct Tree<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    root: Option<NodeId>,
}

/// Borrowed view of one node
pub struct NodeRef<'a, T> {
    tree: &'a Tree<T>,
    id: NodeId,
}

impl<T> Clone for NodeRef<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for NodeRef<'_, T> {}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
        }
    }

    pub fn root(&self) -> Option<NodeRef<'_, T>> {
        self.root.map(|id| NodeRef { tree: self, id })
    }

    /// Number of live nodes, including valueless intermediate nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Insert `value` at `path`, creating intermediate nodes as needed.
    ///
    /// If a node already exists at `path` only its value is replaced; its
    /// children stay in place. Returns `true` when a new node was created.
    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], value: T) -> crate::Result<bool> {
        let components = validate_path(path)?;

        let mut created = false;
        let mut current = match self.root {
            Some(id) => id,
            None => {
                created = components.is_empty();
                let id = self.alloc(String::new(), None);
                self.root = Some(id);
                id
            }
        };

        for component in components {
            current = match self.find_child(current, component) {
                Some(child) => child,
                None => {
                    let child = self.alloc(component.to_string(), Some(current));
                    self.node_mut(current).children.push(child);
                    created = true;
                    child
                }
            };
        }

        self.node_mut(current).value = Some(value);
        Ok(created)
    }

    /// Remove the node at `path` together with its whole subtree.
    /// Deleting the root path clears the tree.
    pub fn delete<S: AsRef<str>>(&mut self, path: &[S]) -> crate::Result<()> {
        let components = validate_path(path)?;
        let id = self
            .find(&components)
            .ok_or_else(|| GroveError::PathNotFound(components.join("/")))?;

        match self.node(id).parent {
            Some(parent) => {
                self.node_mut(parent).children.retain(|c| *c != id);
                self.free_subtree(id);
            }
            None => {
                self.nodes.clear();
                self.free.clear();
                self.root = None;
            }
        }
        Ok(())
    }

    /// Exact-match lookup; invalid paths resolve to `None`
    pub fn get_node<S: AsRef<str>>(&self, path: &[S]) -> Option<NodeRef<'_, T>> {
        let components = validate_path(path).ok()?;
        self.find(&components).map(|id| NodeRef { tree: self, id })
    }

    /// Take the value out of the node at `path`, leaving the node in place
    pub fn take_value<S: AsRef<str>>(&mut self, path: &[S]) -> Option<T> {
        let components = validate_path(path).ok()?;
        let id = self.find(&components)?;
        self.node_mut(id).value.take()
    }

    /// Delete the node at `path` if it has neither value nor children, then
    /// repeat for each ancestor below the root.
    pub fn prune<S: AsRef<str>>(&mut self, path: &[S]) {
        let Ok(components) = validate_path(path) else {
            return;
        };
        let Some(mut id) = self.find(&components) else {
            return;
        };

        while let Some(parent) = self.node(id).parent {
            let node = self.node(id);
            if node.value.is_some() || !node.children.is_empty() {
                break;
            }
            self.node_mut(parent).children.retain(|c| *c != id);
            self.free_subtree(id);
            id = parent;
        }
    }

    /// Visit every node: the root first, then at each level all children of
    /// a node before descending into each child's subtree in turn.
    pub fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(NodeRef<'_, T>),
    {
        if let Some(root) = self.root() {
            visit(root);
            self.walk_children(root.id, &mut visit);
        }
    }

    fn walk_children<F>(&self, id: NodeId, visit: &mut F)
    where
        F: FnMut(NodeRef<'_, T>),
    {
        let children = &self.node(id).children;
        for child in children {
            visit(NodeRef {
                tree: self,
                id: *child,
            });
        }
        for child in children {
            self.walk_children(*child, visit);
        }
    }

    fn find(&self, components: &[&str]) -> Option<NodeId> {
        let mut current = self.root?;
        for component in components {
            current = self.find_child(current, component)?;
        }
        Some(current)
    }

    fn find_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name)
    }

    fn alloc(&mut self, name: String, parent: Option<NodeId>) -> NodeId {
        let node = Node {
            name,
            value: None,
            parent,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn free_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes[current.0].take() {
                stack.extend(node.children);
                self.free.push(current.0);
            }
        }
    }

    // Live ids always point at occupied slots: ids are only handed out for
    // allocated nodes and are dropped from parents before their slot is freed.
    fn node(&self, id: NodeId) -> &Node<T> {
        match &self.nodes[id.0] {
            Some(node) => node,
            None => unreachable!("dangling node id {}", id.0),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        match &mut self.nodes[id.0] {
            Some(node) => node,
            None => unreachable!("dangling node id {}", id.0),
        }
    }
}

impl<'a, T> NodeRef<'a, T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Last path component; empty for the root
    pub fn name(&self) -> &'a str {
        &self.tree.node(self.id).name
    }

    pub fn value(&self) -> Option<&'a T> {
        self.tree.node(self.id).value.as_ref()
    }

    pub fn parent(&self) -> Option<NodeRef<'a, T>> {
        self.tree.node(self.id).parent.map(|id| NodeRef {
            tree: self.tree,
            id,
        })
    }

    /// Children in insertion order
    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a, T>> + 'a {
        let tree = self.tree;
        tree.node(self.id)
            .children
            .iter()
            .map(move |id| NodeRef { tree, id: *id })
    }

    pub fn child(&self, name: &str) -> Option<NodeRef<'a, T>> {
        self.tree.find_child(self.id, name).map(|id| NodeRef {
            tree: self.tree,
            id,
        })
    }

    pub fn has_children(&self) -> bool {
        !self.tree.node(self.id).children.is_empty()
    }

    /// Components from the root down to this node
    pub fn path(&self) -> Vec<&'a str> {
        let mut components = Vec::new();
        let mut current = Some(*self);
        while let Some(node) = current {
            if node.parent().is_some() {
                components.push(node.name());
            }
            current = node.parent();
        }
        components.reverse();
        components
    }
}

/// Reject empty or separator-bearing components. The root is addressed by
/// either the empty path or the single empty component.
fn validate_path<S: AsRef<str>>(path: &[S]) -> crate::Result<Vec<&str>> {
    if path.len() == 1 && path[0].as_ref().is_empty() {
        return Ok(Vec::new());
    }

    let mut components = Vec::with_capacity(path.len());
    for component in path {
        let component = component.as_ref();
        if component.is_empty() {
            return Err(GroveError::InvalidPath(
                "empty path component".to_string(),
            ));
        }
        if component.contains(['/', '\\']) {
            return Err(GroveError::InvalidPath(format!(
                "path component '{component}' contains a separator"
            )));
        }
        components.push(component);
    }
    Ok(components)
}
