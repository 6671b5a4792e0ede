//! Deltas between two index snapshots

use crate::index::Index;
use crate::route::Route;
use serde::{Deserialize, Serialize};

/// Routes that appeared, changed, or disappeared between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub new: Vec<Route>,
    pub modified: Vec<Route>,
    pub deleted: Vec<Route>,
}

impl Update {
    pub fn new(new: Vec<Route>, modified: Vec<Route>, deleted: Vec<Route>) -> Self {
        Self {
            new,
            modified,
            deleted,
        }
    }

    /// An empty update is never dispatched to subscribers
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len()
    }

    /// Whether `route` appears in any of the three lists
    pub fn touches(&self, route: &Route) -> bool {
        self.new.contains(route) || self.modified.contains(route) || self.deleted.contains(route)
    }

    /// Compare two snapshots.
    ///
    /// Items only in `new` are new, items only in `old` are deleted, and
    /// items in both are modified when their hashes differ. The old side
    /// contributes its last-known hash; the new side is hashed now.
    pub fn diff(old: &Index, new: &Index) -> Self {
        let mut update = Self::default();

        for item in new.items() {
            match old.get(item.route()) {
                None => update.new.push(item.route().clone()),
                Some(previous) => {
                    if previous.hash() != item.hash() {
                        update.modified.push(item.route().clone());
                    }
                }
            }
        }

        for item in old.items() {
            if !new.contains(item.route()) {
                update.deleted.push(item.route().clone());
            }
        }

        update
    }
}
