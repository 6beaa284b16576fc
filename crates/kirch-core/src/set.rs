//! Ordered attribute sets used for task declarations.

use indexmap::IndexSet;

use crate::id::AttrId;

/// Insertion-ordered set of attribute ids.
///
/// Order matters only for reporting: conflict and cycle errors list
/// cells in the order the task declared them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttrSet {
    ids: IndexSet<AttrId>,
}

impl AttrSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, id: impl Into<AttrId>) -> Self {
        self.ids.insert(id.into());
        self
    }

    /// Insert an id; returns `false` if it was already present.
    pub fn insert(&mut self, id: impl Into<AttrId>) -> bool {
        self.ids.insert(id.into())
    }

    /// Membership test.
    pub fn contains(&self, id: AttrId) -> bool {
        self.ids.contains(&id)
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = AttrId> + '_ {
        self.ids.iter().copied()
    }

    /// Union, keeping `self`'s order first.
    pub fn union(&self, other: &AttrSet) -> AttrSet {
        let mut ids = self.ids.clone();
        ids.extend(other.ids.iter().copied());
        AttrSet { ids }
    }

    /// Add every id of `other`.
    pub fn extend(&mut self, other: &AttrSet) {
        self.ids.extend(other.ids.iter().copied());
    }
}

impl FromIterator<AttrId> for AttrSet {
    fn from_iter<I: IntoIterator<Item = AttrId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
