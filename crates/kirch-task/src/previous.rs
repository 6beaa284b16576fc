//! Committed previous-step values.
//!
//! A [`PreviousFrame`] holds a copy of every cell that any task reads
//! through `reads_previous()`. The run loop refreshes it after each step
//! has fully completed, so during step `k` it always holds the values
//! committed at the end of step `k - 1`, whatever the current step has
//! already overwritten.

use indexmap::IndexMap;
use kirch_core::{AttrId, AttrSet, AttrValue, AttributeError, AttributeStore};

/// Snapshot of previous-step values keyed by owning cell.
#[derive(Clone, Debug, Default)]
pub struct PreviousFrame {
    values: IndexMap<AttrId, AttrValue>,
}

impl PreviousFrame {
    /// Capture the current values of `cells` (resolved to owning cells).
    pub fn capture(store: &AttributeStore, cells: &AttrSet) -> Result<Self, AttributeError> {
        let mut values = IndexMap::with_capacity(cells.len());
        for id in cells.iter() {
            let owning = store.resolve(id)?;
            values.insert(owning, store.get_value(owning)?);
        }
        Ok(Self { values })
    }

    /// Refresh every captured value from the store.
    pub fn commit(&mut self, store: &AttributeStore) -> Result<(), AttributeError> {
        for (id, value) in self.values.iter_mut() {
            *value = store.get_value(*id)?;
        }
        Ok(())
    }

    /// Committed value of an owning cell.
    pub fn get(&self, owning: AttrId) -> Option<&AttrValue> {
        self.values.get(&owning)
    }

    /// Number of tracked cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no cell is tracked.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
