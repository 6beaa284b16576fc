//! Flat arena of attribute cells.
//!
//! Cells live in a `Vec` of generational slots. An owning slot holds its
//! value behind an `RwLock`; a referencing slot holds the handle of its
//! direct target plus the flattened owning handle, recomputed on every
//! bind or release so access never walks a chain.
//!
//! The locks are never contended during a step: the scheduler only puts
//! tasks with disjoint cell sets into the same layer. They exist so the
//! store can be shared by `&` across worker threads without `unsafe`.

use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;

use crate::error::AttributeError;
use crate::id::AttrId;
use crate::value::{Attr, AttrType, AttrValue, ValueKind};

#[derive(Debug)]
enum Storage {
    Owning(RwLock<AttrValue>),
    Reference {
        target: AttrId,
        resolved: Option<AttrId>,
    },
    Released,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    name: String,
    owner: String,
    kind: ValueKind,
    /// Zero value for additive accumulators.
    reset: Option<AttrValue>,
    storage: Storage,
}

/// Arena owning every attribute cell of a simulation.
#[derive(Debug, Default)]
pub struct AttributeStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: IndexMap<String, AttrId>,
}

impl AttributeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live cells, owning and referencing.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the store holds no live cells.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Create an owning cell `<owner>.<attr>` with an initial value.
    pub fn create<T: AttrType>(
        &mut self,
        owner: &str,
        attr: &str,
        init: T,
    ) -> Result<Attr<T>, AttributeError> {
        let value = init.into_value();
        let id = self.allocate(owner, attr, T::KIND, None, Storage::Owning(RwLock::new(value)))?;
        Ok(Attr::new(id))
    }

    /// Create an additive owning cell.
    ///
    /// Several tasks may write it in the same step; it is reset to the
    /// zero value of `init`'s shape before every step.
    pub fn create_additive<T: AttrType>(
        &mut self,
        owner: &str,
        attr: &str,
        init: T,
    ) -> Result<Attr<T>, AttributeError> {
        let value = init.into_value();
        let reset = Some(value.zeroed());
        let id = self.allocate(owner, attr, T::KIND, reset, Storage::Owning(RwLock::new(value)))?;
        Ok(Attr::new(id))
    }

    /// Create a referencing cell forwarding to `target`.
    pub fn create_reference<T: AttrType>(
        &mut self,
        owner: &str,
        attr: &str,
        target: Attr<T>,
    ) -> Result<Attr<T>, AttributeError> {
        let resolved = self.resolve(target.id())?;
        let id = self.allocate(
            owner,
            attr,
            T::KIND,
            None,
            Storage::Reference {
                target: target.id(),
                resolved: Some(resolved),
            },
        )?;
        Ok(Attr::new(id))
    }

    fn allocate(
        &mut self,
        owner: &str,
        attr: &str,
        kind: ValueKind,
        reset: Option<AttrValue>,
        storage: Storage,
    ) -> Result<AttrId, AttributeError> {
        let name = format!("{owner}.{attr}");
        if self.names.contains_key(&name) {
            return Err(AttributeError::DuplicateName(name));
        }
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.live = true;
                slot.name = name.clone();
                slot.owner = owner.to_string();
                slot.kind = kind;
                slot.reset = reset;
                slot.storage = storage;
                AttrId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    live: true,
                    name: name.clone(),
                    owner: owner.to_string(),
                    kind,
                    reset,
                    storage,
                });
                AttrId {
                    index,
                    generation: 0,
                }
            }
        };
        self.names.insert(name, id);
        Ok(id)
    }

    fn slot(&self, id: AttrId) -> Result<&Slot, AttributeError> {
        let slot = self
            .slots
            .get(id.index as usize)
            .ok_or(AttributeError::UnknownAttribute(id))?;
        if !slot.live || slot.generation != id.generation {
            return Err(AttributeError::StaleHandle(id));
        }
        Ok(slot)
    }

    /// Turn `cell` into a reference to `target`.
    ///
    /// `cell` may currently be owning (its value is dropped) or already
    /// referencing (it is rebound). Every reference in the store is
    /// re-flattened afterwards.
    pub fn bind<T: AttrType>(&mut self, cell: Attr<T>, target: Attr<T>) -> Result<(), AttributeError> {
        let (cell, target) = (cell.id(), target.id());
        let cell_name = self.slot(cell)?.name.clone();
        self.slot(target)?;

        // Walk the direct chain from the target; reaching `cell` closes a loop.
        let mut cursor = target;
        for _ in 0..=self.slots.len() {
            if cursor == cell {
                return Err(AttributeError::ReferenceCycle {
                    cell: cell_name,
                    target: self.slot(target)?.name.clone(),
                });
            }
            match &self.slot(cursor)?.storage {
                Storage::Reference { target: next, .. } => cursor = *next,
                Storage::Owning(_) | Storage::Released => break,
            }
        }

        let slot = &mut self.slots[cell.index as usize];
        slot.storage = Storage::Reference {
            target,
            resolved: None,
        };
        slot.reset = None;
        self.reflatten();
        Ok(())
    }

    fn reflatten(&mut self) {
        let resolved: Vec<Option<Option<AttrId>>> = (0..self.slots.len())
            .map(|i| {
                let slot = &self.slots[i];
                if !slot.live {
                    return None;
                }
                match slot.storage {
                    Storage::Reference { target, .. } => Some(self.walk(target)),
                    Storage::Owning(_) | Storage::Released => None,
                }
            })
            .collect();
        for (slot, r) in self.slots.iter_mut().zip(resolved) {
            if let (Some(r), Storage::Reference { resolved, .. }) = (r, &mut slot.storage) {
                *resolved = r;
            }
        }
    }

    fn walk(&self, start: AttrId) -> Option<AttrId> {
        let mut cursor = start;
        for _ in 0..=self.slots.len() {
            match &self.slot(cursor).ok()?.storage {
                Storage::Owning(_) => return Some(cursor),
                Storage::Reference { target, .. } => cursor = *target,
                Storage::Released => return None,
            }
        }
        None
    }

    /// Owning cell a handle ultimately refers to.
    pub fn resolve(&self, id: AttrId) -> Result<AttrId, AttributeError> {
        let slot = self.slot(id)?;
        match slot.storage {
            Storage::Owning(_) => Ok(id),
            Storage::Released => Err(AttributeError::StaleHandle(id)),
            Storage::Reference { resolved, .. } => {
                let target = resolved.ok_or_else(|| AttributeError::DanglingReference {
                    name: slot.name.clone(),
                })?;
                // The target may have been released after the last flatten.
                self.slot(target)
                    .map(|_| target)
                    .map_err(|_| AttributeError::DanglingReference {
                        name: slot.name.clone(),
                    })
            }
        }
    }

    fn cell(&self, id: AttrId) -> Result<(&RwLock<AttrValue>, &str), AttributeError> {
        let name = self.slot(id)?.name.as_str();
        let owning = self.resolve(id)?;
        match &self.slot(owning)?.storage {
            Storage::Owning(lock) => Ok((lock, name)),
            Storage::Reference { .. } | Storage::Released => Err(AttributeError::DanglingReference {
                name: name.to_string(),
            }),
        }
    }

    fn mismatch(name: &str, expected: ValueKind, actual: &AttrValue) -> AttributeError {
        AttributeError::TypeMismatch {
            name: name.to_string(),
            expected,
            actual: actual.kind(),
        }
    }

    /// Clone the current value.
    pub fn get<T: AttrType>(&self, attr: Attr<T>) -> Result<T, AttributeError> {
        self.with(attr, T::clone)
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<T: AttrType, R>(
        &self,
        attr: Attr<T>,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, AttributeError> {
        let (lock, name) = self.cell(attr.id())?;
        let guard = lock.read().unwrap_or_else(PoisonError::into_inner);
        let value = T::from_value(&guard).ok_or_else(|| Self::mismatch(name, T::KIND, &guard))?;
        Ok(f(value))
    }

    /// Overwrite the value; visible through every reference at once.
    pub fn set<T: AttrType>(&self, attr: Attr<T>, value: T) -> Result<(), AttributeError> {
        self.update(attr, |v| *v = value)
    }

    /// Mutate the value in place.
    pub fn update<T: AttrType, R>(
        &self,
        attr: Attr<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, AttributeError> {
        let (lock, name) = self.cell(attr.id())?;
        let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
        let actual = guard.kind();
        let value = T::from_value_mut(&mut guard).ok_or_else(|| AttributeError::TypeMismatch {
            name: name.to_string(),
            expected: T::KIND,
            actual,
        })?;
        Ok(f(value))
    }

    /// Untyped read.
    pub fn get_value(&self, id: AttrId) -> Result<AttrValue, AttributeError> {
        let (lock, _) = self.cell(id)?;
        let guard = lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    /// Untyped write; the value must match the stored kind.
    pub fn set_value(&self, id: AttrId, value: AttrValue) -> Result<(), AttributeError> {
        let (lock, name) = self.cell(id)?;
        let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
        if guard.kind() != value.kind() {
            return Err(AttributeError::TypeMismatch {
                name: name.to_string(),
                expected: guard.kind(),
                actual: value.kind(),
            });
        }
        *guard = value;
        Ok(())
    }

    /// Look up a cell by its qualified name.
    pub fn find(&self, name: &str) -> Option<AttrId> {
        self.names.get(name).copied()
    }

    /// Typed lookup by qualified name.
    pub fn find_typed<T: AttrType>(&self, name: &str) -> Result<Attr<T>, AttributeError> {
        let id = self
            .find(name)
            .ok_or_else(|| AttributeError::UnknownName(name.to_string()))?;
        let kind = self.kind(id)?;
        if kind != T::KIND {
            return Err(AttributeError::TypeMismatch {
                name: name.to_string(),
                expected: T::KIND,
                actual: kind,
            });
        }
        Ok(Attr::new(id))
    }

    /// Qualified name of a live cell.
    pub fn name(&self, id: AttrId) -> Result<&str, AttributeError> {
        Ok(self.slot(id)?.name.as_str())
    }

    /// Owner label of a live cell.
    pub fn owner(&self, id: AttrId) -> Result<&str, AttributeError> {
        Ok(self.slot(id)?.owner.as_str())
    }

    /// Value kind of a live cell.
    pub fn kind(&self, id: AttrId) -> Result<ValueKind, AttributeError> {
        Ok(self.slot(id)?.kind)
    }

    /// Whether the owning cell behind `id` is additive.
    pub fn is_additive(&self, id: AttrId) -> bool {
        self.resolve(id)
            .and_then(|owning| self.slot(owning))
            .map(|slot| slot.reset.is_some())
            .unwrap_or(false)
    }

    /// Whether `id` is a referencing cell.
    pub fn is_reference(&self, id: AttrId) -> bool {
        matches!(
            self.slot(id).map(|s| &s.storage),
            Ok(Storage::Reference { .. })
        )
    }

    /// Handles of every live cell of one owner, in creation order.
    pub fn owned_by(&self, owner: &str) -> Vec<AttrId> {
        self.names
            .values()
            .copied()
            .filter(|id| self.slot(*id).map(|s| s.owner == owner).unwrap_or(false))
            .collect()
    }

    /// Release every cell of `owner`.
    ///
    /// Slot generations are bumped, so outstanding handles become stale.
    /// References held by other owners into the released cells dangle
    /// until rebound. Returns the number of released cells.
    pub fn release_owner(&mut self, owner: &str) -> usize {
        self.release_matching(|o| o == owner)
    }

    /// Release every cell whose owner satisfies `pred`.
    ///
    /// Used to drop a composite element together with its sub-elements.
    pub fn release_matching(&mut self, pred: impl Fn(&str) -> bool) -> usize {
        let mut released = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.live && pred(&slot.owner) {
                slot.live = false;
                slot.generation = slot.generation.wrapping_add(1);
                slot.reset = None;
                slot.storage = Storage::Released;
                self.names.shift_remove(&slot.name);
                self.free.push(index as u32);
                released += 1;
            }
        }
        if released > 0 {
            self.reflatten();
        }
        released
    }

    /// Check that every reference resolves to a live owning cell.
    pub fn validate(&self) -> Result<(), AttributeError> {
        for id in self.names.values() {
            self.resolve(*id)?;
        }
        Ok(())
    }

    /// Reset every additive cell to its zero value.
    pub fn reset_additive(&self) {
        for slot in self.slots.iter().filter(|s| s.live) {
            if let (Some(zero), Storage::Owning(lock)) = (&slot.reset, &slot.storage) {
                *lock.write().unwrap_or_else(PoisonError::into_inner) = zero.clone();
            }
        }
    }

    /// Iterate `(qualified name, handle)` over live cells.
    pub fn iter(&self) -> impl Iterator<Item = (&str, AttrId)> + '_ {
        self.names.iter().map(|(n, id)| (n.as_str(), *id))
    }
}
