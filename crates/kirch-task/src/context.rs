//! Execution context handed to each task.
//!
//! [`TaskContext`] is the only way a task body touches attribute cells.
//! Every access is checked against the task's declared sets (resolved
//! through references), so a body that reads a cell it forgot to declare
//! fails loudly instead of racing with the cell's writer.

use kirch_core::{Attr, AttrId, AttrSet, AttrType, AttributeError, AttributeStore, StepId, TaskError};

use crate::previous::PreviousFrame;
use crate::task::Task;

/// Timing information for the step being executed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepClock {
    /// Index of the step.
    pub step: StepId,
    /// Simulation time at the start of the step, in seconds.
    pub time: f64,
    /// Fixed time step, in seconds.
    pub dt: f64,
}

impl StepClock {
    /// Clock for step 0 at time 0.
    pub fn start(dt: f64) -> Self {
        Self {
            step: StepId(0),
            time: 0.0,
            dt,
        }
    }
}

/// A task's declarations with every id resolved to its owning cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Access {
    /// Resolved current-step reads.
    pub reads: AttrSet,
    /// Resolved writes.
    pub writes: AttrSet,
    /// Resolved previous-step reads.
    pub previous: AttrSet,
}

impl Access {
    /// Resolve a task's declarations against the store.
    pub fn of(task: &dyn Task, store: &AttributeStore) -> Result<Self, AttributeError> {
        let resolve = |set: AttrSet| -> Result<AttrSet, AttributeError> {
            set.iter().map(|id| store.resolve(id)).collect()
        };
        Ok(Self {
            reads: resolve(task.reads())?,
            writes: resolve(task.writes())?,
            previous: resolve(task.reads_previous())?,
        })
    }
}

/// Execution context passed to [`Task::execute`].
pub struct TaskContext<'a> {
    store: &'a AttributeStore,
    previous: &'a PreviousFrame,
    access: &'a Access,
    clock: StepClock,
}

impl<'a> TaskContext<'a> {
    /// Construct a context.
    ///
    /// Called by the executor; tests may build one directly.
    pub fn new(
        store: &'a AttributeStore,
        previous: &'a PreviousFrame,
        access: &'a Access,
        clock: StepClock,
    ) -> Self {
        Self {
            store,
            previous,
            access,
            clock,
        }
    }

    fn check(&self, id: AttrId, allowed: bool, access: &'static str) -> Result<(), AttributeError> {
        if allowed {
            Ok(())
        } else {
            Err(AttributeError::UndeclaredAccess {
                name: self.store.name(id).unwrap_or("?").to_string(),
                access,
            })
        }
    }

    fn check_read(&self, id: AttrId) -> Result<(), AttributeError> {
        let owning = self.store.resolve(id)?;
        // A writer may read back what it (or another additive writer) has
        // accumulated so far.
        let allowed = self.access.reads.contains(owning) || self.access.writes.contains(owning);
        self.check(id, allowed, "read")
    }

    fn check_write(&self, id: AttrId) -> Result<(), AttributeError> {
        let owning = self.store.resolve(id)?;
        self.check(id, self.access.writes.contains(owning), "write")
    }

    /// Current-step value of a declared read.
    pub fn read<T: AttrType>(&self, attr: Attr<T>) -> Result<T, TaskError> {
        self.check_read(attr.id())?;
        Ok(self.store.get(attr)?)
    }

    /// Borrow a declared read for the duration of `f`.
    pub fn read_with<T: AttrType, R>(
        &self,
        attr: Attr<T>,
        f: impl FnOnce(&T) -> R,
    ) -> Result<R, TaskError> {
        self.check_read(attr.id())?;
        Ok(self.store.with(attr, f)?)
    }

    /// Overwrite a declared write.
    pub fn write<T: AttrType>(&self, attr: Attr<T>, value: T) -> Result<(), TaskError> {
        self.check_write(attr.id())?;
        Ok(self.store.set(attr, value)?)
    }

    /// Mutate a declared write in place (accumulation into additive cells).
    pub fn update<T: AttrType, R>(
        &self,
        attr: Attr<T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, TaskError> {
        self.check_write(attr.id())?;
        Ok(self.store.update(attr, f)?)
    }

    /// Previous-step committed value of a declared previous-step read.
    pub fn read_previous<T: AttrType>(&self, attr: Attr<T>) -> Result<T, TaskError> {
        let owning = self.store.resolve(attr.id())?;
        self.check(attr.id(), self.access.previous.contains(owning), "previous-step read")?;
        let value = self
            .previous
            .get(owning)
            .ok_or(AttributeError::UnknownAttribute(owning))?;
        let typed = T::from_value(value).ok_or_else(|| AttributeError::TypeMismatch {
            name: self.store.name(attr.id()).unwrap_or("?").to_string(),
            expected: T::KIND,
            actual: value.kind(),
        })?;
        Ok(typed.clone())
    }

    /// Step being executed.
    pub fn step(&self) -> StepId {
        self.clock.step
    }

    /// Simulation time at the start of the step, in seconds.
    pub fn time(&self) -> f64 {
        self.clock.time
    }

    /// Fixed time step, in seconds.
    pub fn dt(&self) -> f64 {
        self.clock.dt
    }

    /// The full clock.
    pub fn clock(&self) -> StepClock {
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{FnTask, Phase};

    #[test]
    fn declared_access_through_alias_is_allowed() {
        let mut store = AttributeStore::new();
        let v = store.create("src", "v", 3.0).unwrap();
        let alias = store.create_reference("reader", "v", v).unwrap();
        let out = store.create("reader", "out", 0.0).unwrap();

        // Declared via the alias, accessed via the owning handle.
        let task = FnTask::new("reader", Phase::Step)
            .reads(AttrSet::empty().with(alias))
            .writes(AttrSet::empty().with(out));
        let access = Access::of(&task, &store).unwrap();
        let frame = PreviousFrame::default();
        let ctx = TaskContext::new(&store, &frame, &access, StepClock::start(1e-3));

        assert_eq!(ctx.read(v).unwrap(), 3.0);
        ctx.write(out, 6.0).unwrap();
        assert_eq!(store.get(out).unwrap(), 6.0);
    }

    #[test]
    fn undeclared_access_is_rejected() {
        let mut store = AttributeStore::new();
        let a = store.create("x", "a", 1.0).unwrap();
        let b = store.create("x", "b", 2.0).unwrap();
        let task = FnTask::new("x", Phase::Step).reads(AttrSet::empty().with(a));
        let access = Access::of(&task, &store).unwrap();
        let frame = PreviousFrame::default();
        let ctx = TaskContext::new(&store, &frame, &access, StepClock::start(1e-3));

        assert!(matches!(
            ctx.read(b),
            Err(TaskError::Attribute(AttributeError::UndeclaredAccess { access: "read", .. }))
        ));
        assert!(matches!(
            ctx.write(a, 0.0),
            Err(TaskError::Attribute(AttributeError::UndeclaredAccess { access: "write", .. }))
        ));
        // Same-step declaration does not grant previous-step access.
        assert!(ctx.read_previous(a).is_err());
    }

    #[test]
    fn previous_read_sees_frame_not_live_value() {
        let mut store = AttributeStore::new();
        let a = store.create("x", "a", 1.0).unwrap();
        let task = FnTask::new("y", Phase::PreStep).reads_previous(AttrSet::empty().with(a));
        let access = Access::of(&task, &store).unwrap();
        let frame = PreviousFrame::capture(&store, &AttrSet::empty().with(a)).unwrap();
        store.set(a, 5.0).unwrap();

        let ctx = TaskContext::new(&store, &frame, &access, StepClock::start(1e-3));
        assert_eq!(ctx.read_previous(a).unwrap(), 1.0);
    }
}
