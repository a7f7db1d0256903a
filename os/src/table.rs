// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task table: a fixed-capacity registry of periodic and one-shot tasks.
//!
//! The table is an array of `N` slots, allocated inline wherever the table
//! lives. There is no heap and no growth; when every slot is occupied,
//! [`TaskTable::create_task`] fails with [`Full`].
//!
//! A task is identified by a [`TaskId`], which is simply the index of the slot
//! it was created in. Ids are only unique among *currently occupied* slots:
//! once a task is deleted, the next `create_task` may hand out the same id
//! again.
//!
//! # Task bodies
//!
//! Anything implementing [`Task`] can be registered. Every `Fn()` closure and
//! plain `fn()` implements it, so the common case is just
//!
//! ```ignore
//! fn toggle_led0() { /* ... */ }
//!
//! kernel.create_task(&toggle_led0, 0, 300)?;
//! ```
//!
//! Tasks that need state can close over it, or implement `Task` on a struct.
//! Either way the table only holds a shared reference, so mutable state goes
//! in a `Cell` or an atomic.

use core::fmt;

use crate::log;

/// Number of slots in a table when no capacity is given.
pub const DEFAULT_CAPACITY: usize = 10;

/// A unit of work the scheduler can run.
///
/// `run` is called synchronously from the run loop and must return promptly:
/// nothing else runs, and ticks are coalesced, until it does.
pub trait Task {
    /// Does the work.
    fn run(&self);
}

impl<F: Fn()> Task for F {
    fn run(&self) {
        self()
    }
}

/// Handle naming a slot in the task table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// Slot index this id refers to.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Scheduling state of an occupied slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Counting down toward its next run.
    #[default]
    Waiting,
    /// Due; will be dispatched on a coming pass.
    Ready,
}

/// Error returned by [`TaskTable::create_task`] when every slot is occupied.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Full;

impl fmt::Display for Full {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("task table is full")
    }
}

/// Error returned when a [`TaskId`] doesn't name a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotFound;

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no such task")
    }
}

/// One slot of the task table.
#[derive(Copy, Clone)]
pub(crate) struct TaskDescriptor<'t> {
    /// Task body. `None` marks the slot as free.
    pub(crate) callback: Option<&'t dyn Task>,
    /// Ticks until the task is next due.
    pub(crate) remaining_delay: u16,
    /// Ticks between runs; zero for a one-shot task.
    pub(crate) period: u16,
    /// Identity used by `modify_task`. Always the slot's own index, whether
    /// or not the slot is occupied.
    pub(crate) task_id: TaskId,
    pub(crate) state: TaskState,
}

impl TaskDescriptor<'_> {
    pub(crate) fn vacant(task_id: TaskId) -> Self {
        Self {
            callback: None,
            remaining_delay: 0,
            period: 0,
            task_id,
            state: TaskState::Waiting,
        }
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for TaskDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("occupied", &self.is_occupied())
            .field("remaining_delay", &self.remaining_delay)
            .field("period", &self.period)
            .field("task_id", &self.task_id)
            .field("state", &self.state)
            .finish()
    }
}

/// Fixed array of task slots.
///
/// `'t` is the lifetime of the registered task bodies; `N` is the capacity.
#[derive(Debug)]
pub struct TaskTable<'t, const N: usize = DEFAULT_CAPACITY> {
    pub(crate) slots: [TaskDescriptor<'t>; N],
}

impl<'t, const N: usize> TaskTable<'t, N> {
    /// Creates a table with every slot free.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| TaskDescriptor::vacant(TaskId(i))),
        }
    }

    /// Number of slots in the table.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Registers `task` in the lowest-numbered free slot.
    ///
    /// The task first becomes due after `delay` ticks. If `period` is zero it
    /// runs once and is then removed; otherwise it is re-armed to run every
    /// `period` ticks.
    pub fn create_task(
        &mut self,
        task: &'t dyn Task,
        delay: u16,
        period: u16,
    ) -> Result<TaskId, Full> {
        let Some(index) = self.slots.iter().position(|s| !s.is_occupied()) else {
            log::warning!("create_task: all {} slots occupied", N);
            return Err(Full);
        };

        let slot = &mut self.slots[index];
        slot.callback = Some(task);
        slot.remaining_delay = delay;
        slot.period = period;
        slot.state = TaskState::Waiting;
        slot.task_id = TaskId(index);

        log::debug!("created task {} (delay {}, period {})", index, delay, period);
        Ok(TaskId(index))
    }

    /// Removes the task in slot `id`.
    ///
    /// This only affects future dispatch. It fails if the slot is already
    /// free.
    pub fn delete_task(&mut self, id: TaskId) -> Result<(), NotFound> {
        match self.slots.get_mut(id.0) {
            Some(slot) if slot.is_occupied() => {
                *slot = TaskDescriptor::vacant(id);
                log::debug!("deleted task {}", id.0);
                Ok(())
            }
            _ => {
                log::warning!("delete_task: no task {}", id.0);
                Err(NotFound)
            }
        }
    }

    /// Replaces the body, delay and period of the slot whose id is `id`,
    /// leaving its Waiting/Ready state as it was.
    ///
    /// # Stale ids
    ///
    /// Slots keep their id after being freed, and this matches on the stored
    /// id without checking occupancy. Calling it with the id of a task that
    /// has since been deleted (or has retired, for a one-shot task) therefore
    /// succeeds and brings the slot back into use under that id. Only pass
    /// ids obtained from a task you know to be live.
    pub fn modify_task(
        &mut self,
        task: &'t dyn Task,
        delay: u16,
        period: u16,
        id: TaskId,
    ) -> Result<(), NotFound> {
        let Some(slot) = self.slots.iter_mut().find(|s| s.task_id == id) else {
            log::warning!("modify_task: no task {}", id.0);
            return Err(NotFound);
        };

        slot.callback = Some(task);
        slot.remaining_delay = delay;
        slot.period = period;

        log::debug!("modified task {} (delay {}, period {})", id.0, delay, period);
        Ok(())
    }

    /// Checks whether `id` names an occupied slot.
    pub fn contains(&self, id: TaskId) -> bool {
        self.slots.get(id.0).map_or(false, TaskDescriptor::is_occupied)
    }

    /// Returns the scheduling state of task `id`, or `None` if the slot is
    /// free.
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.slots
            .get(id.0)
            .filter(|s| s.is_occupied())
            .map(|s| s.state)
    }

    /// Returns every slot to its free state.
    pub fn clear(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            *slot = TaskDescriptor::vacant(TaskId(i));
        }
    }
}

impl<const N: usize> Default for TaskTable<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}
