// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scheduling engine: turns ticks into task dispatch.
//!
//! Each call to [`Scheduler::pass`] does two things, always in this order:
//!
//! 1. **Dispatch.** Scan the table from slot 0 upward and run the *first*
//!    task marked Ready, to completion. It goes back to Waiting; if it was a
//!    one-shot task it is removed. At most one task runs per pass.
//!
//! 2. **Aging.** If a tick is pending, consume it and age every occupied
//!    slot: a task whose counter has reached zero is marked Ready (and, if
//!    periodic, re-armed); any other task's counter goes down by one.
//!
//! Because dispatch comes first, a task that becomes Ready during aging is not
//! run until the *next* pass. When several tasks are Ready at once, they run
//! on consecutive passes in slot order -- lowest index first, every time. This
//! is a fixed priority-by-creation-order policy, not a fair one, but it is
//! completely deterministic, which makes schedules easy to reason about and to
//! test.
//!
//! # Timing
//!
//! Ticks are numbered from 0, the first tick aged after the task is created.
//! A task created with delay `d` becomes Ready on tick `d`; a periodic task
//! then becomes Ready again every `period` ticks. The tick on which a task
//! fires counts as the first tick of its next period, which is why the
//! counter is reloaded with `period - 1`.
//!
//! # Faults
//!
//! The engine has no supervision. Tasks are called directly; one that never
//! returns hangs the system, and one that panics takes it down.

use crate::log;
use crate::table::{TaskDescriptor, TaskId, TaskState, TaskTable, DEFAULT_CAPACITY};
use crate::tick::TickFlag;

/// Task table plus the dispatch/aging algorithm that runs over it.
#[derive(Debug, Default)]
pub struct Scheduler<'t, const N: usize = DEFAULT_CAPACITY> {
    tasks: TaskTable<'t, N>,
}

impl<'t, const N: usize> Scheduler<'t, N> {
    /// Creates a scheduler with an empty task table.
    pub fn new() -> Self {
        Self {
            tasks: TaskTable::new(),
        }
    }

    /// Shared access to the task table.
    pub fn tasks(&self) -> &TaskTable<'t, N> {
        &self.tasks
    }

    /// Exclusive access to the task table, for creating, deleting, and
    /// modifying tasks.
    pub fn tasks_mut(&mut self) -> &mut TaskTable<'t, N> {
        &mut self.tasks
    }

    /// Runs the lowest-numbered Ready task, if any, returning its id.
    pub fn dispatch(&mut self) -> Option<TaskId> {
        let slot = self
            .tasks
            .slots
            .iter_mut()
            .find(|s| s.is_occupied() && s.state == TaskState::Ready)?;

        let id = slot.task_id;
        log::trace!("dispatch task {}", id.0);

        if let Some(task) = slot.callback {
            task.run();
        }
        slot.state = TaskState::Waiting;

        if slot.period == 0 {
            log::trace!("one-shot task {} retired", id.0);
            *slot = TaskDescriptor::vacant(id);
        }

        Some(id)
    }

    /// Accounts for one elapsed tick on every occupied slot.
    pub fn age(&mut self) {
        for slot in self.tasks.slots.iter_mut().filter(|s| s.is_occupied()) {
            if slot.remaining_delay == 0 {
                slot.state = TaskState::Ready;
                if slot.period > 0 {
                    slot.remaining_delay = slot.period - 1;
                }
            } else {
                slot.remaining_delay -= 1;
            }
        }
    }

    /// Performs one scheduling pass: dispatch, then aging if `tick` has a
    /// tick pending. Returns the id of the task that ran, if any.
    pub fn pass(&mut self, tick: &TickFlag) -> Option<TaskId> {
        let ran = self.dispatch();
        if tick.take() {
            self.age();
        }
        ran
    }

    /// Performs one scheduling pass as though exactly one tick had elapsed
    /// since the last. Handy for driving the engine from a test harness
    /// without a tick source.
    pub fn tick_once(&mut self) -> Option<TaskId> {
        let ran = self.dispatch();
        self.age();
        ran
    }
}
