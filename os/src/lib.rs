// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small cooperative task scheduler for microcontrollers.
//!
//! This runs a fixed-capacity set of short, run-to-completion tasks off a
//! periodic timer tick, on bare-metal systems with no heap and no threads.
//!
//! # `sos` design principles
//!
//! 1. Be compact. The whole scheduler state is one fixed-size array of task
//!    descriptors, sized at compile time. Nothing is allocated.
//!
//! 2. No magic. There are no proc macros and no hidden global constructors.
//!    The application builds a [`Kernel`], hands it a tick source, registers
//!    tasks, and calls [`Kernel::run`].
//!
//! 3. Be portable. The scheduler only talks to hardware through the
//!    [`TickSource`] trait. A SysTick implementation is included for Cortex-M
//!    (see the `systick` feature), and anything else that can raise a periodic
//!    interrupt will do.
//!
//! 4. Be predictable. Tasks are dispatched in table order, at most one per
//!    pass through the run loop, and never preempt one another.
//!
//! # About the scheduler
//!
//! A *task* is anything implementing [`Task`], which includes any `Fn()`.
//! Tasks are registered with an initial delay and a period, both in ticks. A
//! task becomes Ready when its delay runs out; the run loop then calls it once
//! and either re-arms it (periodic tasks) or removes it (one-shot tasks, with
//! period 0).
//!
//! ```ignore
//! fn toggle_led0() { /* ... */ }
//! fn toggle_led1() { /* ... */ }
//!
//! #[cortex_m_rt::entry]
//! fn main() -> ! {
//!     let cp = cortex_m::Peripherals::take().unwrap();
//!     let mut kernel: sos::Kernel<'_, _> =
//!         sos::Kernel::new(sos::systick::SysTickSource::new(cp.SYST, 16_000_000));
//!     kernel.init().unwrap();
//!     kernel.create_task(&toggle_led0, 0, 300).unwrap();
//!     kernel.create_task(&toggle_led1, 5, 500).unwrap();
//!     kernel.run()
//! }
//! ```
//!
//! # Concurrency and interrupts
//!
//! The tick interrupt handler does nothing but set a flag; all bookkeeping
//! happens in the run loop, in thread context. The only other state shared
//! with interrupts is the [run state][exec::RunState], which any ISR may set
//! to pause or resume scheduling.
//!
//! Tasks run to completion. A task that runs longer than a tick delays
//! everything else and can cause ticks to be coalesced; keep them short.
//!
//! Tasks can't call back into the kernel while running, since the kernel is
//! mutably borrowed by the run loop. Work that needs to add or remove tasks
//! should be arranged before calling `run`, or driven by
//! [`Kernel::step`] from an application-owned loop.

#![cfg_attr(not(test), no_std)]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

/// Internal assert macro that doesn't stringify its expression or generate any
/// fancy messages. This means failures must be diagnosed by file:line only, so,
/// don't use this more than once on the same line. In exchange, this makes
/// asserts significantly smaller in terms of text size.
#[allow(unused_macros)]
macro_rules! cheap_assert {
    ($x:expr) => {
        if !$x { panic!(); };
    }
}
#[allow(unused_imports)]
pub(crate) use cheap_assert;

mod log;

pub mod atomic;
pub mod exec;
pub mod sched;
pub mod table;
pub mod tick;

#[cfg(all(feature = "systick", target_arch = "arm"))]
pub mod systick;

use core::fmt;

pub use exec::{
    run_state, set_run_state, AlreadyInitialized, Kernel, NotInitialized,
    RunState, SchedulerState, Step,
};
pub use sched::Scheduler;
pub use table::{Full, NotFound, Task, TaskId, TaskState, TaskTable, DEFAULT_CAPACITY};
pub use tick::{Millis, TickMode, TickSource, TICK_PERIOD};

/// Any error the scheduler API can report.
///
/// Each operation returns its own specific error type; this exists so that
/// applications can use `?` across several of them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// See [`Full`].
    Full,
    /// See [`NotFound`].
    NotFound,
    /// See [`AlreadyInitialized`].
    AlreadyInitialized,
    /// See [`NotInitialized`].
    NotInitialized,
}

impl From<Full> for Error {
    fn from(_: Full) -> Self {
        Self::Full
    }
}

impl From<NotFound> for Error {
    fn from(_: NotFound) -> Self {
        Self::NotFound
    }
}

impl From<AlreadyInitialized> for Error {
    fn from(_: AlreadyInitialized) -> Self {
        Self::AlreadyInitialized
    }
}

impl From<NotInitialized> for Error {
    fn from(_: NotInitialized) -> Self {
        Self::NotInitialized
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => fmt::Display::fmt(&Full, f),
            Self::NotFound => fmt::Display::fmt(&NotFound, f),
            Self::AlreadyInitialized => fmt::Display::fmt(&AlreadyInitialized, f),
            Self::NotInitialized => fmt::Display::fmt(&NotInitialized, f),
        }
    }
}
