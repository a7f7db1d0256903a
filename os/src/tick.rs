// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tick: the scheduler's unit of time, and the interface to whatever
//! hardware produces it.
//!
//! The scheduler doesn't own a timer. It consumes one through the
//! [`TickSource`] trait, which the application implements for its board (or
//! gets from the [`systick`][crate::systick] module on Cortex-M). The kernel
//! configures the source for periodic operation at [`TICK_PERIOD`] and
//! registers [`on_tick`] as its interrupt callback.
//!
//! # Deferred work
//!
//! `on_tick` runs in interrupt context and does exactly one thing: it raises
//! the process-wide [`TICK_PENDING`] flag. It never touches the task table.
//! The run loop notices the flag on its next pass, clears it, and does the
//! actual aging of task counters in thread context. This keeps the interrupt
//! handler O(1) and means no lock is needed anywhere.
//!
//! The flag is a single bit, so if the run loop falls more than one tick
//! behind (because a task ran too long), the extra ticks are coalesced and
//! lost. Keep tasks short.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::atomic::AtomicExt;

/// A relative time interval in milliseconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Millis(pub u32);

impl From<Millis> for u32 {
    fn from(x: Millis) -> Self {
        x.0
    }
}

impl From<u32> for Millis {
    fn from(x: u32) -> Self {
        Self(x)
    }
}

/// Interval between ticks. Task delays and periods are counted in ticks, so
/// this is also the resolution of the scheduler.
pub const TICK_PERIOD: Millis = Millis(1);

/// How a [`TickSource`] should behave after it fires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickMode {
    /// Fire every period until stopped. This is what the kernel uses.
    Periodic,
    /// Fire once, then stop counting.
    OneShot,
}

/// Interrupt callback type registered with a [`TickSource`].
pub type TickHandler = fn();

/// A hardware timer that can generate a periodic interrupt.
///
/// Implementations are expected to call the registered [`TickHandler`] from
/// their interrupt service routine each time the timer fires, and only while
/// the timer is running.
pub trait TickSource {
    /// Sets the timer's mode and interval. This must not change whether the
    /// timer is running.
    fn configure(&mut self, mode: TickMode, period: Millis);

    /// Starts the timer counting from the beginning of a period.
    fn start(&mut self);

    /// Halts the timer. No ticks are delivered until `resume` or `start`.
    fn stop(&mut self);

    /// Restarts a stopped timer without resetting its count.
    fn resume(&mut self);

    /// Sets the function called, in interrupt context, on each tick.
    fn set_tick_callback(&mut self, handler: TickHandler);
}

/// A single-bit flag used to pass "a tick happened" from an interrupt handler
/// to the run loop.
///
/// There must be at most one context raising the flag and one context taking
/// it. Both operations are safe to use from an ISR.
#[derive(Debug, Default)]
pub struct TickFlag(AtomicBool);

impl TickFlag {
    /// Creates a flag with no tick pending.
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Records that a tick has occurred.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether a tick was pending.
    pub fn take(&self) -> bool {
        self.0.swap_polyfill(false, Ordering::AcqRel)
    }

    /// Checks for a pending tick without consuming it.
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Raised by [`on_tick`], consumed by the kernel's run loop.
pub static TICK_PENDING: TickFlag = TickFlag::new();

/// Tick interrupt handler. The kernel registers this with its [`TickSource`]
/// during `init`.
///
/// This is ISR-safe and O(1).
pub fn on_tick() {
    TICK_PENDING.raise();
}
