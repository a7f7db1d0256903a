// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cortex-M SysTick implementation of [`TickSource`].
//!
//! **Note:** this module is only available if the `systick` feature is
//! enabled and the target is ARM.
//!
//! Using this module defines the `SysTick` exception handler for your
//! program, so you can't define your own. If you need the SysTick Timer for
//! something else, implement [`TickSource`] for a different timer instead.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::interrupt::{self, Mutex};
use cortex_m::peripheral::{syst::SystClkSource, SYST};
use cortex_m_rt::exception;

use crate::cheap_assert;
use crate::tick::{Millis, TickHandler, TickMode, TickSource};

/// Handler registered through `set_tick_callback`, called from the ISR.
static HANDLER: Mutex<Cell<Option<TickHandler>>> = Mutex::new(Cell::new(None));

/// Set when configured for [`TickMode::OneShot`]; the ISR then halts the
/// counter after the first tick.
static ONE_SHOT: AtomicBool = AtomicBool::new(false);

/// The SysTick Timer, counting the core clock.
#[derive(Debug)]
pub struct SysTickSource {
    syst: SYST,
    clock_hz: u32,
}

impl SysTickSource {
    /// Takes ownership of the SysTick Timer, given a CPU core clock of
    /// `clock_hz`. The timer is left alone until the kernel configures it.
    pub fn new(syst: SYST, clock_hz: u32) -> Self {
        Self { syst, clock_hz }
    }

    /// Gives the SysTick Timer back.
    pub fn free(self) -> SYST {
        self.syst
    }
}

impl TickSource for SysTickSource {
    fn configure(&mut self, mode: TickMode, period: Millis) {
        let cycles = (self.clock_hz / 1000).saturating_mul(period.0);
        // The reload register is 24 bits, and a reload of 0 never fires.
        cheap_assert!(cycles > 1 && cycles <= 1 << 24);

        ONE_SHOT.store(mode == TickMode::OneShot, Ordering::Relaxed);
        self.syst.set_reload(cycles - 1);
        self.syst.set_clock_source(SystClkSource::Core);
        self.syst.enable_interrupt();
    }

    fn start(&mut self) {
        self.syst.clear_current();
        self.syst.enable_counter();
    }

    fn stop(&mut self) {
        self.syst.disable_counter();
    }

    fn resume(&mut self) {
        self.syst.enable_counter();
    }

    fn set_tick_callback(&mut self, handler: TickHandler) {
        interrupt::free(|cs| HANDLER.borrow(cs).set(Some(handler)));
    }
}

/// System tick ISR. Calls the registered handler; the kernel's handler just
/// raises a flag for the run loop.
#[doc(hidden)]
#[exception]
fn SysTick() {
    if ONE_SHOT.load(Ordering::Relaxed) {
        // Safety: PTR is the SysTick register block. Clearing ENABLE only
        // races with a thread-mode CSR update, and the owner of the
        // `SysTickSource` doesn't touch CSR while a one-shot is in flight.
        unsafe {
            (*SYST::PTR).csr.modify(|v| v & !1);
        }
    }

    if let Some(handler) = interrupt::free(|cs| HANDLER.borrow(cs).get()) {
        handler();
    }
}
