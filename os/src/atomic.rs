// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Atomic "polyfill" for the one read-modify-write operation the scheduler
//! needs.
//!
//! The tick-pending flag is raised by an interrupt handler and consumed by the
//! run loop with a single atomic swap, so that a tick landing between "read
//! the flag" and "clear the flag" can't be lost. ARMv6-M processors like the
//! Cortex-M0 have no atomic swap instruction. On those parts the swap is done
//! with interrupts briefly disabled instead; everywhere else the native
//! operation is used.
//!
//! Which path is taken is decided by `build.rs` from the target triple.

use core::sync::atomic::{AtomicBool, Ordering};

/// Atomic swap that works on every supported core.
pub trait AtomicExt {
    /// Primitive type corresponding to this atomic type.
    type Value;

    /// Atomically exchange our current contents for `val`, returning the
    /// original contents.
    ///
    /// Replacement for `swap`.
    fn swap_polyfill(&self, val: Self::Value, ordering: Ordering) -> Self::Value;
}

#[cfg(sos_has_native_rmw)]
impl AtomicExt for AtomicBool {
    type Value = bool;

    #[inline(always)]
    fn swap_polyfill(&self, val: bool, ordering: Ordering) -> bool {
        self.swap(val, ordering)
    }
}

#[cfg(not(sos_has_native_rmw))]
impl AtomicExt for AtomicBool {
    type Value = bool;

    #[inline(always)]
    fn swap_polyfill(&self, val: bool, ordering: Ordering) -> bool {
        let (lo, so) = rmw_ordering(ordering);
        cortex_m::interrupt::free(|_| {
            let x = self.load(lo);
            self.store(val, so);
            x
        })
    }
}

/// Splits a read-modify-write ordering into the load and store halves used by
/// the interrupt-masking fallback.
#[cfg(not(sos_has_native_rmw))]
#[inline(always)]
fn rmw_ordering(o: Ordering) -> (Ordering, Ordering) {
    match o {
        Ordering::AcqRel => (Ordering::Acquire, Ordering::Release),
        Ordering::Acquire => (Ordering::Acquire, Ordering::Relaxed),
        Ordering::Release => (Ordering::Relaxed, Ordering::Release),
        _ => (o, o),
    }
}
