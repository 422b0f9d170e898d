// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interrupt-masking scopes.
//!
//! With a single processor the only way to make a sequence of accesses atomic
//! with respect to interrupt handlers is to clear IF around it. State shared
//! with handlers (the handler registry, the PIC mask registers) is only
//! reachable through an [`InterruptGuard`], so holding one is the proof that
//! the sequence cannot be preempted.

use core::marker::PhantomData;

use crate::registers::irq;

/// Keeps interrupts disabled while alive and restores the previous state of
/// IF on drop, so guards nest.
pub struct InterruptGuard {
    was_enabled: bool,
    // Restoring IF on another stack of control would be wrong; keep the
    // guard on the one that created it.
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    pub fn new() -> InterruptGuard {
        let was_enabled = irq::are_enabled();
        // Safety: every caller runs in ring 0.
        unsafe {
            irq::disable();
        }
        InterruptGuard {
            was_enabled,
            _not_send: PhantomData,
        }
    }

    /// Whether interrupts will be re-enabled when this guard is dropped.
    pub fn restores_interrupts(&self) -> bool {
        self.was_enabled
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            // Safety: interrupts were enabled when the guard was created.
            unsafe {
                irq::enable();
            }
        }
    }
}

/// Executes `f` with interrupts disabled and restores the previous state
/// afterwards.
///
/// ```ignore
/// with_interrupts_disabled(|guard| pic.set_mask(guard, 0, true));
/// ```
pub fn with_interrupts_disabled<F, R>(f: F) -> R
where
    F: FnOnce(&InterruptGuard) -> R,
{
    let guard = InterruptGuard::new();
    f(&guard)
}

/// Stops the processor for good. Interrupts are disabled first so nothing
/// can wake it.
pub fn halt_forever() -> ! {
    loop {
        // Safety: ring 0.
        unsafe {
            irq::disable();
            crate::halt();
        }
    }
}
