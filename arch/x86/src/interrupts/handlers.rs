// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Vector-indexed handler registry.

use core::cell::Cell;
use core::ptr;

use kernel::config::CONFIG;
use kernel::debug;

use super::context::{is_resumable, Context};
use super::{Handler, NUM_FAULT_VECTORS, NUM_VECTORS};
use crate::support::InterruptGuard;

/// Handler installed in every slot until something replaces it.
pub fn default_handler(_vector: u8) {}

/// One handler per vector, plus the live context of every vector whose
/// handler is currently running.
///
/// Slots always hold a callable handler; there is no way to remove one, only
/// to put [`default_handler`] back.
pub struct HandlerTable {
    handlers: [Cell<Handler>; NUM_VECTORS],
    live: [Cell<*mut Context>; NUM_VECTORS],
}

// Safety: the table is only written with an `InterruptGuard` held and only
// read by the interrupt entry path, which cannot run while a guard is held.
// There is a single processor.
unsafe impl Sync for HandlerTable {}

impl HandlerTable {
    pub const fn new() -> HandlerTable {
        HandlerTable {
            handlers: [const { Cell::new(default_handler as Handler) }; NUM_VECTORS],
            live: [const { Cell::new(ptr::null_mut()) }; NUM_VECTORS],
        }
    }

    /// Installs `handler` for `vector`.
    pub fn set(&self, _guard: &InterruptGuard, vector: u8, handler: Handler) {
        debug_assert!((vector as usize) < NUM_VECTORS);
        self.handlers[vector as usize].set(handler);
    }

    /// Installs `handler` for every exception vector. IRQ vectors keep their
    /// handlers.
    pub fn set_faults(&self, guard: &InterruptGuard, handler: Handler) {
        for vector in 0..NUM_FAULT_VECTORS as u8 {
            self.set(guard, vector, handler);
        }
    }

    /// Puts the default handler back in every slot.
    pub fn reset(&self, _guard: &InterruptGuard) {
        for slot in self.handlers.iter() {
            slot.set(default_handler);
        }
    }

    /// Handler currently installed for `vector`.
    pub fn get(&self, vector: u8) -> Handler {
        self.handlers[vector as usize].get()
    }

    /// Runs the handler for the vector recorded in `ctx`.
    ///
    /// `ctx` stays reachable through [`HandlerTable::with_context`] while the
    /// handler runs. A handler that moves `esp` must leave a value accepted
    /// by [`is_resumable`].
    ///
    /// ## Safety
    ///
    /// `ctx` must point to a valid context that outlives the call and is not
    /// otherwise accessed during it. Interrupts must be disabled, which holds
    /// inside an interrupt gate.
    pub unsafe fn dispatch(&self, ctx: *mut Context) {
        let vector = unsafe { (*ctx).vector } as u8;
        if CONFIG.trace_interrupts {
            debug!("interrupt {:#04x} eip={:#010x}", vector, unsafe {
                (*ctx).eip
            });
        }
        let slot = &self.live[vector as usize];
        let outer = slot.replace(ctx);
        (self.handlers[vector as usize].get())(vector);
        slot.set(outer);
        if cfg!(target_arch = "x86") {
            debug_assert!(is_resumable(ctx as usize as u32, unsafe { (*ctx).esp }));
        }
    }

    /// Gives `f` the live context of `vector`, if its handler is running.
    ///
    /// This is how a handler inspects a fault or switches stacks: changes
    /// made through the reference are what the interrupted code resumes
    /// with.
    pub fn with_context<F, R>(&self, vector: u8, f: F) -> Option<R>
    where
        F: FnOnce(&mut Context) -> R,
    {
        let ctx = self.live[vector as usize].get();
        if ctx.is_null() {
            return None;
        }
        // Safety: the pointer was stored by `dispatch`, whose caller
        // guarantees it is valid and exclusive until the handler returns,
        // and it is cleared before `dispatch` returns.
        Some(f(unsafe { &mut *ctx }))
    }
}
