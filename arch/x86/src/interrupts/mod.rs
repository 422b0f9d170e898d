// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interrupt and exception handling.
//!
//! [`init`] synthesizes one trampoline per vector, points the IDT at them and
//! loads it. From then on every vector funnels through the same entry code
//! into [`HANDLERS`], which calls whatever was registered for the vector with
//! [`set_handler`] or [`set_fault_handlers`].
//!
//! Handlers are plain `fn(vector)`. A handler that needs the interrupted
//! state (to print a fault, or to switch tasks) asks for it with
//! [`with_context`].
//!
//! ```ignore
//! fn timer(vector: u8) {
//!     interrupts::with_context(vector, |ctx| scheduler.switch(ctx));
//! }
//!
//! interrupts::set_handler(interrupts::irq_vector(0), timer);
//! ```

use core::ptr::{addr_of, addr_of_mut};

use kernel::config::CONFIG;
use kernel::debug;

pub mod context;
pub mod entry;
pub mod handlers;
pub mod idt;
pub mod trampoline;

pub use kernel::config::{IRQ_VECTOR_BASE, NUM_FAULT_VECTORS, NUM_IRQ_LINES, NUM_VECTORS};

pub use self::context::{init_context, is_resumable, restore, save, Context, TaskEntry};
pub use self::handlers::{default_handler, HandlerTable};

use self::idt::Idt;
use self::trampoline::TrampolineTable;
use crate::support::InterruptGuard;

/// Interrupt handler. Receives the vector that fired.
pub type Handler = fn(vector: u8);

const _: () = assert!(NUM_VECTORS > NUM_FAULT_VECTORS);
const _: () = assert!(NUM_VECTORS > IRQ_VECTOR_BASE as usize + NUM_IRQ_LINES - 1);
const _: () = assert!(NUM_VECTORS <= 256);

/// Vector that PIC line `line` is delivered on.
pub const fn irq_vector(line: u8) -> u8 {
    IRQ_VECTOR_BASE + line
}

/// The registry the interrupt entry path dispatches through.
pub static HANDLERS: HandlerTable = HandlerTable::new();

static mut TRAMPOLINES: TrampolineTable = TrampolineTable::new();
static mut IDT: Idt = Idt::new();

/// Builds the trampolines and IDT, loads the IDT and resets every handler to
/// the default.
///
/// Interrupts are disabled for the duration and returned to their previous
/// state afterwards. Calling it again rebuilds everything from scratch.
///
/// ## Safety
///
/// Ring 0, with the GDT from [`crate::gdt`] loaded.
pub unsafe fn init() {
    let guard = InterruptGuard::new();
    unsafe {
        let trampolines = &mut *addr_of_mut!(TRAMPOLINES);
        trampolines.build(entry::interrupt_entry_address());
        let idt = &mut *addr_of_mut!(IDT);
        idt.fill(trampolines);
        (*addr_of!(IDT)).load();
    }
    HANDLERS.reset(&guard);
    debug!(
        "idt: {} vectors, trampolines at {:#010x}",
        NUM_VECTORS,
        addr_of!(TRAMPOLINES) as usize
    );
}

/// Installs `handler` for `vector`. The slot is written with interrupts
/// disabled, so the entry path never sees a half-written pointer.
pub fn set_handler(vector: u8, handler: Handler) {
    let guard = InterruptGuard::new();
    HANDLERS.set(&guard, vector, handler);
    if CONFIG.trace_interrupts {
        debug!("idt: vector {:#04x} handler {:#010x}", vector, handler as usize);
    }
}

/// Installs `handler` for all exception vectors, typically a handler that
/// prints the context and halts.
pub fn set_fault_handlers(handler: Handler) {
    let guard = InterruptGuard::new();
    HANDLERS.set_faults(&guard, handler);
}

/// Runs `f` on the live context of `vector`. Returns `None` unless called
/// while the handler for `vector` is running.
pub fn with_context<F, R>(vector: u8, f: F) -> Option<R>
where
    F: FnOnce(&mut Context) -> R,
{
    HANDLERS.with_context(vector, f)
}
