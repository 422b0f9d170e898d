// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Support for 32-bit x86 processors running in protected mode.
//!
//! This crate owns everything that touches processor state directly:
//!
//! * [`registers`]: descriptor, segment, flag and port I/O primitives.
//! * [`gdt`]: the flat global descriptor table, including the 16-bit segments
//!   needed to drop back to real mode.
//! * [`interrupts`]: the interrupt descriptor table, the per-vector
//!   trampolines, the handler registry and the execution context model.
//! * [`realmode`]: the bridge used to call legacy BIOS services.
//!
//! Board code normally calls [`init`] once and then attaches handlers through
//! [`interrupts::set_handler`]. Programming the interrupt controller is left
//! to the chip crate.
//!
//! Everything that requires ring 0 instructions is compiled only for
//! `target_arch = "x86"`. Other targets get stand-ins so the data structures
//! and encodings can be unit tested on a development machine.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod gdt;
pub mod interrupts;
pub mod realmode;
pub mod registers;
pub mod support;

#[cfg(target_arch = "x86")]
use core::arch::asm;

/// Sets up the descriptor tables: the GDT is installed and segment registers
/// reloaded, then the IDT and trampolines are built and loaded.
///
/// Interrupts are left disabled on return.
///
/// ## Safety
///
/// Must be called once, in ring 0, before interrupts are enabled.
pub unsafe fn init() {
    unsafe {
        registers::irq::disable();
        gdt::init();
        interrupts::init();
    }
}

/// Stops the processor until the next interrupt arrives.
///
/// ## Safety
///
/// Requires ring 0.
#[cfg(target_arch = "x86")]
pub unsafe fn halt() {
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

//For CI only

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn halt() {
    core::hint::spin_loop();
}
