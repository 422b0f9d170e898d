// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Legacy PC platform devices: the cascaded 8259 interrupt controllers, the
//! 8253 timer and the QEMU debug console.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod debugcon;
pub mod pic;
pub mod pit;

use kernel::debug;
use x86::registers::io::{PortIo, Ports};
use x86::registers::irq;
use x86::support::with_interrupts_disabled;

/// The interrupt controllers at their standard ports.
pub static PIC: pic::Pic<Ports> = pic::Pic::new(unsafe { Ports::new() });

/// Brings up interrupt handling: descriptor tables and trampolines, every
/// handler reset to the default, the PIC remapped with all lines masked.
/// Returns with interrupts enabled.
///
/// Calling it again resets handlers and masks to the same state.
///
/// ## Safety
///
/// Ring 0, at boot or with no handler state worth keeping.
pub unsafe fn init<P: PortIo>(pic: &pic::Pic<P>) {
    unsafe {
        x86::init();
    }
    with_interrupts_disabled(|guard| pic.init(guard));
    debug!("interrupts up");
    unsafe {
        irq::enable();
    }
}
