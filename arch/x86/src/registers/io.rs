// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

// This is inspired and adapted for Tock from the [x86](https://github.com/gz/rust-x86) crate.

//! I/O port access.
//!
//! The raw `in`/`out` wrappers are free functions. Device drivers that want
//! to be testable off target take a [`PortIo`] instead and are handed
//! [`Ports`] on real hardware.

#[cfg(target_arch = "x86")]
use core::arch::asm;

/// Write 8 bits to I/O port.
///
/// ## Safety
///
/// Requires I/O privileges. Writing to an arbitrary port can reconfigure
/// hardware in ways the rest of the system does not expect.
#[cfg(target_arch = "x86")]
pub unsafe fn outb(port: u16, val: u8) {
    unsafe {
        asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}

/// Read 8 bits from I/O port.
///
/// ## Safety
///
/// Requires I/O privileges. Reads may have side effects on the device.
#[cfg(target_arch = "x86")]
pub unsafe fn inb(port: u16) -> u8 {
    let ret: u8;
    unsafe {
        asm!("in al, dx", out("al") ret, in("dx") port, options(nomem, nostack, preserves_flags));
    }
    ret
}

//For CI only

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn outb(_port: u16, _val: u8) {
    unimplemented!()
}

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn inb(_port: u16) -> u8 {
    unimplemented!()
}

/// Unused port that POST cards listen on. Writing to it takes roughly one
/// microsecond, long enough for slow ISA devices to settle.
pub const POST_PORT: u16 = 0x80;

/// Byte-wide port access used by drivers.
pub trait PortIo {
    fn read8(&self, port: u16) -> u8;

    fn write8(&self, port: u16, value: u8);

    /// Short delay between accesses to devices that need one.
    fn wait(&self) {
        self.write8(POST_PORT, 0);
    }
}

/// The processor's real I/O port space.
#[derive(Copy, Clone, Debug)]
pub struct Ports(());

impl Ports {
    /// ## Safety
    ///
    /// The caller must be running with I/O privileges, and is responsible for
    /// the ports handed to drivers through this value.
    pub const unsafe fn new() -> Ports {
        Ports(())
    }
}

impl PortIo for Ports {
    fn read8(&self, port: u16) -> u8 {
        // Safety: the constructor's contract grants I/O privileges.
        unsafe { inb(port) }
    }

    fn write8(&self, port: u16, value: u8) {
        // Safety: as above.
        unsafe { outb(port, value) }
    }
}
