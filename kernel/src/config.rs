// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Data structure for storing compile-time configuration options.
//!
//! Configuration lives in a typed `const` object rather than being spread
//! across `#[cfg]` attributes. All code paths are type-checked even when an
//! option is off, and the compiler folds the constant away afterwards, so a
//! disabled trace costs nothing in the final image.
//!
//! Hardware layout constants that must agree between the architecture crate,
//! the chip crate and boards also live here.

/// Data structure holding compile-time configuration options.
///
/// To change the configuration, enable the matching cargo feature on the
/// `kernel` dependency from the board crate.
pub struct Config {
    /// Whether every dispatched interrupt is written to the debug output,
    /// with its vector and the address of the interrupted instruction.
    pub trace_interrupts: bool,

    /// Whether each real-mode BIOS call is traced, with the register file
    /// before and after the firmware ran.
    pub trace_bios_calls: bool,

    /// Prefix written in front of every `debug!` line.
    pub debug_tag: &'static str,
}

/// The unique instance of `Config`. This is the only place where the runtime
/// uses `cfg!` to react to cargo features.
pub const CONFIG: Config = Config {
    trace_interrupts: cfg!(feature = "trace_interrupts"),
    trace_bios_calls: cfg!(feature = "trace_bios_calls"),
    debug_tag: "KERNEL",
};

/// Number of IDT entries that are populated and dispatched: the 32 CPU
/// exceptions followed by the 16 PIC lines.
pub const NUM_VECTORS: usize = 0x30;

/// Vectors below this value are CPU exceptions.
pub const NUM_FAULT_VECTORS: usize = 0x20;

/// Vector that PIC line 0 is remapped to. Line `n` arrives at
/// `IRQ_VECTOR_BASE + n`.
pub const IRQ_VECTOR_BASE: u8 = 0x20;

/// Number of interrupt lines behind the two cascaded 8259 controllers.
pub const NUM_IRQ_LINES: usize = 16;

/// Real-mode scratch area the BIOS bridge is copied into. Must be below 1 MiB
/// and 16-byte aligned so that `segment:0` addressing reaches every byte.
pub const REALMODE_SCRATCH: usize = 0x2000;

/// Flat 32-bit ring 0 code segment.
pub const KERNEL_CODE32: u16 = 0x08;
/// Flat 32-bit ring 0 data segment.
pub const KERNEL_DATA32: u16 = 0x10;
/// 64 KiB 16-bit code segment used while dropping to real mode.
pub const KERNEL_CODE16: u16 = 0x18;
/// 64 KiB 16-bit data segment used while dropping to real mode.
pub const KERNEL_DATA16: u16 = 0x20;

const _: () = assert!(NUM_VECTORS == NUM_FAULT_VECTORS + NUM_IRQ_LINES);
const _: () = assert!(IRQ_VECTOR_BASE as usize == NUM_FAULT_VECTORS);
const _: () = assert!(REALMODE_SCRATCH % 16 == 0);
const _: () = assert!(REALMODE_SCRATCH < 0x10_0000);
