// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

// This is inspired and adapted for Tock from the [x86](https://github.com/gz/rust-x86) crate.

//! Processor state stored in the EFLAGS register.

#[cfg(target_arch = "x86")]
use core::arch::asm;

use tock_registers::{register_bitfields, LocalRegisterCopy};

register_bitfields![u32,
    /// See Intel 1, Section 3.4.3 "EFLAGS Register".
    pub EFLAGS [
        /// Carry
        FLAGS_CF OFFSET(0) NUMBITS(1) [],
        /// Reserved, always reads as one
        FLAGS_A1 OFFSET(1) NUMBITS(1) [],
        /// Parity
        FLAGS_PF OFFSET(2) NUMBITS(1) [],
        /// Auxiliary carry
        FLAGS_AF OFFSET(4) NUMBITS(1) [],
        /// Zero
        FLAGS_ZF OFFSET(6) NUMBITS(1) [],
        /// Sign
        FLAGS_SF OFFSET(7) NUMBITS(1) [],
        /// Trap (single step)
        FLAGS_TF OFFSET(8) NUMBITS(1) [],
        /// Interrupt enable
        FLAGS_IF OFFSET(9) NUMBITS(1) [],
        /// Direction
        FLAGS_DF OFFSET(10) NUMBITS(1) [],
        /// Overflow
        FLAGS_OF OFFSET(11) NUMBITS(1) [],
        /// I/O privilege level
        FLAGS_IOPL OFFSET(12) NUMBITS(2) [],
        /// Nested task
        FLAGS_NT OFFSET(14) NUMBITS(1) [],
        /// Resume
        FLAGS_RF OFFSET(16) NUMBITS(1) [],
        /// Virtual 8086 mode
        FLAGS_VM OFFSET(17) NUMBITS(1) [],
        /// Alignment check
        FLAGS_AC OFFSET(18) NUMBITS(1) [],
        /// Virtual interrupt
        FLAGS_VIF OFFSET(19) NUMBITS(1) [],
        /// Virtual interrupt pending
        FLAGS_VIP OFFSET(20) NUMBITS(1) [],
        /// CPUID available
        FLAGS_ID OFFSET(21) NUMBITS(1) [],
    ]
];

/// A copy of the EFLAGS register.
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct EFlags(pub LocalRegisterCopy<u32, EFLAGS::Register>);

impl EFlags {
    /// Flags with only the always-one bit set: interrupts disabled, all
    /// arithmetic flags clear.
    pub const fn new() -> EFlags {
        EFlags(LocalRegisterCopy::new(1 << 1))
    }

    pub const fn from_bits(bits: u32) -> EFlags {
        EFlags(LocalRegisterCopy::new(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0.get()
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.0.is_set(EFLAGS::FLAGS_IF)
    }

    /// Returns a copy with the interrupt flag set.
    pub fn with_interrupts(mut self) -> EFlags {
        self.0.modify(EFLAGS::FLAGS_IF::SET);
        self
    }
}

/// Reads the current value of EFLAGS.
///
/// ## Safety
///
/// Always safe to execute; `unsafe` only for symmetry with the other
/// register accessors.
#[cfg(target_arch = "x86")]
pub unsafe fn read() -> EFlags {
    let bits: u32;
    unsafe {
        asm!("pushfd; pop {0}", out(reg) bits, options(preserves_flags));
    }
    EFlags::from_bits(bits)
}

//For CI only

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn read() -> EFlags {
    let flags = EFlags::new();
    if super::super::irq::are_enabled() {
        flags.with_interrupts()
    } else {
        flags
    }
}
