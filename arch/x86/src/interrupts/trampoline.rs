// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Per-vector entry stubs, synthesized at boot.
//!
//! The IDT has to point every vector somewhere that knows which vector fired.
//! Rather than assembling one stub per vector, a 16-byte stub is encoded for
//! each vector into a static table. Every stub has the same shape:
//!
//! ```text
//! 6a 00          push 0           ; placeholder error code
//!                                 ; (90 90 nop nop if the CPU pushes one)
//! 68 vv 00 00 00 push vector
//! e9 rr rr rr rr jmp interrupt_entry
//! cc cc cc cc                     ; padding
//! ```
//!
//! so the shared entry always finds the same frame. The stub does not know
//! which handler will run: the entry path looks it up in the handler
//! registry when the interrupt arrives, so handlers can be replaced without
//! touching this table.

use super::NUM_VECTORS;
use crate::registers::irq;

/// Bytes reserved for each stub. A power of two keeps the stubs aligned and
/// makes a stub's address easy to compute.
pub const TRAMPOLINE_SIZE: usize = 16;

const PUSH_IMM8: u8 = 0x6a;
const PUSH_IMM32: u8 = 0x68;
const JMP_REL32: u8 = 0xe9;
const NOP: u8 = 0x90;
const INT3: u8 = 0xcc;

/// Offset of the byte following the `jmp`, which the jump is relative to.
const JMP_END: usize = 12;

/// One vector's entry stub.
#[repr(C, align(16))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Trampoline([u8; TRAMPOLINE_SIZE]);

const _: () = assert!(core::mem::size_of::<Trampoline>() == TRAMPOLINE_SIZE);

impl Trampoline {
    /// A stub that traps immediately if it is ever reached.
    pub const fn empty() -> Trampoline {
        Trampoline([INT3; TRAMPOLINE_SIZE])
    }

    /// Encodes the stub for `vector`, to be placed at linear address `at`,
    /// that jumps to `entry`.
    pub fn encode(vector: u8, at: u32, entry: u32) -> Trampoline {
        let mut code = [INT3; TRAMPOLINE_SIZE];
        if irq::has_error_code(vector) {
            code[0] = NOP;
            code[1] = NOP;
        } else {
            code[0] = PUSH_IMM8;
            code[1] = 0;
        }
        code[2] = PUSH_IMM32;
        code[3..7].copy_from_slice(&(vector as u32).to_le_bytes());
        code[7] = JMP_REL32;
        let rel = entry.wrapping_sub(at.wrapping_add(JMP_END as u32));
        code[8..12].copy_from_slice(&rel.to_le_bytes());
        Trampoline(code)
    }

    pub fn bytes(&self) -> &[u8; TRAMPOLINE_SIZE] {
        &self.0
    }

    /// Vector number pushed by this stub.
    pub fn vector(&self) -> u32 {
        u32::from_le_bytes([self.0[3], self.0[4], self.0[5], self.0[6]])
    }

    /// Absolute jump target, given that the stub lives at `at`.
    pub fn target(&self, at: u32) -> u32 {
        let rel = u32::from_le_bytes([self.0[8], self.0[9], self.0[10], self.0[11]]);
        at.wrapping_add(JMP_END as u32).wrapping_add(rel)
    }

    /// Whether the stub pushes a placeholder error code.
    pub fn pushes_error_code(&self) -> bool {
        self.0[0] == PUSH_IMM8
    }
}

/// Stubs for every vector, in vector order.
#[repr(C, align(16))]
pub struct TrampolineTable {
    stubs: [Trampoline; NUM_VECTORS],
}

impl TrampolineTable {
    pub const fn new() -> TrampolineTable {
        TrampolineTable {
            stubs: [Trampoline::empty(); NUM_VECTORS],
        }
    }

    /// Encodes every stub against its own address in this table.
    pub fn build(&mut self, entry: u32) {
        for (vector, stub) in self.stubs.iter_mut().enumerate() {
            let at = core::ptr::from_mut(stub) as usize as u32;
            *stub = Trampoline::encode(vector as u8, at, entry);
        }
    }

    /// Linear address of the stub for `vector`.
    pub fn address(&self, vector: u8) -> u32 {
        core::ptr::from_ref(&self.stubs[vector as usize]) as usize as u32
    }

    #[cfg(test)]
    fn stub(&self, vector: u8) -> &Trampoline {
        &self.stubs[vector as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_vector_encoding() {
        let stub = Trampoline::encode(0x20, 0x0010_0000, 0x0010_2000);
        assert_eq!(
            stub.bytes(),
            &[
                0x6a, 0x00, 0x68, 0x20, 0x00, 0x00, 0x00, 0xe9, 0xf4, 0x1f, 0x00, 0x00, 0xcc,
                0xcc, 0xcc, 0xcc
            ]
        );
        assert_eq!(stub.target(0x0010_0000), 0x0010_2000);
    }

    #[test]
    fn error_code_vector_skips_placeholder() {
        let stub = Trampoline::encode(13, 0x0010_0000, 0x0010_2000);
        assert_eq!(&stub.bytes()[..3], &[0x90, 0x90, 0x68]);
        assert!(!stub.pushes_error_code());
        assert_eq!(stub.vector(), 13);
    }

    #[test]
    fn backwards_jump() {
        let stub = Trampoline::encode(1, 0x0020_0000, 0x0010_0000);
        assert_eq!(stub.target(0x0020_0000), 0x0010_0000);
    }

    #[test]
    fn table_stubs_are_distinct_and_reach_entry() {
        let mut table = TrampolineTable::new();
        let entry = 0x0040_1230;
        table.build(entry);
        for vector in 0..NUM_VECTORS as u8 {
            let stub = table.stub(vector);
            let at = table.address(vector);
            assert_eq!(at % TRAMPOLINE_SIZE as u32, 0);
            assert_eq!(stub.vector(), vector as u32);
            assert_eq!(stub.target(at), entry);
            assert_eq!(stub.pushes_error_code(), !irq::has_error_code(vector));
            if vector > 0 {
                assert_eq!(at.wrapping_sub(table.address(vector - 1)), 16);
            }
        }
    }
}
