// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Interrupt descriptor table.

use super::trampoline::TrampolineTable;
use super::NUM_VECTORS;
use crate::gdt;
use crate::registers::dtables::{self, DescriptorTablePointer};
use crate::registers::segmentation::{Descriptor, DescriptorBuilder};

/// One interrupt gate per vector.
///
/// Vectors at or above [`NUM_VECTORS`] are outside the table limit, so
/// raising one is a general protection fault.
#[repr(C, align(8))]
pub struct Idt {
    entries: [Descriptor; NUM_VECTORS],
}

impl Idt {
    pub const fn new() -> Idt {
        Idt {
            entries: [Descriptor::NULL; NUM_VECTORS],
        }
    }

    /// Points every vector's gate at that vector's own trampoline.
    ///
    /// Interrupt gates (not trap gates) are used so that handlers always run
    /// with IF clear.
    pub fn fill(&mut self, trampolines: &TrampolineTable) {
        for (vector, entry) in self.entries.iter_mut().enumerate() {
            *entry = DescriptorBuilder::interrupt_gate(
                gdt::KERNEL_CODE,
                trampolines.address(vector as u8),
            )
            .present()
            .finish();
        }
    }

    pub fn entry(&self, vector: u8) -> Descriptor {
        self.entries[vector as usize]
    }

    pub fn pointer(&self) -> DescriptorTablePointer<Descriptor> {
        DescriptorTablePointer::new_from_slice(&self.entries)
    }

    /// Makes this table the processor's IDT.
    ///
    /// ## Safety
    ///
    /// Ring 0. The table and the trampolines it points at must stay in place
    /// for as long as it is loaded.
    pub unsafe fn load(&'static self) {
        unsafe {
            dtables::lidt(&self.pointer());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_gate_targets_its_own_trampoline() {
        let mut trampolines = TrampolineTable::new();
        trampolines.build(0x0010_0000);
        let mut idt = Idt::new();
        idt.fill(&trampolines);

        for vector in 0..NUM_VECTORS as u8 {
            let gate = idt.entry(vector);
            assert_eq!(gate.gate_offset(), trampolines.address(vector));
            assert_eq!(gate.gate_selector(), 0x08);
            assert_eq!(gate.attributes(), 0x8E00);
        }

        for a in 0..NUM_VECTORS as u8 {
            for b in (a + 1)..NUM_VECTORS as u8 {
                assert_ne!(idt.entry(a).gate_offset(), idt.entry(b).gate_offset());
            }
        }
    }

    #[test]
    fn pointer_covers_all_vectors() {
        let idt = Idt::new();
        let pointer = idt.pointer();
        assert_eq!({ pointer.limit } as usize, NUM_VECTORS * 8 - 1);
        assert_eq!(pointer.entries(), NUM_VECTORS);
    }
}
