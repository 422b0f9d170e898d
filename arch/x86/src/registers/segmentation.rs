// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

// This is inspired and adapted for Tock from the [x86](https://github.com/gz/rust-x86) crate.

//! Segment selectors and the 8-byte descriptors stored in the GDT and IDT.

use super::ring::Ring;
use tock_registers::{register_bitfields, LocalRegisterCopy};

#[cfg(target_arch = "x86")]
use core::arch::asm;

register_bitfields![u16,
    /// Index into the GDT or LDT plus the requested privilege level.
    ///
    /// See Intel 3a, Section 3.4.2 "Segment Selectors"
    pub SEGMENT_SELECTOR[
        RPL OFFSET(0) NUMBITS(2) [],
        TI OFFSET(2) NUMBITS(1) [
            GDT = 0,
            LDT = 1
        ],
        INDEX OFFSET(3) NUMBITS(13) []
    ],
];

#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct SegmentSelector(LocalRegisterCopy<u16, SEGMENT_SELECTOR::Register>);

impl SegmentSelector {
    /// Selector for GDT entry `index` requested at privilege `rpl`.
    pub const fn new(index: u16, rpl: Ring) -> SegmentSelector {
        SegmentSelector(LocalRegisterCopy::new((index << 3) | (rpl as u16)))
    }

    pub fn from_raw(bits: u16) -> SegmentSelector {
        SegmentSelector(LocalRegisterCopy::new(bits))
    }

    pub fn index(&self) -> u16 {
        self.0.read(SEGMENT_SELECTOR::INDEX)
    }

    pub fn bits(&self) -> u16 {
        self.0.get()
    }
}

const P: u32 = 1 << 15;
const S: u32 = 1 << 12;
const DB: u32 = 1 << 22;
const G: u32 = 1 << 23;

/// Entry for IDT, GDT or LDT.
///
/// See Intel 3a, Section 3.4.5 "Segment Descriptors" and Section 6.11 "IDT
/// Descriptors".
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C, packed)]
pub struct Descriptor {
    pub lower: u32,
    pub upper: u32,
}

impl Descriptor {
    pub const NULL: Descriptor = Descriptor { lower: 0, upper: 0 };

    pub const fn from_raw(raw: u64) -> Descriptor {
        Descriptor {
            lower: raw as u32,
            upper: (raw >> 32) as u32,
        }
    }

    pub fn raw(&self) -> u64 {
        ((self.upper as u64) << 32) | self.lower as u64
    }

    pub fn set_dpl(&mut self, ring: Ring) {
        self.upper &= !(0b11 << 13);
        self.upper |= (ring as u32) << 13;
    }

    /// Sets the 32-bit base and the 20-bit limit of a code or data segment.
    pub fn set_base_limit(&mut self, base: u32, limit: u32) {
        self.lower = (base << 16) | (limit & 0xffff);
        self.upper &= 0x00f0_ff00;
        self.upper |= (base >> 16) & 0xff;
        self.upper |= base & 0xff00_0000;
        self.upper |= limit & 0x000f_0000;
    }

    /// Sets the target of a gate: the code segment selector and the 32-bit
    /// entry point, split across both halves of the descriptor.
    pub fn set_selector_offset(&mut self, selector: SegmentSelector, offset: u32) {
        self.lower = ((selector.bits() as u32) << 16) | (offset & 0xffff);
        self.upper &= 0x0000_ffff;
        self.upper |= offset & 0xffff_0000;
    }

    /// Entry point of a gate descriptor.
    pub fn gate_offset(&self) -> u32 {
        (self.upper & 0xffff_0000) | (self.lower & 0xffff)
    }

    /// Code segment selector of a gate descriptor.
    pub fn gate_selector(&self) -> u16 {
        (self.lower >> 16) as u16
    }

    /// Type and attribute byte pair (bits 8-15 of the upper half), e.g.
    /// `0x8E00` for a present 32-bit interrupt gate.
    pub fn attributes(&self) -> u16 {
        (self.upper & 0xff00) as u16
    }

    /// Sets the 4-bit type field (bits 8-11).
    pub fn set_type(&mut self, typ: u8) {
        self.upper &= !(0x0f << 8);
        self.upper |= (typ as u32 & 0x0f) << 8;
    }

    pub fn set_p(&mut self) {
        self.upper |= P;
    }

    /// Marks a code or data segment, as opposed to a system segment or gate.
    pub fn set_s(&mut self) {
        self.upper |= S;
    }

    /// 32-bit default operand size.
    pub fn set_db(&mut self) {
        self.upper |= DB;
    }

    /// Limit counted in 4 KiB pages instead of bytes.
    pub fn set_g(&mut self) {
        self.upper |= G;
    }
}

/// Code segment types (Intel 3a, Table 3-1).
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CodeSegmentType {
    Execute = 0b1000,
    ExecuteRead = 0b1010,
    ExecuteReadConforming = 0b1110,
}

/// Data segment types (Intel 3a, Table 3-1).
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataSegmentType {
    ReadOnly = 0b0000,
    ReadWrite = 0b0010,
    ReadWriteExpand = 0b0110,
}

/// Gate types usable in the IDT (Intel 3a, Table 3-2).
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GateType {
    InterruptGate32 = 0b1110,
    TrapGate32 = 0b1111,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DescriptorType {
    Gate(GateType),
    Code(CodeSegmentType),
    Data(DataSegmentType),
}

enum Target {
    BaseLimit(u32, u32),
    SelectorOffset(SegmentSelector, u32),
}

/// Builds descriptors field by field.
///
/// ```ignore
/// let gate = DescriptorBuilder::interrupt_gate(KERNEL_CODE, entry).present().finish();
/// ```
pub struct DescriptorBuilder {
    target: Target,
    typ: DescriptorType,
    dpl: Option<Ring>,
    present: bool,
    db: bool,
    limit_granularity_4k: bool,
}

impl DescriptorBuilder {
    fn with(target: Target, typ: DescriptorType) -> DescriptorBuilder {
        DescriptorBuilder {
            target,
            typ,
            dpl: None,
            present: false,
            db: false,
            limit_granularity_4k: false,
        }
    }

    /// A 32-bit interrupt gate. The processor clears IF when entering it.
    pub fn interrupt_gate(selector: SegmentSelector, offset: u32) -> DescriptorBuilder {
        Self::with(
            Target::SelectorOffset(selector, offset),
            DescriptorType::Gate(GateType::InterruptGate32),
        )
    }

    pub fn code_segment(base: u32, limit: u32, typ: CodeSegmentType) -> DescriptorBuilder {
        Self::with(Target::BaseLimit(base, limit), DescriptorType::Code(typ))
    }

    pub fn data_segment(base: u32, limit: u32, typ: DataSegmentType) -> DescriptorBuilder {
        Self::with(Target::BaseLimit(base, limit), DescriptorType::Data(typ))
    }

    pub fn present(mut self) -> DescriptorBuilder {
        self.present = true;
        self
    }

    pub fn dpl(mut self, dpl: Ring) -> DescriptorBuilder {
        self.dpl = Some(dpl);
        self
    }

    /// 32-bit segment. Leave unset for the 16-bit segments real mode needs.
    pub fn db(mut self) -> DescriptorBuilder {
        self.db = true;
        self
    }

    pub fn limit_granularity_4kb(mut self) -> DescriptorBuilder {
        self.limit_granularity_4k = true;
        self
    }

    pub fn finish(&self) -> Descriptor {
        let mut desc = Descriptor::NULL;
        match self.target {
            Target::BaseLimit(base, limit) => desc.set_base_limit(base, limit),
            Target::SelectorOffset(selector, offset) => desc.set_selector_offset(selector, offset),
        }
        let typ = match self.typ {
            DescriptorType::Gate(typ) => typ as u8,
            DescriptorType::Code(typ) => {
                desc.set_s();
                typ as u8
            }
            DescriptorType::Data(typ) => {
                desc.set_s();
                typ as u8
            }
        };
        desc.set_type(typ);
        if let Some(ring) = self.dpl {
            desc.set_dpl(ring);
        }
        if self.present {
            desc.set_p();
        }
        if self.db {
            desc.set_db();
        }
        if self.limit_granularity_4k {
            desc.set_g();
        }
        desc
    }
}

/// Reload the stack segment register.
///
/// ## Safety
///
/// Needs CPL 0. The selector must name a writable data segment covering the
/// current stack.
#[cfg(target_arch = "x86")]
pub unsafe fn load_ss(sel: SegmentSelector) {
    unsafe {
        asm!("mov ss, {0:x}", in(reg) sel.bits(), options(nostack, preserves_flags));
    }
}

/// Reload ds, es, fs and gs with the same selector.
///
/// ## Safety
///
/// Needs CPL 0. The selector must name a data segment.
#[cfg(target_arch = "x86")]
pub unsafe fn load_data_segments(sel: SegmentSelector) {
    unsafe {
        asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            in(reg) sel.bits(),
            options(nostack, preserves_flags),
        );
    }
}

/// Reload the code segment register with a far return.
///
/// ## Safety
///
/// Needs CPL 0. The selector must name a code segment that maps the current
/// instruction pointer to the same linear address.
#[cfg(target_arch = "x86")]
pub unsafe fn load_cs(sel: SegmentSelector) {
    unsafe {
        asm!(
            "push {0}",
            "lea {1}, [2f]",
            "push {1}",
            "retf",
            "2:",
            in(reg) sel.bits() as u32,
            out(reg) _,
            options(preserves_flags),
        );
    }
}

/// Returns the selector currently loaded in cs.
#[cfg(target_arch = "x86")]
pub fn cs() -> SegmentSelector {
    let bits: u16;
    // Safety: reading cs has no side effects.
    unsafe {
        asm!("mov {0:x}, cs", out(reg) bits, options(nomem, nostack, preserves_flags));
    }
    SegmentSelector::from_raw(bits)
}

//For CI only

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn load_ss(_sel: SegmentSelector) {
    unimplemented!()
}

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn load_data_segments(_sel: SegmentSelector) {
    unimplemented!()
}

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn load_cs(_sel: SegmentSelector) {
    unimplemented!()
}

#[cfg(not(target_arch = "x86"))]
pub fn cs() -> SegmentSelector {
    SegmentSelector::from_raw(kernel::config::KERNEL_CODE32)
}
