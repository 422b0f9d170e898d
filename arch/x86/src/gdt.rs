// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Global descriptor table.
//!
//! Flat 4 GiB code and data segments for protected mode, plus 64 KiB 16-bit
//! code and data segments. The 16-bit pair is the intermediate step the BIOS
//! bridge needs: the processor must be running 16-bit code with 64 KiB limits
//! before protection can be switched off.

use core::ptr::addr_of;

use kernel::config;

use crate::registers::dtables::{self, DescriptorTablePointer};
use crate::registers::ring::Ring;
use crate::registers::segmentation::{
    self, CodeSegmentType, DataSegmentType, Descriptor, DescriptorBuilder, SegmentSelector,
};

/// Flat 32-bit ring 0 code segment.
pub const KERNEL_CODE: SegmentSelector = SegmentSelector::new(1, Ring::Ring0);
/// Flat 32-bit ring 0 data segment.
pub const KERNEL_DATA: SegmentSelector = SegmentSelector::new(2, Ring::Ring0);
/// 16-bit code segment based at zero.
pub const CODE16: SegmentSelector = SegmentSelector::new(3, Ring::Ring0);
/// 16-bit data segment based at zero.
pub const DATA16: SegmentSelector = SegmentSelector::new(4, Ring::Ring0);

const NUM_ENTRIES: usize = 5;

const _: () = assert!(config::KERNEL_CODE32 == 1 << 3);
const _: () = assert!(config::KERNEL_DATA32 == 2 << 3);
const _: () = assert!(config::KERNEL_CODE16 == 3 << 3);
const _: () = assert!(config::KERNEL_DATA16 == 4 << 3);

static mut GDT: [Descriptor; NUM_ENTRIES] = [Descriptor::NULL; NUM_ENTRIES];

/// Builds the descriptors in selector order.
pub fn descriptors() -> [Descriptor; NUM_ENTRIES] {
    let code32 = DescriptorBuilder::code_segment(0, 0xf_ffff, CodeSegmentType::ExecuteRead)
        .present()
        .dpl(Ring::Ring0)
        .db()
        .limit_granularity_4kb()
        .finish();
    let data32 = DescriptorBuilder::data_segment(0, 0xf_ffff, DataSegmentType::ReadWrite)
        .present()
        .dpl(Ring::Ring0)
        .db()
        .limit_granularity_4kb()
        .finish();
    let code16 = DescriptorBuilder::code_segment(0, 0xffff, CodeSegmentType::ExecuteRead)
        .present()
        .dpl(Ring::Ring0)
        .finish();
    let data16 = DescriptorBuilder::data_segment(0, 0xffff, DataSegmentType::ReadWrite)
        .present()
        .dpl(Ring::Ring0)
        .finish();
    [Descriptor::NULL, code32, data32, code16, data16]
}

/// Installs the GDT and reloads every segment register from it.
///
/// ## Safety
///
/// Ring 0, interrupts disabled. The boot environment must be running on flat
/// segments so the reload does not move the current code or stack.
pub unsafe fn init() {
    unsafe {
        GDT = descriptors();
        let gdt = &*addr_of!(GDT);
        let pointer = DescriptorTablePointer::new_from_slice(gdt);
        dtables::lgdt(&pointer);
        segmentation::load_cs(KERNEL_CODE);
        segmentation::load_ss(KERNEL_DATA);
        segmentation::load_data_segments(KERNEL_DATA);
    }
}
