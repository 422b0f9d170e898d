// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! The real-mode trampoline.
//!
//! The code between `bios_trampoline_start` and `bios_trampoline_end` is
//! linked into the kernel image but only ever executed from its copy at
//! `REALMODE_SCRATCH`, so every absolute address in it is computed relative
//! to that copy. It is called as a plain `extern "C" fn()`:
//!
//! 1. Saves all general registers, the stack pointer and the current IDTR
//!    in the shared region, then loads the real-mode IVT.
//! 2. Jumps through the 16-bit code segment, clears CR0.PE and far jumps to
//!    reload CS with a real-mode segment.
//! 3. Switches to the private stack, pops the caller's register frame and
//!    issues `int n`. The immediate is patched before every call.
//! 4. Pushes the resulting frame back, restores the protected-mode IDTR,
//!    sets CR0.PE, far jumps into the 32-bit code segment and reloads the data
//!    segments.
//! 5. Restores the saved stack pointer and registers and returns.

use core::arch::global_asm;
use core::ptr::{addr_of, addr_of_mut};

use kernel::config::{KERNEL_CODE16, KERNEL_CODE32, KERNEL_DATA16, KERNEL_DATA32};
use kernel::ErrorCode;

use super::{offsets, BiosShared, Firmware, Idtr, REALMODE_SCRATCH, TRAMPOLINE_CAPACITY};

global_asm!(
    ".pushsection .text.bios_trampoline, \"ax\"",
    ".code32",
    ".global bios_trampoline_start",
    "bios_trampoline_start:",
    "    pushal",
    "    movl %esp, ({scratch} + {esp_off})",
    "    sidt ({scratch} + {idtr32_off})",
    "    lidt ({scratch} + {idtr16_off})",
    "    ljmp ${code16}, ${scratch} + (2f - bios_trampoline_start)",
    "2:",
    ".code16",
    "    movw ${data16}, %ax",
    "    movw %ax, %ds",
    "    movw %ax, %es",
    "    movw %ax, %fs",
    "    movw %ax, %gs",
    "    movw %ax, %ss",
    "    movl %cr0, %eax",
    "    andl $0xfffffffe, %eax",
    "    movl %eax, %cr0",
    "    ljmp $0, ${scratch} + (3f - bios_trampoline_start)",
    "3:",
    "    xorw %ax, %ax",
    "    movw %ax, %ss",
    "    movw ${frame}, %sp",
    "    popw %ds",
    "    popw %es",
    "    popaw",
    ".global bios_trampoline_int",
    "bios_trampoline_int:",
    "    int $0x00",
    "    pushaw",
    "    pushw %es",
    "    pushw %ds",
    "    cli",
    "    xorw %ax, %ax",
    "    movw %ax, %ds",
    "    lidtl ({scratch} + {idtr32_off})",
    "    movl %cr0, %eax",
    "    orl $1, %eax",
    "    movl %eax, %cr0",
    "    ljmpl ${code32}, ${scratch} + (4f - bios_trampoline_start)",
    "4:",
    ".code32",
    "    movw ${data32}, %ax",
    "    movw %ax, %ds",
    "    movw %ax, %es",
    "    movw %ax, %fs",
    "    movw %ax, %gs",
    "    movw %ax, %ss",
    "    movl ({scratch} + {esp_off}), %esp",
    "    popal",
    "    cld",
    "    ret",
    ".global bios_trampoline_end",
    "bios_trampoline_end:",
    ".popsection",
    scratch = const REALMODE_SCRATCH,
    esp_off = const offsets::ESP,
    idtr16_off = const offsets::IDTR16,
    idtr32_off = const offsets::IDTR32,
    frame = const REALMODE_SCRATCH + offsets::FRAME,
    code16 = const KERNEL_CODE16,
    data16 = const KERNEL_DATA16,
    code32 = const KERNEL_CODE32,
    data32 = const KERNEL_DATA32,
    options(att_syntax),
);

extern "C" {
    static bios_trampoline_start: u8;
    static bios_trampoline_int: u8;
    static bios_trampoline_end: u8;
}

/// The machine's BIOS, reached through the trampoline at
/// [`REALMODE_SCRATCH`].
pub struct BiosFirmware {
    int_offset: usize,
}

impl BiosFirmware {
    /// Copies the trampoline into `shared` and prepares the real-mode IDTR.
    ///
    /// Fails with `INVAL` if `shared` is not the region at
    /// [`REALMODE_SCRATCH`], and with `SIZE` if the trampoline does not fit.
    ///
    /// ## Safety
    ///
    /// The GDT from [`crate::gdt`] must be loaded, and the low 1 KiB of
    /// memory must still hold the BIOS interrupt vector table.
    pub unsafe fn install(shared: &mut BiosShared) -> Result<BiosFirmware, ErrorCode> {
        if shared.address() != REALMODE_SCRATCH {
            return Err(ErrorCode::INVAL);
        }

        let (start, int, end) = unsafe {
            (
                addr_of!(bios_trampoline_start) as usize,
                addr_of!(bios_trampoline_int) as usize,
                addr_of!(bios_trampoline_end) as usize,
            )
        };
        let len = end - start;
        if len > TRAMPOLINE_CAPACITY {
            return Err(ErrorCode::SIZE);
        }

        let code = unsafe { core::slice::from_raw_parts(start as *const u8, len) };
        shared.trampoline[..len].copy_from_slice(code);
        shared.idtr16 = Idtr::REAL_MODE_IVT;

        Ok(BiosFirmware {
            // The immediate byte of `int n`
            int_offset: int - start + 1,
        })
    }
}

impl Firmware for BiosFirmware {
    unsafe fn invoke(&self, shared: &mut BiosShared, vector: u8) {
        shared.trampoline[self.int_offset] = vector;
        let trampoline = addr_of_mut!(shared.trampoline) as usize;
        unsafe {
            let enter: extern "C" fn() = core::mem::transmute(trampoline);
            enter();
        }
    }
}
