// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Saved processor state.
//!
//! A [`Context`] is laid out exactly as the interrupt entry path leaves the
//! stack, lowest address first:
//!
//! ```text
//! +0   edi  esi  ebp  esp  ebx  edx  ecx  eax     pushad
//! +32  vector                                     trampoline
//! +36  err_code                                   trampoline or CPU
//! +40  eip  cs  eflags                            CPU
//! ```
//!
//! During a handler the live context *is* that stack memory, so changing a
//! field changes what resumes. Outside interrupts the same record is used as
//! a standalone thread of control: [`init_context`] creates one that has
//! never run, [`restore`] jumps into one.

use core::fmt;

use crate::gdt;
use crate::registers::bits32::eflags::EFlags;
use crate::registers::irq;

/// Entry point for a context created with [`init_context`]. It runs on its
/// own stack and has nothing to return to.
pub type TaskEntry = extern "C" fn() -> !;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Stack pointer to resume with.
    ///
    /// On interrupt entry this is the stack pointer at the moment of the
    /// interrupt. A handler may point it at another stack to switch to it;
    /// the entry path then moves `eip`, `cs` and `eflags` there before
    /// returning.
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    /// Error code pushed by the processor, or zero for vectors without one.
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

/// Byte offsets of the fields, for the assembly that builds and consumes
/// contexts.
pub mod offsets {
    use super::Context;
    use core::mem::offset_of;

    pub const EDI: usize = offset_of!(Context, edi);
    pub const ESI: usize = offset_of!(Context, esi);
    pub const EBP: usize = offset_of!(Context, ebp);
    pub const ESP: usize = offset_of!(Context, esp);
    pub const EBX: usize = offset_of!(Context, ebx);
    pub const EDX: usize = offset_of!(Context, edx);
    pub const ECX: usize = offset_of!(Context, ecx);
    pub const EAX: usize = offset_of!(Context, eax);
    pub const VECTOR: usize = offset_of!(Context, vector);
    pub const ERR_CODE: usize = offset_of!(Context, err_code);
    pub const EIP: usize = offset_of!(Context, eip);
    pub const CS: usize = offset_of!(Context, cs);
    pub const EFLAGS: usize = offset_of!(Context, eflags);
    /// One past the last byte; the interrupted stack pointer on entry.
    pub const END: usize = core::mem::size_of::<Context>();
}

const _: () = assert!(offsets::EDI == 0);
const _: () = assert!(offsets::ESP == 12);
const _: () = assert!(offsets::EAX == 28);
const _: () = assert!(offsets::VECTOR == 32);
const _: () = assert!(offsets::EIP == 40);
const _: () = assert!(offsets::END == 52);

/// Whether the interrupt exit path can resume the context stored at `frame`
/// on the stack pointer `esp` that its handler left in it.
///
/// The return frame is copied to the twelve bytes below `esp`, highest word
/// first, before the saved registers are popped. That only works when `esp`
/// is at or above the interrupted stack pointer, or when those twelve bytes
/// lie entirely below the context.
pub const fn is_resumable(frame: u32, esp: u32) -> bool {
    esp >= frame.wrapping_add(offsets::END as u32) || esp <= frame
}

impl Context {
    pub const fn new() -> Context {
        Context {
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            vector: 0,
            err_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
        }
    }

    /// Zeroes the general purpose registers, leaving `esp`, `eip`, `cs` and
    /// `eflags` alone.
    pub fn clear_registers(&mut self) {
        self.edi = 0;
        self.esi = 0;
        self.ebp = 0;
        self.ebx = 0;
        self.edx = 0;
        self.ecx = 0;
        self.eax = 0;
        self.vector = 0;
        self.err_code = 0;
    }

    pub fn flags(&self) -> EFlags {
        EFlags::from_bits(self.eflags)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match irq::exception_for(self.vector as u8).filter(|_| self.vector < 32) {
            Some(e) => writeln!(f, "{}", e)?,
            None => writeln!(f, "vector {:#04x}", self.vector)?,
        }
        writeln!(
            f,
            " eax={:08x} ebx={:08x} ecx={:08x} edx={:08x}",
            self.eax, self.ebx, self.ecx, self.edx
        )?;
        writeln!(
            f,
            " esi={:08x} edi={:08x} ebp={:08x} esp={:08x}",
            self.esi, self.edi, self.ebp, self.esp
        )?;
        write!(
            f,
            " eip={:08x} cs={:04x} eflags={:08x} err={:08x}",
            self.eip, self.cs, self.eflags, self.err_code
        )
    }
}

/// Captures the calling code's registers into `ctx`, as if execution will
/// resume right after the call.
///
/// ## Safety
///
/// Restoring the result resumes in the caller's frame, so it is only sound
/// while that frame is live and nothing it owns has been moved or dropped
/// since. Most callers want [`init_context`] instead, which never resumes at
/// the save point.
#[cfg(target_arch = "x86")]
pub unsafe fn save(ctx: &mut Context) {
    unsafe {
        super::entry::context_save(core::ptr::from_mut(ctx));
    }
}

//For CI only

#[cfg(not(target_arch = "x86"))]
pub unsafe fn save(ctx: &mut Context) {
    *ctx = Context::new();
    ctx.cs = crate::registers::segmentation::cs().bits() as u32;
    ctx.eflags = unsafe { crate::registers::bits32::eflags::read() }.bits();
}

/// Fills `ctx` so that restoring it runs `entry` on the stack that ends at
/// `stack_top`.
///
/// The context starts from a [`save`] of the caller, so code segment and
/// flags are valid, then every general register is cleared, interrupts are
/// enabled and a zero return address is placed at the top of the new stack.
///
/// ## Safety
///
/// `stack_top` must be the 4-byte aligned end of a writable region that is
/// large enough for `entry` and is not used for anything else.
pub unsafe fn init_context(ctx: &mut Context, stack_top: *mut u32, entry: TaskEntry) {
    unsafe {
        save(ctx);
        ctx.clear_registers();
        ctx.cs = gdt::KERNEL_CODE.bits() as u32;
        ctx.eflags = EFlags::from_bits(ctx.eflags).with_interrupts().bits();
        let sp = stack_top.sub(1);
        sp.write(0);
        ctx.esp = sp as usize as u32;
        ctx.eip = entry as usize as u32;
    }
}

/// Transfers control to `ctx`. Never returns.
///
/// ## Safety
///
/// `ctx` must describe a valid kernel-mode state: code selector, an
/// instruction pointer in that segment and a usable stack. `ctx` itself must
/// not lie in the twelve bytes below its `esp`, where the return frame is
/// built.
#[cfg(target_arch = "x86")]
pub unsafe fn restore(ctx: &Context) -> ! {
    unsafe { super::entry::context_restore(core::ptr::from_ref(ctx)) }
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn restore(_ctx: &Context) -> ! {
    unimplemented!()
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn layout_matches_entry_frame() {
        assert_eq!(core::mem::size_of::<Context>(), 52);
        assert_eq!(offsets::CS, 44);
        assert_eq!(offsets::EFLAGS, 48);
        assert_eq!(offsets::ERR_CODE, 36);
    }

    #[test]
    fn resumable_stack_pointers() {
        let frame = 0x0009_0000;
        let interrupted = frame + 52;
        assert!(is_resumable(frame, interrupted));
        assert!(is_resumable(frame, interrupted + 4));
        assert!(is_resumable(frame, frame));
        assert!(is_resumable(frame, 0x0020_0000));
        assert!(!is_resumable(frame, interrupted - 4));
        assert!(!is_resumable(frame, interrupted - 12));
        assert!(!is_resumable(frame, frame + 4));
    }

    #[test]
    fn new_context_starts_at_entry_on_fresh_stack() {
        let mut stack = [0xdead_beefu32; 64];
        let end = stack.as_ptr_range().end;
        let top = unsafe { stack.as_mut_ptr().add(stack.len()) };

        let mut ctx = Context::new();
        ctx.eax = 0x1111_1111;
        ctx.ebx = 0x2222_2222;
        ctx.err_code = 7;
        unsafe { init_context(&mut ctx, top, task) };

        assert_eq!(ctx.eip, task as usize as u32);
        assert_eq!(ctx.esp, (end as usize - 4) as u32);
        assert_eq!(stack[63], 0);
        assert_eq!(stack[62], 0xdead_beef);
        assert_eq!(
            [ctx.eax, ctx.ebx, ctx.ecx, ctx.edx, ctx.esi, ctx.edi, ctx.ebp, ctx.err_code],
            [0; 8]
        );
        assert_eq!(ctx.cs, 0x08);
        assert!(ctx.flags().interrupts_enabled());
    }

    #[test]
    fn display_names_exception() {
        let ctx = Context {
            vector: 14,
            eip: 0x0010_0000,
            ..Context::new()
        };
        let mut buf = [0u8; 256];
        let mut cursor = std::io::Cursor::new(&mut buf[..]);
        use std::io::Write;
        write!(cursor, "{}", ctx).unwrap();
        let len = cursor.position() as usize;
        let text = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(text.starts_with("#PF (Fault, vec=14) Page Fault\n"));
        assert!(text.contains("eip=00100000"));
    }
}
