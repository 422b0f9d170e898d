// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Assembly shared by all vectors, plus the context save/restore primitives.
//!
//! ## Interrupt entry
//!
//! Every trampoline jumps here with this on the stack:
//!
//! ```text
//! +16  eflags      pushed by the CPU
//! +12  cs
//! +8   eip
//! +4   err_code    CPU or trampoline
//! +0   vector      trampoline              <- esp
//! ```
//!
//! `pushad` turns that into a [`Context`](super::context::Context). The
//! `esp` word pushed by `pushad` is the address of the vector slot, so it is
//! overwritten with the stack pointer the interrupted code had, which is
//! just above `eflags`. The dispatcher then runs the handler.
//!
//! On the way out, if the handler left `esp` alone, registers are popped and
//! `iretd` resumes on the same stack. If it changed `esp`, the three words
//! `iretd` consumes are first copied to just below the new stack pointer,
//! highest word first, so a destination that overlaps the source from above
//! never overwrites a word before it is read. The address of the copied
//! frame is parked in the vector slot, which `popad` leaves behind at the top
//! of the stack, and loaded into `esp` right before `iretd`.
//!
//! A redirected `esp` must therefore be at or above the interrupted stack
//! pointer, or low enough that the copied frame ends at or below the start
//! of the context. Anything in between overwrites words that are still to
//! be read. [`is_resumable`](super::context::is_resumable) states the rule.

#[cfg(target_arch = "x86")]
use super::context::{offsets, Context};

#[cfg(target_arch = "x86")]
core::arch::global_asm!(
    ".pushsection .text.interrupt_entry, \"ax\"",
    ".global interrupt_entry",
    "interrupt_entry:",
    "    pushad",
    "    cld",
    // Replace pushad's esp with the interrupted stack pointer
    "    lea eax, [esp + {end_off}]",
    "    mov [esp + {esp_off}], eax",
    "    push esp",
    "    call {dispatch}",
    "    add esp, 4",
    "    lea ecx, [esp + {end_off}]",
    "    mov eax, [esp + {esp_off}]",
    "    cmp eax, ecx",
    "    jne 2f",
    "    popad",
    // Drop vector and error code
    "    add esp, 8",
    "    iretd",
    "2:",
    // Move the iret frame under the new stack pointer, high to low
    "    mov edx, [esp + {eflags_off}]",
    "    mov [eax - 4], edx",
    "    mov edx, [esp + {cs_off}]",
    "    mov [eax - 8], edx",
    "    mov edx, [esp + {eip_off}]",
    "    mov [eax - 12], edx",
    "    sub eax, 12",
    "    mov [esp + {vector_off}], eax",
    "    popad",
    "    mov esp, [esp]",
    "    iretd",
    ".popsection",
    end_off = const offsets::END,
    esp_off = const offsets::ESP,
    eflags_off = const offsets::EFLAGS,
    cs_off = const offsets::CS,
    eip_off = const offsets::EIP,
    vector_off = const offsets::VECTOR,
    dispatch = sym interrupt_dispatch,
);

// `context_save(ctx)` records the caller's state so that restoring it
// returns from `context_save` a second time, with eax = 1.
//
// `context_restore(ctx)` builds an iret frame on the target stack and loads
// every register from `ctx`.
#[cfg(target_arch = "x86")]
core::arch::global_asm!(
    ".pushsection .text.context_switch, \"ax\"",
    ".global context_save",
    "context_save:",
    "    mov eax, [esp + 4]",
    "    mov [eax + {edi_off}], edi",
    "    mov [eax + {esi_off}], esi",
    "    mov [eax + {ebp_off}], ebp",
    "    mov [eax + {ebx_off}], ebx",
    "    mov [eax + {edx_off}], edx",
    "    mov [eax + {ecx_off}], ecx",
    "    mov dword ptr [eax + {eax_off}], 1",
    "    mov dword ptr [eax + {vector_off}], 0",
    "    mov dword ptr [eax + {err_code_off}], 0",
    // Resume as if returning: past our return address, at the caller
    "    lea ecx, [esp + 4]",
    "    mov [eax + {esp_off}], ecx",
    "    mov ecx, [esp]",
    "    mov [eax + {eip_off}], ecx",
    "    xor ecx, ecx",
    "    mov cx, cs",
    "    mov [eax + {cs_off}], ecx",
    "    pushfd",
    "    pop ecx",
    "    mov [eax + {eflags_off}], ecx",
    "    mov ecx, [eax + {ecx_off}]",
    "    xor eax, eax",
    "    ret",
    "",
    ".global context_restore",
    "context_restore:",
    "    mov eax, [esp + 4]",
    "    mov esp, [eax + {esp_off}]",
    "    push dword ptr [eax + {eflags_off}]",
    "    push dword ptr [eax + {cs_off}]",
    "    push dword ptr [eax + {eip_off}]",
    "    mov edi, [eax + {edi_off}]",
    "    mov esi, [eax + {esi_off}]",
    "    mov ebp, [eax + {ebp_off}]",
    "    mov ebx, [eax + {ebx_off}]",
    "    mov edx, [eax + {edx_off}]",
    "    mov ecx, [eax + {ecx_off}]",
    "    mov eax, [eax + {eax_off}]",
    "    iretd",
    ".popsection",
    edi_off = const offsets::EDI,
    esi_off = const offsets::ESI,
    ebp_off = const offsets::EBP,
    esp_off = const offsets::ESP,
    ebx_off = const offsets::EBX,
    edx_off = const offsets::EDX,
    ecx_off = const offsets::ECX,
    eax_off = const offsets::EAX,
    vector_off = const offsets::VECTOR,
    err_code_off = const offsets::ERR_CODE,
    eip_off = const offsets::EIP,
    cs_off = const offsets::CS,
    eflags_off = const offsets::EFLAGS,
);

#[cfg(target_arch = "x86")]
extern "C" {
    fn interrupt_entry();
    pub(super) fn context_save(ctx: *mut Context) -> u32;
    pub(super) fn context_restore(ctx: *const Context) -> !;
}

/// Called by `interrupt_entry` with a pointer to the context on the stack.
#[cfg(target_arch = "x86")]
extern "C" fn interrupt_dispatch(ctx: *mut Context) {
    // Safety: `ctx` is the frame just built by `interrupt_entry`. It stays in
    // place until the handler returns, and interrupts are disabled because
    // every vector uses an interrupt gate.
    unsafe { super::HANDLERS.dispatch(ctx) }
}

/// Linear address of the shared entry, the jump target of every trampoline.
#[cfg(target_arch = "x86")]
pub fn interrupt_entry_address() -> u32 {
    interrupt_entry as usize as u32
}

//For CI only

#[cfg(not(target_arch = "x86"))]
pub fn interrupt_entry_address() -> u32 {
    unimplemented!()
}

/// The exit half of `interrupt_entry` and `context_restore`, replayed word by
/// word on a memory array.
#[cfg(test)]
mod tests {
    use super::super::context::{init_context, is_resumable, offsets, Context};

    /// Words of memory starting at linear address `base`.
    struct Memory<'a> {
        words: &'a mut [u32],
        base: u32,
    }

    impl<'a> Memory<'a> {
        fn new(words: &'a mut [u32], base: u32) -> Self {
            Memory { words, base }
        }

        /// Memory at the address of `words` itself, for stacks set up with
        /// real pointers.
        fn over(words: &'a mut [u32]) -> Self {
            let base = words.as_ptr() as usize as u32;
            Memory { words, base }
        }

        fn addr(&self, index: usize) -> u32 {
            self.base.wrapping_add(4 * index as u32)
        }

        fn index(&self, addr: u32) -> usize {
            (addr.wrapping_sub(self.base) / 4) as usize
        }

        fn read(&self, addr: u32) -> u32 {
            self.words[self.index(addr)]
        }

        fn write(&mut self, addr: u32, value: u32) {
            let i = self.index(addr);
            self.words[i] = value;
        }

        fn store(&mut self, at: u32, ctx: &Context) {
            let fields = [
                ctx.edi,
                ctx.esi,
                ctx.ebp,
                ctx.esp,
                ctx.ebx,
                ctx.edx,
                ctx.ecx,
                ctx.eax,
                ctx.vector,
                ctx.err_code,
                ctx.eip,
                ctx.cs,
                ctx.eflags,
            ];
            for (i, value) in fields.into_iter().enumerate() {
                self.write(at.wrapping_add(4 * i as u32), value);
            }
        }
    }

    /// Processor state right after `iretd`.
    #[derive(Debug, PartialEq, Eq)]
    struct Resumed {
        /// edi, esi, ebp, ebx, edx, ecx, eax
        regs: [u32; 7],
        esp: u32,
        eip: u32,
        cs: u32,
        eflags: u32,
    }

    fn at(addr: u32, offset: usize) -> u32 {
        addr.wrapping_add(offset as u32)
    }

    fn popad(mem: &Memory, esp: u32) -> [u32; 7] {
        [
            offsets::EDI,
            offsets::ESI,
            offsets::EBP,
            offsets::EBX,
            offsets::EDX,
            offsets::ECX,
            offsets::EAX,
        ]
        .map(|offset| mem.read(at(esp, offset)))
    }

    fn iretd(mem: &Memory, esp: u32, regs: [u32; 7]) -> Resumed {
        Resumed {
            regs,
            eip: mem.read(esp),
            cs: mem.read(at(esp, 4)),
            eflags: mem.read(at(esp, 8)),
            esp: at(esp, 12),
        }
    }

    /// `interrupt_entry` after the dispatcher returned, with the context at
    /// `frame`.
    fn interrupt_exit(mem: &mut Memory, frame: u32) -> Resumed {
        let new_esp = mem.read(at(frame, offsets::ESP));
        if new_esp == at(frame, offsets::END) {
            let regs = popad(mem, frame);
            return iretd(mem, at(frame, offsets::EIP), regs);
        }
        let eflags = mem.read(at(frame, offsets::EFLAGS));
        mem.write(new_esp.wrapping_sub(4), eflags);
        let cs = mem.read(at(frame, offsets::CS));
        mem.write(new_esp.wrapping_sub(8), cs);
        let eip = mem.read(at(frame, offsets::EIP));
        mem.write(new_esp.wrapping_sub(12), eip);
        mem.write(at(frame, offsets::VECTOR), new_esp.wrapping_sub(12));
        let regs = popad(mem, frame);
        let esp = mem.read(at(frame, offsets::VECTOR));
        iretd(mem, esp, regs)
    }

    fn context_restore(mem: &mut Memory, ctx: &Context) -> Resumed {
        let esp = ctx.esp.wrapping_sub(12);
        mem.write(at(esp, 8), ctx.eflags);
        mem.write(at(esp, 4), ctx.cs);
        mem.write(esp, ctx.eip);
        let regs = [
            ctx.edi, ctx.esi, ctx.ebp, ctx.ebx, ctx.edx, ctx.ecx, ctx.eax,
        ];
        iretd(mem, esp, regs)
    }

    const BASE: u32 = 0x0009_0000;
    /// Word index of the context in the test memory.
    const FRAME: usize = 64;

    fn interrupted(esp: u32) -> Context {
        Context {
            edi: 1,
            esi: 2,
            ebp: 3,
            esp,
            ebx: 4,
            edx: 5,
            ecx: 6,
            eax: 7,
            vector: 0x20,
            err_code: 0,
            eip: 0x0010_2345,
            cs: 0x08,
            eflags: 0x0000_0202,
        }
    }

    /// Takes an interrupt with the context at [`FRAME`], lets the handler
    /// set `esp` to `new_esp` (if given) and returns what resumes.
    fn take_interrupt(words: &mut [u32], new_esp: Option<u32>) -> (Context, Resumed) {
        let mut mem = Memory::new(words, BASE);
        let frame = mem.addr(FRAME);
        let mut ctx = interrupted(at(frame, offsets::END));
        mem.store(frame, &ctx);
        if let Some(esp) = new_esp {
            ctx.esp = esp;
            mem.write(at(frame, offsets::ESP), esp);
        }
        let resumed = interrupt_exit(&mut mem, frame);
        (ctx, resumed)
    }

    fn expected(ctx: &Context) -> Resumed {
        Resumed {
            regs: [1, 2, 3, 4, 5, 6, 7],
            esp: ctx.esp,
            eip: ctx.eip,
            cs: ctx.cs,
            eflags: ctx.eflags,
        }
    }

    #[test]
    fn unchanged_stack_resumes_in_place() {
        let mut words = [0u32; 256];
        let (ctx, resumed) = take_interrupt(&mut words, None);
        assert_eq!(resumed, expected(&ctx));
        assert_eq!(resumed.esp, BASE + 4 * FRAME as u32 + 52);
    }

    #[test]
    fn redirect_to_another_stack() {
        let mut words = [0u32; 256];
        let other = BASE + 4 * 240;
        let (ctx, resumed) = take_interrupt(&mut words, Some(other));
        assert_eq!(resumed, expected(&ctx));
        assert_eq!(resumed.esp, other);
        assert_eq!(&words[237..240], &[0x0010_2345, 0x08, 0x0202]);
    }

    #[test]
    fn redirect_overlapping_the_frame_from_above() {
        let interrupted = BASE + 4 * FRAME as u32 + 52;
        for shift in [4, 8, 12, 16] {
            let mut words = [0u32; 256];
            let (ctx, resumed) = take_interrupt(&mut words, Some(interrupted + shift));
            assert_eq!(resumed, expected(&ctx), "esp + {}", shift);
        }
    }

    #[test]
    fn every_resumable_stack_pointer_resumes_intact() {
        let frame = BASE + 4 * FRAME as u32;
        for word in (FRAME - 40)..(FRAME + 40) {
            let esp = BASE + 4 * word as u32;
            if !is_resumable(frame, esp) {
                continue;
            }
            let mut words = [0u32; 256];
            let (ctx, resumed) = take_interrupt(&mut words, Some(esp));
            assert_eq!(resumed, expected(&ctx), "esp {:#x}", esp);
        }
    }

    #[test]
    fn stack_pointer_just_below_interrupted_is_not_resumable() {
        let frame = BASE + 4 * FRAME as u32;
        let esp = frame + 52 - 4;
        assert!(!is_resumable(frame, esp));

        // The copied eflags lands on cs before cs is read.
        let mut words = [0u32; 256];
        let (ctx, resumed) = take_interrupt(&mut words, Some(esp));
        assert_ne!(resumed.cs, ctx.cs);
    }

    #[test]
    fn new_context_restores_into_its_entry() {
        extern "C" fn task() -> ! {
            loop {
                core::hint::spin_loop();
            }
        }

        let mut stack = [0xdead_beefu32; 64];
        let top = stack.as_mut_ptr_range().end;
        let mut ctx = Context::new();
        unsafe { init_context(&mut ctx, top, task) };

        let mut mem = Memory::over(&mut stack);
        let resumed = context_restore(&mut mem, &ctx);
        assert_eq!(resumed.eip, task as usize as u32);
        assert_eq!(resumed.esp, ctx.esp);
        assert_eq!(resumed.cs, 0x08);
        assert_eq!(resumed.regs, [0; 7]);
        assert_ne!(resumed.eflags & 0x200, 0);
        // The task starts with a zero return address on top of its stack
        assert_eq!(mem.read(resumed.esp), 0);
        assert_eq!(stack[63], 0);
        assert_eq!(stack[60], task as usize as u32);
    }
}
