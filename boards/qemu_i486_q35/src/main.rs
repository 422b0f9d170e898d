// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Board file for the QEMU `q35` machine with an i486 CPU.
//!
//! Brings up interrupt handling, reports every processor fault, asks the
//! video BIOS for the current mode and then runs two tasks that the PIT
//! switches between 100 times a second. Task A only sleeps; task B counts
//! its time slices, so the counter stays at half the tick count.
//!
//! ```text
//! cargo run -p qemu_i486_q35
//! ```

#![no_std]
#![no_main]

use core::arch::global_asm;
use core::cell::Cell;
use core::ptr::{addr_of, addr_of_mut};
use core::sync::atomic::{AtomicUsize, Ordering};

use kernel::collections::list::{ListLink, ListNode};
use kernel::sched::RunQueue;
use kernel::{debug, static_init};
use pc::debugcon::DebugCon;
use pc::pit::{self, Pit, PIT_IRQ_LINE};
use x86::interrupts::{self, Context, TaskEntry};
use x86::realmode::{BiosFirmware, BiosShared, RealModeBridge, Regs16};
use x86::registers::io::Ports;
use x86::registers::irq;
use x86::support::halt_forever;

mod io;
mod multiboot;

const TICK_HZ: u32 = 100;

/// Words of stack per task.
const STACK_WORDS: usize = 1024;

global_asm!(
    ".pushsection .text.start, \"ax\"",
    ".global _start",
    "_start:",
    "    mov esp, offset _stack_top",
    "    cld",
    "    call {main}",
    "2:",
    "    hlt",
    "    jmp 2b",
    ".popsection",
    main = sym main,
);

static PIT: Pit<Ports> = Pit::new(unsafe { Ports::new() }, pit::reload_value(TICK_HZ));

/// Incremented once per time slice of task B.
static SLICES_B: AtomicUsize = AtomicUsize::new(0);

static mut RUN_QUEUE: Option<&'static RunQueue<'static, Task<'static>>> = None;

struct Task<'a> {
    name: &'static str,
    ctx: Cell<Context>,
    link: ListLink<'a, Task<'a>>,
}

impl<'a> ListNode<'a, Task<'a>> for Task<'a> {
    fn next(&'a self) -> &'a ListLink<'a, Task<'a>> {
        &self.link
    }
}

impl Task<'_> {
    /// A task that starts at `entry` on `stack`.
    ///
    /// ## Safety
    ///
    /// `stack` must not be used for anything else.
    unsafe fn new(name: &'static str, entry: TaskEntry, stack: &'static mut [u32]) -> Self {
        let mut ctx = Context::new();
        unsafe {
            interrupts::init_context(&mut ctx, stack.as_mut_ptr_range().end, entry);
        }
        Task {
            name,
            ctx: Cell::new(ctx),
            link: ListLink::empty(),
        }
    }
}

extern "C" fn task_a() -> ! {
    loop {
        // Safety: ring 0.
        unsafe { x86::halt() };
    }
}

extern "C" fn task_b() -> ! {
    loop {
        SLICES_B.fetch_add(1, Ordering::Relaxed);
        // Sleep until the tick that switches back to A.
        unsafe { x86::halt() };
    }
}

/// PIT handler: counts the tick and hands the processor to the next task by
/// rewriting the interrupted context.
fn timer_interrupt(vector: u8) {
    let ticks = PIT.tick();
    if ticks % TICK_HZ as usize == 0 {
        debug!(
            "tick {}: task B ran {} slices, {} lines lost",
            ticks,
            SLICES_B.load(Ordering::Relaxed),
            kernel::debug::contended_lines()
        );
    }

    let Some(queue) = (unsafe { *addr_of!(RUN_QUEUE) }) else {
        return;
    };
    interrupts::with_context(vector, |live| {
        if let Some(switch) = queue.rotate() {
            switch.from.ctx.set(*live);
            *live = switch.to.ctx.get();
            if kernel::config::CONFIG.trace_interrupts {
                debug!("switch {} -> {}", switch.from.name, switch.to.name);
            }
        }
    });
}

/// Reads the current video mode with `int 0x10, ah=0x0f`.
///
/// ## Safety
///
/// The scratch region must be free, and no PIC line unmasked yet.
unsafe fn report_video_mode() {
    let shared = unsafe { BiosShared::at_scratch() };
    let firmware = match unsafe { BiosFirmware::install(shared) } {
        Ok(firmware) => firmware,
        Err(e) => {
            debug!("bios: bridge unavailable ({})", e);
            return;
        }
    };
    let bridge = unsafe {
        static_init!(
            RealModeBridge<'static, BiosFirmware>,
            RealModeBridge::new(firmware, shared)
        )
    };

    let Ok(mut bios) = bridge.acquire() else {
        return;
    };
    let mut regs = Regs16::default();
    regs.set_ah(0x0f);
    unsafe {
        bios.call(0x10, &mut regs);
    }
    debug!(
        "bios: video mode {:#04x}, {} columns, page {}",
        regs.al(),
        regs.ah(),
        regs.bh()
    );
}

/// Entry point from `_start`, on the boot stack.
#[no_mangle]
unsafe extern "C" fn main() -> ! {
    unsafe {
        let console = static_init!(DebugCon<Ports>, DebugCon::new(Ports::new()));
        kernel::debug::set_debug_writer(console);

        pc::init(&pc::PIC);
        interrupts::set_fault_handlers(io::unhandled_fault);

        report_video_mode();

        let stack_a = static_init!([u32; STACK_WORDS], [0; STACK_WORDS]);
        let stack_b = static_init!([u32; STACK_WORDS], [0; STACK_WORDS]);
        let a = static_init!(Task<'static>, Task::new("A", task_a, stack_a));
        let b = static_init!(Task<'static>, Task::new("B", task_b, stack_b));

        let queue = static_init!(RunQueue<'static, Task<'static>>, RunQueue::new());
        queue.append(a);
        queue.append(b);
        *addr_of_mut!(RUN_QUEUE) = Some(queue);

        interrupts::set_handler(interrupts::irq_vector(PIT_IRQ_LINE), timer_interrupt);
        PIT.start();

        // The first tick must not see a current task before it is running.
        irq::disable();
        pc::PIC.enable(PIT_IRQ_LINE);
        match queue.start() {
            Some(first) => {
                debug!("starting task {}", first.name);
                let ctx = first.ctx.get();
                interrupts::restore(&ctx)
            }
            None => halt_forever(),
        }
    }
}
