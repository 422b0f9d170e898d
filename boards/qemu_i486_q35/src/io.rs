// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

use core::fmt::Write;
use core::panic::PanicInfo;

use kernel::debug;
use pc::debugcon::DebugCon;
use x86::interrupts;
use x86::registers::io::Ports;
use x86::support::halt_forever;

/// Blocking writer for contexts where the debug writer may be unusable.
fn console() -> DebugCon<Ports> {
    // Safety: the board runs in ring 0.
    DebugCon::new(unsafe { Ports::new() })
}

/// Installed on every exception vector. Prints the faulting context and
/// stops.
pub fn unhandled_fault(vector: u8) {
    let mut con = console();
    let printed = interrupts::with_context(vector, |ctx| {
        let _ = write!(con, "\r\nunhandled fault\r\n{}\r\n", ctx);
    });
    if printed.is_none() {
        let _ = write!(con, "\r\nunhandled fault on vector {:#04x}\r\n", vector);
    }
    halt_forever()
}

/// Panic handler.
#[cfg(not(test))]
#[panic_handler]
fn panic_handler(pi: &PanicInfo) -> ! {
    let mut con = console();
    // Safety: panic context, nothing runs after this.
    unsafe {
        debug::panic_print(&mut con, pi);
    }
    halt_forever()
}
