// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! QEMU and Bochs debug console: every byte written to port 0xe9 shows up on
//! the host (`-debugcon stdio`).

use core::fmt;

use kernel::debug::IoWrite;
use x86::registers::io::PortIo;

pub const DEBUGCON_PORT: u16 = 0xe9;

pub struct DebugCon<P: PortIo> {
    ports: P,
}

impl<P: PortIo> DebugCon<P> {
    pub const fn new(ports: P) -> DebugCon<P> {
        DebugCon { ports }
    }
}

impl<P: PortIo> IoWrite for DebugCon<P> {
    fn write(&mut self, buf: &[u8]) -> usize {
        for &byte in buf {
            self.ports.write8(DEBUGCON_PORT, byte);
        }
        buf.len()
    }
}

impl<P: PortIo> fmt::Write for DebugCon<P> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        IoWrite::write(self, s.as_bytes());
        Ok(())
    }
}
