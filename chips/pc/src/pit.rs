// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Support for the legacy 8253-compatible timer, aka the "PIT".
//!
//! Channel 0 is run as a rate generator wired to PIC line 0. The counter
//! itself wraps far too quickly to be useful, so ticks are counted in memory
//! from the interrupt handler instead.
//!
//! * <https://wiki.osdev.org/Programmable_Interval_Timer>
//! * <https://en.wikipedia.org/wiki/Intel_8253>

use core::sync::atomic::{AtomicUsize, Ordering};

use kernel::debug;
use tock_registers::{register_bitfields, LocalRegisterCopy};
use x86::registers::io::PortIo;

/// Frequency of the PIT's internal oscillator, one third of the NTSC color
/// subcarrier.
pub const OSCILLATOR_FREQUENCY: u32 = 3579545 / 3;

/// PIC line channel 0 raises.
pub const PIT_IRQ_LINE: u8 = 0;

/// Computes a reload value for the given frequency.
///
/// The resulting rate is only ever close to `freq`: the oscillator frequency
/// is not a multiple of anything useful.
pub const fn reload_value(freq: u32) -> u16 {
    // Lowest possible frequency is about 18 Hz
    if freq <= 18 {
        // Zero means 65536
        return 0x0000;
    }

    if freq >= OSCILLATOR_FREQUENCY {
        return 0x0001;
    }

    let mut r = OSCILLATOR_FREQUENCY / freq;

    // Round to nearest
    if (OSCILLATOR_FREQUENCY % freq) >= (freq / 2) {
        r += 1;
    }

    r as u16
}

/// Interrupt frequency a reload value actually produces.
pub const fn frequency(reload: u16) -> u32 {
    let divisor = if reload == 0 { 0x1_0000 } else { reload as u32 };
    OSCILLATOR_FREQUENCY / divisor
}

/// I/O port address for channel 0
const PIT_CD0: u16 = 0x0040;

/// I/O port address for mode/command register
const PIT_MCR: u16 = 0x0043;

register_bitfields!(u8,
    PIT_MCR [
        BCD OFFSET(0) NUMBITS(1) [],
        MODE OFFSET(1) NUMBITS(3) [
            M2 = 0b010, // Rate generator
        ],
        ACCESS OFFSET(4) NUMBITS(2) [
            LOHI = 0b11, // Lobyte/hibyte access mode
        ],
        CHANNEL OFFSET(6) NUMBITS(2) [
            C0 = 0b00, // Channel 0
        ]
    ]
);

/// Periodic tick source on channel 0.
pub struct Pit<P: PortIo> {
    ports: P,
    reload: u16,
    ticks: AtomicUsize,
}

impl<P: PortIo> Pit<P> {
    /// `reload` is usually computed with [`reload_value`].
    pub const fn new(ports: P, reload: u16) -> Pit<P> {
        Pit {
            ports,
            reload,
            ticks: AtomicUsize::new(0),
        }
    }

    /// Programs channel 0 and starts the interrupts. Line
    /// [`PIT_IRQ_LINE`] still has to be unmasked.
    pub fn start(&self) {
        let mut pit_mcr = LocalRegisterCopy::<u8, PIT_MCR::Register>::new(0);
        pit_mcr.modify(PIT_MCR::MODE::M2 + PIT_MCR::ACCESS::LOHI + PIT_MCR::CHANNEL::C0);

        self.ports.write8(PIT_MCR, pit_mcr.get());
        self.ports.write8(PIT_CD0, self.reload as u8);
        self.ports.write8(PIT_CD0, (self.reload >> 8) as u8);

        debug!("pit: {} Hz (reload {})", self.frequency(), self.reload);
    }

    /// Counts one tick. Called from the interrupt handler; returns the new
    /// count.
    pub fn tick(&self) -> usize {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn frequency(&self) -> u32 {
        frequency(self.reload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    #[derive(Default)]
    struct Recorder(RefCell<Vec<(u16, u8)>>);

    impl PortIo for Recorder {
        fn read8(&self, _port: u16) -> u8 {
            0
        }

        fn write8(&self, port: u16, value: u8) {
            self.0.borrow_mut().push((port, value));
        }
    }

    #[test]
    fn reload_values() {
        assert_eq!(reload_value(100), 11932);
        assert_eq!(reload_value(1000), 1193);
        assert_eq!(reload_value(18), 0);
        assert_eq!(reload_value(OSCILLATOR_FREQUENCY), 1);
        assert_eq!(frequency(reload_value(100)), 99);
        assert_eq!(frequency(0), 18);
    }

    #[test]
    fn start_programs_channel_zero() {
        let pit = Pit::new(Recorder::default(), reload_value(100));
        pit.start();
        assert_eq!(
            *pit.ports.0.borrow(),
            [(0x43, 0x34), (0x40, 0x9c), (0x40, 0x2e)]
        );
    }

    #[test]
    fn ticks_accumulate() {
        let pit = Pit::new(Recorder::default(), 0);
        assert_eq!(pit.ticks(), 0);
        assert_eq!(pit.tick(), 1);
        assert_eq!(pit.tick(), 2);
        assert_eq!(pit.ticks(), 2);
    }
}
