// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Support for the pair of cascaded 8259 interrupt controllers.
//!
//! At power on the primary controller delivers lines 0-7 on vectors 0x08 to
//! 0x0f, on top of the CPU exceptions. [`Pic::init`] moves all sixteen lines
//! to [`IRQ_VECTOR_BASE`] onwards and masks every line except the cascade.
//! Drivers then unmask the lines they handle with [`Pic::set_mask`].
//!
//! Both controllers run in automatic end-of-interrupt mode, so handlers never
//! acknowledge anything.
//!
//! * <https://wiki.osdev.org/8259_PIC>

use kernel::debug;
use tock_registers::{register_bitfields, LocalRegisterCopy};
use x86::interrupts::{IRQ_VECTOR_BASE, NUM_IRQ_LINES};
use x86::registers::io::PortIo;
use x86::support::{with_interrupts_disabled, InterruptGuard};

register_bitfields!(u8,
    /// Initialization command word 1, written to the command port
    ICW1 [
        /// ICW4 follows
        IC4 OFFSET(0) NUMBITS(1) [],
        /// Single controller, no ICW3
        SNGL OFFSET(1) NUMBITS(1) [],
        /// Level triggered
        LTIM OFFSET(3) NUMBITS(1) [],
        INIT OFFSET(4) NUMBITS(1) []
    ],
    /// Initialization command word 4, written to the data port
    ICW4 [
        /// 8086 mode
        UPM OFFSET(0) NUMBITS(1) [],
        /// Automatic end of interrupt
        AEOI OFFSET(1) NUMBITS(1) [],
        BUF OFFSET(2) NUMBITS(2) [],
        SFNM OFFSET(4) NUMBITS(1) []
    ]
);

struct Controller {
    command: u16,
    data: u16,
}

const PRIMARY: Controller = Controller {
    command: 0x20,
    data: 0x21,
};

const SECONDARY: Controller = Controller {
    command: 0xa0,
    data: 0xa1,
};

/// Primary line the secondary controller is wired to.
pub const CASCADE_LINE: u8 = 2;

const LINES_PER_CONTROLLER: u8 = 8;

/// The two controllers, reached through `P`.
pub struct Pic<P: PortIo> {
    ports: P,
}

impl<P: PortIo> Pic<P> {
    pub const fn new(ports: P) -> Pic<P> {
        Pic { ports }
    }

    /// Runs the remap sequence and masks every line except the cascade.
    ///
    /// Safe to call again later; the controllers are reset and all lines end
    /// up masked.
    pub fn init(&self, _guard: &InterruptGuard) {
        let mut icw1 = LocalRegisterCopy::<u8, ICW1::Register>::new(0);
        icw1.modify(ICW1::INIT::SET + ICW1::IC4::SET);

        let mut icw4 = LocalRegisterCopy::<u8, ICW4::Register>::new(0);
        icw4.modify(ICW4::UPM::SET + ICW4::AEOI::SET);

        let primary_base = IRQ_VECTOR_BASE;
        let secondary_base = IRQ_VECTOR_BASE + LINES_PER_CONTROLLER;

        self.write_both(PRIMARY.command, icw1.get(), SECONDARY.command, icw1.get());
        self.write_both(PRIMARY.data, primary_base, SECONDARY.data, secondary_base);
        // ICW3: which line has a secondary, and the secondary's identity
        self.write_both(PRIMARY.data, 1 << CASCADE_LINE, SECONDARY.data, CASCADE_LINE);
        self.write_both(PRIMARY.data, icw4.get(), SECONDARY.data, icw4.get());
        self.write_both(PRIMARY.data, !(1 << CASCADE_LINE), SECONDARY.data, 0xff);

        debug!(
            "pic: lines 0-15 on vectors {:#04x}-{:#04x}, masked",
            primary_base,
            secondary_base + LINES_PER_CONTROLLER - 1
        );
    }

    /// Unmasks (`enabled == true`) or masks `line`.
    ///
    /// Read-modify-write of the owning controller's mask register, hence the
    /// guard.
    pub fn set_mask(&self, _guard: &InterruptGuard, line: u8, enabled: bool) {
        debug_assert!((line as usize) < NUM_IRQ_LINES);
        let (controller, bit) = locate(line);
        let mask = self.ports.read8(controller.data);
        let mask = if enabled {
            mask & !(1 << bit)
        } else {
            mask | (1 << bit)
        };
        self.ports.write8(controller.data, mask);
    }

    pub fn enable(&self, line: u8) {
        with_interrupts_disabled(|guard| self.set_mask(guard, line, true));
    }

    pub fn disable(&self, line: u8) {
        with_interrupts_disabled(|guard| self.set_mask(guard, line, false));
    }

    pub fn is_enabled(&self, line: u8) -> bool {
        let (controller, bit) = locate(line);
        self.ports.read8(controller.data) & (1 << bit) == 0
    }

    /// Current mask registers, primary first. A set bit masks the line.
    pub fn masks(&self) -> (u8, u8) {
        (
            self.ports.read8(PRIMARY.data),
            self.ports.read8(SECONDARY.data),
        )
    }

    fn write_both(&self, primary_port: u16, primary: u8, secondary_port: u16, secondary: u8) {
        self.ports.write8(primary_port, primary);
        self.ports.wait();
        self.ports.write8(secondary_port, secondary);
        self.ports.wait();
    }
}

fn locate(line: u8) -> (&'static Controller, u8) {
    if line < LINES_PER_CONTROLLER {
        (&PRIMARY, line)
    } else {
        (&SECONDARY, line - LINES_PER_CONTROLLER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;
    use x86::registers::io::POST_PORT;

    /// Records every write and models the two mask registers.
    #[derive(Default)]
    struct FakeBus {
        writes: RefCell<Vec<(u16, u8)>>,
        masks: Cell<[u8; 2]>,
    }

    impl FakeBus {
        fn device_writes(&self) -> Vec<(u16, u8)> {
            self.writes
                .borrow()
                .iter()
                .copied()
                .filter(|&(port, _)| port != POST_PORT)
                .collect()
        }
    }

    impl PortIo for FakeBus {
        fn read8(&self, port: u16) -> u8 {
            match port {
                0x21 => self.masks.get()[0],
                0xa1 => self.masks.get()[1],
                _ => 0,
            }
        }

        fn write8(&self, port: u16, value: u8) {
            self.writes.borrow_mut().push((port, value));
            let mut masks = self.masks.get();
            match port {
                0x21 => masks[0] = value,
                0xa1 => masks[1] = value,
                _ => {}
            }
            self.masks.set(masks);
        }
    }

    #[test]
    fn init_remaps_and_masks() {
        let pic = Pic::new(FakeBus::default());
        with_interrupts_disabled(|guard| pic.init(guard));

        assert_eq!(
            pic.ports.device_writes(),
            [
                (0x20, 0x11),
                (0xa0, 0x11),
                (0x21, 0x20),
                (0xa1, 0x28),
                (0x21, 0x04),
                (0xa1, 0x02),
                (0x21, 0x03),
                (0xa1, 0x03),
                (0x21, 0xfb),
                (0xa1, 0xff),
            ]
        );
        assert_eq!(pic.masks(), (0xfb, 0xff));
        assert!(pic.is_enabled(CASCADE_LINE));
        assert!(!pic.is_enabled(0));
    }

    #[test]
    fn lines_route_to_their_controller() {
        let pic = Pic::new(FakeBus::default());
        with_interrupts_disabled(|guard| {
            pic.init(guard);
            pic.set_mask(guard, 0, true);
            pic.set_mask(guard, 1, true);
            pic.set_mask(guard, 12, true);
        });
        assert_eq!(pic.masks(), (0xf8, 0xef));
        assert!(pic.is_enabled(12));

        pic.disable(1);
        pic.disable(12);
        assert_eq!(pic.masks(), (0xfa, 0xff));

        pic.enable(15);
        assert_eq!(pic.masks(), (0xfa, 0x7f));
    }

    #[test]
    fn reinit_masks_everything_again() {
        let pic = Pic::new(FakeBus::default());
        with_interrupts_disabled(|guard| pic.init(guard));
        pic.enable(0);
        pic.enable(8);
        with_interrupts_disabled(|guard| pic.init(guard));
        assert_eq!(pic.masks(), (0xfb, 0xff));
    }

    #[test]
    fn accesses_are_paced() {
        let pic = Pic::new(FakeBus::default());
        with_interrupts_disabled(|guard| pic.init(guard));
        let writes = pic.ports.writes.borrow();
        let posts = writes.iter().filter(|&&(port, _)| port == POST_PORT).count();
        assert_eq!(posts, 10);
    }
}
