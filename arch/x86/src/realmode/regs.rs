// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

/// Register file passed to and returned from a BIOS call.
///
/// The layout is what `pop ds; pop es; popa` consumes and
/// `pusha; push es; push ds` produces in 16-bit mode, so the bridge can move
/// it on and off the real-mode stack unchanged. `sp` is part of the `popa`
/// image but ignored by the processor.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Regs16 {
    pub ds: u16,
    pub es: u16,
    pub di: u16,
    pub si: u16,
    pub bp: u16,
    pub sp: u16,
    pub bx: u16,
    pub dx: u16,
    pub cx: u16,
    pub ax: u16,
}

const _: () = assert!(core::mem::size_of::<Regs16>() == 20);

macro_rules! byte_registers {
    ($($word:ident => $lo:ident, $hi:ident, $set_lo:ident, $set_hi:ident;)*) => {
        impl Regs16 {
            $(
                pub fn $lo(&self) -> u8 {
                    self.$word as u8
                }

                pub fn $hi(&self) -> u8 {
                    (self.$word >> 8) as u8
                }

                pub fn $set_lo(&mut self, value: u8) {
                    self.$word = (self.$word & 0xff00) | value as u16;
                }

                pub fn $set_hi(&mut self, value: u8) {
                    self.$word = (self.$word & 0x00ff) | ((value as u16) << 8);
                }
            )*
        }
    };
}

byte_registers! {
    ax => al, ah, set_al, set_ah;
    bx => bl, bh, set_bl, set_bh;
    cx => cl, ch, set_cl, set_ch;
    dx => dl, dh, set_dl, set_dh;
}

impl Regs16 {
    pub fn to_bytes(&self) -> [u8; 20] {
        let words = [
            self.ds, self.es, self.di, self.si, self.bp, self.sp, self.bx, self.dx, self.cx,
            self.ax,
        ];
        let mut bytes = [0u8; 20];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 20]) -> Regs16 {
        let word = |i: usize| u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        Regs16 {
            ds: word(0),
            es: word(1),
            di: word(2),
            si: word(3),
            bp: word(4),
            sp: word(5),
            bx: word(6),
            dx: word(7),
            cx: word(8),
            ax: word(9),
        }
    }
}
