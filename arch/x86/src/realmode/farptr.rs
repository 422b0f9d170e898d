// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Conversions between flat addresses and real-mode `segment:offset` pairs.

use core::fmt;

/// A real-mode far pointer as firmware stores it: offset in the low half,
/// segment in the high half.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct FarPtr(u32);

impl FarPtr {
    pub const fn new(segment: u16, offset: u16) -> FarPtr {
        FarPtr(((segment as u32) << 16) | offset as u32)
    }

    pub const fn from_raw(raw: u32) -> FarPtr {
        FarPtr(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn segment(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn offset(self) -> u16 {
        self.0 as u16
    }

    /// Flat address this pointer refers to: `segment * 16 + offset`.
    pub const fn to_linear(self) -> u32 {
        near_to_linear(self.segment(), self.offset())
    }

    /// Normalized far pointer for `addr`, with the offset below 16.
    ///
    /// Every address below 1 MiB has one.
    pub const fn from_linear(addr: u32) -> FarPtr {
        FarPtr::new((addr >> 4) as u16, (addr & 0xf) as u16)
    }
}

impl fmt::Debug for FarPtr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.segment(), self.offset())
    }
}

/// Offset of `addr` within `segment`. `addr` must lie in the 64 KiB the
/// segment covers.
pub const fn linear_to_near(addr: u32, segment: u16) -> u16 {
    addr.wrapping_sub((segment as u32) << 4) as u16
}

pub const fn near_to_linear(segment: u16, offset: u16) -> u32 {
    ((segment as u32) << 4) + offset as u32
}
