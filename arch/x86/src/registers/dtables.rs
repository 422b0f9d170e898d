// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

// This is inspired and adapted for Tock from the [x86](https://github.com/gz/rust-x86) crate.

//! Descriptor table registers (GDTR and IDTR).

#[cfg(target_arch = "x86")]
use core::arch::asm;

use core::fmt;

/// Operand of `lgdt`/`lidt`: a limit and a pointer to the first entry.
#[repr(C, packed)]
pub struct DescriptorTablePointer<Entry> {
    /// Size of the table in bytes, minus one.
    pub limit: u16,
    pub base: *const Entry,
}

impl<T> Default for DescriptorTablePointer<T> {
    fn default() -> DescriptorTablePointer<T> {
        DescriptorTablePointer {
            limit: 0,
            base: core::ptr::null(),
        }
    }
}

impl<T> DescriptorTablePointer<T> {
    /// Points at `slice`. Both tables expect the limit to be the size in
    /// bytes minus one (Intel 3a, Sections 3.5.1 and 6.10).
    pub fn new_from_slice(slice: &[T]) -> Self {
        let len = core::mem::size_of_val(slice) - 1;
        debug_assert!(len < 0x10000);
        DescriptorTablePointer {
            base: slice.as_ptr(),
            limit: len as u16,
        }
    }

    /// Number of whole entries covered by the limit.
    pub fn entries(&self) -> usize {
        (self.limit as usize + 1) / core::mem::size_of::<T>()
    }
}

impl<T> fmt::Debug for DescriptorTablePointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DescriptorTablePointer ({} {:?})", { self.limit }, {
            self.base
        })
    }
}

/// Load the GDTR register.
///
/// ## Safety
///
/// Needs CPL 0. The table must stay valid for as long as it is loaded.
#[cfg(target_arch = "x86")]
pub unsafe fn lgdt<T>(gdt: &DescriptorTablePointer<T>) {
    unsafe {
        asm!("lgdt [{0}]", in(reg) gdt, options(readonly, nostack, preserves_flags));
    }
}

/// Load the IDTR register.
///
/// ## Safety
///
/// Needs CPL 0. The table must stay valid for as long as it is loaded.
#[cfg(target_arch = "x86")]
pub unsafe fn lidt<T>(idt: &DescriptorTablePointer<T>) {
    unsafe {
        asm!("lidt [{0}]", in(reg) idt, options(readonly, nostack, preserves_flags));
    }
}

//For CI only

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn lgdt<T>(_gdt: &DescriptorTablePointer<T>) {
    unimplemented!()
}

#[cfg(not(any(doc, target_arch = "x86")))]
pub unsafe fn lidt<T>(_idt: &DescriptorTablePointer<T>) {
    unimplemented!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_size_minus_one() {
        let table = [0u64; 48];
        let ptr = DescriptorTablePointer::new_from_slice(&table);
        assert_eq!({ ptr.limit }, 48 * 8 - 1);
        assert_eq!(ptr.entries(), 48);
        assert_eq!({ ptr.base }, table.as_ptr());
    }
}
