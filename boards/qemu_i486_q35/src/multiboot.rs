// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Multiboot V1 header, so that QEMU `-kernel` and GRUB can load the image.
//!
//! <https://www.gnu.org/software/grub/manual/multiboot/multiboot.html>

const MAGIC_NUMBER: u32 = 0x1BADB002;

/// Ask the loader for the memory map in the boot information.
pub const FLAG_MEMORY_INFO: u32 = 1 << 1;

/// The header words, which must sit in the first 8 KiB of the image.
#[repr(C, align(4))]
pub struct Header {
    magic: u32,
    flags: u32,
    checksum: u32,
}

impl Header {
    /// The checksum makes the three words sum to zero.
    pub const fn new(flags: u32) -> Header {
        Header {
            magic: MAGIC_NUMBER,
            flags,
            checksum: 0u32.wrapping_sub(MAGIC_NUMBER).wrapping_sub(flags),
        }
    }
}

#[used]
#[link_section = ".multiboot"]
static MULTIBOOT_HEADER: Header = Header::new(FLAG_MEMORY_INFO);
