// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

// This is inspired and adapted for Tock from the [x86](https://github.com/gz/rust-x86) crate.

//! Data structures and functions used by 32-bit mode.

pub mod eflags;
