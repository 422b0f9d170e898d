// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Core runtime crate shared by the x86 architecture crate, the PC chip crate
//! and boards.
//!
//! It holds the pieces that do not touch hardware directly: compile-time
//! configuration, the kernel debug output path, the common error type, a
//! small round-robin run queue and static allocation helpers.

#![no_std]

pub mod collections;
pub mod config;
pub mod debug;
pub mod sched;
pub mod utilities;

mod errorcode;

pub use crate::errorcode::ErrorCode;
