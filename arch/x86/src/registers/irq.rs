// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

// This is inspired and adapted for Tock from the [x86](https://github.com/gz/rust-x86) crate.

//! Processor exception catalogue and interrupt flag control.

#[cfg(target_arch = "x86")]
use core::arch::asm;
use core::fmt;

/// How the processor reports an exception (see Intel Vol. 3a, Section 6.5).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExceptionKind {
    /// Reported before the faulting instruction; `eip` points at it.
    Fault,
    /// Reported after the trapping instruction; `eip` points past it.
    Trap,
    /// Fault or trap depending on the condition that caused it.
    FaultOrTrap,
    /// Unrecoverable; the saved `eip` may not be meaningful.
    Abort,
    /// External interrupt delivered through a reserved vector.
    Interrupt,
    /// Vector reserved by Intel.
    Reserved,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ExceptionKind::Fault => "Fault",
            ExceptionKind::Trap => "Trap",
            ExceptionKind::FaultOrTrap => "Fault / Trap",
            ExceptionKind::Abort => "Abort",
            ExceptionKind::Interrupt => "Interrupt",
            ExceptionKind::Reserved => "Reserved",
        };
        f.write_str(name)
    }
}

/// x86 exception description (see also Intel Vol. 3a Chapter 6).
#[derive(Debug)]
pub struct ExceptionDescription {
    pub vector: u8,
    pub mnemonic: &'static str,
    pub description: &'static str,
    pub kind: ExceptionKind,
    /// Whether the processor pushes an error code before the return address.
    pub has_error_code: bool,
}

impl fmt::Display for ExceptionDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ({}, vec={}) {}",
            self.mnemonic, self.kind, self.vector, self.description
        )
    }
}

pub const DIVIDE_ERROR_VECTOR: u8 = 0;
pub const DEBUG_VECTOR: u8 = 1;
pub const NONMASKABLE_INTERRUPT_VECTOR: u8 = 2;
pub const BREAKPOINT_VECTOR: u8 = 3;
pub const OVERFLOW_VECTOR: u8 = 4;
pub const BOUND_RANGE_EXCEEDED_VECTOR: u8 = 5;
pub const INVALID_OPCODE_VECTOR: u8 = 6;
pub const DEVICE_NOT_AVAILABLE_VECTOR: u8 = 7;
pub const DOUBLE_FAULT_VECTOR: u8 = 8;
pub const COPROCESSOR_SEGMENT_OVERRUN_VECTOR: u8 = 9;
pub const INVALID_TSS_VECTOR: u8 = 10;
pub const SEGMENT_NOT_PRESENT_VECTOR: u8 = 11;
pub const STACK_SEGMENT_FAULT_VECTOR: u8 = 12;
pub const GENERAL_PROTECTION_FAULT_VECTOR: u8 = 13;
pub const PAGE_FAULT_VECTOR: u8 = 14;
pub const X87_FPU_VECTOR: u8 = 16;
pub const ALIGNMENT_CHECK_VECTOR: u8 = 17;
pub const MACHINE_CHECK_VECTOR: u8 = 18;
pub const SIMD_FLOATING_POINT_VECTOR: u8 = 19;
pub const VIRTUALIZATION_VECTOR: u8 = 20;
pub const CONTROL_PROTECTION_VECTOR: u8 = 21;
pub const HYPERVISOR_INJECTION_VECTOR: u8 = 28;
pub const VMM_COMMUNICATION_VECTOR: u8 = 29;
pub const SECURITY_EXCEPTION_VECTOR: u8 = 30;

const fn exception(
    vector: u8,
    mnemonic: &'static str,
    description: &'static str,
    kind: ExceptionKind,
    has_error_code: bool,
) -> ExceptionDescription {
    ExceptionDescription {
        vector,
        mnemonic,
        description,
        kind,
        has_error_code,
    }
}

const fn reserved(vector: u8) -> ExceptionDescription {
    exception(vector, "", "Reserved", ExceptionKind::Reserved, false)
}

use ExceptionKind::{Abort, Fault, FaultOrTrap, Interrupt, Trap};

/// Every vector below 32, indexed by vector number.
pub static EXCEPTIONS: [ExceptionDescription; 32] = [
    exception(DIVIDE_ERROR_VECTOR, "#DE", "Divide Error", Fault, false),
    exception(DEBUG_VECTOR, "#DB", "Debug", FaultOrTrap, false),
    exception(
        NONMASKABLE_INTERRUPT_VECTOR,
        "NMI",
        "Nonmaskable Interrupt",
        Interrupt,
        false,
    ),
    exception(BREAKPOINT_VECTOR, "#BP", "Breakpoint", Trap, false),
    exception(OVERFLOW_VECTOR, "#OF", "Overflow", Trap, false),
    exception(
        BOUND_RANGE_EXCEEDED_VECTOR,
        "#BR",
        "BOUND Range Exceeded",
        Fault,
        false,
    ),
    exception(INVALID_OPCODE_VECTOR, "#UD", "Invalid Opcode", Fault, false),
    exception(
        DEVICE_NOT_AVAILABLE_VECTOR,
        "#NM",
        "Device Not Available",
        Fault,
        false,
    ),
    exception(DOUBLE_FAULT_VECTOR, "#DF", "Double Fault", Abort, true),
    exception(
        COPROCESSOR_SEGMENT_OVERRUN_VECTOR,
        "",
        "Coprocessor Segment Overrun",
        Fault,
        false,
    ),
    exception(INVALID_TSS_VECTOR, "#TS", "Invalid TSS", Fault, true),
    exception(
        SEGMENT_NOT_PRESENT_VECTOR,
        "#NP",
        "Segment Not Present",
        Fault,
        true,
    ),
    exception(
        STACK_SEGMENT_FAULT_VECTOR,
        "#SS",
        "Stack-Segment Fault",
        Fault,
        true,
    ),
    exception(
        GENERAL_PROTECTION_FAULT_VECTOR,
        "#GP",
        "General Protection",
        Fault,
        true,
    ),
    exception(PAGE_FAULT_VECTOR, "#PF", "Page Fault", Fault, true),
    reserved(15),
    exception(
        X87_FPU_VECTOR,
        "#MF",
        "x87 FPU Floating-Point Error",
        Fault,
        false,
    ),
    exception(ALIGNMENT_CHECK_VECTOR, "#AC", "Alignment Check", Fault, true),
    exception(MACHINE_CHECK_VECTOR, "#MC", "Machine Check", Abort, false),
    exception(
        SIMD_FLOATING_POINT_VECTOR,
        "#XM",
        "SIMD Floating-Point",
        Fault,
        false,
    ),
    exception(VIRTUALIZATION_VECTOR, "#VE", "Virtualization", Fault, false),
    exception(
        CONTROL_PROTECTION_VECTOR,
        "#CP",
        "Control Protection",
        Fault,
        true,
    ),
    reserved(22),
    reserved(23),
    reserved(24),
    reserved(25),
    reserved(26),
    reserved(27),
    exception(
        HYPERVISOR_INJECTION_VECTOR,
        "#HV",
        "Hypervisor Injection",
        Fault,
        false,
    ),
    exception(
        VMM_COMMUNICATION_VECTOR,
        "#VC",
        "VMM Communication",
        Fault,
        true,
    ),
    exception(SECURITY_EXCEPTION_VECTOR, "#SX", "Security", Fault, true),
    reserved(31),
];

/// Looks up the exception description for `vector`, if it is an exception.
pub fn exception_for(vector: u8) -> Option<&'static ExceptionDescription> {
    EXCEPTIONS.get(vector as usize)
}

/// Whether the processor pushes an error code when delivering `vector`.
///
/// Only exceptions do; hardware and software interrupts never push one.
pub fn has_error_code(vector: u8) -> bool {
    exception_for(vector).is_some_and(|e| e.has_error_code)
}

/// Enable interrupts.
///
/// ## Safety
///
/// Requires ring 0. Handlers for every unmasked line must be ready to run.
#[cfg(target_arch = "x86")]
pub unsafe fn enable() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Disable interrupts.
///
/// ## Safety
///
/// Requires ring 0.
#[cfg(target_arch = "x86")]
pub unsafe fn disable() {
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Returns whether the interrupt flag is currently set.
#[cfg(target_arch = "x86")]
pub fn are_enabled() -> bool {
    // Safety: reading EFLAGS has no side effects.
    unsafe { super::bits32::eflags::read().interrupts_enabled() }
}

// Off target there is no interrupt flag. It is modelled in memory so that
// code holding interrupt guards can be unit tested. Each test thread gets its
// own flag so tests cannot observe one another.

#[cfg(all(not(target_arch = "x86"), test))]
std::thread_local! {
    static HOST_IF: core::cell::Cell<bool> = const { core::cell::Cell::new(false) };
}

#[cfg(all(not(target_arch = "x86"), test))]
fn set_host_if(enabled: bool) {
    HOST_IF.with(|flag| flag.set(enabled));
}

#[cfg(all(not(target_arch = "x86"), test))]
pub fn are_enabled() -> bool {
    HOST_IF.with(|flag| flag.get())
}

#[cfg(all(not(target_arch = "x86"), not(test)))]
static HOST_IF: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

#[cfg(all(not(target_arch = "x86"), not(test)))]
fn set_host_if(enabled: bool) {
    HOST_IF.store(enabled, core::sync::atomic::Ordering::SeqCst);
}

#[cfg(all(not(target_arch = "x86"), not(test)))]
pub fn are_enabled() -> bool {
    HOST_IF.load(core::sync::atomic::Ordering::SeqCst)
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn enable() {
    set_host_if(true);
}

#[cfg(not(target_arch = "x86"))]
pub unsafe fn disable() {
    set_host_if(false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_vector() {
        for (i, e) in EXCEPTIONS.iter().enumerate() {
            assert_eq!(e.vector as usize, i);
        }
    }

    #[test]
    fn error_code_vectors() {
        let expected = [8u8, 10, 11, 12, 13, 14, 17, 21, 29, 30];
        for vector in 0..=255u8 {
            assert_eq!(
                has_error_code(vector),
                expected.contains(&vector),
                "vector {}",
                vector
            );
        }
    }

    #[test]
    fn description_format() {
        let mut buf = [0u8; 64];
        let mut cursor = std::io::Cursor::new(&mut buf[..]);
        use std::io::Write;
        write!(cursor, "{}", EXCEPTIONS[13]).unwrap();
        let len = cursor.position() as usize;
        assert_eq!(&buf[..len], b"#GP (Fault, vec=13) General Protection");
    }

    #[test]
    fn host_flag_model() {
        unsafe {
            disable();
            assert!(!are_enabled());
            enable();
            assert!(are_enabled());
            disable();
        }
        assert!(!are_enabled());
    }
}
