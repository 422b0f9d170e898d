// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Calling legacy BIOS services from protected mode.
//!
//! A BIOS interrupt can only run in real mode. The bridge copies a small
//! trampoline into low memory ([`REALMODE_SCRATCH`]) which saves the
//! protected-mode stack pointer and IDT, drops to real mode on a private
//! stack, issues the interrupt and climbs back. Everything the trampoline
//! needs lives in one [`BiosShared`] region at that address.
//!
//! Only one call may be in flight at a time. The region is owned by a
//! [`RealModeBridge`], and calls go through a [`BridgeGuard`] obtained from
//! [`RealModeBridge::acquire`], which fails with `BUSY` while another guard is
//! alive.
//!
//! ```ignore
//! let mut bios = bridge.acquire()?;
//! let mut regs = Regs16::default();
//! regs.set_ah(0x0f);
//! unsafe { bios.call(0x10, &mut regs) };
//! debug!("video mode {:#x}", regs.al());
//! ```
//!
//! Do BIOS calls before unmasking PIC lines: some services re-enable
//! interrupts internally, and the real-mode IVT does not know about the
//! remapped vectors.

use core::fmt;
use core::ptr::addr_of;

use kernel::config::CONFIG;
use kernel::debug;
use kernel::ErrorCode;
use spin::{Mutex, MutexGuard};

use crate::support::InterruptGuard;

pub mod farptr;
pub mod regs;

#[cfg(target_arch = "x86")]
mod bios;

#[cfg(target_arch = "x86")]
pub use self::bios::BiosFirmware;
pub use self::farptr::{linear_to_near, near_to_linear, FarPtr};
pub use self::regs::Regs16;
pub use kernel::config::REALMODE_SCRATCH;

pub const TRAMPOLINE_CAPACITY: usize = 512;
pub const STACK_SIZE: usize = 4096;
pub const USERDATA_SIZE: usize = 1024;

/// Contents of an IDTR, as `sidt` stores it and `lidt` loads it.
#[repr(C, packed)]
#[derive(Copy, Clone, Default)]
pub struct Idtr {
    pub limit: u16,
    pub base: u32,
}

impl Idtr {
    /// The real-mode interrupt vector table: 256 far pointers at address 0.
    pub const REAL_MODE_IVT: Idtr = Idtr {
        limit: 0x3ff,
        base: 0,
    };
}

impl fmt::Debug for Idtr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (base, limit) = (self.base, self.limit);
        write!(f, "Idtr {{ base: {:#010x}, limit: {:#06x} }}", base, limit)
    }
}

/// Layout of the low-memory region shared with the real-mode trampoline.
///
/// The trampoline addresses every field as `REALMODE_SCRATCH + offset`, so
/// the layout is fixed and checked against [`offsets`].
#[repr(C, packed)]
pub struct BiosShared {
    pub trampoline: [u8; TRAMPOLINE_CAPACITY],
    /// Real-mode stack. The register frame sits at its top.
    pub stack: [u8; STACK_SIZE],
    /// Protected-mode stack pointer saved across the call.
    pub esp: u32,
    pub idtr16: Idtr,
    pub idtr32: Idtr,
    /// Buffer callers can hand to firmware.
    pub userdata: [u8; USERDATA_SIZE],
}

pub mod offsets {
    use super::*;
    use core::mem::offset_of;

    pub const TRAMPOLINE: usize = 0;
    pub const STACK: usize = TRAMPOLINE + TRAMPOLINE_CAPACITY;
    pub const ESP: usize = STACK + STACK_SIZE;
    pub const IDTR16: usize = ESP + 4;
    pub const IDTR32: usize = IDTR16 + 6;
    pub const USERDATA: usize = IDTR32 + 6;
    pub const END: usize = USERDATA + USERDATA_SIZE;

    /// Where the trampoline pops [`Regs16`] from and pushes it back to.
    pub const FRAME: usize = ESP - core::mem::size_of::<Regs16>();

    const _: () = assert!(offset_of!(BiosShared, trampoline) == TRAMPOLINE);
    const _: () = assert!(offset_of!(BiosShared, stack) == STACK);
    const _: () = assert!(offset_of!(BiosShared, esp) == ESP);
    const _: () = assert!(offset_of!(BiosShared, idtr16) == IDTR16);
    const _: () = assert!(offset_of!(BiosShared, idtr32) == IDTR32);
    const _: () = assert!(offset_of!(BiosShared, userdata) == USERDATA);
    const _: () = assert!(core::mem::size_of::<BiosShared>() == END);
    // Real mode reaches all of it with segment 0
    const _: () = assert!(REALMODE_SCRATCH + END <= 0x1_0000);
}

impl BiosShared {
    pub const fn new() -> BiosShared {
        BiosShared {
            trampoline: [0; TRAMPOLINE_CAPACITY],
            stack: [0; STACK_SIZE],
            esp: 0,
            idtr16: Idtr::REAL_MODE_IVT,
            idtr32: Idtr { limit: 0, base: 0 },
            userdata: [0; USERDATA_SIZE],
        }
    }

    /// The region at [`REALMODE_SCRATCH`].
    ///
    /// ## Safety
    ///
    /// The scratch memory must be RAM not used for anything else, and this
    /// must be called at most once.
    pub unsafe fn at_scratch() -> &'static mut BiosShared {
        unsafe { &mut *(REALMODE_SCRATCH as *mut BiosShared) }
    }

    /// Register frame at the top of the real-mode stack.
    pub fn frame(&self) -> Regs16 {
        let start = offsets::FRAME - offsets::STACK;
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.stack[start..]);
        Regs16::from_bytes(&bytes)
    }

    pub fn set_frame(&mut self, regs: &Regs16) {
        let start = offsets::FRAME - offsets::STACK;
        self.stack[start..].copy_from_slice(&regs.to_bytes());
    }

    fn address(&self) -> usize {
        self as *const BiosShared as usize
    }
}

/// Something that can run a real-mode interrupt against a [`BiosShared`]
/// region. The hardware implementation is [`BiosFirmware`]; tests use fakes.
pub trait Firmware {
    /// Runs interrupt `vector` with the registers found in
    /// [`BiosShared::frame`] and leaves the resulting registers there.
    ///
    /// ## Safety
    ///
    /// Interrupts must be disabled. The firmware may write wherever the
    /// registers in the frame point.
    unsafe fn invoke(&self, shared: &mut BiosShared, vector: u8);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    SwitchingToReal,
    FirmwareExecuting,
    SwitchingToProtected,
}

struct BridgeInner<'a> {
    shared: &'a mut BiosShared,
    state: BridgeState,
    calls: usize,
}

/// Exclusive owner of a [`BiosShared`] region and the firmware that runs on
/// it.
pub struct RealModeBridge<'a, F: Firmware> {
    firmware: F,
    inner: Mutex<BridgeInner<'a>>,
}

impl<'a, F: Firmware> RealModeBridge<'a, F> {
    pub fn new(firmware: F, shared: &'a mut BiosShared) -> RealModeBridge<'a, F> {
        RealModeBridge {
            firmware,
            inner: Mutex::new(BridgeInner {
                shared,
                state: BridgeState::Idle,
                calls: 0,
            }),
        }
    }

    /// Takes the bridge for a sequence of calls. Returns `BUSY` if another
    /// [`BridgeGuard`] is alive, including when called from an interrupt
    /// handler that preempted its owner.
    pub fn acquire(&self) -> Result<BridgeGuard<'_, 'a, F>, ErrorCode> {
        let inner = self.inner.try_lock().ok_or(ErrorCode::BUSY)?;
        Ok(BridgeGuard {
            firmware: &self.firmware,
            inner,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.is_locked()
    }
}

pub struct BridgeGuard<'b, 'a, F: Firmware> {
    firmware: &'b F,
    inner: MutexGuard<'b, BridgeInner<'a>>,
}

impl<F: Firmware> BridgeGuard<'_, '_, F> {
    /// Issues `int vector` in real mode with `regs` and replaces `regs` with
    /// the registers the firmware returned.
    ///
    /// Runs with interrupts disabled from start to end. Failure is reported
    /// by the firmware in `regs` (usually carry or `ah`), never here.
    ///
    /// ## Safety
    ///
    /// Any buffer `regs` points the firmware at (such as `es:di`) must be
    /// memory it may write, e.g. [`userdata_ptr`](Self::userdata_ptr).
    pub unsafe fn call(&mut self, vector: u8, regs: &mut Regs16) {
        let _irq = InterruptGuard::new();
        let inner = &mut *self.inner;
        if CONFIG.trace_bios_calls {
            debug!("bios: int {:#04x} <- {:?}", vector, regs);
        }

        inner.state = BridgeState::SwitchingToReal;
        inner.shared.set_frame(regs);

        inner.state = BridgeState::FirmwareExecuting;
        unsafe {
            self.firmware.invoke(inner.shared, vector);
        }

        inner.state = BridgeState::SwitchingToProtected;
        *regs = inner.shared.frame();

        inner.state = BridgeState::Idle;
        inner.calls += 1;
        if CONFIG.trace_bios_calls {
            debug!("bios: int {:#04x} -> {:?}", vector, regs);
        }
    }

    pub fn state(&self) -> BridgeState {
        self.inner.state
    }

    /// Number of completed calls over the bridge's lifetime.
    pub fn calls(&self) -> usize {
        self.inner.calls
    }

    pub fn userdata(&mut self) -> &mut [u8; USERDATA_SIZE] {
        &mut self.inner.shared.userdata
    }

    /// `0000:offset` pointer to the user data area, for handing to firmware.
    pub fn userdata_ptr(&self) -> FarPtr {
        let addr = addr_of!(self.inner.shared.userdata) as usize as u32;
        FarPtr::new(0, linear_to_near(addr, 0))
    }

    /// Flat address of the shared region.
    pub fn shared_address(&self) -> usize {
        self.inner.shared.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Echo;

    impl Firmware for Echo {
        unsafe fn invoke(&self, _shared: &mut BiosShared, _vector: u8) {}
    }

    /// Answers `int 0x10, ah=0x0f` like a VGA BIOS in 80x25 text mode and
    /// writes a marker into the buffer at `es:di` for `int 0x15`.
    #[derive(Default)]
    struct FakeBios {
        last_vector: Cell<Option<u8>>,
    }

    impl Firmware for FakeBios {
        unsafe fn invoke(&self, shared: &mut BiosShared, vector: u8) {
            self.last_vector.set(Some(vector));
            let mut regs = shared.frame();
            match (vector, regs.ah()) {
                (0x10, 0x0f) => {
                    regs.set_al(0x03);
                    regs.set_ah(80);
                    regs.set_bh(0);
                }
                (0x15, _) if regs.es == 0 => {
                    let base = (shared.address() + offsets::USERDATA) as u16;
                    let offset = regs.di.wrapping_sub(base) as usize;
                    shared.userdata[offset..offset + 4].copy_from_slice(b"SMAP");
                    regs.ax = 0;
                }
                _ => regs.set_ah(0x86),
            }
            shared.set_frame(&regs);
        }
    }

    #[test]
    fn layout_is_fixed() {
        assert_eq!(offsets::STACK, 512);
        assert_eq!(offsets::ESP, 4608);
        assert_eq!(offsets::IDTR16, 4612);
        assert_eq!(offsets::IDTR32, 4618);
        assert_eq!(offsets::USERDATA, 4624);
        assert_eq!(offsets::END, 5648);
        assert_eq!(offsets::FRAME, 4588);
    }

    #[test]
    fn echo_returns_identical_registers() {
        let mut shared = BiosShared::new();
        let bridge = RealModeBridge::new(Echo, &mut shared);
        let mut guard = bridge.acquire().unwrap();

        let input = Regs16 {
            ds: 0x1111,
            es: 0x2222,
            di: 0x3333,
            si: 0x4444,
            bp: 0x5555,
            sp: 0x6666,
            bx: 0x7777,
            dx: 0x8888,
            cx: 0x9999,
            ax: 0xaaaa,
        };
        let mut regs = input;
        unsafe { guard.call(0x42, &mut regs) };
        assert_eq!(regs, input);
        assert_eq!(guard.state(), BridgeState::Idle);
        assert_eq!(guard.calls(), 1);
    }

    #[test]
    fn firmware_results_come_back() {
        let mut shared = BiosShared::new();
        let bridge = RealModeBridge::new(FakeBios::default(), &mut shared);
        let mut guard = bridge.acquire().unwrap();

        let mut regs = Regs16::default();
        regs.set_ah(0x0f);
        unsafe { guard.call(0x10, &mut regs) };
        assert_eq!(regs.al(), 0x03);
        assert_eq!(regs.ah(), 80);
        assert_eq!(guard.firmware.last_vector.get(), Some(0x10));

        let mut regs = Regs16::default();
        regs.set_ah(0x99);
        unsafe { guard.call(0x13, &mut regs) };
        assert_eq!(regs.ah(), 0x86);
    }

    #[test]
    fn userdata_reachable_through_far_pointer() {
        let mut shared = BiosShared::new();
        let bridge = RealModeBridge::new(FakeBios::default(), &mut shared);
        let mut guard = bridge.acquire().unwrap();

        let ptr = guard.userdata_ptr();
        let mut regs = Regs16 {
            es: ptr.segment(),
            di: ptr.offset().wrapping_add(16),
            ..Regs16::default()
        };
        regs.set_ah(0xe8);
        unsafe { guard.call(0x15, &mut regs) };
        assert_eq!(regs.ax, 0);
        assert_eq!(&guard.userdata()[16..20], b"SMAP");
    }

    #[test]
    fn userdata_pointer_uses_segment_zero() {
        let mut shared = BiosShared::new();
        let bridge = RealModeBridge::new(Echo, &mut shared);
        let guard = bridge.acquire().unwrap();
        let ptr = guard.userdata_ptr();
        assert_eq!(ptr.segment(), 0);
        assert_eq!(
            ptr.offset(),
            (guard.shared_address() + offsets::USERDATA) as u16
        );
    }

    #[test]
    fn second_acquire_is_busy() {
        let mut shared = BiosShared::new();
        let bridge = RealModeBridge::new(Echo, &mut shared);

        let guard = bridge.acquire().unwrap();
        assert!(bridge.is_busy());
        assert_eq!(bridge.acquire().err(), Some(ErrorCode::BUSY));

        drop(guard);
        assert!(!bridge.is_busy());
        assert!(bridge.acquire().is_ok());
    }

    #[test]
    fn call_restores_interrupt_flag() {
        use crate::registers::irq;

        let mut shared = BiosShared::new();
        let bridge = RealModeBridge::new(Echo, &mut shared);
        let mut guard = bridge.acquire().unwrap();

        unsafe { irq::enable() };
        let mut regs = Regs16::default();
        unsafe { guard.call(0x10, &mut regs) };
        assert!(irq::are_enabled());
        unsafe { irq::disable() };
    }
}
