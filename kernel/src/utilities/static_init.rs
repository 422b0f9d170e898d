// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for statically initializing objects in memory.

/// Allocates a statically-sized global region of memory, moves `$e` into it
/// and returns a `&'static mut $T`.
///
/// Boards use it for objects that must outlive `main` but are only known at
/// runtime, such as task stacks and the debug writer.
///
/// # Safety
///
/// The macro writes to a global without taking a lock. The caller must not
/// run the same expansion twice, as the second run would overwrite the first
/// value without dropping it.
#[macro_export]
macro_rules! static_init {
    ($T:ty, $e:expr $(,)?) => {{
        let buf = $crate::static_buf!($T);
        buf.write($e)
    }};
}

/// Allocates a statically-sized global region of memory for `$T` without
/// initializing it, and returns it as `&'static mut MaybeUninit<$T>`.
///
/// Splitting allocation from initialization lets code that does not know the
/// concrete type at the allocation site finish the job later.
#[macro_export]
macro_rules! static_buf {
    ($T:ty $(,)?) => {{
        // Statically allocate a read-write buffer for the value without
        // actually writing anything.
        static mut BUF: core::mem::MaybeUninit<$T> = core::mem::MaybeUninit::uninit();
        &mut *core::ptr::addr_of_mut!(BUF)
    }};
}
