// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Support for kernel debug output.
//!
//! The `debug!` macro formats a line and hands it to the registered debug
//! writer. Until a board registers an output with [`set_debug_writer`], lines
//! are kept in a fixed ring buffer and flushed in order once an output
//! appears. When the buffer is full the oldest bytes are overwritten and
//! counted.
//!
//! The writer is protected by a spin lock. `debug!` only ever tries the lock,
//! so a line produced by an interrupt handler that preempted another `debug!`
//! is dropped rather than deadlocking.
//!
//! ```ignore
//! kernel::debug!("timer fired {} times", count);
//! ```

use core::fmt::{self, Write};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::config::CONFIG;

/// Size of the ring buffer holding output produced before a writer exists.
pub const DEBUG_BUFFER_LEN: usize = 1024;

/// Raw byte sink used for debug and panic output.
pub trait IoWrite {
    /// Writes as much of `buf` as possible and returns the number of bytes
    /// written.
    fn write(&mut self, buf: &[u8]) -> usize;

    fn write_ring_buffer(&mut self, first: &[u8], second: &[u8]) -> usize {
        self.write(first) + self.write(second)
    }
}

/// Debug output state: an optional output plus the early-boot ring buffer.
pub struct DebugWriter<'a> {
    output: Option<&'a mut (dyn IoWrite + Send)>,
    buffer: [u8; DEBUG_BUFFER_LEN],
    head: usize,
    len: usize,
    dropped: usize,
}

impl<'a> DebugWriter<'a> {
    pub const fn new() -> Self {
        Self {
            output: None,
            buffer: [0; DEBUG_BUFFER_LEN],
            head: 0,
            len: 0,
            dropped: 0,
        }
    }

    /// Installs `output` and flushes everything buffered so far into it.
    pub fn set_output(&mut self, output: &'a mut (dyn IoWrite + Send)) {
        self.output = Some(output);
        self.flush();
    }

    /// Number of bytes currently waiting in the ring buffer.
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// Number of bytes overwritten because the ring buffer was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let tail = (self.head + self.len) % DEBUG_BUFFER_LEN;
            self.buffer[tail] = b;
            if self.len == DEBUG_BUFFER_LEN {
                // `tail` was the oldest byte
                self.head = (self.head + 1) % DEBUG_BUFFER_LEN;
                self.dropped += 1;
            } else {
                self.len += 1;
            }
        }
    }

    /// Moves the buffered bytes, oldest first, into the output if there is
    /// one. Whatever the output does not accept stays buffered.
    pub fn flush(&mut self) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        if self.len == 0 {
            return;
        }
        let end = self.head + self.len;
        let (first, second) = if end <= DEBUG_BUFFER_LEN {
            (&self.buffer[self.head..end], &self.buffer[0..0])
        } else {
            (
                &self.buffer[self.head..],
                &self.buffer[..end - DEBUG_BUFFER_LEN],
            )
        };
        let written = output.write_ring_buffer(first, second).min(self.len);
        self.head = (self.head + written) % DEBUG_BUFFER_LEN;
        self.len -= written;
        if self.len == 0 {
            self.head = 0;
        }
    }

    /// Copies the pending ring buffer contents into `writer`, used on panic
    /// where the registered output might be the thing that failed.
    fn drain_into(&mut self, writer: &mut dyn IoWrite) {
        while self.len > 0 {
            let chunk = core::cmp::min(self.len, DEBUG_BUFFER_LEN - self.head);
            writer.write(&self.buffer[self.head..self.head + chunk]);
            self.head = (self.head + chunk) % DEBUG_BUFFER_LEN;
            self.len -= chunk;
        }
    }
}

impl Write for DebugWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(output) = self.output.as_mut() {
            output.write(s.as_bytes());
            return Ok(());
        }
        self.push(s.as_bytes());
        Ok(())
    }
}

/// Adapts an `IoWrite` to `core::fmt::Write`.
struct FmtAdapter<'a>(&'a mut dyn IoWrite);

impl Write for FmtAdapter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write(s.as_bytes());
        Ok(())
    }
}

static DEBUG_WRITER: Mutex<DebugWriter<'static>> = Mutex::new(DebugWriter::new());

/// Lines lost because the writer was locked when `debug!` ran.
static CONTENDED: AtomicUsize = AtomicUsize::new(0);

/// Registers the board's debug output. Buffered early output is flushed into
/// it immediately.
pub fn set_debug_writer(output: &'static mut (dyn IoWrite + Send)) {
    DEBUG_WRITER.lock().set_output(output);
}

/// Number of `debug!` lines lost to lock contention.
pub fn contended_lines() -> usize {
    CONTENDED.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn debug_fmt(args: fmt::Arguments) {
    match DEBUG_WRITER.try_lock() {
        Some(mut writer) => {
            let _ = write!(writer, "{}: ", CONFIG.debug_tag);
            let _ = writer.write_fmt(args);
            let _ = writer.write_str("\r\n");
        }
        None => {
            CONTENDED.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Writes a tagged line to the kernel debug output.
#[macro_export]
macro_rules! debug {
    () => ({
        // Allow an empty debug!() to print the location when hit
        $crate::debug!("{}:{}", file!(), line!())
    });
    ($($arg:tt)+) => ({
        $crate::debug::debug_fmt(format_args!($($arg)+))
    });
}

/// Writes any buffered debug output and then the panic message to `writer`.
///
/// Intended to be called from a board's panic handler with a writer that does
/// not depend on anything but the hardware it drives.
///
/// # Safety
///
/// Called from panic context only. The debug writer lock is tried, not taken,
/// so buffered output is skipped if the panic happened while it was held.
pub unsafe fn panic_print(writer: &mut dyn IoWrite, panic_info: &PanicInfo) {
    if let Some(mut debug) = DEBUG_WRITER.try_lock() {
        debug.drain_into(writer);
    }
    let mut out = FmtAdapter(writer);
    let _ = writeln!(out, "\r\n{} panic: {}\r", CONFIG.debug_tag, panic_info);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink {
        data: [u8; 2 * DEBUG_BUFFER_LEN],
        len: usize,
    }

    impl Sink {
        fn new() -> Self {
            Self {
                data: [0; 2 * DEBUG_BUFFER_LEN],
                len: 0,
            }
        }

        fn contents(&self) -> &[u8] {
            &self.data[..self.len]
        }
    }

    impl IoWrite for Sink {
        fn write(&mut self, buf: &[u8]) -> usize {
            self.data[self.len..self.len + buf.len()].copy_from_slice(buf);
            self.len += buf.len();
            buf.len()
        }
    }

    #[test]
    fn buffers_until_output_registered() {
        let mut sink = Sink::new();
        {
            let mut writer = DebugWriter::new();
            write!(writer, "early {}", 1).unwrap();
            assert_eq!(writer.buffered(), 7);
            writer.set_output(&mut sink);
            assert_eq!(writer.buffered(), 0);
            writer.write_str(" late").unwrap();
        }
        assert_eq!(sink.contents(), b"early 1 late");
    }

    /// Accepts at most `room` bytes in total.
    struct Narrow {
        sink: Sink,
        room: usize,
    }

    impl IoWrite for Narrow {
        fn write(&mut self, buf: &[u8]) -> usize {
            let n = core::cmp::min(buf.len(), self.room);
            self.room -= n;
            self.sink.write(&buf[..n])
        }
    }

    #[test]
    fn full_buffer_overwrites_oldest_bytes() {
        let mut writer = DebugWriter::new();
        writer.write_str("O").unwrap();
        for _ in 1..DEBUG_BUFFER_LEN {
            writer.write_str("a").unwrap();
        }
        writer.write_str("NEW").unwrap();
        assert_eq!(writer.buffered(), DEBUG_BUFFER_LEN);
        assert_eq!(writer.dropped(), 3);

        let mut sink = Sink::new();
        writer.set_output(&mut sink);
        drop(writer);
        let out = sink.contents();
        assert_eq!(out.len(), DEBUG_BUFFER_LEN);
        assert_eq!(out[0], b'a');
        assert!(!out.contains(&b'O'));
        assert_eq!(&out[DEBUG_BUFFER_LEN - 3..], b"NEW");
    }

    #[test]
    fn partial_flush_keeps_the_rest() {
        let mut writer = DebugWriter::new();
        writer.write_str("abcdef").unwrap();

        let mut narrow = Narrow {
            sink: Sink::new(),
            room: 4,
        };
        writer.set_output(&mut narrow);
        assert_eq!(writer.buffered(), 2);
        writer.output = None;

        let mut sink = Sink::new();
        writer.drain_into(&mut sink);
        assert_eq!(sink.contents(), b"ef");
        assert_eq!(narrow.sink.contents(), b"abcd");
    }

    #[test]
    fn contended_line_is_counted() {
        let before = contended_lines();
        {
            let _held = DEBUG_WRITER.lock();
            crate::debug!("lost");
        }
        assert!(contended_lines() > before);
    }

    #[test]
    fn wrapped_buffer_flushes_in_order() {
        let mut writer = DebugWriter::new();
        // Move the head forward so the next contents straddle the end.
        writer.head = DEBUG_BUFFER_LEN - 2;
        writer.write_str("wxyz").unwrap();

        let mut sink = Sink::new();
        writer.drain_into(&mut sink);
        assert_eq!(sink.contents(), b"wxyz");
        assert_eq!(writer.buffered(), 0);
    }
}
