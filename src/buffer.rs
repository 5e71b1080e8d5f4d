//! Receive-side byte ring buffer.
//!
//! This is the only object shared between threads: the host may feed bytes
//! from its reader thread while the run loop peeks and flushes from another,
//! so every operation takes the interior mutex.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::error::{Error, Result};

/// Capacity of the per-span receive buffer.
pub const BUFFER_SZ: usize = 512;

struct Inner {
    storage: [u8; BUFFER_SZ],
    rindex: usize,
    windex: usize,
    size: usize,
}

impl Inner {
    const fn new() -> Self {
        Self {
            storage: [0; BUFFER_SZ],
            rindex: 0,
            windex: 0,
            size: 0,
        }
    }

    fn enqueue(&mut self, data: &[u8]) -> Result<()> {
        if self.size + data.len() > BUFFER_SZ {
            return Err(Error::OutOfMemory);
        }

        let before_wrap = (BUFFER_SZ - self.windex).min(data.len());
        self.storage[self.windex..self.windex + before_wrap].copy_from_slice(&data[..before_wrap]);
        let after_wrap = data.len() - before_wrap;
        if after_wrap > 0 {
            self.storage[..after_wrap].copy_from_slice(&data[before_wrap..]);
            self.windex = after_wrap;
        } else {
            self.windex = (self.windex + before_wrap) % BUFFER_SZ;
        }
        self.size += data.len();
        Ok(())
    }

    fn peek(&self, out: &mut [u8]) -> Result<usize> {
        if self.size == 0 {
            return Err(Error::Fail);
        }

        let before_wrap = (BUFFER_SZ - self.rindex).min(self.size);
        out[..before_wrap].copy_from_slice(&self.storage[self.rindex..self.rindex + before_wrap]);
        let after_wrap = self.size - before_wrap;
        if after_wrap > 0 {
            out[before_wrap..self.size].copy_from_slice(&self.storage[..after_wrap]);
        }
        Ok(self.size)
    }

    fn flush(&mut self, len: usize) -> Result<()> {
        if self.size < len {
            return Err(Error::Fail);
        }
        self.rindex = (self.rindex + len) % BUFFER_SZ;
        self.size -= len;
        Ok(())
    }

    fn dequeue(&mut self, out: &mut [u8]) -> Result<()> {
        let len = out.len();
        if self.size < len {
            return Err(Error::Fail);
        }

        let before_wrap = (BUFFER_SZ - self.rindex).min(len);
        out[..before_wrap].copy_from_slice(&self.storage[self.rindex..self.rindex + before_wrap]);
        let after_wrap = len - before_wrap;
        if after_wrap > 0 {
            out[before_wrap..].copy_from_slice(&self.storage[..after_wrap]);
        }
        self.rindex = (self.rindex + len) % BUFFER_SZ;
        self.size -= len;
        Ok(())
    }

    fn reset(&mut self) {
        self.rindex = 0;
        self.windex = 0;
        self.size = 0;
    }
}

pub struct RxBuffer {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner>>,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner::new())),
        }
    }

    /// Append `data`, failing without side effects when it does not fit.
    pub fn enqueue(&self, data: &[u8]) -> Result<()> {
        self.inner.lock(|inner| inner.borrow_mut().enqueue(data))
    }

    /// Copy the whole logical content into `out` in FIFO order without
    /// consuming it. `out` must hold [`BUFFER_SZ`] bytes.
    pub fn peek(&self, out: &mut [u8; BUFFER_SZ]) -> Result<usize> {
        self.inner.lock(|inner| inner.borrow().peek(out))
    }

    /// Copy exactly `out.len()` bytes and advance past them.
    pub fn dequeue(&self, out: &mut [u8]) -> Result<()> {
        self.inner.lock(|inner| inner.borrow_mut().dequeue(out))
    }

    /// Drop `len` bytes from the front.
    pub fn flush(&self, len: usize) -> Result<()> {
        self.inner.lock(|inner| inner.borrow_mut().flush(len))
    }

    pub fn reset(&self) {
        self.inner.lock(|inner| inner.borrow_mut().reset())
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}
