// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Access to the accelerator's AXI-Lite control and status registers.

use crate::error::{Error, Result};
use std::{
    ffi::c_void,
    fs::OpenOptions,
    io,
    os::unix::{fs::OpenOptionsExt, io::AsRawFd},
    ptr::null_mut,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

/// Register map of the Sobel edge detector IP core.
pub mod regs {
    /// Physical base address of the register window.
    pub const DEFAULT_BASE: u64 = 0x43c0_0000;
    /// Size of the register window in bytes.
    pub const DEFAULT_SIZE: usize = 4 * 1024;

    /// Enable register, bit 0 gates the core.
    pub const ENABLE: usize = 0x00;
    /// Clock cycles counted while the core is enabled.
    pub const CLOCK_COUNT: usize = 0x04;
    /// Bytes consumed from the TX stream.
    pub const INPUT_COUNT: usize = 0x08;
    /// Bytes produced on the RX stream.
    pub const OUTPUT_COUNT: usize = 0x0c;

    /// Enable register bit definitions
    pub mod enable {
        pub const ENABLED: u32 = 1 << 0;
    }
}

/// 32-bit register access by byte offset.
///
/// Every call is a distinct hardware-visible access; implementations must not
/// cache or batch. Offsets must be 4-byte aligned and inside the window.
pub trait Registers: Send + Sync {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
}

impl<R: Registers + ?Sized> Registers for Arc<R> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

fn check_offset(offset: usize, size: usize) {
    assert!(offset % 4 == 0, "register offset {offset:#x} is not aligned");
    assert!(
        offset + 4 <= size,
        "register offset {offset:#x} out of bounds ({size:#x})"
    );
}

/// Register window mapped from `/dev/mem`.
pub struct RegisterPort {
    ptr: *mut u8,
    size: usize,
    base: u64,
    page_offset: usize,
}

// SAFETY: the mapping is process-wide and all accesses are volatile reads or
// writes of naturally aligned words, so moving or sharing the handle across
// threads cannot tear or invalidate it.
unsafe impl Send for RegisterPort {}
unsafe impl Sync for RegisterPort {}

impl std::fmt::Debug for RegisterPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterPort")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &self.size)
            .field("ptr", &format_args!("{:p}", self.ptr))
            .finish()
    }
}

impl RegisterPort {
    /// Maps `size` bytes of physical memory starting at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegisterMap`] if `/dev/mem` cannot be opened (usually
    /// insufficient permissions) or the window cannot be mapped.
    pub fn map(base: u64, size: usize) -> Result<Self> {
        let map_err = |source| Error::RegisterMap { base, source };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open("/dev/mem")
            .map_err(map_err)?;

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let page_offset = (base % page_size) as usize;
        let map_base = base - page_offset as u64;
        let map_size = size + page_offset;

        // SAFETY: the descriptor is valid for the duration of the call and
        // the result is checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                map_base as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(map_err(io::Error::last_os_error()));
        }

        info!("mapped registers {:#x} size {:#x} at {:p}", base, size, ptr);

        Ok(Self {
            // SAFETY: page_offset is smaller than the mapping.
            ptr: unsafe { ptr.cast::<u8>().add(page_offset) },
            size,
            base,
            page_offset,
        })
    }
}

impl Registers for RegisterPort {
    fn read32(&self, offset: usize) -> u32 {
        check_offset(offset, self.size);
        // SAFETY: offset is aligned and within the mapped window.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    fn write32(&self, offset: usize, value: u32) {
        check_offset(offset, self.size);
        // SAFETY: offset is aligned and within the mapped window.
        unsafe { std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value) }
    }
}

impl Drop for RegisterPort {
    fn drop(&mut self) {
        let ptr = unsafe { self.ptr.sub(self.page_offset) };
        if unsafe { libc::munmap(ptr.cast::<c_void>(), self.size + self.page_offset) } != 0 {
            warn!("unmap of registers {:#x} failed!", self.base);
        }
        debug!("registers {:#x} unmapped", self.base);
    }
}

/// Register file held in ordinary memory.
///
/// Behaves like a window of plain read/write registers, which makes it the
/// backing store of the emulated accelerator and a convenient stand-in for
/// [`RegisterPort`] in tests.
#[derive(Debug)]
pub struct MemoryRegisters {
    words: Vec<AtomicU32>,
}

impl MemoryRegisters {
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size / 4).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.words.len() * 4
    }

    /// Adds `value` to the register at `offset`, wrapping like a hardware
    /// counter.
    pub fn add32(&self, offset: usize, value: u32) {
        check_offset(offset, self.size());
        self.words[offset / 4].fetch_add(value, Ordering::SeqCst);
    }
}

impl Default for MemoryRegisters {
    fn default() -> Self {
        Self::new(regs::DEFAULT_SIZE)
    }
}

impl Registers for MemoryRegisters {
    fn read32(&self, offset: usize) -> u32 {
        check_offset(offset, self.size());
        self.words[offset / 4].load(Ordering::SeqCst)
    }

    fn write32(&self, offset: usize, value: u32) {
        check_offset(offset, self.size());
        self.words[offset / 4].store(value, Ordering::SeqCst)
    }
}
