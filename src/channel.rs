// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! DMA transfer channels.
//!
//! A channel is one direction of DMA traffic. It owns a set of fixed-size
//! slots shared with the kernel; each slot carries a data area plus a
//! `length` and a `status` field. Handing a slot to the hardware is done with
//! [`Channel::submit`], which blocks until the hardware hands it back.
//!
//! While a submit is outstanding the hardware owns the slot. Because
//! [`Channel::submit`] takes `&mut self` and blocks, the borrow checker keeps
//! the host from touching any slot of the channel until it returns.

use crate::error::{Error, Result};
use dma_proxy_sys::{ChannelBuffer, BUFFER_SIZE};
use std::{
    ffi::c_void,
    fmt,
    fs::{File, OpenOptions},
    io,
    mem::size_of,
    os::unix::io::AsRawFd,
    path::Path,
    ptr::{addr_of, addr_of_mut, null_mut, NonNull},
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, info, warn};

/// Name of the host to accelerator channel device.
pub const TX_CHANNEL: &str = "dma_proxy_tx_0";

/// Name of the accelerator to host channel device.
pub const RX_CHANNEL: &str = "dma_proxy_rx_0";

/// Capacity of a single slot in bytes.
pub const SLOT_CAPACITY: usize = BUFFER_SIZE;

/// Completion status the kernel writes into a slot after a submit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    NoError,
    Busy,
    Timeout,
    Error,
    /// A value outside the kernel ABI.
    Unknown(u32),
}

impl From<u32> for SlotStatus {
    fn from(value: u32) -> Self {
        match value {
            dma_proxy_sys::PROXY_NO_ERROR => SlotStatus::NoError,
            dma_proxy_sys::PROXY_BUSY => SlotStatus::Busy,
            dma_proxy_sys::PROXY_TIMEOUT => SlotStatus::Timeout,
            dma_proxy_sys::PROXY_ERROR => SlotStatus::Error,
            other => SlotStatus::Unknown(other),
        }
    }
}

impl From<SlotStatus> for u32 {
    fn from(status: SlotStatus) -> Self {
        match status {
            SlotStatus::NoError => dma_proxy_sys::PROXY_NO_ERROR,
            SlotStatus::Busy => dma_proxy_sys::PROXY_BUSY,
            SlotStatus::Timeout => dma_proxy_sys::PROXY_TIMEOUT,
            SlotStatus::Error => dma_proxy_sys::PROXY_ERROR,
            SlotStatus::Unknown(v) => v,
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SlotStatus::NoError => write!(f, "ok"),
            SlotStatus::Busy => write!(f, "busy"),
            SlotStatus::Timeout => write!(f, "timeout"),
            SlotStatus::Error => write!(f, "error"),
            SlotStatus::Unknown(v) => write!(f, "unknown ({v})"),
        }
    }
}

/// One direction of DMA traffic.
///
/// Slot indices passed to any method must be below [`Channel::slot_count`].
pub trait Channel: Send {
    fn name(&self) -> &str;

    fn slot_count(&self) -> usize;

    fn slot_capacity(&self) -> usize;

    fn buffer(&self, slot: usize) -> &[u8];

    fn buffer_mut(&mut self, slot: usize) -> &mut [u8];

    fn length(&self, slot: usize) -> u32;

    fn set_length(&mut self, slot: usize, length: u32);

    fn status(&self, slot: usize) -> SlotStatus;

    /// Hands the slot to the hardware and blocks until the transfer
    /// completes. An `Err` means the request itself was rejected; a
    /// completed transfer reports its outcome through [`Channel::status`].
    fn submit(&mut self, slot: usize) -> io::Result<()>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn slot_count(&self) -> usize {
        (**self).slot_count()
    }

    fn slot_capacity(&self) -> usize {
        (**self).slot_capacity()
    }

    fn buffer(&self, slot: usize) -> &[u8] {
        (**self).buffer(slot)
    }

    fn buffer_mut(&mut self, slot: usize) -> &mut [u8] {
        (**self).buffer_mut(slot)
    }

    fn length(&self, slot: usize) -> u32 {
        (**self).length(slot)
    }

    fn set_length(&mut self, slot: usize, length: u32) {
        (**self).set_length(slot, length)
    }

    fn status(&self, slot: usize) -> SlotStatus {
        (**self).status(slot)
    }

    fn submit(&mut self, slot: usize) -> io::Result<()> {
        (**self).submit(slot)
    }
}

/// Round-robin slot selection.
///
/// With a single slot every chunk reuses slot 0, which strictly serializes
/// fill, submit and check. More slots only change which slot the next chunk
/// lands in; overlapping submits would build on this.
#[derive(Debug, Clone)]
pub struct SlotRing {
    count: usize,
    next: usize,
}

impl SlotRing {
    pub fn new(count: usize) -> Self {
        Self {
            count: count.max(1),
            next: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns the slot for the next chunk and advances the ring.
    pub fn next_slot(&mut self) -> usize {
        let slot = self.next;
        self.next = (self.next + 1) % self.count;
        slot
    }
}

/// Channel backed by the `dma-proxy` kernel module.
pub struct DmaProxyChannel {
    name: String,
    file: File,
    buffers: NonNull<ChannelBuffer>,
    count: usize,
}

// SAFETY: the mapped buffers belong to this handle alone and every access
// goes through &self or &mut self, so the usual borrow rules keep host-side
// access exclusive when the handle moves to a worker thread.
unsafe impl Send for DmaProxyChannel {}

impl fmt::Debug for DmaProxyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaProxyChannel")
            .field("name", &self.name)
            .field("fd", &self.file.as_raw_fd())
            .field("buffers", &self.buffers)
            .field("count", &self.count)
            .finish()
    }
}

impl DmaProxyChannel {
    /// Opens `/dev/<name>` and maps `slots` channel buffers from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelUnavailable`] if the device cannot be opened
    /// (module not loaded, insufficient permissions) and
    /// [`Error::MappingFailed`] if the buffers cannot be mapped.
    pub fn open(name: &str, slots: usize) -> Result<Self> {
        let path = Path::new("/dev").join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| Error::ChannelUnavailable {
                name: name.to_owned(),
                source,
            })?;

        let count = slots.max(1);
        // SAFETY: the descriptor is valid for the duration of the call and
        // the result is checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                count * size_of::<ChannelBuffer>(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::MappingFailed {
                name: name.to_owned(),
                source: io::Error::last_os_error(),
            });
        }
        let buffers = NonNull::new(ptr.cast::<ChannelBuffer>()).ok_or_else(|| {
            Error::MappingFailed {
                name: name.to_owned(),
                source: io::Error::other("mmap returned null"),
            }
        })?;

        info!("opened {} with {} slots at {:p}", path.display(), count, ptr);

        Ok(Self {
            name: name.to_owned(),
            file,
            buffers,
            count,
        })
    }

    fn slot(&self, slot: usize) -> *mut ChannelBuffer {
        assert!(
            slot < self.count,
            "{}: slot {slot} out of range ({} slots)",
            self.name,
            self.count
        );
        // SAFETY: slot is inside the mapped array.
        unsafe { self.buffers.as_ptr().add(slot) }
    }
}

impl Channel for DmaProxyChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn slot_count(&self) -> usize {
        self.count
    }

    fn slot_capacity(&self) -> usize {
        SLOT_CAPACITY
    }

    fn buffer(&self, slot: usize) -> &[u8] {
        let buf = self.slot(slot);
        // SAFETY: the data area is BUFFER_SIZE bytes and no submit is
        // outstanding while &self is held.
        unsafe { from_raw_parts(addr_of!((*buf).buffer).cast::<u8>(), BUFFER_SIZE) }
    }

    fn buffer_mut(&mut self, slot: usize) -> &mut [u8] {
        let buf = self.slot(slot);
        // SAFETY: as above, with exclusive access through &mut self.
        unsafe { from_raw_parts_mut(addr_of_mut!((*buf).buffer).cast::<u8>(), BUFFER_SIZE) }
    }

    fn length(&self, slot: usize) -> u32 {
        let buf = self.slot(slot);
        // SAFETY: the kernel writes this field, volatile keeps each read.
        unsafe { addr_of!((*buf).length).read_volatile() }
    }

    fn set_length(&mut self, slot: usize, length: u32) {
        let buf = self.slot(slot);
        // SAFETY: the field lies within the mapped slot.
        unsafe { addr_of_mut!((*buf).length).write_volatile(length) }
    }

    fn status(&self, slot: usize) -> SlotStatus {
        let buf = self.slot(slot);
        // SAFETY: the kernel writes this field, volatile keeps each read.
        SlotStatus::from(unsafe { addr_of!((*buf).status).read_volatile() })
    }

    fn submit(&mut self, slot: usize) -> io::Result<()> {
        let _ = self.slot(slot);
        let id = slot as i32;
        // SAFETY: the kernel reads a single i32 buffer index through the
        // pointer and the call blocks until the transfer completes.
        unsafe { dma_proxy_sys::xfer(self.file.as_raw_fd(), &id) }?;
        Ok(())
    }
}

impl Drop for DmaProxyChannel {
    fn drop(&mut self) {
        let len = self.count * size_of::<ChannelBuffer>();
        if unsafe { libc::munmap(self.buffers.as_ptr().cast::<c_void>(), len) } != 0 {
            warn!("{}: unmap failed!", self.name);
        }
        debug!("{} closed", self.name);
    }
}
