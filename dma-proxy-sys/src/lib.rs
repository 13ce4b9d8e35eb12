// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Low-level bindings for the Xilinx `dma-proxy` kernel module.
//!
//! The module exposes each AXI DMA channel as a character device
//! (`/dev/dma_proxy_tx_0`, `/dev/dma_proxy_rx_0`, ...). User space maps an
//! array of [`ChannelBuffer`] from the device and hands a buffer to the DMA
//! engine with the [`xfer`] ioctl, passing the buffer index.

use std::mem::size_of;

/// Capacity of the data area of one channel buffer in bytes.
pub const BUFFER_SIZE: usize = 128 * 1024;

/// Number of buffers the kernel module allocates per channel.
pub const BUFFER_COUNT: usize = 1;

/// Transfer completed successfully.
pub const PROXY_NO_ERROR: u32 = 0;
/// DMA engine still owns the buffer.
pub const PROXY_BUSY: u32 = 1;
/// The kernel gave up waiting for the DMA completion.
pub const PROXY_TIMEOUT: u32 = 2;
/// The DMA engine reported an error.
pub const PROXY_ERROR: u32 = 3;

/// Shared buffer layout, identical to `struct channel_buffer` in
/// `dma-proxy.h`. The status and length fields trail the data area and are
/// written by the kernel once a transfer completes.
#[repr(C, align(1024))]
pub struct ChannelBuffer {
    pub buffer: [u32; BUFFER_SIZE / size_of::<u32>()],
    pub status: u32,
    pub length: u32,
}

nix::ioctl_write_ptr_bad!(
    /// Finish a transfer previously started with [`start_xfer`].
    finish_xfer,
    nix::request_code_write!(b'a', b'a', size_of::<*const i32>()),
    i32
);

nix::ioctl_write_ptr_bad!(
    /// Start a transfer on the given buffer without waiting for completion.
    start_xfer,
    nix::request_code_write!(b'a', b'b', size_of::<*const i32>()),
    i32
);

nix::ioctl_write_ptr_bad!(
    /// Start a transfer on the given buffer and block until it completes.
    xfer,
    nix::request_code_write!(b'a', b'c', size_of::<*const i32>()),
    i32
);
