// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Sobel Streamer Library
//!
//! This library streams raw 8-bit grayscale images through the Sobel edge
//! detector implemented in the programmable logic of a Zynq SoC. Image data
//! travels over two AXI DMA channels exposed by the Xilinx `dma-proxy` kernel
//! module, while the core itself is controlled through its AXI-Lite register
//! window.
//!
//! ## Features
//!
//! - **DMA Streaming**: Chunked host to accelerator and accelerator to host
//!   transfers on two concurrent worker threads, with per-chunk hardware
//!   status checks.
//! - **Register Access**: Volatile 32-bit access to the core's control and
//!   statistics registers mapped from `/dev/mem`.
//! - **Emulation**: A software accelerator behind the same channel interface
//!   for development without an FPGA.
//! - **Software Reference**: A CPU implementation of the edge detector for
//!   validation and baseline timing.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_sobel::orchestrator::{HardwareSetup, Orchestrator, StreamConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::for_image(512, 512);
//! let orchestrator = Orchestrator::open(&HardwareSetup::default(), config)?;
//!
//! let report = orchestrator.run(Path::new("lena.raw"), Path::new("edges.raw"))?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Requirements
//!
//! - **Linux**: Zynq-7000 or Zynq UltraScale+ with the `dma-proxy` module
//!   loaded and the Sobel bitstream programmed.
//! - **Permissions**: Access to `/dev/mem` and the `/dev/dma_proxy_*`
//!   devices, usually root.
//!
//! ## Safety
//!
//! This library uses `unsafe` code for `mmap`, volatile register access and
//! the DMA proxy ioctls. All unsafe operations are isolated to the
//! [`registers`] and [`channel`] modules and wrapped with safe APIs.

pub mod accelerator;
pub mod channel;
pub mod emulator;
pub mod error;
pub mod orchestrator;
pub mod registers;
pub mod sobel;
pub mod worker;

pub use error::{Error, ErrorKind, Result};
