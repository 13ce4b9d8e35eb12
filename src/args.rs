// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_sobel::{
    channel::{RX_CHANNEL, TX_CHANNEL},
    emulator::Kernel,
    orchestrator::{HardwareSetup, StreamConfig},
    registers::regs,
    sobel::Magnitude,
    worker::{ShortTransferPolicy, DEFAULT_CHUNK_SIZE},
    Error,
};
use std::{num::ParseIntError, path::PathBuf, time::Duration};

fn parse_address(value: &str) -> Result<u64, ParseIntError> {
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.parse(),
    }
}

/// Command-line arguments for the Sobel DMA streamer.
///
/// The positional arguments describe the image; everything else has defaults
/// matching the reference bitstream and can also be set through environment
/// variables.
///
/// # Example
///
/// ```bash
/// # Stream a 512x512 image through the accelerator
/// edgefirst-sobel lena_512_512.raw edges.raw 512 512
///
/// # Same pipeline without an FPGA
/// EMULATE=true edgefirst-sobel lena_512_512.raw edges.raw 512 512
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the 8-bit grayscale raw input image
    pub input: PathBuf,

    /// Path to the 8-bit grayscale raw output image
    pub output: PathBuf,

    /// Horizontal image dimension in pixels
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub columns: u32,

    /// Vertical image dimension in pixels
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    pub rows: u32,

    /// Bytes per DMA transfer (the AXI DMA core expects a power of two)
    #[arg(long, env = "CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Number of channel buffers cycled per direction
    #[arg(long, env = "SLOTS", default_value = "1")]
    pub slots: usize,

    /// DMA proxy device for host to accelerator transfers
    #[arg(long, env = "TX_CHANNEL", default_value = TX_CHANNEL)]
    pub tx_channel: String,

    /// DMA proxy device for accelerator to host transfers
    #[arg(long, env = "RX_CHANNEL", default_value = RX_CHANNEL)]
    pub rx_channel: String,

    /// Physical base address of the accelerator registers
    #[arg(long, env = "REG_BASE", default_value = "0x43c00000", value_parser = parse_address)]
    pub reg_base: u64,

    /// Size of the accelerator register window in bytes
    #[arg(long, env = "REG_SIZE", default_value_t = regs::DEFAULT_SIZE)]
    pub reg_size: usize,

    /// Give up on a transfer direction after this many milliseconds
    #[arg(long, env = "TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Fail when the input or output stream ends before the full image
    #[arg(long, env = "STRICT")]
    pub strict: bool,

    /// Run against the emulated accelerator instead of the FPGA
    #[arg(long, env = "EMULATE", conflicts_with = "software")]
    pub emulate: bool,

    /// Run the edge detector on the CPU without any DMA
    #[arg(long, env = "SOFTWARE")]
    pub software: bool,

    /// Gradient magnitude used by the software and emulated paths
    #[arg(long, env = "MAGNITUDE", default_value = "manhattan", value_enum)]
    pub magnitude: Magnitude,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    pub fn total_size(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn kernel(&self) -> Kernel {
        Kernel::Sobel {
            columns: self.columns as usize,
            rows: self.rows as usize,
            magnitude: self.magnitude,
        }
    }
}

impl TryFrom<&Args> for StreamConfig {
    type Error = Error;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        let config = StreamConfig {
            chunk_size: args.chunk_size,
            total_size: args.total_size(),
            slots: args.slots,
            timeout: args.timeout_ms.map(Duration::from_millis),
            short_transfer: if args.strict {
                ShortTransferPolicy::Reject
            } else {
                ShortTransferPolicy::Accept
            },
        };
        if config.chunk_size == 0 {
            return Err(Error::invalid_config("chunk size must be greater than zero"));
        }
        if config.slots == 0 {
            return Err(Error::invalid_config("at least one slot is required"));
        }
        Ok(config)
    }
}

impl From<&Args> for HardwareSetup {
    fn from(args: &Args) -> Self {
        HardwareSetup {
            tx_channel: args.tx_channel.clone(),
            rx_channel: args.rx_channel.clone(),
            register_base: args.reg_base,
            register_size: args.reg_size,
        }
    }
}
