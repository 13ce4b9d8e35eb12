// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the DMA streaming pipeline.

use crate::channel::SlotStatus;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Result type alias for streaming operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], used to decide how a failure is
/// reported and which part of a run it affects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Device or register setup failed; nothing was started.
    Setup,
    /// The blocking submit call itself failed.
    Submit,
    /// A completed slot carried a status other than `NoError`.
    HardwareStatus,
    /// A worker did not report before the watchdog expired.
    Timeout,
    /// A worker thread died without reporting.
    Worker,
    /// Fewer bytes than the job total were moved and the policy rejects it.
    ShortTransfer,
    /// Host file I/O failed.
    Io,
    /// The requested transfer configuration is invalid.
    Config,
}

/// Errors that can occur while streaming through the accelerator.
#[derive(Debug, Error)]
pub enum Error {
    /// The DMA proxy device could not be opened.
    #[error("DMA channel {name} unavailable: {source}")]
    ChannelUnavailable { name: String, source: io::Error },

    /// The shared slot region of a channel could not be mapped.
    #[error("failed to map buffers of DMA channel {name}: {source}")]
    MappingFailed { name: String, source: io::Error },

    /// The accelerator register window could not be mapped.
    #[error("failed to map registers at {base:#x}: {source}")]
    RegisterMap { base: u64, source: io::Error },

    /// The enable bit did not read back as set.
    #[error("accelerator enable register reads back {readback:#x}")]
    EnableFailed { readback: u32 },

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} worker: {source}")]
    Spawn { name: String, source: io::Error },

    /// The blocking submit request was rejected by the kernel.
    #[error("{channel}: submit of chunk {chunk} failed: {source}")]
    Submit {
        channel: String,
        chunk: usize,
        source: io::Error,
    },

    /// The hardware completed a slot with an error status.
    #[error("{channel}: chunk {chunk} completed with status {status}")]
    HardwareStatus {
        channel: String,
        chunk: usize,
        status: SlotStatus,
    },

    /// The worker did not finish within the configured timeout.
    #[error("{channel}: no completion within {}ms", timeout.as_millis())]
    SubmitTimeout { channel: String, timeout: Duration },

    /// The worker exited without reporting, usually after a panic.
    #[error("{channel}: worker exited without reporting")]
    WorkerLost { channel: String },

    /// The stream ended before the expected number of bytes were moved.
    #[error("{channel}: transferred {actual} of {expected} bytes")]
    ShortTransfer {
        channel: String,
        expected: usize,
        actual: usize,
    },

    /// A host file could not be opened or created.
    #[error("{}: {source}", path.display())]
    File { path: PathBuf, source: io::Error },

    /// The transfer configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ChannelUnavailable { .. }
            | Error::MappingFailed { .. }
            | Error::RegisterMap { .. }
            | Error::EnableFailed { .. }
            | Error::Spawn { .. } => ErrorKind::Setup,
            Error::Submit { .. } => ErrorKind::Submit,
            Error::HardwareStatus { .. } => ErrorKind::HardwareStatus,
            Error::SubmitTimeout { .. } => ErrorKind::Timeout,
            Error::WorkerLost { .. } => ErrorKind::Worker,
            Error::ShortTransfer { .. } => ErrorKind::ShortTransfer,
            Error::File { .. } => ErrorKind::Io,
            Error::InvalidConfig(_) => ErrorKind::Config,
        }
    }
}
