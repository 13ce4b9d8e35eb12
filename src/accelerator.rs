// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    error::{Error, Result},
    registers::{regs, Registers},
};
use std::fmt;
use tracing::{debug, info};

/// Statistics counters read from the accelerator after a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcceleratorStats {
    pub cycles: u32,
    pub bytes_in: u32,
    pub bytes_out: u32,
}

impl fmt::Display for AcceleratorStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "in: {} bytes out: {} bytes cycles: {}",
            self.bytes_in, self.bytes_out, self.cycles
        )
    }
}

/// Control interface of the Sobel edge detector core.
pub struct Accelerator<R> {
    regs: R,
}

impl<R: Registers> Accelerator<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    /// Resets and enables the core.
    ///
    /// The core is disabled first so a previous run that left it enabled
    /// starts from a clean state. The enable bit is read back to confirm the
    /// write reached the hardware.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnableFailed`] if the enable bit does not read back
    /// as set. The core is left disabled in that case.
    pub fn enable(&self) -> Result<Enabled<'_, R>> {
        self.regs.write32(regs::ENABLE, 0);
        self.regs.write32(regs::ENABLE, regs::enable::ENABLED);

        let readback = self.regs.read32(regs::ENABLE);
        if readback & regs::enable::ENABLED == 0 {
            self.disable();
            return Err(Error::EnableFailed { readback });
        }

        info!("accelerator enabled");
        Ok(Enabled { accelerator: self })
    }

    pub fn disable(&self) {
        self.regs.write32(regs::ENABLE, 0);
        debug!("accelerator disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.regs.read32(regs::ENABLE) & regs::enable::ENABLED != 0
    }

    pub fn stats(&self) -> AcceleratorStats {
        AcceleratorStats {
            cycles: self.regs.read32(regs::CLOCK_COUNT),
            bytes_in: self.regs.read32(regs::INPUT_COUNT),
            bytes_out: self.regs.read32(regs::OUTPUT_COUNT),
        }
    }
}

/// Guard returned by [`Accelerator::enable`]; disables the core when dropped.
pub struct Enabled<'a, R: Registers> {
    accelerator: &'a Accelerator<R>,
}

impl<R: Registers> Enabled<'_, R> {
    pub fn stats(&self) -> AcceleratorStats {
        self.accelerator.stats()
    }
}

impl<R: Registers> Drop for Enabled<'_, R> {
    fn drop(&mut self) {
        self.accelerator.disable();
    }
}
