// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Software reference of the Sobel edge detector.
//!
//! Computes the same 3×3 gradient the accelerator implements, on the host.
//! Used to validate accelerator output, to back the emulated accelerator, and
//! as a CPU baseline when no FPGA is available.

use crate::error::{Error, Result};
use std::{
    fmt, fs,
    path::Path,
    time::{Duration, Instant},
};
use tracing::{debug, info};

const GX: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const GY: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

/// How the horizontal and vertical gradients are combined.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Magnitude {
    /// |Gx| + |Gy|, the approximation used by the hardware
    #[default]
    Manhattan,
    /// sqrt(Gx² + Gy²)
    Euclidean,
}

/// Applies the Sobel operator to a `columns × rows` 8-bit image.
///
/// Pixels outside the image take the value of the nearest edge pixel. The
/// magnitude is clamped to 255.
///
/// # Panics
///
/// Panics if `input` is shorter than `columns * rows`.
pub fn sobel(input: &[u8], columns: usize, rows: usize, magnitude: Magnitude) -> Vec<u8> {
    assert!(
        input.len() >= columns * rows,
        "image of {} bytes is smaller than {}x{}",
        input.len(),
        columns,
        rows
    );

    let pixel = |r: isize, c: isize| -> i32 {
        let r = r.clamp(0, rows as isize - 1) as usize;
        let c = c.clamp(0, columns as isize - 1) as usize;
        input[r * columns + c] as i32
    };

    let mut output = vec![0u8; columns * rows];
    for r in 0..rows {
        for c in 0..columns {
            let (mut sx, mut sy) = (0, 0);
            for (i, (gx, gy)) in GX.iter().zip(GY.iter()).enumerate() {
                for j in 0..3 {
                    let p = pixel(r as isize + i as isize - 1, c as isize + j as isize - 1);
                    sx += p * gx[j];
                    sy += p * gy[j];
                }
            }
            let value = match magnitude {
                Magnitude::Manhattan => sx.abs() + sy.abs(),
                Magnitude::Euclidean => (((sx * sx + sy * sy) as f64).sqrt() + 0.5) as i32,
            };
            output[r * columns + c] = value.min(255) as u8;
        }
    }
    output
}

/// Timings of a host-side run.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareReport {
    pub load: Duration,
    pub process: Duration,
    pub save: Duration,
}

impl SoftwareReport {
    pub fn total(&self) -> Duration {
        self.load + self.process + self.save
    }
}

impl fmt::Display for SoftwareReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "load: {:.2?} process: {:.2?} save: {:.2?} total: {:.2?}",
            self.load,
            self.process,
            self.save,
            self.total()
        )
    }
}

/// Runs the filter over a raw image file on the CPU.
///
/// # Errors
///
/// Returns [`Error::File`] if the input cannot be read or the output cannot
/// be written, and [`Error::InvalidConfig`] if the input is smaller than the
/// requested dimensions.
pub fn process_file(
    input: &Path,
    output: &Path,
    columns: usize,
    rows: usize,
    magnitude: Magnitude,
) -> Result<SoftwareReport> {
    let now = Instant::now();
    let image = fs::read(input).map_err(|source| Error::File {
        path: input.to_owned(),
        source,
    })?;
    let load = now.elapsed();

    if image.len() < columns * rows {
        return Err(Error::invalid_config(format!(
            "{} holds {} bytes, expected {}x{}",
            input.display(),
            image.len(),
            columns,
            rows
        )));
    }
    debug!("loaded {} bytes in {:?}", image.len(), load);

    let now = Instant::now();
    let edges = sobel(&image, columns, rows, magnitude);
    let process = now.elapsed();

    let now = Instant::now();
    fs::write(output, &edges).map_err(|source| Error::File {
        path: output.to_owned(),
        source,
    })?;
    let save = now.elapsed();

    info!("{:?} edges of {}x{} in {:?}", magnitude, columns, rows, process);

    Ok(SoftwareReport {
        load,
        process,
        save,
    })
}
