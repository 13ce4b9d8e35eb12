// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use args::Args;
use clap::Parser;
use edgefirst_sobel::{
    accelerator::Accelerator,
    emulator::Emulator,
    orchestrator::{HardwareSetup, Orchestrator, RunReport, StreamConfig},
    sobel,
};
use std::{error::Error, fs, process::ExitCode};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod args;

fn init_tracing(args: &Args) {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(level);

    let journald = tracing_journald::layer()
        .ok()
        .map(|layer| layer.with_filter(level));

    let tracy = if args.tracy {
        let _ = tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default().with_filter(level))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(journald)
        .with(tracy)
        .init();
}

/// Confirms the input can be read and warns when it is smaller than the
/// image, which would end the TX stream early.
fn check_input(args: &Args) -> Result<(), Box<dyn Error>> {
    let meta = fs::metadata(&args.input)
        .map_err(|e| format!("cannot read {}: {}", args.input.display(), e))?;
    if (meta.len() as usize) < args.total_size() {
        warn!(
            "{} holds {} bytes but {}x{} needs {}",
            args.input.display(),
            meta.len(),
            args.columns,
            args.rows,
            args.total_size()
        );
    }
    Ok(())
}

fn print_report(report: &RunReport, args: &Args) {
    if args.json {
        println!("{}", report.to_json());
        return;
    }

    if report.is_success() {
        println!("[INFO] The processed image is stored at : {}", args.output.display());
    }
    println!("----------------------------------------");
    println!("{report}");
    println!("----------------------------------------");
}

fn run(args: &Args) -> Result<bool, Box<dyn Error>> {
    check_input(args)?;

    if args.software {
        let report = sobel::process_file(
            &args.input,
            &args.output,
            args.columns as usize,
            args.rows as usize,
            args.magnitude,
        )?;
        println!("{:?} software edge detection {}", args.magnitude, report);
        return Ok(true);
    }

    let config = StreamConfig::try_from(args)?;

    let report = if args.emulate {
        info!("using the emulated accelerator");
        let emulator = Emulator::new(args.kernel());
        Orchestrator::new(
            Accelerator::new(emulator.registers()),
            Box::new(emulator.tx_channel(config.slots)),
            Box::new(emulator.rx_channel(config.slots)),
            config,
        )
        .run(&args.input, &args.output)?
    } else {
        Orchestrator::open(&HardwareSetup::from(args), config)?.run(&args.input, &args.output)?
    };

    print_report(&report, args);
    Ok(report.is_success())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    println!("Sobel Edge Detector SoC-FPGA {}", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("exiting with failure");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
