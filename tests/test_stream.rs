// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_sobel::{
    accelerator::Accelerator,
    channel::{Channel, DmaProxyChannel, RX_CHANNEL, TX_CHANNEL},
    emulator::{Emulator, Kernel},
    orchestrator::{HardwareSetup, Orchestrator, RunReport, StreamConfig},
    registers::{regs, MemoryRegisters, RegisterPort, Registers},
    sobel::{sobel, Magnitude},
    worker::ShortTransferPolicy,
    ErrorKind,
};
use serial_test::serial;
use std::{error::Error, fs, path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn emulated(emulator: &Emulator, config: StreamConfig) -> Orchestrator<Arc<MemoryRegisters>> {
    Orchestrator::new(
        Accelerator::new(emulator.registers()),
        Box::new(emulator.tx_channel(config.slots)),
        Box::new(emulator.rx_channel(config.slots)),
        config,
    )
}

fn config(chunk_size: usize, total_size: usize) -> StreamConfig {
    StreamConfig {
        chunk_size,
        total_size,
        slots: 1,
        timeout: Some(Duration::from_secs(10)),
        short_transfer: ShortTransferPolicy::Accept,
    }
}

fn echo_run(dir: &Path, data: &[u8], config: StreamConfig) -> Result<RunReport, Box<dyn Error>> {
    let input = dir.join("input.raw");
    let output = dir.join("output.raw");
    fs::write(&input, data)?;

    let emulator = Emulator::new(Kernel::Echo).with_response_timeout(Duration::from_secs(1));
    let report = emulated(&emulator, config).run(&input, &output)?;
    assert_eq!(emulator.registers().read32(regs::ENABLE), 0);
    Ok(report)
}

#[test]
fn test_round_trip() -> Result<(), Box<dyn Error>> {
    let chunk = 4096;
    for total in [0, 1, chunk - 1, chunk, chunk + 1, 10 * chunk] {
        let dir = TempDir::new()?;
        let data = pattern(total);
        let report = echo_run(dir.path(), &data, config(chunk, total))?;

        assert!(report.is_success(), "size {total}: {report}");
        assert_eq!(report.tx.transferred, total);
        assert_eq!(report.rx.transferred, total);
        assert_eq!(fs::read(dir.path().join("output.raw"))?, data, "size {total}");
    }
    Ok(())
}

#[test]
fn test_single_chunk() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let report = echo_run(dir.path(), &pattern(4096), config(4096, 4096))?;

    assert!(report.is_success());
    assert_eq!(report.tx.chunks, 1);
    assert_eq!(report.rx.chunks, 1);
    assert_eq!(report.tx.transferred, 4096);
    assert_eq!(report.rx.transferred, 4096);
    Ok(())
}

#[test]
fn test_partial_final_chunk() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let report = echo_run(dir.path(), &pattern(10000), config(4096, 10000))?;

    assert!(report.is_success());
    assert_eq!(report.tx.chunks, 3);
    assert_eq!(report.rx.chunks, 3);
    assert_eq!(report.rx.transferred, 10000);

    let stats = report.stats.expect("stats are read on success");
    assert_eq!(stats.bytes_in, 10000);
    assert_eq!(stats.bytes_out, 10000);
    assert!(stats.cycles >= 10000);
    Ok(())
}

#[test]
fn test_multiple_slots() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let mut cfg = config(1024, 9000);
    cfg.slots = 2;
    let data = pattern(9000);
    let report = echo_run(dir.path(), &data, cfg)?;

    assert!(report.is_success());
    assert_eq!(report.tx.chunks, 9);
    assert_eq!(fs::read(dir.path().join("output.raw"))?, data);
    Ok(())
}

#[test]
fn test_short_input() -> Result<(), Box<dyn Error>> {
    // The producer stops early; the consumer then waits for output that
    // never comes and its slot completes with a timeout status.
    let dir = TempDir::new()?;
    let report = echo_run(dir.path(), &pattern(5000), config(4096, 10000))?;

    assert!(report.tx.is_success());
    assert_eq!(report.tx.transferred, 5000);
    assert!(!report.rx.is_success());
    assert_eq!(report.rx.error().unwrap().kind(), ErrorKind::HardwareStatus);
    assert_eq!(report.rx.transferred, 4096);
    assert!(!report.is_success());
    assert!(report.stats.is_none());
    Ok(())
}

#[test]
fn test_short_input_rejected() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let mut cfg = config(4096, 10000);
    cfg.short_transfer = ShortTransferPolicy::Reject;
    let report = echo_run(dir.path(), &pattern(5000), cfg)?;

    assert_eq!(report.tx.error().unwrap().kind(), ErrorKind::ShortTransfer);
    assert!(!report.is_success());
    Ok(())
}

#[test]
fn test_missing_input() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let emulator = Emulator::new(Kernel::Echo).with_response_timeout(Duration::from_millis(100));
    let report = emulated(&emulator, config(4096, 4096))
        .run(&dir.path().join("missing.raw"), &dir.path().join("output.raw"))?;

    assert_eq!(report.tx.error().unwrap().kind(), ErrorKind::Io);
    assert_eq!(report.tx.transferred, 0);
    assert!(!report.is_success());
    assert_eq!(emulator.registers().read32(regs::ENABLE), 0);
    Ok(())
}

#[test]
fn test_watchdog() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.raw");
    fs::write(&input, pattern(2048))?;

    // RX waits far longer than the run is allowed to take.
    let emulator = Emulator::new(Kernel::Echo).with_response_timeout(Duration::from_secs(5));
    let mut cfg = config(1024, 4096);
    cfg.timeout = Some(Duration::from_millis(100));
    let report = emulated(&emulator, cfg).run(&input, &dir.path().join("output.raw"))?;

    assert_eq!(report.rx.error().unwrap().kind(), ErrorKind::Timeout);
    assert!(report.tx.is_success());
    assert!(!report.is_success());
    assert_eq!(emulator.registers().read32(regs::ENABLE), 0);
    Ok(())
}

#[test]
fn test_invalid_chunk() -> Result<(), Box<dyn Error>> {
    let dir = TempDir::new()?;
    let emulator = Emulator::new(Kernel::Echo).with_slot_capacity(1024);
    let result = emulated(&emulator, config(4096, 4096))
        .run(&dir.path().join("input.raw"), &dir.path().join("output.raw"));

    match result {
        Err(e) => assert_eq!(e.kind(), ErrorKind::Config),
        Ok(report) => panic!("run should not start: {report}"),
    }
    assert!(!dir.path().join("output.raw").exists());
    Ok(())
}

#[test]
fn test_emulated_sobel() -> Result<(), Box<dyn Error>> {
    let (columns, rows) = (64, 48);
    let dir = TempDir::new()?;
    let input = dir.path().join("input.raw");
    let output = dir.path().join("output.raw");
    let image: Vec<u8> = (0..columns * rows)
        .map(|i| if (i % columns) < columns / 2 { 20 } else { 200 })
        .collect();
    fs::write(&input, &image)?;

    let emulator = Emulator::new(Kernel::Sobel {
        columns,
        rows,
        magnitude: Magnitude::Manhattan,
    });
    let report = emulated(&emulator, config(1024, columns * rows)).run(&input, &output)?;

    assert!(report.is_success(), "{report}");
    assert_eq!(
        fs::read(&output)?,
        sobel(&image, columns, rows, Magnitude::Manhattan)
    );
    let json = report.to_json();
    assert_eq!(json["success"], true);
    assert_eq!(json["stats"]["bytes_out"], columns * rows);
    Ok(())
}

#[test]
#[serial]
#[ignore = "hardware test is disabled by default (run with --include-ignored to enable)"]
fn test_registers() -> Result<(), Box<dyn Error>> {
    let port = RegisterPort::map(regs::DEFAULT_BASE, regs::DEFAULT_SIZE)?;
    port.write32(regs::ENABLE, 1);
    assert_eq!(port.read32(regs::ENABLE), 1);
    port.write32(regs::ENABLE, 0);
    assert_eq!(port.read32(regs::ENABLE), 0);
    Ok(())
}

#[test]
#[serial]
#[ignore = "hardware test is disabled by default (run with --include-ignored to enable)"]
fn test_channels() -> Result<(), Box<dyn Error>> {
    for name in [TX_CHANNEL, RX_CHANNEL] {
        let mut channel = DmaProxyChannel::open(name, 1)?;
        assert_eq!(channel.slot_count(), 1);
        channel.set_length(0, 64);
        assert_eq!(channel.length(0), 64);
        println!("{:?} status {}", channel, channel.status(0));
    }
    Ok(())
}

#[test]
#[serial]
#[ignore = "hardware test is disabled by default (run with --include-ignored to enable)"]
fn test_hardware_stream() -> Result<(), Box<dyn Error>> {
    let (columns, rows) = (512, 512);
    let dir = TempDir::new()?;
    let input = dir.path().join("input.raw");
    let output = dir.path().join("output.raw");
    fs::write(&input, pattern(columns * rows))?;

    let mut cfg = StreamConfig::for_image(columns, rows);
    cfg.timeout = Some(Duration::from_secs(10));
    let report = Orchestrator::open(&HardwareSetup::default(), cfg)?.run(&input, &output)?;
    println!("{report}");

    assert!(report.is_success());
    assert_eq!(fs::metadata(&output)?.len() as usize, columns * rows);
    assert_eq!(report.tx.chunks, 64);
    let stats = report.stats.unwrap();
    assert_eq!(stats.bytes_in as usize, columns * rows);
    assert_eq!(stats.bytes_out as usize, columns * rows);
    assert!(stats.cycles > 0);
    Ok(())
}
