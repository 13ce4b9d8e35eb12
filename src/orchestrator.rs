// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sequencing of a complete accelerator run.
//!
//! The [`Orchestrator`] owns the register port and both channels. A run
//! enables the accelerator, streams the input image through the TX channel on
//! one thread while a second thread drains the RX channel into the output
//! file, then collects both outcomes and the accelerator's counters. The
//! accelerator is disabled on every exit path once it was enabled.

use crate::{
    accelerator::{Accelerator, AcceleratorStats},
    channel::{Channel, DmaProxyChannel, RX_CHANNEL, TX_CHANNEL},
    error::{Error, Result},
    registers::{regs, RegisterPort, Registers},
    worker::{
        Consumer, Direction, JobReport, Producer, ShortTransferPolicy, TransferJob,
        DEFAULT_CHUNK_SIZE,
    },
};
use serde_json::json;
use std::{
    fmt,
    path::Path,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

/// Transfer parameters shared by both directions.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Bytes per submit.
    pub chunk_size: usize,
    /// Bytes to move in each direction.
    pub total_size: usize,
    /// Channel slots cycled per direction.
    pub slots: usize,
    /// Stop waiting for a worker after this long.
    pub timeout: Option<Duration>,
    pub short_transfer: ShortTransferPolicy,
}

impl StreamConfig {
    /// Configuration for a `columns × rows` 8-bit image.
    pub fn for_image(columns: usize, rows: usize) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            total_size: columns * rows,
            slots: 1,
            timeout: None,
            short_transfer: ShortTransferPolicy::default(),
        }
    }

    /// Checks the configuration against the slot capacity of the channels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the chunk size is zero or does not
    /// fit a slot, or if no slot is configured.
    pub fn validate(&self, slot_capacity: usize) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::invalid_config("chunk size must be greater than zero"));
        }
        if self.chunk_size > slot_capacity {
            return Err(Error::invalid_config(format!(
                "chunk size {} exceeds slot capacity {}",
                self.chunk_size, slot_capacity
            )));
        }
        if self.slots == 0 {
            return Err(Error::invalid_config("at least one slot is required"));
        }
        if !self.chunk_size.is_power_of_two() {
            warn!(
                "chunk size {} is not a power of two, the AXI DMA core may reject it",
                self.chunk_size
            );
        }
        Ok(())
    }

    fn job(&self, path: &Path) -> TransferJob {
        TransferJob::new(path, self.chunk_size, self.total_size)
            .with_slots(self.slots)
            .with_short_transfer(self.short_transfer)
    }
}

/// Where the hardware lives.
#[derive(Clone, Debug)]
pub struct HardwareSetup {
    pub tx_channel: String,
    pub rx_channel: String,
    pub register_base: u64,
    pub register_size: usize,
}

impl Default for HardwareSetup {
    fn default() -> Self {
        Self {
            tx_channel: TX_CHANNEL.to_owned(),
            rx_channel: RX_CHANNEL.to_owned(),
            register_base: regs::DEFAULT_BASE,
            register_size: regs::DEFAULT_SIZE,
        }
    }
}

/// Outcome of a run.
#[derive(Debug)]
pub struct RunReport {
    pub tx: JobReport,
    pub rx: JobReport,
    pub elapsed: Duration,
    /// Accelerator counters, read only when both directions succeeded.
    pub stats: Option<AcceleratorStats>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.tx.is_success() && self.rx.is_success()
    }

    /// Software-measured throughput of the output stream in bits per second.
    pub fn throughput_bps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.rx.transferred as f64 * 8.0 / secs
    }

    pub fn to_json(&self) -> serde_json::Value {
        let job = |report: &JobReport| {
            json!({
                "channel": report.channel,
                "transferred": report.transferred,
                "chunks": report.chunks,
                "error": report.error().map(|e| e.to_string()),
            })
        };
        json!({
            "success": self.is_success(),
            "elapsed_ms": self.elapsed.as_secs_f64() * 1000.0,
            "throughput_bps": self.throughput_bps(),
            "tx": job(&self.tx),
            "rx": job(&self.rx),
            "stats": self.stats.map(|s| json!({
                "bytes_in": s.bytes_in,
                "bytes_out": s.bytes_out,
                "cycles": s.cycles,
            })),
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if !self.is_success() {
            for report in [&self.tx, &self.rx] {
                if let Some(e) = report.error() {
                    writeln!(f, "{}: {}", report.direction, e)?;
                }
            }
            return write!(f, "transfer failed");
        }

        writeln!(
            f,
            "Processing Time (Measured in Software) : {:.2} ms",
            self.elapsed.as_secs_f64() * 1000.0
        )?;
        writeln!(
            f,
            "Total throughput (Measured in Software): {:.2} bps",
            self.throughput_bps()
        )?;
        if let Some(stats) = self.stats {
            writeln!(f, "Number of bytes read (Core stats)      : {} bytes", stats.bytes_in)?;
            writeln!(f, "Number of bytes written (Core stats)   : {} bytes", stats.bytes_out)?;
            write!(f, "Number of clock cycles (Core stats)    : {} cc", stats.cycles)?;
        }
        Ok(())
    }
}

/// A spawned worker and the receiving end of its one-shot report channel.
struct Worker {
    name: String,
    direction: Direction,
    handle: JoinHandle<()>,
    report: kanal::Receiver<JobReport>,
}

impl Worker {
    fn spawn<F>(thread_name: &str, channel: &str, direction: Direction, job: F) -> Result<Self>
    where
        F: FnOnce() -> JobReport + Send + 'static,
    {
        let (tx, rx) = kanal::bounded(1);
        let handle = thread::Builder::new()
            .name(thread_name.to_owned())
            .spawn(move || {
                if tx.send(job()).is_err() {
                    debug!("report receiver dropped");
                }
            })
            .map_err(|source| Error::Spawn {
                name: thread_name.to_owned(),
                source,
            })?;

        Ok(Self {
            name: channel.to_owned(),
            direction,
            handle,
            report: rx,
        })
    }

    /// Waits for the report, up to `deadline` if one is set. A worker that
    /// misses the deadline is detached.
    fn wait(self, deadline: Option<(Instant, Duration)>) -> JobReport {
        let received = match deadline {
            None => self.report.recv().ok(),
            Some((at, timeout)) => {
                let left = at.saturating_duration_since(Instant::now());
                match self.report.recv_timeout(left) {
                    Ok(report) => Some(report),
                    Err(_) if Instant::now() >= at => {
                        let err = Error::SubmitTimeout {
                            channel: self.name.clone(),
                            timeout,
                        };
                        warn!("{} worker still blocked, detaching", self.name);
                        return JobReport::failed(&self.name, self.direction, err);
                    }
                    Err(_) => None,
                }
            }
        };

        if self.handle.join().is_err() {
            error!("{} worker panicked", self.name);
        }

        received.unwrap_or_else(|| {
            let err = Error::WorkerLost {
                channel: self.name.clone(),
            };
            JobReport::failed(&self.name, self.direction, err)
        })
    }
}

/// Starts the consumer, then the producer. If the producer cannot be started
/// the consumer is waited for, so its channel is released before the error
/// is returned.
fn start_pair<C, P>(
    consumer: C,
    producer: P,
    timeout: Option<Duration>,
) -> Result<(Worker, Worker)>
where
    C: FnOnce() -> Result<Worker>,
    P: FnOnce() -> Result<Worker>,
{
    let consumer = consumer()?;
    match producer() {
        Ok(producer) => Ok((consumer, producer)),
        Err(e) => {
            let deadline = timeout.map(|t| (Instant::now() + t, t));
            let report = consumer.wait(deadline);
            warn!(
                "{} stopped after {} bytes, producer failed to start",
                report.channel, report.transferred
            );
            Err(e)
        }
    }
}

/// Owns the accelerator and its channels for the duration of a run.
pub struct Orchestrator<R> {
    accelerator: Accelerator<R>,
    tx: Box<dyn Channel>,
    rx: Box<dyn Channel>,
    config: StreamConfig,
}

impl Orchestrator<RegisterPort> {
    /// Opens both DMA channels and maps the accelerator registers.
    ///
    /// # Errors
    ///
    /// Returns the first setup error; anything opened before it is released
    /// again.
    pub fn open(setup: &HardwareSetup, config: StreamConfig) -> Result<Self> {
        let tx = DmaProxyChannel::open(&setup.tx_channel, config.slots)?;
        let rx = DmaProxyChannel::open(&setup.rx_channel, config.slots)?;
        let port = RegisterPort::map(setup.register_base, setup.register_size)?;

        Ok(Self::new(
            Accelerator::new(port),
            Box::new(tx),
            Box::new(rx),
            config,
        ))
    }
}

impl<R: Registers> Orchestrator<R> {
    pub fn new(
        accelerator: Accelerator<R>,
        tx: Box<dyn Channel>,
        rx: Box<dyn Channel>,
        config: StreamConfig,
    ) -> Self {
        Self {
            accelerator,
            tx,
            rx,
            config,
        }
    }

    /// Streams `input` through the accelerator into `output`.
    ///
    /// Returns a report whenever the transfer was started; transfer failures
    /// are part of the report. Both channels are released when their worker
    /// exits.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the accelerator
    /// cannot be enabled, or a worker thread cannot be spawned.
    pub fn run(self, input: &Path, output: &Path) -> Result<RunReport> {
        let Orchestrator {
            accelerator,
            tx,
            rx,
            config,
        } = self;

        config.validate(tx.slot_capacity().min(rx.slot_capacity()))?;

        let enabled = accelerator.enable()?;
        info!(
            "streaming {} bytes in chunks of {} ({} slots)",
            config.total_size, config.chunk_size, config.slots
        );
        let start = Instant::now();

        let rx_name = rx.name().to_owned();
        let rx_job = config.job(output);
        let tx_name = tx.name().to_owned();
        let tx_job = config.job(input);
        let (consumer, producer) = start_pair(
            || {
                Worker::spawn("dma-rx", &rx_name, Direction::FromDevice, move || {
                    Consumer::new(rx, rx_job).run()
                })
            },
            || {
                Worker::spawn("dma-tx", &tx_name, Direction::ToDevice, move || {
                    Producer::new(tx, tx_job).run()
                })
            },
            config.timeout,
        )?;

        let deadline = config.timeout.map(|t| (start + t, t));
        let rx = consumer.wait(deadline);
        let tx = producer.wait(deadline);
        let elapsed = start.elapsed();

        let stats = if tx.is_success() && rx.is_success() {
            Some(enabled.stats())
        } else {
            error!("threads terminated with errors");
            None
        };
        drop(enabled);

        Ok(RunReport {
            tx,
            rx,
            elapsed,
            stats,
        })
    }
}
