// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Transfer workers.
//!
//! A [`Producer`] drains a host file into the TX channel and a [`Consumer`]
//! fills a host file from the RX channel. Both move the data in chunks; each
//! chunk is submitted and its completion status checked before the next chunk
//! touches the channel. A worker never returns an error across the thread
//! boundary, it reports its outcome once in a [`JobReport`].

use crate::{
    channel::{Channel, SlotRing, SlotStatus},
    error::Error,
};
use std::{
    fmt,
    fs::File,
    io::{self, Read, Write},
    path::PathBuf,
};
use tracing::{debug, error, info, info_span, trace, warn};

/// Chunk size used when none is configured. The AXI DMA core requires a
/// power of two.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// What to do when the stream ends before the full image was moved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShortTransferPolicy {
    /// Treat an early end of stream as a normal end.
    #[default]
    Accept,
    /// Fail the job with [`Error::ShortTransfer`].
    Reject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Host file to accelerator.
    ToDevice,
    /// Accelerator to host file.
    FromDevice,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::ToDevice => write!(f, "host -> accelerator"),
            Direction::FromDevice => write!(f, "accelerator -> host"),
        }
    }
}

/// Per-worker transfer description.
#[derive(Clone, Debug)]
pub struct TransferJob {
    /// Source file for a producer, sink file for a consumer.
    pub path: PathBuf,
    pub chunk_size: usize,
    pub total_size: usize,
    /// Number of channel slots to cycle through.
    pub slots: usize,
    pub short_transfer: ShortTransferPolicy,
}

impl TransferJob {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize, total_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size,
            total_size,
            slots: 1,
            short_transfer: ShortTransferPolicy::default(),
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_short_transfer(mut self, policy: ShortTransferPolicy) -> Self {
        self.short_transfer = policy;
        self
    }
}

#[derive(Debug)]
pub enum JobStatus {
    Success,
    Failure(Error),
}

/// Outcome of one worker.
#[derive(Debug)]
pub struct JobReport {
    pub channel: String,
    pub direction: Direction,
    /// Bytes moved between the file and the channel.
    pub transferred: usize,
    /// Chunks that completed with `NoError`.
    pub chunks: usize,
    pub status: JobStatus,
}

impl JobReport {
    fn new(channel: &str, direction: Direction) -> Self {
        Self {
            channel: channel.to_owned(),
            direction,
            transferred: 0,
            chunks: 0,
            status: JobStatus::Success,
        }
    }

    /// Report for a worker that failed before moving any data.
    pub fn failed(channel: &str, direction: Direction, err: Error) -> Self {
        Self::new(channel, direction).fail(err)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Success)
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.status {
            JobStatus::Success => None,
            JobStatus::Failure(e) => Some(e),
        }
    }

    fn fail(mut self, err: Error) -> Self {
        error!("{} ({}): {}", self.channel, self.direction, err);
        self.status = JobStatus::Failure(err);
        self
    }

    fn finish(self, job: &TransferJob) -> Self {
        if self.transferred < job.total_size {
            warn!(
                "{}: stream ended after {} of {} bytes",
                self.channel, self.transferred, job.total_size
            );
            if job.short_transfer == ShortTransferPolicy::Reject {
                let err = Error::ShortTransfer {
                    channel: self.channel.clone(),
                    expected: job.total_size,
                    actual: self.transferred,
                };
                return self.fail(err);
            }
        }
        info!(
            "{} ({}) done: {} bytes in {} chunks",
            self.channel, self.direction, self.transferred, self.chunks
        );
        self
    }
}

/// Submits `slot` and checks its completion status.
fn complete<C: Channel + ?Sized>(channel: &mut C, slot: usize, chunk: usize) -> Result<(), Error> {
    channel.submit(slot).map_err(|source| Error::Submit {
        channel: channel.name().to_owned(),
        chunk,
        source,
    })?;

    match channel.status(slot) {
        SlotStatus::NoError => Ok(()),
        status => Err(Error::HardwareStatus {
            channel: channel.name().to_owned(),
            chunk,
            status,
        }),
    }
}

/// Reads once into `buf`. Zero means the source is exhausted; read errors
/// end the stream the same way.
fn read_chunk<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> usize {
    loop {
        match source.read(buf) {
            Ok(n) => return n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("source read failed: {}", e);
                return 0;
            }
        }
    }
}

/// Writes `buf` to the sink and returns how many bytes it accepted. Stops
/// early when the sink returns zero or fails.
fn write_chunk<W: Write + ?Sized>(sink: &mut W, buf: &[u8]) -> usize {
    let mut written = 0;
    while written < buf.len() {
        match sink.write(&buf[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("sink write failed: {}", e);
                break;
            }
        }
    }
    written
}

/// Streams `job.total_size` bytes from `source` into the channel.
pub fn stream_to_device<C, R>(channel: &mut C, source: &mut R, job: &TransferJob) -> JobReport
where
    C: Channel + ?Sized,
    R: Read + ?Sized,
{
    let mut report = JobReport::new(channel.name(), Direction::ToDevice);
    let mut slots = SlotRing::new(job.slots.min(channel.slot_count()));
    let chunk_size = job.chunk_size.min(channel.slot_capacity());

    while report.transferred < job.total_size {
        let want = chunk_size.min(job.total_size - report.transferred);
        let slot = slots.next_slot();

        let n = read_chunk(source, &mut channel.buffer_mut(slot)[..want]);
        if n == 0 {
            debug!("{}: source exhausted", report.channel);
            break;
        }
        channel.set_length(slot, n as u32);

        if let Err(e) = complete(channel, slot, report.chunks) {
            return report.fail(e);
        }

        report.transferred += n;
        report.chunks += 1;
        trace!("{}: chunk {} slot {} {} bytes", report.channel, report.chunks, slot, n);
    }

    report.finish(job)
}

/// Streams `job.total_size` bytes from the channel into `sink`.
pub fn stream_from_device<C, W>(channel: &mut C, sink: &mut W, job: &TransferJob) -> JobReport
where
    C: Channel + ?Sized,
    W: Write + ?Sized,
{
    let mut report = JobReport::new(channel.name(), Direction::FromDevice);
    let mut slots = SlotRing::new(job.slots.min(channel.slot_count()));
    let chunk_size = job.chunk_size.min(channel.slot_capacity());

    while report.transferred < job.total_size {
        let want = chunk_size.min(job.total_size - report.transferred);
        let slot = slots.next_slot();

        channel.set_length(slot, want as u32);

        if let Err(e) = complete(channel, slot, report.chunks) {
            return report.fail(e);
        }

        let len = (channel.length(slot) as usize).min(want);
        let n = write_chunk(sink, &channel.buffer(slot)[..len]);
        if n == 0 {
            debug!("{}: sink closed", report.channel);
            break;
        }

        report.transferred += n;
        report.chunks += 1;
        trace!("{}: chunk {} slot {} {} bytes", report.channel, report.chunks, slot, n);

        if n < len {
            debug!("{}: sink accepted {} of {} bytes", report.channel, n, len);
            break;
        }
    }

    if let Err(e) = sink.flush() {
        warn!("{}: flush failed: {}", report.channel, e);
    }

    report.finish(job)
}

/// Host file to accelerator worker.
pub struct Producer<C> {
    channel: C,
    job: TransferJob,
}

impl<C: Channel> Producer<C> {
    pub fn new(channel: C, job: TransferJob) -> Self {
        Self { channel, job }
    }

    /// Runs the transfer to completion. The channel is released when the
    /// producer is consumed.
    pub fn run(mut self) -> JobReport {
        let _span = info_span!("producer", channel = self.channel.name()).entered();

        let mut source = match File::open(&self.job.path) {
            Ok(f) => f,
            Err(source) => {
                let err = Error::File {
                    path: self.job.path.clone(),
                    source,
                };
                return JobReport::failed(self.channel.name(), Direction::ToDevice, err);
            }
        };

        stream_to_device(&mut self.channel, &mut source, &self.job)
    }
}

/// Accelerator to host file worker.
pub struct Consumer<C> {
    channel: C,
    job: TransferJob,
}

impl<C: Channel> Consumer<C> {
    pub fn new(channel: C, job: TransferJob) -> Self {
        Self { channel, job }
    }

    /// Creates or truncates the sink and runs the transfer to completion.
    pub fn run(mut self) -> JobReport {
        let _span = info_span!("consumer", channel = self.channel.name()).entered();

        let mut sink = match File::create(&self.job.path) {
            Ok(f) => f,
            Err(source) => {
                let err = Error::File {
                    path: self.job.path.clone(),
                    source,
                };
                return JobReport::failed(self.channel.name(), Direction::FromDevice, err);
            }
        };

        stream_from_device(&mut self.channel, &mut sink, &self.job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Cursor;

    /// Channel that completes every submit immediately and records what was
    /// submitted. RX submits fill the slot with a counting pattern.
    struct ScriptedChannel {
        slots: Vec<Vec<u8>>,
        lengths: Vec<u32>,
        statuses: Vec<SlotStatus>,
        submitted: Vec<(usize, u32)>,
        received: Vec<u8>,
        fail_submit_at: Option<usize>,
        status_at: Option<(usize, SlotStatus)>,
        next_byte: u8,
    }

    impl ScriptedChannel {
        fn new(slots: usize, capacity: usize) -> Self {
            Self {
                slots: vec![vec![0; capacity]; slots],
                lengths: vec![0; slots],
                statuses: vec![SlotStatus::Busy; slots],
                submitted: Vec::new(),
                received: Vec::new(),
                fail_submit_at: None,
                status_at: None,
                next_byte: 0,
            }
        }

        fn chunk_sizes(&self) -> Vec<u32> {
            self.submitted.iter().map(|(_, len)| *len).collect()
        }
    }

    impl Channel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn slot_count(&self) -> usize {
            self.slots.len()
        }

        fn slot_capacity(&self) -> usize {
            self.slots[0].len()
        }

        fn buffer(&self, slot: usize) -> &[u8] {
            &self.slots[slot]
        }

        fn buffer_mut(&mut self, slot: usize) -> &mut [u8] {
            &mut self.slots[slot]
        }

        fn length(&self, slot: usize) -> u32 {
            self.lengths[slot]
        }

        fn set_length(&mut self, slot: usize, length: u32) {
            self.lengths[slot] = length;
        }

        fn status(&self, slot: usize) -> SlotStatus {
            self.statuses[slot]
        }

        fn submit(&mut self, slot: usize) -> io::Result<()> {
            let index = self.submitted.len();
            if self.fail_submit_at == Some(index) {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }

            let len = self.lengths[slot];
            self.submitted.push((slot, len));
            let data = &mut self.slots[slot][..len as usize];
            self.received.extend_from_slice(data);
            for byte in data.iter_mut() {
                *byte = self.next_byte;
                self.next_byte = self.next_byte.wrapping_add(1);
            }

            self.statuses[slot] = match self.status_at {
                Some((at, status)) if at == index => status,
                _ => SlotStatus::NoError,
            };
            Ok(())
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_single_chunk() {
        let mut channel = ScriptedChannel::new(1, 4096);
        let data = pattern(4096);
        let job = TransferJob::new("in.raw", 4096, 4096);

        let report = stream_to_device(&mut channel, &mut Cursor::new(&data), &job);
        assert!(report.is_success());
        assert_eq!(report.transferred, 4096);
        assert_eq!(report.chunks, 1);
        assert_eq!(channel.chunk_sizes(), vec![4096]);
        assert_eq!(channel.received, data);
    }

    #[test]
    fn test_final_short_chunk() {
        let mut channel = ScriptedChannel::new(1, 4096);
        let data = pattern(10000);
        let job = TransferJob::new("in.raw", 4096, 10000);

        let report = stream_to_device(&mut channel, &mut Cursor::new(&data), &job);
        assert!(report.is_success());
        assert_eq!(report.transferred, 10000);
        assert_eq!(report.chunks, 3);
        assert_eq!(channel.chunk_sizes(), vec![4096, 4096, 1808]);
        assert!(channel.submitted.iter().all(|(slot, _)| *slot == 0));
        assert_eq!(channel.received, data);
    }

    #[test]
    fn test_chunk_count() {
        for (total, chunk) in [(1, 1), (7, 3), (4095, 4096), (12288, 4096), (65537, 1024)] {
            let mut channel = ScriptedChannel::new(1, chunk);
            let job = TransferJob::new("in.raw", chunk, total);
            let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(total)), &job);
            assert!(report.is_success());
            assert_eq!(report.chunks, total.div_ceil(chunk));
            let sum: u32 = channel.chunk_sizes().iter().sum();
            assert_eq!(sum as usize, total);
        }
    }

    #[test]
    fn test_chunk_clamped_to_slot() {
        let mut channel = ScriptedChannel::new(1, 1000);
        let job = TransferJob::new("in.raw", 4096, 2500);
        let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(2500)), &job);
        assert!(report.is_success());
        assert_eq!(channel.chunk_sizes(), vec![1000, 1000, 500]);
    }

    #[test]
    fn test_round_robin_slots() {
        let mut channel = ScriptedChannel::new(2, 16);
        let job = TransferJob::new("in.raw", 16, 64).with_slots(2);
        let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(64)), &job);
        assert!(report.is_success());
        let slots: Vec<usize> = channel.submitted.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_source_exhausted() {
        let mut channel = ScriptedChannel::new(1, 4096);
        let job = TransferJob::new("in.raw", 4096, 10000);

        let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(5000)), &job);
        assert!(report.is_success());
        assert_eq!(report.transferred, 5000);
        assert!(report.transferred < job.total_size);
        assert_eq!(channel.chunk_sizes(), vec![4096, 904]);
    }

    #[test]
    fn test_source_exhausted_rejected() {
        let mut channel = ScriptedChannel::new(1, 4096);
        let job = TransferJob::new("in.raw", 4096, 10000)
            .with_short_transfer(ShortTransferPolicy::Reject);

        let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(5000)), &job);
        assert!(!report.is_success());
        assert_eq!(report.transferred, 5000);
        assert_eq!(report.error().unwrap().kind(), ErrorKind::ShortTransfer);
    }

    #[test]
    fn test_submit_failure_stops() {
        let mut channel = ScriptedChannel::new(1, 1024);
        channel.fail_submit_at = Some(2);
        let job = TransferJob::new("in.raw", 1024, 8192);

        let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(8192)), &job);
        assert!(!report.is_success());
        assert_eq!(report.error().unwrap().kind(), ErrorKind::Submit);
        assert_eq!(report.transferred, 2048);
        assert_eq!(report.chunks, 2);
        assert_eq!(channel.submitted.len(), 2);
    }

    #[test]
    fn test_hardware_status_stops() {
        for status in [SlotStatus::Timeout, SlotStatus::Error, SlotStatus::Busy] {
            let mut channel = ScriptedChannel::new(1, 1024);
            channel.status_at = Some((1, status));
            let job = TransferJob::new("in.raw", 1024, 8192);

            let report = stream_to_device(&mut channel, &mut Cursor::new(pattern(8192)), &job);
            match report.error() {
                Some(Error::HardwareStatus { chunk, status: s, .. }) => {
                    assert_eq!(*chunk, 1);
                    assert_eq!(*s, status);
                }
                other => panic!("unexpected outcome {other:?}"),
            }
            assert_eq!(report.transferred, 1024);
            assert_eq!(channel.submitted.len(), 2);
        }
    }

    #[test]
    fn test_consumer_writes() {
        let mut channel = ScriptedChannel::new(1, 4096);
        let job = TransferJob::new("out.raw", 4096, 10000);
        let mut sink = Vec::new();

        let report = stream_from_device(&mut channel, &mut sink, &job);
        assert!(report.is_success());
        assert_eq!(report.transferred, 10000);
        assert_eq!(report.chunks, 3);
        assert_eq!(channel.chunk_sizes(), vec![4096, 4096, 1808]);
        let expected: Vec<u8> = (0..10000).map(|i| i as u8).collect();
        assert_eq!(sink, expected);
    }

    #[test]
    fn test_consumer_status_checked_before_write() {
        let mut channel = ScriptedChannel::new(1, 1024);
        channel.status_at = Some((0, SlotStatus::Error));
        let job = TransferJob::new("out.raw", 1024, 4096);
        let mut sink = Vec::new();

        let report = stream_from_device(&mut channel, &mut sink, &job);
        assert_eq!(report.error().unwrap().kind(), ErrorKind::HardwareStatus);
        assert!(sink.is_empty());
        assert_eq!(report.transferred, 0);
    }

    #[test]
    fn test_consumer_submit_failure() {
        let mut channel = ScriptedChannel::new(1, 1024);
        channel.fail_submit_at = Some(1);
        let job = TransferJob::new("out.raw", 1024, 4096);
        let mut sink = Vec::new();

        let report = stream_from_device(&mut channel, &mut sink, &job);
        assert_eq!(report.error().unwrap().kind(), ErrorKind::Submit);
        assert_eq!(report.transferred, 1024);
        assert_eq!(sink.len(), 1024);
    }

    #[test]
    fn test_consumer_sink_full() {
        let mut channel = ScriptedChannel::new(1, 1024);
        let job = TransferJob::new("out.raw", 1024, 4096);
        let mut buf = [0u8; 1500];
        let mut sink = Cursor::new(&mut buf[..]);

        let report = stream_from_device(&mut channel, &mut sink, &job);
        assert!(report.is_success());
        assert_eq!(report.transferred, 1500);
        assert_eq!(channel.submitted.len(), 2);
    }

    #[test]
    fn test_producer_missing_source() {
        let channel = ScriptedChannel::new(1, 1024);
        let job = TransferJob::new("/nonexistent/input.raw", 1024, 4096);
        let report = Producer::new(channel, job).run();
        assert_eq!(report.error().unwrap().kind(), ErrorKind::Io);
        assert_eq!(report.transferred, 0);
    }

    #[test]
    fn test_consumer_bad_sink() {
        let channel = ScriptedChannel::new(1, 1024);
        let job = TransferJob::new("/nonexistent/dir/output.raw", 1024, 4096);
        let report = Consumer::new(channel, job).run();
        assert_eq!(report.error().unwrap().kind(), ErrorKind::Io);
        assert_eq!(report.chunks, 0);
    }
}
