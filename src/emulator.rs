// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Software stand-in for the DMA proxy channels and the accelerator.
//!
//! The emulator exposes a TX and an RX [`Channel`] plus a register file with
//! the accelerator's register map. TX submits feed the emulated core, RX
//! submits block until the core has produced enough output or the response
//! timeout expires, in which case the slot completes with
//! [`SlotStatus::Timeout`] like the kernel driver does.

use crate::{
    channel::{Channel, SlotStatus, RX_CHANNEL, SLOT_CAPACITY, TX_CHANNEL},
    registers::{regs, MemoryRegisters, Registers},
    sobel::{sobel, Magnitude},
};
use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tracing::{debug, trace};

/// How long an RX submit waits for output, matching the driver's default.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Processing done by the emulated core.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    /// Output equals input, byte for byte.
    Echo,
    /// Buffers a whole frame and emits its edge map.
    Sobel {
        columns: usize,
        rows: usize,
        magnitude: Magnitude,
    },
}

#[derive(Default)]
struct Pipe {
    frame: Vec<u8>,
    output: VecDeque<u8>,
}

struct Core {
    kernel: Kernel,
    registers: Arc<MemoryRegisters>,
    pipe: Mutex<Pipe>,
    ready: Condvar,
}

impl Core {
    fn enabled(&self) -> bool {
        self.registers.read32(regs::ENABLE) & regs::enable::ENABLED != 0
    }

    fn lock(&self) -> MutexGuard<'_, Pipe> {
        // A poisoned pipe only means another worker panicked mid-transfer,
        // the byte queues themselves stay consistent.
        self.pipe.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn consume(&self, data: &[u8]) {
        let mut pipe = self.lock();
        self.registers.add32(regs::INPUT_COUNT, data.len() as u32);
        self.registers.add32(regs::CLOCK_COUNT, data.len() as u32);

        match self.kernel {
            Kernel::Echo => pipe.output.extend(data),
            Kernel::Sobel {
                columns,
                rows,
                magnitude,
            } => {
                let frame_size = columns * rows;
                for byte in data {
                    pipe.frame.push(*byte);
                    if pipe.frame.len() == frame_size {
                        let edges = sobel(&pipe.frame, columns, rows, magnitude);
                        pipe.output.extend(edges);
                        pipe.frame.clear();
                        debug!("emulated frame {}x{} complete", columns, rows);
                    }
                }
            }
        }
        self.ready.notify_all();
    }

    /// Waits for `out.len()` bytes of output. Returns false on timeout
    /// without consuming anything.
    fn produce(&self, out: &mut [u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pipe = self.lock();
        while pipe.output.len() < out.len() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pipe = match self.ready.wait_timeout(pipe, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        let n = out.len();
        for (dst, src) in out.iter_mut().zip(pipe.output.drain(..n)) {
            *dst = src;
        }
        self.registers.add32(regs::OUTPUT_COUNT, n as u32);
        true
    }
}

/// Emulated accelerator with its pair of DMA channels.
pub struct Emulator {
    core: Arc<Core>,
    slot_capacity: usize,
    response_timeout: Duration,
}

impl Emulator {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            core: Arc::new(Core {
                kernel,
                registers: Arc::new(MemoryRegisters::default()),
                pipe: Mutex::new(Pipe::default()),
                ready: Condvar::new(),
            }),
            slot_capacity: SLOT_CAPACITY,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Sets the slot capacity of channels created afterwards.
    pub fn with_slot_capacity(mut self, capacity: usize) -> Self {
        self.slot_capacity = capacity;
        self
    }

    /// Sets the RX response timeout of channels created afterwards.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// The accelerator's register window.
    pub fn registers(&self) -> Arc<MemoryRegisters> {
        self.core.registers.clone()
    }

    pub fn tx_channel(&self, slots: usize) -> EmulatedChannel {
        EmulatedChannel::new(TX_CHANNEL, Side::Tx, self, slots)
    }

    pub fn rx_channel(&self, slots: usize) -> EmulatedChannel {
        EmulatedChannel::new(RX_CHANNEL, Side::Rx, self, slots)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Tx,
    Rx,
}

struct Slot {
    data: Vec<u8>,
    length: u32,
    status: SlotStatus,
}

/// One direction of the emulated DMA proxy.
pub struct EmulatedChannel {
    name: String,
    side: Side,
    slots: Vec<Slot>,
    core: Arc<Core>,
    response_timeout: Duration,
}

impl EmulatedChannel {
    fn new(name: &str, side: Side, emulator: &Emulator, slots: usize) -> Self {
        let slots = (0..slots.max(1))
            .map(|_| Slot {
                data: vec![0; emulator.slot_capacity],
                length: 0,
                status: SlotStatus::NoError,
            })
            .collect();
        Self {
            name: name.to_owned(),
            side,
            slots,
            core: emulator.core.clone(),
            response_timeout: emulator.response_timeout,
        }
    }
}

impl Channel for EmulatedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_capacity(&self) -> usize {
        self.slots[0].data.len()
    }

    fn buffer(&self, slot: usize) -> &[u8] {
        &self.slots[slot].data
    }

    fn buffer_mut(&mut self, slot: usize) -> &mut [u8] {
        &mut self.slots[slot].data
    }

    fn length(&self, slot: usize) -> u32 {
        self.slots[slot].length
    }

    fn set_length(&mut self, slot: usize, length: u32) {
        self.slots[slot].length = length;
    }

    fn status(&self, slot: usize) -> SlotStatus {
        self.slots[slot].status
    }

    fn submit(&mut self, slot: usize) -> io::Result<()> {
        let capacity = self.slot_capacity();
        let Some(s) = self.slots.get_mut(slot) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("slot {slot} out of range"),
            ));
        };
        let len = s.length as usize;
        if len > capacity {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("length {len} exceeds slot capacity {capacity}"),
            ));
        }

        s.status = SlotStatus::Busy;
        if !self.core.enabled() {
            s.status = SlotStatus::Timeout;
            return Ok(());
        }

        s.status = match self.side {
            Side::Tx => {
                self.core.consume(&s.data[..len]);
                SlotStatus::NoError
            }
            Side::Rx => {
                if self.core.produce(&mut s.data[..len], self.response_timeout) {
                    SlotStatus::NoError
                } else {
                    SlotStatus::Timeout
                }
            }
        };
        trace!("{}: slot {} {} bytes {}", self.name, slot, len, s.status);
        Ok(())
    }
}
