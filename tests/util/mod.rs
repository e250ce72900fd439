#![allow(dead_code)]

use bytes::Bytes;
use rand::prelude::*;
use rand_xoshiro::Xoshiro128StarStar;
use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vbc::transport::{BulkTransport, ControlTransport, TxFifo};

pub const SEED: u64 = 12523;

pub fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

/// Splits payloads into randomly sized chunks.
pub struct Chunker {
    rng: Xoshiro128StarStar,
    max_chunk: usize,
}

impl Chunker {
    pub fn new(seed: u64, max_chunk: usize) -> Self {
        Self { rng: Xoshiro128StarStar::seed_from_u64(seed), max_chunk }
    }

    pub fn split(&mut self, len: usize) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut left = len;
        while left > 0 {
            let n = self.rng.random_range(1..=self.max_chunk.min(left));
            let mut chunk = vec![0; n];
            self.rng.fill_bytes(&mut chunk);
            chunks.push(chunk);
            left -= n;
        }
        chunks
    }

    pub fn length(&mut self, max: u16) -> u16 {
        self.rng.random_range(1..=max)
    }
}

/// Bulk transport with a randomly varying amount of free space.
///
/// Records every accepted write and the flush calls following it.
pub struct FlakyTransport {
    rng: Xoshiro128StarStar,
    max_space: usize,
    space: usize,
    pub writes: Vec<Bytes>,
    pub flushes: usize,
    pub unflushed: usize,
}

impl FlakyTransport {
    pub fn new(seed: u64, max_space: usize) -> Self {
        let rng = Xoshiro128StarStar::seed_from_u64(seed);
        let mut this = Self { rng, max_space, space: 0, writes: Vec::new(), flushes: 0, unflushed: 0 };
        this.reroll();
        this
    }

    /// Picks a new amount of free space, possibly zero.
    pub fn reroll(&mut self) {
        self.space = self.rng.random_range(0..=self.max_space);
    }

    pub fn written(&self) -> usize {
        self.writes.iter().map(Bytes::len).sum()
    }

    pub fn take_writes(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.writes)
    }
}

impl BulkTransport for FlakyTransport {
    fn write_available(&self) -> usize {
        self.space
    }

    fn write(&mut self, mut data: Bytes) -> usize {
        let n = data.len().min(self.space);
        if n > 0 {
            data.truncate(n);
            self.writes.push(data);
            self.space -= n;
            self.unflushed += 1;
        }
        n
    }

    fn flush(&mut self) {
        self.flushes += 1;
        self.unflushed = 0;
    }
}

/// Control transport recording replies and reboot requests.
///
/// Owns the outbound bulk FIFO, like the device driver does.
#[derive(Default)]
pub struct ControlRecorder {
    pub fifo: TxFifo,
    pub replies: Vec<Bytes>,
    pub reboots: usize,
}

impl ControlTransport for ControlRecorder {
    fn send_control_response(&mut self, data: Bytes) -> bool {
        self.replies.push(data);
        true
    }

    fn discard_bulk(&mut self) {
        self.fifo.clear();
    }

    fn reboot_into_programming_mode(&mut self) {
        self.reboots += 1;
    }
}
