//! Transport surface consumed by the protocol core.
//!
//! The protocol core never talks to USB directly. It pushes outbound bulk data
//! through a [`BulkTransport`] and answers control requests through a
//! [`ControlTransport`]. [`TxFifo`] is the bulk transport used by the device
//! driver; it models the bounded IN-endpoint buffer of a USB device stack.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

use crate::MAX_PACKET_SIZE;

/// Outbound half of the bulk pipe.
///
/// All operations are non-blocking and best effort.
pub trait BulkTransport {
    /// Number of bytes [`write`](Self::write) will currently accept.
    fn write_available(&self) -> usize;

    /// Queues data for sending.
    ///
    /// Ownership of the accepted prefix of `data` moves into the transport.
    /// Returns the number of bytes accepted, which may be less than offered.
    fn write(&mut self, data: Bytes) -> usize;

    /// Releases all queued data to the wire.
    fn flush(&mut self);
}

/// Synchronous side of control transfers.
pub trait ControlTransport {
    /// Sends the data stage of a control transfer.
    ///
    /// Returns whether the transfer was accepted by the transport.
    fn send_control_response(&mut self, data: Bytes) -> bool;

    /// Drops outbound bulk data that was queued but not yet sent.
    ///
    /// Called when a control request resets the bulk protocol.
    fn discard_bulk(&mut self);

    /// Reboots the device into its programming mode.
    fn reboot_into_programming_mode(&mut self);
}

/// Default capacity of a [`TxFifo`].
pub const TX_FIFO_SIZE: usize = 64;

/// Bounded outbound FIFO.
///
/// Written data is queued without copying. Only flushed data is handed out
/// by [`take_flushed`](Self::take_flushed), in packets of at most the
/// configured maximum packet size.
#[derive(Debug)]
pub struct TxFifo {
    queue: VecDeque<Bytes>,
    capacity: usize,
    max_packet_size: usize,
    queued: usize,
    flushed: usize,
}

impl Default for TxFifo {
    fn default() -> Self {
        Self::new(TX_FIFO_SIZE)
    }
}

impl TxFifo {
    /// Creates a FIFO holding at most `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "FIFO capacity must not be zero");
        Self { queue: VecDeque::new(), capacity, max_packet_size: MAX_PACKET_SIZE, queued: 0, flushed: 0 }
    }

    /// Sets the maximum size of packets returned by [`take_flushed`](Self::take_flushed).
    ///
    /// # Panics
    /// Panics if `max_packet_size` is zero.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        assert!(max_packet_size > 0, "maximum packet size must not be zero");
        self.max_packet_size = max_packet_size;
        self
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued bytes, flushed or not.
    pub fn len(&self) -> usize {
        self.queued
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    /// Whether flushed data is waiting to be sent.
    pub fn has_flushed(&self) -> bool {
        self.flushed > 0
    }

    /// Returns the next flushed packet without removing it.
    pub fn peek_flushed(&self) -> Option<Bytes> {
        let limit = self.flushed.min(self.max_packet_size);
        if limit == 0 {
            return None;
        }

        let front = self.queue.front()?;
        if front.len() >= limit {
            return Some(front.slice(..limit));
        }

        let mut packet = BytesMut::with_capacity(limit);
        for seg in &self.queue {
            let n = seg.len().min(limit - packet.len());
            packet.extend_from_slice(&seg[..n]);
            if packet.len() == limit {
                break;
            }
        }
        Some(packet.freeze())
    }

    /// Removes `len` flushed bytes from the front of the FIFO.
    ///
    /// Used together with [`peek_flushed`](Self::peek_flushed) once a packet
    /// has actually been sent.
    pub fn consume(&mut self, len: usize) {
        let mut left = len.min(self.flushed);
        self.queued -= left;
        self.flushed -= left;

        while left > 0 {
            let Some(seg) = self.queue.front_mut() else { break };
            let n = seg.len().min(left);
            let _ = seg.split_to(n);
            if seg.is_empty() {
                self.queue.pop_front();
            }
            left -= n;
        }
    }

    /// Removes and returns the next flushed packet.
    pub fn take_flushed(&mut self) -> Option<Bytes> {
        let packet = self.peek_flushed()?;
        self.consume(packet.len());
        Some(packet)
    }

    /// Drops all queued data.
    pub fn clear(&mut self) {
        if self.queued > 0 {
            tracing::debug!("discarding {} queued bytes", self.queued);
        }
        self.queue.clear();
        self.queued = 0;
        self.flushed = 0;
    }
}

impl BulkTransport for TxFifo {
    fn write_available(&self) -> usize {
        self.capacity - self.queued
    }

    fn write(&mut self, mut data: Bytes) -> usize {
        let n = data.len().min(self.write_available());
        if n == 0 {
            return 0;
        }

        data.truncate(n);
        self.queue.push_back(data);
        self.queued += n;
        n
    }

    fn flush(&mut self) {
        self.flushed = self.queued;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_bounded_by_capacity() {
        let mut fifo = TxFifo::new(8);
        assert_eq!(fifo.write_available(), 8);
        assert_eq!(fifo.write(Bytes::from_static(b"hello")), 5);
        assert_eq!(fifo.write(Bytes::from_static(b"world")), 3);
        assert_eq!(fifo.write_available(), 0);
        assert_eq!(fifo.write(Bytes::from_static(b"!")), 0);
        assert_eq!(fifo.len(), 8);
    }

    #[test]
    fn unflushed_data_is_held_back() {
        let mut fifo = TxFifo::new(16);
        fifo.write(Bytes::from_static(b"abc"));
        assert!(!fifo.has_flushed());
        assert_eq!(fifo.take_flushed(), None);

        fifo.flush();
        fifo.write(Bytes::from_static(b"def"));
        assert_eq!(fifo.take_flushed().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(fifo.take_flushed(), None);
        assert_eq!(fifo.len(), 3);
    }

    #[test]
    fn packets_merge_segments_up_to_max_packet_size() {
        let mut fifo = TxFifo::new(16).with_max_packet_size(4);
        fifo.write(Bytes::from_static(b"ab"));
        fifo.write(Bytes::from_static(b"cde"));
        fifo.write(Bytes::from_static(b"f"));
        fifo.flush();

        assert_eq!(fifo.take_flushed().unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(fifo.take_flushed().unwrap(), Bytes::from_static(b"ef"));
        assert!(fifo.is_empty());
        assert_eq!(fifo.write_available(), 16);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut fifo = TxFifo::new(16);
        fifo.write(Bytes::from_static(b"xyz"));
        fifo.flush();

        assert_eq!(fifo.peek_flushed().unwrap(), Bytes::from_static(b"xyz"));
        assert_eq!(fifo.len(), 3);
        fifo.consume(2);
        assert_eq!(fifo.peek_flushed().unwrap(), Bytes::from_static(b"z"));
    }

    #[test]
    fn clear_frees_space() {
        let mut fifo = TxFifo::new(4);
        fifo.write(Bytes::from_static(b"data"));
        fifo.flush();
        fifo.clear();
        assert!(fifo.is_empty());
        assert!(!fifo.has_flushed());
        assert_eq!(fifo.write_available(), 4);
    }
}
