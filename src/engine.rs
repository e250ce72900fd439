//! Bulk command engine.
//!
//! The engine tracks the single in-flight bulk command. In the idle state every
//! inbound chunk must be a 4-byte [`CommandFrame`]. A write command is followed
//! by its payload from the host and completed by a [`StatusFrame`]; a read
//! command is served from [`Engine::poll`] and completes silently, since the
//! host already knows how many bytes it asked for.
//!
//! The engine is a plain value mutated through `&mut self`, so receive, poll
//! and lifecycle resets are serialized by whoever owns it.

use bytes::Bytes;

use crate::{
    frame::{CommandFrame, Opcode, Status, StatusFrame},
    transport::BulkTransport,
    MAX_PACKET_SIZE, STATUS_LEN,
};

/// Command currently being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Command {
    /// No payload transfer in flight.
    #[default]
    None,
    /// Receiving write payload from the host.
    Write,
    /// Sending read payload to the host.
    Read,
}

/// Phase of the bulk state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for a command frame.
    Idle,
    /// Waiting for write payload.
    AwaitingWriteData,
    /// Sending read payload.
    AwaitingReadSend,
}

/// Protocol state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProtocolState {
    /// Active command.
    pub current_command: Command,
    /// Payload length declared by the active command.
    pub expected_len: u16,
    /// Payload bytes transferred so far.
    pub handled_len: u16,
}

impl ProtocolState {
    /// State without a command in flight.
    pub const IDLE: Self = Self { current_command: Command::None, expected_len: 0, handled_len: 0 };

    /// Phase of the state machine.
    pub fn phase(&self) -> Phase {
        match self.current_command {
            Command::None => Phase::Idle,
            Command::Write => Phase::AwaitingWriteData,
            Command::Read => Phase::AwaitingReadSend,
        }
    }

    /// Payload bytes still to be transferred.
    pub fn remaining(&self) -> u16 {
        self.expected_len - self.handled_len
    }
}

/// USB device lifecycle notification.
///
/// Every notification abandons the in-flight transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Host configured the device.
    Mounted,
    /// Device was disconnected, reset or deconfigured.
    Unmounted,
    /// Bus was suspended.
    Suspended {
        /// Whether the host enabled remote wakeup.
        remote_wakeup: bool,
    },
    /// Bus was resumed.
    Resumed,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    chunk_cap: usize,
    fill: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { chunk_cap: MAX_PACKET_SIZE, fill: b'x' }
    }
}

impl EngineConfig {
    /// Sets the maximum number of read payload bytes written per poll.
    ///
    /// # Panics
    /// Panics if `chunk_cap` is zero.
    pub fn with_chunk_cap(mut self, chunk_cap: usize) -> Self {
        assert!(chunk_cap > 0, "chunk cap must not be zero");
        self.chunk_cap = chunk_cap;
        self
    }

    /// Sets the byte used as read payload.
    pub fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    /// Maximum number of read payload bytes written per poll.
    pub fn chunk_cap(&self) -> usize {
        self.chunk_cap
    }

    /// Byte used as read payload.
    pub fn fill(&self) -> u8 {
        self.fill
    }
}

/// Bulk command engine.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    state: ProtocolState,
}

impl Engine {
    /// Creates a new engine in the idle state.
    pub fn new(config: EngineConfig) -> Self {
        Self { config, state: ProtocolState::IDLE }
    }

    /// Current protocol state.
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Current phase of the state machine.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Abandons any in-flight transfer.
    pub fn reset(&mut self) {
        if self.state.current_command != Command::None {
            tracing::debug!(
                "abandoning {:?} command after {} of {} bytes",
                self.state.current_command,
                self.state.handled_len,
                self.state.expected_len
            );
        }
        self.state = ProtocolState::IDLE;
    }

    /// Handles a device lifecycle notification.
    pub fn lifecycle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Mounted => tracing::info!("device mounted"),
            LifecycleEvent::Unmounted => tracing::info!("device unmounted"),
            LifecycleEvent::Suspended { remote_wakeup } => {
                tracing::info!("device suspended, remote wakeup {}", if remote_wakeup { "enabled" } else { "disabled" })
            }
            LifecycleEvent::Resumed => tracing::info!("device resumed"),
        }
        self.reset();
    }

    /// Handles a chunk of data received on the bulk OUT endpoint.
    ///
    /// Returns the status frame written to `tx`, if any. A status frame is
    /// written whole or not at all; when `tx` lacks the space it is dropped
    /// and `None` is returned.
    pub fn receive(&mut self, data: &[u8], tx: &mut impl BulkTransport) -> Option<StatusFrame> {
        #[cfg(feature = "trace-packets")]
        tracing::trace!("bulk OUT: {}", crate::hex(data));

        let reply = match self.state.current_command {
            Command::None => self.command(data),
            Command::Write => self.write_data(data),
            Command::Read => {
                tracing::warn!("unexpectedly received {} bytes while executing read command", data.len());
                Some(StatusFrame::new(Status::Busy, 0))
            }
        };

        reply.filter(|&status| Self::send_status(status, tx))
    }

    fn command(&mut self, data: &[u8]) -> Option<StatusFrame> {
        let frame = match CommandFrame::parse(data) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!("invalid command: {err}");
                return Some(StatusFrame::new(Status::Error, 0));
            }
        };

        let opcode = match frame.opcode() {
            Ok(opcode) => opcode,
            Err(err) => {
                tracing::warn!("unsupported command {:02x?}: {err}", frame.to_bytes());
                return Some(StatusFrame::new(Status::Error, 0));
            }
        };

        let len = frame.payload_len;
        match opcode {
            Opcode::Write if len == 0 => {
                tracing::debug!("write command without data (protocol {})", frame.protocol_id);
                Some(StatusFrame::new(Status::Ready, 0))
            }
            Opcode::Write => {
                tracing::debug!("write command, expecting {len} bytes (protocol {})", frame.protocol_id);
                self.state = ProtocolState { current_command: Command::Write, expected_len: len, handled_len: 0 };
                None
            }
            Opcode::Read if len == 0 => {
                tracing::debug!("read command without data (protocol {})", frame.protocol_id);
                None
            }
            Opcode::Read => {
                tracing::debug!("read command, sending {len} bytes (protocol {})", frame.protocol_id);
                self.state = ProtocolState { current_command: Command::Read, expected_len: len, handled_len: 0 };
                None
            }
        }
    }

    fn write_data(&mut self, data: &[u8]) -> Option<StatusFrame> {
        let expected = self.state.expected_len;
        let total = usize::from(self.state.handled_len) + data.len();

        if total > usize::from(expected) {
            tracing::warn!(
                "write overrun: received {total} bytes for a {expected} byte write, discarding command"
            );
            self.reset();
            return Some(StatusFrame::new(Status::Error, 0));
        }

        // total <= expected, so it fits
        self.state.handled_len = total as u16;
        tracing::debug!("received {} bytes of data, {total} of {expected} total", data.len());

        if self.state.handled_len == expected {
            let status = StatusFrame::new(Status::Ready, expected);
            self.state = ProtocolState::IDLE;
            Some(status)
        } else {
            None
        }
    }

    /// Sends pending read payload.
    ///
    /// Call once per iteration of the main loop. Writes at most as much as
    /// `tx` has space for and never more than the configured chunk cap.
    /// Returns the number of payload bytes accepted by `tx`.
    pub fn poll(&mut self, tx: &mut impl BulkTransport) -> usize {
        if self.state.current_command != Command::Read {
            return 0;
        }

        let want = usize::from(self.state.remaining());
        let can_send = tx.write_available().min(want).min(self.config.chunk_cap);
        if can_send == 0 {
            return 0;
        }

        let sent = tx.write(Bytes::from(vec![self.config.fill; can_send])).min(can_send);
        tx.flush();

        // sent <= remaining, so it fits
        self.state.handled_len += sent as u16;
        tracing::trace!("sent {sent} of {can_send} bytes, {} bytes remaining", self.state.remaining());

        if self.state.handled_len == self.state.expected_len {
            tracing::debug!("read command complete after {} bytes", self.state.expected_len);
            self.state = ProtocolState::IDLE;
        }

        sent
    }

    fn send_status(status: StatusFrame, tx: &mut impl BulkTransport) -> bool {
        let available = tx.write_available();
        if available < STATUS_LEN {
            tracing::warn!("dropping status {status}, only {available} bytes of transport space");
            return false;
        }

        tracing::debug!("sending status {status}");
        let written = tx.write(Bytes::copy_from_slice(&status.to_bytes()));
        tx.flush();
        if written < STATUS_LEN {
            tracing::warn!("transport accepted only {written} of {STATUS_LEN} status bytes");
        }
        written == STATUS_LEN
    }
}
