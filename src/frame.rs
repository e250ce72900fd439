//! Bulk command and status frames.

use std::{
    fmt,
    io::{Error, ErrorKind, Result},
};

use crate::{CMD_READ, CMD_WRITE, COMMAND_LEN, PROTO_DEFAULT, STATUS_LEN};

/// Bulk command opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Device streams the payload to the host.
    Read,
    /// Host sends the payload to the device.
    Write,
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Read => CMD_READ,
            Opcode::Write => CMD_WRITE,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            CMD_READ => Ok(Self::Read),
            CMD_WRITE => Ok(Self::Write),
            other => Err(Error::new(ErrorKind::InvalidData, format!("unknown opcode 0x{other:02x}"))),
        }
    }
}

/// Command frame sent by the host on the bulk OUT endpoint.
///
/// Wire layout: opcode, protocol id, payload length (little endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandFrame {
    /// Raw opcode.
    pub opcode: u8,
    /// Protocol id, passed through unchanged.
    pub protocol_id: u8,
    /// Length of the payload following (write) or requested (read).
    pub payload_len: u16,
}

impl CommandFrame {
    /// Creates a write command.
    pub const fn write(protocol_id: u8, payload_len: u16) -> Self {
        Self { opcode: CMD_WRITE, protocol_id, payload_len }
    }

    /// Creates a read command.
    pub const fn read(protocol_id: u8, payload_len: u16) -> Self {
        Self { opcode: CMD_READ, protocol_id, payload_len }
    }

    /// Parses a command frame.
    ///
    /// Fails unless `data` is exactly [`COMMAND_LEN`] bytes long.
    /// The opcode is not validated, see [`opcode`](Self::opcode).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let &[opcode, protocol_id, lo, hi] = data else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("command frame must be {COMMAND_LEN} bytes, got {}", data.len()),
            ));
        };
        Ok(Self { opcode, protocol_id, payload_len: u16::from_le_bytes([lo, hi]) })
    }

    /// Decoded opcode.
    pub fn opcode(&self) -> Result<Opcode> {
        Opcode::try_from(self.opcode)
    }

    /// Encodes the frame.
    pub fn to_bytes(&self) -> [u8; COMMAND_LEN] {
        let [lo, hi] = self.payload_len.to_le_bytes();
        [self.opcode, self.protocol_id, lo, hi]
    }
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self::write(PROTO_DEFAULT, 0)
    }
}

/// Status code of a status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Device is busy with another command.
    Busy = 1,
    /// Command completed.
    Ready = 2,
    /// Command was rejected.
    Error = 3,
}

impl TryFrom<u8> for Status {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Status::Busy),
            2 => Ok(Status::Ready),
            3 => Ok(Status::Error),
            other => Err(Error::new(ErrorKind::InvalidData, format!("unknown status code {other}"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Busy => write!(f, "busy"),
            Status::Ready => write!(f, "ready"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Status frame sent by the device on the bulk IN endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusFrame {
    /// Status code.
    pub status: Status,
    /// Payload length echoed back to the host.
    pub payload_len: u16,
}

impl StatusFrame {
    /// Creates a new status frame.
    pub const fn new(status: Status, payload_len: u16) -> Self {
        Self { status, payload_len }
    }

    /// Parses a status frame.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let &[status, lo, hi] = data else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("status frame must be {STATUS_LEN} bytes, got {}", data.len()),
            ));
        };
        Ok(Self { status: Status::try_from(status)?, payload_len: u16::from_le_bytes([lo, hi]) })
    }

    /// Encodes the frame.
    pub fn to_bytes(&self) -> [u8; STATUS_LEN] {
        let [lo, hi] = self.payload_len.to_le_bytes();
        [self.status as u8, lo, hi]
    }
}

impl fmt::Display for StatusFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.status, self.payload_len)
    }
}
