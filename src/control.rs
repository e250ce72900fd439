//! Control request dispatcher.
//!
//! Only class requests addressed to the vendor interface are handled. Anything
//! else, including a request with the wrong transfer direction, is rejected
//! without a response and the host's own timeout governs recovery.

use bytes::Bytes;
use std::io::{Error, ErrorKind, Result};

use crate::{
    engine::Engine,
    transport::ControlTransport,
    CTRL_ECHO, CTRL_ENTER_PROGRAMMING_MODE, CTRL_GIT_REVISION, CTRL_INIT, CTRL_PLATFORM_SDK_VERSION,
    CTRL_REPLY_LEN, CTRL_RESET, CTRL_SHUTDOWN, CTRL_TOOLCHAIN_VERSION, VENDOR_INTERFACE,
};

/// Length of a USB setup packet.
pub const SETUP_LEN: usize = 8;

/// Transfer direction of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

/// Type of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Standard request.
    Standard,
    /// Class request.
    Class,
    /// Vendor request.
    Vendor,
    /// Reserved request type.
    Reserved,
}

/// Recipient of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Device.
    Device,
    /// Interface given by the index field.
    Interface,
    /// Endpoint given by the index field.
    Endpoint,
    /// Other.
    Other,
    /// Reserved recipient code.
    Reserved(u8),
}

/// Control request as received in the setup stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlRequest {
    /// Transfer direction.
    pub direction: Direction,
    /// Request type.
    pub request_type: RequestType,
    /// Recipient.
    pub recipient: Recipient,
    /// Request id.
    pub request: u8,
    /// Value field.
    pub value: u16,
    /// Index field, the interface number for interface requests.
    pub index: u16,
    /// Maximum length of the data stage.
    pub length: u16,
}

impl ControlRequest {
    /// Creates a class request addressed to an interface.
    ///
    /// IN requests allow a data stage of [`CTRL_REPLY_LEN`] bytes.
    pub fn class(direction: Direction, request: u8, interface: u8) -> Self {
        let length = match direction {
            Direction::In => CTRL_REPLY_LEN as u16,
            Direction::Out => 0,
        };
        Self {
            direction,
            request_type: RequestType::Class,
            recipient: Recipient::Interface,
            request,
            value: 0,
            index: interface.into(),
            length,
        }
    }

    /// Sets the maximum length of the data stage.
    pub fn with_length(mut self, length: u16) -> Self {
        self.length = length;
        self
    }

    /// Decodes a `bmRequestType` byte together with the remaining fields.
    pub fn from_parts(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        let direction = if request_type & 0x80 != 0 { Direction::In } else { Direction::Out };
        let kind = match (request_type >> 5) & 0x03 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        };
        let recipient = match request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            other => Recipient::Reserved(other),
        };
        Self { direction, request_type: kind, recipient, request, value, index, length }
    }

    /// Parses a setup packet.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(setup) = data.get(..SETUP_LEN) else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("setup packet must be {SETUP_LEN} bytes, got {}", data.len()),
            ));
        };
        let word = |i: usize| u16::from_le_bytes([setup[i], setup[i + 1]]);
        Ok(Self::from_parts(setup[0], setup[1], word(2), word(4), word(6)))
    }

    /// Encoded `bmRequestType`.
    pub fn request_type_byte(&self) -> u8 {
        let dir = match self.direction {
            Direction::In => 0x80,
            Direction::Out => 0x00,
        };
        let kind = match self.request_type {
            RequestType::Standard => 0,
            RequestType::Class => 1,
            RequestType::Vendor => 2,
            RequestType::Reserved => 3,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0,
            Recipient::Interface => 1,
            Recipient::Endpoint => 2,
            Recipient::Other => 3,
            Recipient::Reserved(code) => code & 0x1f,
        };
        dir | (kind << 5) | recipient
    }

    /// Encodes the setup packet.
    pub fn to_bytes(&self) -> [u8; SETUP_LEN] {
        let [value_lo, value_hi] = self.value.to_le_bytes();
        let [index_lo, index_hi] = self.index.to_le_bytes();
        let [length_lo, length_hi] = self.length.to_le_bytes();
        [self.request_type_byte(), self.request, value_lo, value_hi, index_lo, index_hi, length_lo, length_hi]
    }

    /// Addressed interface, if the request targets one.
    pub fn interface(&self) -> Option<u8> {
        match self.recipient {
            Recipient::Interface => u8::try_from(self.index).ok(),
            _ => None,
        }
    }
}

/// Stage of a control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlStage {
    /// Setup stage, the request is dispatched here.
    Setup,
    /// Data stage.
    Data,
    /// Status stage.
    Ack,
}

/// Result of dispatching a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Send this reply, possibly empty.
    Reply(Bytes),
    /// The bulk protocol was reset. Discard outbound bulk data queued by the
    /// abandoned transfer, then send this reply.
    ResetReply(Bytes),
    /// Acknowledge a later stage of an accepted transfer.
    Acknowledge,
    /// Reject the request without a response.
    Reject,
    /// Reboot into programming mode. The transfer is not completed.
    EnterProgrammingMode,
}

/// Control dispatcher configuration.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    interface: u8,
    firmware_version: u8,
    capabilities: u8,
    git_revision: String,
    toolchain_version: String,
    platform_sdk_version: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interface: VENDOR_INTERFACE,
            firmware_version: 0x08,
            capabilities: 0x03,
            git_revision: env!("VBC_GIT_REVISION").to_string(),
            toolchain_version: env!("VBC_RUSTC_VERSION").to_string(),
            platform_sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ControlConfig {
    /// Sets the vendor interface number.
    pub fn with_interface(mut self, interface: u8) -> Self {
        self.interface = interface;
        self
    }

    /// Sets the firmware version reported by the init request.
    pub fn with_firmware_version(mut self, firmware_version: u8) -> Self {
        self.firmware_version = firmware_version;
        self
    }

    /// Sets the capability flags reported by the init request.
    pub fn with_capabilities(mut self, capabilities: u8) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the revision string. Only the first 8 bytes are reported.
    pub fn with_git_revision(mut self, git_revision: impl Into<String>) -> Self {
        self.git_revision = git_revision.into();
        self
    }

    /// Sets the toolchain version string. Only the first 8 bytes are reported.
    pub fn with_toolchain_version(mut self, toolchain_version: impl Into<String>) -> Self {
        self.toolchain_version = toolchain_version.into();
        self
    }

    /// Sets the platform SDK version string. Only the first 8 bytes are reported.
    pub fn with_platform_sdk_version(mut self, platform_sdk_version: impl Into<String>) -> Self {
        self.platform_sdk_version = platform_sdk_version.into();
        self
    }

    /// Vendor interface number.
    pub fn interface(&self) -> u8 {
        self.interface
    }

    /// Reply to the init request.
    pub fn init_record(&self) -> [u8; CTRL_REPLY_LEN] {
        let mut record = [0; CTRL_REPLY_LEN];
        record[0] = self.firmware_version;
        record[1] = self.capabilities;
        record
    }
}

/// Copies a string into a zero-filled reply buffer, truncating it.
fn fixed_str(s: &str) -> Bytes {
    let mut buf = [0; CTRL_REPLY_LEN];
    let n = s.len().min(CTRL_REPLY_LEN);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    Bytes::copy_from_slice(&buf)
}

/// Control request dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ControlDispatcher {
    config: ControlConfig,
}

impl ControlDispatcher {
    /// Creates a new dispatcher.
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    /// Configuration.
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Decides how to answer a control request.
    ///
    /// An accepted init request resets `engine` and yields
    /// [`ControlOutcome::ResetReply`]. Replies are truncated to the length
    /// requested by the host.
    pub fn dispatch(&self, engine: &mut Engine, stage: ControlStage, req: &ControlRequest) -> ControlOutcome {
        tracing::debug!("control transfer: stage={stage:?} {req:?}");

        if req.request_type != RequestType::Class {
            tracing::debug!("ignoring control request of type {:?}", req.request_type);
            return ControlOutcome::Reject;
        }

        if req.interface() != Some(self.config.interface) {
            tracing::debug!("ignoring control request for interface 0x{:02x}", req.index);
            return ControlOutcome::Reject;
        }

        if stage != ControlStage::Setup {
            return ControlOutcome::Acknowledge;
        }

        let (name, direction) = match req.request {
            CTRL_ECHO => ("echo", Direction::In),
            CTRL_INIT => ("init", Direction::In),
            CTRL_RESET => ("reset", Direction::Out),
            CTRL_SHUTDOWN => ("shutdown", Direction::Out),
            CTRL_ENTER_PROGRAMMING_MODE => ("enter programming mode", Direction::Out),
            CTRL_GIT_REVISION => ("git revision", Direction::In),
            CTRL_TOOLCHAIN_VERSION => ("toolchain version", Direction::In),
            CTRL_PLATFORM_SDK_VERSION => ("platform SDK version", Direction::In),
            other => {
                tracing::warn!("unsupported control request 0x{other:02x} ({:?})", req.direction);
                return ControlOutcome::Reject;
            }
        };

        tracing::info!("control request: {name}");
        if req.direction != direction {
            tracing::warn!("control request {name} with unexpected direction {:?}", req.direction);
            return ControlOutcome::Reject;
        }

        let truncated = |mut reply: Bytes| {
            reply.truncate(req.length.into());
            reply
        };

        let reply = match req.request {
            CTRL_ECHO => Bytes::from_static(&[CTRL_ECHO]),
            CTRL_INIT => {
                engine.reset();
                return ControlOutcome::ResetReply(truncated(Bytes::copy_from_slice(&self.config.init_record())));
            }
            CTRL_ENTER_PROGRAMMING_MODE => return ControlOutcome::EnterProgrammingMode,
            CTRL_GIT_REVISION => fixed_str(&self.config.git_revision),
            CTRL_TOOLCHAIN_VERSION => fixed_str(&self.config.toolchain_version),
            CTRL_PLATFORM_SDK_VERSION => fixed_str(&self.config.platform_sdk_version),
            _ => Bytes::new(),
        };

        ControlOutcome::Reply(truncated(reply))
    }

    /// Dispatches a control request and carries out the outcome on `transport`.
    ///
    /// Returns `false` if the request was rejected or the transfer was not
    /// completed.
    pub fn handle(
        &self, engine: &mut Engine, stage: ControlStage, req: &ControlRequest, transport: &mut impl ControlTransport,
    ) -> bool {
        match self.dispatch(engine, stage, req) {
            ControlOutcome::Reply(data) => transport.send_control_response(data),
            ControlOutcome::ResetReply(data) => {
                transport.discard_bulk();
                transport.send_control_response(data)
            }
            ControlOutcome::Acknowledge => true,
            ControlOutcome::Reject => false,
            ControlOutcome::EnterProgrammingMode => {
                tracing::info!("rebooting into programming mode");
                transport.reboot_into_programming_mode();
                false
            }
        }
    }
}
