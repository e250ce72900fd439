//! Vendor bulk command protocol (VBC).
//!
//! A host talks to the device over one vendor-specific USB interface:
//!
//! * the bulk OUT/IN endpoint pair carries 4-byte command frames, optional
//!   write payloads, read payloads streamed back by the device and 3-byte
//!   status frames acknowledging completed writes,
//! * class-type control requests on ep0 carry short administrative requests.
//!
//! The protocol core is transport independent: [`engine::Engine`] implements the
//! bulk state machine on top of [`transport::BulkTransport`] and
//! [`control::ControlDispatcher`] answers control requests.
//! The `device` feature drives both from a Linux USB gadget, the `host` feature
//! provides a client for them.

pub mod control;
pub mod engine;
pub mod frame;
pub mod transport;

#[cfg(feature = "device")]
pub mod device;

#[cfg(feature = "host")]
pub mod host;

/// Echo request.
pub const CTRL_ECHO: u8 = 0x00;
/// Initialize protocol handling.
pub const CTRL_INIT: u8 = 0x01;
/// Reset request (no-op).
pub const CTRL_RESET: u8 = 0x02;
/// Shutdown request (no-op).
pub const CTRL_SHUTDOWN: u8 = 0x03;
/// Reboot into programming mode.
pub const CTRL_ENTER_PROGRAMMING_MODE: u8 = 0x04;
/// Build-time revision string.
pub const CTRL_GIT_REVISION: u8 = 0x06;
/// Compiler version string.
pub const CTRL_TOOLCHAIN_VERSION: u8 = 0x07;
/// Platform SDK version string.
pub const CTRL_PLATFORM_SDK_VERSION: u8 = 0x08;

/// Read command opcode.
pub const CMD_READ: u8 = 8;
/// Write command opcode.
pub const CMD_WRITE: u8 = 9;

/// Default protocol id sent in command frames.
pub const PROTO_DEFAULT: u8 = 16;

/// Length of a bulk command frame.
pub const COMMAND_LEN: usize = 4;

/// Length of a bulk status frame.
pub const STATUS_LEN: usize = 3;

/// Maximum length of a control reply.
pub const CTRL_REPLY_LEN: usize = 8;

/// Bulk endpoint packet size and maximum size of a read payload chunk.
pub const MAX_PACKET_SIZE: usize = 64;

/// Vendor interface number.
pub const VENDOR_INTERFACE: u8 = 0;

/// USB interface class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Class {
    /// Class code.
    pub class: u8,
    /// Subclass code.
    pub sub_class: u8,
    /// Protocol code.
    pub protocol: u8,
}

impl Class {
    /// Vendor specific class code.
    pub const VENDOR_SPECIFIC: u8 = 0xff;

    /// Creates a new USB device or interface class.
    pub const fn new(class: u8, sub_class: u8, protocol: u8) -> Self {
        Self { class, sub_class, protocol }
    }

    /// Creates a new USB device or interface class with vendor-specific class code.
    pub const fn vendor_specific(sub_class: u8, protocol: u8) -> Self {
        Self::new(Self::VENDOR_SPECIFIC, sub_class, protocol)
    }
}

impl Default for Class {
    fn default() -> Self {
        Self::vendor_specific(0, 0)
    }
}

#[cfg(feature = "device")]
impl From<Class> for usb_gadget::Class {
    fn from(Class { class, sub_class, protocol }: Class) -> Self {
        usb_gadget::Class { class, sub_class, protocol }
    }
}

#[cfg(feature = "trace-packets")]
pub(crate) fn hex(data: &[u8]) -> String {
    use std::fmt::Write;

    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
