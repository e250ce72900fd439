//! Host-side client.
//!
//! To talk to a device, use [`rusb`] to open the target device, locate the
//! vendor interface with [`find_interface`] and pass both to [`VbcDevice::open`].
//!
//! All errors returned from this module have an inner error type of [`rusb::Error`],
//! except for protocol violations by the device, which are of kind
//! [`ErrorKind::InvalidData`].

use rusb::{request_type, Device, DeviceHandle, Recipient, RequestType, TransferType, UsbContext};
use std::{
    fmt,
    io::{Error, ErrorKind, Result},
    time::Duration,
};

use crate::{
    control::{ControlRequest, Direction},
    frame::{CommandFrame, Status, StatusFrame},
    Class, CTRL_ECHO, CTRL_ENTER_PROGRAMMING_MODE, CTRL_GIT_REVISION, CTRL_INIT, CTRL_PLATFORM_SDK_VERSION,
    CTRL_REPLY_LEN, CTRL_RESET, CTRL_SHUTDOWN, CTRL_TOOLCHAIN_VERSION, MAX_PACKET_SIZE, STATUS_LEN,
};

const IN_REQUEST: u8 = request_type(rusb::Direction::In, RequestType::Class, Recipient::Interface);
const OUT_REQUEST: u8 = request_type(rusb::Direction::Out, RequestType::Class, Recipient::Interface);

const TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) fn to_io_err(error: rusb::Error) -> Error {
    let kind = match error {
        rusb::Error::Io => ErrorKind::ConnectionAborted,
        rusb::Error::InvalidParam => ErrorKind::InvalidInput,
        rusb::Error::Access => ErrorKind::PermissionDenied,
        rusb::Error::NoDevice => ErrorKind::NotFound,
        rusb::Error::NotFound => ErrorKind::NotFound,
        rusb::Error::Busy => ErrorKind::AddrInUse,
        rusb::Error::Timeout => ErrorKind::TimedOut,
        rusb::Error::Overflow => ErrorKind::OutOfMemory,
        rusb::Error::Pipe => ErrorKind::BrokenPipe,
        rusb::Error::Interrupted => ErrorKind::Interrupted,
        rusb::Error::NoMem => ErrorKind::OutOfMemory,
        rusb::Error::NotSupported => ErrorKind::Unsupported,
        rusb::Error::BadDescriptor => ErrorKind::InvalidInput,
        rusb::Error::Other => ErrorKind::Other,
    };

    Error::new(kind, error)
}

/// Finds the interface by interface class.
///
/// Returns the interface number.
pub fn find_interface<C: UsbContext>(dev: &Device<C>, class: Class) -> Result<u8> {
    let cfg = dev.active_config_descriptor().map_err(to_io_err)?;
    for iface in cfg.interfaces() {
        for desc in iface.descriptors() {
            if desc.class_code() == class.class
                && desc.sub_class_code() == class.sub_class
                && desc.protocol_code() == class.protocol
            {
                return Ok(desc.interface_number());
            }
        }
    }

    Err(Error::new(ErrorKind::NotFound, rusb::Error::NotFound))
}

/// Reply to the init request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitInfo {
    /// Firmware version.
    pub firmware_version: u8,
    /// Capability flags.
    pub capabilities: u8,
}

/// Interprets a fixed-size version reply.
fn version_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Connection to the vendor interface of a device.
pub struct VbcDevice<C: UsbContext> {
    hnd: DeviceHandle<C>,
    interface: u8,
    ep_in: u8,
    ep_out: u8,
    max_packet_size: usize,
    timeout: Duration,
}

impl<C: UsbContext> fmt::Debug for VbcDevice<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("VbcDevice")
            .field("interface", &self.interface)
            .field("ep_in", &self.ep_in)
            .field("ep_out", &self.ep_out)
            .finish()
    }
}

impl<C: UsbContext> VbcDevice<C> {
    /// Claims the specified interface and locates its bulk endpoints.
    ///
    /// Use [`find_interface`] to determine the `interface` number.
    pub fn open(hnd: DeviceHandle<C>, interface: u8) -> Result<Self> {
        let dev = hnd.device();

        // Get endpoints.
        let mut ep_in = None;
        let mut ep_out = None;
        let mut max_packet_size = MAX_PACKET_SIZE;
        {
            let cfg = dev.active_config_descriptor().map_err(to_io_err)?;
            let iface_desc =
                cfg.interfaces().find(|i| i.number() == interface).ok_or(rusb::Error::NotFound).map_err(to_io_err)?;
            for desc in iface_desc.descriptors() {
                for ep in desc.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    max_packet_size = max_packet_size.min(ep.max_packet_size().into());
                    match ep.direction() {
                        rusb::Direction::In => ep_in = Some(ep.address()),
                        rusb::Direction::Out => ep_out = Some(ep.address()),
                    }
                }
            }
        }
        let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) else {
            return Err(rusb::Error::NotFound).map_err(to_io_err);
        };

        hnd.claim_interface(interface).map_err(to_io_err)?;
        tracing::debug!("claimed interface {interface}, bulk IN 0x{ep_in:02x}, bulk OUT 0x{ep_out:02x}");

        Ok(Self { hnd, interface, ep_in, ep_out, max_packet_size, timeout: TIMEOUT })
    }

    /// Sets the timeout of individual USB transfers.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Device handle.
    pub fn handle(&self) -> &DeviceHandle<C> {
        &self.hnd
    }

    /// Interface number.
    pub fn interface(&self) -> u8 {
        self.interface
    }

    /// Sends a class control request to the interface and receives up to
    /// `len` bytes of reply.
    pub fn control_in(&self, request: u8, value: u16, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        let n = self
            .hnd
            .read_control(IN_REQUEST, request, value, self.interface.into(), &mut buf, self.timeout)
            .map_err(to_io_err)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Sends a class control request with `data` to the interface.
    ///
    /// Returns the number of bytes sent.
    pub fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<usize> {
        self.hnd
            .write_control(OUT_REQUEST, request, value, self.interface.into(), data, self.timeout)
            .map_err(to_io_err)
    }

    /// Performs an arbitrary control transfer described by `req`.
    ///
    /// For device-to-host requests `req.length` bytes are requested and the
    /// reply is returned; otherwise `data` is sent and an empty vector is
    /// returned.
    pub fn raw_control(&self, req: &ControlRequest, data: &[u8]) -> Result<Vec<u8>> {
        tracing::debug!("raw control transfer {req:?}");
        match req.direction {
            Direction::In => {
                let mut buf = vec![0; req.length.into()];
                let n = self
                    .hnd
                    .read_control(req.request_type_byte(), req.request, req.value, req.index, &mut buf, self.timeout)
                    .map_err(to_io_err)?;
                buf.truncate(n);
                Ok(buf)
            }
            Direction::Out => {
                self.hnd
                    .write_control(req.request_type_byte(), req.request, req.value, req.index, data, self.timeout)
                    .map_err(to_io_err)?;
                Ok(Vec::new())
            }
        }
    }

    /// Sends `data` in a single transfer on the bulk OUT endpoint.
    ///
    /// Returns the number of bytes sent.
    pub fn write_bulk(&self, data: &[u8]) -> Result<usize> {
        self.hnd.write_bulk(self.ep_out, data, self.timeout).map_err(to_io_err)
    }

    /// Receives a single transfer of at most `len` bytes from the bulk IN endpoint.
    pub fn read_bulk(&self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        let n = self.hnd.read_bulk(self.ep_in, &mut buf, self.timeout).map_err(to_io_err)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn query(&self, request: u8) -> Result<Vec<u8>> {
        self.control_in(request, 0, CTRL_REPLY_LEN)
    }

    /// Sends the echo request and returns the echoed byte.
    pub fn echo(&self) -> Result<u8> {
        let reply = self.query(CTRL_ECHO)?;
        match reply.as_slice() {
            &[echo] => Ok(echo),
            other => Err(Error::new(ErrorKind::InvalidData, format!("echo reply has {} bytes", other.len()))),
        }
    }

    /// Initializes protocol handling, abandoning any bulk command in flight.
    pub fn init(&self) -> Result<InitInfo> {
        let reply = self.query(CTRL_INIT)?;
        match reply.as_slice() {
            &[firmware_version, capabilities, ..] => Ok(InitInfo { firmware_version, capabilities }),
            other => Err(Error::new(ErrorKind::InvalidData, format!("init reply has {} bytes", other.len()))),
        }
    }

    /// Sends the reset request.
    pub fn reset(&self) -> Result<()> {
        self.control_out(CTRL_RESET, 0, &[])?;
        Ok(())
    }

    /// Sends the shutdown request.
    pub fn shutdown(&self) -> Result<()> {
        self.control_out(CTRL_SHUTDOWN, 0, &[])?;
        Ok(())
    }

    /// Reboots the device into its programming mode.
    ///
    /// The device does not complete this request, so transfer failures
    /// caused by it going away are not reported.
    pub fn enter_programming_mode(&self) -> Result<()> {
        match self.hnd.write_control(
            OUT_REQUEST,
            CTRL_ENTER_PROGRAMMING_MODE,
            0,
            self.interface.into(),
            &[],
            self.timeout,
        ) {
            Ok(_) => Ok(()),
            Err(err @ (rusb::Error::Pipe | rusb::Error::NoDevice | rusb::Error::Io | rusb::Error::Timeout)) => {
                tracing::debug!("device left during programming mode request: {err}");
                Ok(())
            }
            Err(err) => Err(to_io_err(err)),
        }
    }

    /// Revision the firmware was built from.
    pub fn git_revision(&self) -> Result<String> {
        Ok(version_string(&self.query(CTRL_GIT_REVISION)?))
    }

    /// Compiler version the firmware was built with.
    pub fn toolchain_version(&self) -> Result<String> {
        Ok(version_string(&self.query(CTRL_TOOLCHAIN_VERSION)?))
    }

    /// Platform SDK version the firmware was built with.
    pub fn platform_sdk_version(&self) -> Result<String> {
        Ok(version_string(&self.query(CTRL_PLATFORM_SDK_VERSION)?))
    }

    /// Sends a raw command frame.
    pub fn command(&self, frame: CommandFrame) -> Result<()> {
        tracing::debug!("sending command {frame:?}");
        let data = frame.to_bytes();
        if self.write_bulk(&data)? != data.len() {
            return Err(Error::new(ErrorKind::WriteZero, "command frame was not sent completely"));
        }
        Ok(())
    }

    /// Receives a status frame.
    pub fn read_status(&self) -> Result<StatusFrame> {
        let mut buf = vec![0; self.max_packet_size.max(STATUS_LEN)];
        let n = self.hnd.read_bulk(self.ep_in, &mut buf, self.timeout).map_err(to_io_err)?;
        let status = StatusFrame::parse(&buf[..n])?;
        tracing::debug!("received status {status}");
        Ok(status)
    }

    /// Writes `data` using a write command and waits for its status.
    pub fn write(&self, protocol_id: u8, data: &[u8]) -> Result<StatusFrame> {
        let len = u16::try_from(data.len())
            .map_err(|_| Error::new(ErrorKind::InvalidInput, format!("payload of {} bytes too long", data.len())))?;

        self.command(CommandFrame::write(protocol_id, len))?;
        for chunk in data.chunks(self.max_packet_size) {
            self.hnd.write_bulk(self.ep_out, chunk, self.timeout).map_err(to_io_err)?;
        }

        let status = self.read_status()?;
        if status != StatusFrame::new(Status::Ready, len) {
            return Err(Error::new(ErrorKind::InvalidData, format!("write of {len} bytes failed: {status}")));
        }
        Ok(status)
    }

    /// Reads `len` bytes using a read command.
    pub fn read(&self, protocol_id: u8, len: u16) -> Result<Vec<u8>> {
        self.command(CommandFrame::read(protocol_id, len))?;

        let len = usize::from(len);
        let mut data = vec![0; len];
        let mut received = 0;
        while received < len {
            let n = self.hnd.read_bulk(self.ep_in, &mut data[received..], self.timeout).map_err(to_io_err)?;
            if n == 0 {
                return Err(Error::new(ErrorKind::UnexpectedEof, format!("read ended after {received} of {len} bytes")));
            }
            received += n;
        }

        Ok(data)
    }
}
