//! Raw USB access for debugging the vendor interface.
//!
//! Lists devices, performs arbitrary control transfers and single bulk
//! transfers on the vendor interface, printing replies as hex and ASCII.

use clap::{Parser, Subcommand, ValueEnum};
use std::process::exit;

use vbc::{
    control::{ControlRequest, Direction},
    host::{find_interface, VbcDevice},
    MAX_PACKET_SIZE,
};

mod common;
use common::*;

#[derive(Parser, Debug)]
#[command(name = "usbcmd", about = "USB control and bulk transfer tool")]
struct Args {
    /// Vendor id (hex with 0x or decimal)
    #[arg(long, value_parser = parse_u16, default_value_t = VID)]
    vid: u16,

    /// Product id (hex with 0x or decimal)
    #[arg(long, value_parser = parse_u16, default_value_t = PID)]
    pid: u16,

    /// Interface number, located by class when omitted
    #[arg(long)]
    interface: Option<u8>,

    #[command(subcommand)]
    cmd: Cmd,
}

/// Hex data given as `0x...`.
#[derive(Clone, Debug)]
struct Data(Vec<u8>);

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dir {
    In,
    Out,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List USB devices
    List,
    /// Control transfer
    Control {
        direction: Dir,
        /// Request type without the direction bit (hex with 0x or decimal)
        #[arg(short = 't', long = "type", value_parser = parse_u8)]
        request_type: u8,
        /// Request (hex with 0x or decimal)
        #[arg(short, long, value_parser = parse_u8)]
        request: u8,
        /// Value (hex with 0x or decimal)
        #[arg(short, long, value_parser = parse_u16, default_value_t = 0)]
        value: u16,
        /// Index (hex with 0x or decimal)
        #[arg(short, long, value_parser = parse_u16, default_value_t = 0)]
        index: u16,
        /// Data to send (hex with 0x)
        #[arg(short, long, value_parser = parse_data)]
        data: Option<Data>,
        /// Length of IN transfer
        #[arg(short, long, default_value_t = 64)]
        length: u16,
    },
    /// Bulk transfer on the interface's bulk endpoints
    Bulk {
        direction: Dir,
        /// Data to send (hex with 0x)
        #[arg(short, long, value_parser = parse_data)]
        data: Option<Data>,
        /// Length of IN transfer
        #[arg(short, long, default_value_t = MAX_PACKET_SIZE)]
        length: usize,
    },
}

fn parse_int(s: &str) -> Result<u64, String> {
    let res = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    res.map_err(|err| format!("invalid number {s}: {err}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_int(s)?).map_err(|err| format!("{s}: {err}"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_int(s)?).map_err(|err| format!("{s}: {err}"))
}

fn parse_data(s: &str) -> Result<Data, String> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).ok_or("data must start with 0x")?;
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err("hex string must have an even number of hex digits".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|err| format!("invalid hex string: {err}")))
        .collect::<Result<_, _>>()
        .map(Data)
}

fn print_data(data: &[u8]) {
    let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
    let ascii: String = data.iter().map(|&b| if (32..=126).contains(&b) { b as char } else { '.' }).collect();
    println!("Received (hex): 0x{hex}");
    println!("Received (ASCII): {ascii}");
}

fn run(args: Args) -> std::io::Result<()> {
    if let Cmd::List = args.cmd {
        for dev in rusb::devices().map_err(std::io::Error::other)?.iter() {
            if let Ok(desc) = dev.device_descriptor() {
                println!("ID {:04x}:{:04x}", desc.vendor_id(), desc.product_id());
            }
        }
        return Ok(());
    }

    let Some(hnd) = rusb::open_device_with_vid_pid(args.vid, args.pid) else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("device {:04x}:{:04x} not found", args.vid, args.pid),
        ));
    };
    let iface = match args.interface {
        Some(iface) => iface,
        None => find_interface(&hnd.device(), CLASS)?,
    };
    let dev = VbcDevice::open(hnd, iface)?;

    match args.cmd {
        Cmd::List => (),
        Cmd::Control { direction, request_type, request, value, index, data, length } => {
            let dir_bit = match direction {
                Dir::In => 0x80,
                Dir::Out => 0x00,
            };
            let req = ControlRequest::from_parts(dir_bit | (request_type & 0x7f), request, value, index, length);
            let reply = dev.raw_control(&req, &data.map(|d| d.0).unwrap_or_default())?;
            if req.direction == Direction::In {
                print_data(&reply);
            }
        }
        Cmd::Bulk { direction: Dir::Out, data, .. } => {
            let n = dev.write_bulk(&data.map(|d| d.0).unwrap_or_default())?;
            println!("Sent {n} bytes");
        }
        Cmd::Bulk { direction: Dir::In, length, .. } => print_data(&dev.read_bulk(length)?),
    }

    Ok(())
}

fn main() {
    init_log();

    if let Err(err) = run(Args::parse()) {
        eprintln!("Error: {err}");
        exit(1);
    }
}
