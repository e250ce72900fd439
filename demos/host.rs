//! Host-side example.

use vbc::{
    host::{find_interface, VbcDevice},
    PROTO_DEFAULT,
};

mod common;
use common::*;

fn main() {
    init_log();

    let hnd = rusb::open_device_with_vid_pid(VID, PID).expect("device not found");
    println!("Using device: {:?}", hnd.device());

    let iface = find_interface(&hnd.device(), CLASS).expect("cannot find interface");
    let dev = VbcDevice::open(hnd, iface).expect("cannot open device");
    println!("Using interface {}", dev.interface());

    println!("Echo: 0x{:02x}", dev.echo().expect("echo failed"));
    let info = dev.init().expect("init failed");
    println!("Firmware version: {}", info.firmware_version);
    println!("Capabilities: 0x{:02x}", info.capabilities);
    println!("Git revision: {}", dev.git_revision().expect("git revision failed"));
    println!("Toolchain version: {}", dev.toolchain_version().expect("toolchain version failed"));
    println!("Platform SDK version: {}", dev.platform_sdk_version().expect("platform SDK version failed"));

    let status = dev.write(PROTO_DEFAULT, &[0x55; 100]).expect("write failed");
    println!("Write status: {status}");

    let data = dev.read(PROTO_DEFAULT, 100).expect("read failed");
    println!("Read {} bytes: {}", data.len(), String::from_utf8_lossy(&data));
}
