//! Device-side example.

use std::time::Duration;
use tokio::time::sleep;
use usb_gadget::{default_udc, Config, Gadget, Id, Strings};

use vbc::{
    control::ControlConfig,
    device::{Exit, InterfaceId, VbcFunction},
    engine::EngineConfig,
    Class,
};

mod common;
use common::*;

const DEVICE_CLASS: Class = Class::vendor_specific(0xff, 0);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_log();

    usb_gadget::remove_all().expect("cannot remove all USB gadgets");
    sleep(Duration::from_secs(1)).await;

    println!("Creating VBC function...");
    let (mut vbc, hnd) = VbcFunction::with_config(
        InterfaceId::new(CLASS).with_name(NAME),
        EngineConfig::default(),
        ControlConfig::default().with_platform_sdk_version("gadget"),
    );

    println!("Registering gadget...");
    let udc = default_udc().expect("cannot get UDC");
    let reg = Gadget::new(DEVICE_CLASS.into(), Id::new(VID, PID), Strings::new("vbc", "demo", "000"))
        .with_config(Config::new("config").with_function(hnd))
        .bind(&udc)
        .expect("cannot bind to UDC");
    assert!(reg.is_attached());

    println!("Serving requests...");
    match vbc.wait().await.expect("protocol driver failed") {
        Exit::Unbound => println!("Function unbound"),
        Exit::ProgrammingMode => println!("Host requested programming mode, exiting"),
    }
}
