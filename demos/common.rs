#![allow(dead_code)]

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vbc::Class;

pub const VID: u16 = 0x1209;
pub const PID: u16 = 0x0f0f;

pub const CLASS: Class = Class::vendor_specific(22, 3);
pub const NAME: &str = "VBC-DEMO";

pub fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}
