//! RC Car Serial Link Library
//!
//! Drives the Arduino controller of the RC car over a line-based serial
//! protocol: motor power, lights, the LCD, and the ultrasonic distance sensor.

pub mod error;
pub mod link;

pub use error::{Error, Result};
pub use link::{
    Backoff, Command, ConnectionState, PortOpener, RetryPolicy, SerialIo, SerialLink,
    SerialOpener, SonicRead,
};

/// Serial device used when none is configured.
pub const DEFAULT_DEVICE: &str = "/dev/ttyACM0";

/// Controller baud rate.
pub const BAUD_RATE: u32 = 9600;
