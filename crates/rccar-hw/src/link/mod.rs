//! Serial link module.
//!
//! Connection management, frame encoding and sensor replies for the
//! controller on the other end of the serial port.

mod device;
mod port;
pub mod protocol;
mod retry;
mod sensor;

pub use device::{ConnectionState, SerialLink, SonicRead};
pub use port::{PortOpener, SerialIo, SerialOpener};
pub use protocol::Command;
pub use retry::{Backoff, RetryPolicy};
