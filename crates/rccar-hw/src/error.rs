//! Error types for the RC car serial link library.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the controller.
#[derive(Error, Debug)]
pub enum Error {
    /// Serial device does not exist.
    #[error("Serial device not found at {0}")]
    DeviceNotFound(String),

    /// Serial port communication error.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Command name not in the controller's command table.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// No open connection to write to.
    #[error("Not connected to serial port")]
    NotConnected,

    /// A frame could not be written.
    #[error("Could not send a command - {frame}: {source}")]
    Write {
        frame: String,
        #[source]
        source: std::io::Error,
    },

    /// The retry policy gave up on opening the port.
    #[error("Gave up connecting after {0} attempts")]
    RetriesExhausted(u32),

    /// No sensor reply arrived in time.
    #[error("No sensor value received within {0:?}")]
    SensorTimeout(Duration),

    /// The pending sensor read was dropped without a value.
    #[error("Sensor read cancelled")]
    SensorCancelled,
}
