//! Opening the serial device.

use crate::{Error, Result};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};
use tracing::debug;

/// Byte stream the link reads lines from and writes frames to.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialIo for T {}

/// Something that can open a fresh connection to the controller.
pub trait PortOpener: Send + Sync + 'static {
    /// Opens the connection.
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn SerialIo>>>;

    /// Human readable location of the device, for logging.
    fn describe(&self) -> String;
}

/// Opens a serial device with the controller's fixed line settings (8-N-1, no flow control).
pub struct SerialOpener {
    port_path: String,
    baud_rate: u32,
}

impl SerialOpener {
    /// Creates an opener for the given device path.
    pub fn new(port_path: &str, baud_rate: u32) -> Self {
        Self {
            port_path: port_path.to_string(),
            baud_rate,
        }
    }
}

impl PortOpener for SerialOpener {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn SerialIo>>> {
        Box::pin(async move {
            let port = tokio_serial::new(&self.port_path, self.baud_rate)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .open_native_async()
                .map_err(|e| {
                    if let tokio_serial::ErrorKind::Io(kind) = &e.kind {
                        if *kind == std::io::ErrorKind::NotFound
                            && !std::path::Path::new(&self.port_path).exists()
                        {
                            return Error::DeviceNotFound(self.port_path.clone());
                        }
                    }
                    if e.kind == tokio_serial::ErrorKind::NoDevice {
                        return Error::DeviceNotFound(self.port_path.clone());
                    }
                    Error::Serial(e)
                })?;

            debug!("Opened {} at {} baud", self.port_path, self.baud_rate);
            Ok(Box::new(port) as Box<dyn SerialIo>)
        })
    }

    fn describe(&self) -> String {
        self.port_path.clone()
    }
}
