//! D-Bus interface implementation using zbus.
//!
//! Provides the `org.rccar.Bridge1` interface.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};
use zbus::{interface, Connection};

use crate::config::DbusBusType;
use crate::dispatcher::{DispatchError, Dispatcher};

/// Well-known bus name of the daemon.
pub const SERVICE_NAME: &str = "org.rccar.Bridge";

/// Object path the interface is served at.
pub const OBJECT_PATH: &str = "/org/rccar/Bridge";

/// D-Bus interface implementation for the bridge daemon.
pub struct Bridge1Interface {
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
}

impl Bridge1Interface {
    /// Creates a new D-Bus interface.
    pub fn new(dispatcher: Arc<Dispatcher>, shutdown_tx: tokio::sync::mpsc::Sender<()>) -> Self {
        Self {
            dispatcher,
            shutdown_tx,
        }
    }

    async fn run(&self, command: &str, args: Value) -> zbus::fdo::Result<String> {
        let reply = self.dispatcher.invoke(command, &args).await;
        debug!("D-Bus: {}({}) -> {:?}", command, args, reply);
        reply.map_err(to_fdo)
    }
}

fn to_fdo(e: DispatchError) -> zbus::fdo::Error {
    match e {
        DispatchError::UnknownCommand(_) => zbus::fdo::Error::UnknownMethod(e.to_string()),
        DispatchError::Link(rccar_hw::Error::SensorTimeout(_)) => {
            zbus::fdo::Error::TimedOut(e.to_string())
        }
        _ => zbus::fdo::Error::Failed(e.to_string()),
    }
}

#[interface(name = "org.rccar.Bridge1")]
impl Bridge1Interface {
    /// Runs any command by name with JSON-encoded arguments (empty string for none).
    async fn call(&self, command: &str, args_json: &str) -> zbus::fdo::Result<String> {
        let args: Value = if args_json.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(args_json)
                .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("Invalid JSON: {}", e)))?
        };
        self.run(command, args).await
    }

    /// Sets left and right motor power.
    async fn set_motor_power(&self, left: i32, right: i32) -> zbus::fdo::Result<String> {
        self.run("setMotorPower", json!({ "left": left, "right": right }))
            .await
    }

    /// Sets the head light brightness.
    async fn set_head_light(&self, brightness: i32) -> zbus::fdo::Result<String> {
        self.run("setHeadLight", json!({ "brightness": brightness }))
            .await
    }

    /// Sets the left and right blinkers.
    async fn set_blinker(&self, left: i32, right: i32) -> zbus::fdo::Result<String> {
        self.run("setBlinker", json!({ "left": left, "right": right }))
            .await
    }

    /// Sets the rear light color.
    async fn set_rear_light(&self, red: i32, green: i32, blue: i32) -> zbus::fdo::Result<String> {
        self.run(
            "setRearLight",
            json!({ "red": red, "green": green, "blue": blue }),
        )
        .await
    }

    /// Shows text on the LCD.
    async fn set_lcd(&self, text: &str) -> zbus::fdo::Result<String> {
        self.run("setLCD", json!({ "str": text })).await
    }

    /// Reads the ultrasonic distance sensor.
    async fn get_sonic(&self) -> zbus::fdo::Result<String> {
        self.run("getSonic", json!({})).await
    }

    /// Shuts down the daemon.
    async fn quit(&self) -> zbus::fdo::Result<()> {
        info!("D-Bus: Quit requested");
        self.shutdown_tx
            .send(())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(())
    }

    // Properties

    /// Whether the serial port is open.
    #[zbus(property)]
    fn connected(&self) -> bool {
        self.dispatcher.link().is_connected()
    }

    /// Serial link state: disconnected, connecting or connected.
    #[zbus(property)]
    fn connection_state(&self) -> String {
        self.dispatcher.link().state().to_string()
    }

    /// Last sensor value (empty if none since the last read began).
    #[zbus(property)]
    fn last_sonic(&self) -> String {
        self.dispatcher.link().latest_sonic().unwrap_or_default()
    }

    /// Serial device path.
    #[zbus(property)]
    fn device(&self) -> String {
        self.dispatcher.link().device()
    }
}

/// Runs the D-Bus server.
pub async fn run_dbus_server(
    dispatcher: Arc<Dispatcher>,
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
    bus_type: DbusBusType,
) -> anyhow::Result<Connection> {
    let interface = Bridge1Interface::new(dispatcher, shutdown_tx);

    let (connection, bus_name) = rccar_client::connect_bus(bus_type.into()).await?;

    connection
        .object_server()
        .at(OBJECT_PATH, interface)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to register object: {}", e))?;

    connection
        .request_name(SERVICE_NAME)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to request bus name: {}", e))?;

    info!(
        "D-Bus service registered at {} on {} bus",
        SERVICE_NAME, bus_name
    );
    Ok(connection)
}
