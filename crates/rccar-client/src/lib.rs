//! D-Bus client library for communicating with the RC car bridge daemon.

use anyhow::{Context, Result};
use tracing::{debug, warn};
use zbus::{proxy, Connection};

/// Well-known bus name of the daemon.
const SERVICE_NAME: &str = "org.rccar.Bridge";

/// D-Bus bus type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusType {
    /// Session bus (user session).
    Session,
    /// System bus (system-wide).
    System,
    /// Try session first, fall back to system.
    #[default]
    Auto,
}

/// Connects to the selected bus and returns it with its name.
///
/// `Auto` takes the session bus when one is reachable and the system bus otherwise.
pub async fn connect_bus(bus_type: BusType) -> Result<(Connection, &'static str)> {
    match bus_type {
        BusType::Session => {
            debug!("Connecting to session bus");
            let conn = Connection::session()
                .await
                .context("Failed to connect to session bus")?;
            Ok((conn, "session"))
        }
        BusType::System => {
            debug!("Connecting to system bus");
            let conn = Connection::system()
                .await
                .context("Failed to connect to system bus")?;
            Ok((conn, "system"))
        }
        BusType::Auto => match Connection::session().await {
            Ok(conn) => Ok((conn, "session")),
            Err(session_err) => {
                warn!(
                    "Session bus unavailable ({}), trying system bus",
                    session_err
                );
                let conn = Connection::system().await.with_context(|| {
                    format!("Failed to connect to any D-Bus (session: {})", session_err)
                })?;
                Ok((conn, "system"))
            }
        },
    }
}

/// D-Bus proxy for the RC car bridge daemon.
#[proxy(
    interface = "org.rccar.Bridge1",
    default_service = "org.rccar.Bridge",
    default_path = "/org/rccar/Bridge"
)]
trait Bridge1 {
    /// Runs any command by name with JSON-encoded arguments.
    #[zbus(name = "Call")]
    fn call_command(&self, command: &str, args_json: &str) -> zbus::Result<String>;

    /// Sets left and right motor power.
    fn set_motor_power(&self, left: i32, right: i32) -> zbus::Result<String>;

    /// Sets the head light brightness.
    fn set_head_light(&self, brightness: i32) -> zbus::Result<String>;

    /// Sets the left and right blinkers.
    fn set_blinker(&self, left: i32, right: i32) -> zbus::Result<String>;

    /// Sets the rear light color.
    fn set_rear_light(&self, red: i32, green: i32, blue: i32) -> zbus::Result<String>;

    /// Shows text on the LCD.
    fn set_lcd(&self, text: &str) -> zbus::Result<String>;

    /// Reads the ultrasonic distance sensor.
    fn get_sonic(&self) -> zbus::Result<String>;

    /// Shuts down the daemon.
    fn quit(&self) -> zbus::Result<()>;

    /// Whether the serial port is open.
    #[zbus(property)]
    fn connected(&self) -> zbus::Result<bool>;

    /// Serial link state.
    #[zbus(property)]
    fn connection_state(&self) -> zbus::Result<String>;

    /// Last sensor value.
    #[zbus(property)]
    fn last_sonic(&self) -> zbus::Result<String>;

    /// Serial device path.
    #[zbus(property)]
    fn device(&self) -> zbus::Result<String>;
}

/// D-Bus client wrapper for the daemon.
pub struct BridgeClient {
    proxy: Bridge1Proxy<'static>,
}

impl BridgeClient {
    /// Attempts to connect to the daemon via D-Bus with auto bus detection.
    pub async fn connect() -> Result<Self> {
        Self::connect_with_bus(BusType::Auto).await
    }

    /// Attempts to connect to the daemon via D-Bus with specified bus type.
    ///
    /// With `Auto` the session bus is only used if the daemon is registered there.
    pub async fn connect_with_bus(bus_type: BusType) -> Result<Self> {
        let (connection, bus_name) = connect_bus(bus_type).await?;
        let connection = if bus_type == BusType::Auto && bus_name == "session" {
            if Self::service_exists(&connection).await {
                debug!("Found daemon on session bus");
                connection
            } else {
                debug!("Daemon not on session bus, trying system bus");
                let (sys_conn, _) = connect_bus(BusType::System).await?;
                if !Self::service_exists(&sys_conn).await {
                    anyhow::bail!(
                        "Daemon service not found on session or system bus. Is rccard running?"
                    );
                }
                sys_conn
            }
        } else {
            connection
        };

        let proxy = Bridge1Proxy::new(&connection)
            .await
            .context("Failed to create D-Bus proxy")?;

        Ok(Self { proxy })
    }

    /// Checks if the daemon service exists on the given connection.
    async fn service_exists(conn: &Connection) -> bool {
        use zbus::fdo::DBusProxy;
        use zbus::names::BusName;
        let Ok(name) = BusName::try_from(SERVICE_NAME) else {
            return false;
        };
        match DBusProxy::new(conn).await {
            Ok(dbus_proxy) => dbus_proxy.name_has_owner(name).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Runs a command by name with JSON-encoded arguments.
    pub async fn call(&self, command: &str, args_json: &str) -> Result<String> {
        self.proxy
            .call_command(command, args_json)
            .await
            .with_context(|| format!("Failed to run {} via D-Bus", command))
    }

    /// Sets left and right motor power.
    pub async fn set_motor_power(&self, left: i32, right: i32) -> Result<String> {
        self.proxy
            .set_motor_power(left, right)
            .await
            .context("Failed to set motor power via D-Bus")
    }

    /// Sets the head light brightness.
    pub async fn set_head_light(&self, brightness: i32) -> Result<String> {
        self.proxy
            .set_head_light(brightness)
            .await
            .context("Failed to set head light via D-Bus")
    }

    /// Sets the left and right blinkers.
    pub async fn set_blinker(&self, left: i32, right: i32) -> Result<String> {
        self.proxy
            .set_blinker(left, right)
            .await
            .context("Failed to set blinker via D-Bus")
    }

    /// Sets the rear light color.
    pub async fn set_rear_light(&self, red: i32, green: i32, blue: i32) -> Result<String> {
        self.proxy
            .set_rear_light(red, green, blue)
            .await
            .context("Failed to set rear light via D-Bus")
    }

    /// Shows text on the LCD.
    pub async fn set_lcd(&self, text: &str) -> Result<String> {
        self.proxy
            .set_lcd(text)
            .await
            .context("Failed to set LCD text via D-Bus")
    }

    /// Reads the ultrasonic distance sensor.
    pub async fn get_sonic(&self) -> Result<String> {
        self.proxy
            .get_sonic()
            .await
            .context("Failed to read sonic sensor via D-Bus")
    }

    /// Shuts down the daemon.
    pub async fn quit(&self) -> Result<()> {
        self.proxy
            .quit()
            .await
            .context("Failed to quit daemon via D-Bus")
    }

    /// Checks if the serial port is open.
    pub async fn is_connected(&self) -> Result<bool> {
        self.proxy
            .connected()
            .await
            .context("Failed to get connection status via D-Bus")
    }

    /// Gets the serial link state.
    pub async fn connection_state(&self) -> Result<String> {
        self.proxy
            .connection_state()
            .await
            .context("Failed to get connection state via D-Bus")
    }

    /// Gets the last sensor value.
    pub async fn last_sonic(&self) -> Result<String> {
        self.proxy
            .last_sonic()
            .await
            .context("Failed to get last sensor value via D-Bus")
    }

    /// Gets the serial device path.
    pub async fn device(&self) -> Result<String> {
        self.proxy
            .device()
            .await
            .context("Failed to get device path via D-Bus")
    }
}
