//! RC Car Control Tool
//!
//! CLI for driving the RC car through the bridge daemon via D-Bus.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rccar_client::{BridgeClient, BusType};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum CliBusType {
    /// Try session bus first, fall back to system bus
    #[default]
    Auto,
    /// Use session bus (for user services)
    Session,
    /// Use system bus (for system services)
    System,
}

impl From<CliBusType> for BusType {
    fn from(bus: CliBusType) -> Self {
        match bus {
            CliBusType::Auto => BusType::Auto,
            CliBusType::Session => BusType::Session,
            CliBusType::System => BusType::System,
        }
    }
}

#[derive(Parser)]
#[command(name = "rccarctl")]
#[command(about = "Control tool for the RC car bridge daemon")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// D-Bus bus type to use
    #[arg(long, default_value = "auto", value_enum)]
    bus: CliBusType,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Set left and right motor power
    Motor {
        /// Left motor power
        #[arg(allow_negative_numbers = true)]
        left: i32,
        /// Right motor power
        #[arg(allow_negative_numbers = true)]
        right: i32,
    },
    /// Set head light brightness
    HeadLight {
        /// Brightness
        brightness: i32,
    },
    /// Set the blinkers
    Blinker {
        /// Left blinker
        left: i32,
        /// Right blinker
        right: i32,
    },
    /// Set the rear light color
    RearLight {
        /// Red component
        red: i32,
        /// Green component
        green: i32,
        /// Blue component
        blue: i32,
    },
    /// Show text on the LCD
    Lcd {
        /// Text to display
        text: String,
    },
    /// Read the ultrasonic distance sensor
    Sonic,
    /// Run a command by name with JSON arguments
    Call {
        /// Command name (e.g., setMotorPower)
        command: String,
        /// Arguments as a JSON object (e.g., '{"left": 50, "right": -50}')
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Show daemon and serial link status
    Status,
    /// Request daemon shutdown
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Connect to daemon
    debug!("Connecting to daemon on {:?} bus", cli.bus);
    let client = BridgeClient::connect_with_bus(cli.bus.into())
        .await
        .context("Failed to connect to daemon. Is rccard running?")?;

    debug!("Running {:?}", cli.command);
    match cli.command {
        Commands::Motor { left, right } => {
            let reply = client.set_motor_power(left, right).await?;
            println!("Motor power set to: {} / {} ({})", left, right, reply);
        }
        Commands::HeadLight { brightness } => {
            let reply = client.set_head_light(brightness).await?;
            println!("Head light set to: {} ({})", brightness, reply);
        }
        Commands::Blinker { left, right } => {
            let reply = client.set_blinker(left, right).await?;
            println!("Blinker set to: {} / {} ({})", left, right, reply);
        }
        Commands::RearLight { red, green, blue } => {
            let reply = client.set_rear_light(red, green, blue).await?;
            println!("Rear light set to: {} {} {} ({})", red, green, blue, reply);
        }
        Commands::Lcd { text } => {
            let reply = client.set_lcd(&text).await?;
            println!("LCD set to: {} ({})", text, reply);
        }
        Commands::Sonic => {
            let value = client.get_sonic().await?;
            println!("Distance: {}", value);
        }
        Commands::Call { command, args } => handle_call(&client, &command, &args).await?,
        Commands::Status => handle_status(&client).await?,
        Commands::Quit => {
            client.quit().await?;
            println!("Shutdown request sent to daemon");
        }
    }

    Ok(())
}

async fn handle_call(client: &BridgeClient, command: &str, args: &str) -> Result<()> {
    let parsed: serde_json::Value =
        serde_json::from_str(args).context("Arguments must be valid JSON")?;
    if !parsed.is_object() {
        anyhow::bail!("Arguments must be a JSON object");
    }
    let reply = client.call(command, &parsed.to_string()).await?;
    println!("{}", reply);
    Ok(())
}

async fn handle_status(client: &BridgeClient) -> Result<()> {
    let connected = client.is_connected().await?;
    let state = client.connection_state().await?;
    let device = client.device().await?;
    let last = client.last_sonic().await?;
    println!("Daemon: running");
    println!("Serial Link:");
    println!("  Device: {}", device);
    println!("  Connected: {}", if connected { "yes" } else { "no" });
    println!("  State: {}", state);
    println!(
        "  Last distance: {}",
        if last.is_empty() { "none" } else { &last }
    );
    Ok(())
}
