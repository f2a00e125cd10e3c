//! Host command dispatch.
//!
//! Maps a named command and its JSON arguments to a frame on the serial link
//! and answers the caller through a one-shot [`Responder`].

use rccar_hw::{Command, SerialLink};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::Config;

/// Acknowledgment sent for fire-and-forget commands.
pub const ACK: &str = "OKAY";

/// Reply delivered to the host for one command.
pub type Reply = Result<String, DispatchError>;

/// Errors reported back to the host.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No handler for the command name.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The serial link failed to deliver or answer.
    #[error(transparent)]
    Link(#[from] rccar_hw::Error),

    /// The handler went away without replying.
    #[error("Command finished without a reply")]
    NoReply,
}

/// Delivers a command's result to the host exactly once.
pub struct Responder {
    tx: oneshot::Sender<Reply>,
}

impl Responder {
    /// Creates a responder and the receiver its reply arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Sends the reply. A caller that stopped listening is ignored.
    pub fn send(self, reply: Reply) {
        let _ = self.tx.send(reply);
    }
}

/// Command dispatcher shared by the host-facing interfaces.
pub struct Dispatcher {
    link: Arc<SerialLink>,
    sonic_timeout: Option<Duration>,
    report_send_errors: bool,
}

impl Dispatcher {
    /// Creates a dispatcher that waits forever for sensor replies and always acknowledges.
    pub fn new(link: Arc<SerialLink>) -> Self {
        Self {
            link,
            sonic_timeout: None,
            report_send_errors: false,
        }
    }

    /// Creates a dispatcher with the behavior selected in the configuration.
    pub fn from_config(link: Arc<SerialLink>, config: &Config) -> Self {
        Self::new(link)
            .with_sonic_timeout(config.sonic_timeout())
            .with_report_send_errors(config.report_send_errors)
    }

    pub fn with_sonic_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.sonic_timeout = timeout;
        self
    }

    pub fn with_report_send_errors(mut self, enabled: bool) -> Self {
        self.report_send_errors = enabled;
        self
    }

    /// The serial link commands are sent over.
    pub fn link(&self) -> &Arc<SerialLink> {
        &self.link
    }

    /// Handles one command.
    ///
    /// Returns `true` when the reply will be sent later (sensor reads), `false`
    /// when `responder` has already been answered.
    pub async fn dispatch(&self, name: &str, args: &Value, responder: Responder) -> bool {
        let command = match name.parse::<Command>() {
            Ok(command) => command,
            Err(_) => {
                warn!("Unknown command: {}", name);
                responder.send(Err(DispatchError::UnknownCommand(name.to_string())));
                return false;
            }
        };
        debug!("Dispatching {} {}", command, args);

        if command == Command::GetSonic {
            let mut read = self.link.request_sonic().await;
            if let Some(e) = read.take_send_error() {
                if self.report_send_errors {
                    responder.send(Err(e.into()));
                    return false;
                }
            }
            let timeout = self.sonic_timeout;
            tokio::spawn(async move {
                responder.send(read.wait(timeout).await.map_err(DispatchError::from));
            });
            return true;
        }

        let fields = frame_fields(command, args);
        match self.link.send(&fields).await {
            Err(e) if self.report_send_errors => responder.send(Err(e.into())),
            _ => responder.send(Ok(ACK.to_string())),
        }
        false
    }

    /// Dispatches a command and waits for its reply.
    pub async fn invoke(&self, name: &str, args: &Value) -> Reply {
        let (responder, rx) = Responder::channel();
        self.dispatch(name, args, responder).await;
        rx.await.unwrap_or(Err(DispatchError::NoReply))
    }
}

/// Frame fields for a command: its name followed by each argument in order.
pub fn frame_fields(command: Command, args: &Value) -> Vec<String> {
    std::iter::once(command.name().to_string())
        .chain(command.params().iter().map(|p| field_text(args.get(p))))
        .collect()
}

/// Missing and null arguments become empty fields.
fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
