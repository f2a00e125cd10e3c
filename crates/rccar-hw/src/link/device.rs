//! Serial link to the controller: connection lifecycle, frames out, replies in.

use crate::link::port::{PortOpener, SerialIo};
use crate::link::protocol::{self, Command, LINE_DELIMITER};
use crate::link::retry::RetryPolicy;
use crate::link::sensor::SensorSlot;
use crate::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, WriteHalf};
use tokio::sync::{oneshot, watch, Mutex, Notify};
use tracing::{debug, info, warn};

/// Connection lifecycle of the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No open port.
    #[default]
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// Port open and being read.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// A sensor read that has been requested from the controller.
pub struct SonicRead {
    rx: oneshot::Receiver<String>,
    send_error: Option<Error>,
}

impl SonicRead {
    /// Takes the error from sending the request frame, if it failed.
    pub fn take_send_error(&mut self) -> Option<Error> {
        self.send_error.take()
    }

    /// Waits for the reply. `None` waits forever.
    ///
    /// Replies carry no request id. If this read times out and the controller
    /// answers afterwards, that late value resolves the next queued read (or
    /// only updates the slot when nobody is waiting).
    pub async fn wait(self, timeout: Option<Duration>) -> Result<String> {
        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.rx)
                .await
                .map_err(|_| Error::SensorTimeout(limit))?,
            None => self.rx.await,
        };
        reply.map_err(|_| Error::SensorCancelled)
    }
}

/// Serial link controller.
pub struct SerialLink {
    opener: Box<dyn PortOpener>,
    policy: RetryPolicy,
    reconnect_on_write_error: bool,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<WriteHalf<Box<dyn SerialIo>>>>,
    sensor: SensorSlot,
    link_lost: Notify,
}

impl SerialLink {
    /// Creates a link that is not yet connected; call [`SerialLink::run`] to bring it up.
    pub fn new(opener: impl PortOpener, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            opener: Box::new(opener),
            policy,
            reconnect_on_write_error: false,
            state,
            writer: Mutex::new(None),
            sensor: SensorSlot::default(),
            link_lost: Notify::new(),
        }
    }

    /// Drop the connection and reconnect when a write fails.
    pub fn with_reconnect_on_write_error(mut self, enabled: bool) -> Self {
        self.reconnect_on_write_error = enabled;
        self
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Location of the device.
    pub fn device(&self) -> String {
        self.opener.describe()
    }

    /// Last sensor value received since the most recent read request.
    pub fn latest_sonic(&self) -> Option<String> {
        self.sensor.latest()
    }

    /// Sensor reads still waiting for a reply.
    pub fn pending_sonic_reads(&self) -> usize {
        self.sensor.pending()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Opens the port, retrying according to the retry policy.
    pub async fn connect(&self) -> Result<Box<dyn SerialIo>> {
        let mut failures: u32 = 0;
        loop {
            self.set_state(ConnectionState::Connecting);
            match self.opener.open().await {
                Ok(port) => {
                    info!("Connected to serial port {}", self.device());
                    return Ok(port);
                }
                Err(e) => {
                    failures += 1;
                    self.set_state(ConnectionState::Disconnected);
                    if !self.policy.allows(failures) {
                        warn!(
                            "Could not connect to serial port {}: {}; giving up after {} attempts",
                            self.device(),
                            e,
                            failures
                        );
                        return Err(Error::RetriesExhausted(failures));
                    }
                    let delay = self.policy.delay_for(failures);
                    warn!(
                        "Could not connect to serial port {}: {}; Reconnecting in {:?}...",
                        self.device(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Keeps the link up: connects, reads replies until the port goes away, reconnects.
    ///
    /// Only returns if a bounded retry policy runs out of attempts.
    pub async fn run(&self) -> Result<()> {
        loop {
            let port = self.connect().await?;
            let (reader, writer) = tokio::io::split(port);
            *self.writer.lock().await = Some(writer);
            self.set_state(ConnectionState::Connected);

            tokio::select! {
                result = self.read_lines(reader) => match result {
                    Ok(()) => warn!("Serial port {} closed; Reconnecting...", self.device()),
                    Err(e) => warn!("Serial read error on {}: {}; Reconnecting...", self.device(), e),
                },
                _ = self.link_lost.notified() => {
                    warn!("Dropping serial connection after write failure; Reconnecting...");
                }
            }

            self.writer.lock().await.take();
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn read_lines<R: AsyncRead + Unpin>(&self, reader: R) -> std::io::Result<()> {
        let mut lines = BufReader::new(reader).split(LINE_DELIMITER);
        while let Some(line) = lines.next_segment().await? {
            self.handle_line(&String::from_utf8_lossy(&line));
        }
        Ok(())
    }

    /// Processes one inbound line from the controller.
    pub fn handle_line(&self, line: &str) {
        match protocol::parse_sonic_reply(line) {
            Some(value) => {
                self.sensor.publish(value);
                info!("Received sensor value - getSonic = {}", value);
            }
            None => debug!("Ignoring serial line: {:?}", line),
        }
    }

    /// Sends one frame built from `fields`. No fields sends nothing.
    pub async fn send<I, S>(&self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(frame) = protocol::encode_frame(fields) else {
            return Ok(());
        };
        let shown = frame.trim_end();

        let mut writer = self.writer.lock().await;
        let Some(port) = writer.as_mut() else {
            warn!("Could not send a command (not connected) - {}", shown);
            return Err(Error::NotConnected);
        };

        let result: std::io::Result<()> = async {
            port.write_all(frame.as_bytes()).await?;
            port.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                info!("Sent a command - {}", shown);
                Ok(())
            }
            Err(source) => {
                warn!("Could not send a command - {}: {}", shown, source);
                if self.reconnect_on_write_error {
                    writer.take();
                    self.link_lost.notify_one();
                }
                Err(Error::Write {
                    frame: shown.to_string(),
                    source,
                })
            }
        }
    }

    /// Clears the sensor slot, queues a reader and asks the controller for a reading.
    pub async fn request_sonic(&self) -> SonicRead {
        let rx = self.sensor.begin_read();
        let send_error = self.send([Command::GetSonic.name()]).await.err();
        SonicRead { rx, send_error }
    }

    /// Requests a reading and waits for it. `None` waits forever.
    pub async fn read_sonic(&self, timeout: Option<Duration>) -> Result<String> {
        self.request_sonic().await.wait(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};

    /// Hands out queued in-memory ports; `None` entries fail to open.
    #[derive(Clone, Default)]
    struct DuplexOpener {
        ports: Arc<std::sync::Mutex<VecDeque<Option<DuplexStream>>>>,
        attempts: Arc<AtomicU32>,
    }

    impl DuplexOpener {
        fn push_failure(&self) {
            self.ports.lock().unwrap().push_back(None);
        }

        /// Queues a port and returns the controller's end of it.
        fn push_port(&self) -> DuplexStream {
            let (host, device) = tokio::io::duplex(1024);
            self.ports.lock().unwrap().push_back(Some(host));
            device
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl PortOpener for DuplexOpener {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn SerialIo>>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                match self.ports.lock().unwrap().pop_front() {
                    Some(Some(port)) => Ok(Box::new(port) as Box<dyn SerialIo>),
                    _ => Err(Error::DeviceNotFound("duplex".to_string())),
                }
            })
        }

        fn describe(&self) -> String {
            "duplex".to_string()
        }
    }

    /// Port that stays open for reading but rejects every write.
    struct BrokenPort;

    impl AsyncRead for BrokenPort {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for BrokenPort {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "cable pulled",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Clone, Default)]
    struct BrokenOpener {
        opens: Arc<AtomicU32>,
    }

    impl PortOpener for BrokenOpener {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn SerialIo>>> {
            Box::pin(async move {
                self.opens.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(BrokenPort) as Box<dyn SerialIo>)
            })
        }

        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    async fn start_broken(reconnect_on_write_error: bool) -> (Arc<SerialLink>, BrokenOpener) {
        let opener = BrokenOpener::default();
        let link = Arc::new(
            SerialLink::new(opener.clone(), fast_policy())
                .with_reconnect_on_write_error(reconnect_on_write_error),
        );
        let runner = link.clone();
        tokio::spawn(async move { runner.run().await });
        wait_for_state(&link, ConnectionState::Connected).await;
        (link, opener)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(10))
    }

    async fn start(opener: DuplexOpener, policy: RetryPolicy) -> Arc<SerialLink> {
        let link = Arc::new(SerialLink::new(opener, policy));
        let runner = link.clone();
        tokio::spawn(async move { runner.run().await });
        wait_for_state(&link, ConnectionState::Connected).await;
        link
    }

    async fn wait_for_state(link: &SerialLink, state: ConnectionState) {
        let mut rx = link.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    async fn read_frame(device: &mut DuplexStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        device.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_send_writes_frame() {
        let opener = DuplexOpener::default();
        let mut device = opener.push_port();
        let link = start(opener, fast_policy()).await;

        link.send(["setMotorPower", "50", "-50"]).await.unwrap();
        assert_eq!(read_frame(&mut device, 22).await, "setMotorPower:50:-50;\n");
    }

    #[tokio::test]
    async fn test_send_without_fields_writes_nothing() {
        let opener = DuplexOpener::default();
        let mut device = opener.push_port();
        let link = start(opener, fast_policy()).await;

        link.send(Vec::<String>::new()).await.unwrap();
        link.send(["getSonic"]).await.unwrap();
        assert_eq!(read_frame(&mut device, 10).await, "getSonic;\n");
    }

    #[tokio::test]
    async fn test_send_when_disconnected() {
        let link = SerialLink::new(DuplexOpener::default(), fast_policy());
        let err = link.send(["setHeadLight", "10"]).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_retries_until_open_succeeds() {
        let opener = DuplexOpener::default();
        opener.push_failure();
        opener.push_failure();
        let _device = opener.push_port();
        let link = start(opener.clone(), fast_policy()).await;

        assert!(link.is_connected());
        assert_eq!(opener.attempts(), 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(opener.attempts(), 3);
    }

    #[tokio::test]
    async fn test_bounded_retry_gives_up() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..fast_policy()
        };
        let link = SerialLink::new(DuplexOpener::default(), policy);
        let err = link.run().await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted(2)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnects_after_port_closes() {
        let opener = DuplexOpener::default();
        let device = opener.push_port();
        let mut second = opener.push_port();
        let link = start(opener.clone(), fast_policy()).await;

        drop(device);
        tokio::time::timeout(Duration::from_secs(2), async {
            while opener.attempts() < 2 || !link.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        link.send(["setLCD", "hello"]).await.unwrap();
        assert_eq!(read_frame(&mut second, 14).await, "setLCD:hello;\n");
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection_by_default() {
        let (link, opener) = start_broken(false).await;

        let err = link.send(["setHeadLight", "10"]).await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn test_write_failure_reconnects_when_enabled() {
        let (link, opener) = start_broken(true).await;

        let err = link.send(["setHeadLight", "10"]).await.unwrap_err();
        assert!(matches!(err, Error::Write { .. }));

        tokio::time::timeout(Duration::from_secs(2), async {
            while opener.opens.load(Ordering::SeqCst) < 2 || !link.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_read_sonic_waits_for_reply() {
        let opener = DuplexOpener::default();
        let mut device = opener.push_port();
        let link = start(opener, fast_policy()).await;

        let reader = link.clone();
        let pending = tokio::spawn(async move { reader.read_sonic(None).await });

        assert_eq!(read_frame(&mut device, 10).await, "getSonic;\n");
        assert!(link.latest_sonic().is_none());
        device.write_all(b"hello\ngetSonic:123;\n").await.unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), "123");
        assert_eq!(link.latest_sonic().as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn test_read_sonic_times_out() {
        let opener = DuplexOpener::default();
        let _device = opener.push_port();
        let link = start(opener, fast_policy()).await;

        let err = link
            .read_sonic(Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SensorTimeout(_)));
        assert_eq!(link.pending_sonic_reads(), 0);
    }

    #[tokio::test]
    async fn test_request_sonic_reports_send_error() {
        let link = SerialLink::new(DuplexOpener::default(), fast_policy());
        let mut read = link.request_sonic().await;
        assert!(matches!(read.take_send_error(), Some(Error::NotConnected)));

        link.handle_line("getSonic:42;");
        assert_eq!(read.wait(None).await.unwrap(), "42");
    }
}
