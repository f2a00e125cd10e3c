//! D-Bus interface for the RC car bridge daemon.
//!
//! Provides the `org.rccar.Bridge1` interface on the session or system bus.

mod interface;

pub use interface::run_dbus_server;
