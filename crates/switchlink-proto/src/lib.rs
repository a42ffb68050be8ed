//! The connection state machine: version handshake, info exchange,
//! heartbeat/keepalive, clipboard grab/chunking, and file chunking.
//!
//! `Connection` is a pure state machine: it never touches a socket or an
//! event loop directly. Driving it (feeding it frame payloads, arming the
//! timers it asks for, carrying out the sends it asks for) is the caller's
//! job — in this crate's own test suite that's a `Vec<Action>` inspected
//! directly; in the shipped daemon it's `switchlink-switch`.

mod connection;
mod error;
mod file_transfer;

pub use connection::{
    Action, ConnEvent, ConnState, Connection, ConnectionConfig, ScreenInfoFields, Side, TimerKind,
};
pub use error::ProtoError;
