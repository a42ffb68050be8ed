//! The socket reactor and the byte stream it multiplexes.
//!
//! `switchlink-io` knows nothing about message codes or protocol versions: it
//! hands callers whole frame payloads (see [`reactor::ReactorEvent::Frame`])
//! and lets `switchlink-proto` interpret them.

mod reactor;
mod stream;
#[cfg(feature = "tls")]
mod tls;

pub use mio::Token;
pub use reactor::{Reactor, ReactorEvent};
pub use stream::ConnState;
#[cfg(feature = "tls")]
pub use tls::{TlsByteStream, TlsState};
