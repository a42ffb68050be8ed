//! Secure byte-stream variant of the plain [`crate::stream::TcpStream`]
//! contract, gated behind the `tls` feature and backed by `rustls`.
//!
//! Certificate validation policy, pinning, and key material are entirely the
//! caller's problem (a `rustls::ServerConfig`/`ClientConfig` is handed in
//! already built); this module only adds the one extra state the reactor
//! needs to know about: a handshake still in progress, during which reads
//! and writes must be retried rather than treated as errors.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use tracing::debug;

/// Handshake/established/closed state of a [`TlsByteStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    Handshaking,
    Established,
    Closed,
}

enum Role {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl Role {
    fn is_handshaking(&self) -> bool {
        match self {
            Role::Server(c) => c.is_handshaking(),
            Role::Client(c) => c.is_handshaking(),
        }
    }

    fn wants_read(&self) -> bool {
        match self {
            Role::Server(c) => c.wants_read(),
            Role::Client(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Role::Server(c) => c.wants_write(),
            Role::Client(c) => c.wants_write(),
        }
    }

    fn read_tls(&mut self, rd: &mut impl Read) -> io::Result<usize> {
        match self {
            Role::Server(c) => c.read_tls(rd),
            Role::Client(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut impl Write) -> io::Result<usize> {
        match self {
            Role::Server(c) => c.write_tls(wr),
            Role::Client(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<(), rustls::Error> {
        match self {
            Role::Server(c) => c.process_new_packets().map(|_| ()),
            Role::Client(c) => c.process_new_packets().map(|_| ()),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Role::Server(c) => c.reader(),
            Role::Client(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Role::Server(c) => c.writer(),
            Role::Client(c) => c.writer(),
        }
    }
}

/// A byte stream that additionally performs a TLS handshake and record
/// encryption/decryption before data reaches its caller. Generic over the
/// underlying transport so it can wrap a `mio::net::TcpStream` directly, the
/// same way the plain variant does.
///
/// `Read`/`Write` calls made while [`state`](Self::state) is
/// [`TlsState::Handshaking`] drive the handshake to the extent the
/// underlying transport currently allows and return `WouldBlock` rather than
/// application data; the reactor re-arms on whichever of `wants_read` /
/// `wants_write` the connection still needs and tries again on the next
/// readiness event, exactly as it would for a half-written plain frame.
pub struct TlsByteStream<S> {
    role: Role,
    inner: S,
    state: TlsState,
}

impl<S: Read + Write> TlsByteStream<S> {
    pub fn new_server(config: Arc<ServerConfig>, inner: S) -> io::Result<Self> {
        let conn = ServerConnection::new(config).map_err(io::Error::other)?;
        Ok(Self { role: Role::Server(conn), inner, state: TlsState::Handshaking })
    }

    pub fn new_client(config: Arc<ClientConfig>, name: ServerName<'static>, inner: S) -> io::Result<Self> {
        let conn = ClientConnection::new(config, name).map_err(io::Error::other)?;
        Ok(Self { role: Role::Client(conn), inner, state: TlsState::Handshaking })
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    /// `true` once the reactor should arm `Interest::WRITABLE`, either
    /// because the handshake has buffered ciphertext to flush or because
    /// there's backlogged application data pending TLS's own framing.
    pub fn wants_write(&self) -> bool {
        self.role.wants_write()
    }

    /// Moves whatever TLS ciphertext the transport currently has to offer
    /// into the connection, without surfacing application data. Called from
    /// both `read` and `write` since either direction can need to pump the
    /// handshake before it can make progress.
    fn drive_handshake(&mut self) -> io::Result<()> {
        while self.role.is_handshaking() {
            if self.role.wants_write() {
                match self.role.write_tls(&mut self.inner) {
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(e),
                    Err(e) => return Err(e),
                }
            }
            if self.role.wants_read() {
                match self.role.read_tls(&mut self.inner) {
                    Ok(0) => {
                        self.state = TlsState::Closed;
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "tls handshake: peer closed"));
                    }
                    Ok(_) => {
                        if let Err(err) = self.role.process_new_packets() {
                            debug!(?err, "switchlink-io: tls handshake failed");
                            self.state = TlsState::Closed;
                            return Err(io::Error::new(io::ErrorKind::InvalidData, err));
                        }
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(e),
                    Err(e) => return Err(e),
                }
            }
            break;
        }

        if self.state == TlsState::Handshaking && !self.role.is_handshaking() {
            debug!("switchlink-io: tls handshake complete");
            self.state = TlsState::Established;
        }
        Ok(())
    }
}

impl<S: Read + Write> Read for TlsByteStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state == TlsState::Closed {
            return Ok(0);
        }
        if self.state == TlsState::Handshaking {
            self.drive_handshake()?;
            if self.state != TlsState::Established {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "tls handshake in progress"));
            }
        }

        // Pull in any ciphertext the kernel has ready, then surface whatever
        // plaintext that produces; a `WouldBlock` here just means no new
        // records arrived this tick, not that the stream is stuck.
        match self.role.read_tls(&mut self.inner) {
            Ok(0) => {
                self.state = TlsState::Closed;
                return Ok(0);
            }
            Ok(_) => {
                self.role.process_new_packets().map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        match self.role.reader().read(buf) {
            Ok(0) if buf.is_empty() => Ok(0),
            Ok(0) => Err(io::Error::new(io::ErrorKind::WouldBlock, "no plaintext ready yet")),
            other => other,
        }
    }
}

impl<S: Read + Write> Write for TlsByteStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state == TlsState::Closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "tls stream closed"));
        }
        if self.state == TlsState::Handshaking {
            self.drive_handshake()?;
            if self.state != TlsState::Established {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "tls handshake in progress"));
            }
        }

        let n = self.role.writer().write(buf)?;
        self.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        while self.role.wants_write() {
            match self.role.write_tls(&mut self.inner) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stream_starts_handshaking() {
        // Constructing a real connection needs key material we don't want to
        // fabricate here; this just pins down the state enum's ordering and
        // equality, which the rest of the module relies on.
        assert_ne!(TlsState::Handshaking, TlsState::Established);
        assert_ne!(TlsState::Established, TlsState::Closed);
    }
}
