use std::{
    collections::VecDeque,
    io::{self, IoSlice, Read, Write},
    net::SocketAddr,
};

use mio::{Interest, Registry, Token, event::Event};
use switchlink_wire::LEN_HEADER_SIZE;
use tracing::{debug, warn};

/// Response type for all stream operations.
///
/// `Alive` means the connection is still usable. `Disconnected` means the
/// peer is gone (or the socket is unrecoverably broken) and the caller must
/// tear down whatever owns this stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ConnState {
    Alive,
    Disconnected,
}

enum ReadOutcome<'a> {
    FrameDone { frame: &'a [u8] },
    WouldBlock,
    Disconnected,
}

#[derive(Clone, Copy)]
enum RxState {
    /// Waiting for the 4-byte big-endian length prefix.
    ReadingHeader { buf: [u8; LEN_HEADER_SIZE], have: usize },
    /// Reading the `msg_len` payload bytes that follow the header.
    ReadingPayload { msg_len: usize, offset: usize },
}

const RX_BUF_SIZE: usize = 32 * 1024;

/// Single mio-backed, non-blocking TCP byte stream speaking the big-endian,
/// length-prefixed frame format.
///
/// Frame on the wire: `u32` big-endian length, then that many payload bytes.
/// The payload's own shape (a 4-octet message code and fields, or the
/// handshake's magic-plus-version prefix) is the connection state machine's
/// concern, not this layer's — this type only ever hands back whole,
/// undifferentiated payloads.
///
/// Outbound writes are a happy-path vectored `write` attempt followed by a
/// backlog queue for whatever didn't fit; the backlog is drained whenever the
/// socket reports writable. Inbound reads loop until the kernel would block.
pub struct TcpStream {
    stream: mio::net::TcpStream,
    peer_addr: SocketAddr,

    rx_state: RxState,
    rx_buf: Vec<u8>,
    send_buf: Vec<u8>,
    header_buf: [u8; LEN_HEADER_SIZE],
    /// First entry is either a whole frame or the remainder of one already
    /// partially written.
    send_backlog: VecDeque<Vec<u8>>,

    /// Invariant: `writable_armed == !send_backlog.is_empty()`.
    writable_armed: bool,

    /// Token this stream is currently registered under. Re-registering with
    /// anything else would silently redirect future readiness events to the
    /// wrong connection, so every `reregister` call below reuses this value
    /// rather than a placeholder.
    token: Token,
}

impl TcpStream {
    pub const SEND_BUF_SIZE: usize = 32 * 1024;

    pub(crate) fn from_mio(stream: mio::net::TcpStream, peer_addr: SocketAddr) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            peer_addr,
            rx_state: RxState::ReadingHeader { buf: [0; LEN_HEADER_SIZE], have: 0 },
            rx_buf: vec![0; RX_BUF_SIZE],
            send_buf: vec![0; Self::SEND_BUF_SIZE],
            header_buf: [0; LEN_HEADER_SIZE],
            send_backlog: VecDeque::with_capacity(16),
            writable_armed: false,
            token: Token(0),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Drives the stream off a readiness event, invoking `on_frame` once per
    /// fully assembled frame payload. The slice is only valid for the
    /// duration of the callback.
    #[inline]
    pub fn poll_with<F>(&mut self, registry: &Registry, ev: &Event, token: Token, on_frame: &mut F) -> ConnState
    where
        F: FnMut(Token, &[u8]),
    {
        if ev.is_readable() {
            loop {
                match self.read_frame() {
                    ReadOutcome::FrameDone { frame } => on_frame(token, frame),
                    ReadOutcome::WouldBlock => break,
                    ReadOutcome::Disconnected => return ConnState::Disconnected,
                }
            }
        }

        if ev.is_writable() && self.drain_backlog(registry) == ConnState::Disconnected {
            return ConnState::Disconnected;
        }

        ConnState::Alive
    }

    /// Serialises the payload via `serialise`, framing it with a length
    /// prefix, then writes it immediately if possible, else enqueues it.
    #[inline]
    pub fn write_or_enqueue_with<F>(&mut self, registry: &Registry, serialise: F) -> ConnState
    where
        F: Fn(&mut Vec<u8>),
    {
        self.serialise_frame(serialise);
        let len = self.send_buf.len();

        if !self.send_backlog.is_empty() {
            self.enqueue_back(registry, self.header_buf.to_vec());
            let data = self.send_buf[..len].to_vec();
            return self.enqueue_back(registry, data);
        }

        let frame = &self.send_buf[..len];
        match self.stream.write_vectored(&[IoSlice::new(&self.header_buf), IoSlice::new(frame)]) {
            Ok(0) => {
                warn!("switchlink-io: stream failed to write, disconnecting");
                ConnState::Disconnected
            }
            Ok(n) if n == len + LEN_HEADER_SIZE => ConnState::Alive,
            Ok(n) if n < LEN_HEADER_SIZE => {
                let data = self.send_buf[..len].to_vec();
                self.enqueue_front(registry, data);
                let header_rest = self.header_buf[n..LEN_HEADER_SIZE].to_vec();
                self.enqueue_front(registry, header_rest)
            }
            Ok(n) => {
                let data = self.send_buf[n.saturating_sub(LEN_HEADER_SIZE)..len].to_vec();
                self.enqueue_front(registry, data)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.enqueue_back(registry, self.header_buf.to_vec());
                let data = self.send_buf[..len].to_vec();
                self.enqueue_back(registry, data)
            }
            Err(err) => {
                warn!(?err, "switchlink-io: stream write failed");
                ConnState::Disconnected
            }
        }
    }

    #[inline]
    fn drain_backlog(&mut self, registry: &Registry) -> ConnState {
        while let Some(front) = self.send_backlog.front_mut() {
            match self.stream.write(front) {
                Ok(0) => return ConnState::Disconnected,
                Ok(n) if n == front.len() => {
                    self.send_backlog.pop_front();
                }
                Ok(n) => front.drain(..n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!(?err, "switchlink-io: write from backlog failed");
                    return ConnState::Disconnected;
                }
            }
        }

        if self.send_backlog.is_empty() && self.writable_armed {
            if let Err(err) = registry.reregister(&mut self.stream, self.token, Interest::READABLE) {
                debug!(?err, "switchlink-io: reregister to drop writable failed");
                return ConnState::Disconnected;
            }
            self.writable_armed = false;
        }

        ConnState::Alive
    }

    #[inline]
    fn read_frame(&mut self) -> ReadOutcome<'_> {
        loop {
            match self.rx_state {
                RxState::ReadingHeader { mut buf, mut have } => {
                    while have < LEN_HEADER_SIZE {
                        match self.stream.read(&mut buf[have..]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                have += n;
                                if have == LEN_HEADER_SIZE {
                                    let msg_len = u32::from_be_bytes(buf) as usize;
                                    if msg_len == 0 {
                                        // A zero-length prefix has no payload bytes to wait
                                        // for, so staying in `ReadingPayload` with
                                        // `offset < msg_len` vacuously false would spin
                                        // forever re-entering the same state. Surface it
                                        // as an already-complete empty frame instead and go
                                        // straight back to waiting on the next header.
                                        self.rx_state = RxState::ReadingHeader { buf: [0; LEN_HEADER_SIZE], have: 0 };
                                        return ReadOutcome::FrameDone { frame: &[] };
                                    }
                                    if msg_len > self.rx_buf.len() {
                                        debug!(
                                            buf_len = self.rx_buf.len(),
                                            need_len = msg_len,
                                            "switchlink-io: rx buffer resized"
                                        );
                                        self.rx_buf.resize(msg_len, 0);
                                    }
                                    self.rx_state = RxState::ReadingPayload { msg_len, offset: 0 };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingHeader { buf, have };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(err) => {
                                debug!(?err, "switchlink-io: read header failed");
                                return ReadOutcome::Disconnected;
                            }
                        }
                    }
                }
                RxState::ReadingPayload { msg_len, mut offset } => {
                    while offset < msg_len {
                        match self.stream.read(&mut self.rx_buf[offset..msg_len]) {
                            Ok(0) => return ReadOutcome::Disconnected,
                            Ok(n) => {
                                offset += n;
                                if offset == msg_len {
                                    self.rx_state =
                                        RxState::ReadingHeader { buf: [0; LEN_HEADER_SIZE], have: 0 };
                                    return ReadOutcome::FrameDone { frame: &self.rx_buf[..msg_len] };
                                }
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                self.rx_state = RxState::ReadingPayload { msg_len, offset };
                                return ReadOutcome::WouldBlock;
                            }
                            Err(err) => {
                                debug!(?err, "switchlink-io: read payload failed");
                                return ReadOutcome::Disconnected;
                            }
                        }
                    }
                }
            }
        }
    }

    #[inline]
    fn enqueue_front(&mut self, registry: &Registry, data: Vec<u8>) -> ConnState {
        self.send_backlog.push_front(data);
        self.arm_writable(registry)
    }

    #[inline]
    fn enqueue_back(&mut self, registry: &Registry, data: Vec<u8>) -> ConnState {
        self.send_backlog.push_back(data);
        self.arm_writable(registry)
    }

    #[inline]
    fn arm_writable(&mut self, registry: &Registry) -> ConnState {
        if !self.writable_armed {
            if let Err(err) =
                registry.reregister(&mut self.stream, self.token, Interest::READABLE | Interest::WRITABLE)
            {
                debug!(?err, "switchlink-io: reregister to arm writable failed");
                return ConnState::Disconnected;
            }
            self.writable_armed = true;
        }
        ConnState::Alive
    }

    #[inline(always)]
    fn serialise_frame<F>(&mut self, serialise: F)
    where
        F: Fn(&mut Vec<u8>),
    {
        self.send_buf.clear();
        serialise(&mut self.send_buf);
        self.header_buf.copy_from_slice(&(self.send_buf.len() as u32).to_be_bytes());
    }

    pub fn close(&mut self, registry: &Registry) -> SocketAddr {
        debug!(peer = ?self.peer_addr, "switchlink-io: closing connection");
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.peer_addr
    }

    /// Records the token the caller already registered this stream's raw
    /// socket under. Registration itself happens once, before the
    /// `TcpStream` is constructed (see `Reactor::connect`/accept handling) —
    /// calling `registry.register` again here would fail, since mio rejects
    /// re-registering a source that is already registered.
    pub(crate) fn set_token(&mut self, token: Token) {
        self.token = token;
    }
}

/// Sets kernel `SO_SNDBUF`/`SO_RCVBUF` on a raw mio stream.
pub(crate) fn set_socket_buf_size(stream: &mio::net::TcpStream, size: usize) {
    use std::os::fd::AsRawFd;
    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            std::ptr::addr_of!(size).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            std::ptr::addr_of!(size).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}
