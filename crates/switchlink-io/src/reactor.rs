use std::{io, net::SocketAddr, time::Duration};

use flux_utils::safe_panic;
use mio::{Events, Interest, Poll, Token, Waker, event::Event, net::TcpListener};
use tracing::{debug, error, warn};

use crate::stream::{TcpStream, set_socket_buf_size};

/// Token reserved for the cross-thread waker; real connections and listeners
/// start at [`FIRST_CONN_TOKEN`].
const WAKE_TOKEN: Token = Token(0);
const FIRST_CONN_TOKEN: usize = 1;

enum Entry {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// Event surfaced by [`Reactor::poll`] for one readiness occurrence.
pub enum ReactorEvent<'a> {
    /// A listener accepted a new inbound connection.
    Accepted { listener: Token, stream: Token, peer_addr: SocketAddr },
    /// A stream was torn down (peer gone or an I/O error).
    Closed { token: Token },
    /// A whole frame payload arrived on a stream.
    Frame { token: Token, payload: &'a [u8] },
}

/// A poll-driven reactor over any number of TCP streams and listeners plus a
/// cross-thread waker.
///
/// This replaces the original's background thread coordinating job
/// additions/removals through a double mutex and a hand-rolled unblock pipe:
/// here a single thread (the event loop, see `switchlink-events`) owns the
/// entry table outright and calls [`Reactor::poll`] directly as its wait
/// primitive, so no lock is needed at all; `mio::Waker` (already built on the
/// platform's eventfd/pipe) stands in for the unblock pipe so that another
/// thread — the signal handler thread, most commonly — can still force an
/// in-progress `poll` to return early.
///
/// Insertion order of `entries` is preserved across removals (an empty slot
/// is tombstoned, not swap-removed) so that a job observed mid-iteration
/// during one `poll` call is never confused with an unrelated one freshly
/// inserted at the same index within the same cycle.
pub struct Reactor {
    poll: Poll,
    waker: std::sync::Arc<Waker>,
    events: Events,
    entries: Vec<Option<(Token, Entry)>>,
    socket_buf_size: Option<usize>,
    next_token: usize,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = std::sync::Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            waker,
            events: Events::with_capacity(256),
            entries: Vec::with_capacity(16),
            socket_buf_size: None,
            next_token: FIRST_CONN_TOKEN,
        })
    }

    pub fn with_socket_buf_size(mut self, size: usize) -> Self {
        self.socket_buf_size = Some(size);
        self
    }

    /// Returns a cheaply clonable handle any thread can use to force
    /// [`Reactor::poll`] to return early, without touching the entry table.
    pub fn waker(&self) -> std::sync::Arc<Waker> {
        self.waker.clone()
    }

    fn slot_for(&mut self, token: Token, entry: Entry) -> Token {
        match self.entries.iter().position(Option::is_none) {
            Some(i) => {
                self.entries[i] = Some((token, entry));
            }
            None => self.entries.push(Some((token, entry))),
        }
        token
    }

    fn find(&self, token: Token) -> Option<usize> {
        self.entries.iter().position(|e| matches!(e, Some((t, _)) if *t == token))
    }

    pub fn listen_at(&mut self, addr: SocketAddr) -> io::Result<Token> {
        let mut listener = TcpListener::bind(addr)?;
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(&mut listener, token, Interest::READABLE)?;
        Ok(self.slot_for(token, Entry::Listener(listener)))
    }

    /// Initiates one non-blocking outbound connection attempt. Does not
    /// retry; retry policy belongs to the connection lifecycle above this
    /// layer (see `switchlink-proto`).
    pub fn connect(&mut self, addr: SocketAddr) -> io::Result<Token> {
        let mut raw = mio::net::TcpStream::connect(addr)?;
        if let Some(size) = self.socket_buf_size {
            set_socket_buf_size(&raw, size);
        }
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll.registry().register(&mut raw, token, Interest::READABLE)?;
        let mut stream = TcpStream::from_mio(raw, addr)?;
        stream.set_token(token);
        Ok(self.slot_for(token, Entry::Stream(stream)))
    }

    pub fn write_or_enqueue_with<F>(&mut self, token: Token, serialise: F) -> bool
    where
        F: Fn(&mut Vec<u8>),
    {
        let Some(i) = self.find(token) else {
            error!(?token, "switchlink-io: write to unknown token");
            return false;
        };
        match &mut self.entries[i] {
            Some((_, Entry::Stream(s))) => {
                s.write_or_enqueue_with(self.poll.registry(), serialise) != crate::stream::ConnState::Disconnected
            }
            Some((_, Entry::Listener(_))) => {
                error!(?token, "switchlink-io: cannot write to a listener token");
                false
            }
            None => false,
        }
    }

    pub fn close(&mut self, token: Token) {
        if let Some(i) = self.find(token) {
            self.close_at(i);
        }
    }

    fn close_at(&mut self, i: usize) {
        if let Some((_, entry)) = self.entries[i].take() {
            match entry {
                Entry::Stream(mut s) => {
                    let _ = s.close(self.poll.registry());
                }
                Entry::Listener(mut l) => {
                    let _ = self.poll.registry().deregister(&mut l);
                }
            }
        }
    }

    /// Blocks for up to `timeout` (or forever if `None`) waiting for
    /// readiness, then dispatches every event to `handler`. Returns once all
    /// events from one `mio::Poll::poll` call have been handled.
    pub fn poll<F>(&mut self, timeout: Option<Duration>, mut handler: F) -> io::Result<()>
    where
        F: for<'a> FnMut(ReactorEvent<'a>),
    {
        self.poll.poll(&mut self.events, timeout)?;

        // Collect tokens first: entries may be added/removed by the handler
        // reentrantly (e.g. accepting spawns a new stream at a fresh slot,
        // disconnecting tombstones one), so we must not hold a borrow of
        // `self.entries` across the callback.
        let ready: Vec<Event> = self.events.iter().cloned().collect();

        for ev in ready {
            if ev.token() == WAKE_TOKEN {
                continue;
            }
            self.dispatch_one(&ev, &mut handler);
        }
        Ok(())
    }

    fn dispatch_one<F>(&mut self, ev: &Event, handler: &mut F)
    where
        F: for<'a> FnMut(ReactorEvent<'a>),
    {
        let token = ev.token();
        let Some(i) = self.find(token) else {
            // The entry was already closed earlier in this same batch.
            return;
        };

        // `entries` and `poll` are disjoint fields, so borrowing them
        // separately (rather than through a helper taking `&mut self`) lets
        // the registry be used while a specific entry is mutably held, the
        // same split the original's per-connection job callbacks relied on.
        // Accepted streams and the "tear this stream down" outcome are staged
        // here rather than acted on inline, since both `self.slot_for` and
        // `self.close_at` need `&mut self` as a whole — which would alias the
        // `registry`/`listener`/`stream` borrows taken from `self.poll` and
        // `self.entries` below if called before the match ends.
        let mut accepted: Vec<(Token, TcpStream, SocketAddr)> = Vec::new();
        let mut disconnected = false;

        let registry = self.poll.registry();
        match &mut self.entries[i] {
            Some((_, Entry::Listener(listener))) => loop {
                match listener.accept() {
                    Ok((mut raw, peer_addr)) => {
                        if let Some(size) = self.socket_buf_size {
                            set_socket_buf_size(&raw, size);
                        }
                        let stream_token = Token(self.next_token);
                        self.next_token += 1;
                        if let Err(err) = registry.register(&mut raw, stream_token, Interest::READABLE) {
                            warn!(?err, "switchlink-io: couldn't register accepted stream");
                            continue;
                        }
                        let Ok(mut stream) = TcpStream::from_mio(raw, peer_addr) else { continue };
                        stream.set_token(stream_token);
                        accepted.push((stream_token, stream, peer_addr));
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        debug!(?err, "switchlink-io: accept failed");
                        break;
                    }
                }
            },
            Some((_, Entry::Stream(stream))) => {
                let state = stream.poll_with(registry, ev, token, &mut |tok, payload| {
                    handler(ReactorEvent::Frame { token: tok, payload });
                });
                if state == crate::stream::ConnState::Disconnected {
                    disconnected = true;
                }
            }
            None => safe_panic!("reactor entry disappeared mid-dispatch"),
        }

        for (stream_token, stream, peer_addr) in accepted {
            self.slot_for(stream_token, Entry::Stream(stream));
            handler(ReactorEvent::Accepted { listener: token, stream: stream_token, peer_addr });
        }

        if disconnected {
            self.close_at(i);
            handler(ReactorEvent::Closed { token });
        }
    }
}
