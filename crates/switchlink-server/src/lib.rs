//! Wiring layer: ties the reactor (`switchlink-io`), the event loop
//! (`switchlink-events`), the connection state machine (`switchlink-proto`),
//! and the switching logic (`switchlink-switch`) into one running daemon.
//!
//! This crate is the ambient "it actually runs" proof named in the design's
//! external-interfaces section, not the deliverable core: the interesting
//! algorithms live in the crates it wires together. What's here is
//! deliberately thin — demultiplexing reactor readiness into the single-
//! threaded event loop, and translating `Connection::Action`s back into
//! reactor/timer calls.

mod cli;
mod error;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use mio::Waker;
use signal_hook::iterator::Signals;
use switchlink_clipboard::Clipboard;
use switchlink_events::{ConnectionId, Event, EventData, EventLoop, EventLoopHandle, EventType, TargetId, TimerId};
use switchlink_io::{Reactor, ReactorEvent, Token};
use switchlink_proto::{Action, ConnEvent, Connection, ConnectionConfig, TimerKind};
use switchlink_switch::{GridTopology, Screen, ScreenGeometry, Switcher, SwitchOutcome};
use switchlink_wire::{ClipboardSlot, KeyModifierMask, Message};
use tracing::{debug, info, instrument, trace, warn};

pub use cli::Cli;
pub use error::ServerError;

/// A reactor-originated frame arriving for some connection. Posted by the
/// reactor thread, demultiplexed by the single handler registered for
/// [`TargetId::Reactor`] on the event loop thread.
const EV_ACCEPTED: EventType = EventType::user(0);
const EV_CLOSED: EventType = EventType::user(1);
const EV_FRAME: EventType = EventType::user(2);

/// Placeholder [`Screen`] for a machine with no platform input backend
/// wired in. Every operation is a no-op; a real backend (X11/Wayland/Quartz/
/// Win32) implements the same trait and is out of this crate's scope (see
/// `switchlink-switch::Screen` docs).
#[derive(Default)]
pub struct NullScreen {
    clipboards: [Clipboard; 4],
}

impl Screen for NullScreen {
    fn get_shape(&self) -> (i32, i32, i32, i32) {
        (0, 0, 0, 0)
    }
    fn get_cursor_pos(&self) -> (i32, i32) {
        (0, 0)
    }
    fn get_cursor_center(&self) -> (i32, i32) {
        (0, 0)
    }
    fn enter(&mut self, _x: i32, _y: i32, _seq: u32, _mask: KeyModifierMask) {}
    fn leave(&mut self) -> bool {
        true
    }
    fn fake_key_down(&mut self, _id: u16, _mask: KeyModifierMask, _button: u16) {}
    fn fake_key_repeat(&mut self, _id: u16, _mask: KeyModifierMask, _button: u16, _count: u16) {}
    fn fake_key_up(&mut self, _id: u16, _mask: KeyModifierMask, _button: u16) {}
    fn fake_mouse_button(&mut self, _id: u8, _pressed: bool) {}
    fn fake_mouse_move(&mut self, _x: i32, _y: i32) {}
    fn fake_mouse_relative_move(&mut self, _dx: i32, _dy: i32) {}
    fn fake_mouse_wheel(&mut self, _dx: i32, _dy: i32) {}
    fn get_clipboard(&self, slot: ClipboardSlot) -> Clipboard {
        self.clipboards[(slot.0 as usize) % 4].clone()
    }
    fn set_clipboard(&mut self, slot: ClipboardSlot, clipboard: &Clipboard) -> bool {
        self.clipboards[(slot.0 as usize) % 4] = clipboard.clone();
        true
    }
    fn grab_clipboard(&mut self, _slot: ClipboardSlot) {}
    fn set_options(&mut self, _options: &[u8]) {}
    fn reset_options(&mut self) {}
}

fn conn_id_for(token: Token) -> ConnectionId {
    ConnectionId::new(token.0 as u32, 0)
}

struct ConnSlot {
    token: Token,
    proto: Connection,
    name: Option<String>,
    timers: HashMap<TimerKind, TimerId>,
}

/// All server-side state reachable from event handlers. Lives behind one
/// `Mutex` even though only the event loop thread ever locks it (the reactor
/// thread only posts events) — handlers must be `Send`, so a `Rc<RefCell<_>>`
/// won't do; the mutex is never contended in practice.
pub struct ServerCore {
    self_ref: Weak<Mutex<ServerCore>>,
    reactor: Arc<Mutex<Reactor>>,
    loop_handle: EventLoopHandle,
    slots: HashMap<ConnectionId, ConnSlot>,
    switcher: Switcher<GridTopology>,
    conn_template: ConnectionConfig,
    local_shape: (i32, i32),
}

impl ServerCore {
    fn new(
        reactor: Arc<Mutex<Reactor>>,
        loop_handle: EventLoopHandle,
        local_name: String,
        local_shape: (i32, i32),
        conn_template: ConnectionConfig,
    ) -> Arc<Mutex<ServerCore>> {
        let mut topology = GridTopology::new();
        topology.add_screen(
            local_name.clone(),
            ScreenGeometry { grid_x: 0, grid_y: 0, width: local_shape.0, height: local_shape.1 },
        );
        Arc::new_cyclic(|self_ref| {
            Mutex::new(ServerCore {
                self_ref: self_ref.clone(),
                reactor,
                loop_handle,
                slots: HashMap::new(),
                switcher: Switcher::new(local_name, topology),
                conn_template,
                local_shape,
            })
        })
    }

    #[instrument(skip(self))]
    fn on_accept(&mut self, token: Token) {
        let id = conn_id_for(token);
        let (proto, actions) = Connection::server(self.conn_template.clone());
        self.slots.insert(id, ConnSlot { token, proto, name: None, timers: HashMap::new() });
        self.register_timer_handler(id);
        info!(?id, "switchlink-server: client connected");
        self.run_actions(id, actions);
    }

    fn register_timer_handler(&self, id: ConnectionId) {
        let Some(core) = self.self_ref.upgrade() else { return };
        self.loop_handle.register_handler(TargetId::Connection(id), EventType::TIMER, move |event| {
            if let Some(timer_id) = ServerCore::timer_fired_id(event) {
                if let Ok(mut core) = core.lock() {
                    core.on_timer(id, timer_id);
                }
            }
        });
    }

    fn on_timer(&mut self, id: ConnectionId, timer_id: TimerId) {
        let Some(kind) =
            self.slots.get(&id).and_then(|s| s.timers.iter().find(|(_, v)| **v == timer_id).map(|(k, _)| *k))
        else {
            return;
        };
        let Some(slot) = self.slots.get_mut(&id) else { return };
        let actions = slot.proto.on_timer(kind);
        self.run_actions(id, actions);
    }

    fn timer_fired_id(event: &Event) -> Option<TimerId> {
        match &event.data {
            EventData::TimerFired { timer_id } => Some(*timer_id),
            _ => None,
        }
    }

    #[instrument(skip(self, payload), fields(len = payload.len()))]
    fn on_frame(&mut self, token: Token, payload: &[u8]) {
        let id = conn_id_for(token);
        let Some(slot) = self.slots.get_mut(&id) else { return };
        match slot.proto.on_frame(payload) {
            Ok(actions) => self.run_actions(id, actions),
            Err(err) => {
                warn!(?id, %err, "switchlink-server: malformed frame, closing connection");
                self.reactor.lock().unwrap().close(token);
                self.teardown(id, format!("protocol error: {err}"));
            }
        }
    }

    fn on_closed(&mut self, token: Token) {
        let id = conn_id_for(token);
        if let Some(slot) = self.slots.get_mut(&id) {
            let actions = slot.proto.on_disconnect("the reactor reported the peer disconnected");
            self.run_actions(id, actions);
        }
        self.teardown(id, "peer disconnected".to_string());
    }

    fn teardown(&mut self, id: ConnectionId, reason: String) {
        if let Some(slot) = self.slots.remove(&id) {
            for timer_id in slot.timers.into_values() {
                self.loop_handle.cancel_timer(timer_id);
            }
        }
        self.loop_handle.unregister_target(TargetId::Connection(id));
        self.switcher.unregister_client(id);
        debug!(?id, %reason, "switchlink-server: connection removed");
    }

    fn run_actions(&mut self, id: ConnectionId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(msg) => self.send(id, msg),
                Action::ArmTimer { kind, period, one_shot } => self.arm_timer(id, kind, period, one_shot),
                Action::CancelTimer(kind) => self.cancel_timer(id, kind),
                Action::Emit(ev) => self.on_conn_event(id, ev),
                Action::Close => self.close(id),
            }
        }
    }

    fn send(&mut self, id: ConnectionId, msg: Message) {
        let Some(slot) = self.slots.get(&id) else { return };
        let version = slot.proto.version();
        let token = slot.token;
        self.reactor.lock().unwrap().write_or_enqueue_with(token, move |buf| msg.encode(version, buf));
    }

    fn arm_timer(&mut self, id: ConnectionId, kind: TimerKind, period: Duration, one_shot: bool) {
        self.cancel_timer(id, kind);
        let timer_id = self.loop_handle.add_timer(TargetId::Connection(id), period, one_shot);
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.timers.insert(kind, timer_id);
        }
    }

    fn cancel_timer(&mut self, id: ConnectionId, kind: TimerKind) {
        let Some(slot) = self.slots.get_mut(&id) else { return };
        if let Some(timer_id) = slot.timers.remove(&kind) {
            self.loop_handle.cancel_timer(timer_id);
        }
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(slot) = self.slots.get(&id) {
            self.reactor.lock().unwrap().close(slot.token);
        }
    }

    /// Forwards `msg` to every connected client other than `from`, the
    /// clipboard-sharing half of the switching design: whichever client (or
    /// the server) grabs the clipboard, every *other* client's copy goes
    /// stale and needs the update.
    fn relay(&mut self, from: ConnectionId, msg: Message) {
        let targets: Vec<ConnectionId> = self.slots.keys().copied().filter(|k| *k != from).collect();
        for target in targets {
            self.send(target, msg.clone());
        }
    }

    #[instrument(skip(self, event))]
    fn on_conn_event(&mut self, id: ConnectionId, event: ConnEvent) {
        match event {
            ConnEvent::Connected { peer_name, version } => {
                if let Some(name) = &peer_name {
                    if let Some(slot) = self.slots.get_mut(&id) {
                        slot.name = Some(name.clone());
                    }
                }
                info!(?id, ?peer_name, ?version, "switchlink-server: handshake complete");
            }
            ConnEvent::ScreenInfo(fields) => {
                if let Some(name) = self.slots.get(&id).and_then(|s| s.name.clone()) {
                    self.switcher.resolver_mut().add_screen(
                        name.clone(),
                        ScreenGeometry { grid_x: 1, grid_y: 0, width: fields.width, height: fields.height },
                    );
                    self.switcher.register_client(name, id);
                }
            }
            ConnEvent::ClipboardGrabbed { slot, seq } => self.relay(id, Message::ClipboardGrab { slot, seq }),
            ConnEvent::ClipboardData { slot, seq, data } => {
                self.relay(id, Message::ClipboardData { slot, seq, data });
            }
            ConnEvent::ScreenSaver(active) => self.relay(id, Message::ScreenSaver { active }),
            ConnEvent::Disconnected { reason } => self.teardown(id, reason),
            other => trace!(?id, ?other, "switchlink-server: event has no server-side handling"),
        }
    }

    /// The hook a real `Screen` backend calls as its cursor crosses the
    /// server's own screen bounds. No backend ships in this crate (see
    /// [`NullScreen`]); this only wires the decision through.
    #[instrument(skip(self, mask))]
    pub fn report_primary_motion(&mut self, x: i32, y: i32, mask: KeyModifierMask) {
        let (width, height) = self.local_shape;
        match self.switcher.on_primary_motion(x, y, width, height, mask) {
            SwitchOutcome::Stayed => {}
            SwitchOutcome::SwitchedToRemote { connection, enter } => self.send(connection, enter),
        }
    }

    /// The hook a real `Screen` backend calls to release the cursor back to
    /// the local machine (e.g. a configured hotkey).
    pub fn report_return_to_local(&mut self) {
        if let Some(prev) = self.switcher.return_to_local() {
            self.send(prev, Message::Leave);
        }
    }
}

/// A cheaply cloneable handle to a running server, for a platform `Screen`
/// backend (or a test) to report cursor motion through.
#[derive(Clone)]
pub struct ServerHandle {
    core: Arc<Mutex<ServerCore>>,
    quit: Arc<AtomicBool>,
    loop_handle: EventLoopHandle,
}

impl ServerHandle {
    pub fn report_primary_motion(&self, x: i32, y: i32, mask: KeyModifierMask) {
        self.core.lock().unwrap().report_primary_motion(x, y, mask);
    }

    pub fn report_return_to_local(&self) {
        self.core.lock().unwrap().report_return_to_local();
    }

    pub fn shutdown(&self) {
        self.quit.store(true, Ordering::SeqCst);
        self.loop_handle.quit();
    }
}

fn connection_template(cli: &Cli) -> ConnectionConfig {
    ConnectionConfig {
        local_name: cli.screen_name.clone(),
        heartbeat_rate: Duration::from_secs(cli.heartbeat_rate_secs),
        keepalives_until_death: cli.keepalives_until_death,
        handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
        local_screen_info: None,
    }
}

struct Built {
    event_loop: EventLoop,
    handle: ServerHandle,
    reactor: Arc<Mutex<Reactor>>,
    waker: Arc<Waker>,
}

/// Binds the listener and wires the reactor demux handler, but starts
/// neither the reactor thread nor the event loop — shared setup for both
/// [`run`] (blocks the caller) and [`spawn`] (runs in the background).
fn build(cli: &Cli) -> Result<Built, ServerError> {
    if cli.topology.is_some() {
        warn!("switchlink-server: --topology parsing is out of scope; running with the built-in single-neighbour placeholder topology");
    }

    let mut reactor = Reactor::new().map_err(ServerError::Reactor)?;
    reactor.listen_at(cli.listen).map_err(ServerError::Bind)?;
    let waker = reactor.waker();
    let reactor = Arc::new(Mutex::new(reactor));

    let event_loop = EventLoop::new();
    let loop_handle = event_loop.handle();

    let core = ServerCore::new(
        reactor.clone(),
        loop_handle.clone(),
        cli.screen_name.clone(),
        (cli.width, cli.height),
        connection_template(cli),
    );

    {
        let core = core.clone();
        loop_handle.register_handler(TargetId::Reactor, EventType::WILDCARD, move |event: &Event| {
            let EventData::Bytes(buf) = &event.data else { return };
            if buf.len() < 4 {
                return;
            }
            let token = Token(u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize);
            let Ok(mut core) = core.lock() else { return };
            if event.ty == EV_ACCEPTED {
                core.on_accept(token);
            } else if event.ty == EV_CLOSED {
                core.on_closed(token);
            } else if event.ty == EV_FRAME {
                core.on_frame(token, &buf[4..]);
            }
        });
    }

    let quit = Arc::new(AtomicBool::new(false));
    let handle = ServerHandle { core, quit, loop_handle };
    Ok(Built { event_loop, handle, reactor, waker })
}

/// Starts the reactor thread and blocks the caller running the event loop.
/// Returns once the loop dispatches `QUIT` (SIGINT/SIGTERM, or
/// [`ServerHandle::shutdown`]).
pub fn run(cli: Cli) -> Result<(), ServerError> {
    let addr = cli.listen;
    let Built { event_loop, handle, reactor, waker } = build(&cli)?;
    install_signal_handlers(handle.quit.clone(), handle.loop_handle.clone(), waker.clone())?;

    let reactor_thread = {
        let quit = handle.quit.clone();
        let loop_handle = handle.loop_handle.clone();
        thread::spawn(move || reactor_thread_main(reactor, loop_handle, quit))
    };

    info!(listen = %addr, "switchlink-server: accepting connections");
    event_loop.run();
    handle.quit.store(true, Ordering::SeqCst);
    let _ = waker.wake();
    let _ = reactor_thread.join();
    Ok(())
}

/// Like [`run`], but drives the event loop and reactor on background
/// threads and returns immediately with a [`ServerHandle`] a caller (a
/// platform `Screen` backend, or a test) can report motion through and
/// later shut down.
pub fn spawn(cli: Cli) -> Result<ServerHandle, ServerError> {
    let addr = cli.listen;
    let Built { event_loop, handle, reactor, waker } = build(&cli)?;
    install_signal_handlers(handle.quit.clone(), handle.loop_handle.clone(), waker.clone())?;

    {
        let quit = handle.quit.clone();
        let loop_handle = handle.loop_handle.clone();
        thread::spawn(move || reactor_thread_main(reactor, loop_handle, quit));
    }
    {
        let quit = handle.quit.clone();
        thread::spawn(move || {
            event_loop.run();
            quit.store(true, Ordering::SeqCst);
        });
    }

    info!(listen = %addr, "switchlink-server: accepting connections");
    Ok(handle)
}

/// The socket reactor's own thread (§4.2): blocks in `poll`, demultiplexes
/// readiness into frame/accept/close events posted onto the event loop.
/// Woken early by `mio::Waker` on shutdown, standing in for the design's
/// unblock pipe.
fn reactor_thread_main(reactor: Arc<Mutex<Reactor>>, handle: EventLoopHandle, quit: Arc<AtomicBool>) {
    while !quit.load(Ordering::SeqCst) {
        let mut guard = reactor.lock().unwrap();
        let result = guard.poll(Some(Duration::from_millis(250)), |ev| {
            let event = match ev {
                ReactorEvent::Accepted { stream, .. } => {
                    Event::new(EV_ACCEPTED, TargetId::Reactor, EventData::Bytes(token_bytes(stream)))
                }
                ReactorEvent::Closed { token } => {
                    Event::new(EV_CLOSED, TargetId::Reactor, EventData::Bytes(token_bytes(token)))
                }
                ReactorEvent::Frame { token, payload } => {
                    let mut buf = token_bytes(token);
                    buf.extend_from_slice(payload);
                    Event::new(EV_FRAME, TargetId::Reactor, EventData::Bytes(buf))
                }
            };
            handle.add_event(event);
        });
        drop(guard);
        if let Err(err) = result {
            warn!(%err, "switchlink-server: reactor poll failed");
        }
    }
}

fn token_bytes(token: Token) -> Vec<u8> {
    (token.0 as u32).to_be_bytes().to_vec()
}

/// Registers SIGINT/SIGTERM/SIGHUP with `signal-hook`'s `Signals` iterator
/// and spawns a dedicated thread that blocks on it — the "signal-reader
/// task" the concurrency design calls for rather than running application
/// logic inside a signal handler. The thread does nothing but translate the
/// next delivered signal into a shutdown: no per-signal behaviour is needed
/// since any of the three means the same thing here.
fn install_signal_handlers(
    quit: Arc<AtomicBool>,
    loop_handle: EventLoopHandle,
    waker: Arc<Waker>,
) -> Result<(), ServerError> {
    let mut signals = Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGHUP,
    ])
    .map_err(ServerError::Signal)?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "switchlink-server: signal received, shutting down");
        }
        quit.store(true, Ordering::SeqCst);
        let _ = waker.wake();
        loop_handle.quit();
    });
    Ok(())
}
