//! The connection state machine: one instance per peer, independent of
//! transport and event loop. Feeding it frame payloads and timer firings
//! produces a list of [`Action`]s for the caller to carry out — sends,
//! timer arm/cancel requests, and high-level events to post onto the event
//! loop. `Connection` never touches a socket or a `switchlink-events`
//! handle directly; see `switchlink-switch` for the glue that does.

use std::time::Duration;

use switchlink_wire::{
    ClipboardSlot, KeyModifierMask, Message, ProtocolVersion, message::ChunkMark,
};
use tracing::{trace, warn};

use crate::{ProtoError, file_transfer::FileTransferAssembler};

/// Which end of the wire this `Connection` represents. The state machine is
/// shared between both roles (replacing the original's `ServerProxy` /
/// `ClientProxy1_x` split); only the handshake direction differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

/// States named exactly as enumerated by the protocol design: `AWAIT_CONNECT
/// → SEND_HELLO → AWAIT_HELLO_BACK → AWAIT_INFO → CONNECTED → {DISCONNECTING,
/// DEAD}`. `AwaitInfo` covers two sub-steps on the client side (waiting for
/// `QINF`, then waiting for `CIAK` after replying with `DINF`); `Connection`
/// tracks which with `info_ack_pending` rather than adding states the design
/// doesn't name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitConnect,
    SendHello,
    AwaitHelloBack,
    AwaitInfo,
    Connected,
    Disconnecting,
    Dead,
}

/// A timer `Connection` asks its caller to arm or cancel. `Connection` holds
/// no timer ids of its own — the caller (the switcher, in the shipped
/// daemon) maps `(ConnectionId, TimerKind)` to whatever id its event loop
/// handed back, so the same `TimerKind` can be rearmed without `Connection`
/// needing to track anything beyond its own state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Handshake must reach `CONNECTED` before this fires or the connection
    /// is torn down.
    HandshakeDeadline,
    /// Protocol 1.3+: periodic outbound `CALV`, no echo expected.
    KeepaliveSend,
    /// Watchdog: no inbound traffic for `heartbeat_rate * keepalives_until_death`
    /// means the peer is dead. Reset on every inbound frame while `Connected`.
    HeartbeatDeadline,
}

/// Everything `Connection` asks its caller to do in response to one input.
/// Replaces the original's direct calls into `IEventQueue`/`IStream` from
/// deep inside the proxy classes: here the state machine only describes
/// intent, and `switchlink-switch` carries it out.
#[derive(Debug, Clone)]
pub enum Action {
    /// Encode and send `msg` at the connection's negotiated version.
    Send(Message),
    ArmTimer { kind: TimerKind, period: Duration, one_shot: bool },
    CancelTimer(TimerKind),
    /// Post a high-level event for application logic (the switcher) to
    /// react to.
    Emit(ConnEvent),
    /// Shut down the transport. Always paired with a state transition to
    /// `Disconnecting` or `Dead`.
    Close,
}

/// High-level events the connection state machine produces for the switcher
/// or any other consumer sitting above the protocol layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnEvent {
    Connected { peer_name: Option<String>, version: ProtocolVersion },
    ScreenInfo(ScreenInfoFields),
    Entered { x: i32, y: i32, seq: u32, mask: KeyModifierMask },
    Left,
    KeyDown { id: u16, mask: KeyModifierMask, button: u16 },
    KeyRepeat { id: u16, mask: KeyModifierMask, button: u16, count: u16 },
    KeyUp { id: u16, mask: KeyModifierMask, button: u16 },
    MouseDown(u8),
    MouseUp(u8),
    MouseMove { x: i32, y: i32 },
    MouseRelMove { dx: i32, dy: i32 },
    MouseWheel { dx: i32, dy: i32 },
    ClipboardGrabbed { slot: ClipboardSlot, seq: u32 },
    ClipboardData { slot: ClipboardSlot, seq: u32, data: Vec<u8> },
    ScreenSaver(bool),
    ResetOptions,
    SetOptions(Vec<u8>),
    DragInfo { file_count: u16, raw: Vec<u8> },
    FileTransferComplete { data: Vec<u8> },
    Disconnected { reason: String },
}

/// `ScreenInfo` data model (§3): the server's or a client's screen geometry
/// and current cursor position, exchanged via `DINF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScreenInfoFields {
    pub origin_x: i32,
    pub origin_y: i32,
    pub width: i32,
    pub height: i32,
    pub jump_zone: i32,
    pub cursor_x: i32,
    pub cursor_y: i32,
}

impl From<ScreenInfoFields> for Message {
    fn from(f: ScreenInfoFields) -> Self {
        Message::ScreenInfo {
            origin_x: f.origin_x,
            origin_y: f.origin_y,
            width: f.width,
            height: f.height,
            jump_zone: f.jump_zone,
            cursor_x: f.cursor_x,
            cursor_y: f.cursor_y,
        }
    }
}

/// Tuning knobs for one connection, grounded on `ClientProxy1_3`'s
/// `kKeepAliveRate` / `kKeepAlivesUntilDeath` constants and the design's
/// default 30s handshake deadline.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub local_name: String,
    pub heartbeat_rate: Duration,
    pub keepalives_until_death: u32,
    pub handshake_timeout: Duration,
    pub local_screen_info: Option<ScreenInfoFields>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            local_name: String::new(),
            heartbeat_rate: Duration::from_secs(3),
            keepalives_until_death: 3,
            handshake_timeout: Duration::from_secs(30),
            local_screen_info: None,
        }
    }
}

impl ConnectionConfig {
    fn heartbeat_deadline(&self) -> Duration {
        self.heartbeat_rate.saturating_mul(self.keepalives_until_death)
    }
}

/// One peer connection's protocol state. Pure and synchronous: every public
/// method takes an input (a frame, a timer firing) and returns the
/// [`Action`]s the caller must carry out; `Connection` never blocks and
/// never reaches outside itself.
pub struct Connection {
    side: Side,
    state: ConnState,
    config: ConnectionConfig,
    version: ProtocolVersion,
    peer_name: Option<String>,
    /// Client-only: whether `DINF` has already been sent and we're now
    /// waiting on `CIAK` rather than `QINF`.
    info_ack_pending: bool,
    last_seen_seq: [u32; 4],
    has_seen_seq: [bool; 4],
    file_transfer: FileTransferAssembler,
}

fn clipboard_slot_index(slot: ClipboardSlot) -> usize {
    (slot.0 as usize) % 4
}

impl Connection {
    /// Constructs a server-side connection and returns the actions needed
    /// to kick off the handshake: send the hello, arm the handshake
    /// deadline.
    pub fn server(config: ConnectionConfig) -> (Connection, Vec<Action>) {
        let mut conn = Connection::new(Side::Server, config);
        conn.state = ConnState::AwaitHelloBack;
        let actions = vec![
            Action::Send(Message::HelloFromServer { version: ProtocolVersion::CURRENT }),
            Action::ArmTimer {
                kind: TimerKind::HandshakeDeadline,
                period: conn.config.handshake_timeout,
                one_shot: true,
            },
        ];
        (conn, actions)
    }

    /// Constructs a client-side connection. The client doesn't speak first:
    /// it only arms the handshake deadline and waits for the server's hello.
    pub fn client(config: ConnectionConfig) -> (Connection, Vec<Action>) {
        let mut conn = Connection::new(Side::Client, config);
        conn.state = ConnState::AwaitHelloBack;
        let actions = vec![Action::ArmTimer {
            kind: TimerKind::HandshakeDeadline,
            period: conn.config.handshake_timeout,
            one_shot: true,
        }];
        (conn, actions)
    }

    fn new(side: Side, config: ConnectionConfig) -> Connection {
        Connection {
            side,
            state: ConnState::AwaitConnect,
            version: ProtocolVersion::CURRENT,
            peer_name: None,
            info_ack_pending: false,
            last_seen_seq: [0; 4],
            has_seen_seq: [false; 4],
            file_transfer: FileTransferAssembler::default(),
            config,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    /// Supplies (or updates) the screen geometry this side will report via
    /// `DINF`. A client must call this before a `QINF` arrives, or receiving
    /// one is a fatal [`ProtoError::LocalInfoNotSet`].
    pub fn set_local_screen_info(&mut self, info: ScreenInfoFields) {
        self.config.local_screen_info = Some(info);
    }

    /// Feeds one fully-framed payload (length prefix already stripped) to
    /// the state machine.
    pub fn on_frame(&mut self, payload: &[u8]) -> Result<Vec<Action>, ProtoError> {
        match self.state {
            ConnState::AwaitHelloBack => self.on_handshake_frame(payload),
            ConnState::AwaitInfo | ConnState::Connected => self.on_message_frame(payload),
            ConnState::AwaitConnect | ConnState::SendHello => Err(ProtoError::UnexpectedMessage {
                code: payload.get(..4).and_then(|s| s.try_into().ok()).unwrap_or(*b"????"),
                state: "pre-handshake",
            }),
            ConnState::Disconnecting | ConnState::Dead => Ok(Vec::new()),
        }
    }

    /// Called by the caller once the underlying transport reports it's
    /// connected (relevant to `Side::Client`, whose `AWAIT_CONNECT` step is
    /// otherwise invisible to this state machine).
    pub fn on_transport_connected(&mut self) {
        if self.state == ConnState::AwaitConnect {
            self.state = ConnState::AwaitHelloBack;
        }
    }

    pub fn on_timer(&mut self, kind: TimerKind) -> Vec<Action> {
        match kind {
            TimerKind::HandshakeDeadline => {
                if self.state == ConnState::Connected
                    || self.state == ConnState::Dead
                    || self.state == ConnState::Disconnecting
                {
                    return Vec::new();
                }
                self.state = ConnState::Dead;
                vec![
                    Action::Send(Message::ErrorBad),
                    Action::Close,
                    Action::Emit(ConnEvent::Disconnected { reason: "handshake timed out".into() }),
                ]
            }
            TimerKind::KeepaliveSend => {
                if self.state == ConnState::Connected && self.version.at_least(1, 3) {
                    vec![Action::Send(Message::Heartbeat)]
                } else {
                    Vec::new()
                }
            }
            TimerKind::HeartbeatDeadline => {
                if self.state != ConnState::Connected {
                    return Vec::new();
                }
                self.state = ConnState::Dead;
                self.file_transfer.discard();
                vec![
                    Action::Close,
                    Action::Emit(ConnEvent::Disconnected { reason: "heartbeat timeout".into() }),
                ]
            }
        }
    }

    fn on_handshake_frame(&mut self, payload: &[u8]) -> Result<Vec<Action>, ProtoError> {
        if !payload.starts_with(switchlink_wire::HELLO_MAGIC) {
            return Err(ProtoError::BadHandshakeMagic);
        }
        let mut r = switchlink_wire::FrameReader::new(&payload[switchlink_wire::HELLO_MAGIC.len()..]);
        let major = r.get_u16()?;
        let minor = r.get_u16()?;

        match self.side {
            Side::Client => {
                // This is the server's hello: magic + major + minor, no name.
                let server_version = ProtocolVersion::new(major, minor);
                if server_version.major < ProtocolVersion::MIN_SUPPORTED_MAJOR {
                    self.state = ConnState::Dead;
                    return Ok(vec![
                        Action::Close,
                        Action::Emit(ConnEvent::Disconnected {
                            reason: format!("server protocol {major}.{minor} unsupported"),
                        }),
                    ]);
                }
                self.version = server_version.min(ProtocolVersion::CURRENT);
                self.state = ConnState::AwaitInfo;
                self.info_ack_pending = false;
                Ok(vec![
                    Action::CancelTimer(TimerKind::HandshakeDeadline),
                    Action::Send(Message::HelloFromClient {
                        version: ProtocolVersion::CURRENT,
                        client_name: self.config.local_name.clone(),
                    }),
                    Action::ArmTimer {
                        kind: TimerKind::HandshakeDeadline,
                        period: self.config.handshake_timeout,
                        one_shot: true,
                    },
                ])
            }
            Side::Server => {
                // This is the client's hello: magic + major + minor + name.
                let name = r.get_string()?;
                if major < ProtocolVersion::MIN_SUPPORTED_MAJOR {
                    self.state = ConnState::Dead;
                    return Ok(vec![
                        Action::Send(Message::ErrorBad),
                        Action::Close,
                        Action::Emit(ConnEvent::Disconnected {
                            reason: format!("client protocol {major}.{minor} unsupported"),
                        }),
                    ]);
                }
                let client_version = ProtocolVersion::new(major, minor);
                // Downgrade to the client's version if it's older than ours.
                self.version = client_version.min(ProtocolVersion::CURRENT);
                self.peer_name = Some(name);
                self.state = ConnState::AwaitInfo;
                Ok(vec![
                    Action::CancelTimer(TimerKind::HandshakeDeadline),
                    Action::Send(Message::QueryInfo),
                    Action::ArmTimer {
                        kind: TimerKind::HandshakeDeadline,
                        period: self.config.handshake_timeout,
                        one_shot: true,
                    },
                ])
            }
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, ProtoError> {
        if payload.len() < switchlink_wire::CODE_SIZE {
            return Err(ProtoError::Wire(switchlink_wire::WireError::Truncated));
        }
        let code: switchlink_wire::MessageCode = payload[..switchlink_wire::CODE_SIZE].try_into().unwrap();
        Message::decode(code, payload, self.version).map_err(ProtoError::Wire)
    }

    fn on_message_frame(&mut self, payload: &[u8]) -> Result<Vec<Action>, ProtoError> {
        let msg = match self.decode(payload) {
            Ok(msg) => msg,
            Err(ProtoError::Wire(switchlink_wire::WireError::UnknownCode(code))) if self.state == ConnState::Connected => {
                trace!(?code, "switchlink-proto: unrecognised message code, ignoring");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        if self.state == ConnState::AwaitInfo {
            return self.on_info_phase_message(msg);
        }

        let actions = self.on_connected_message(msg)?;
        self.reset_heartbeat_watchdog(actions)
    }

    fn on_info_phase_message(&mut self, msg: Message) -> Result<Vec<Action>, ProtoError> {
        match (self.side, msg) {
            (Side::Server, Message::ScreenInfo { origin_x, origin_y, width, height, jump_zone, cursor_x, cursor_y }) => {
                let fields =
                    ScreenInfoFields { origin_x, origin_y, width, height, jump_zone, cursor_x, cursor_y };
                self.state = ConnState::Connected;
                let mut actions = vec![
                    Action::CancelTimer(TimerKind::HandshakeDeadline),
                    Action::Send(Message::InfoAck),
                    Action::Emit(ConnEvent::Connected { peer_name: self.peer_name.clone(), version: self.version }),
                    Action::Emit(ConnEvent::ScreenInfo(fields)),
                ];
                actions.extend(self.arm_heartbeat_timers());
                Ok(actions)
            }
            (Side::Client, Message::QueryInfo) if !self.info_ack_pending => {
                let info = self.config.local_screen_info.ok_or(ProtoError::LocalInfoNotSet)?;
                self.info_ack_pending = true;
                Ok(vec![Action::Send(info.into())])
            }
            (Side::Client, Message::InfoAck) if self.info_ack_pending => {
                self.state = ConnState::Connected;
                let mut actions = vec![
                    Action::CancelTimer(TimerKind::HandshakeDeadline),
                    Action::Emit(ConnEvent::Connected { peer_name: self.peer_name.clone(), version: self.version }),
                ];
                actions.extend(self.arm_heartbeat_timers());
                Ok(actions)
            }
            (_, Message::ErrorBusy | Message::ErrorBad | Message::ErrorUnknown) => {
                self.state = ConnState::Dead;
                Ok(vec![
                    Action::Close,
                    Action::Emit(ConnEvent::Disconnected { reason: "peer sent a fatal error during handshake".into() }),
                ])
            }
            (_, other) => {
                warn!(?other, "switchlink-proto: unexpected message while awaiting info exchange");
                Err(ProtoError::UnexpectedMessage { code: code_of(&other), state: "await_info" })
            }
        }
    }

    /// Timers that become live once `CONNECTED` is reached: for 1.0-1.2 the
    /// server alone drives `CALV`, so only the watchdog is armed here and
    /// the server's own periodic sender is the switcher's job (it owns the
    /// "send CALV every heartbeat_rate" timer across all connections); for
    /// 1.3+ each side arms its own recurring `KeepaliveSend`.
    fn arm_heartbeat_timers(&self) -> Vec<Action> {
        let mut actions = vec![Action::ArmTimer {
            kind: TimerKind::HeartbeatDeadline,
            period: self.config.heartbeat_deadline(),
            one_shot: true,
        }];
        if self.version.at_least(1, 3) {
            actions.push(Action::ArmTimer {
                kind: TimerKind::KeepaliveSend,
                period: self.config.heartbeat_rate,
                one_shot: false,
            });
        }
        actions
    }

    /// Any inbound traffic while `Connected` proves the peer is alive:
    /// reset the watchdog. Folded into every `Connected`-state message
    /// handler's return path rather than called piecemeal, so no call site
    /// can forget it.
    fn reset_heartbeat_watchdog(&self, mut actions: Vec<Action>) -> Result<Vec<Action>, ProtoError> {
        if self.state == ConnState::Connected {
            actions.push(Action::CancelTimer(TimerKind::HeartbeatDeadline));
            actions.push(Action::ArmTimer {
                kind: TimerKind::HeartbeatDeadline,
                period: self.config.heartbeat_deadline(),
                one_shot: true,
            });
        }
        Ok(actions)
    }

    fn on_connected_message(&mut self, msg: Message) -> Result<Vec<Action>, ProtoError> {
        Ok(match msg {
            Message::Nop => Vec::new(),
            Message::Heartbeat => {
                if self.version.at_least(1, 3) {
                    Vec::new()
                } else {
                    // <=1.2: whichever side receives CALV echoes it back.
                    vec![Action::Send(Message::Heartbeat)]
                }
            }
            Message::Enter { x, y, seq, mask } => vec![Action::Emit(ConnEvent::Entered { x, y, seq, mask })],
            Message::Leave => vec![Action::Emit(ConnEvent::Left)],
            Message::KeyDown { id, mask, button } => vec![Action::Emit(ConnEvent::KeyDown { id, mask, button })],
            Message::KeyRepeat { id, mask, button, count } => {
                vec![Action::Emit(ConnEvent::KeyRepeat { id, mask, button, count })]
            }
            Message::KeyUp { id, mask, button } => vec![Action::Emit(ConnEvent::KeyUp { id, mask, button })],
            Message::MouseDown { id } => vec![Action::Emit(ConnEvent::MouseDown(id))],
            Message::MouseUp { id } => vec![Action::Emit(ConnEvent::MouseUp(id))],
            Message::MouseMove { x, y } => vec![Action::Emit(ConnEvent::MouseMove { x, y })],
            Message::MouseRelMove { dx, dy } => vec![Action::Emit(ConnEvent::MouseRelMove { dx, dy })],
            Message::MouseWheel { dx, dy } => vec![Action::Emit(ConnEvent::MouseWheel { dx, dy })],
            Message::ClipboardGrab { slot, seq } => {
                if self.accept_seq(slot, seq) {
                    vec![Action::Emit(ConnEvent::ClipboardGrabbed { slot, seq })]
                } else {
                    trace!(?slot, seq, "switchlink-proto: stale clipboard grab ignored");
                    Vec::new()
                }
            }
            Message::ClipboardData { slot, seq, data } => {
                if self.accept_seq(slot, seq) {
                    vec![Action::Emit(ConnEvent::ClipboardData { slot, seq, data })]
                } else {
                    trace!(?slot, seq, "switchlink-proto: stale clipboard data ignored");
                    Vec::new()
                }
            }
            Message::ScreenSaver { active } => vec![Action::Emit(ConnEvent::ScreenSaver(active))],
            Message::ResetOptions => vec![Action::Emit(ConnEvent::ResetOptions)],
            Message::SetOptions { raw } => vec![Action::Emit(ConnEvent::SetOptions(raw))],
            Message::DragInfo { file_count, raw } => vec![Action::Emit(ConnEvent::DragInfo { file_count, raw })],
            Message::FileChunk { mark, data } => match self.file_transfer.on_chunk(mark, data)? {
                Some(complete) => vec![Action::Emit(ConnEvent::FileTransferComplete { data: complete })],
                None => Vec::new(),
            },
            Message::ErrorBusy | Message::ErrorBad | Message::ErrorUnknown => {
                self.state = ConnState::Dead;
                self.file_transfer.discard();
                vec![
                    Action::Close,
                    Action::Emit(ConnEvent::Disconnected { reason: "peer sent a fatal error".into() }),
                ]
            }
            Message::Close => {
                self.state = ConnState::Disconnecting;
                self.file_transfer.discard();
                vec![
                    Action::Close,
                    Action::Emit(ConnEvent::Disconnected { reason: "peer closed the connection".into() }),
                ]
            }
            other @ (Message::HelloFromServer { .. } | Message::HelloFromClient { .. }) => {
                return Err(ProtoError::UnexpectedMessage { code: code_of(&other), state: "connected" });
            }
            Message::ScreenInfo { .. } | Message::InfoAck | Message::QueryInfo => {
                // Valid only during the info exchange; a repeat after
                // CONNECTED is a protocol violation, not routine traffic.
                return Err(ProtoError::UnexpectedMessage { code: code_of(&msg), state: "connected" });
            }
        })
    }

    fn accept_seq(&mut self, slot: ClipboardSlot, seq: u32) -> bool {
        let idx = clipboard_slot_index(slot);
        if self.has_seen_seq[idx] && seq <= self.last_seen_seq[idx] {
            return false;
        }
        self.last_seen_seq[idx] = seq;
        self.has_seen_seq[idx] = true;
        true
    }

    /// Called when the transport tears down outside of a message-driven
    /// path (e.g. the reactor reports the socket closed). Discards any
    /// partial file transfer per the design's "partial transfers are
    /// discarded on disconnect" rule.
    pub fn on_disconnect(&mut self, reason: impl Into<String>) -> Vec<Action> {
        self.file_transfer.discard();
        if self.state == ConnState::Dead {
            return Vec::new();
        }
        self.state = ConnState::Dead;
        vec![Action::Emit(ConnEvent::Disconnected { reason: reason.into() })]
    }
}

/// Best-effort message code for error messages; handshake variants have no
/// wire code of their own, so this only needs to be informative, not exact.
fn code_of(msg: &Message) -> switchlink_wire::MessageCode {
    use switchlink_wire::message::codes;
    match msg {
        Message::Nop => codes::CNOP,
        Message::Heartbeat => codes::CALV,
        Message::InfoAck => codes::CIAK,
        Message::QueryInfo => codes::QINF,
        Message::ScreenInfo { .. } => codes::DINF,
        Message::Enter { .. } => codes::CINN,
        Message::Leave => codes::COUT,
        Message::KeyDown { .. } => codes::DKDN,
        Message::KeyRepeat { .. } => codes::DKRP,
        Message::KeyUp { .. } => codes::DKUP,
        Message::MouseDown { .. } => codes::DMDN,
        Message::MouseUp { .. } => codes::DMUP,
        Message::MouseMove { .. } => codes::DMMV,
        Message::MouseRelMove { .. } => codes::DMRM,
        Message::MouseWheel { .. } => codes::DMWM,
        Message::ClipboardGrab { .. } => codes::CCLP,
        Message::ClipboardData { .. } => codes::DCLP,
        Message::ScreenSaver { .. } => codes::CSEC,
        Message::ResetOptions => codes::CROP,
        Message::SetOptions { .. } => codes::DSOP,
        Message::DragInfo { .. } => codes::DFTR,
        Message::FileChunk { .. } => codes::DFCR,
        Message::ErrorBusy => codes::EBSY,
        Message::ErrorBad => codes::EBAD,
        Message::ErrorUnknown => codes::EUNK,
        Message::Close => codes::CBYE,
        Message::HelloFromServer { .. } | Message::HelloFromClient { .. } => *b"HELO",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handshake_frame(magic_and_version: &[u8]) -> Vec<u8> {
        magic_and_version.to_vec()
    }

    fn client_hello_bytes(major: u16, minor: u16, name: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(switchlink_wire::HELLO_MAGIC);
        let mut w = switchlink_wire::FrameWriter::new(&mut buf);
        w.put_u16(major).put_u16(minor).put_str(name.as_bytes());
        buf
    }

    fn server_hello_bytes(major: u16, minor: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(switchlink_wire::HELLO_MAGIC);
        switchlink_wire::FrameWriter::new(&mut buf).put_u16(major).put_u16(minor);
        buf
    }

    fn encode(msg: &Message, version: ProtocolVersion) -> Vec<u8> {
        let mut buf = Vec::new();
        msg.encode(version, &mut buf);
        buf
    }

    #[test]
    fn version_negotiation_downgrade() {
        let (mut server, _actions) = Connection::server(ConnectionConfig::default());
        let actions = server.on_frame(&client_hello_bytes(1, 5, "alice")).unwrap();
        assert_eq!(server.version(), ProtocolVersion::new(1, 5));
        assert_eq!(server.state(), ConnState::AwaitInfo);
        assert!(actions.iter().any(|a| matches!(a, Action::Send(Message::QueryInfo))));
    }

    #[test]
    fn version_reject_sends_ebad_and_dies() {
        let (mut server, _) = Connection::server(ConnectionConfig::default());
        let actions = server.on_frame(&client_hello_bytes(0, 7, "bob")).unwrap();
        assert_eq!(server.state(), ConnState::Dead);
        assert!(actions.iter().any(|a| matches!(a, Action::Send(Message::ErrorBad))));
        assert!(!actions.iter().any(|a| matches!(a, Action::Send(Message::QueryInfo))));
    }

    fn connected_server() -> Connection {
        let (mut server, _) = Connection::server(ConnectionConfig::default());
        server.on_frame(&client_hello_bytes(1, 6, "alice")).unwrap();
        let info = Message::ScreenInfo {
            origin_x: 0,
            origin_y: 0,
            width: 1920,
            height: 1080,
            jump_zone: 1,
            cursor_x: 0,
            cursor_y: 0,
        };
        server.on_frame(&encode(&info, server.version())).unwrap();
        assert_eq!(server.state(), ConnState::Connected);
        server
    }

    #[test]
    fn clipboard_grab_updates_and_then_rejects_stale_seq() {
        let mut server = connected_server();
        let grab = Message::ClipboardGrab { slot: ClipboardSlot(0), seq: 42 };
        let actions = server.on_frame(&encode(&grab, server.version())).unwrap();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Emit(ConnEvent::ClipboardGrabbed { seq: 42, .. })
        )));

        let stale = Message::ClipboardGrab { slot: ClipboardSlot(0), seq: 41 };
        let actions = server.on_frame(&encode(&stale, server.version())).unwrap();
        assert!(!actions.iter().any(|a| matches!(a, Action::Emit(ConnEvent::ClipboardGrabbed { .. }))));
    }

    #[test]
    fn key_down_with_shift_emits_matching_event() {
        let mut server = connected_server();
        let key = Message::KeyDown { id: 0x61, mask: KeyModifierMask::SHIFT, button: 0x1e };
        let actions = server.on_frame(&encode(&key, server.version())).unwrap();
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Emit(ConnEvent::KeyDown { id: 0x61, button: 0x1e, .. })
        )));
    }

    #[test]
    fn heartbeat_timeout_tears_down_connection() {
        let mut server = connected_server();
        let actions = server.on_timer(TimerKind::HeartbeatDeadline);
        assert_eq!(server.state(), ConnState::Dead);
        assert!(actions.iter().any(|a| matches!(a, Action::Close)));
        assert!(actions.iter().any(|a| matches!(a, Action::Emit(ConnEvent::Disconnected { .. }))));
    }

    #[test]
    fn pre_1_3_heartbeat_is_echoed_back() {
        let (mut server, _) = Connection::server(ConnectionConfig::default());
        server.on_frame(&client_hello_bytes(1, 2, "alice")).unwrap();
        let info = Message::ScreenInfo {
            origin_x: 0,
            origin_y: 0,
            width: 800,
            height: 600,
            jump_zone: 1,
            cursor_x: 0,
            cursor_y: 0,
        };
        server.on_frame(&encode(&info, server.version())).unwrap();
        let actions = server.on_frame(&encode(&Message::Heartbeat, server.version())).unwrap();
        assert!(actions.iter().any(|a| matches!(a, Action::Send(Message::Heartbeat))));
    }

    #[test]
    fn client_completes_handshake_after_server_hello_qinf_ciak() {
        let mut config = ConnectionConfig { local_name: "alice".into(), ..Default::default() };
        config.local_screen_info = Some(ScreenInfoFields { width: 1920, height: 1080, jump_zone: 1, ..Default::default() });
        let (mut client, _) = Connection::client(config);

        let actions = client.on_frame(&server_hello_bytes(1, 6)).unwrap();
        assert_eq!(client.state(), ConnState::AwaitInfo);
        assert!(actions.iter().any(|a| matches!(a, Action::Send(Message::HelloFromClient { .. }))));

        let actions = client.on_frame(&encode(&Message::QueryInfo, client.version())).unwrap();
        assert!(actions.iter().any(|a| matches!(a, Action::Send(Message::ScreenInfo { .. }))));

        let actions = client.on_frame(&encode(&Message::InfoAck, client.version())).unwrap();
        assert_eq!(client.state(), ConnState::Connected);
        assert!(actions.iter().any(|a| matches!(a, Action::Emit(ConnEvent::Connected { .. }))));
    }

    #[test]
    fn file_transfer_assembles_across_chunks_and_emits_once() {
        let mut server = connected_server();
        let start = Message::FileChunk { mark: ChunkMark::Start { total_size: 10 }, data: Vec::new() };
        server.on_frame(&encode(&start, server.version())).unwrap();
        let data1 = Message::FileChunk { mark: ChunkMark::Data, data: b"hello".to_vec() };
        server.on_frame(&encode(&data1, server.version())).unwrap();
        let data2 = Message::FileChunk { mark: ChunkMark::Data, data: b"world".to_vec() };
        server.on_frame(&encode(&data2, server.version())).unwrap();
        let end = Message::FileChunk { mark: ChunkMark::End, data: Vec::new() };
        let actions = server.on_frame(&encode(&end, server.version())).unwrap();
        let complete = actions.iter().find_map(|a| match a {
            Action::Emit(ConnEvent::FileTransferComplete { data }) => Some(data.clone()),
            _ => None,
        });
        assert_eq!(complete, Some(b"helloworld".to_vec()));
    }
}
