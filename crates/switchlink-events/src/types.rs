/// Generational index identifying a connection. Unlike the original's raw
/// object-address identity, a stale id referring to a torn-down connection
/// is detectable (generation mismatch) instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Identity an [`Event`] is addressed to. A target has at most one owning
/// event loop at a time (enforced by `switchlink-events` only ever running on
/// the thread that calls [`crate::EventLoop::run`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetId {
    System,
    Connection(ConnectionId),
    Reactor,
}

/// A 16-bit event type tag. The loop itself only understands the four
/// built-in constants below; everything else is opaque application data the
/// loop dispatches by exact (target, type) match or falls back to a
/// registered wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType(pub u16);

impl EventType {
    /// Never dispatched; `add_event` silently drops it. Reserved for
    /// "no event" sentinels in application code.
    pub const UNKNOWN: EventType = EventType(0);
    /// Generic system-level placeholder; synthetic, dropped by `add_event`
    /// like [`EventType::TIMER`] — concrete system conditions (quit,
    /// reload) get their own type constants above this range.
    pub const SYSTEM: EventType = EventType(1);
    /// Emitted only by the loop itself when a timer fires; posting this type
    /// through `add_event` is dropped, matching the original's rule that
    /// timer events can't be synthesised by application code.
    pub const TIMER: EventType = EventType(2);
    pub const QUIT: EventType = EventType(3);
    /// Matches any type for a target with no specific handler registered.
    pub const WILDCARD: EventType = EventType(u16::MAX);

    /// First type value available for application use.
    pub const FIRST_USER_TYPE: u16 = 16;

    pub const fn user(offset: u16) -> EventType {
        EventType(Self::FIRST_USER_TYPE + offset)
    }

    pub(crate) fn is_synthetic(self) -> bool {
        matches!(self, EventType::UNKNOWN | EventType::SYSTEM | EventType::TIMER)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u8 {
        /// Bypass the queue entirely: dispatch inline, on the calling
        /// thread, before `add_event` returns.
        const DELIVER_IMMEDIATELY = 0x01;
    }
}

/// Payload carried by an [`Event`]. Replaces the original's `void*` with
/// manual lifetime management: ownership moves with the `Event` and is
/// dropped automatically once dispatch returns.
#[derive(Debug, Clone)]
pub enum EventData {
    Empty,
    Bytes(Vec<u8>),
    Key { id: u16, mask: u16, button: u16, repeat_count: u16 },
    Button { id: u8, pressed: bool },
    Motion { x: i32, y: i32, relative: bool },
    Wheel { dx: i32, dy: i32 },
    TimerFired { timer_id: u64 },
    ConnectionFailure { reason: String },
}

#[derive(Debug, Clone)]
pub struct Event {
    pub ty: EventType,
    pub target: TargetId,
    pub flags: EventFlags,
    pub data: EventData,
}

impl Event {
    pub fn new(ty: EventType, target: TargetId, data: EventData) -> Self {
        Self { ty, target, flags: EventFlags::empty(), data }
    }

    pub fn immediate(ty: EventType, target: TargetId, data: EventData) -> Self {
        Self { ty, target, flags: EventFlags::DELIVER_IMMEDIATELY, data }
    }
}
