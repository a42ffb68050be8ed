//! Single-threaded event dispatcher with a thread-safe posting surface.
//!
//! Only the thread that calls [`EventLoop::run`] ever invokes a handler.
//! Every other thread — the reactor, a signal-handling thread, a timer
//! producer — reaches the loop through a cloned [`EventLoopHandle`].

mod event_loop;
mod timer;
mod types;

pub use event_loop::{EventLoop, EventLoopHandle, Handler};
pub use timer::TimerId;
pub use types::{ConnectionId, Event, EventData, EventFlags, EventType, TargetId};
