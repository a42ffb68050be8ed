use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::{
    timer::{TimerHeap, TimerId},
    types::{Event, EventData, EventFlags, EventType, TargetId},
};

/// A handler is called with a `&Event` whose addressed-to target and type
/// matched the registration (or fell back to that target's wildcard).
pub type Handler = Box<dyn FnMut(&Event) + Send>;

struct State {
    handlers: HashMap<(TargetId, EventType), Handler>,
    wildcard: HashMap<TargetId, Handler>,
    timers: TimerHeap,
    /// Events added before `run()` has signalled readiness, preserved in
    /// insertion order and moved to `ready` wholesale once the loop starts.
    pending: VecDeque<Event>,
    ready: VecDeque<Event>,
    started: bool,
    quit: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    /// Dispatches `event`, releasing the state lock before the matched
    /// handler runs and re-acquiring it afterward to put the handler back.
    /// Per the loop's contract, lookups hold the lock only to retrieve a
    /// handler, never across its invocation — a handler that reaches back
    /// into another lock (the reactor's, for instance) must never be able to
    /// deadlock against a thread that holds that lock and wants this one.
    fn dispatch<'a>(&'a self, mut state: MutexGuard<'a, State>, event: Event) -> MutexGuard<'a, State> {
        let key = (event.target, event.ty);
        let taken = match state.handlers.remove(&key) {
            Some(h) => Some((true, h)),
            None => state.wildcard.remove(&event.target).map(|h| (false, h)),
        };

        if event.target == TargetId::System && event.ty == EventType::QUIT {
            state.quit = true;
        }
        drop(state);

        let taken = match taken {
            Some((from_handlers, mut h)) => {
                h(&event);
                Some((from_handlers, h))
            }
            None => {
                trace!(?event.target, ?event.ty, "switchlink-events: no handler, dropping");
                None
            }
        };

        let mut state = self.state.lock().unwrap();
        if let Some((from_handlers, h)) = taken {
            if from_handlers {
                state.handlers.insert(key, h);
            } else {
                state.wildcard.insert(event.target, h);
            }
        }
        state
    }
}

/// Single-threaded dispatcher: only the thread that calls [`EventLoop::run`]
/// ever invokes a handler. Every other thread reaches the loop exclusively
/// through a cloned [`EventLoopHandle`], whose entry points take the same
/// mutex `run` uses for its own bookkeeping.
pub struct EventLoop {
    shared: Arc<Shared>,
}

/// Cheaply cloneable, thread-safe handle for posting events, timers, and
/// handler registrations into an [`EventLoop`] from any thread.
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<Shared>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    handlers: HashMap::new(),
                    wildcard: HashMap::new(),
                    timers: TimerHeap::default(),
                    pending: VecDeque::new(),
                    ready: VecDeque::new(),
                    started: false,
                    quit: false,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle { shared: self.shared.clone() }
    }

    /// Initialises the queue, drains anything queued before startup in
    /// insertion order, then dispatches until a `QUIT` event addressed to
    /// [`TargetId::System`] is handled.
    ///
    /// On each wake: expired timers fire first, then at most one queued
    /// event is dispatched, then the loop waits again for whichever of
    /// "next timer deadline" or "new event" comes first.
    pub fn run(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.started = true;
            while let Some(e) = state.pending.pop_front() {
                state.ready.push_back(e);
            }
        }
        self.shared.cond.notify_all();

        loop {
            let mut state = self.shared.state.lock().unwrap();
            if state.quit {
                return;
            }

            let now = Instant::now();
            let mut fired = Vec::new();
            state.timers.fire_expired(now, |target, id| fired.push((target, id)));
            for (target, id) in fired {
                let ev = Event::new(EventType::TIMER, target, EventData::TimerFired { timer_id: id });
                state = self.shared.dispatch(state, ev);
                if state.quit {
                    return;
                }
            }

            if let Some(event) = state.ready.pop_front() {
                let _state = self.shared.dispatch(state, event);
                continue;
            }

            let wait_for = state.timers.next_deadline().map(|d| d.saturating_duration_since(now));
            match wait_for {
                Some(d) if d > Duration::ZERO => {
                    let _ = self.shared.cond.wait_timeout(state, d).unwrap();
                }
                Some(_) => continue,
                None => {
                    let _ = self.shared.cond.wait(state).unwrap();
                }
            }
        }
    }
}

impl EventLoopHandle {
    /// Registers `handler` for `(target, ty)`. Use [`EventType::WILDCARD`] to
    /// register a catch-all for `target`.
    pub fn register_handler<F>(&self, target: TargetId, ty: EventType, handler: F)
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        if ty == EventType::WILDCARD {
            state.wildcard.insert(target, Box::new(handler));
        } else {
            state.handlers.insert((target, ty), Box::new(handler));
        }
    }

    /// Unregisters every handler (specific and wildcard) for `target` and
    /// drops any events still queued for it, atomically.
    pub fn unregister_target(&self, target: TargetId) {
        let mut state = self.shared.state.lock().unwrap();
        state.handlers.retain(|(t, _), _| *t != target);
        state.wildcard.remove(&target);
        state.pending.retain(|e| e.target != target);
        state.ready.retain(|e| e.target != target);
    }

    pub fn add_timer(&self, target: TargetId, period: Duration, one_shot: bool) -> TimerId {
        let mut state = self.shared.state.lock().unwrap();
        let id = state.timers.insert(target, period, one_shot);
        drop(state);
        self.shared.cond.notify_one();
        id
    }

    pub fn cancel_timer(&self, id: TimerId) {
        let mut state = self.shared.state.lock().unwrap();
        state.timers.cancel(id);
    }

    /// Queues `event` for dispatch, or — if `event.flags` has
    /// [`EventFlags::DELIVER_IMMEDIATELY`] set — dispatches it right now, on
    /// the calling thread, before returning.
    ///
    /// Events of type [`EventType::UNKNOWN`], [`EventType::SYSTEM`], or
    /// [`EventType::TIMER`] are synthetic and silently dropped: application
    /// code cannot forge a timer firing or an internal system event.
    pub fn add_event(&self, event: Event) {
        if event.ty.is_synthetic() {
            return;
        }

        let state = self.shared.state.lock().unwrap();

        if event.flags.contains(EventFlags::DELIVER_IMMEDIATELY) {
            self.shared.dispatch(state, event);
            return;
        }

        let mut state = state;
        if state.started {
            state.ready.push_back(event);
        } else {
            state.pending.push_back(event);
        }
        drop(state);
        self.shared.cond.notify_one();
    }

    pub fn quit(&self) {
        self.add_event(Event::new(EventType::QUIT, TargetId::System, EventData::Empty));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};

    use super::*;

    #[test]
    fn events_to_the_same_target_dispatch_in_enqueue_order() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        handle.register_handler(TargetId::System, EventType::user(0), move |e| {
            if let EventData::Bytes(b) = &e.data {
                o.lock().unwrap().push(b[0]);
            }
        });

        handle.add_event(Event::new(EventType::user(0), TargetId::System, EventData::Bytes(vec![1])));
        handle.add_event(Event::new(EventType::user(0), TargetId::System, EventData::Bytes(vec![2])));
        handle.add_event(Event::new(EventType::QUIT, TargetId::System, EventData::Empty));

        event_loop.run();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn deliver_immediately_runs_before_add_event_returns() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let hit = Arc::new(AtomicUsize::new(0));

        let h = hit.clone();
        handle.register_handler(TargetId::System, EventType::user(1), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        handle.add_event(Event::immediate(EventType::user(1), TargetId::System, EventData::Empty));
        assert_eq!(hit.load(Ordering::SeqCst), 1, "immediate delivery must happen synchronously");
    }

    #[test]
    fn events_queued_before_run_preserve_order() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        handle.register_handler(TargetId::System, EventType::user(0), move |e| {
            if let EventData::Bytes(b) = &e.data {
                o.lock().unwrap().push(b[0]);
            }
        });
        handle.add_event(Event::new(EventType::user(0), TargetId::System, EventData::Bytes(vec![9])));
        handle.add_event(Event::new(EventType::user(0), TargetId::System, EventData::Bytes(vec![10])));
        handle.add_event(Event::new(EventType::QUIT, TargetId::System, EventData::Empty));

        event_loop.run();
        assert_eq!(*order.lock().unwrap(), vec![9, 10]);
    }

    #[test]
    fn synthetic_types_posted_from_outside_are_dropped() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let hit = Arc::new(AtomicUsize::new(0));
        let h = hit.clone();
        handle.register_handler(TargetId::System, EventType::TIMER, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handle.add_event(Event::new(EventType::TIMER, TargetId::System, EventData::Empty));
        handle.quit();
        event_loop.run();
        assert_eq!(hit.load(Ordering::SeqCst), 0);
    }
}
