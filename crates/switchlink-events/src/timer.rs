use std::{cmp::Reverse, collections::BinaryHeap, time::{Duration, Instant}};

use crate::types::TargetId;

pub type TimerId = u64;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerEntry {
    pub deadline: Instant,
    pub period: Duration,
    pub target: TargetId,
    pub one_shot: bool,
    pub id: TimerId,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

/// Min-heap of timers keyed by absolute deadline.
///
/// The original decrements every live timer by the elapsed interval on each
/// wake and re-sorts the whole set — an O(n) operation per tick. Storing an
/// absolute `Instant` deadline instead lets a `BinaryHeap` do the same job in
/// `O(log n)` per pop/push with no bulk update needed; popping and
/// re-pushing a recurring timer in a loop while its deadline is still `<=
/// now` reproduces the same "catch up on everything that's overdue" behavior
/// the original's decrement-all approach gave for free, including a timer's
/// first firing accounting for time elapsed between creation and loop entry.
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_id: TimerId,
}

impl TimerHeap {
    pub fn insert(&mut self, target: TargetId, period: Duration, one_shot: bool) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(TimerEntry { deadline: Instant::now() + period, period, target, one_shot, id }));
        id
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.heap.retain(|Reverse(e)| e.id != id);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.deadline)
    }

    /// Pops every timer whose deadline has passed, calling `fire` for each
    /// and reinserting it (advanced by one period) unless it is one-shot.
    pub fn fire_expired(&mut self, now: Instant, mut fire: impl FnMut(TargetId, TimerId)) {
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Reverse(mut entry) = self.heap.pop().unwrap();
            fire(entry.target, entry.id);
            if !entry.one_shot {
                entry.deadline += entry.period;
                self.heap.push(Reverse(entry));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurring_timer_catches_up_on_backlog_in_one_pass() {
        let mut heap = TimerHeap::default();
        let id = heap.insert(TargetId::System, Duration::from_millis(1), false);
        std::thread::sleep(Duration::from_millis(12));
        let mut fires = 0;
        heap.fire_expired(Instant::now(), |_target, fired_id| {
            assert_eq!(fired_id, id);
            fires += 1;
        });
        assert!(fires >= 8, "expected at least 8 catch-up fires for a 1ms period over 12ms, got {fires}");
    }

    #[test]
    fn one_shot_timer_does_not_reinsert() {
        let mut heap = TimerHeap::default();
        heap.insert(TargetId::System, Duration::from_millis(1), true);
        std::thread::sleep(Duration::from_millis(5));
        let mut fires = 0;
        heap.fire_expired(Instant::now(), |_, _| fires += 1);
        assert_eq!(fires, 1);
        assert!(heap.next_deadline().is_none());
    }
}
