use std::time::Duration;

use tokio::time::Instant;

use tollgate_core::Priority;

/// Delays are capped here so `now + delay` cannot overflow.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating about thirty years out.
pub(crate) fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE)).unwrap_or(now)
}

/// One queued entry.
#[derive(Debug)]
pub(crate) struct Slot<T> {
    pub priority: Priority,
    /// Arrival order. Kept across requeues so retried work does not lose its
    /// place among equal-priority entries.
    pub seq: u64,
    /// Earliest time the entry may be dequeued.
    pub ready_at: Instant,
    pub item: T,
}

impl<T> Slot<T> {
    /// Dequeue order: higher priority first, then earlier arrival.
    fn outranks(&self, other: &Self) -> bool {
        (self.priority, std::cmp::Reverse(self.seq)) > (other.priority, std::cmp::Reverse(other.seq))
    }
}

/// Priority queue whose entries only become eligible once their `ready_at`
/// has passed.
///
/// Linear scans keep the structure simple; queue sizes are bounded by
/// configuration and small next to the cost of a dependency call.
#[derive(Debug)]
pub(crate) struct ReadyQueue<T> {
    slots: Vec<Slot<T>>,
    next_seq: u64,
}

impl<T> ReadyQueue<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_seq: 0,
        }
    }

    /// Add a new entry, assigning the next arrival number.
    pub fn push(&mut self, priority: Priority, ready_at: Instant, item: T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(Slot {
            priority,
            seq,
            ready_at,
            item,
        });
        seq
    }

    /// Put back an entry that was dequeued earlier.
    pub fn requeue(&mut self, slot: Slot<T>) {
        self.slots.push(slot);
    }

    fn best_ready(&self, now: Instant) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.ready_at > now {
                continue;
            }
            if best.is_none_or(|b| slot.outranks(&self.slots[b])) {
                best = Some(i);
            }
        }
        best
    }

    /// Whether any entry is eligible at `now`.
    pub fn has_ready(&self, now: Instant) -> bool {
        self.slots.iter().any(|s| s.ready_at <= now)
    }

    /// Remove and return the best eligible entry.
    pub fn pop_ready(&mut self, now: Instant) -> Option<Slot<T>> {
        self.best_ready(now).map(|i| self.slots.swap_remove(i))
    }

    /// When the earliest not-yet-eligible entry becomes eligible.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.slots.iter().map(|s| s.ready_at).min()
    }

    /// Remove the lowest-priority entry, oldest first among equals, unless
    /// `incoming` would itself rank lowest.
    pub fn evict_lowest(&mut self, incoming: Priority) -> Option<Slot<T>> {
        let mut victim: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            let replace = victim.is_none_or(|v| {
                let current = &self.slots[v];
                slot.priority < current.priority
                    || (slot.priority == current.priority && slot.seq < current.seq)
            });
            if replace {
                victim = Some(i);
            }
        }
        let v = victim?;
        if incoming < self.slots[v].priority {
            return None;
        }
        Some(self.slots.swap_remove(v))
    }

    pub fn drain(&mut self) -> Vec<Slot<T>> {
        let mut all = std::mem::take(&mut self.slots);
        all.sort_by_key(|s| (std::cmp::Reverse(s.priority), s.seq));
        all
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
