//! Zone event scheduling.
//!
//! Every zone has a [`Scheduler`] holding at most one pending occurrence of
//! each event kind.  The zone's executor task sleeps until the earliest due
//! time and handles events strictly one at a time, so everything that
//! mutates a zone is serialized per zone without locks on the data itself.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

//----------- EventKind --------------------------------------------------------

/// The kinds of zone events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    /// Probe the master's SOA and decide whether to transfer.
    Refresh,

    /// Transfer the zone from its master (IXFR or AXFR).
    Transfer,

    /// Drain and apply the pending dynamic updates.
    Update,

    /// Re-sign the zone, or parts of it.
    Dnssec,

    /// Write the zone file and truncate the journal.
    Flush,

    /// Tell the configured peers the zone changed.
    Notify,

    /// Drop the zone's contents; the master has been silent too long.
    Expire,
}

impl EventKind {
    /// All kinds, in dispatch-priority order.
    pub const ALL: [Self; 7] = [
        Self::Refresh,
        Self::Transfer,
        Self::Update,
        Self::Dnssec,
        Self::Flush,
        Self::Notify,
        Self::Expire,
    ];

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|kind| *kind == self)
            .expect("every kind is in ALL")
    }

    /// The retry cadence of this event kind.
    ///
    /// One-shot events are never retried by the executor; their handlers
    /// answer failures in their own way (an UPDATE failure turns into
    /// per-query RCODEs, a FLUSH failure leaves the journal alone).
    pub fn cadence(self) -> Cadence {
        match self {
            Self::Refresh => Cadence::Backoff {
                initial: Duration::from_secs(60),
                max: Duration::from_secs(86400),
            },
            Self::Transfer => Cadence::Backoff {
                initial: Duration::from_secs(60),
                max: Duration::from_secs(3600),
            },
            Self::Notify => Cadence::Backoff {
                initial: Duration::from_secs(15),
                max: Duration::from_secs(300),
            },
            Self::Dnssec => Cadence::Backoff {
                initial: Duration::from_secs(300),
                max: Duration::from_secs(86400),
            },
            Self::Update | Self::Flush | Self::Expire => Cadence::OneShot,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Refresh => "refresh",
            Self::Transfer => "transfer",
            Self::Update => "update",
            Self::Dnssec => "DNSSEC",
            Self::Flush => "flush",
            Self::Notify => "notify",
            Self::Expire => "expire",
        })
    }
}

//----------- Cadence ----------------------------------------------------------

/// Whether and how an event kind is retried on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    /// Fires once; failure handling is the handler's business.
    OneShot,

    /// Failure reschedules the event, doubling the interval every time.
    Backoff {
        /// The first retry interval.
        initial: Duration,

        /// The interval stops doubling here.
        max: Duration,
    },
}

//----------- When -------------------------------------------------------------

/// When an event should fire.
#[derive(Clone, Copy, Debug)]
pub enum When {
    /// Immediately, overriding any pending occurrence.
    Now,

    /// After a delay.
    In(Duration),

    /// At an absolute time.
    At(Instant),
}

impl When {
    fn instant(self) -> Instant {
        match self {
            Self::Now => Instant::now(),
            Self::In(delay) => Instant::now() + delay,
            Self::At(at) => at,
        }
    }
}

//----------- Scheduler --------------------------------------------------------

/// A zone's pending events.
///
/// Per kind, at most one occurrence is ever pending; scheduling an already
/// pending kind keeps whichever due time is earlier.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// The pending due time per event kind.
    slots: Mutex<[Option<Instant>; EventKind::ALL.len()]>,

    /// Wakes the executor when an earlier event appears.
    waker: Notify,
}

impl Scheduler {
    /// Construct an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event.
    ///
    /// If the kind is already pending, the earlier due time wins; `Now`
    /// always wins.
    pub fn schedule(&self, kind: EventKind, when: When) {
        let due = when.instant();
        {
            let mut slots = self.slots.lock().expect("scheduler lock is never poisoned");
            let slot = &mut slots[kind.index()];
            *slot = Some(match *slot {
                Some(existing) => existing.min(due),
                None => due,
            });
        }
        self.waker.notify_one();
    }

    /// Drop a pending event.
    pub fn cancel(&self, kind: EventKind) {
        let mut slots = self.slots.lock().expect("scheduler lock is never poisoned");
        slots[kind.index()] = None;
    }

    /// Drop every pending event.
    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().expect("scheduler lock is never poisoned");
        *slots = Default::default();
    }

    /// The due time of a pending event.
    pub fn pending(&self, kind: EventKind) -> Option<Instant> {
        let slots = self.slots.lock().expect("scheduler lock is never poisoned");
        slots[kind.index()]
    }

    /// The earliest pending event, if any.
    pub fn next_due(&self) -> Option<(EventKind, Instant)> {
        let slots = self.slots.lock().expect("scheduler lock is never poisoned");
        EventKind::ALL
            .iter()
            .filter_map(|kind| slots[kind.index()].map(|due| (*kind, due)))
            .min_by_key(|(_, due)| *due)
    }

    /// Take the earliest event that is due at `now`.
    pub fn pop_due(&self, now: Instant) -> Option<EventKind> {
        let mut slots = self.slots.lock().expect("scheduler lock is never poisoned");
        let (kind, _) = EventKind::ALL
            .iter()
            .filter_map(|kind| slots[kind.index()].map(|due| (*kind, due)))
            .filter(|(_, due)| *due <= now)
            .min_by_key(|(_, due)| *due)?;
        slots[kind.index()] = None;
        Some(kind)
    }

    /// Wait until [`schedule`][Self::schedule] is called.
    pub async fn changed(&self) {
        self.waker.notified().await;
    }
}

//----------- Backoff ----------------------------------------------------------

/// Retry backoff state for the kinds that have one.
#[derive(Debug, Default)]
pub struct Backoff {
    current: [Option<Duration>; EventKind::ALL.len()],
}

impl Backoff {
    /// The next retry interval for `kind`, doubling per consecutive failure.
    ///
    /// One-shot kinds always yield `None`.
    pub fn next(&mut self, kind: EventKind) -> Option<Duration> {
        let Cadence::Backoff { initial, max } = kind.cadence() else {
            return None;
        };
        let slot = &mut self.current[kind.index()];
        let interval = match *slot {
            Some(previous) => (previous * 2).min(max),
            None => initial,
        };
        *slot = Some(interval);
        Some(interval)
    }

    /// Reset `kind`'s backoff after a success.
    pub fn reset(&mut self, kind: EventKind) {
        self.current[kind.index()] = None;
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_pending_per_kind() {
        let scheduler = Scheduler::new();
        scheduler.schedule(EventKind::Refresh, When::In(Duration::from_secs(10)));
        scheduler.schedule(EventKind::Refresh, When::In(Duration::from_secs(20)));
        scheduler.schedule(EventKind::Flush, When::In(Duration::from_secs(5)));

        // Refresh is pending exactly once, at the earlier of the two times.
        let refresh = scheduler.pending(EventKind::Refresh).unwrap();
        assert!(refresh <= Instant::now() + Duration::from_secs(10));

        let (kind, _) = scheduler.next_due().unwrap();
        assert_eq!(kind, EventKind::Flush);
    }

    #[test]
    fn now_forces_immediate() {
        let scheduler = Scheduler::new();
        scheduler.schedule(EventKind::Transfer, When::In(Duration::from_secs(3600)));
        scheduler.schedule(EventKind::Transfer, When::Now);
        assert_eq!(scheduler.pop_due(Instant::now()), Some(EventKind::Transfer));
        // And the slot is free again.
        assert_eq!(scheduler.pending(EventKind::Transfer), None);
    }

    #[test]
    fn pop_ignores_future_events() {
        let scheduler = Scheduler::new();
        scheduler.schedule(EventKind::Notify, When::In(Duration::from_secs(60)));
        assert_eq!(scheduler.pop_due(Instant::now()), None);
        assert!(scheduler.pending(EventKind::Notify).is_some());
    }

    #[test]
    fn backoff_doubles_to_max() {
        let mut backoff = Backoff::default();
        let first = backoff.next(EventKind::Transfer).unwrap();
        let second = backoff.next(EventKind::Transfer).unwrap();
        assert_eq!(second, first * 2);

        for _ in 0..16 {
            backoff.next(EventKind::Transfer);
        }
        assert_eq!(
            backoff.next(EventKind::Transfer),
            Some(Duration::from_secs(3600))
        );

        backoff.reset(EventKind::Transfer);
        assert_eq!(backoff.next(EventKind::Transfer), Some(first));

        // One-shot kinds have no backoff.
        assert_eq!(backoff.next(EventKind::Update), None);
    }
}
