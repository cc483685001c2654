//! Tick cadence and wall-clock access.
//!
//! Tick N's intake freezes at `started_at + N * tick_length`. The deadline
//! depends only on the game's start time and tick length, never on how
//! many commands arrived.

use crate::types::Tick;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Source of "now". Production uses [`SystemClock`]; tests drive a
/// [`ManualClock`].
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Fixed-length tick schedule of one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickClock {
    pub started_at: DateTime<Utc>,
    pub tick_length_secs: i64,
}

impl TickClock {
    pub fn new(started_at: DateTime<Utc>, tick_length_secs: i64) -> Self {
        Self {
            started_at,
            tick_length_secs,
        }
    }

    /// Wall-clock instant at which intake for `tick` freezes. `None` when
    /// the instant is past what chrono can represent.
    pub fn freeze_deadline(&self, tick: Tick) -> Option<DateTime<Utc>> {
        let offset = span(self.tick_length_secs, tick)?;
        self.started_at.checked_add_signed(offset)
    }

    /// True once `now` has reached the freeze deadline of `tick`. A tick
    /// with no representable deadline is never due.
    pub fn is_due(&self, tick: Tick, now: DateTime<Utc>) -> bool {
        self.freeze_deadline(tick).is_some_and(|deadline| now >= deadline)
    }

    /// Clock whose `tick` deadline already passed at `now`, so `tick + 1`
    /// is one tick length away.
    pub fn anchored(now: DateTime<Utc>, tick: Tick, tick_length_secs: i64) -> Option<Self> {
        let started_at = now.checked_sub_signed(span(tick_length_secs, tick)?)?;
        Some(Self::new(started_at, tick_length_secs))
    }
}

/// `ticks * tick_length_secs` as a duration, if it fits.
fn span(tick_length_secs: i64, ticks: Tick) -> Option<Duration> {
    let ticks = i32::try_from(ticks).ok()?;
    Duration::try_seconds(tick_length_secs)?.checked_mul(ticks)
}
