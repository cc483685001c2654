//! Deterministic random number generation.
//!
//! RULE: Nothing in the core may call any platform RNG.
//! All randomness flows through StreamRng instances derived from the game
//! seed stored in every WorldState.
//!
//! Each consumer gets its own stream, seeded from
//! (game_seed, slot, tick[, discriminator]). This means:
//!   - Adding a new slot never changes existing streams.
//!   - Any single draw can be reproduced from values kept in the snapshot
//!     and the event log.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::types::Tick;

const GOLDEN: u64 = 0x9e37_79b9_7f4a_7c15;

/// SplitMix64 finaliser, used to spread structured seeds.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(GOLDEN);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// A named, deterministic RNG stream.
#[derive(Debug)]
pub struct StreamRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StreamRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Draw a raw u64 (full range).
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Roll an integer in [lo, hi].
    pub fn range_inclusive(&mut self, lo: i64, hi: i64) -> i64 {
        assert!(hi >= lo, "empty range {lo}..={hi}");
        let span = (hi - lo) as u64 + 1;
        lo + self.next_u64_below(span) as i64
    }

    /// Bernoulli trial: true with probability `percent` / 100.
    pub fn percent(&mut self, percent: u64) -> bool {
        self.next_u64_below(100) < percent
    }
}

/// All RNG streams of one game, indexed by stable slot.
#[derive(Debug, Clone, Copy)]
pub struct RngBank {
    game_seed: u64,
}

impl RngBank {
    pub fn new(game_seed: u64) -> Self {
        Self { game_seed }
    }

    /// Seed for `slot` at `tick`, optionally narrowed by a discriminator
    /// such as a command id.
    pub fn seed_for(&self, slot: RngSlot, tick: Tick, discriminator: u64) -> u64 {
        let base = self.game_seed ^ (slot as u64).wrapping_mul(GOLDEN);
        mix(mix(base ^ tick) ^ discriminator)
    }

    pub fn for_slot_at_tick(&self, slot: RngSlot, tick: Tick) -> StreamRng {
        StreamRng::from_seed(self.seed_for(slot, tick, 0)).with_name(slot.name())
    }
}

/// Stable slot assignments.
/// NEVER reorder or remove entries. Only append.
/// Reordering changes every stream's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngSlot {
    Genesis = 0,
    Combat = 1,
    Scheduled = 2,
    // Add new slots here. Append only.
}

impl RngSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Genesis => "genesis",
            Self::Combat => "combat",
            Self::Scheduled => "scheduled",
        }
    }
}
