//! Axial hex coordinates and path search.
//!
//! Coordinates are axial (q, r). The implicit third cube coordinate is
//! s = -q - r. Ordering is (q, r) lexicographic so coordinate-keyed maps
//! iterate identically on every machine.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexCoord {
    pub q: i32,
    pub r: i32,
}

/// Axial direction vectors, clockwise from east.
pub const DIRECTIONS: [(i32, i32); 6] = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

impl HexCoord {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    pub fn s(&self) -> i32 {
        -self.q - self.r
    }

    pub fn distance(&self, other: HexCoord) -> u32 {
        let dq = (self.q - other.q).unsigned_abs();
        let dr = (self.r - other.r).unsigned_abs();
        let ds = (self.s() - other.s()).unsigned_abs();
        dq.max(dr).max(ds)
    }

    pub fn neighbors(&self) -> [HexCoord; 6] {
        DIRECTIONS.map(|(dq, dr)| HexCoord::new(self.q + dq, self.r + dr))
    }

    /// Convert "odd-r" offset coordinates (row, column) of a rectangular
    /// map into axial coordinates.
    pub fn from_offset(col: i32, row: i32) -> Self {
        let q = col - (row - (row & 1)) / 2;
        Self { q, r: row }
    }
}

impl fmt::Display for HexCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.q, self.r)
    }
}

// Coordinates double as JSON object keys, which must be strings: "q,r".
impl Serialize for HexCoord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{},{}", self.q, self.r))
    }
}

impl<'de> Deserialize<'de> for HexCoord {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (q, r) = raw
            .split_once(',')
            .ok_or_else(|| serde::de::Error::custom(format!("bad hex coordinate '{raw}'")))?;
        let q = q.trim().parse().map_err(serde::de::Error::custom)?;
        let r = r.trim().parse().map_err(serde::de::Error::custom)?;
        Ok(HexCoord::new(q, r))
    }
}

/// A path found by [`find_path`]: the visited coordinates (excluding the
/// start) and the summed step cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub steps: Vec<HexCoord>,
    pub cost: u32,
}

/// Cheapest path from `from` to `to`.
///
/// `step_cost` returns the cost of entering a coordinate, or `None` when the
/// coordinate cannot be entered. Search stops expanding beyond `max_cost`.
/// Ties are broken by coordinate order, so the same map always yields the
/// same path.
pub fn find_path<F>(from: HexCoord, to: HexCoord, max_cost: u32, step_cost: F) -> Option<Path>
where
    F: Fn(HexCoord) -> Option<u32>,
{
    if from == to {
        return Some(Path { steps: Vec::new(), cost: 0 });
    }

    let mut best: BTreeMap<HexCoord, u32> = BTreeMap::new();
    let mut came_from: BTreeMap<HexCoord, HexCoord> = BTreeMap::new();
    let mut frontier = BinaryHeap::new();
    best.insert(from, 0);
    frontier.push(Reverse((0u32, from)));

    while let Some(Reverse((cost, current))) = frontier.pop() {
        if current == to {
            let mut steps = vec![to];
            let mut cursor = to;
            while let Some(prev) = came_from.get(&cursor) {
                if *prev == from {
                    break;
                }
                steps.push(*prev);
                cursor = *prev;
            }
            steps.reverse();
            return Some(Path { steps, cost });
        }
        if best.get(&current).is_some_and(|&known| cost > known) {
            continue;
        }
        for next in current.neighbors() {
            let Some(enter) = step_cost(next) else { continue };
            let next_cost = cost.saturating_add(enter);
            if next_cost > max_cost {
                continue;
            }
            if best.get(&next).map_or(true, |&known| next_cost < known) {
                best.insert(next, next_cost);
                came_from.insert(next, current);
                frontier.push(Reverse((next_cost, next)));
            }
        }
    }
    None
}
