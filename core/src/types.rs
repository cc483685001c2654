//! Shared primitive types used across the entire core.

/// A resolution step. Tick 0 is the genesis snapshot.
pub type Tick = u64;

/// The canonical game identifier.
pub type GameId = String;

/// Seat number of a player inside one game.
pub type PlayerId = u32;

/// Stable identifier of a unit. Allocated from the world's counter,
/// never reused within a game.
pub type UnitId = u64;

/// Per-game monotonically increasing command identifier.
pub type CommandId = u64;

/// Identifier of an item instance lying on the map.
pub type ItemId = String;

/// Identifier of an interactable object on the map.
pub type InteractableId = String;

/// Resource name → amount. Ordered so hashing stays canonical.
pub type ResourceBag = std::collections::BTreeMap<String, i64>;
