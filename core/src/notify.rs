//! Post-commit notification.
//!
//! RULE: Notification happens after the commit and never feeds back into
//! it. A failed publish is logged and forgotten; the committed tick stays.
//!
//! `EventFeed` is the in-process implementation: an append-only log per
//! game that clients pull from with a tick cursor, plus push subscriptions
//! over crossbeam channels.

use crate::{
    event::GlobalEvent,
    types::{GameId, Tick},
    world::WorldState,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What subscribers learn about one committed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickNotice {
    pub game_id: GameId,
    pub tick: Tick,
    pub content_hash: String,
    pub events: Vec<GlobalEvent>,
}

impl TickNotice {
    pub fn from_state(state: &WorldState) -> Self {
        Self {
            game_id: state.game_id.clone(),
            tick: state.tick,
            content_hash: state.content_hash.clone(),
            events: state.events.clone(),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Deliver a notice. Delivery is at-least-once: receivers must tolerate
    /// seeing the same tick twice.
    fn publish(&self, notice: &TickNotice) -> anyhow::Result<()>;
}

struct Subscriber {
    game_id: Option<GameId>,
    tx: Sender<TickNotice>,
}

#[derive(Default)]
pub struct EventFeed {
    log: RwLock<BTreeMap<GameId, Vec<TickNotice>>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push subscription to every game's notices.
    pub fn subscribe_all(&self) -> Receiver<TickNotice> {
        self.add_subscriber(None)
    }

    /// Push subscription to one game's notices.
    pub fn subscribe(&self, game_id: &str) -> Receiver<TickNotice> {
        self.add_subscriber(Some(game_id.to_string()))
    }

    fn add_subscriber(&self, game_id: Option<GameId>) -> Receiver<TickNotice> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(Subscriber { game_id, tx });
        rx
    }

    /// Pull: every notice for `game_id` with tick greater than `after`.
    pub fn since(&self, game_id: &str, after: Tick) -> Vec<TickNotice> {
        self.log
            .read()
            .get(game_id)
            .map(|notices| notices.iter().filter(|n| n.tick > after).cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest_tick(&self, game_id: &str) -> Option<Tick> {
        self.log
            .read()
            .get(game_id)
            .and_then(|n| n.last().map(|n| n.tick))
    }
}

impl Notifier for EventFeed {
    fn publish(&self, notice: &TickNotice) -> anyhow::Result<()> {
        {
            let mut log = self.log.write();
            let notices = log.entry(notice.game_id.clone()).or_default();
            // Redelivery of a tick already in the log is a no-op for pull readers.
            if notices.last().is_some_and(|last| last.tick >= notice.tick) {
                log::debug!("feed: tick {} of {} already logged", notice.tick, notice.game_id);
            } else {
                notices.push(notice.clone());
            }
        }

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if sub.game_id.as_ref().is_some_and(|g| *g != notice.game_id) {
                return true;
            }
            // A dropped receiver unsubscribes.
            sub.tx.send(notice.clone()).is_ok()
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(game: &str, tick: Tick) -> TickNotice {
        TickNotice {
            game_id: game.into(),
            tick,
            content_hash: format!("h{tick}"),
            events: Vec::new(),
        }
    }

    #[test]
    fn pull_cursor_returns_only_newer_ticks() {
        let feed = EventFeed::new();
        for tick in 1..=3 {
            feed.publish(&notice("g", tick)).unwrap();
        }
        feed.publish(&notice("g", 3)).unwrap();
        let newer: Vec<_> = feed.since("g", 1).into_iter().map(|n| n.tick).collect();
        assert_eq!(newer, vec![2, 3], "redelivered tick must not duplicate");
    }

    #[test]
    fn subscribers_receive_their_game_only() {
        let feed = EventFeed::new();
        let g = feed.subscribe("g");
        let all = feed.subscribe_all();
        feed.publish(&notice("g", 1)).unwrap();
        feed.publish(&notice("h", 1)).unwrap();
        assert_eq!(g.try_iter().count(), 1);
        assert_eq!(all.try_iter().count(), 2);
    }
}
