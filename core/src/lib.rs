//! hexworld-core: deterministic tick resolution for a persistent hex-map
//! strategy world.
//!
//! Pipeline per tick: intake -> queue -> (freeze) -> validator -> arbiter
//! -> resolver -> snapshot store -> notify. The scheduler drives one cycle
//! per game; the engine hosts many games.

pub mod arbiter;
pub mod attributes;
pub mod clock;
pub mod command;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod event;
pub mod game;
pub mod genesis;
pub mod hex;
pub mod intake;
pub mod notify;
pub mod passive;
pub mod queue;
pub mod replay;
pub mod resolver;
pub mod rng;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod validator;
pub mod world;
