#![warn(clippy::unwrap_used)]

//! Gamification for the quality loop: a declarative badge catalogue, the
//! engine that awards badges from metric snapshots, and per-domain rankings.

pub mod catalogue;
pub mod engine;
pub mod ranking;

pub use catalogue::BadgeCatalogue;
pub use engine::{BadgeEngine, BadgeProgress};
pub use ranking::{LeaderboardEntry, RankingService};
