//! # Domain Models
//!
//! Provider-neutral shapes every adapter normalizes into.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ReferenceData`] | Season rounds, clubs and player count |
//! | [`Team`] | Club keyed by its three-letter code |
//! | [`Player`] | Squad member with optional fantasy fields |
//! | [`Fixture`] | Scheduled, live or finished match |
//! | [`LiveRound`] | Per-player live stats and match scores for a round |
//! | [`Round`] | Validated competition round (gameweek) |
//! | [`UtcDateTime`] | UTC timestamp |
//! | [`Payload`] | Tagged union cached and returned by adapters |
//!
//! ## Defaults
//!
//! Fantasy-only fields (`price_tenths`, `total_points`, `status`) are `None` when a
//! provider does not publish them. Required fields are never defaulted: a payload
//! missing one is rejected as a schema mismatch by the adapter.

mod models;
mod round;
mod timestamp;

pub use models::{
    Fixture, FixtureStatus, LiveRound, Payload, PayloadKind, Player, PlayerLiveStats, Position,
    ReferenceData, RoundInfo, Team, TeamRef,
};
pub use round::Round;
pub use timestamp::UtcDateTime;
