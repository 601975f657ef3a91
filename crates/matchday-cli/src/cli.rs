//! CLI argument definitions for matchday.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reference` | Season rounds, clubs and player count |
//! | `current-round` | Round flagged current (or next) |
//! | `fixtures` | Fixtures, optionally for one round |
//! | `live` | Live stats and scores for a round |
//! | `teams` | Club list |
//! | `players` | Player list |
//! | `status` | Monitoring snapshot after an optional health check |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--source` | `auto` | Routing table or a pinned provider |
//! | `--refresh` | `false` | Skip fresh cache reads, still write |
//! | `--no-cache` | `false` | Neither read nor write the cache |
//! | `--no-warehouse` | `false` | Memory cache only |
//!
//! # Examples
//!
//! ```bash
//! matchday fixtures --round 7 --pretty
//! matchday live --round 7 --refresh
//! matchday teams --source football-data
//! MATCHDAY_LOG=debug matchday status
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};

use matchday_core::{CacheMode, ProviderId};

/// Rate-limited, cached football data from FPL and football-data.org.
#[derive(Debug, Parser)]
#[command(
    name = "matchday",
    author,
    version,
    about = "Fantasy football data feed",
    long_about = "matchday fetches reference and live football data from the Fantasy Premier \
League API and football-data.org, with rate limiting, circuit breaking, a two-tier cache \
and automatic fallback between providers.\n\
\n\
Output is a JSON envelope on stdout; logs go to stderr (set MATCHDAY_LOG)."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Source selection for this call.
    #[arg(long, global = true, value_enum, default_value_t = SourceSelector::Auto)]
    pub source: SourceSelector,

    /// Ignore fresh cache entries and fetch upstream (result is still cached).
    #[arg(long, global = true, default_value_t = false, conflicts_with = "no_cache")]
    pub refresh: bool,

    /// Bypass the cache entirely.
    #[arg(long, global = true, default_value_t = false)]
    pub no_cache: bool,

    /// Do not open the DuckDB warm cache under MATCHDAY_HOME.
    #[arg(long, global = true, default_value_t = false)]
    pub no_warehouse: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub const fn cache_mode(&self) -> CacheMode {
        if self.no_cache {
            CacheMode::Bypass
        } else if self.refresh {
            CacheMode::Refresh
        } else {
            CacheMode::Use
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceSelector {
    /// Routing table with fallback.
    Auto,
    /// Fantasy Premier League only.
    Fpl,
    /// football-data.org only.
    FootballData,
}

impl SourceSelector {
    pub const fn provider(self) -> Option<ProviderId> {
        match self {
            Self::Auto => None,
            Self::Fpl => Some(ProviderId::Fpl),
            Self::FootballData => Some(ProviderId::FootballData),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Season reference data: rounds, clubs, player count.
    Reference,

    /// The current round, or the next one before the season starts.
    CurrentRound,

    /// Fixtures for the season or one round.
    ///
    /// # Examples
    ///
    ///   matchday fixtures
    ///   matchday fixtures --round 12
    Fixtures(FixturesArgs),

    /// Live player stats and match scores for a round.
    Live(LiveArgs),

    /// Club list.
    Teams,

    /// Player list.
    Players,

    /// Monitoring snapshot: cache, quotas, breakers, source health, queue.
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct FixturesArgs {
    /// Competition round (gameweek), 1-38.
    #[arg(long)]
    pub round: Option<u32>,
}

#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Competition round (gameweek), 1-38.
    #[arg(long)]
    pub round: u32,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Probe every source before taking the snapshot.
    #[arg(long, default_value_t = false)]
    pub check: bool,
}
