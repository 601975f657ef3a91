//! Per-round match windows learned from fixture payloads.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::{Fixture, Round};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchWindowConfig {
    /// How long before the first kickoff a round counts as active.
    pub lead: Duration,
    /// How long after the last kickoff a round stays active.
    pub match_length: Duration,
}

impl Default for MatchWindowConfig {
    fn default() -> Self {
        Self {
            lead: Duration::from_secs(30 * 60),
            match_length: Duration::from_secs(150 * 60),
        }
    }
}

/// Kickoffs per round; answers "is a match window open for this round".
///
/// Each kickoff opens its own window, so a fixture rescheduled weeks later does
/// not keep its round active in between.
#[derive(Debug, Default)]
pub struct MatchCalendar {
    config: MatchWindowConfig,
    kickoffs: Mutex<BTreeMap<Round, Vec<i64>>>,
}

impl MatchCalendar {
    pub fn new(config: MatchWindowConfig) -> Self {
        Self {
            config,
            kickoffs: Mutex::new(BTreeMap::new()),
        }
    }

    fn kickoffs(&self) -> MutexGuard<'_, BTreeMap<Round, Vec<i64>>> {
        self.kickoffs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the kickoffs of every round covered by `fixtures`.
    ///
    /// `scope` is the round the payload was filtered to; that round is rebuilt
    /// even when the payload no longer lists it. An unfiltered payload (`None`)
    /// rebuilds the whole calendar. Fixtures without a round or kickoff are
    /// ignored.
    pub fn record_fixtures(&self, scope: Option<Round>, fixtures: &[Fixture]) {
        let mut learned: BTreeMap<Round, Vec<i64>> = BTreeMap::new();
        for fixture in fixtures {
            let (Some(round), Some(kickoff)) = (fixture.round, fixture.kickoff) else {
                continue;
            };
            learned.entry(round).or_default().push(kickoff.unix_ms());
        }
        for kickoffs in learned.values_mut() {
            kickoffs.sort_unstable();
            kickoffs.dedup();
        }

        let mut calendar = self.kickoffs();
        match scope {
            None => *calendar = learned,
            Some(round) => {
                calendar.remove(&round);
                calendar.extend(learned);
            }
        }
        debug!(rounds = calendar.len(), "match calendar updated");
    }

    pub fn is_active(&self, round: Round, now_ms: i64) -> bool {
        self.kickoffs()
            .get(&round)
            .is_some_and(|kickoffs| self.any_open(kickoffs, now_ms))
    }

    /// Earliest round with an open window at `now_ms`.
    pub fn active_round(&self, now_ms: i64) -> Option<Round> {
        self.kickoffs()
            .iter()
            .find(|(_, kickoffs)| self.any_open(kickoffs, now_ms))
            .map(|(round, _)| *round)
    }

    pub fn known_rounds(&self) -> usize {
        self.kickoffs().len()
    }

    fn any_open(&self, kickoffs: &[i64], now_ms: i64) -> bool {
        let lead = millis(self.config.lead);
        let length = millis(self.config.match_length);
        kickoffs.iter().any(|kickoff| {
            (kickoff.saturating_sub(lead)..=kickoff.saturating_add(length)).contains(&now_ms)
        })
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
