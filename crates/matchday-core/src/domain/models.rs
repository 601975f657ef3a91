use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Round, UtcDateTime};

/// Canonical playing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

/// Club metadata. `code` is the three-letter club code shared by every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Provider-local identifier.
    pub id: u32,
    pub code: String,
    pub name: String,
    pub short_name: String,
}

/// Reference to a club from a fixture.
///
/// `code` and `name` are `None` when the provider payload identifies the club by
/// id only and the club directory has not been loaded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: u32,
    pub code: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Provider-local identifier.
    pub id: u32,
    pub team_code: String,
    pub first_name: String,
    pub second_name: String,
    pub web_name: String,
    pub position: Position,
    /// Fantasy price in tenths of a million.
    pub price_tenths: Option<u32>,
    pub total_points: Option<i32>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Scheduled,
    Live,
    Finished,
    Postponed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    pub id: u32,
    pub round: Option<Round>,
    pub kickoff: Option<UtcDateTime>,
    pub home: TeamRef,
    pub away: TeamRef,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub status: FixtureStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLiveStats {
    pub player_id: u32,
    pub minutes: u32,
    pub goals_scored: u32,
    pub assists: u32,
    pub clean_sheets: u32,
    pub bonus: u32,
    pub total_points: i32,
}

/// Live state for one round: per-player stats and/or per-match scores,
/// depending on what the serving provider publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRound {
    pub round: Round,
    pub players: Vec<PlayerLiveStats>,
    pub matches: Vec<Fixture>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub round: Round,
    pub deadline: Option<UtcDateTime>,
    pub is_current: bool,
    pub is_next: bool,
    pub finished: bool,
}

/// Season-level reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub rounds: Vec<RoundInfo>,
    pub teams: Vec<Team>,
    pub player_count: usize,
}

impl ReferenceData {
    /// The round flagged current, else the next one (pre-season).
    pub fn current_round(&self) -> Option<Round> {
        self.rounds
            .iter()
            .find(|info| info.is_current)
            .or_else(|| self.rounds.iter().find(|info| info.is_next))
            .map(|info| info.round)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    ReferenceData,
    Fixtures,
    LiveScores,
    Teams,
    Players,
}

impl PayloadKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReferenceData => "reference_data",
            Self::Fixtures => "fixtures",
            Self::LiveScores => "live_scores",
            Self::Teams => "teams",
            Self::Players => "players",
        }
    }
}

impl Display for PayloadKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of any operation, as cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    ReferenceData(ReferenceData),
    Fixtures(Vec<Fixture>),
    LiveScores(LiveRound),
    Teams(Vec<Team>),
    Players(Vec<Player>),
}

impl Payload {
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::ReferenceData(_) => PayloadKind::ReferenceData,
            Self::Fixtures(_) => PayloadKind::Fixtures,
            Self::LiveScores(_) => PayloadKind::LiveScores,
            Self::Teams(_) => PayloadKind::Teams,
            Self::Players(_) => PayloadKind::Players,
        }
    }

    /// Fixtures carried by this payload, if any.
    pub fn fixtures(&self) -> &[Fixture] {
        match self {
            Self::Fixtures(fixtures) => fixtures,
            Self::LiveScores(live) => &live.matches,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_info(round: u32, is_current: bool, is_next: bool) -> RoundInfo {
        RoundInfo {
            round: Round::new(round).expect("valid round"),
            deadline: None,
            is_current,
            is_next,
            finished: false,
        }
    }

    #[test]
    fn current_round_prefers_current_then_next() {
        let mut reference = ReferenceData {
            rounds: vec![round_info(1, false, false), round_info(2, false, true)],
            teams: Vec::new(),
            player_count: 0,
        };
        assert_eq!(reference.current_round().map(Round::get), Some(2));

        reference.rounds.push(round_info(3, true, false));
        assert_eq!(reference.current_round().map(Round::get), Some(3));
    }

    #[test]
    fn payload_uses_kind_tag() {
        let payload = Payload::Teams(vec![Team {
            id: 1,
            code: String::from("ARS"),
            name: String::from("Arsenal"),
            short_name: String::from("ARS"),
        }]);

        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["kind"], "teams");
        assert_eq!(json["data"][0]["code"], "ARS");
    }
}
