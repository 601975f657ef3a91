use std::time::Duration;

use serde::Deserialize;

use super::{parse_body, required, trim_base_url, validation_to_error, ProviderApi};
use crate::data_source::{CapabilitySet, Resource, SourceError};
use crate::domain::{FixtureStatus, Position, TeamRef};
use crate::http_client::{HttpAuth, HttpRequest};
use crate::{Fixture, LiveRound, Payload, Player, ProviderId, Round, Team, UtcDateTime};

pub const DEFAULT_BASE_URL: &str = "https://api.football-data.org/v4";
pub const DEFAULT_COMPETITION: &str = "PL";

const ID: ProviderId = ProviderId::FootballData;

/// football-data.org v4.
///
/// Publishes fixtures, match scores, clubs and squads but no fantasy data, so
/// reference data is unsupported and live scores carry matches only. Squad
/// members have no fantasy price, points or status; those stay `None`.
pub struct FootballDataApi {
    base_url: String,
    competition: String,
    auth: HttpAuth,
    timeout: Duration,
}

impl std::fmt::Debug for FootballDataApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FootballDataApi")
            .field("base_url", &self.base_url)
            .field("competition", &self.competition)
            .field("auth", &self.auth)
            .finish()
    }
}

impl Default for FootballDataApi {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, None)
    }
}

impl FootballDataApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let auth = match token {
            Some(token) if !token.trim().is_empty() => HttpAuth::Header {
                name: String::from("X-Auth-Token"),
                value: token,
            },
            _ => HttpAuth::None,
        };
        Self {
            base_url: trim_base_url(base_url),
            competition: String::from(DEFAULT_COMPETITION),
            auth,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_competition(mut self, competition: impl Into<String>) -> Self {
        self.competition = competition.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_token(&self) -> bool {
        self.auth != HttpAuth::None
    }

    fn get(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/competitions/{}{path}",
            self.base_url, self.competition
        ))
        .with_header("accept", "application/json")
        .with_auth(&self.auth)
        .with_timeout(self.timeout)
    }

    fn matches(&self, body: &str) -> Result<Vec<Fixture>, SourceError> {
        let matches: FdMatches = parse_body(ID, body)?;
        matches.matches.into_iter().map(normalize_match).collect()
    }
}

impl ProviderApi for FootballDataApi {
    fn id(&self) -> ProviderId {
        ID
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet {
            reference_data: false,
            ..CapabilitySet::full()
        }
    }

    fn request_for(&self, resource: &Resource) -> Result<HttpRequest, SourceError> {
        match resource {
            Resource::ReferenceData => Err(SourceError::unsupported_operation(
                ID,
                resource.operation(),
            )),
            Resource::Fixtures { round: Some(round) } => {
                Ok(self.get(&format!("/matches?matchday={round}")))
            }
            Resource::Fixtures { round: None } => Ok(self.get("/matches")),
            Resource::LiveScores { round } => Ok(self.get(&format!("/matches?matchday={round}"))),
            Resource::Teams | Resource::Players => Ok(self.get("/teams")),
        }
    }

    fn normalize(&self, resource: &Resource, body: &str) -> Result<Payload, SourceError> {
        match resource {
            Resource::ReferenceData => Err(SourceError::unsupported_operation(
                ID,
                resource.operation(),
            )),
            Resource::Fixtures { .. } => Ok(Payload::Fixtures(self.matches(body)?)),
            Resource::LiveScores { round } => Ok(Payload::LiveScores(LiveRound {
                round: *round,
                players: Vec::new(),
                matches: self.matches(body)?,
            })),
            Resource::Teams => {
                let teams: FdTeams = parse_body(ID, body)?;
                let teams = teams
                    .teams
                    .iter()
                    .map(normalize_team)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Payload::Teams(teams))
            }
            Resource::Players => {
                let teams: FdTeams = parse_body(ID, body)?;
                let mut players = Vec::new();
                for team in &teams.teams {
                    let club = normalize_team(team)?;
                    for member in &team.squad {
                        players.push(normalize_squad_member(member, &club.code)?);
                    }
                }
                Ok(Payload::Players(players))
            }
        }
    }

    fn document_of(&self, resource: &Resource) -> Vec<Resource> {
        match resource {
            Resource::Teams | Resource::Players => vec![Resource::Teams, Resource::Players],
            other => vec![*other],
        }
    }

    fn probe_request(&self) -> HttpRequest {
        self.get("")
    }
}

#[derive(Debug, Deserialize)]
struct FdMatches {
    matches: Vec<FdMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FdMatch {
    id: u32,
    utc_date: Option<String>,
    status: String,
    matchday: Option<u32>,
    home_team: FdTeamRef,
    away_team: FdTeamRef,
    score: FdScore,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FdTeamRef {
    id: u32,
    name: Option<String>,
    short_name: Option<String>,
    tla: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FdScore {
    full_time: FdScoreLine,
}

#[derive(Debug, Deserialize)]
struct FdScoreLine {
    home: Option<u32>,
    away: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FdTeams {
    teams: Vec<FdTeam>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FdTeam {
    id: u32,
    name: String,
    short_name: Option<String>,
    tla: Option<String>,
    #[serde(default)]
    squad: Vec<FdSquadMember>,
}

#[derive(Debug, Deserialize)]
struct FdSquadMember {
    id: u32,
    name: String,
    position: Option<String>,
}

fn normalize_status(status: &str) -> Result<FixtureStatus, SourceError> {
    match status {
        "SCHEDULED" | "TIMED" => Ok(FixtureStatus::Scheduled),
        "IN_PLAY" | "PAUSED" | "LIVE" => Ok(FixtureStatus::Live),
        "FINISHED" | "AWARDED" => Ok(FixtureStatus::Finished),
        "POSTPONED" | "SUSPENDED" | "CANCELLED" => Ok(FixtureStatus::Postponed),
        other => Err(SourceError::schema_mismatch(format!(
            "football_data match status '{other}' is not mapped"
        ))),
    }
}

fn normalize_team_ref(payload: FdTeamRef) -> TeamRef {
    TeamRef {
        id: payload.id,
        code: payload.tla,
        name: payload.short_name.or(payload.name),
    }
}

fn normalize_match(payload: FdMatch) -> Result<Fixture, SourceError> {
    let status = normalize_status(&payload.status)?;
    let round = payload
        .matchday
        .map(Round::new)
        .transpose()
        .map_err(|error| validation_to_error(ID, error))?;
    let kickoff = payload
        .utc_date
        .as_deref()
        .map(UtcDateTime::parse)
        .transpose()
        .map_err(|error| validation_to_error(ID, error))?;

    Ok(Fixture {
        id: payload.id,
        round,
        kickoff,
        home: normalize_team_ref(payload.home_team),
        away: normalize_team_ref(payload.away_team),
        home_score: payload.score.full_time.home,
        away_score: payload.score.full_time.away,
        status,
    })
}

fn normalize_team(payload: &FdTeam) -> Result<Team, SourceError> {
    let code = required(ID, "teams[].tla", payload.tla.as_deref())?
        .trim()
        .to_ascii_uppercase();
    Ok(Team {
        id: payload.id,
        code,
        name: payload.name.clone(),
        short_name: payload
            .short_name
            .clone()
            .unwrap_or_else(|| payload.name.clone()),
    })
}

fn normalize_position(position: Option<&str>, player_id: u32) -> Result<Position, SourceError> {
    let position = required(ID, "squad[].position", position)?;
    match position {
        "Goalkeeper" => Ok(Position::Goalkeeper),
        "Defence" | "Defender" | "Centre-Back" | "Left-Back" | "Right-Back" => {
            Ok(Position::Defender)
        }
        "Midfield" | "Midfielder" | "Defensive Midfield" | "Central Midfield"
        | "Attacking Midfield" | "Left Midfield" | "Right Midfield" => Ok(Position::Midfielder),
        "Offence" | "Attack" | "Forward" | "Centre-Forward" | "Left Winger" | "Right Winger" => {
            Ok(Position::Forward)
        }
        other => Err(SourceError::schema_mismatch(format!(
            "football_data squad member {player_id} has unmapped position '{other}'"
        ))),
    }
}

fn normalize_squad_member(payload: &FdSquadMember, team_code: &str) -> Result<Player, SourceError> {
    let position = normalize_position(payload.position.as_deref(), payload.id)?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(SourceError::schema_mismatch(format!(
            "football_data squad member {} has an empty name",
            payload.id
        )));
    }
    let (first_name, second_name) = match name.rsplit_once(' ') {
        Some((first, last)) => (first.trim().to_owned(), last.to_owned()),
        None => (String::new(), name.to_owned()),
    };

    Ok(Player {
        id: payload.id,
        team_code: team_code.to_owned(),
        first_name,
        web_name: second_name.clone(),
        second_name,
        position,
        price_tenths: None,
        total_points: None,
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;

    const MATCHES: &str = r#"{
        "filters": {"matchday": "3"},
        "matches": [
            {"id": 500, "utcDate": "2025-08-30T11:30:00Z", "status": "IN_PLAY", "matchday": 3,
             "homeTeam": {"id": 57, "name": "Arsenal FC", "shortName": "Arsenal", "tla": "ARS"},
             "awayTeam": {"id": 58, "name": "Aston Villa FC", "shortName": "Aston Villa", "tla": "AVL"},
             "score": {"winner": null, "fullTime": {"home": 2, "away": 1}}},
            {"id": 501, "utcDate": "2025-08-30T14:00:00Z", "status": "TIMED", "matchday": 3,
             "homeTeam": {"id": 61, "name": "Chelsea FC", "shortName": "Chelsea", "tla": "CHE"},
             "awayTeam": {"id": 62, "name": "Everton FC", "shortName": "Everton", "tla": "EVE"},
             "score": {"winner": null, "fullTime": {"home": null, "away": null}}}
        ]
    }"#;

    const TEAMS: &str = r#"{
        "teams": [
            {"id": 57, "name": "Arsenal FC", "shortName": "Arsenal", "tla": "ARS",
             "squad": [
                {"id": 1, "name": "David Raya", "position": "Goalkeeper"},
                {"id": 2, "name": "William Saliba", "position": "Centre-Back"},
                {"id": 3, "name": "Bukayo Saka", "position": "Right Winger"},
                {"id": 4, "name": "Jorginho", "position": "Defensive Midfield"}
             ]}
        ]
    }"#;

    #[test]
    fn matches_normalize_to_fixtures() {
        let api = FootballDataApi::default();
        let round = Round::new(3).expect("valid round");
        let Payload::Fixtures(fixtures) = api
            .normalize(&Resource::Fixtures { round: Some(round) }, MATCHES)
            .expect("fixtures")
        else {
            panic!("unexpected payload kind");
        };

        assert_eq!(fixtures.len(), 2);
        assert_eq!(fixtures[0].status, FixtureStatus::Live);
        assert_eq!(fixtures[0].home.code.as_deref(), Some("ARS"));
        assert_eq!(fixtures[0].home_score, Some(2));
        assert_eq!(fixtures[1].status, FixtureStatus::Scheduled);
        assert_eq!(fixtures[1].round, Some(round));
    }

    #[test]
    fn live_scores_carry_matches_only() {
        let api = FootballDataApi::default();
        let round = Round::new(3).expect("valid round");
        let Payload::LiveScores(live) = api
            .normalize(&Resource::LiveScores { round }, MATCHES)
            .expect("live")
        else {
            panic!("unexpected payload kind");
        };

        assert!(live.players.is_empty());
        assert_eq!(live.matches.len(), 2);
    }

    #[test]
    fn squads_map_positions_explicitly() {
        let api = FootballDataApi::default();
        let Payload::Players(players) = api.normalize(&Resource::Players, TEAMS).expect("players")
        else {
            panic!("unexpected payload kind");
        };

        let positions = players.iter().map(|player| player.position).collect::<Vec<_>>();
        assert_eq!(
            positions,
            vec![
                Position::Goalkeeper,
                Position::Defender,
                Position::Forward,
                Position::Midfielder
            ]
        );
        assert_eq!(players[2].second_name, "Saka");
        assert_eq!(players[2].first_name, "Bukayo");
        assert_eq!(players[3].first_name, "");
        assert_eq!(players[3].web_name, "Jorginho");
        assert!(players.iter().all(|player| player.team_code == "ARS"));
        assert!(players.iter().all(|player| player.price_tenths.is_none()));
    }

    #[test]
    fn unmapped_position_fails_loudly() {
        let api = FootballDataApi::default();
        let body = TEAMS.replace("\"Centre-Back\"", "\"Sweeper Keeper\"");

        let error = api
            .normalize(&Resource::Players, &body)
            .expect_err("unmapped position");
        assert_eq!(error.kind(), SourceErrorKind::SchemaMismatch);

        let missing = TEAMS.replace("\"position\": \"Goalkeeper\"", "\"position\": null");
        assert!(api.normalize(&Resource::Players, &missing).is_err());
    }

    #[test]
    fn unknown_match_status_is_a_schema_mismatch() {
        let api = FootballDataApi::default();
        let body = MATCHES.replace("\"TIMED\"", "\"ABANDONED_BY_ALIENS\"");

        let error = api
            .normalize(&Resource::Fixtures { round: None }, &body)
            .expect_err("unmapped status");
        assert_eq!(error.kind(), SourceErrorKind::SchemaMismatch);
    }

    #[test]
    fn reference_data_is_unsupported_and_token_is_sent() {
        let api = FootballDataApi::new("https://fd.test/v4", Some(String::from("secret")));

        let error = api
            .request_for(&Resource::ReferenceData)
            .expect_err("unsupported");
        assert_eq!(error.kind(), SourceErrorKind::UnsupportedOperation);

        let request = api.request_for(&Resource::Teams).expect("request");
        assert_eq!(request.url, "https://fd.test/v4/competitions/PL/teams");
        assert_eq!(
            request.headers.get("x-auth-token").map(String::as_str),
            Some("secret")
        );
        assert_eq!(api.probe_request().url, "https://fd.test/v4/competitions/PL");
    }

    #[test]
    fn clubs_and_squads_share_the_teams_document() {
        let api = FootballDataApi::default();
        let round = Round::new(3).expect("valid round");

        assert_eq!(
            api.document_of(&Resource::Players),
            api.document_of(&Resource::Teams)
        );
        assert_eq!(
            api.document_of(&Resource::LiveScores { round }),
            vec![Resource::LiveScores { round }]
        );
    }
}
