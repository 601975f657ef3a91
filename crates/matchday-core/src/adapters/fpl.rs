use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Deserialize;

use super::{parse_body, required, trim_base_url, validation_to_error, ProviderApi};
use crate::data_source::{CapabilitySet, Resource, SourceError};
use crate::domain::{FixtureStatus, PlayerLiveStats, Position, RoundInfo, TeamRef};
use crate::http_client::HttpRequest;
use crate::{Fixture, LiveRound, Payload, Player, ProviderId, ReferenceData, Round, Team, UtcDateTime};

pub const DEFAULT_BASE_URL: &str = "https://fantasy.premierleague.com/api";

const ID: ProviderId = ProviderId::Fpl;

/// Official Fantasy Premier League API.
///
/// `bootstrap-static` serves reference data, clubs and players in one document;
/// fixtures and live stats have their own endpoints. Fixtures identify clubs by
/// FPL id only, so the club table must be observed before fixtures normalize.
/// A fixture naming a club outside that table is an error, never a bare id.
#[derive(Debug)]
pub struct FplApi {
    base_url: String,
    timeout: Duration,
    clubs: Mutex<HashMap<u32, Team>>,
}

impl Default for FplApi {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl FplApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: trim_base_url(base_url),
            timeout: Duration::from_secs(10),
            clubs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn get(&self, path: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{path}", self.base_url))
            .with_header("accept", "application/json")
            .with_timeout(self.timeout)
    }

    fn clubs(&self) -> MutexGuard<'_, HashMap<u32, Team>> {
        self.clubs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remember_clubs(&self, teams: &[Team]) {
        let mut clubs = self.clubs();
        for team in teams {
            clubs.insert(team.id, team.clone());
        }
    }

    fn team_ref(&self, fixture: u32, id: u32) -> Result<TeamRef, SourceError> {
        let clubs = self.clubs();
        if clubs.is_empty() {
            return Err(SourceError::transient(format!(
                "fpl fixture {fixture} cannot be mapped before the club table is loaded"
            )));
        }
        let club = clubs.get(&id).ok_or_else(|| {
            SourceError::schema_mismatch(format!(
                "fpl fixture {fixture} references unknown team id {id}"
            ))
        })?;
        Ok(TeamRef {
            id,
            code: Some(club.code.clone()),
            name: Some(club.name.clone()),
        })
    }

    fn bootstrap(&self, body: &str) -> Result<(FplBootstrap, Vec<Team>), SourceError> {
        let bootstrap: FplBootstrap = parse_body(ID, body)?;
        let teams = bootstrap
            .teams
            .iter()
            .map(normalize_team)
            .collect::<Result<Vec<_>, _>>()?;
        self.remember_clubs(&teams);
        Ok((bootstrap, teams))
    }

    fn normalize_fixture(&self, payload: FplFixture) -> Result<Fixture, SourceError> {
        let round = payload
            .event
            .map(Round::new)
            .transpose()
            .map_err(|error| validation_to_error(ID, error))?;
        let kickoff = payload
            .kickoff_time
            .as_deref()
            .map(UtcDateTime::parse)
            .transpose()
            .map_err(|error| validation_to_error(ID, error))?;

        let status = if kickoff.is_none() {
            FixtureStatus::Postponed
        } else if payload.finished || payload.finished_provisional {
            FixtureStatus::Finished
        } else if payload.started.unwrap_or(false) {
            FixtureStatus::Live
        } else {
            FixtureStatus::Scheduled
        };

        Ok(Fixture {
            id: payload.id,
            round,
            kickoff,
            home: self.team_ref(payload.id, payload.team_h)?,
            away: self.team_ref(payload.id, payload.team_a)?,
            home_score: payload.team_h_score,
            away_score: payload.team_a_score,
            status,
        })
    }
}

impl ProviderApi for FplApi {
    fn id(&self) -> ProviderId {
        ID
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn request_for(&self, resource: &Resource) -> Result<HttpRequest, SourceError> {
        Ok(match resource {
            Resource::ReferenceData | Resource::Teams | Resource::Players => {
                self.get("bootstrap-static/")
            }
            Resource::Fixtures { round: Some(round) } => self.get(&format!("fixtures/?event={round}")),
            Resource::Fixtures { round: None } => self.get("fixtures/"),
            Resource::LiveScores { round } => self.get(&format!("event/{round}/live/")),
        })
    }

    fn normalize(&self, resource: &Resource, body: &str) -> Result<Payload, SourceError> {
        match resource {
            Resource::ReferenceData => {
                let (bootstrap, teams) = self.bootstrap(body)?;
                let rounds = bootstrap
                    .events
                    .into_iter()
                    .map(normalize_event)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Payload::ReferenceData(ReferenceData {
                    rounds,
                    teams,
                    player_count: bootstrap.elements.len(),
                }))
            }
            Resource::Teams => {
                let (_, teams) = self.bootstrap(body)?;
                Ok(Payload::Teams(teams))
            }
            Resource::Players => {
                let (bootstrap, teams) = self.bootstrap(body)?;
                let codes = teams
                    .into_iter()
                    .map(|team| (team.id, team.code))
                    .collect::<HashMap<_, _>>();
                let players = bootstrap
                    .elements
                    .into_iter()
                    .map(|element| normalize_player(element, &codes))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Payload::Players(players))
            }
            Resource::Fixtures { .. } => {
                let fixtures: Vec<FplFixture> = parse_body(ID, body)?;
                let fixtures = fixtures
                    .into_iter()
                    .map(|fixture| self.normalize_fixture(fixture))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Payload::Fixtures(fixtures))
            }
            Resource::LiveScores { round } => {
                let live: FplLive = parse_body(ID, body)?;
                let players = live
                    .elements
                    .into_iter()
                    .map(|element| PlayerLiveStats {
                        player_id: element.id,
                        minutes: element.stats.minutes,
                        goals_scored: element.stats.goals_scored,
                        assists: element.stats.assists,
                        clean_sheets: element.stats.clean_sheets,
                        bonus: element.stats.bonus,
                        total_points: element.stats.total_points,
                    })
                    .collect();
                Ok(Payload::LiveScores(LiveRound {
                    round: *round,
                    players,
                    matches: Vec::new(),
                }))
            }
        }
    }

    fn document_of(&self, resource: &Resource) -> Vec<Resource> {
        match resource {
            Resource::ReferenceData | Resource::Teams | Resource::Players => {
                vec![Resource::ReferenceData, Resource::Teams, Resource::Players]
            }
            other => vec![*other],
        }
    }

    fn depends_on(&self, resource: &Resource) -> Option<Resource> {
        matches!(resource, Resource::Fixtures { .. }).then_some(Resource::Teams)
    }

    fn observe(&self, payload: &Payload) {
        match payload {
            Payload::Teams(teams) => self.remember_clubs(teams),
            Payload::ReferenceData(reference) => self.remember_clubs(&reference.teams),
            _ => {}
        }
    }

    fn probe_request(&self) -> HttpRequest {
        self.get("event-status/")
    }
}

#[derive(Debug, Deserialize)]
struct FplBootstrap {
    events: Vec<FplEvent>,
    teams: Vec<FplTeam>,
    elements: Vec<FplElement>,
}

#[derive(Debug, Deserialize)]
struct FplEvent {
    id: u32,
    deadline_time: Option<String>,
    #[serde(default)]
    finished: bool,
    #[serde(default)]
    is_current: bool,
    #[serde(default)]
    is_next: bool,
}

#[derive(Debug, Deserialize)]
struct FplTeam {
    id: u32,
    name: String,
    short_name: String,
}

#[derive(Debug, Deserialize)]
struct FplElement {
    id: u32,
    first_name: String,
    second_name: String,
    web_name: String,
    team: u32,
    element_type: u8,
    now_cost: Option<u32>,
    total_points: Option<i32>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FplFixture {
    id: u32,
    event: Option<u32>,
    kickoff_time: Option<String>,
    team_h: u32,
    team_a: u32,
    team_h_score: Option<u32>,
    team_a_score: Option<u32>,
    started: Option<bool>,
    #[serde(default)]
    finished: bool,
    #[serde(default)]
    finished_provisional: bool,
}

#[derive(Debug, Deserialize)]
struct FplLive {
    elements: Vec<FplLiveElement>,
}

#[derive(Debug, Deserialize)]
struct FplLiveElement {
    id: u32,
    stats: FplLiveStats,
}

#[derive(Debug, Deserialize)]
struct FplLiveStats {
    minutes: u32,
    goals_scored: u32,
    assists: u32,
    clean_sheets: u32,
    bonus: u32,
    total_points: i32,
}

fn normalize_team(payload: &FplTeam) -> Result<Team, SourceError> {
    let code = payload.short_name.trim().to_ascii_uppercase();
    if code.len() != 3 {
        return Err(SourceError::schema_mismatch(format!(
            "fpl team {} has short_name '{}', expected a three-letter code",
            payload.id, payload.short_name
        )));
    }
    Ok(Team {
        id: payload.id,
        code: code.clone(),
        name: payload.name.clone(),
        short_name: code,
    })
}

fn normalize_event(payload: FplEvent) -> Result<RoundInfo, SourceError> {
    Ok(RoundInfo {
        round: Round::new(payload.id).map_err(|error| validation_to_error(ID, error))?,
        deadline: payload
            .deadline_time
            .as_deref()
            .map(UtcDateTime::parse)
            .transpose()
            .map_err(|error| validation_to_error(ID, error))?,
        is_current: payload.is_current,
        is_next: payload.is_next,
        finished: payload.finished,
    })
}

fn normalize_player(payload: FplElement, codes: &HashMap<u32, String>) -> Result<Player, SourceError> {
    let position = match payload.element_type {
        1 => Position::Goalkeeper,
        2 => Position::Defender,
        3 => Position::Midfielder,
        4 => Position::Forward,
        other => {
            return Err(SourceError::schema_mismatch(format!(
                "fpl element {} has unknown element_type {other}",
                payload.id
            )))
        }
    };
    let team_code = required(ID, "elements[].team", codes.get(&payload.team).cloned())?;

    Ok(Player {
        id: payload.id,
        team_code,
        first_name: payload.first_name,
        second_name: payload.second_name,
        web_name: payload.web_name,
        position,
        price_tenths: payload.now_cost,
        total_points: payload.total_points,
        status: payload.status,
    })
}
