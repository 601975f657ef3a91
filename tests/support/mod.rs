//! Shared fakes for behaviour tests: a scriptable upstream and canned payloads.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use matchday_core::{
    FeedConfig, FeedService, HttpClient, HttpError, HttpRequest, HttpResponse, PersistentTier,
    ProviderId, RetryConfig,
};
use tokio::time::Instant;

pub const FPL_BASE: &str = "https://fpl.test/api";
pub const FOOTBALL_DATA_BASE: &str = "https://football-data.test/v4";

pub const BOOTSTRAP: &str = r#"{
    "events": [
        {"id": 1, "deadline_time": "2025-08-15T17:30:00Z", "finished": true, "is_current": false, "is_next": false},
        {"id": 2, "deadline_time": "2025-08-22T17:30:00Z", "finished": false, "is_current": true, "is_next": false},
        {"id": 3, "deadline_time": "2025-08-29T17:30:00Z", "finished": false, "is_current": false, "is_next": true}
    ],
    "teams": [
        {"id": 1, "code": 3, "name": "Arsenal", "short_name": "ARS"},
        {"id": 2, "code": 7, "name": "Aston Villa", "short_name": "AVL"}
    ],
    "elements": [
        {"id": 10, "first_name": "Bukayo", "second_name": "Saka", "web_name": "Saka", "team": 1,
         "element_type": 3, "now_cost": 100, "total_points": 12, "status": "a"},
        {"id": 11, "first_name": "Ollie", "second_name": "Watkins", "web_name": "Watkins", "team": 2,
         "element_type": 4, "now_cost": 90, "total_points": 8, "status": "a"}
    ]
}"#;

pub const FPL_FIXTURES: &str = r#"[
    {"id": 21, "event": 3, "kickoff_time": "2025-08-30T11:30:00Z", "team_h": 1, "team_a": 2,
     "team_h_score": null, "team_a_score": null, "started": false, "finished": false, "finished_provisional": false}
]"#;

pub const FPL_LIVE: &str = r#"{"elements": [
    {"id": 10, "stats": {"minutes": 90, "goals_scored": 1, "assists": 1, "clean_sheets": 0,
     "bonus": 3, "total_points": 13, "bps": 41}, "explain": []}
]}"#;

pub const FD_MATCHES: &str = r#"{
    "filters": {"matchday": "3"},
    "matches": [
        {"id": 500, "utcDate": "2025-08-30T11:30:00Z", "status": "TIMED", "matchday": 3,
         "homeTeam": {"id": 57, "name": "Arsenal FC", "shortName": "Arsenal", "tla": "ARS"},
         "awayTeam": {"id": 58, "name": "Aston Villa FC", "shortName": "Aston Villa", "tla": "AVL"},
         "score": {"winner": null, "fullTime": {"home": null, "away": null}}}
    ]
}"#;

pub const FD_TEAMS: &str = r#"{
    "teams": [
        {"id": 57, "name": "Arsenal FC", "shortName": "Arsenal", "tla": "ARS",
         "squad": [{"id": 7, "name": "Bukayo Saka", "position": "Right Winger"}]}
    ]
}"#;

/// A recorded upstream call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub at: Instant,
}

type Reply = Result<HttpResponse, HttpError>;

#[derive(Default)]
struct Route {
    queued: VecDeque<Reply>,
    sticky: Option<Reply>,
}

/// Upstream fake keyed by URL fragment. The longest matching fragment wins;
/// one-shot replies are used before the sticky reply.
#[derive(Default)]
pub struct FakeUpstream {
    routes: Mutex<BTreeMap<String, Route>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, fragment: &str, reply: Reply) {
        let mut routes = self.routes.lock().expect("routes lock");
        routes.entry(fragment.to_owned()).or_default().sticky = Some(reply);
    }

    pub fn respond_once(&self, fragment: &str, reply: Reply) {
        let mut routes = self.routes.lock().expect("routes lock");
        routes.entry(fragment.to_owned()).or_default().queued.push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, fragment: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.url.contains(fragment))
            .collect()
    }

    pub fn call_count(&self, fragment: &str) -> usize {
        self.calls_to(fragment).len()
    }

    fn reply_for(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().expect("routes lock");
        let fragment = routes
            .keys()
            .filter(|fragment| url.contains(fragment.as_str()))
            .max_by_key(|fragment| fragment.len())
            .cloned();
        let Some(route) = fragment.and_then(|fragment| routes.get_mut(&fragment)) else {
            return Ok(HttpResponse::new(404, "{}"));
        };
        route
            .queued
            .pop_front()
            .or_else(|| route.sticky.clone())
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "{}")))
    }
}

impl HttpClient for FakeUpstream {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            url: request.url.clone(),
            headers: request.headers.clone(),
            at: Instant::now(),
        });
        let reply = self.reply_for(&request.url);
        Box::pin(async move { reply })
    }
}

/// FPL fake answering every endpoint with the canned payloads.
pub fn healthy_fpl() -> Arc<FakeUpstream> {
    let upstream = FakeUpstream::new();
    upstream.respond("bootstrap-static/", Ok(HttpResponse::ok_json(BOOTSTRAP)));
    upstream.respond("fixtures/", Ok(HttpResponse::ok_json(FPL_FIXTURES)));
    upstream.respond("/live/", Ok(HttpResponse::ok_json(FPL_LIVE)));
    upstream.respond("event-status/", Ok(HttpResponse::ok_json(r#"{"status": []}"#)));
    upstream
}

pub fn healthy_football_data() -> Arc<FakeUpstream> {
    let upstream = FakeUpstream::new();
    upstream.respond("/matches", Ok(HttpResponse::ok_json(FD_MATCHES)));
    upstream.respond("/teams", Ok(HttpResponse::ok_json(FD_TEAMS)));
    upstream.respond("/competitions/PL", Ok(HttpResponse::ok_json(r#"{"id": 2021}"#)));
    upstream
}

/// Deterministic configuration for paused-time tests: short backoff, no
/// background sweeps or probes within a test's time span.
pub fn test_config() -> FeedConfig {
    let mut config = FeedConfig::default();
    for (provider, policy) in &mut config.sources {
        policy.base_url = String::from(match provider {
            ProviderId::Fpl => FPL_BASE,
            ProviderId::FootballData => FOOTBALL_DATA_BASE,
        });
        policy.request_timeout = Duration::from_secs(5);
    }
    if let Some(policy) = config.sources.get_mut(&ProviderId::FootballData) {
        policy.auth_token = Some(String::from("test-token"));
    }
    config.scheduler.poll_interval = Duration::from_millis(10);
    config.scheduler.retry = RetryConfig::fixed(Duration::from_millis(100), 2);
    config.sweep_interval = Duration::from_secs(7 * 24 * 60 * 60);
    config.health_check_interval = Duration::from_secs(7 * 24 * 60 * 60);
    config
}

/// Service wired to one fake per provider, optionally with a warm tier.
pub fn build_service(
    config: FeedConfig,
    fpl: &Arc<FakeUpstream>,
    football_data: &Arc<FakeUpstream>,
    warm: Option<Arc<dyn PersistentTier>>,
) -> FeedService {
    let mut builder = FeedService::builder(config)
        .with_source_client(ProviderId::Fpl, Arc::clone(fpl) as Arc<dyn HttpClient>)
        .with_source_client(
            ProviderId::FootballData,
            Arc::clone(football_data) as Arc<dyn HttpClient>,
        );
    if let Some(tier) = warm {
        builder = builder.with_persistent_tier(tier);
    }
    builder.build().expect("test configuration is valid")
}
