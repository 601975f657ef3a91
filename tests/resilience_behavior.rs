//! Behavior-driven tests for resilience
//!
//! These tests verify HOW the feed behaves when upstreams are slow to admit
//! calls, failing, or returning data it no longer understands.

mod support;

use std::time::Duration;

use matchday_core::{
    CacheMode, CircuitState, FeedError, FeedEvent, HttpError, HttpResponse, Operation,
    ProviderId, Resource, RetryConfig, Round,
};
use support::{build_service, healthy_football_data, healthy_fpl, test_config, FD_TEAMS};
use tokio::sync::broadcast;
use tokio::time::Instant;

fn drain(events: &mut broadcast::Receiver<FeedEvent>) -> Vec<FeedEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

// =============================================================================
// Resilience: Rate Limiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_minute_quota_is_spent_system_defers_the_next_call_to_the_window_reset() {
    // Given: FPL limited to five calls per minute
    let mut config = test_config();
    if let Some(policy) = config.sources.get_mut(&ProviderId::Fpl) {
        policy.rate_limit.per_minute = 5;
    }
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    let start = Instant::now();
    let service = build_service(config, &fpl, &football_data, None);

    // When: Six refreshes are made back to back
    for _ in 0..5 {
        service
            .get_players_with(CacheMode::Refresh)
            .await
            .expect("within quota");
    }
    let snapshot = service.snapshot().await;
    let limit = snapshot.source(ProviderId::Fpl).expect("fpl").rate_limit;
    assert_eq!(limit.minute_remaining, 0);

    service
        .get_players_with(CacheMode::Refresh)
        .await
        .expect("deferred, not refused");

    // Then: Five calls went out immediately and the sixth waited for the reset
    let calls = fpl.calls_to("bootstrap-static");
    assert_eq!(calls.len(), 6);
    assert!(calls[4].at.duration_since(start) < Duration::from_secs(1));
    assert!(calls[5].at.duration_since(start) >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn when_quota_frees_too_late_system_fails_fast_with_rate_limited() {
    // Given: FPL limited to one call per minute and a ten second queue budget
    let mut config = test_config();
    if let Some(policy) = config.sources.get_mut(&ProviderId::Fpl) {
        policy.rate_limit.per_minute = 1;
    }
    config.scheduler.max_queue_wait = Duration::from_secs(10);
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    let service = build_service(config, &fpl, &football_data, None);
    service.get_players().await.expect("first call");

    // When: A second call bypasses the cache inside the same minute
    let result = service.get_players_with(CacheMode::Bypass).await;

    // Then: The call is refused locally with a rate-limit attempt
    match result {
        Err(FeedError::SourcesExhausted {
            operation,
            attempts,
        }) => {
            assert_eq!(operation, Operation::Players);
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].code, "source.rate_limited");
        }
        other => panic!("expected exhausted sources, got {other:?}"),
    }
    assert_eq!(fpl.call_count("bootstrap-static"), 1);
}

#[tokio::test(start_paused = true)]
async fn when_upstream_returns_429_system_honours_retry_after() {
    // Given: FPL answers the first call with 429 and a five second Retry-After
    let fpl = healthy_fpl();
    fpl.respond_once(
        "bootstrap-static/",
        Ok(HttpResponse::new(429, "{}").with_header("retry-after", "5")),
    );
    let football_data = healthy_football_data();
    let service = build_service(test_config(), &fpl, &football_data, None);

    // When: Players are requested
    let players = service.get_players().await.expect("eventually served");

    // Then: The retry waited out the deferral
    assert_eq!(players.len(), 2);
    let calls = fpl.calls_to("bootstrap-static");
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at.duration_since(calls[0].at) >= Duration::from_secs(5));
}

// =============================================================================
// Resilience: Circuit Breaker
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_failures_reach_threshold_system_opens_circuit_then_probes_after_cooldown() {
    // Given: football-data pinned for teams, failing, with a threshold of two
    let mut config = test_config();
    if let Some(policy) = config.sources.get_mut(&ProviderId::FootballData) {
        policy.breaker.failure_threshold = 2;
    }
    config.scheduler.retry = RetryConfig::no_retry();
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    football_data.respond("/teams", Ok(HttpResponse::new(500, "{}")));
    let service = build_service(config, &fpl, &football_data, None);
    service
        .set_override(Operation::Teams, ProviderId::FootballData)
        .expect("football-data serves teams");

    // When: Two calls fail
    assert!(service.get_teams().await.is_err());
    assert!(service.get_teams().await.is_err());

    // Then: The circuit is open and the next call never leaves the process
    let snapshot = service.snapshot().await;
    let breaker = snapshot.source(ProviderId::FootballData).expect("fd").breaker;
    assert_eq!(breaker.state, CircuitState::Open);
    assert_eq!(snapshot.tripped_sources(), vec![ProviderId::FootballData]);

    match service.get_teams().await {
        Err(FeedError::SourcesExhausted { attempts, .. }) => {
            assert_eq!(attempts[0].code, "source.circuit_open");
        }
        other => panic!("expected an open circuit, got {other:?}"),
    }
    assert_eq!(football_data.call_count("/teams"), 2);
    assert_eq!(fpl.call_count("bootstrap-static"), 0);

    // When: The cooldown passes and the upstream recovers
    tokio::time::advance(Duration::from_secs(31)).await;
    football_data.respond("/teams", Ok(HttpResponse::ok_json(FD_TEAMS)));
    let teams = service.get_teams().await.expect("half-open probe succeeds");

    // Then: One probe went out and the circuit closed
    assert_eq!(teams.len(), 1);
    assert_eq!(football_data.call_count("/teams"), 3);
    let snapshot = service.snapshot().await;
    let breaker = snapshot.source(ProviderId::FootballData).expect("fd").breaker;
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn when_client_errors_repeat_system_keeps_circuit_closed() {
    // Given: football-data rejecting team requests with 403
    let mut config = test_config();
    if let Some(policy) = config.sources.get_mut(&ProviderId::FootballData) {
        policy.breaker.failure_threshold = 1;
    }
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    football_data.respond("/teams", Ok(HttpResponse::new(403, "{}")));
    let service = build_service(config, &fpl, &football_data, None);
    service
        .set_override(Operation::Teams, ProviderId::FootballData)
        .expect("football-data serves teams");

    // When: Teams are requested twice
    assert!(service.get_teams().await.is_err());
    assert!(service.get_teams().await.is_err());

    // Then: Neither call was retried and the breaker stayed closed
    assert_eq!(football_data.call_count("/teams"), 2);
    let snapshot = service.snapshot().await;
    let breaker = snapshot.source(ProviderId::FootballData).expect("fd").breaker;
    assert_eq!(breaker.state, CircuitState::Closed);
}

// =============================================================================
// Resilience: Fallback Routing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_primary_fails_system_serves_fixtures_from_fallback() {
    // Given: football-data, the fixtures primary, returning 500
    let mut config = test_config();
    if let Some(policy) = config.sources.get_mut(&ProviderId::FootballData) {
        policy.breaker.failure_threshold = 1;
    }
    config.scheduler.retry = RetryConfig::no_retry();
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    football_data.respond("/matches", Ok(HttpResponse::new(500, "{}")));
    let service = build_service(config, &fpl, &football_data, None);
    let mut events = service.subscribe();
    let round = Round::new(3).expect("valid round");

    // When: Fixtures for round 3 are requested
    let routed = service
        .fetch(Resource::Fixtures { round: Some(round) }, CacheMode::Use)
        .await
        .expect("fallback serves");

    // Then: FPL served them and the switch was announced
    assert_eq!(routed.served_by, ProviderId::Fpl);
    assert_eq!(routed.attempts.len(), 1);
    assert_eq!(routed.attempts[0].provider, ProviderId::FootballData);
    assert_eq!(fpl.call_count("fixtures/?event=3"), 1);
    let matchday_core::Payload::Fixtures(fixtures) = &routed.payload else {
        panic!("fixtures payload");
    };
    assert_eq!(fixtures[0].home.code.as_deref(), Some("ARS"));
    assert_eq!(fpl.call_count("bootstrap-static"), 1);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        FeedEvent::SourceSwitched {
            operation: Operation::Fixtures,
            from: ProviderId::FootballData,
            to: ProviderId::Fpl,
        }
    )));

    let snapshot = service.snapshot().await;
    let route = snapshot.route(Operation::Fixtures).expect("fixtures route");
    assert_eq!(route.fallbacks, 1);
    assert_eq!(route.last_served_by, Some(ProviderId::Fpl));
    let fd = snapshot.source(ProviderId::FootballData).expect("fd");
    assert_eq!(fd.breaker.state, CircuitState::Open);
    assert!(!fd.status.available);

    // When: Fixtures without a round filter are requested next
    service.get_fixtures(None).await.expect("served by fpl");

    // Then: The unavailable primary was not called again
    assert_eq!(football_data.call_count("/matches"), 1);
    assert_eq!(service.snapshot().await.total_fallbacks(), 2);
}

#[tokio::test(start_paused = true)]
async fn when_every_source_fails_system_serves_the_expired_entry() {
    // Given: Players cached, then FPL going down and the entry expiring
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    let service = build_service(test_config(), &fpl, &football_data, None);
    let cached = service.get_players().await.expect("first fetch");
    fpl.respond("bootstrap-static/", Err(HttpError::new("connection reset")));
    tokio::time::advance(Duration::from_secs(6 * 60 * 60 + 1)).await;
    let mut events = service.subscribe();

    // When: Players are requested
    let routed = service
        .fetch(Resource::Players, CacheMode::Use)
        .await
        .expect("stale serve");

    // Then: The expired entry was served and flagged
    assert!(routed.stale);
    assert_eq!(routed.served_by, ProviderId::Fpl);
    assert_eq!(routed.attempts[0].code, "source.transient");
    assert_eq!(routed.payload, matchday_core::Payload::Players(cached));
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        FeedEvent::StaleServed {
            operation: Operation::Players,
            provider: ProviderId::Fpl,
        }
    )));
    let snapshot = service.snapshot().await;
    assert_eq!(snapshot.cache.stale_serves, 1);
    assert_eq!(snapshot.route(Operation::Players).expect("route").stale_serves, 1);
}

#[tokio::test(start_paused = true)]
async fn when_payload_shape_changes_system_reports_schema_mismatch() {
    // Given: FPL answering bootstrap-static with an unknown shape
    let fpl = healthy_fpl();
    fpl.respond("bootstrap-static/", Ok(HttpResponse::ok_json(r#"{"unexpected": true}"#)));
    let football_data = healthy_football_data();
    let service = build_service(test_config(), &fpl, &football_data, None);
    let mut events = service.subscribe();

    // When: Players are requested
    let result = service.get_players().await;

    // Then: The caller sees a schema mismatch naming the provider
    match result {
        Err(FeedError::SchemaMismatch {
            provider,
            operation,
            ..
        }) => {
            assert_eq!(provider, ProviderId::Fpl);
            assert_eq!(operation, Operation::Players);
        }
        other => panic!("expected a schema mismatch, got {other:?}"),
    }
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, FeedEvent::SchemaMismatch { .. })));
    assert_eq!(fpl.call_count("bootstrap-static"), 1);
}

#[tokio::test(start_paused = true)]
async fn when_override_is_unsupported_system_rejects_it() {
    // Given: A running feed
    let fpl = healthy_fpl();
    let football_data = healthy_football_data();
    let service = build_service(test_config(), &fpl, &football_data, None);

    // When: Reference data is pinned to football-data, which cannot serve it
    let result = service.set_override(Operation::ReferenceData, ProviderId::FootballData);

    // Then: The override is refused and routing is unchanged
    assert!(matches!(result, Err(FeedError::InvalidRequest(_))));
    service.get_reference_data().await.expect("fpl still serves");
}
