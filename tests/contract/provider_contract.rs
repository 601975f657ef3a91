//! Contract tests shared by every provider API.
//!
//! Each provider must build requests under its base URL, declare what it
//! supports, refuse the rest with `UnsupportedOperation`, and normalize its
//! payloads into the common domain shapes.

#[path = "../support/mod.rs"]
mod support;

use matchday_core::{
    FootballDataApi, FplApi, Operation, Payload, ProviderApi, ProviderId, Resource, Round,
    SourceErrorKind,
};
use support::{
    BOOTSTRAP, FD_MATCHES, FD_TEAMS, FOOTBALL_DATA_BASE, FPL_BASE, FPL_FIXTURES, FPL_LIVE,
};

fn providers() -> Vec<Box<dyn ProviderApi>> {
    vec![
        Box::new(FplApi::new(FPL_BASE)),
        Box::new(FootballDataApi::new(
            FOOTBALL_DATA_BASE,
            Some(String::from("test-token")),
        )),
    ]
}

/// Canned upstream body for a resource, per provider.
fn body_for(provider: ProviderId, resource: Resource) -> &'static str {
    match (provider, resource) {
        (ProviderId::Fpl, Resource::Fixtures { .. }) => FPL_FIXTURES,
        (ProviderId::Fpl, Resource::LiveScores { .. }) => FPL_LIVE,
        (ProviderId::Fpl, _) => BOOTSTRAP,
        (ProviderId::FootballData, Resource::Fixtures { .. } | Resource::LiveScores { .. }) => {
            FD_MATCHES
        }
        (ProviderId::FootballData, _) => FD_TEAMS,
    }
}

/// Provider with its lookup tables loaded the way the pipeline loads them.
fn primed(api: &dyn ProviderApi, resource: Resource) {
    if let Some(dependency) = api.depends_on(&resource) {
        let lookup = api
            .normalize(&dependency, body_for(api.id(), dependency))
            .expect("dependency normalizes");
        api.observe(&lookup);
    }
}

fn resources() -> Vec<Resource> {
    let round = Round::new(3).expect("valid round");
    vec![
        Resource::ReferenceData,
        Resource::Fixtures { round: None },
        Resource::Fixtures { round: Some(round) },
        Resource::LiveScores { round },
        Resource::Teams,
        Resource::Players,
    ]
}

#[test]
fn every_provider_builds_requests_under_its_base_url() {
    for api in providers() {
        let base = match api.id() {
            ProviderId::Fpl => FPL_BASE,
            ProviderId::FootballData => FOOTBALL_DATA_BASE,
        };
        for resource in resources() {
            if !api.capabilities().supports(resource.operation()) {
                continue;
            }
            let request = api.request_for(&resource).expect("supported resource");
            assert!(
                request.url.starts_with(base),
                "{} built {} for {resource}",
                api.id(),
                request.url
            );
            assert!(!request.is_conditional());
        }
        assert!(api.probe_request().url.starts_with(base));
    }
}

#[test]
fn unsupported_operations_fail_with_unsupported_operation() {
    for api in providers() {
        for operation in Operation::ALL {
            if api.capabilities().supports(operation) {
                continue;
            }
            let resource = resources()
                .into_iter()
                .find(|resource| resource.operation() == operation)
                .expect("resource for operation");
            let error = api.request_for(&resource).expect_err("unsupported");
            assert_eq!(error.kind(), SourceErrorKind::UnsupportedOperation);
            assert!(!error.retryable());
        }
    }
}

#[test]
fn football_data_does_not_serve_reference_data() {
    let api = FootballDataApi::new(FOOTBALL_DATA_BASE, None);
    assert!(!api.capabilities().supports(Operation::ReferenceData));
    assert!(api.capabilities().supports(Operation::Fixtures));
}

#[test]
fn every_supported_resource_normalizes_into_its_payload_kind() {
    for api in providers() {
        for resource in resources() {
            if !api.capabilities().supports(resource.operation()) {
                continue;
            }
            primed(api.as_ref(), resource);
            let payload = api
                .normalize(&resource, body_for(api.id(), resource))
                .unwrap_or_else(|error| panic!("{} failed {resource}: {error}", api.id()));
            assert_eq!(payload.kind(), resource.operation().payload_kind());
        }
    }
}

#[test]
fn both_providers_agree_on_team_and_fixture_shapes() {
    let fpl = FplApi::new(FPL_BASE);
    let football_data = FootballDataApi::new(FOOTBALL_DATA_BASE, None);

    let Payload::Teams(fpl_teams) = fpl.normalize(&Resource::Teams, BOOTSTRAP).expect("fpl teams")
    else {
        panic!("fpl teams payload");
    };
    let Payload::Teams(fd_teams) = football_data
        .normalize(&Resource::Teams, FD_TEAMS)
        .expect("football-data teams")
    else {
        panic!("football-data teams payload");
    };
    let arsenal = |teams: &[matchday_core::Team]| {
        teams
            .iter()
            .find(|team| team.code == "ARS")
            .map(|team| team.code.clone())
    };
    assert_eq!(arsenal(&fpl_teams), arsenal(&fd_teams));

    let round = Round::new(3).expect("valid round");
    let resource = Resource::Fixtures { round: Some(round) };
    let Payload::Fixtures(fd_fixtures) = football_data
        .normalize(&resource, FD_MATCHES)
        .expect("football-data fixtures")
    else {
        panic!("football-data fixtures payload");
    };
    let Payload::Fixtures(fpl_fixtures) = fpl.normalize(&resource, FPL_FIXTURES).expect("fpl fixtures")
    else {
        panic!("fpl fixtures payload");
    };
    assert_eq!(fd_fixtures[0].round, Some(round));
    assert_eq!(fpl_fixtures[0].round, Some(round));
    assert_eq!(fd_fixtures[0].kickoff, fpl_fixtures[0].kickoff);
    assert_eq!(fd_fixtures[0].status, fpl_fixtures[0].status);
    assert_eq!(fd_fixtures[0].home.code, fpl_fixtures[0].home.code);
    assert_eq!(fd_fixtures[0].away.code, fpl_fixtures[0].away.code);
}

#[test]
fn every_document_lists_the_same_members_for_each_of_them() {
    for api in providers() {
        for resource in resources() {
            if !api.capabilities().supports(resource.operation()) {
                continue;
            }
            let document = api.document_of(&resource);
            assert!(document.contains(&resource), "{} {resource}", api.id());
            for member in &document {
                assert_eq!(api.document_of(member), document, "{} {member}", api.id());
                assert_eq!(
                    api.request_for(member).expect("member request").url,
                    api.request_for(&resource).expect("request").url
                );
            }
        }
    }
}

#[test]
fn fixtures_from_a_cold_provider_never_lack_club_codes() {
    for api in providers() {
        let resource = Resource::Fixtures { round: None };
        match api.normalize(&resource, body_for(api.id(), resource)) {
            Ok(Payload::Fixtures(fixtures)) => {
                assert!(fixtures
                    .iter()
                    .all(|fixture| fixture.home.code.is_some() && fixture.away.code.is_some()));
            }
            Ok(other) => panic!("{} returned {:?}", api.id(), other.kind()),
            Err(error) => assert!(
                api.depends_on(&resource).is_some(),
                "{} failed without declaring a dependency: {error}",
                api.id()
            ),
        }
    }
}

#[test]
fn malformed_bodies_surface_as_schema_mismatch() {
    for api in providers() {
        let error = api
            .normalize(&Resource::Teams, r#"{"shape": "changed"}"#)
            .expect_err("unexpected shape");
        assert_eq!(error.kind(), SourceErrorKind::SchemaMismatch);
    }
}
