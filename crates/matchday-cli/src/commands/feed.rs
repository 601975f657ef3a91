use matchday_core::{CacheMode, FeedService, Payload, Resource, Routed};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;
use crate::metadata::EnvelopeError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct CurrentRoundData {
    round: Option<u32>,
}

pub async fn fetch(
    service: &FeedService,
    resource: Resource,
    mode: CacheMode,
) -> Result<CommandResult, CliError> {
    match service.fetch(resource, mode).await {
        Ok(routed) => {
            let data = payload_data(&routed.payload)?;
            Ok(served(data, routed))
        }
        Err(error) => Ok(CommandResult::failed(EnvelopeError::from_feed(&error))),
    }
}

pub async fn current_round(service: &FeedService, mode: CacheMode) -> Result<CommandResult, CliError> {
    match service.fetch(Resource::ReferenceData, mode).await {
        Ok(routed) => {
            let round = match &routed.payload {
                Payload::ReferenceData(reference) => reference.current_round(),
                other => {
                    return Err(CliError::Command(format!(
                        "unexpected '{}' payload for reference data",
                        other.kind()
                    )));
                }
            };
            let data = serde_json::to_value(CurrentRoundData {
                round: round.map(u32::from),
            })?;
            Ok(served(data, routed))
        }
        Err(error) => Ok(CommandResult::failed(EnvelopeError::from_feed(&error))),
    }
}

fn served(data: Value, routed: Routed) -> CommandResult {
    let mut result = CommandResult::ok(data).served_by(routed.served_by, routed.stale);
    if routed.stale {
        result = result.with_warning("all sources failed; served an expired cache entry");
    }
    for attempt in routed.attempts {
        result = result.with_warning(format!(
            "{} failed ({}): {}",
            attempt.provider, attempt.code, attempt.message
        ));
    }
    result
}

/// The payload's inner value, without the cache tag.
fn payload_data(payload: &Payload) -> Result<Value, serde_json::Error> {
    match payload {
        Payload::ReferenceData(reference) => serde_json::to_value(reference),
        Payload::Fixtures(fixtures) => serde_json::to_value(fixtures),
        Payload::LiveScores(live) => serde_json::to_value(live),
        Payload::Teams(teams) => serde_json::to_value(teams),
        Payload::Players(players) => serde_json::to_value(players),
    }
}
