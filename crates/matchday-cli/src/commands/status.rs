use matchday_core::FeedService;

use crate::cli::StatusArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &StatusArgs, service: &FeedService) -> Result<CommandResult, CliError> {
    if args.check {
        service.check_sources().await;
    }

    let snapshot = service.snapshot().await;
    let mut result = CommandResult::ok(serde_json::to_value(&snapshot)?);
    for provider in snapshot.tripped_sources() {
        result = result.with_warning(format!("circuit for '{provider}' is not closed"));
    }
    for source in snapshot.sources.iter().filter(|source| !source.status.available) {
        result = result.with_warning(format!("'{}' is unavailable", source.provider));
    }
    Ok(result)
}
