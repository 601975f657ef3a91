mod feed;
mod status;

use std::sync::Arc;
use std::time::Instant;

use matchday_core::{FeedConfig, FeedService, Operation, ProviderId, Resource, Round};
use matchday_warehouse::Warehouse;
use serde_json::Value;
use tracing::warn;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::{Envelope, EnvelopeError, Metadata};

pub struct CommandResult {
    pub data: Value,
    pub served_by: Option<ProviderId>,
    pub stale: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            served_by: None,
            stale: false,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failed(error: EnvelopeError) -> Self {
        Self {
            errors: vec![error],
            ..Self::ok(Value::Null)
        }
    }

    pub fn served_by(mut self, provider: ProviderId, stale: bool) -> Self {
        self.served_by = Some(provider);
        self.stale = stale;
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let mode = cli.cache_mode();
    let mut metadata = Metadata::new(command_name(&cli.command), mode);

    let mut builder = FeedService::builder(FeedConfig::from_env()?);
    if !cli.no_warehouse {
        match Warehouse::open_default() {
            Ok(warehouse) => builder = builder.with_persistent_tier(Arc::new(warehouse)),
            Err(error) => {
                warn!(%error, "warm cache unavailable; continuing with memory cache only");
                metadata.push_warning(format!("warm cache unavailable: {error}"));
            }
        }
    }
    let service = builder.build()?;

    if let Some(provider) = cli.source.provider() {
        match operation_for(&cli.command) {
            Some(operation) => service
                .set_override(operation, provider)
                .map_err(|error| CliError::Command(error.to_string()))?,
            None => metadata.push_warning("--source applies to data commands only"),
        }
    }

    let started = Instant::now();
    let result = match &cli.command {
        Command::Reference => feed::fetch(&service, Resource::ReferenceData, mode).await?,
        Command::CurrentRound => feed::current_round(&service, mode).await?,
        Command::Fixtures(args) => {
            let round = args.round.map(Round::new).transpose()?;
            feed::fetch(&service, Resource::Fixtures { round }, mode).await?
        }
        Command::Live(args) => {
            let round = Round::new(args.round)?;
            feed::fetch(&service, Resource::LiveScores { round }, mode).await?
        }
        Command::Teams => feed::fetch(&service, Resource::Teams, mode).await?,
        Command::Players => feed::fetch(&service, Resource::Players, mode).await?,
        Command::Status(args) => status::run(args, &service).await?,
    };
    service.shutdown();

    let CommandResult {
        data,
        served_by,
        stale,
        warnings,
        errors,
    } = result;

    metadata.served_by = served_by;
    metadata.stale = stale;
    metadata.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    for warning in warnings {
        metadata.push_warning(warning);
    }

    Ok(Envelope {
        meta: metadata,
        data,
        errors,
    })
}

const fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Reference => "reference",
        Command::CurrentRound => "current-round",
        Command::Fixtures(_) => "fixtures",
        Command::Live(_) => "live",
        Command::Teams => "teams",
        Command::Players => "players",
        Command::Status(_) => "status",
    }
}

const fn operation_for(command: &Command) -> Option<Operation> {
    match command {
        Command::Reference | Command::CurrentRound => Some(Operation::ReferenceData),
        Command::Fixtures(_) => Some(Operation::Fixtures),
        Command::Live(_) => Some(Operation::LiveScores),
        Command::Teams => Some(Operation::Teams),
        Command::Players => Some(Operation::Players),
        Command::Status(_) => None,
    }
}
