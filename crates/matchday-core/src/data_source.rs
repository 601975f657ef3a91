//! Abstract operation set and the per-source contract.
//!
//! # Operations
//!
//! | Operation | Resource | Payload |
//! |-----------|----------|---------|
//! | Reference data | [`Resource::ReferenceData`] | [`ReferenceData`] |
//! | Fixtures | [`Resource::Fixtures`] (optional round) | `Vec<Fixture>` |
//! | Live scores | [`Resource::LiveScores`] (round) | [`LiveRound`] |
//! | Teams | [`Resource::Teams`] | `Vec<Team>` |
//! | Players | [`Resource::Players`] | `Vec<Player>` |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheMode;
use crate::{
    Fixture, LiveRound, Payload, PayloadKind, Player, ProviderId, ReferenceData, Round, Team,
    ValidationError,
};

/// Abstract operation used for routing and capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ReferenceData,
    Fixtures,
    LiveScores,
    Teams,
    Players,
}

impl Operation {
    pub const ALL: [Self; 5] = [
        Self::ReferenceData,
        Self::Fixtures,
        Self::LiveScores,
        Self::Teams,
        Self::Players,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReferenceData => "reference_data",
            Self::Fixtures => "fixtures",
            Self::LiveScores => "live_scores",
            Self::Teams => "teams",
            Self::Players => "players",
        }
    }

    pub const fn payload_kind(self) -> PayloadKind {
        match self {
            Self::ReferenceData => PayloadKind::ReferenceData,
            Self::Fixtures => PayloadKind::Fixtures,
            Self::LiveScores => PayloadKind::LiveScores,
            Self::Teams => PayloadKind::Teams,
            Self::Players => PayloadKind::Players,
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reference_data" | "reference" => Ok(Self::ReferenceData),
            "fixtures" => Ok(Self::Fixtures),
            "live_scores" | "live" => Ok(Self::LiveScores),
            "teams" => Ok(Self::Teams),
            "players" => Ok(Self::Players),
            other => Err(ValidationError::InvalidOperation {
                value: other.to_owned(),
            }),
        }
    }
}

/// A concrete resource: an operation plus its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    ReferenceData,
    Fixtures { round: Option<Round> },
    LiveScores { round: Round },
    Teams,
    Players,
}

impl Resource {
    pub const fn operation(self) -> Operation {
        match self {
            Self::ReferenceData => Operation::ReferenceData,
            Self::Fixtures { .. } => Operation::Fixtures,
            Self::LiveScores { .. } => Operation::LiveScores,
            Self::Teams => Operation::Teams,
            Self::Players => Operation::Players,
        }
    }

    pub const fn round(self) -> Option<Round> {
        match self {
            Self::Fixtures { round } => round,
            Self::LiveScores { round } => Some(round),
            Self::ReferenceData | Self::Teams | Self::Players => None,
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReferenceData => f.write_str("reference"),
            Self::Fixtures { round: Some(round) } => write!(f, "fixtures:gw={round}"),
            Self::Fixtures { round: None } => f.write_str("fixtures:all"),
            Self::LiveScores { round } => write!(f, "live:gw={round}"),
            Self::Teams => f.write_str("teams"),
            Self::Players => f.write_str("players"),
        }
    }
}

/// Operations a source can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub reference_data: bool,
    pub fixtures: bool,
    pub live_scores: bool,
    pub teams: bool,
    pub players: bool,
}

impl CapabilitySet {
    pub const fn full() -> Self {
        Self {
            reference_data: true,
            fixtures: true,
            live_scores: true,
            teams: true,
            players: true,
        }
    }

    pub const fn supports(self, operation: Operation) -> bool {
        match operation {
            Operation::ReferenceData => self.reference_data,
            Operation::Fixtures => self.fixtures,
            Operation::LiveScores => self.live_scores,
            Operation::Teams => self.teams,
            Operation::Players => self.players,
        }
    }

    pub fn supported_operations(self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|operation| self.supports(*operation))
            .collect()
    }
}

/// Per-source failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    /// Timeout or connection failure.
    Transient,
    /// Upstream 429 or local quota refusal.
    RateLimited,
    /// Upstream 5xx.
    UpstreamServer,
    /// Payload no longer matches the expected shape.
    SchemaMismatch,
    /// Breaker is open; no network attempt was made.
    CircuitOpen,
    InvalidRequest,
    UnsupportedOperation,
}

/// Structured source error consumed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transient, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message, true)
    }

    pub fn upstream_server(status: u16) -> Self {
        Self::new(
            SourceErrorKind::UpstreamServer,
            format!("upstream returned status {status}"),
            true,
        )
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::SchemaMismatch, message, false)
    }

    pub fn circuit_open(provider: ProviderId) -> Self {
        Self::new(
            SourceErrorKind::CircuitOpen,
            format!("circuit for '{provider}' is open; skipping upstream call"),
            true,
        )
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message, false)
    }

    pub fn unsupported_operation(provider: ProviderId, operation: Operation) -> Self {
        Self::new(
            SourceErrorKind::UnsupportedOperation,
            format!("operation '{operation}' is not supported by '{provider}'"),
            false,
        )
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Transient => "source.transient",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::UpstreamServer => "source.upstream_server",
            SourceErrorKind::SchemaMismatch => "source.schema_mismatch",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::UnsupportedOperation => "source.unsupported_operation",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-source contract used by the coordinator.
///
/// Implementations must be `Send + Sync`; the coordinator shares them across tasks.
/// The typed operation methods are provided on top of [`DataSource::fetch`].
pub trait DataSource: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    /// Fetch a resource, normalized to the common domain shape.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the operation is unsupported, the breaker is
    /// open, quota is exhausted, retries are spent or the payload does not parse.
    fn fetch<'a>(
        &'a self,
        resource: Resource,
        mode: CacheMode,
    ) -> SourceFuture<'a, Result<Payload, SourceError>>;

    /// Last cached value for a resource, even when expired.
    fn stale<'a>(&'a self, resource: Resource) -> SourceFuture<'a, Option<Payload>>;

    /// Lightweight health check against the provider.
    fn probe<'a>(&'a self) -> SourceFuture<'a, Result<(), SourceError>>;

    fn reference_data<'a>(
        &'a self,
        mode: CacheMode,
    ) -> SourceFuture<'a, Result<ReferenceData, SourceError>> {
        Box::pin(async move {
            match self.fetch(Resource::ReferenceData, mode).await? {
                Payload::ReferenceData(reference) => Ok(reference),
                other => Err(unexpected_payload(PayloadKind::ReferenceData, &other)),
            }
        })
    }

    fn fixtures<'a>(
        &'a self,
        round: Option<Round>,
        mode: CacheMode,
    ) -> SourceFuture<'a, Result<Vec<Fixture>, SourceError>> {
        Box::pin(async move {
            match self.fetch(Resource::Fixtures { round }, mode).await? {
                Payload::Fixtures(fixtures) => Ok(fixtures),
                other => Err(unexpected_payload(PayloadKind::Fixtures, &other)),
            }
        })
    }

    fn live_scores<'a>(
        &'a self,
        round: Round,
        mode: CacheMode,
    ) -> SourceFuture<'a, Result<LiveRound, SourceError>> {
        Box::pin(async move {
            match self.fetch(Resource::LiveScores { round }, mode).await? {
                Payload::LiveScores(live) => Ok(live),
                other => Err(unexpected_payload(PayloadKind::LiveScores, &other)),
            }
        })
    }

    fn teams<'a>(&'a self, mode: CacheMode) -> SourceFuture<'a, Result<Vec<Team>, SourceError>> {
        Box::pin(async move {
            match self.fetch(Resource::Teams, mode).await? {
                Payload::Teams(teams) => Ok(teams),
                other => Err(unexpected_payload(PayloadKind::Teams, &other)),
            }
        })
    }

    fn players<'a>(
        &'a self,
        mode: CacheMode,
    ) -> SourceFuture<'a, Result<Vec<Player>, SourceError>> {
        Box::pin(async move {
            match self.fetch(Resource::Players, mode).await? {
                Payload::Players(players) => Ok(players),
                other => Err(unexpected_payload(PayloadKind::Players, &other)),
            }
        })
    }
}

pub fn unexpected_payload(expected: PayloadKind, actual: &Payload) -> SourceError {
    SourceError::schema_mismatch(format!(
        "expected '{expected}' payload, found '{}'",
        actual.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_display_is_stable_cache_identity() {
        let round = Round::new(7).expect("valid round");

        assert_eq!(Resource::Fixtures { round: Some(round) }.to_string(), "fixtures:gw=7");
        assert_eq!(Resource::Fixtures { round: None }.to_string(), "fixtures:all");
        assert_eq!(Resource::LiveScores { round }.to_string(), "live:gw=7");
        assert_eq!(Resource::Players.to_string(), "players");
    }

    #[test]
    fn capability_set_filters_operations() {
        let capabilities = CapabilitySet {
            reference_data: false,
            ..CapabilitySet::full()
        };

        assert!(!capabilities.supports(Operation::ReferenceData));
        assert_eq!(
            capabilities.supported_operations(),
            vec![
                Operation::Fixtures,
                Operation::LiveScores,
                Operation::Teams,
                Operation::Players
            ]
        );
    }

    #[test]
    fn operation_parses_cli_spellings() {
        assert_eq!("live".parse::<Operation>(), Ok(Operation::LiveScores));
        assert_eq!("reference-data".parse::<Operation>(), Ok(Operation::ReferenceData));
        assert!("standings".parse::<Operation>().is_err());
    }

    #[test]
    fn source_error_codes_are_namespaced() {
        let error = SourceError::rate_limited("quota exhausted")
            .with_retry_after(Duration::from_secs(12));

        assert_eq!(error.code(), "source.rate_limited");
        assert_eq!(error.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(error.to_string(), "quota exhausted (source.rate_limited)");
    }
}
