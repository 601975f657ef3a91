use std::fmt::{Display, Formatter};

use matchday_core::{CacheMode, FeedError, ProviderId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SCHEMA_VERSION: &str = "v1";

/// Request identifier (UUID v4) for correlating output with stderr logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Envelope metadata. Field order is fixed so output diffs stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub request_id: RequestId,
    pub schema_version: &'static str,
    pub command: &'static str,
    pub cache_mode: &'static str,
    /// Provider that served the data; `None` for local-only commands or failures.
    pub served_by: Option<ProviderId>,
    pub stale: bool,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Metadata {
    pub fn new(command: &'static str, cache_mode: CacheMode) -> Self {
        Self {
            request_id: RequestId::new_v4(),
            schema_version: SCHEMA_VERSION,
            command,
            cache_mode: cache_mode_name(cache_mode),
            served_by: None,
            stale: false,
            latency_ms: 0,
            warnings: Vec::new(),
        }
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

const fn cache_mode_name(mode: CacheMode) -> &'static str {
    match mode {
        CacheMode::Use => "use",
        CacheMode::Refresh => "refresh",
        CacheMode::Bypass => "bypass",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl EnvelopeError {
    pub fn from_feed(error: &FeedError) -> Self {
        let details = match error {
            FeedError::SourcesExhausted { attempts, .. } => serde_json::to_value(attempts).ok(),
            _ => None,
        };
        Self {
            code: error.code(),
            message: error.to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub meta: Metadata,
    pub data: Value,
    pub errors: Vec<EnvelopeError>,
}

#[cfg(test)]
mod tests {
    use matchday_core::{Operation, SourceAttempt, SourceError};

    use super::*;

    #[test]
    fn request_id_is_uuid_v4() {
        let request_id = RequestId::new_v4();
        assert_eq!(request_id.0.get_version_num(), 4);
    }

    #[test]
    fn exhausted_error_carries_attempts() {
        let error = FeedError::SourcesExhausted {
            operation: Operation::Fixtures,
            attempts: vec![SourceAttempt::from_error(
                ProviderId::FootballData,
                &SourceError::upstream_server(503),
            )],
        };

        let rendered = EnvelopeError::from_feed(&error);
        assert_eq!(rendered.code, "feed.sources_exhausted");
        let details = rendered.details.expect("attempt details");
        assert_eq!(details[0]["provider"], "football_data");
        assert_eq!(details[0]["code"], "source.upstream_server");
    }

    #[test]
    fn metadata_serializes_in_fixed_order() {
        let metadata = Metadata::new("teams", CacheMode::Refresh);
        let rendered = serde_json::to_string(&metadata).expect("serializes");

        let request_id = rendered.find("request_id").expect("request_id");
        let served_by = rendered.find("served_by").expect("served_by");
        assert!(request_id < served_by);
        assert!(rendered.contains("\"cache_mode\":\"refresh\""));
        assert!(!rendered.contains("warnings"));
    }
}
