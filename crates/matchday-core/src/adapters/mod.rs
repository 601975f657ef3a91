//! Provider request builders and payload normalizers.
//!
//! A [`ProviderApi`] knows how to address one upstream and how to map its JSON
//! into the common domain shape. It performs no I/O; the source adapter owns
//! transport, caching and resilience.

pub mod football_data;
pub mod fpl;

use serde::de::DeserializeOwned;

pub use football_data::FootballDataApi;
pub use fpl::FplApi;

use crate::data_source::{CapabilitySet, Resource, SourceError};
use crate::http_client::HttpRequest;
use crate::{Payload, ProviderId, ValidationError};

pub trait ProviderApi: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    /// Build the upstream request for a resource.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` when the provider cannot serve the resource.
    fn request_for(&self, resource: &Resource) -> Result<HttpRequest, SourceError>;

    /// Map a successful response body into the domain payload for `resource`.
    ///
    /// # Errors
    ///
    /// `SchemaMismatch` when the body is not the expected shape or a required
    /// field cannot be mapped.
    fn normalize(&self, resource: &Resource, body: &str) -> Result<Payload, SourceError>;

    /// Resources normalized from the same upstream document as `resource`,
    /// itself included. Every member of a document returns the same list, so
    /// its first element identifies the document.
    fn document_of(&self, resource: &Resource) -> Vec<Resource> {
        vec![*resource]
    }

    /// Resource whose payload must be passed to [`ProviderApi::observe`]
    /// before `resource` can be normalized.
    fn depends_on(&self, _resource: &Resource) -> Option<Resource> {
        None
    }

    /// Learn lookup tables from a payload, whether it was fetched or cached.
    fn observe(&self, _payload: &Payload) {}

    /// Cheap request used by the periodic health check.
    fn probe_request(&self) -> HttpRequest;
}

fn parse_body<T: DeserializeOwned>(provider: ProviderId, body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|error| {
        SourceError::schema_mismatch(format!("{provider} payload did not parse: {error}"))
    })
}

fn validation_to_error(provider: ProviderId, error: ValidationError) -> SourceError {
    SourceError::schema_mismatch(format!("{provider} payload failed validation: {error}"))
}

fn required<T>(provider: ProviderId, field: &str, value: Option<T>) -> Result<T, SourceError> {
    value.ok_or_else(|| {
        SourceError::schema_mismatch(format!("{provider} payload is missing required field '{field}'"))
    })
}

fn trim_base_url(base_url: impl Into<String>) -> String {
    let mut base_url = base_url.into();
    while base_url.ends_with('/') {
        base_url.pop();
    }
    base_url
}
