//! Test fixtures for fleet integration tests.

use axum::body::Body;
use axum::http::{Request, Response};
use halyard_fleet::{DomainMap, ProgramEntry, ProgramState, ProgramType};
use std::time::Duration;
use uuid::Uuid;

/// Builder for creating test ProgramEntry instances.
pub struct ProgramBuilder {
    entry: ProgramEntry,
}

impl ProgramBuilder {
    /// Creates an active, signed routine written in tengo.
    pub fn new(name: &str) -> Self {
        Self {
            entry: ProgramEntry {
                domain: String::new(),
                id: Uuid::new_v4(),
                name: name.to_string(),
                program_type: ProgramType::Routine,
                state: ProgramState::Active,
                language: "tengo".to_string(),
                schedule: "@every 1m".to_string(),
                deadline: Duration::from_secs(30),
                revision: Some(1),
            },
        }
    }

    /// Sets the program's language.
    pub fn with_language(mut self, language: &str) -> Self {
        self.entry.language = language.to_string();
        self
    }

    /// Sets the program's state.
    pub fn with_state(mut self, state: ProgramState) -> Self {
        self.entry.state = state;
        self
    }

    /// Marks the program as having no signed revision.
    pub fn unsigned(mut self) -> Self {
        self.entry.revision = None;
        self
    }

    /// Builds the ProgramEntry.
    pub fn build(self) -> ProgramEntry {
        self.entry
    }
}

/// Builds a domain mapping from `(domain, uri)` pairs.
pub fn domain_map(pairs: &[(&str, &str)]) -> DomainMap {
    pairs
        .iter()
        .map(|(domain, uri)| ((*domain).to_string(), (*uri).to_string()))
        .collect()
}

/// Builds a JSON request.
pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Builds a bodyless request.
pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Reads a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Reads a response body as text.
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
