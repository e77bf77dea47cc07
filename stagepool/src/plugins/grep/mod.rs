//! Grep plugins: passive checks over captured HTTP transactions.
//!
//! A grep stage receives every request/response pair the rest of a scan
//! produces and runs each enabled plugin over it. Plugins never issue
//! requests of their own; they only look at what already went over the wire.

mod http_auth_detect;

pub use http_auth_detect::HttpAuthDetect;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::StageConfig;
use crate::errors::StageError;
use crate::stage::{CapabilityRef, Stage};
use crate::status::InMemoryStatus;

/// The phase name grep stages report failures under.
pub const GREP_PHASE: &str = "grep";

/// A captured request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransaction {
    /// Response identifier, referenced by findings.
    pub id: u64,
    /// Request method.
    pub method: String,
    /// The requested URL.
    pub url: String,
    /// The URI the response was served from (after redirects).
    pub uri: String,
    /// Response status code.
    pub status_code: u16,
    /// Response headers as received.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Response body.
    #[serde(default)]
    pub body: String,
}

impl HttpTransaction {
    /// Creates a transaction whose response URI is the request URL.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, url: impl Into<String>, status_code: u16) -> Self {
        let url = url.into();
        Self {
            id,
            method: method.into(),
            uri: url.clone(),
            url,
            status_code,
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// Sets the response URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Adds a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Credentials embedded in a URL.
    UserPassUri,
    /// A resource answering 401 with a `www-authenticate` challenge.
    Auth,
    /// A resource answering 401 without a challenge.
    NonRfcAuth,
}

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth knowing.
    Info,
    /// Exposed secret.
    High,
}

/// One thing a grep plugin noticed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Which check produced it.
    pub kind: FindingKind,
    /// Severity.
    pub severity: Severity,
    /// Short title.
    pub name: String,
    /// The URL the finding is about.
    pub url: String,
    /// Human-readable description.
    pub description: String,
    /// The exact text that triggered the finding.
    pub highlight: Option<String>,
    /// The response the finding came from.
    pub response_id: u64,
}

/// Capability type run by a grep stage.
pub type GrepCapability = CapabilityRef<HttpTransaction, Vec<Finding>>;

/// Builds a grep stage running `capabilities` over every transaction.
///
/// The stage gets an [`InMemoryStatus`] with every capability enabled, so
/// failure reports list the full plugin set.
pub fn grep_stage(
    capabilities: Vec<GrepCapability>,
    config: StageConfig,
) -> Result<Stage<HttpTransaction, Vec<Finding>>, StageError> {
    let status = Arc::new(InMemoryStatus::from_capabilities(capabilities.as_slice()));
    Stage::builder("grep_stage")
        .phase(GREP_PHASE)
        .capabilities(capabilities)
        .status(status)
        .config(config)
        .build()
}

/// Builds a grep stage with every plugin this module ships.
pub fn default_grep_stage(config: StageConfig) -> Result<Stage<HttpTransaction, Vec<Finding>>, StageError> {
    let auth: GrepCapability = Arc::new(HttpAuthDetect::new()?);
    grep_stage(vec![auth], config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_single_trailing_sentinel, drain_until_sentinel};
    use std::time::Duration;

    #[test]
    fn test_header_lookup_ignores_case() {
        let tx = HttpTransaction::new(1, "GET", "http://example.test/", 401)
            .with_header("WWW-Authenticate", "Basic realm=\"x\"");
        assert_eq!(tx.header("www-authenticate"), Some("Basic realm=\"x\""));
        assert_eq!(tx.header("content-type"), None);
        assert_eq!(tx.uri, tx.url);
    }

    #[test]
    fn test_finding_serialization() {
        let finding = Finding {
            kind: FindingKind::NonRfcAuth,
            severity: Severity::Info,
            name: "n".to_string(),
            url: "http://example.test/".to_string(),
            description: "d".to_string(),
            highlight: None,
            response_id: 3,
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["kind"], "non_rfc_auth");
        assert_eq!(json["severity"], "info");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_default_grep_stage() {
        let stage = default_grep_stage(StageConfig::new().with_pool_size(2)).unwrap();
        assert_eq!(stage.phase(), GREP_PHASE);

        stage.start().unwrap();
        stage.put(HttpTransaction::new(1, "GET", "http://example.test/", 200));
        stage.put(HttpTransaction::new(2, "GET", "http://example.test/admin", 401));
        stage.join_drained().await.unwrap();

        let messages = drain_until_sentinel(&stage, Duration::from_millis(50), 100)
            .await
            .unwrap();
        assert_eq!(messages.len(), 3);
        assert_single_trailing_sentinel(&messages);

        let findings: Vec<&Finding> = messages
            .iter()
            .filter_map(|m| m.as_result())
            .flat_map(|r| r.value.iter())
            .collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::NonRfcAuth);
        assert_eq!(findings[0].response_id, 2);
    }
}
