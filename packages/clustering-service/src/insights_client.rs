//! HTTP client for the external insights service (C3).
//!
//! Base URL normalization ensures the `/internal` path segment appears
//! exactly once before per-route paths, mirroring the upstream
//! `StorageClient`'s `_ensure_internal_base`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use clustering_core::InsightRecord;
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, warn};

const PROCESSOR_VERSION: &str = "v1.0.0";

/// One enriched quality-metadata update posted back after clustering.
#[derive(Debug, Clone, Serialize)]
pub struct InsightUpdate {
    pub source_image_id: String,
    pub quality_score: f64,
    pub processor_version: String,
    pub tags: InsightTags,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsightTags {
    pub cluster: ClusterTag,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterTag {
    pub id: String,
    pub label: String,
    pub position: u32,
    pub score: f64,
    pub is_hero: bool,
}

impl InsightUpdate {
    #[must_use]
    pub fn new(
        source_image_id: String,
        cluster_id: String,
        label: String,
        position: u32,
        score: f64,
        is_hero: bool,
    ) -> Self {
        Self {
            source_image_id,
            quality_score: score,
            processor_version: PROCESSOR_VERSION.to_string(),
            tags: InsightTags {
                cluster: ClusterTag {
                    id: cluster_id,
                    label,
                    position,
                    score,
                    is_hero,
                },
            },
        }
    }
}

#[derive(serde::Deserialize)]
struct ImagesWithEmbeddingsResponse {
    #[serde(default)]
    image_ids: Vec<serde_json::Value>,
}

/// Operations the worker needs from the insights service.
///
/// Implemented against the real HTTP API by [`InsightsClient`]; kept as
/// a trait so the worker's handler logic can be exercised against a
/// fake in tests.
#[async_trait]
pub trait InsightsProvider: Send + Sync {
    /// Returns the full set of subject image ids known to have
    /// embeddings. Never fails: on any HTTP error, logs and returns an
    /// empty list.
    async fn list_images_with_embeddings(&self, subject_id: &str) -> Vec<String>;

    /// Fetches one insight record per id, concurrently. Missing or
    /// failed entries are omitted from the result.
    async fn fetch_insights_batch(&self, image_ids: &[String]) -> HashMap<String, InsightRecord>;

    /// Posts each update concurrently. Individual failures are logged
    /// and swallowed -- partial success is acceptable.
    async fn post_insights_batch(&self, updates: &[InsightUpdate]);
}

/// HTTP client against the insights service.
pub struct InsightsClient {
    http: reqwest::Client,
    internal_base_url: String,
    token: String,
}

impl InsightsClient {
    /// Builds a client with a `timeout`-second total request timeout.
    ///
    /// # Panics
    ///
    /// Panics if the underlying `reqwest` client fails to build, which
    /// only happens for misconfigured TLS backends.
    #[must_use]
    pub fn new(base_url: &str, token: String, timeout_seconds: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("reqwest client configuration is static and always valid");
        Self {
            http,
            internal_base_url: Self::ensure_internal_base(base_url),
            token,
        }
    }

    /// Ensures `base_url` ends in exactly one `/internal` segment.
    fn ensure_internal_base(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/internal") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/internal")
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.internal_base_url, path.trim_start_matches('/'))
    }

    async fn fetch_one_insight(&self, image_id: &str) -> Option<(String, InsightRecord)> {
        let url = self.url(&format!("insights/{image_id}"));
        let result = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(%image_id, error = %e, "failed to fetch insight");
                return None;
            }
        };

        match response.json::<InsightRecord>().await {
            Ok(record) => Some((image_id.to_string(), record)),
            Err(e) => {
                warn!(%image_id, error = %e, "failed to decode insight record");
                None
            }
        }
    }

    async fn post_one_insight(&self, update: &InsightUpdate) {
        let url = self.url("insights");
        let result = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(update)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(e) = result {
            warn!(
                source_image_id = %update.source_image_id,
                error = %e,
                "failed to post insight update"
            );
        }
    }
}

#[async_trait]
impl InsightsProvider for InsightsClient {
    async fn list_images_with_embeddings(&self, subject_id: &str) -> Vec<String> {
        self.list_images_with_embeddings_impl(subject_id).await
    }

    async fn fetch_insights_batch(&self, image_ids: &[String]) -> HashMap<String, InsightRecord> {
        let fetches = image_ids.iter().map(|id| self.fetch_one_insight(id));
        let results = join_all(fetches).await;
        results.into_iter().flatten().collect()
    }

    async fn post_insights_batch(&self, updates: &[InsightUpdate]) {
        let posts = updates.iter().map(|update| self.post_one_insight(update));
        join_all(posts).await;
    }
}

impl InsightsClient {
    async fn list_images_with_embeddings_impl(&self, subject_id: &str) -> Vec<String> {
        let url = self.url(&format!("pets/{subject_id}/images-with-embeddings"));
        let result = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(%subject_id, error = %e, "failed to fetch images with embeddings");
                return Vec::new();
            }
        };

        match response.json::<ImagesWithEmbeddingsResponse>().await {
            Ok(body) => body.image_ids.iter().map(json_value_to_id_string).collect(),
            Err(e) => {
                error!(%subject_id, error = %e, "failed to decode images-with-embeddings response");
                Vec::new()
            }
        }
    }
}

fn json_value_to_id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_internal_base_appends_once() {
        assert_eq!(
            InsightsClient::ensure_internal_base("http://host:8000"),
            "http://host:8000/internal"
        );
    }

    #[test]
    fn ensure_internal_base_is_idempotent() {
        assert_eq!(
            InsightsClient::ensure_internal_base("http://host:8000/internal"),
            "http://host:8000/internal"
        );
        assert_eq!(
            InsightsClient::ensure_internal_base("http://host:8000/internal/"),
            "http://host:8000/internal"
        );
    }

    #[test]
    fn json_value_to_id_string_unwraps_plain_strings() {
        assert_eq!(
            json_value_to_id_string(&serde_json::json!("abc")),
            "abc"
        );
        assert_eq!(json_value_to_id_string(&serde_json::json!(42)), "42");
    }
}
