//! Wire and domain types shared between the worker, the front door, and
//! the clustering engine.
//!
//! All timestamps are ISO-8601 UTC. `serde`'s `chrono` integration
//! serializes `DateTime<Utc>` as an RFC 3339 string by default, which is
//! what every external interface in this system expects on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The unit of work carried on the job stream.
///
/// `payload` is an opaque pass-through bag from the submitter (may carry
/// `reason`, `image_ids` hints, `coverage`, etc.) and is never interpreted
/// by the core pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub job_id: String,
    pub subject_id: String,
    #[serde(default = "default_payload")]
    pub payload: JsonValue,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

fn default_payload() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

impl JobEnvelope {
    /// Builds a fresh envelope for first enqueue, generating a `job_id`
    /// when the submitter did not supply one.
    #[must_use]
    pub fn new(job_id: Option<String>, subject_id: String, payload: JsonValue) -> Self {
        Self {
            job_id: job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            subject_id,
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Returns a copy of this envelope with `attempts` incremented, ready
    /// to republish to the main stream for a retry.
    #[must_use]
    pub fn with_incremented_attempts(&self) -> Self {
        Self {
            attempts: self.attempts + 1,
            ..self.clone()
        }
    }
}

/// A single image's insight record, as returned by the insights service.
///
/// Only `has_embedding` and `embedding` are consumed by this pipeline;
/// any other fields the upstream service includes are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightRecord {
    #[serde(default)]
    pub has_embedding: bool,
    #[serde(default)]
    pub embedding: Vec<f64>,
}

impl InsightRecord {
    /// An insight record is usable for clustering only if it claims to
    /// have an embedding and actually carries one.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.has_embedding && !self.embedding.is_empty()
    }
}

/// One member of a cluster, ranked by similarity to the cluster centroid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterMember {
    pub image_id: String,
    pub score: f64,
    pub position: u32,
    pub quality_score: f64,
}

/// A group of visually-similar images for one subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: String,
    pub label: String,
    pub hero_image_id: String,
    pub members: Vec<ClusterMember>,
    pub quality_score: f64,
}

/// Aggregate metrics attached to a persisted [`ClusterState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterMetrics {
    pub num_clusters: usize,
    pub num_images: usize,
    pub avg_quality: f64,
    pub processed_at: DateTime<Utc>,
}

/// The full clustering result for one subject, as persisted in the state
/// store and returned by the front door's read endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterState {
    pub subject_id: String,
    pub clusters: Vec<Cluster>,
    pub metrics: ClusterMetrics,
    pub updated_at: DateTime<Utc>,
}

impl ClusterState {
    /// `avg_quality` is the mean of per-cluster `quality_score`, or 0 if
    /// there are no clusters -- computed here so every call site gets the
    /// invariant for free instead of recomputing it by hand.
    #[must_use]
    pub fn mean_quality(clusters: &[Cluster]) -> f64 {
        if clusters.is_empty() {
            return 0.0;
        }
        clusters.iter().map(|c| c.quality_score).sum::<f64>() / clusters.len() as f64
    }
}

/// Selects the epsilon radius and label table used by the clustering
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringMode {
    /// Tighter radius, intended to split different individuals of the
    /// same species apart.
    Identity,
    /// Looser radius, intended to group poses of the same individual.
    Pose,
}

const IDENTITY_LABELS: [&str; 5] = ["Pet A", "Pet B", "Pet C", "Pet D", "Pet E"];
const POSE_LABELS: [&str; 5] = [
    "Portraits",
    "Action Shots",
    "Close-ups",
    "Outdoor Scenes",
    "Group Photos",
];

impl ClusteringMode {
    /// Labels a raw DBSCAN cluster label under this mode's table,
    /// falling back to a generated name once the fixed table is
    /// exhausted.
    ///
    /// Identity mode indexes the table directly by the raw label (falling
    /// back to a lettered name, e.g. `"Pet F"` for label `5`). Pose mode
    /// indexes by `raw_label % table.len()`, so its fallback name is
    /// unreachable in practice -- kept for parity with the table's
    /// documented shape.
    #[must_use]
    pub fn label_for(self, raw_label: i64) -> String {
        debug_assert!(raw_label >= 0, "noise points must be discarded before labeling");
        let idx = usize::try_from(raw_label).unwrap_or(0);
        match self {
            ClusteringMode::Identity => IDENTITY_LABELS.get(idx).map_or_else(
                || format!("Pet {}", (b'A' + (idx % 26) as u8) as char),
                |s| (*s).to_string(),
            ),
            ClusteringMode::Pose => POSE_LABELS[idx % POSE_LABELS.len()].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_quality() -> impl Strategy<Value = f64> {
        0.0f64..1.0
    }

    proptest! {
        #[test]
        fn job_envelope_round_trips_through_json(
            subject_id in "[a-z0-9-]{1,16}",
            attempts in 0u32..10,
        ) {
            let mut envelope = JobEnvelope::new(None, subject_id, serde_json::json!({"k": "v"}));
            envelope.attempts = attempts;

            let encoded = serde_json::to_string(&envelope).unwrap();
            let decoded: JobEnvelope = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(decoded, envelope);
        }

        #[test]
        fn cluster_state_round_trips_through_json(
            subject_id in "[a-z0-9-]{1,16}",
            quality in arb_quality(),
        ) {
            let cluster = Cluster {
                id: format!("{subject_id}-cluster-0"),
                label: "Pet A".to_string(),
                hero_image_id: "img-0".to_string(),
                members: Vec::new(),
                quality_score: quality,
            };
            let avg_quality = ClusterState::mean_quality(std::slice::from_ref(&cluster));
            let now = Utc::now();
            let state = ClusterState {
                subject_id: subject_id.clone(),
                metrics: ClusterMetrics {
                    num_clusters: 1,
                    num_images: 0,
                    avg_quality,
                    processed_at: now,
                },
                clusters: vec![cluster],
                updated_at: now,
            };

            let encoded = serde_json::to_string(&state).unwrap();
            let decoded: ClusterState = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(decoded, state);
        }

        #[test]
        fn mean_quality_stays_within_input_range(
            scores in prop::collection::vec(arb_quality(), 1..10),
        ) {
            let clusters: Vec<Cluster> = scores
                .iter()
                .map(|&quality_score| Cluster {
                    id: "c".to_string(),
                    label: "l".to_string(),
                    hero_image_id: "h".to_string(),
                    members: Vec::new(),
                    quality_score,
                })
                .collect();

            let mean = ClusterState::mean_quality(&clusters);
            let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(mean >= min - 1e-9 && mean <= max + 1e-9);
        }
    }

    #[test]
    fn mean_quality_of_empty_clusters_is_zero() {
        assert_eq!(ClusterState::mean_quality(&[]), 0.0);
    }
}
