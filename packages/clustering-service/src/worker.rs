//! The worker loop (C5): reads from the consumer group, decodes job
//! envelopes, orchestrates C3 -> C4 -> C2, acks, and on failure routes
//! through retry/dead-letter.
//!
//! Kept strictly sequential per consumer (no in-flight pipelining) per
//! the concurrency model: each job may run for minutes, and ordering and
//! ack bookkeeping would get harder for negligible gain.

use std::time::Instant;

use chrono::Utc;
use clustering_core::{cluster, Cluster, ClusterMetrics, ClusterParams, ClusterState, ClusteringMode, JobEnvelope};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::error::JobError;
use crate::insights_client::InsightUpdate;
use crate::stream::StreamEntry;
use crate::telemetry;

/// Runs the worker loop until the process is terminated.
///
/// # Errors
///
/// Returns an error only if `ensure_group` fails on startup; per-entry
/// failures are handled internally and never propagate out of the loop.
pub async fn run(ctx: AppContext) -> anyhow::Result<()> {
    ctx.stream.ensure_group().await?;
    info!(
        consumer_group = %ctx.config.consumer_group,
        consumer_name = %ctx.config.consumer_name,
        "worker loop started"
    );

    loop {
        let entries = match ctx
            .stream
            .read_group(ctx.config.read_count, ctx.config.read_timeout_ms)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "read_group failed, retrying");
                continue;
            }
        };

        for entry in entries {
            process_entry(&ctx, entry).await;
            refresh_stream_gauges(&ctx).await;
        }
    }
}

async fn refresh_stream_gauges(ctx: &AppContext) {
    let pending = ctx.stream.pending_summary().await;
    let idle_ms = ctx.stream.oldest_pending_idle_ms().await;
    telemetry::set_stream_gauges(pending.count, idle_ms as f64 / 1000.0);
}

async fn process_entry(ctx: &AppContext, entry: StreamEntry) {
    let start = Instant::now();

    let envelope = match decode_envelope(&entry) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(entry_id = %entry.id, error = %err, "invalid job payload, dropping");
            let _ = ctx.stream.ack(&entry.id).await;
            telemetry::record_result(telemetry::RESULT_INVALID);
            telemetry::record_latency(start.elapsed().as_secs_f64());
            return;
        }
    };

    info!(job_id = %envelope.job_id, subject_id = %envelope.subject_id, "processing cluster job");

    match handle_job(ctx, &envelope).await {
        Ok(Outcome::Success { num_clusters, num_images }) => {
            let _ = ctx.stream.ack(&entry.id).await;
            info!(
                job_id = %envelope.job_id,
                subject_id = %envelope.subject_id,
                num_clusters,
                num_images,
                "cluster state updated"
            );
            telemetry::record_result(telemetry::RESULT_SUCCESS);
        }
        Err(JobError::EmptyEmbeddings) => {
            let _ = ctx.stream.ack(&entry.id).await;
            telemetry::record_result(telemetry::RESULT_SKIPPED);
        }
        Err(err) => {
            telemetry::record_result(telemetry::RESULT_FAILURE);
            error!(
                job_id = %envelope.job_id,
                subject_id = %envelope.subject_id,
                error = %err,
                "cluster job failed"
            );
            route_failure(ctx, &entry.id, &envelope, err).await;
        }
    }

    telemetry::record_latency(start.elapsed().as_secs_f64());
}

/// Decodes a stream entry's payload into a `JobEnvelope`, collapsing the
/// missing-field and invalid-JSON cases into a single
/// [`JobError::MalformedEnvelope`].
fn decode_envelope(entry: &StreamEntry) -> Result<JobEnvelope, JobError> {
    let payload = entry
        .payload
        .as_deref()
        .ok_or_else(|| JobError::MalformedEnvelope("stream entry missing payload field".to_string()))?;

    serde_json::from_str(payload).map_err(|e| JobError::MalformedEnvelope(e.to_string()))
}

enum Outcome {
    Success { num_clusters: usize, num_images: usize },
}

/// The exactly-one-effect critical section for one job.
async fn handle_job(ctx: &AppContext, envelope: &JobEnvelope) -> Result<Outcome, JobError> {
    let image_ids = ctx
        .insights
        .list_images_with_embeddings(&envelope.subject_id)
        .await;

    if image_ids.is_empty() {
        warn!(subject_id = %envelope.subject_id, "no images with embeddings found for subject");
        return Err(JobError::EmptyEmbeddings);
    }

    let insights = ctx.insights.fetch_insights_batch(&image_ids).await;

    let mut valid_ids = Vec::new();
    let mut embeddings = Vec::new();
    for image_id in &image_ids {
        if let Some(record) = insights.get(image_id) {
            if record.is_usable() {
                valid_ids.push(image_id.clone());
                embeddings.push(record.embedding.clone());
            }
        }
    }

    if valid_ids.is_empty() {
        warn!(
            subject_id = %envelope.subject_id,
            total_images = image_ids.len(),
            "no usable embeddings for any image, acking as skipped"
        );
        return Err(JobError::EmptyEmbeddings);
    }

    let params = ClusterParams {
        eps: ctx.config.eps,
        identity_eps: ctx.config.identity_eps,
        min_samples: ctx.config.min_samples,
        max_cluster_size: ctx.config.max_cluster_size,
    };

    let engine_clusters = {
        let valid_ids = valid_ids.clone();
        let embeddings = embeddings.clone();
        tokio::task::spawn_blocking(move || {
            cluster(&valid_ids, &embeddings, ClusteringMode::Identity, params)
        })
        .await
        .map_err(|e| JobError::UpstreamUnavailable(format!("clustering task panicked: {e}")))??
    };

    let subject_id = &envelope.subject_id;
    let mut clusters = Vec::with_capacity(engine_clusters.len());
    let mut updates = Vec::new();

    for raw in engine_clusters {
        let qualified_id = format!("{subject_id}-{}", raw.id);

        for member in &raw.members {
            updates.push(InsightUpdate::new(
                member.image_id.clone(),
                qualified_id.clone(),
                raw.label.clone(),
                member.position,
                member.score,
                member.image_id == raw.hero_image_id,
            ));
        }

        clusters.push(Cluster {
            id: qualified_id,
            ..raw
        });
    }

    let avg_quality = ClusterState::mean_quality(&clusters);
    let now = Utc::now();
    let state = ClusterState {
        subject_id: subject_id.clone(),
        metrics: ClusterMetrics {
            num_clusters: clusters.len(),
            num_images: valid_ids.len(),
            avg_quality,
            processed_at: now,
        },
        clusters,
        updated_at: now,
    };

    let key = ctx.config.state_key(subject_id);
    let body = serde_json::to_string(&state)
        .map_err(|e| JobError::PersistFailure(format!("encode cluster state: {e}")))?;
    ctx.state_store
        .put_with_ttl(&key, &body, ctx.config.state_ttl_seconds)
        .await?;

    if !updates.is_empty() {
        ctx.insights.post_insights_batch(&updates).await;
        info!(subject_id = %subject_id, count = updates.len(), "updated insight quality scores");
    }

    Ok(Outcome::Success {
        num_clusters: state.metrics.num_clusters,
        num_images: state.metrics.num_images,
    })
}

/// Ack-then-republish failure routing: `attempts = envelope.attempts + 1`;
/// dead-letter if that meets `max_attempts`, else republish to the main
/// stream.
async fn route_failure(ctx: &AppContext, entry_id: &str, envelope: &JobEnvelope, err: JobError) {
    let retried = envelope.with_incremented_attempts();
    let attempts = retried.attempts;

    let _ = ctx.stream.ack(entry_id).await;

    if attempts >= ctx.config.max_attempts {
        error!(
            job_id = %envelope.job_id,
            subject_id = %envelope.subject_id,
            attempts,
            "job moved to dead-letter stream"
        );
        if let Err(e) = ctx.stream.dead_letter_publish(&retried, &err.to_string()).await {
            error!(error = %e, "failed to publish to dead-letter stream");
        }
        telemetry::record_result(telemetry::RESULT_DEAD_LETTER);
    } else {
        warn!(
            job_id = %envelope.job_id,
            subject_id = %envelope.subject_id,
            attempts,
            "retrying job"
        );
        if let Err(e) = ctx.stream.publish(&retried).await {
            error!(error = %e, "failed to republish job");
        }
        telemetry::record_result(telemetry::RESULT_RETRY);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use clap::Parser;
    use clustering_core::InsightRecord;

    use super::*;
    use crate::config::AppConfig;
    use crate::insights_client::InsightsProvider;
    use crate::stream::PendingSummary;

    #[derive(Default)]
    struct FakeStreamQueue {
        acked: Mutex<Vec<String>>,
        published: Mutex<Vec<JobEnvelope>>,
        dead_lettered: Mutex<Vec<(JobEnvelope, String)>>,
    }

    #[async_trait]
    impl crate::stream::StreamQueue for FakeStreamQueue {
        async fn ensure_group(&self) -> Result<(), JobError> {
            Ok(())
        }

        async fn publish(&self, envelope: &JobEnvelope) -> Result<(), JobError> {
            self.published.lock().unwrap().push(envelope.clone());
            Ok(())
        }

        async fn read_group(&self, _count: u64, _block_ms: u64) -> Result<Vec<StreamEntry>, JobError> {
            Ok(Vec::new())
        }

        async fn ack(&self, entry_id: &str) -> Result<(), JobError> {
            self.acked.lock().unwrap().push(entry_id.to_string());
            Ok(())
        }

        async fn dead_letter_publish(
            &self,
            envelope: &JobEnvelope,
            error: &str,
        ) -> Result<(), JobError> {
            self.dead_lettered
                .lock()
                .unwrap()
                .push((envelope.clone(), error.to_string()));
            Ok(())
        }

        async fn pending_summary(&self) -> PendingSummary {
            PendingSummary::default()
        }

        async fn oldest_pending_idle_ms(&self) -> u64 {
            0
        }
    }

    #[derive(Default)]
    struct FakeStateStore {
        data: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl crate::state_store::StateStore for FakeStateStore {
        async fn put_with_ttl(&self, key: &str, value: &str, _ttl_seconds: u64) -> Result<(), JobError> {
            self.data.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, JobError> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<bool, JobError> {
            Ok(self.data.lock().unwrap().remove(key).is_some())
        }
    }

    #[derive(Default)]
    struct FakeInsightsProvider {
        image_ids: Vec<String>,
        records: HashMap<String, InsightRecord>,
    }

    #[async_trait]
    impl InsightsProvider for FakeInsightsProvider {
        async fn list_images_with_embeddings(&self, _subject_id: &str) -> Vec<String> {
            self.image_ids.clone()
        }

        async fn fetch_insights_batch(
            &self,
            image_ids: &[String],
        ) -> HashMap<String, InsightRecord> {
            image_ids
                .iter()
                .filter_map(|id| self.records.get(id).cloned().map(|r| (id.clone(), r)))
                .collect()
        }

        async fn post_insights_batch(&self, _updates: &[crate::insights_client::InsightUpdate]) {}
    }

    fn normalized(v: Vec<f64>) -> Vec<f64> {
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    fn test_context(
        image_ids: Vec<String>,
        records: HashMap<String, InsightRecord>,
    ) -> (AppContext, std::sync::Arc<FakeStreamQueue>, std::sync::Arc<FakeStateStore>) {
        let config = AppConfig::parse_from(["cluster-worker"]);
        let stream = std::sync::Arc::new(FakeStreamQueue::default());
        let state_store = std::sync::Arc::new(FakeStateStore::default());
        let insights = std::sync::Arc::new(FakeInsightsProvider { image_ids, records });

        (
            AppContext {
                config: std::sync::Arc::new(config),
                stream: stream.clone(),
                state_store: state_store.clone(),
                insights,
            },
            stream,
            state_store,
        )
    }

    #[tokio::test]
    async fn empty_image_list_is_skipped() {
        let (ctx, _stream, _store) = test_context(Vec::new(), HashMap::new());
        let envelope = JobEnvelope::new(None, "pet-empty".to_string(), serde_json::json!({}));

        let err = handle_job(&ctx, &envelope).await.unwrap_err();
        assert!(matches!(err, JobError::EmptyEmbeddings));
    }

    #[tokio::test]
    async fn no_usable_embeddings_is_skipped() {
        let mut records = HashMap::new();
        records.insert(
            "img-1".to_string(),
            InsightRecord {
                has_embedding: false,
                embedding: Vec::new(),
            },
        );
        let (ctx, _stream, _store) =
            test_context(vec!["img-1".to_string()], records);
        let envelope = JobEnvelope::new(None, "pet-noembed".to_string(), serde_json::json!({}));

        let err = handle_job(&ctx, &envelope).await.unwrap_err();
        assert!(matches!(err, JobError::EmptyEmbeddings));
    }

    #[tokio::test]
    async fn process_entry_acks_and_skips_empty_embeddings_without_dead_letter() {
        let (ctx, stream, store) = test_context(Vec::new(), HashMap::new());
        let envelope = JobEnvelope::new(None, "pet-empty".to_string(), serde_json::json!({}));
        let entry = StreamEntry {
            id: "1-0".to_string(),
            payload: Some(serde_json::to_string(&envelope).unwrap()),
        };

        process_entry(&ctx, entry).await;

        assert_eq!(*stream.acked.lock().unwrap(), vec!["1-0".to_string()]);
        assert!(stream.dead_lettered.lock().unwrap().is_empty());
        assert!(stream.published.lock().unwrap().is_empty());
        assert!(store.data.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn happy_path_persists_cluster_state() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let vectors = vec![
            normalized(vec![1.0, 0.0, 0.0]),
            normalized(vec![0.98, 0.2, 0.0]),
            normalized(vec![0.99, 0.1, 0.0]),
            normalized(vec![0.0, 1.0, 0.0]),
        ];
        let mut records = HashMap::new();
        for (id, embedding) in ids.iter().zip(vectors) {
            records.insert(
                id.clone(),
                InsightRecord {
                    has_embedding: true,
                    embedding,
                },
            );
        }

        let (ctx, _stream, store) = test_context(ids, records);
        let envelope = JobEnvelope::new(None, "pet-xyz".to_string(), serde_json::json!({}));

        let outcome = handle_job(&ctx, &envelope).await.unwrap();
        let Outcome::Success { num_clusters, num_images } = outcome;
        assert_eq!(num_clusters, 1);
        assert_eq!(num_images, 4);

        let key = ctx.config.state_key("pet-xyz");
        let stored = store.data.lock().unwrap().get(&key).cloned();
        assert!(stored.is_some());
        let state: ClusterState = serde_json::from_str(&stored.unwrap()).unwrap();
        assert_eq!(state.subject_id, "pet-xyz");
        assert_eq!(state.clusters.len(), 1);
        assert_eq!(state.clusters[0].id, "pet-xyz-cluster-0");
    }

    #[tokio::test]
    async fn retry_then_dead_letter_after_max_attempts() {
        let (ctx, stream, _store) = test_context(Vec::new(), HashMap::new());
        let mut envelope = JobEnvelope::new(None, "pet-retry".to_string(), serde_json::json!({}));
        envelope.attempts = 4; // max_attempts defaults to 5

        route_failure(&ctx, "1-0", &envelope, JobError::UpstreamUnavailable("boom".into())).await;

        assert_eq!(stream.acked.lock().unwrap().len(), 1);
        assert_eq!(stream.published.lock().unwrap().len(), 0);
        let dead = stream.dead_lettered.lock().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.attempts, 5);
        assert!(dead[0].1.contains("boom"));
    }

    #[tokio::test]
    async fn retry_republishes_below_max_attempts() {
        let (ctx, stream, _store) = test_context(Vec::new(), HashMap::new());
        let mut envelope = JobEnvelope::new(None, "pet-retry".to_string(), serde_json::json!({}));
        envelope.attempts = 1;

        route_failure(&ctx, "1-0", &envelope, JobError::UpstreamUnavailable("boom".into())).await;

        assert_eq!(stream.acked.lock().unwrap().len(), 1);
        let published = stream.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].attempts, 2);
        assert_eq!(stream.dead_lettered.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn process_entry_acks_and_drops_invalid_json_payload() {
        let (ctx, stream, store) = test_context(Vec::new(), HashMap::new());
        let entry = StreamEntry {
            id: "1-0".to_string(),
            payload: Some("not json".to_string()),
        };

        process_entry(&ctx, entry).await;

        assert_eq!(*stream.acked.lock().unwrap(), vec!["1-0".to_string()]);
        assert!(stream.dead_lettered.lock().unwrap().is_empty());
        assert!(stream.published.lock().unwrap().is_empty());
        assert!(store.data.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn process_entry_acks_and_drops_missing_payload() {
        let (ctx, stream, store) = test_context(Vec::new(), HashMap::new());
        let entry = StreamEntry {
            id: "1-0".to_string(),
            payload: None,
        };

        process_entry(&ctx, entry).await;

        assert_eq!(*stream.acked.lock().unwrap(), vec!["1-0".to_string()]);
        assert!(stream.dead_lettered.lock().unwrap().is_empty());
        assert!(stream.published.lock().unwrap().is_empty());
        assert!(store.data.lock().unwrap().is_empty());
    }
}
