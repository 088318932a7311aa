//! Density-based clustering of subject image embeddings.
//!
//! Pure, synchronous, and free of I/O: given parallel arrays of image ids
//! and unit-norm embedding vectors, [`cluster`] produces ordered,
//! size-capped clusters with a hero image and per-member similarity
//! score. Everything here is double-precision arithmetic; there is no
//! clamping of scores, and callers must not depend on the order of the
//! returned `Vec<Cluster>`.

use crate::error::EngineError;
use crate::model::{Cluster, ClusterMember, ClusteringMode};

/// Tunable parameters for [`cluster`].
#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    /// Cosine-distance radius used in [`ClusteringMode::Pose`].
    pub eps: f64,
    /// Cosine-distance radius used in [`ClusteringMode::Identity`].
    pub identity_eps: f64,
    /// Minimum neighborhood size (including the point itself) to seed a
    /// cluster.
    pub min_samples: usize,
    /// Maximum number of members retained per cluster after ranking.
    pub max_cluster_size: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            eps: 0.3,
            identity_eps: 0.15,
            min_samples: 2,
            max_cluster_size: 24,
        }
    }
}

/// Clusters `image_ids` by the cosine similarity of their paired
/// `embeddings`.
///
/// # Preconditions
///
/// `image_ids.len() == embeddings.len()`; violating this is a programmer
/// error and returns [`EngineError::InvalidInput`] rather than panicking.
///
/// # Behavior
///
/// 1. If `image_ids.len() < params.min_samples`, returns an empty list --
///    this is not an error, there simply isn't enough data to form a
///    cluster.
/// 2. Computes the full cosine-distance matrix (`1 - u·v`).
/// 3. Runs DBSCAN over the precomputed distances with
///    `eps = params.identity_eps` under [`ClusteringMode::Identity`], or
///    `params.eps` under [`ClusteringMode::Pose`]. Noise points (no dense
///    enough neighborhood) are discarded.
/// 4. For each surviving cluster: the centroid is the mean of member
///    vectors renormalized to unit length; each member is scored as its
///    dot product with that centroid; members are ranked by descending
///    score (ties broken by ascending original index, i.e. input order is
///    stable); the ranked list is truncated to `max_cluster_size`; the
///    first member becomes the hero; the cluster's `quality_score` is the
///    mean of the retained scores.
///
/// The returned `Cluster::id` is `"cluster-{raw_label}"` -- callers that
/// need a subject-qualified id (`"{subject_id}-cluster-{raw_label}"`)
/// prefix it themselves, since this function has no notion of subject.
pub fn cluster(
    image_ids: &[String],
    embeddings: &[Vec<f64>],
    mode: ClusteringMode,
    params: ClusterParams,
) -> Result<Vec<Cluster>, EngineError> {
    if image_ids.len() != embeddings.len() {
        return Err(EngineError::InvalidInput(image_ids.len(), embeddings.len()));
    }

    let n = image_ids.len();
    if n < params.min_samples {
        return Ok(Vec::new());
    }

    let eps = match mode {
        ClusteringMode::Identity => params.identity_eps,
        ClusteringMode::Pose => params.eps,
    };

    let distances = cosine_distance_matrix(embeddings);
    let labels = dbscan(&distances, eps, params.min_samples);

    let mut raw_labels: Vec<i64> = labels.iter().copied().filter(|&l| l >= 0).collect();
    raw_labels.sort_unstable();
    raw_labels.dedup();

    let clusters = raw_labels
        .into_iter()
        .map(|raw_label| build_cluster(raw_label, &labels, image_ids, embeddings, mode, params))
        .collect();

    Ok(clusters)
}

/// Assembles one [`Cluster`] from the members DBSCAN assigned to
/// `raw_label`.
fn build_cluster(
    raw_label: i64,
    labels: &[i64],
    image_ids: &[String],
    embeddings: &[Vec<f64>],
    mode: ClusteringMode,
    params: ClusterParams,
) -> Cluster {
    let member_indices: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter_map(|(i, &l)| (l == raw_label).then_some(i))
        .collect();

    let dim = embeddings[member_indices[0]].len();
    let mut centroid = vec![0.0_f64; dim];
    for &i in &member_indices {
        for (c, v) in centroid.iter_mut().zip(embeddings[i].iter()) {
            *c += v;
        }
    }
    let count = member_indices.len() as f64;
    for c in &mut centroid {
        *c /= count;
    }
    normalize(&mut centroid);

    let mut scored: Vec<(usize, f64)> = member_indices
        .iter()
        .map(|&i| (i, dot(&embeddings[i], &centroid)))
        .collect();

    // Rank by descending score; ties broken by ascending original index
    // (stable input order), matching the input array's iteration order.
    scored.sort_by(|(ia, sa), (ib, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| ia.cmp(ib))
    });
    scored.truncate(params.max_cluster_size);

    let members: Vec<ClusterMember> = scored
        .iter()
        .enumerate()
        .map(|(position, &(idx, score))| ClusterMember {
            image_id: image_ids[idx].clone(),
            score,
            position: position as u32,
            quality_score: score,
        })
        .collect();

    let quality_score = members.iter().map(|m| m.score).sum::<f64>() / members.len() as f64;
    let hero_image_id = members[0].image_id.clone();

    Cluster {
        id: format!("cluster-{raw_label}"),
        label: mode.label_for(raw_label),
        hero_image_id,
        members,
        quality_score,
    }
}

/// Full N×N cosine-distance matrix, `distance[i][j] = 1 - embeddings[i]·embeddings[j]`.
fn cosine_distance_matrix(embeddings: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = embeddings.len();
    let mut distances = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = 1.0 - dot(&embeddings[i], &embeddings[j]);
            distances[i][j] = d;
            distances[j][i] = d;
        }
    }
    distances
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn normalize(v: &mut [f64]) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// DBSCAN over a precomputed distance matrix.
///
/// Returns one label per point: a non-negative cluster id, or `-1` for
/// noise. `min_samples` counts the point itself, matching scikit-learn's
/// `DBSCAN` convention (a point with `min_samples - 1` neighbors plus
/// itself forms a core point).
fn dbscan(distances: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<i64> {
    let n = distances.len();
    let mut labels = vec![-1_i64; n];
    let mut visited = vec![false; n];
    let mut next_label = 0_i64;

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n).filter(|&j| distances[i][j] <= eps).collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let mut seeds = neighbors(i);
        if seeds.len() < min_samples {
            continue; // stays noise (-1) unless later claimed as a border point
        }

        labels[i] = next_label;
        let mut queue = seeds.clone();
        let mut qi = 0;
        while qi < queue.len() {
            let j = queue[qi];
            qi += 1;

            if !visited[j] {
                visited[j] = true;
                let j_neighbors = neighbors(j);
                if j_neighbors.len() >= min_samples {
                    for &k in &j_neighbors {
                        if !queue.contains(&k) {
                            queue.push(k);
                        }
                    }
                }
            }

            if labels[j] == -1 {
                labels[j] = next_label;
            }
        }

        seeds.clear();
        next_label += 1;
    }

    labels
}
