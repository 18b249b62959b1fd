//! Affinity clustering over the catalog's nutrition vectors.
//!
//! Min-max scaled k-means with a fixed seed, so repeated runs over the
//! same catalog produce the same grouping. The assignment is returned to
//! the caller instead of being written into the shared catalog, which
//! keeps concurrent requests from stepping on each other.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::warn;

use crate::catalog::{Catalog, Nutrient};

const KMEANS_SEED: u64 = 0;
const MAX_ITERATIONS: usize = 300;

/// Cluster id -> indices into the catalog's record slice. Every record
/// appears in exactly one cluster.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    clusters: Vec<Vec<usize>>,
}

impl ClusterAssignment {
    fn single(record_count: usize) -> Self {
        ClusterAssignment {
            clusters: vec![(0..record_count).collect()],
        }
    }

    pub fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Id of the most populated cluster; ties resolve to the lowest id.
    pub fn largest(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (id, members) in self.clusters.iter().enumerate() {
            if best.map_or(true, |(_, size)| members.len() > size) {
                best = Some((id, members.len()));
            }
        }
        best.map(|(id, _)| id)
    }
}

/// Partitions the catalog into `k` groups over the given nutrient
/// features. Degenerate inputs (no features, fewer than 2 rows, `k`
/// larger than the row count) degrade instead of failing.
pub fn cluster_catalog(catalog: &Catalog, features: &[Nutrient], k: usize) -> ClusterAssignment {
    let row_count = catalog.len();
    if features.is_empty() || row_count < 2 {
        return ClusterAssignment::single(row_count);
    }

    let mut k = k.max(1);
    if k > row_count {
        warn!(requested = k, rows = row_count, "cluster count exceeds rows, clamping");
        k = row_count;
    }
    if k < 2 {
        return ClusterAssignment::single(row_count);
    }

    let rows = scaled_feature_matrix(catalog, features);
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut centroids = seed_centroids(&rows, k, &mut rng);
    let mut labels = assign(&rows, &centroids);

    for _ in 0..MAX_ITERATIONS {
        update_centroids(&rows, &labels, &mut centroids);
        let next = assign(&rows, &centroids);
        if next == labels {
            break;
        }
        labels = next;
    }

    let mut clusters = vec![Vec::new(); k];
    for (index, &label) in labels.iter().enumerate() {
        clusters[label].push(index);
    }
    ClusterAssignment { clusters }
}

/// Feature rows scaled to [0, 1] per nutrient, so milligram-scale columns
/// do not dominate the distance metric.
fn scaled_feature_matrix(catalog: &Catalog, features: &[Nutrient]) -> Vec<Vec<f32>> {
    let mut rows: Vec<Vec<f32>> = catalog
        .records()
        .iter()
        .map(|record| features.iter().map(|&f| record.nutrient(f)).collect())
        .collect();

    for col in 0..features.len() {
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for row in &rows {
            lo = lo.min(row[col]);
            hi = hi.max(row[col]);
        }
        let span = hi - lo;
        for row in &mut rows {
            row[col] = if span > 0.0 { (row[col] - lo) / span } else { 0.0 };
        }
    }
    rows
}

/// k-means++ style seeding: later centroids are drawn weighted by squared
/// distance to the nearest already chosen one.
fn seed_centroids(rows: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let first = rng.gen_range(0..rows.len());
    centroids.push(rows[first].clone());

    while centroids.len() < k {
        let weights: Vec<f32> = rows
            .iter()
            .map(|row| {
                centroids
                    .iter()
                    .map(|c| squared_distance(row, c))
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();
        let index = match WeightedIndex::new(&weights) {
            Ok(distribution) => distribution.sample(rng),
            // All remaining rows coincide with an existing centroid.
            Err(_) => rng.gen_range(0..rows.len()),
        };
        centroids.push(rows[index].clone());
    }
    centroids
}

fn assign(rows: &[Vec<f32>], centroids: &[Vec<f32>]) -> Vec<usize> {
    rows.par_iter()
        .map(|row| nearest_centroid(row, centroids))
        .collect()
}

fn nearest_centroid(row: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (id, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(row, centroid);
        if distance < best_distance {
            best = id;
            best_distance = distance;
        }
    }
    best
}

/// Empty clusters keep their previous centroid.
fn update_centroids(rows: &[Vec<f32>], labels: &[usize], centroids: &mut [Vec<f32>]) {
    let dims = centroids[0].len();
    let mut sums = vec![vec![0.0f32; dims]; centroids.len()];
    let mut counts = vec![0usize; centroids.len()];

    for (row, &label) in rows.iter().zip(labels) {
        counts[label] += 1;
        for (dim, value) in row.iter().enumerate() {
            sums[label][dim] += value;
        }
    }
    for (id, centroid) in centroids.iter_mut().enumerate() {
        if counts[id] > 0 {
            for dim in 0..dims {
                centroid[dim] = sums[id][dim] / counts[id] as f32;
            }
        }
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{normalize_name, IngredientRecord};
    use std::collections::HashMap;

    fn catalog_of(energies: &[f32]) -> Catalog {
        let records = energies
            .iter()
            .enumerate()
            .map(|(i, &energy)| {
                let name = format!("item {i}");
                let mut nutrients = HashMap::new();
                nutrients.insert(Nutrient::Energy, energy);
                IngredientRecord {
                    normalized_key: normalize_name(&name),
                    name,
                    nutrients,
                }
            })
            .collect();
        Catalog::from_records(records)
    }

    fn label_of(assignment: &ClusterAssignment, index: usize) -> usize {
        assignment
            .clusters()
            .iter()
            .position(|members| members.contains(&index))
            .unwrap()
    }

    #[test]
    fn every_record_lands_in_exactly_one_cluster() {
        let catalog = catalog_of(&[0.0, 5.0, 100.0, 110.0, 55.0, 60.0]);
        let assignment = cluster_catalog(&catalog, &[Nutrient::Energy], 3);

        let mut seen = vec![0usize; catalog.len()];
        for members in assignment.clusters() {
            for &index in members {
                seen[index] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn separated_groups_do_not_share_a_cluster() {
        let catalog = catalog_of(&[0.0, 2.0, 90.0, 100.0]);
        let assignment = cluster_catalog(&catalog, &[Nutrient::Energy], 2);

        assert_eq!(label_of(&assignment, 0), label_of(&assignment, 1));
        assert_eq!(label_of(&assignment, 2), label_of(&assignment, 3));
        assert_ne!(label_of(&assignment, 0), label_of(&assignment, 2));
    }

    #[test]
    fn oversized_k_is_clamped_to_the_row_count() {
        let catalog = catalog_of(&[0.0, 50.0, 100.0]);
        let assignment = cluster_catalog(&catalog, &[Nutrient::Energy], 10);
        assert_eq!(assignment.len(), 3);
    }

    #[test]
    fn tiny_catalogs_collapse_to_a_single_cluster() {
        let catalog = catalog_of(&[42.0]);
        let assignment = cluster_catalog(&catalog, &[Nutrient::Energy], 4);
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment.clusters()[0], vec![0]);
    }

    #[test]
    fn no_features_collapse_to_a_single_cluster() {
        let catalog = catalog_of(&[1.0, 2.0, 3.0]);
        let assignment = cluster_catalog(&catalog, &[], 4);
        assert_eq!(assignment.len(), 1);
    }

    #[test]
    fn clustering_is_reproducible() {
        let catalog = catalog_of(&[0.0, 5.0, 100.0, 110.0, 55.0, 60.0]);
        let a = cluster_catalog(&catalog, &[Nutrient::Energy], 3);
        let b = cluster_catalog(&catalog, &[Nutrient::Energy], 3);
        assert_eq!(a.clusters(), b.clusters());
    }

    #[test]
    fn largest_breaks_ties_toward_the_lowest_id() {
        let assignment = ClusterAssignment {
            clusters: vec![vec![0, 1], vec![2, 3], vec![4]],
        };
        assert_eq!(assignment.largest(), Some(0));
    }
}
