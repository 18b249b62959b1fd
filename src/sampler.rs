//! Prototype sampling: draws the bounded candidate set the generative
//! step is allowed to cook with.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::catalog::{Catalog, IngredientRecord, Nutrient};
use crate::clustering::ClusterAssignment;

/// Reduced projection of an ingredient exposed to the generative model,
/// per 100 g.
#[derive(Debug, Clone, Serialize)]
pub struct Prototype {
    pub name: String,
    pub energy: f32,
    pub protein: f32,
    pub fat: f32,
    pub carbs: f32,
}

impl Prototype {
    pub fn from_record(record: &IngredientRecord) -> Self {
        Prototype {
            name: record.name.clone(),
            energy: record.nutrient(Nutrient::Energy),
            protein: record.nutrient(Nutrient::Protein),
            fat: record.nutrient(Nutrient::Fat),
            carbs: record.nutrient(Nutrient::Carbohydrate),
        }
    }
}

/// Bounds on how many prototypes one generation attempt may use.
#[derive(Debug, Clone, Copy)]
pub struct PrototypeBounds {
    pub min_ing: usize,
    pub max_ing: usize,
}

impl Default for PrototypeBounds {
    fn default() -> Self {
        PrototypeBounds {
            min_ing: 3,
            max_ing: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePolicy {
    /// Random subset of the single largest cluster.
    Affinity,
    /// One prototype per cluster, for spread across nutrient profiles.
    Diversity,
}

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("largest cluster holds {available} ingredients, need at least {needed}")]
    InsufficientAffinity { available: usize, needed: usize },
}

/// Affinity sampling: a uniformly random count in
/// `[min_ing, min(max_ing, cluster_size)]` drawn without replacement from
/// the largest cluster (ties toward the lowest cluster id).
pub fn affinity_prototypes<R: Rng>(
    catalog: &Catalog,
    assignment: &ClusterAssignment,
    bounds: PrototypeBounds,
    rng: &mut R,
) -> Result<Vec<Prototype>, SampleError> {
    let members = assignment
        .largest()
        .map(|id| assignment.clusters()[id].as_slice())
        .unwrap_or_default();
    if members.len() < bounds.min_ing {
        return Err(SampleError::InsufficientAffinity {
            available: members.len(),
            needed: bounds.min_ing,
        });
    }

    let upper = bounds.max_ing.min(members.len());
    let count = rng.gen_range(bounds.min_ing..=upper);
    let prototypes = members
        .choose_multiple(rng, count)
        .filter_map(|&index| catalog.record(index).map(Prototype::from_record))
        .collect();
    Ok(prototypes)
}

/// Diversity sampling: exactly one record per non-empty cluster.
pub fn diversity_prototypes<R: Rng>(
    catalog: &Catalog,
    assignment: &ClusterAssignment,
    rng: &mut R,
) -> Vec<Prototype> {
    assignment
        .clusters()
        .iter()
        .filter_map(|members| members.choose(rng))
        .filter_map(|&index| catalog.record(index).map(Prototype::from_record))
        .collect()
}
