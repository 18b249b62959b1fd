//! The outer acceptance loop: sample prototypes, ask the generative
//! service for a dish, resolve its nutrition, and repeat until the macro
//! bands are met or the attempt budget runs out.

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{info, warn};

use crate::api_connection::endpoints::Provider;
use crate::catalog::{Catalog, Nutrient};
use crate::clustering::{cluster_catalog, ClusterAssignment};
use crate::dish_protocol::{GeneratedMenu, SelectionProtocol};
use crate::nutrition::{
    resolve_and_total, ItemOutcome, NutritionTotals, ResolutionReport, SelectionItem,
};
use crate::sampler::{
    affinity_prototypes, diversity_prototypes, Prototype, PrototypeBounds, SampleError,
    SamplePolicy,
};
use crate::targets::MacroTargets;

/// One resolved ingredient of a composed dish: per-100 g values plus the
/// selected gram amount.
#[derive(Debug, Clone)]
pub struct DishItem {
    pub name: String,
    pub energy: f32,
    pub carbs: f32,
    pub protein: f32,
    pub fat: f32,
    pub grams: f32,
}

#[derive(Debug, Clone)]
pub struct ComposedDish {
    pub dish_name: String,
    pub items: Vec<DishItem>,
    pub totals: NutritionTotals,
    /// False when the loop ran out of attempts and this is the last
    /// computed, non-conforming composition.
    pub targets_met: bool,
}

/// What to do when the attempt budget is spent without meeting the bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMissPolicy {
    /// Surface the last computed dish flagged as off-target.
    BestEffort,
    /// Drop it and report `NoAcceptableComposition`.
    Reject,
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error(transparent)]
    Sample(#[from] SampleError),
    /// The service never produced a usable dish.
    #[error("generative service produced no usable dish after {attempts} attempts")]
    GenerativeExhausted { attempts: u32 },
    /// Dishes were produced but none met the macro bands.
    #[error("no composition met the macro targets after {attempts} attempts")]
    NoAcceptableComposition { attempts: u32 },
}

/// Seam between the acceptance loop and the generative protocol, so the
/// loop's retry and acceptance policy is testable without a network.
#[async_trait]
pub trait DishSource: Send + Sync {
    async fn select_dishes(
        &self,
        prototypes: &[Prototype],
        targets: &MacroTargets,
        count: usize,
    ) -> GeneratedMenu;
}

/// The live source: the retry protocol over an initialized provider.
pub struct LiveSelection {
    pub provider: Provider,
    pub protocol: SelectionProtocol,
}

#[async_trait]
impl DishSource for LiveSelection {
    async fn select_dishes(
        &self,
        prototypes: &[Prototype],
        targets: &MacroTargets,
        count: usize,
    ) -> GeneratedMenu {
        self.protocol
            .request_dishes(&self.provider, prototypes, targets, count)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct ComposerConfig {
    pub cluster_count: usize,
    pub bounds: PrototypeBounds,
    pub sample_policy: SamplePolicy,
    pub targets: MacroTargets,
    pub max_attempts: u32,
    pub miss_policy: TargetMissPolicy,
    /// Fixed seed for the request-scoped rng; tests pin this.
    pub rng_seed: Option<u64>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        ComposerConfig {
            cluster_count: 4,
            bounds: PrototypeBounds::default(),
            sample_policy: SamplePolicy::Affinity,
            targets: MacroTargets::default(),
            max_attempts: 5,
            miss_policy: TargetMissPolicy::BestEffort,
            rng_seed: None,
        }
    }
}

pub struct MenuComposer<S: DishSource> {
    catalog: Arc<Catalog>,
    features: Vec<Nutrient>,
    source: S,
    config: ComposerConfig,
}

impl<S: DishSource> MenuComposer<S> {
    pub fn new(
        catalog: Arc<Catalog>,
        features: Vec<Nutrient>,
        source: S,
        config: ComposerConfig,
    ) -> Self {
        MenuComposer {
            catalog,
            features,
            source,
            config,
        }
    }

    /// Composes up to `count` dishes. Individual dish failures are
    /// tolerated while at least one dish succeeds; zero successes
    /// propagate the last typed error.
    pub async fn generate_dishes(&self, count: usize) -> Result<Vec<ComposedDish>, ComposeError> {
        let assignment = cluster_catalog(&self.catalog, &self.features, self.config.cluster_count);
        info!(clusters = assignment.len(), rows = self.catalog.len(), "catalog clustered");

        let mut rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut dishes = Vec::with_capacity(count);
        let mut last_error = None;
        for index in 0..count {
            info!(dish = index + 1, total = count, "composing dish");
            match self.compose_dish(&assignment, &mut rng).await {
                Ok(dish) => dishes.push(dish),
                Err(err) => {
                    warn!(dish = index + 1, error = %err, "dish composition failed");
                    last_error = Some(err);
                }
            }
        }

        if dishes.is_empty() {
            Err(last_error.unwrap_or(ComposeError::GenerativeExhausted { attempts: 0 }))
        } else {
            Ok(dishes)
        }
    }

    /// One dish: at most `max_attempts` sample/generate/resolve rounds.
    async fn compose_dish(
        &self,
        assignment: &ClusterAssignment,
        rng: &mut StdRng,
    ) -> Result<ComposedDish, ComposeError> {
        let mut best_effort: Option<ComposedDish> = None;

        for attempt in 1..=self.config.max_attempts {
            let prototypes = match self.config.sample_policy {
                SamplePolicy::Affinity => {
                    affinity_prototypes(&self.catalog, assignment, self.config.bounds, rng)?
                }
                SamplePolicy::Diversity => diversity_prototypes(&self.catalog, assignment, rng),
            };

            let menu = self
                .source
                .select_dishes(&prototypes, &self.config.targets, 1)
                .await;
            let Some(generated) = menu.dishes.into_iter().next() else {
                warn!(attempt, "no dish returned, re-sampling prototypes");
                continue;
            };

            let selection: Vec<SelectionItem> = generated
                .ingredients
                .iter()
                .zip(&generated.weights_g)
                .map(|(name, &grams)| SelectionItem {
                    name: name.clone(),
                    grams,
                })
                .collect();
            let (totals, report) = resolve_and_total(&self.catalog, &selection);

            let targets_met = self.config.targets.satisfied_by(&totals);
            let dish = ComposedDish {
                dish_name: generated.dish_name,
                items: self.dish_items(&report),
                totals,
                targets_met,
            };
            if targets_met {
                info!(attempt, dish = %dish.dish_name, "macro targets satisfied");
                return Ok(dish);
            }
            warn!(attempt, dish = %dish.dish_name, "dish misses macro targets, retrying");
            best_effort = Some(dish);
        }

        match (self.config.miss_policy, best_effort) {
            (TargetMissPolicy::BestEffort, Some(dish)) => {
                info!(dish = %dish.dish_name, "returning best-effort dish flagged off-target");
                Ok(dish)
            }
            (TargetMissPolicy::Reject, Some(_)) => Err(ComposeError::NoAcceptableComposition {
                attempts: self.config.max_attempts,
            }),
            (_, None) => Err(ComposeError::GenerativeExhausted {
                attempts: self.config.max_attempts,
            }),
        }
    }

    fn dish_items(&self, report: &ResolutionReport) -> Vec<DishItem> {
        report
            .items
            .iter()
            .filter_map(|entry| match &entry.outcome {
                ItemOutcome::Resolved { key, .. } => {
                    self.catalog.get(key).map(|record| DishItem {
                        name: record.name.clone(),
                        energy: record.nutrient(Nutrient::Energy),
                        carbs: record.nutrient(Nutrient::Carbohydrate),
                        protein: record.nutrient(Nutrient::Protein),
                        fat: record.nutrient(Nutrient::Fat),
                        grams: entry.grams,
                    })
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{normalize_name, IngredientRecord};
    use crate::dish_protocol::GeneratedDish;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn record(name: &str, energy: f32, carbs: f32, protein: f32, fat: f32) -> IngredientRecord {
        let mut nutrients = HashMap::new();
        nutrients.insert(Nutrient::Energy, energy);
        nutrients.insert(Nutrient::Carbohydrate, carbs);
        nutrients.insert(Nutrient::Protein, protein);
        nutrients.insert(Nutrient::Fat, fat);
        IngredientRecord {
            name: name.to_string(),
            normalized_key: normalize_name(name),
            nutrients,
        }
    }

    fn test_catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_records(vec![
            record("Arroz", 130.0, 28.0, 2.7, 0.3),
            record("Pollo", 165.0, 0.0, 27.0, 3.6),
            record("Aceite", 884.0, 0.0, 0.0, 100.0),
            record("Cebolla", 40.0, 9.0, 1.1, 0.1),
        ]))
    }

    /// Replays a fixed script of menus and counts how often it is asked.
    struct ScriptedSource {
        responses: Mutex<Vec<GeneratedMenu>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(mut responses: Vec<GeneratedMenu>) -> Self {
            responses.reverse();
            ScriptedSource {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DishSource for ScriptedSource {
        async fn select_dishes(
            &self,
            _prototypes: &[Prototype],
            _targets: &MacroTargets,
            _count: usize,
        ) -> GeneratedMenu {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_default()
        }
    }

    fn balanced_dish() -> GeneratedMenu {
        GeneratedMenu {
            dishes: vec![GeneratedDish {
                dish_name: "Arroz con pollo".to_string(),
                ingredients: vec![
                    "Arroz".to_string(),
                    "Pollo".to_string(),
                    "Aceite".to_string(),
                ],
                weights_g: vec![150.0, 100.0, 10.0],
            }],
        }
    }

    // 150 g arroz + 100 g pollo + 10 g aceite:
    // 448.4 kcal, carbs 37.5 %, protein 27.7 %, fat 28.2 %.
    fn reachable_targets() -> MacroTargets {
        MacroTargets {
            carbs_pct: (30.0, 45.0),
            protein_pct: (20.0, 35.0),
            fat_pct: (20.0, 35.0),
            calories: None,
        }
    }

    fn config(targets: MacroTargets, miss_policy: TargetMissPolicy) -> ComposerConfig {
        ComposerConfig {
            cluster_count: 1,
            targets,
            miss_policy,
            rng_seed: Some(7),
            ..ComposerConfig::default()
        }
    }

    fn composer(source: ScriptedSource, cfg: ComposerConfig) -> MenuComposer<ScriptedSource> {
        MenuComposer::new(test_catalog(), vec![Nutrient::Energy], source, cfg)
    }

    #[tokio::test]
    async fn accepts_a_dish_that_meets_the_bands() {
        let composer = composer(
            ScriptedSource::new(vec![balanced_dish()]),
            config(reachable_targets(), TargetMissPolicy::BestEffort),
        );
        let dishes = composer.generate_dishes(1).await.unwrap();

        assert_eq!(dishes.len(), 1);
        let dish = &dishes[0];
        assert!(dish.targets_met);
        assert_eq!(dish.items.len(), 3);
        assert!((dish.totals.calories - 448.4).abs() < 0.5);
        assert_eq!(composer.source.call_count(), 1);
    }

    #[tokio::test]
    async fn never_exceeds_the_attempt_budget() {
        // The source only ever answers with empty menus.
        let composer = composer(
            ScriptedSource::new(vec![]),
            config(reachable_targets(), TargetMissPolicy::BestEffort),
        );
        let err = composer.generate_dishes(1).await.unwrap_err();

        assert!(matches!(
            err,
            ComposeError::GenerativeExhausted { attempts: 5 }
        ));
        assert_eq!(composer.source.call_count(), 5);
    }

    #[tokio::test]
    async fn best_effort_surfaces_the_last_off_target_dish() {
        // Bands nothing can hit.
        let unreachable = MacroTargets {
            carbs_pct: (90.0, 95.0),
            protein_pct: (1.0, 2.0),
            fat_pct: (1.0, 2.0),
            calories: None,
        };
        let composer = composer(
            ScriptedSource::new(vec![balanced_dish(); 5]),
            config(unreachable, TargetMissPolicy::BestEffort),
        );
        let dishes = composer.generate_dishes(1).await.unwrap();

        assert_eq!(dishes.len(), 1);
        assert!(!dishes[0].targets_met);
        assert_eq!(composer.source.call_count(), 5);
    }

    #[tokio::test]
    async fn reject_policy_reports_no_acceptable_composition() {
        let unreachable = MacroTargets {
            carbs_pct: (90.0, 95.0),
            protein_pct: (1.0, 2.0),
            fat_pct: (1.0, 2.0),
            calories: None,
        };
        let composer = composer(
            ScriptedSource::new(vec![balanced_dish(); 5]),
            config(unreachable, TargetMissPolicy::Reject),
        );
        let err = composer.generate_dishes(1).await.unwrap_err();

        assert!(matches!(
            err,
            ComposeError::NoAcceptableComposition { attempts: 5 }
        ));
    }

    #[tokio::test]
    async fn one_failed_dish_does_not_sink_the_menu() {
        // First dish sees only an empty script, second dish gets a valid one.
        let responses = vec![
            GeneratedMenu::default(),
            GeneratedMenu::default(),
            GeneratedMenu::default(),
            GeneratedMenu::default(),
            GeneratedMenu::default(),
            balanced_dish(),
        ];
        let composer = composer(
            ScriptedSource::new(responses),
            config(reachable_targets(), TargetMissPolicy::BestEffort),
        );
        let dishes = composer.generate_dishes(2).await.unwrap();

        assert_eq!(dishes.len(), 1);
        assert!(dishes[0].targets_met);
    }

    #[tokio::test]
    async fn unresolvable_ingredients_still_produce_a_partial_dish() {
        let menu = GeneratedMenu {
            dishes: vec![GeneratedDish {
                dish_name: "Misterio".to_string(),
                ingredients: vec![
                    "Arroz".to_string(),
                    "Dragonfruit".to_string(),
                    "Pollo".to_string(),
                ],
                weights_g: vec![150.0, 100.0, 100.0],
            }],
        };
        let composer = composer(
            ScriptedSource::new(vec![menu; 5]),
            config(reachable_targets(), TargetMissPolicy::BestEffort),
        );
        let dishes = composer.generate_dishes(1).await.unwrap();

        // Dragonfruit is excluded; only the two resolved items remain.
        assert_eq!(dishes[0].items.len(), 2);
    }
}
