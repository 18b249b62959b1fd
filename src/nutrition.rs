//! Resolution of generated ingredient selections back to catalog rows,
//! and aggregation of their nutrition totals.

use tracing::{info, warn};

use crate::catalog::{matcher, normalize_name, Catalog, Nutrient};

/// Macro totals for one dish, accumulated as `value_per_100g * grams / 100`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NutritionTotals {
    pub calories: f32,
    pub carbs_g: f32,
    pub protein_g: f32,
    pub fat_g: f32,
}

/// One ingredient the generative step selected, by name and gram weight.
#[derive(Debug, Clone)]
pub struct SelectionItem {
    pub name: String,
    pub grams: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Counted into the totals under the given catalog key. `substituted`
    /// marks a near-match resolution rather than an exact hit.
    Resolved { key: String, substituted: bool },
    /// No exact or close catalog entry; excluded from the totals.
    Missing,
    /// Invalid gram value; excluded from the totals.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ItemReport {
    pub requested: String,
    pub grams: f32,
    pub outcome: ItemOutcome,
}

/// Per-item audit trail of a resolution pass.
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    pub items: Vec<ItemReport>,
}

impl ResolutionReport {
    pub fn missing(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| item.outcome == ItemOutcome::Missing)
    }

    pub fn substitutions(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|item| {
            matches!(
                item.outcome,
                ItemOutcome::Resolved {
                    substituted: true,
                    ..
                }
            )
        })
    }
}

/// Maps each selected name back to a catalog row (exact normalized key
/// first, then a strict near-match) and sums the weighted nutrition.
///
/// Items that cannot be resolved degrade the totals instead of failing
/// the call; the report records what happened to every item.
pub fn resolve_and_total(
    catalog: &Catalog,
    selection: &[SelectionItem],
) -> (NutritionTotals, ResolutionReport) {
    let mut totals = NutritionTotals::default();
    let mut report = ResolutionReport::default();

    for item in selection {
        if !item.grams.is_finite() || item.grams < 0.0 {
            warn!(name = %item.name, grams = item.grams, "rejecting item with invalid weight");
            report.items.push(ItemReport {
                requested: item.name.clone(),
                grams: item.grams,
                outcome: ItemOutcome::Rejected,
            });
            continue;
        }

        let query = normalize_name(&item.name);
        let resolved_key = if catalog.get(&query).is_some() {
            Some((query.clone(), false))
        } else {
            matcher::closest_match(&query, catalog.keys(), matcher::DEFAULT_SIMILARITY_CUTOFF)
                .map(|matched| {
                    info!(requested = %item.name, matched = %matched, "resolved via near match");
                    (matched.to_string(), true)
                })
        };

        let Some((key, substituted)) = resolved_key else {
            warn!(name = %item.name, "no exact or close catalog match, excluding from totals");
            report.items.push(ItemReport {
                requested: item.name.clone(),
                grams: item.grams,
                outcome: ItemOutcome::Missing,
            });
            continue;
        };

        if let Some(record) = catalog.get(&key) {
            let factor = item.grams / 100.0;
            totals.calories += record.nutrient(Nutrient::Energy) * factor;
            totals.carbs_g += record.nutrient(Nutrient::Carbohydrate) * factor;
            totals.protein_g += record.nutrient(Nutrient::Protein) * factor;
            totals.fat_g += record.nutrient(Nutrient::Fat) * factor;
            report.items.push(ItemReport {
                requested: item.name.clone(),
                grams: item.grams,
                outcome: ItemOutcome::Resolved { key, substituted },
            });
        }
    }

    (totals, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::IngredientRecord;
    use std::collections::HashMap;

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

    fn test_catalog() -> Catalog {
        Catalog::from_records(vec![
            record("Rice", 130.0, 28.0, 2.7, 0.3),
            record("Chicken", 165.0, 0.0, 27.0, 3.6),
            record("Pollo", 165.0, 0.0, 27.0, 3.6),
        ])
    }

    fn item(name: &str, grams: f32) -> SelectionItem {
        SelectionItem {
            name: name.to_string(),
            grams,
        }
    }

    #[test]
    fn empty_selection_totals_zero() {
        let (totals, report) = resolve_and_total(&test_catalog(), &[]);
        assert_eq!(totals, NutritionTotals::default());
        assert!(report.items.is_empty());
    }

    #[test]
    fn rice_and_chicken_worked_example() {
        let catalog = test_catalog();
        let (totals, report) =
            resolve_and_total(&catalog, &[item("Rice", 150.0), item("Chicken", 100.0)]);

        assert!((totals.calories - 360.0).abs() < 1e-3);
        assert!((totals.carbs_g - 42.0).abs() < 1e-3);
        assert!((totals.protein_g - 31.05).abs() < 1e-3);
        assert!((totals.fat_g - 4.05).abs() < 1e-3);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.substitutions().count(), 0);
    }

    #[test]
    fn totals_are_linear_in_the_selection() {
        let catalog = test_catalog();
        let selection = [item("Rice", 150.0), item("Chicken", 100.0), item("Rice", 50.0)];

        let (combined, _) = resolve_and_total(&catalog, &selection);
        let mut summed = NutritionTotals::default();
        for single in &selection {
            let (part, _) = resolve_and_total(&catalog, std::slice::from_ref(single));
            summed.calories += part.calories;
            summed.carbs_g += part.carbs_g;
            summed.protein_g += part.protein_g;
            summed.fat_g += part.fat_g;
        }
        assert!((combined.calories - summed.calories).abs() < 1e-3);
        assert!((combined.carbs_g - summed.carbs_g).abs() < 1e-3);
        assert!((combined.protein_g - summed.protein_g).abs() < 1e-3);
        assert!((combined.fat_g - summed.fat_g).abs() < 1e-3);
    }

    #[test]
    fn exact_normalized_match_skips_the_fallback() {
        let catalog = test_catalog();
        let (_, report) = resolve_and_total(&catalog, &[item("  POLLO ", 100.0)]);
        assert!(matches!(
            &report.items[0].outcome,
            ItemOutcome::Resolved {
                substituted: false,
                ..
            }
        ));
    }

    #[test]
    fn near_match_is_recorded_as_a_substitution() {
        let catalog = test_catalog();
        let (totals, report) = resolve_and_total(&catalog, &[item("poll", 100.0)]);

        assert_eq!(report.substitutions().count(), 1);
        match &report.items[0].outcome {
            ItemOutcome::Resolved { key, substituted } => {
                assert_eq!(key, "pollo");
                assert!(substituted);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!((totals.calories - 165.0).abs() < 1e-3);
    }

    #[test]
    fn negative_grams_reject_the_item_only() {
        let catalog = test_catalog();
        let (totals, report) =
            resolve_and_total(&catalog, &[item("Rice", -50.0), item("Chicken", 100.0)]);

        assert_eq!(report.items[0].outcome, ItemOutcome::Rejected);
        assert!((totals.calories - 165.0).abs() < 1e-3);
    }

    #[test]
    fn unmatched_items_degrade_to_partial_totals() {
        let catalog = test_catalog();
        let (totals, report) =
            resolve_and_total(&catalog, &[item("Dragonfruit", 100.0), item("Rice", 100.0)]);

        assert_eq!(report.missing().count(), 1);
        assert!((totals.calories - 130.0).abs() < 1e-3);
    }
}
