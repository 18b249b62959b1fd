//! Macro-nutrient target bands and energy-weighted percentages.

use serde::{Deserialize, Serialize};

use crate::nutrition::NutritionTotals;

/// Atwater energy factors, kcal per gram.
pub const KCAL_PER_G_CARB: f32 = 4.0;
pub const KCAL_PER_G_PROTEIN: f32 = 4.0;
pub const KCAL_PER_G_FAT: f32 = 9.0;

/// Acceptance bands for one dish. Percentages are shares of total energy;
/// the calorie band is optional and absolute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroTargets {
    pub carbs_pct: (f32, f32),
    pub protein_pct: (f32, f32),
    pub fat_pct: (f32, f32),
    pub calories: Option<(f32, f32)>,
}

impl Default for MacroTargets {
    fn default() -> Self {
        MacroTargets {
            carbs_pct: (50.0, 60.0),
            protein_pct: (10.0, 15.0),
            fat_pct: (20.0, 30.0),
            calories: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroPercentages {
    pub carbs_pct: f32,
    pub protein_pct: f32,
    pub fat_pct: f32,
}

impl NutritionTotals {
    /// Energy share of each macro. `None` when the dish carries no energy,
    /// which also means it can never satisfy a band.
    pub fn macro_percentages(&self) -> Option<MacroPercentages> {
        if self.calories <= 0.0 {
            return None;
        }
        Some(MacroPercentages {
            carbs_pct: self.carbs_g * KCAL_PER_G_CARB / self.calories * 100.0,
            protein_pct: self.protein_g * KCAL_PER_G_PROTEIN / self.calories * 100.0,
            fat_pct: self.fat_g * KCAL_PER_G_FAT / self.calories * 100.0,
        })
    }
}

impl MacroTargets {
    pub fn satisfied_by(&self, totals: &NutritionTotals) -> bool {
        let Some(pct) = totals.macro_percentages() else {
            return false;
        };
        within(self.carbs_pct, pct.carbs_pct)
            && within(self.protein_pct, pct.protein_pct)
            && within(self.fat_pct, pct.fat_pct)
            && self
                .calories
                .map_or(true, |band| within(band, totals.calories))
    }
}

fn within((lo, hi): (f32, f32), value: f32) -> bool {
    value >= lo && value <= hi
}
