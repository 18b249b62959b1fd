//! Environment-backed configuration. Every knob has a default mirroring
//! the pipeline's reference behavior; a `.env` file or real environment
//! variables override them.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;
use tracing::warn;

use crate::menu_builder::TargetMissPolicy;
use crate::sampler::{PrototypeBounds, SamplePolicy};
use crate::targets::MacroTargets;

pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone)]
pub struct Settings {
    pub ingredients_csv: PathBuf,
    pub dishes_csv: PathBuf,
    /// Name of the env var holding the generative service key.
    pub api_key_env_var: String,
    pub cluster_count: usize,
    pub bounds: PrototypeBounds,
    pub sample_policy: SamplePolicy,
    pub generative_retries: u32,
    pub retry_base_delay: Duration,
    pub max_attempts: u32,
    pub default_dish_count: usize,
    pub targets: MacroTargets,
    pub miss_policy: TargetMissPolicy,
    pub rng_seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            ingredients_csv: PathBuf::from("ingredientes.csv"),
            dishes_csv: PathBuf::from("platos.csv"),
            api_key_env_var: API_KEY_ENV_VAR.to_string(),
            cluster_count: 4,
            bounds: PrototypeBounds::default(),
            sample_policy: SamplePolicy::Affinity,
            generative_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            max_attempts: 5,
            default_dish_count: 3,
            targets: MacroTargets::default(),
            miss_policy: TargetMissPolicy::BestEffort,
            rng_seed: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        dotenv().ok();
        let mut settings = Settings::default();

        if let Ok(path) = env::var("INGREDIENTS_CSV") {
            settings.ingredients_csv = PathBuf::from(path);
        }
        if let Ok(path) = env::var("DISHES_CSV") {
            settings.dishes_csv = PathBuf::from(path);
        }
        if let Some(count) = parsed_env("CLUSTER_COUNT") {
            settings.cluster_count = count;
        }
        if let Some(min_ing) = parsed_env("MIN_INGREDIENTS") {
            settings.bounds.min_ing = min_ing;
        }
        if let Some(max_ing) = parsed_env("MAX_INGREDIENTS") {
            settings.bounds.max_ing = max_ing;
        }
        if let Some(retries) = parsed_env("GENERATIVE_RETRIES") {
            settings.generative_retries = retries;
        }
        if let Some(attempts) = parsed_env("MAX_ATTEMPTS") {
            settings.max_attempts = attempts;
        }
        if let Some(count) = parsed_env("DEFAULT_DISH_COUNT") {
            settings.default_dish_count = count;
        }
        if let Some(seed) = parsed_env("RNG_SEED") {
            settings.rng_seed = Some(seed);
        }
        if let Some(band) = band_env("TARGET_CARBS_PCT") {
            settings.targets.carbs_pct = band;
        }
        if let Some(band) = band_env("TARGET_PROTEIN_PCT") {
            settings.targets.protein_pct = band;
        }
        if let Some(band) = band_env("TARGET_FAT_PCT") {
            settings.targets.fat_pct = band;
        }
        if let Some(band) = band_env("TARGET_CALORIES") {
            settings.targets.calories = Some(band);
        }
        if let Ok(raw) = env::var("SAMPLE_POLICY") {
            match raw.to_lowercase().as_str() {
                "affinity" => settings.sample_policy = SamplePolicy::Affinity,
                "diversity" => settings.sample_policy = SamplePolicy::Diversity,
                other => warn!(value = other, "unknown SAMPLE_POLICY, keeping default"),
            }
        }
        if let Ok(raw) = env::var("TARGET_MISS_POLICY") {
            match raw.to_lowercase().as_str() {
                "best-effort" => settings.miss_policy = TargetMissPolicy::BestEffort,
                "reject" => settings.miss_policy = TargetMissPolicy::Reject,
                other => warn!(value = other, "unknown TARGET_MISS_POLICY, keeping default"),
            }
        }

        settings
    }
}

fn parsed_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}

fn band_env(name: &str) -> Option<(f32, f32)> {
    env::var(name).ok().and_then(|raw| parse_band(&raw))
}

/// Parses a "lo-hi" band, e.g. "50-60".
fn parse_band(raw: &str) -> Option<(f32, f32)> {
    let (lo, hi) = raw.split_once('-')?;
    let lo: f32 = lo.trim().parse().ok()?;
    let hi: f32 = hi.trim().parse().ok()?;
    (lo <= hi).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_parse_from_lo_hi_strings() {
        assert_eq!(parse_band("50-60"), Some((50.0, 60.0)));
        assert_eq!(parse_band(" 12.5 - 20 "), Some((12.5, 20.0)));
        assert_eq!(parse_band("60-50"), None);
        assert_eq!(parse_band("fifty"), None);
    }

    #[test]
    fn defaults_match_the_reference_behavior() {
        let settings = Settings::default();
        assert_eq!(settings.cluster_count, 4);
        assert_eq!(settings.bounds.min_ing, 3);
        assert_eq!(settings.bounds.max_ing, 7);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.default_dish_count, 3);
        assert_eq!(settings.targets.carbs_pct, (50.0, 60.0));
    }
}
