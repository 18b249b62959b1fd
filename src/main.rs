use anyhow::{Context, Result};
use std::sync::Arc;

use menu_gen::api_connection::endpoints::Provider;
use menu_gen::catalog::load_catalog;
use menu_gen::cli::{parse_args, Command};
use menu_gen::dish_protocol::SelectionProtocol;
use menu_gen::menu_builder::{ComposerConfig, LiveSelection, MenuComposer};
use menu_gen::reference::{load_reference_dishes, sample_reference_dishes};
use menu_gen::settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = parse_args();
    let settings = Settings::from_env();

    match cli.command {
        Command::Generate { dishes } => {
            let count = dishes.unwrap_or(settings.default_dish_count);
            generate(&settings, count).await?;
        }
        Command::Reference { count } => {
            let count = count.unwrap_or(settings.default_dish_count);
            reference(&settings, count)?;
        }
    }
    Ok(())
}

async fn generate(settings: &Settings, count: usize) -> Result<()> {
    let (catalog, available) = load_catalog(&settings.ingredients_csv).with_context(|| {
        format!(
            "failed to load ingredient catalog from '{}'",
            settings.ingredients_csv.display()
        )
    })?;
    tracing::info!(
        rows = catalog.len(),
        nutrients = available.len(),
        "ingredient catalog loaded"
    );

    let provider = Provider::openrouter(&settings.api_key_env_var)
        .context("generative service is not configured")?;
    let source = LiveSelection {
        provider,
        protocol: SelectionProtocol {
            max_retries: settings.generative_retries,
            retry_base_delay: settings.retry_base_delay,
            bounds: settings.bounds,
        },
    };
    let config = ComposerConfig {
        cluster_count: settings.cluster_count,
        bounds: settings.bounds,
        sample_policy: settings.sample_policy,
        targets: settings.targets,
        max_attempts: settings.max_attempts,
        miss_policy: settings.miss_policy,
        rng_seed: settings.rng_seed,
    };
    let composer = MenuComposer::new(Arc::new(catalog), available, source, config);

    let dishes = composer
        .generate_dishes(count)
        .await
        .context("could not compose any dish")?;

    for (index, dish) in dishes.iter().enumerate() {
        println!("\nDish {}: {}", index + 1, dish.dish_name);
        for item in &dish.items {
            println!("  - {}: {:.1} g", item.name, item.grams);
        }
        println!("  Energy: {:.1} kcal", dish.totals.calories);
        if let Some(pct) = dish.totals.macro_percentages() {
            println!(
                "  Macros: C {:.1}%, P {:.1}%, F {:.1}%",
                pct.carbs_pct, pct.protein_pct, pct.fat_pct
            );
        }
        if !dish.targets_met {
            println!("  (best effort: macro targets not met)");
        }
    }
    Ok(())
}

fn reference(settings: &Settings, count: usize) -> Result<()> {
    let dishes = load_reference_dishes(&settings.dishes_csv).with_context(|| {
        format!(
            "failed to load reference dishes from '{}'",
            settings.dishes_csv.display()
        )
    })?;
    let mut rng = rand::thread_rng();

    for dish in sample_reference_dishes(&dishes, count, &mut rng) {
        let pct = dish.percentages();
        println!("\n{}", dish.name);
        println!("  Energy: {:.1} kcal", dish.energy);
        println!("  Carbs: {:.1} g ({:.1}%)", dish.carbs, pct.carbs_pct);
        println!("  Protein: {:.1} g ({:.1}%)", dish.protein, pct.protein_pct);
        println!("  Fat: {:.1} g ({:.1}%)", dish.fat, pct.fat_pct);
    }
    Ok(())
}
