//! Pre-composed reference dishes: a second data source holding complete
//! dishes with their per-serving macros, sampled at random instead of
//! generated.

use std::io::Cursor;
use std::path::Path;

use csv::ReaderBuilder;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

use crate::catalog::loader::{decode_with_fallback, parse_decimal};
use crate::catalog::{CatalogError, Nutrient, NAME_COL};
use crate::targets::{MacroPercentages, KCAL_PER_G_CARB, KCAL_PER_G_FAT, KCAL_PER_G_PROTEIN};

#[derive(Debug, Clone)]
pub struct ReferenceDish {
    pub name: String,
    pub energy: f32,
    pub carbs: f32,
    pub protein: f32,
    pub fat: f32,
}

impl ReferenceDish {
    /// Energy share of each macro. Rows with non-positive energy never
    /// survive loading, so the division is safe.
    pub fn percentages(&self) -> MacroPercentages {
        MacroPercentages {
            carbs_pct: self.carbs * KCAL_PER_G_CARB / self.energy * 100.0,
            protein_pct: self.protein * KCAL_PER_G_PROTEIN / self.energy * 100.0,
            fat_pct: self.fat * KCAL_PER_G_FAT / self.energy * 100.0,
        }
    }
}

/// Loads the dish-reference file with the same decode and comma-decimal
/// rules as the ingredient catalog. Rows without a name or without
/// positive energy are dropped.
pub fn load_reference_dishes(path: &Path) -> Result<Vec<ReferenceDish>, CatalogError> {
    if !path.exists() {
        return Err(CatalogError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = decode_with_fallback(&bytes).map_err(|reason| CatalogError::Decode {
        path: path.to_path_buf(),
        reason,
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(Cursor::new(text));
    let headers = reader.headers()?.clone();
    let name_idx = headers
        .iter()
        .position(|h| h == NAME_COL)
        .ok_or(CatalogError::MissingIdentityColumn(NAME_COL))?;

    let column = |nutrient: Nutrient| {
        let idx = headers.iter().position(|h| h == nutrient.column_header());
        if idx.is_none() {
            warn!(
                column = nutrient.column_header(),
                "macro column missing from reference file"
            );
        }
        idx
    };
    let energy_idx = column(Nutrient::Energy);
    let carbs_idx = column(Nutrient::Carbohydrate);
    let protein_idx = column(Nutrient::Protein);
    let fat_idx = column(Nutrient::Fat);

    let cell = |row: &csv::StringRecord, idx: Option<usize>| {
        idx.and_then(|i| row.get(i)).map_or(0.0, parse_decimal)
    };

    let mut dishes = Vec::new();
    for result in reader.records() {
        let row = result?;
        let name = row.get(name_idx).unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        let dish = ReferenceDish {
            name: name.to_string(),
            energy: cell(&row, energy_idx),
            carbs: cell(&row, carbs_idx),
            protein: cell(&row, protein_idx),
            fat: cell(&row, fat_idx),
        };
        if dish.energy <= 0.0 {
            warn!(dish = %dish.name, "dropping reference dish without positive energy");
            continue;
        }
        dishes.push(dish);
    }
    Ok(dishes)
}

/// Draws up to `count` distinct dishes.
pub fn sample_reference_dishes<R: Rng>(
    dishes: &[ReferenceDish],
    count: usize,
    rng: &mut R,
) -> Vec<ReferenceDish> {
    dishes
        .choose_multiple(rng, count.min(dishes.len()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_reference(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "{},{},{},{},{}",
            NAME_COL,
            Nutrient::Energy.column_header(),
            Nutrient::Carbohydrate.column_header(),
            Nutrient::Protein.column_header(),
            Nutrient::Fat.column_header(),
        )
        .unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_dishes_and_drops_invalid_rows() {
        let file = write_reference(&[
            "Lomo saltado,\"650,5\",45.2,32.1,35.0",
            "Sin energia,0,10,10,10",
            ",100,10,10,10",
        ]);
        let dishes = load_reference_dishes(file.path()).unwrap();

        assert_eq!(dishes.len(), 1);
        assert_eq!(dishes[0].name, "Lomo saltado");
        assert_eq!(dishes[0].energy, 650.5);
    }

    #[test]
    fn percentages_use_atwater_factors() {
        let dish = ReferenceDish {
            name: "Test".to_string(),
            energy: 400.0,
            carbs: 50.0,
            protein: 25.0,
            fat: 100.0 / 9.0,
        };
        let pct = dish.percentages();
        assert!((pct.carbs_pct - 50.0).abs() < 1e-3);
        assert!((pct.protein_pct - 25.0).abs() < 1e-3);
        assert!((pct.fat_pct - 25.0).abs() < 1e-3);
    }

    #[test]
    fn sampling_never_exceeds_the_pool() {
        let file = write_reference(&["A,100,10,5,2", "B,200,20,10,4"]);
        let dishes = load_reference_dishes(file.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let sampled = sample_reference_dishes(&dishes, 5, &mut rng);
        assert_eq!(sampled.len(), 2);
    }

    #[test]
    fn missing_identity_column_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", Nutrient::Energy.column_header()).unwrap();
        writeln!(file, "100").unwrap();
        file.flush().unwrap();

        let err = load_reference_dishes(file.path()).unwrap_err();
        assert!(matches!(err, CatalogError::MissingIdentityColumn(_)));
    }
}
