use std::collections::HashMap;

pub mod loader;
pub mod matcher;

pub use loader::{load_catalog, CatalogError};
pub use matcher::{closest_match, DEFAULT_SIMILARITY_CUTOFF};

/// Mandatory identity column of the food-composition table.
pub const NAME_COL: &str = "NOMBRE DEL ALIMENTO";

/// The fixed nutrient set carried by the catalog. Columns absent from a
/// given source file are dropped at load time, never fabricated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nutrient {
    Energy,
    Water,
    Protein,
    Fat,
    Carbohydrate,
    Fiber,
    Calcium,
    Phosphorus,
    Zinc,
    Iron,
    VitaminA,
    Thiamine,
    Riboflavin,
    Niacin,
    VitaminC,
    Sodium,
    Potassium,
}

impl Nutrient {
    pub const ALL: [Nutrient; 17] = [
        Nutrient::Energy,
        Nutrient::Water,
        Nutrient::Protein,
        Nutrient::Fat,
        Nutrient::Carbohydrate,
        Nutrient::Fiber,
        Nutrient::Calcium,
        Nutrient::Phosphorus,
        Nutrient::Zinc,
        Nutrient::Iron,
        Nutrient::VitaminA,
        Nutrient::Thiamine,
        Nutrient::Riboflavin,
        Nutrient::Niacin,
        Nutrient::VitaminC,
        Nutrient::Sodium,
        Nutrient::Potassium,
    ];

    /// Header of this nutrient's column in the source table, per 100 g.
    pub fn column_header(self) -> &'static str {
        match self {
            Nutrient::Energy => "Energía (kcal)",
            Nutrient::Water => "Agua (g)",
            Nutrient::Protein => "Proteínas totales (g)",
            Nutrient::Fat => "Grasa total (g)",
            Nutrient::Carbohydrate => "Carbohidratos disponibles (g)",
            Nutrient::Fiber => "Fibra dietaria (g)",
            Nutrient::Calcium => "Calcio (mg)",
            Nutrient::Phosphorus => "Fósforo (mg)",
            Nutrient::Zinc => "Zinc (mg)",
            Nutrient::Iron => "Hierro (mg)",
            Nutrient::VitaminA => "Vitamina A equivalentes totales (µg)",
            Nutrient::Thiamine => "Tiamina (mg)",
            Nutrient::Riboflavin => "Riboflavina (mg)",
            Nutrient::Niacin => "Niacina (mg)",
            Nutrient::VitaminC => "Vitamina C (mg)",
            Nutrient::Sodium => "Sodio (mg)",
            Nutrient::Potassium => "Potasio (mg)",
        }
    }
}

/// Trimmed, lower-cased form of an ingredient name. All catalog lookups
/// go through this key.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// One row of the ingredient table. Immutable after load.
#[derive(Debug, Clone)]
pub struct IngredientRecord {
    pub name: String,
    pub normalized_key: String,
    pub nutrients: HashMap<Nutrient, f32>,
}

impl IngredientRecord {
    /// Value per 100 g, with absent nutrients reading as zero.
    pub fn nutrient(&self, nutrient: Nutrient) -> f32 {
        self.nutrients.get(&nutrient).copied().unwrap_or(0.0)
    }
}

/// The loaded ingredient catalog: ordered rows plus a keyed index.
/// Duplicate normalized keys resolve to the first occurrence.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    records: Vec<IngredientRecord>,
    by_key: HashMap<String, usize>,
}

impl Catalog {
    pub fn from_records(records: Vec<IngredientRecord>) -> Self {
        let mut by_key = HashMap::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            by_key.entry(record.normalized_key.clone()).or_insert(idx);
        }
        Catalog { records, by_key }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IngredientRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&IngredientRecord> {
        self.records.get(index)
    }

    /// Exact lookup by normalized key.
    pub fn get(&self, normalized_key: &str) -> Option<&IngredientRecord> {
        self.by_key
            .get(normalized_key)
            .and_then(|&idx| self.records.get(idx))
    }

    /// The distinct normalized keys, for the near-match fallback.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, energy: f32) -> IngredientRecord {
        let mut nutrients = HashMap::new();
        nutrients.insert(Nutrient::Energy, energy);
        IngredientRecord {
            name: name.to_string(),
            normalized_key: normalize_name(name),
            nutrients,
        }
    }

    #[test]
    fn normalization_trims_and_lowercases() {
        assert_eq!(normalize_name("  Arroz Blanco "), "arroz blanco");
    }

    #[test]
    fn duplicate_keys_resolve_to_first_row() {
        let catalog = Catalog::from_records(vec![record("Pollo", 165.0), record("pollo ", 9000.0)]);
        assert_eq!(catalog.len(), 2);
        let hit = catalog.get("pollo").unwrap();
        assert_eq!(hit.nutrient(Nutrient::Energy), 165.0);
    }

    #[test]
    fn absent_nutrient_reads_zero() {
        let rec = record("Pollo", 165.0);
        assert_eq!(rec.nutrient(Nutrient::Fiber), 0.0);
    }
}
