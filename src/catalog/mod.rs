//! Dish Catalog
//!
//! Static table of recognisable dishes. Loaded once (bundled JSON or a file
//! on disk) and read-only afterwards.

pub mod class_map;

pub use class_map::ClassMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::vision::features::ColorBucket;

const BUILTIN_DISHES: &str = include_str!("../../data/padang_dishes.json");

/// How hot a dish is, ordered mild to very hot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpiceLevel {
    Mild,
    Medium,
    Hot,
    VeryHot,
}

/// Nutrition per serving
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Nutrition {
    pub calories: f32,
    pub protein_grams: f32,
    pub carbs_grams: f32,
    pub fat_grams: f32,
}

impl Nutrition {
    fn is_valid(&self) -> bool {
        [self.calories, self.protein_grams, self.carbs_grams, self.fat_grams]
            .iter()
            .all(|v| v.is_finite() && *v >= 0.0)
    }
}

/// Surface texture a dish usually shows in a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Texture {
    Rough,
    Crispy,
    Smooth,
    Creamy,
    Mixed,
}

impl Texture {
    /// Textures that show up as many strong edges
    pub fn is_coarse(&self) -> bool {
        matches!(self, Texture::Rough | Texture::Crispy)
    }

    /// Textures that show up as few edges
    pub fn is_fine(&self) -> bool {
        matches!(self, Texture::Smooth | Texture::Creamy)
    }
}

/// Hand-authored appearance profile used by the heuristic matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualProfile {
    pub dominant_colors: Vec<ColorBucket>,
    #[serde(default)]
    pub secondary_colors: Vec<ColorBucket>,
    pub texture: Texture,
}

/// One recognisable dish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishRecord {
    /// Unique key
    pub id: String,
    pub localized_name: String,
    pub english_name: String,
    pub description: String,
    pub ingredients: Vec<String>,
    /// Open enumeration: main-dish, vegetable, condiment, snack, ...
    pub category: String,
    pub region: String,
    pub spice_level: SpiceLevel,
    /// Free-text duration
    pub cooking_time: String,
    pub nutrition: Nutrition,
    /// Label the trained classifier uses for this dish
    #[serde(default)]
    pub model_class: Option<String>,
    pub visual: VisualProfile,
}

/// Immutable collection of dishes
#[derive(Debug, Clone)]
pub struct DishCatalog {
    dishes: Arc<[DishRecord]>,
}

impl DishCatalog {
    /// Catalog bundled with the binary
    pub fn builtin() -> Result<Self> {
        let dishes: Vec<DishRecord> =
            serde_json::from_str(BUILTIN_DISHES).context("Bundled dish table is malformed")?;
        Self::from_records(dishes)
    }

    /// Load a catalog from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {:?}", path))?;
        let dishes: Vec<DishRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog {:?}", path))?;
        let catalog = Self::from_records(dishes)?;
        info!("Loaded {} dishes from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Save the catalog as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&*self.dishes)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate and freeze a list of records
    pub fn from_records(dishes: Vec<DishRecord>) -> Result<Self> {
        if dishes.is_empty() {
            anyhow::bail!("Catalog contains no dishes");
        }

        let mut seen = HashSet::new();
        for dish in &dishes {
            if !seen.insert(dish.id.as_str()) {
                anyhow::bail!("Duplicate dish id '{}'", dish.id);
            }
            if !dish.nutrition.is_valid() {
                anyhow::bail!("Dish '{}' has negative or non-finite nutrition values", dish.id);
            }
        }

        Ok(Self {
            dishes: dishes.into(),
        })
    }

    pub fn dishes(&self) -> &[DishRecord] {
        &self.dishes
    }

    pub fn len(&self) -> usize {
        self.dishes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dishes.is_empty()
    }

    /// Look up a dish by id
    pub fn get(&self, id: &str) -> Option<&DishRecord> {
        self.dishes.iter().find(|d| d.id == id)
    }

    /// Look up a dish by the label a trained model reports
    pub fn by_model_class(&self, label: &str) -> Option<&DishRecord> {
        self.dishes
            .iter()
            .find(|d| d.model_class.as_deref() == Some(label))
    }

    /// Resolve a model label, accepting either a dish id or a model class
    pub fn resolve_label(&self, label: &str) -> Option<&DishRecord> {
        self.get(label).or_else(|| self.by_model_class(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = DishCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), 9);
        assert_eq!(catalog.dishes()[0].id, "ayam-goreng");
        assert_eq!(catalog.dishes()[8].id, "telur-dadar");
    }

    #[test]
    fn test_lookup_by_id_and_model_class() {
        let catalog = DishCatalog::builtin().unwrap();
        let rendang = catalog.get("rendang").unwrap();
        assert_eq!(rendang.english_name, "Rendang Beef");
        assert_eq!(catalog.by_model_class("daging_rendang").unwrap().id, "rendang");
        assert_eq!(catalog.resolve_label("telur_balado").unwrap().id, "telur-balado");
        assert_eq!(catalog.resolve_label("gulai-ikan").unwrap().id, "gulai-ikan");
        assert!(catalog.resolve_label("nasi_goreng").is_none());
    }

    #[test]
    fn test_spice_levels_are_ordered() {
        assert!(SpiceLevel::Mild < SpiceLevel::Medium);
        assert!(SpiceLevel::Medium < SpiceLevel::Hot);
        assert!(SpiceLevel::Hot < SpiceLevel::VeryHot);
        let parsed: SpiceLevel = serde_json::from_str("\"very-hot\"").unwrap();
        assert_eq!(parsed, SpiceLevel::VeryHot);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let catalog = DishCatalog::builtin().unwrap();
        let mut dishes = catalog.dishes().to_vec();
        dishes.push(dishes[0].clone());
        assert!(DishCatalog::from_records(dishes).is_err());
    }

    #[test]
    fn test_negative_nutrition_rejected() {
        let catalog = DishCatalog::builtin().unwrap();
        let mut dishes = catalog.dishes().to_vec();
        dishes[2].nutrition.fat_grams = -1.0;
        assert!(DishCatalog::from_records(dishes).is_err());
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(DishCatalog::from_records(Vec::new()).is_err());
    }

    #[test]
    fn test_save_and_load_catalog() {
        let catalog = DishCatalog::builtin().unwrap();
        let temp_file = NamedTempFile::new().unwrap();

        catalog.save(temp_file.path()).unwrap();
        let loaded = DishCatalog::load(temp_file.path()).unwrap();

        assert_eq!(loaded.len(), catalog.len());
        assert_eq!(loaded.dishes()[3], catalog.dishes()[3]);
    }

    #[test]
    fn test_texture_groups() {
        assert!(Texture::Crispy.is_coarse());
        assert!(Texture::Creamy.is_fine());
        assert!(!Texture::Mixed.is_coarse() && !Texture::Mixed.is_fine());
    }
}
