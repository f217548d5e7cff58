//! Model output index to dish id mapping

use tracing::warn;

use super::DishCatalog;

/// Maps classifier output indices to catalog dish ids
///
/// Indices whose label does not resolve against the catalog hold `None` and
/// are skipped by the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMap {
    entries: Vec<Option<String>>,
}

impl ClassMap {
    /// Build from the class labels declared in model metadata
    pub fn from_labels<S: AsRef<str>>(labels: &[S], catalog: &DishCatalog) -> Self {
        let entries = labels
            .iter()
            .enumerate()
            .map(|(index, label)| {
                let label = label.as_ref();
                let resolved = catalog.resolve_label(label).map(|d| d.id.clone());
                if resolved.is_none() {
                    warn!("Model class {} ('{}') has no matching dish", index, label);
                }
                resolved
            })
            .collect();

        Self { entries }
    }

    /// Fallback table derived from the catalog's `model_class` entries,
    /// in catalog order
    pub fn from_catalog(catalog: &DishCatalog) -> Self {
        let entries = catalog
            .dishes()
            .iter()
            .filter(|d| d.model_class.is_some())
            .map(|d| Some(d.id.clone()))
            .collect();

        Self { entries }
    }

    /// Dish id for an output index
    pub fn dish_id(&self, index: usize) -> Option<&str> {
        self.entries.get(index).and_then(|e| e.as_deref())
    }

    /// Number of model outputs covered
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of indices that resolve to a dish
    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}
