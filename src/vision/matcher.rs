//! Dish Matcher
//!
//! Turns class probabilities or hand-crafted features into a short ranked
//! list of dishes. Never fails: a weak match is reported through
//! `is_confident_match`, not as an error.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use tracing::{debug, warn};

use super::features::{ColorBucket, FeatureVector};
use crate::catalog::{ClassMap, DishCatalog, DishRecord};
use crate::config::MatcherSettings;

/// Confidence of the first backfilled dish when nothing scored
const BACKFILL_CONFIDENCE: f32 = 0.25;
const BACKFILL_MATCH_SCORE: f32 = 0.3;

/// Upper bound on the ranked list, whatever the configuration says
pub const MAX_RESULTS: usize = 4;

/// One ranked dish
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub dish: DishRecord,
    /// Probability-like score in [0, 1]
    pub confidence: f32,
    /// Secondary ranking signal in [0, 1]
    pub match_score: f32,
}

/// Ranked results plus the confidence gate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Sorted by descending confidence, at most `max_results` long
    pub results: Vec<PredictionResult>,
    /// Whether the top result clears the confidence floor
    pub is_confident_match: bool,
}

/// Ranks catalog dishes against classifier output or image features
#[derive(Debug, Clone)]
pub struct DishMatcher {
    catalog: DishCatalog,
    settings: MatcherSettings,
}

impl DishMatcher {
    pub fn new(catalog: DishCatalog, mut settings: MatcherSettings) -> Self {
        let max_results = settings.max_results.clamp(1, MAX_RESULTS);
        if max_results != settings.max_results {
            warn!(
                "matcher.max_results = {} is out of range, using {}",
                settings.max_results, max_results
            );
            settings.max_results = max_results;
        }
        Self { catalog, settings }
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    /// Rank dishes straight from class probabilities
    ///
    /// Confidence and match score are the probability. Classes without a
    /// dish are skipped.
    pub fn match_probabilities(&self, probabilities: &[f32], class_map: &ClassMap) -> MatchOutcome {
        let mut ranked: Vec<(usize, f32)> = probabilities
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for (index, probability) in ranked {
            if results.len() == self.settings.max_results {
                break;
            }

            let Some(dish) = class_map.dish_id(index).and_then(|id| self.catalog.get(id)) else {
                debug!("Skipping model class {} with no dish", index);
                continue;
            };
            if !seen.insert(dish.id.clone()) {
                continue;
            }

            let probability = probability.clamp(0.0, 1.0);
            results.push(PredictionResult {
                dish: dish.clone(),
                confidence: probability,
                match_score: probability,
            });
        }

        self.finish(results)
    }

    /// Rank dishes by colour and texture agreement
    pub fn match_features(&self, features: &FeatureVector) -> MatchOutcome {
        let settings = &self.settings;
        let mut rng = self.rng_for(features);
        let top_color = features.dominant_color();

        let mut scored: Vec<(&DishRecord, f32)> = self
            .catalog
            .dishes()
            .iter()
            .map(|dish| {
                let mut score = self.score_dish(dish, features, top_color);
                if settings.jitter > 0.0 {
                    score += rng.gen_range(-settings.jitter..=settings.jitter);
                }
                (dish, score.max(0.0))
            })
            .collect();

        // Stable: equal scores keep catalog order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let max_score = self.max_score();
        let top_score = scored.first().map(|(_, s)| *s).unwrap_or(0.0);
        let strength = (top_score / max_score).min(1.0);
        let boost = if features.embedding.is_some() {
            1.0 + settings.embedding_boost
        } else {
            1.0
        };

        let mut results: Vec<PredictionResult> = scored
            .iter()
            .filter(|(_, score)| *score > settings.min_score)
            .take(settings.max_results)
            .enumerate()
            .map(|(rank, (dish, score))| {
                let relative = score / top_score;
                let confidence = settings.confidence_ceiling
                    * strength
                    * relative
                    * settings.rank_decay.powi(rank as i32)
                    * boost;
                PredictionResult {
                    dish: (*dish).clone(),
                    confidence: confidence.clamp(0.0, 1.0),
                    match_score: (score / max_score).clamp(0.0, 1.0),
                }
            })
            .collect();

        let wanted = settings.min_candidates.min(settings.max_results);
        if results.len() < wanted {
            self.backfill(&mut results, wanted, &mut rng);
        }

        debug!(
            "Heuristic match: top colour {:?}, top score {:.3} / {:.3}, {} results",
            top_color,
            top_score,
            max_score,
            results.len()
        );

        self.finish(results)
    }

    fn score_dish(&self, dish: &DishRecord, features: &FeatureVector, top_color: Option<ColorBucket>) -> f32 {
        let settings = &self.settings;
        let visual = &dish.visual;

        let dominant: f32 = visual
            .dominant_colors
            .iter()
            .map(|c| features.fraction(*c))
            .sum();
        let secondary: f32 = visual
            .secondary_colors
            .iter()
            .map(|c| features.fraction(*c))
            .sum();

        let mut score = dominant * settings.dominant_weight + secondary * settings.secondary_weight;

        if top_color.is_some_and(|top| visual.dominant_colors.contains(&top)) {
            score += settings.top_color_bonus;
        }

        let texture_agrees = (visual.texture.is_coarse()
            && features.edge_density > settings.coarse_edge_density)
            || (visual.texture.is_fine() && features.edge_density < settings.fine_edge_density);
        if texture_agrees {
            score += settings.texture_bonus;
        }

        score
    }

    /// Best achievable score: colour fractions sum to at most 1
    fn max_score(&self) -> f32 {
        let s = &self.settings;
        (s.dominant_weight.max(s.secondary_weight) + s.top_color_bonus + s.texture_bonus).max(f32::EPSILON)
    }

    /// Seeded when configured; otherwise entropy if jitter is on, else
    /// derived from the features so identical inputs rank identically
    fn rng_for(&self, features: &FeatureVector) -> StdRng {
        match self.settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None if self.settings.jitter > 0.0 => StdRng::from_entropy(),
            None => StdRng::seed_from_u64(fingerprint(features)),
        }
    }

    /// Pad with unscored dishes at low, decaying confidence
    fn backfill(&self, results: &mut Vec<PredictionResult>, wanted: usize, rng: &mut StdRng) {
        let taken: HashSet<&str> = results.iter().map(|r| r.dish.id.as_str()).collect();
        let mut pool: Vec<&DishRecord> = self
            .catalog
            .dishes()
            .iter()
            .filter(|d| !taken.contains(d.id.as_str()))
            .collect();
        pool.shuffle(rng);

        let decay = self.settings.rank_decay;
        let mut confidence = results
            .last()
            .map_or(BACKFILL_CONFIDENCE, |r| r.confidence.min(BACKFILL_CONFIDENCE));
        let mut match_score = results
            .last()
            .map_or(BACKFILL_MATCH_SCORE, |r| r.match_score.min(BACKFILL_MATCH_SCORE));

        let needed = wanted.saturating_sub(results.len());
        for dish in pool.into_iter().take(needed) {
            if !results.is_empty() {
                confidence *= decay;
                match_score *= decay;
            }
            results.push(PredictionResult {
                dish: dish.clone(),
                confidence,
                match_score,
            });
        }
    }

    fn finish(&self, mut results: Vec<PredictionResult>) -> MatchOutcome {
        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results.truncate(self.settings.max_results);

        let is_confident_match = results
            .first()
            .is_some_and(|r| r.confidence >= self.settings.confidence_floor);

        MatchOutcome {
            results,
            is_confident_match,
        }
    }
}

fn fingerprint(features: &FeatureVector) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (bucket, fraction) in &features.color_histogram {
        bucket.hash(&mut hasher);
        fraction.to_bits().hash(&mut hasher);
    }
    features.brightness.to_bits().hash(&mut hasher);
    features.edge_density.to_bits().hash(&mut hasher);
    hasher.finish()
}
