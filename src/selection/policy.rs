//! Selection policy: label weights.
//!
//! `priority_score = confidence * class_weight(label)`. The weight table is
//! mission configuration (e.g. wildfire=1.0, ship=0.7, cloud=0.1), uploaded
//! with the rest of the config file; labels without an entry fall back to
//! the default weight.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::classify::Classification;

fn default_weight() -> f64 {
    1.0
}

/// Configurable label -> weight mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Weight applied to labels missing from `class_weights`.
    #[serde(default = "default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub class_weights: HashMap<String, f64>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            default_weight: default_weight(),
            class_weights: HashMap::new(),
        }
    }
}

impl SelectionPolicy {
    pub fn with_weights(weights: &[(&str, f64)]) -> Self {
        Self {
            default_weight: default_weight(),
            class_weights: weights
                .iter()
                .map(|(label, w)| (label.to_string(), *w))
                .collect(),
        }
    }

    pub fn weight(&self, label: &str) -> f64 {
        self.class_weights
            .get(label)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Priority score for a classification.
    pub fn score(&self, classification: &Classification) -> f64 {
        classification.confidence * self.weight(&classification.label)
    }
}
