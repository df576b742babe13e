//! Mock classifier for tests and ground simulation.
//!
//! Stands in for the CNN: picks a random label from a configured set and a
//! random confidence. The label set defaults to the classes the selection
//! policy examples use.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Classification, Classifier, ClassifyError};

/// Randomly classifying stand-in for the inference engine.
pub struct MockClassifier {
    labels: Vec<String>,
    rng: StdRng,
}

impl MockClassifier {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(labels: Vec<String>, seed: u64) -> Self {
        Self {
            labels,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new(vec![
            "wildfire".to_string(),
            "ship".to_string(),
            "cloud".to_string(),
        ])
    }
}

impl Classifier for MockClassifier {
    fn classify(&mut self, _image: &[u8]) -> Result<Classification, ClassifyError> {
        if self.labels.is_empty() {
            return Err(ClassifyError::ClassificationFailed(
                "no labels configured".to_string(),
            ));
        }
        let label = self.labels[self.rng.gen_range(0..self.labels.len())].clone();
        let confidence = self.rng.gen_range(0.0..=1.0);
        Classification::new(label, confidence)
    }
}
