//! Classification input seam.
//!
//! The inference engine is an external component: this module only defines
//! the result type it produces, the trait the coordinator calls through, and
//! a mock implementation for tests and ground simulation. A hard
//! classification failure is surfaced to the caller and the image is
//! discarded; nothing is ever stored unclassified.

mod mock;

pub use mock::MockClassifier;

use thiserror::Error;

/// Label and confidence produced by the inference component for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

impl Classification {
    /// Build a classification, clamping confidence into [0, 1].
    ///
    /// NaN is rejected at this boundary so the ordering logic downstream
    /// never sees one.
    pub fn new(label: impl Into<String>, confidence: f64) -> Result<Self, ClassifyError> {
        if confidence.is_nan() {
            return Err(ClassifyError::InvalidConfidence(confidence));
        }
        Ok(Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

/// Errors from the classification seam.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The inference component failed outright.
    #[error("classification failed: {0}")]
    ClassificationFailed(String),

    /// The inference component produced an unusable confidence value.
    #[error("invalid confidence value: {0}")]
    InvalidConfidence(f64),
}

/// Synchronous classification interface.
pub trait Classifier {
    fn classify(&mut self, image: &[u8]) -> Result<Classification, ClassifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_clamped() {
        let c = Classification::new("ship", 1.7).unwrap();
        assert_eq!(c.confidence, 1.0);
        let c = Classification::new("ship", -0.2).unwrap();
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn test_nan_rejected() {
        assert!(Classification::new("ship", f64::NAN).is_err());
    }
}
