//! Learning-model capability
//!
//! The engine asks the model for extra suggestions and hands it the recorded
//! learning samples for training. The default model does neither.

use crate::core::{Device, LearningSample, PowerEvent};
use crate::inference::scoring::Suggestion;

pub trait LearningModel {
    /// Suggestions for an event among the candidate devices
    fn suggest(&self, event: &PowerEvent, candidates: &[Device]) -> Vec<Suggestion>;

    /// Train on the accumulated samples; returns whether training ran
    fn train(&mut self, samples: &[LearningSample]) -> bool;

    fn name(&self) -> &str;
}

/// Model that never suggests anything and accepts every training request
#[derive(Debug, Default)]
pub struct NoopModel;

impl LearningModel for NoopModel {
    fn suggest(&self, _event: &PowerEvent, _candidates: &[Device]) -> Vec<Suggestion> {
        Vec::new()
    }

    fn train(&mut self, samples: &[LearningSample]) -> bool {
        log::info!("Training model with {} data points (no-op model)", samples.len());
        true
    }

    fn name(&self) -> &str {
        "noop"
    }
}
