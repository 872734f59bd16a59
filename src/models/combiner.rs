//! Soft-voting combination of member probability vectors

use crate::error::PipelineError;
use ndarray::{Array1, ArrayView1};

/// Element-wise weighted average of probability vectors.
///
/// Normalizes by the sum of the weights actually present, so members
/// filtered out at load time change the blend instead of zeroing it.
pub fn weighted_average(
    outputs: &[(ArrayView1<'_, f32>, f64)],
) -> Result<Array1<f64>, PipelineError> {
    let (first, _) = outputs.first().ok_or(PipelineError::EmptyEnsemble)?;
    let classes = first.len();

    let mut weighted_sum = Array1::<f64>::zeros(classes);
    let mut total_weight = 0.0;

    for (probabilities, weight) in outputs {
        if probabilities.len() != classes {
            return Err(PipelineError::invalid(format!(
                "members disagree on class count: {} vs {}",
                classes,
                probabilities.len()
            )));
        }

        weighted_sum
            .iter_mut()
            .zip(probabilities.iter())
            .for_each(|(acc, &p)| *acc += p as f64 * weight);
        total_weight += weight;
    }

    if total_weight > 0.0 {
        Ok(weighted_sum / total_weight)
    } else {
        Err(PipelineError::EmptyEnsemble)
    }
}

/// Probability mass on every class except `normal_index`
pub fn positive_mass(probabilities: &[f64], normal_index: usize) -> f64 {
    probabilities
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != normal_index)
        .map(|(_, p)| p)
        .sum()
}
