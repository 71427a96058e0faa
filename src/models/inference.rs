//! ONNX Runtime backed risk scorer

use crate::models::loader::{LoadedModel, ModelLoader};
use crate::models::scorer::RiskScorer;
use anyhow::{anyhow, Context, Result};
use ort::memory::Allocator;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Binary classifier exported to ONNX; the fraud class is index 1.
///
/// Sessions need exclusive access to run, so calls are serialized.
pub struct OnnxScorer {
    name: String,
    model: Mutex<LoadedModel>,
}

impl OnnxScorer {
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let loader = ModelLoader::with_threads(onnx_threads)?;
        let model = loader.load_model(path)?;
        Ok(Self {
            name: model.name.clone(),
            model: Mutex::new(model),
        })
    }

    fn run(&self, features: &[f32]) -> Result<f64> {
        let mut guard = self
            .model
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let model = &mut *guard;

        // Shape [1, num_features]
        let shape = vec![1_i64, features.len() as i64];
        let input_tensor =
            Tensor::from_array((shape, features.to_vec())).context("Failed to create input tensor")?;

        let outputs = model
            .session
            .run(ort::inputs![model.input_name.as_str() => input_tensor])?;

        extract_probability(&outputs, &model.output_name, &model.name)
    }
}

impl RiskScorer for OnnxScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &[f32]) -> Result<f64> {
        self.run(features)
    }
}

/// Handles tensor outputs (XGBoost, random forest) and seq(map) outputs
/// (CatBoost, LightGBM).
fn extract_probability(
    outputs: &ort::session::SessionOutputs,
    output_name: &str,
    model_name: &str,
) -> Result<f64> {
    if let Some(output) = outputs.get(output_name) {
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            let prob = fraud_prob_from_tensor(&dims, data);
            debug!(model = %model_name, prob = prob, "Extracted from tensor");
            return Ok(prob);
        }
        if DynSequenceValueType::can_downcast(&output.dtype()) {
            if let Ok(prob) = extract_from_sequence_map(output) {
                debug!(model = %model_name, prob = prob, "Extracted from seq(map)");
                return Ok(prob);
            }
        }
    }

    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            let dims: Vec<i64> = shape.iter().copied().collect();
            return Ok(fraud_prob_from_tensor(&dims, data));
        }
        if DynSequenceValueType::can_downcast(&output.dtype()) {
            if let Ok(prob) = extract_from_sequence_map(&output) {
                return Ok(prob);
            }
        }
    }

    warn!(model = %model_name, "Model produced no usable probability output");
    Err(anyhow!("no probability output from {model_name}"))
}

fn extract_from_sequence_map(output: &ort::value::DynValue) -> Result<f64> {
    let allocator = Allocator::default();
    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow!("Failed to downcast to sequence: {}", e))?;
    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
    let first = maps.first().ok_or_else(|| anyhow!("Empty sequence"))?;
    let pairs = first.try_extract_key_values::<i64, f32>()?;

    if let Some((_, prob)) = pairs.iter().find(|(class, _)| *class == 1) {
        return Ok(*prob as f64);
    }
    if let Some((_, prob)) = pairs.iter().find(|(class, _)| *class == 0) {
        return Ok(1.0 - *prob as f64);
    }
    Err(anyhow!("No probability found in map"))
}

/// Pick the fraud-class probability out of a `[batch, classes]`,
/// `[classes]` or scalar-like tensor.
fn fraud_prob_from_tensor(dims: &[i64], data: &[f32]) -> f64 {
    let classes = dims.last().copied().unwrap_or(0);
    match (dims.len(), classes) {
        (1 | 2, c) if c >= 2 && data.len() > 1 => data[1] as f64,
        (1 | 2, 1) if !data.is_empty() => data[0] as f64,
        _ => data.last().map(|&v| v as f64).unwrap_or(0.5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraud_prob_from_tensor_shapes() {
        assert_eq!(fraud_prob_from_tensor(&[1, 2], &[0.3, 0.7]), 0.7f32 as f64);
        assert_eq!(fraud_prob_from_tensor(&[2], &[0.9, 0.1]), 0.1f32 as f64);
        assert_eq!(fraud_prob_from_tensor(&[1, 1], &[0.25]), 0.25);
        assert_eq!(fraud_prob_from_tensor(&[1, 1, 3], &[0.1, 0.2, 0.4]), 0.4f32 as f64);
        assert_eq!(fraud_prob_from_tensor(&[], &[]), 0.5);
    }
}
