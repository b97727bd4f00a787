//! ONNX classifier using tract
//!
//! Expects a classifier exported with a single `[1, N]` f32 input. Output 0
//! is either an integer label or a row of f32 class scores; output 1, when
//! present, holds the class probabilities. Export with zipmap disabled so
//! probabilities come back as a plain tensor.

use super::classifier::{Classification, Classifier, FeatureFrame};
use crate::error::ClassifierError;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

/// Inference latency above which a warning is logged
const MAX_INFERENCE_MS: u128 = 5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct OnnxClassifier {
    model: TractModel,
    columns: Vec<String>,
}

impl OnnxClassifier {
    /// Load a model from bytes for the given input columns
    pub fn from_bytes(model_bytes: &[u8], columns: Vec<String>) -> Result<Self> {
        let model = Self::load_model(model_bytes, columns.len())?;
        Ok(Self { model, columns })
    }

    pub fn from_file(path: impl AsRef<Path>, columns: Vec<String>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read model file {}", path.display()))?;
        let classifier = Self::from_bytes(&bytes, columns)
            .with_context(|| format!("Failed to load model {}", path.display()))?;
        info!(path = %path.display(), bytes = bytes.len(), "ONNX classifier loaded");
        Ok(classifier)
    }

    fn load_model(model_bytes: &[u8], num_features: usize) -> Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, num_features]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    fn frame_to_tensor(&self, frame: &FeatureFrame) -> Result<Tensor, ClassifierError> {
        let data: Vec<f32> = frame.values().iter().map(|v| *v as f32).collect();
        tract_ndarray::Array2::from_shape_vec((1, data.len()), data)
            .map(Tensor::from)
            .map_err(|e| ClassifierError::Inference(e.to_string()))
    }
}

impl Classifier for OnnxClassifier {
    fn input_columns(&self) -> &[String] {
        &self.columns
    }

    fn model_type(&self) -> &str {
        "onnx"
    }

    fn classify(&self, frame: &FeatureFrame) -> Result<Classification, ClassifierError> {
        frame.check_columns(&self.columns)?;
        let start = Instant::now();

        let input = self.frame_to_tensor(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        let first = outputs
            .first()
            .ok_or_else(|| ClassifierError::MalformedOutput("model produced no outputs".into()))?;
        let probabilities = outputs.get(1).map(|t| read_f32_row(t)).transpose()?;

        if first.datum_type().is_float() {
            // Scores only: the row is both the decision and the distribution
            let scores = read_f32_row(first)?;
            let class_index = argmax(&scores)
                .ok_or_else(|| ClassifierError::MalformedOutput("empty score row".into()))?;
            return Ok(Classification {
                class_index: class_index as i64,
                probabilities: probabilities.or(Some(scores)),
            });
        }

        let labels = first
            .cast_to::<i64>()
            .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?;
        let class_index = labels
            .as_slice::<i64>()
            .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?
            .first()
            .copied()
            .ok_or_else(|| ClassifierError::MalformedOutput("empty label output".into()))?;

        Ok(Classification {
            class_index,
            probabilities,
        })
    }
}

fn read_f32_row(tensor: &Tensor) -> Result<Vec<f64>, ClassifierError> {
    let values = tensor
        .cast_to::<f32>()
        .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?;
    let slice = values
        .as_slice::<f32>()
        .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?;
    Ok(slice.iter().map(|v| *v as f64).collect())
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}
