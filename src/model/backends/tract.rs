#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::frame::{FrameView, RGB_CHANNELS};
use crate::model::backend::{ModelVariant, PoseFault, PoseModel};
use crate::model::result::{Keypoint, Pose, COCO_KEYPOINTS};

/// Values per subject in the multi-pose output: 17 × (y, x, score) + box (5).
const MULTIPOSE_STRIDE: usize = 56;

/// Tract-based MoveNet backend.
///
/// Loads a local ONNX export of MoveNet (NHWC int32 input) and decodes its
/// normalised (y, x, score) output into the frame's pixel space. No network I/O.
pub struct TractPoseModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    variant: ModelVariant,
    input_width: u32,
    input_height: u32,
}

impl TractPoseModel {
    pub fn new<P: AsRef<Path>>(model_path: P, variant: ModelVariant) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (input_width, input_height) = variant.input_size();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    i32::datum_type(),
                    tvec!(1, input_height as usize, input_width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            variant,
            input_width,
            input_height,
        })
    }

    /// Nearest-neighbour sample of the frame into the model's input grid.
    fn build_input(&self, frame: &FrameView<'_>) -> Result<Tensor> {
        let pixels = frame.pixels();
        let (fw, fh) = (frame.width() as usize, frame.height() as usize);
        let expected = fw
            .checked_mul(fh)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }

        let (iw, ih) = (self.input_width as usize, self.input_height as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, ih, iw, 3), |(_, y, x, channel)| {
            let sy = (y * fh / ih).min(fh - 1);
            let sx = (x * fw / iw).min(fw - 1);
            pixels[(sy * fw + sx) * RGB_CHANNELS + channel] as i32
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &FrameView<'_>) -> Result<Vec<Pose>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let values: Vec<f32> = values.iter().copied().collect();
        let (fw, fh) = (frame.width() as f32, frame.height() as f32);

        let decode_subject = |chunk: &[f32]| -> Pose {
            let keypoints = COCO_KEYPOINTS
                .iter()
                .enumerate()
                .map(|(i, name)| Keypoint {
                    name: (*name).to_string(),
                    x: chunk[i * 3 + 1] * fw,
                    y: chunk[i * 3] * fh,
                    score: Some(chunk[i * 3 + 2]),
                })
                .collect();
            Pose {
                keypoints,
                score: None,
            }
        };

        match self.variant {
            ModelVariant::MultiPoseLightning => {
                if values.len() % MULTIPOSE_STRIDE != 0 {
                    return Err(anyhow!(
                        "multi-pose output length {} is not a multiple of {}",
                        values.len(),
                        MULTIPOSE_STRIDE
                    ));
                }
                let mut poses: Vec<Pose> = values
                    .chunks_exact(MULTIPOSE_STRIDE)
                    .take(self.variant.max_poses())
                    .map(|chunk| {
                        let mut pose = decode_subject(chunk);
                        pose.score = Some(chunk[MULTIPOSE_STRIDE - 1]);
                        pose
                    })
                    .collect();
                poses.sort_by(|a, b| {
                    b.score
                        .unwrap_or(0.0)
                        .total_cmp(&a.score.unwrap_or(0.0))
                });
                Ok(poses)
            }
            _ => {
                let needed = COCO_KEYPOINTS.len() * 3;
                if values.len() < needed {
                    return Err(anyhow!(
                        "single-pose output has {} values, expected {}",
                        values.len(),
                        needed
                    ));
                }
                Ok(vec![decode_subject(&values[..needed])])
            }
        }
    }
}

impl PoseModel for TractPoseModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn warm_up(&mut self) -> Result<()> {
        let (iw, ih) = (self.input_width as usize, self.input_height as usize);
        let input = tract_ndarray::Array4::<i32>::zeros((1, ih, iw, 3)).into_tensor();
        self.model
            .run(tvec!(input.into()))
            .map_err(|err| PoseFault::fatal(format!("warm-up inference failed: {}", err)))?;
        Ok(())
    }

    fn estimate(&mut self, frame: &FrameView<'_>, _timestamp: Duration) -> Result<Vec<Pose>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }
}
