#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::postprocess::{decode_yolov8, to_detection_set, DecodeParams};
use crate::detect::result::DetectionSet;
use crate::error::SorterError;
use crate::frame::Frame;

/// Tract-based YOLOv8 backend.
///
/// Loads a local ONNX export with a fixed square input and runs it on CPU. Frames of any size
/// are resized to the model input; boxes are mapped back to frame coordinates.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    params: DecodeParams,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = Self::build_plan(model_path, input_size)
            .map_err(|err| SorterError::model_load(model_path.display().to_string(), format!("{:#}", err)))?;
        log::info!(
            "TractBackend: loaded {} (input {}x{})",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self {
            model,
            input_size,
            params: DecodeParams::default(),
        })
    }

    fn build_plan(model_path: &Path, input_size: u32) -> Result<TypedRunnableModel<TypedModel>> {
        let side = input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .context("failed to read ONNX model")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        Ok(plan)
    }

    /// Override the confidence cutoff and NMS overlap.
    pub fn with_thresholds(mut self, confidence: f32, iou_threshold: f32) -> Self {
        self.params.confidence = confidence;
        self.params.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame does not fit an {}x{} RGB image", frame.width, frame.height))?;
        let side = self.input_size;
        let resized = image::imageops::resize(&image, side, side, FilterType::Triangle);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionSet> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let (channels, candidates) = match shape.as_slice() {
            [1, channels, candidates] => (*channels, *candidates),
            other => return Err(anyhow!("unexpected YOLO output shape {:?}", other)),
        };
        let data: Vec<f32> = view.iter().copied().collect();

        let raw = decode_yolov8(&data, channels, candidates, &self.params)?;
        let side = self.input_size as f32;
        to_detection_set(raw, frame.width as f32 / side, frame.height as f32 / side)
    }

    fn warm_up(&mut self) -> Result<()> {
        let frame = Frame::solid(self.input_size, self.input_size, [114, 114, 114], 0)?;
        self.detect(&frame).map(|_| ())
    }
}
