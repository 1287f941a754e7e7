use crate::config::DetectorConfig;
use crate::error::{Result, StudioError};
use crate::utils;
use nalgebra::SVector;
use num_traits::cast::ToPrimitive;
use opencv::{
    core::{Mat, Size, CV_32F},
    imgproc,
    prelude::*,
};
use std::path::Path;
use tch::{Device, Kind, Tensor};
use tracing::debug;

/// A single detection in frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    pub tlwh: SVector<f32, 4>,
    pub confidence: f32,
    pub class_id: i32,
}

impl Detection {
    pub fn new(tlwh: SVector<f32, 4>, confidence: f32, class_id: i32) -> Self {
        Self {
            tlwh,
            confidence,
            class_id,
        }
    }

    pub fn tlwh(&self) -> &SVector<f32, 4> {
        &self.tlwh
    }

    pub fn tlwh_array(&self) -> [f32; 4] {
        [self.tlwh[0], self.tlwh[1], self.tlwh[2], self.tlwh[3]]
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Raw output layouts produced by exported YOLO TorchScript graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// `[1, 4 + nc, anchors]`, no objectness column (YOLOv8 and later).
    ChannelsFirst,
    /// `[1, anchors, 5 + nc]` with objectness at index 4 (YOLOv5/v7).
    AnchorsFirst,
}

impl OutputLayout {
    pub fn infer(shape: &[i64]) -> Option<Self> {
        if shape.len() != 3 || shape[0] != 1 {
            return None;
        }
        if shape[1] >= 5 && shape[1] < shape[2] {
            Some(OutputLayout::ChannelsFirst)
        } else if shape[2] >= 6 {
            Some(OutputLayout::AnchorsFirst)
        } else {
            None
        }
    }
}

/// Wraps a YOLO TorchScript module.
pub struct Detector {
    model: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Allowed class ids; empty keeps all.
    pub classes: Vec<i32>,
}

impl Detector {
    /// Load TorchScript weights onto "cpu" or "cuda" (falls back to CPU).
    pub fn new(model_path: &Path, cfg: &DetectorConfig) -> Result<Self> {
        let device = if cfg.device == "cuda" && tch::Cuda::is_available() {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let mut model = tch::CModule::load_on_device(model_path, device)?;
        model.set_eval();

        Ok(Detector {
            model,
            device,
            input_size: (cfg.input_size[0] as i64, cfg.input_size[1] as i64),
            conf_threshold: cfg.conf_threshold,
            nms_threshold: cfg.nms_threshold,
            classes: cfg.classes.clone(),
        })
    }

    /// Resize, convert BGR to RGB, scale to [0,1] and lay out as [1, 3, H, W].
    fn preprocess(&self, frame: &Mat) -> Result<Tensor> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.input_size.0 as i32, self.input_size.1 as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&resized, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32F, 1.0 / 255.0, 0.0)?;

        let rows = float_mat.rows() as i64;
        let cols = float_mat.cols() as i64;
        let channels = float_mat.channels() as i64;
        let data: Vec<f32> = float_mat
            .data_bytes()?
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let tensor = Tensor::from_slice(&data)
            .reshape(&[rows, cols, channels])
            .permute(&[2, 0, 1])
            .unsqueeze(0)
            .to_device(self.device)
            .to_kind(Kind::Float);

        Ok(tensor)
    }

    fn inference(&self, input: &Tensor) -> Result<Tensor> {
        let output = tch::no_grad(|| self.model.forward_ts(&[input]))?;
        Ok(output)
    }

    /// Decode raw output into detections scaled back to the frame size.
    fn postprocess(&self, output: &Tensor, frame_size: (i32, i32)) -> Result<Vec<Detection>> {
        let shape = output.size();
        let layout = OutputLayout::infer(&shape).ok_or_else(|| {
            StudioError::detection("<tensor>", format!("unknown output shape {:?}", shape))
        })?;

        // Normalize to [anchors, values].
        let rows = match layout {
            OutputLayout::ChannelsFirst => output.squeeze_dim(0).transpose(0, 1),
            OutputLayout::AnchorsFirst => output.squeeze_dim(0),
        }
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous();
        let n_anchors = rows.size()[0] as usize;
        let n_values = rows.size()[1] as usize;
        let data = Vec::<f32>::try_from(&rows.flatten(0, -1))?;

        let (frame_w, frame_h) = frame_size;
        let scale_w = frame_w as f32 / self.input_size.0 as f32;
        let scale_h = frame_h as f32 / self.input_size.1 as f32;

        let mut boxes = Vec::new();
        let mut scores = Vec::new();
        let mut class_ids = Vec::new();

        for row in data.chunks_exact(n_values).take(n_anchors) {
            let (objectness, class_scores) = match layout {
                OutputLayout::ChannelsFirst => (1.0, &row[4..]),
                OutputLayout::AnchorsFirst => (row[4], &row[5..]),
            };
            let Some((class_idx, class_score)) = class_scores
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            let score = objectness * class_score;
            if score < self.conf_threshold {
                continue;
            }
            let class_id = class_idx.to_i32().unwrap_or(i32::MAX);
            if !self.classes.is_empty() && !self.classes.contains(&class_id) {
                continue;
            }

            // Centre-format box in model input pixels.
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            boxes.push([
                (cx - w / 2.0) * scale_w,
                (cy - h / 2.0) * scale_h,
                w * scale_w,
                h * scale_h,
            ]);
            scores.push(score);
            class_ids.push(class_id);
        }

        let keep = utils::nms(&boxes, &scores, &class_ids, self.nms_threshold);
        debug!(
            candidates = boxes.len(),
            kept = keep.len(),
            "postprocess complete"
        );

        Ok(keep
            .into_iter()
            .map(|i| Detection::new(SVector::from(boxes[i]), scores[i], class_ids[i]))
            .collect())
    }

    /// Detect objects in a BGR frame.
    pub fn detect(&self, frame: &Mat) -> Result<Vec<Detection>> {
        let frame_size = (frame.cols(), frame.rows());
        let input = self.preprocess(frame)?;
        let output = self.inference(&input)?;
        self.postprocess(&output, frame_size)
    }

    /// Shape of the raw output for a blank frame, for diagnostics.
    pub fn probe_output_shape(&self) -> Result<Vec<i64>> {
        let input = Tensor::zeros(
            &[1, 3, self.input_size.1, self.input_size.0],
            (Kind::Float, self.device),
        );
        Ok(self.inference(&input)?.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};
    use std::path::PathBuf;

    fn weights() -> Option<PathBuf> {
        let path = PathBuf::from("weights/yolov8n.torchscript");
        path.exists().then_some(path)
    }

    #[test]
    fn layout_inference() {
        assert_eq!(OutputLayout::infer(&[1, 84, 8400]), Some(OutputLayout::ChannelsFirst));
        assert_eq!(OutputLayout::infer(&[1, 25200, 85]), Some(OutputLayout::AnchorsFirst));
        assert_eq!(OutputLayout::infer(&[1, 10]), None);
        assert_eq!(OutputLayout::infer(&[2, 84, 8400]), None);
    }

    #[test]
    fn missing_weights_fail_to_load() {
        let err = Detector::new(Path::new("weights/does-not-exist.pt"), &DetectorConfig::default());
        assert!(matches!(err, Err(StudioError::Torch(_))));
    }

    #[test]
    fn test_end_to_end() {
        let Some(path) = weights() else {
            return; // Skip if weights not available
        };
        let detector = Detector::new(&path, &DetectorConfig::default()).unwrap();
        let frame =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(127.0)).unwrap();

        let detections = detector.detect(&frame).unwrap();
        for det in &detections {
            assert!(det.confidence >= detector.conf_threshold);
            assert!(det.tlwh[2] > 0.0 && det.tlwh[3] > 0.0);
        }
    }
}
