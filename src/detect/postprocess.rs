//! YOLOv8 head decoding and non-maximum suppression.
//!
//! Kept free of any inference runtime so the math is testable without model files.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection, DetectionSet, WasteClass};

#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    /// Hard confidence cutoff.
    pub confidence: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

/// Candidate before class ids are checked against `WasteClass`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub class_id: usize,
}

/// Decode a YOLOv8 output laid out as `[4 + num_classes, candidates]` (batch dimension
/// removed). Rows 0..4 are centre-x, centre-y, width, height; the remaining rows are per-class
/// scores. Boxes stay in model-input coordinates.
pub fn decode_yolov8(
    data: &[f32],
    channels: usize,
    candidates: usize,
    params: &DecodeParams,
) -> Result<Vec<RawDetection>> {
    if channels <= 4 {
        return Err(anyhow!(
            "YOLO output needs more than 4 channels, got {}",
            channels
        ));
    }
    let expected = channels
        .checked_mul(candidates)
        .ok_or_else(|| anyhow!("YOLO output shape overflows"))?;
    if data.len() != expected {
        return Err(anyhow!(
            "YOLO output length {} does not match shape [{}, {}]",
            data.len(),
            channels,
            candidates
        ));
    }

    let at = |row: usize, col: usize| data[row * candidates + col];
    let mut detections = Vec::new();
    for i in 0..candidates {
        let (class_id, score) = (4..channels)
            .map(|row| (row - 4, at(row, i)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.confidence {
            continue;
        }
        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
            continue;
        }
        detections.push(RawDetection {
            bbox: BoundingBox::from_center(cx, cy, w, h),
            score: score.min(1.0),
            class_id,
        });
    }

    let mut kept = non_max_suppression(detections, params.iou_threshold);
    kept.truncate(params.max_detections);
    Ok(kept)
}

/// Class-wise NMS. Output is sorted by descending score.
pub fn non_max_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[j].class_id != detections[i].class_id {
                continue;
            }
            if detections[i].bbox.iou(&detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }
    keep
}

/// Rescale boxes from model-input to frame coordinates and map class ids.
///
/// Fails on the first id outside the trained classes.
pub fn to_detection_set(raw: Vec<RawDetection>, scale_x: f32, scale_y: f32) -> Result<DetectionSet> {
    let detections = raw
        .into_iter()
        .map(|r| -> Result<Detection> {
            let class = WasteClass::from_class_id(r.class_id)?;
            Ok(Detection::new(r.bbox.scale(scale_x, scale_y), r.score, class))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DetectionSet::new(detections))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SorterError;

    /// Builds a `[4 + classes, n]` tensor from per-candidate rows.
    fn tensor(classes: usize, rows: &[([f32; 4], Vec<f32>)]) -> Vec<f32> {
        let channels = 4 + classes;
        let n = rows.len();
        let mut data = vec![0.0f32; channels * n];
        for (i, (bbox, scores)) in rows.iter().enumerate() {
            for (c, v) in bbox.iter().enumerate() {
                data[c * n + i] = *v;
            }
            for (c, v) in scores.iter().enumerate() {
                data[(4 + c) * n + i] = *v;
            }
        }
        data
    }

    #[test]
    fn decodes_candidates_above_cutoff() -> Result<()> {
        let data = tensor(
            3,
            &[
                ([50.0, 50.0, 20.0, 20.0], vec![0.9, 0.05, 0.01]),
                ([200.0, 200.0, 40.0, 40.0], vec![0.1, 0.2, 0.1]),
                ([120.0, 80.0, 10.0, 30.0], vec![0.0, 0.1, 0.7]),
            ],
        );
        let out = decode_yolov8(&data, 7, 3, &DecodeParams::default())?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].class_id, 0);
        assert_eq!(out[0].bbox, BoundingBox::new(40.0, 40.0, 60.0, 60.0));
        assert_eq!(out[1].class_id, 2);
        Ok(())
    }

    #[test]
    fn suppresses_overlapping_boxes_of_same_class() -> Result<()> {
        let data = tensor(
            3,
            &[
                ([50.0, 50.0, 20.0, 20.0], vec![0.8, 0.0, 0.0]),
                ([51.0, 50.0, 20.0, 20.0], vec![0.6, 0.0, 0.0]),
                ([51.0, 50.0, 20.0, 20.0], vec![0.0, 0.7, 0.0]),
            ],
        );
        let out = decode_yolov8(&data, 7, 3, &DecodeParams::default())?;
        let classes: Vec<usize> = out.iter().map(|d| d.class_id).collect();
        assert_eq!(classes, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_shape() {
        assert!(decode_yolov8(&[0.0; 10], 7, 3, &DecodeParams::default()).is_err());
        assert!(decode_yolov8(&[0.0; 12], 4, 3, &DecodeParams::default()).is_err());
    }

    #[test]
    fn unknown_class_id_fails_mapping() {
        let raw = vec![RawDetection {
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            score: 0.9,
            class_id: 5,
        }];
        let err = to_detection_set(raw, 1.0, 1.0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SorterError>(),
            Some(SorterError::UnknownClassId(5))
        ));
    }

    #[test]
    fn mapping_rescales_boxes() -> Result<()> {
        let raw = vec![RawDetection {
            bbox: BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            score: 0.5,
            class_id: 1,
        }];
        let set = to_detection_set(raw, 2.0, 1.5)?;
        let det = set.iter().next().expect("one detection");
        assert_eq!(det.class, WasteClass::NonOrganic);
        assert_eq!(det.bbox, BoundingBox::new(20.0, 15.0, 40.0, 30.0));
        Ok(())
    }
}
