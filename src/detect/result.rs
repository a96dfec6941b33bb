use crate::error::SorterError;

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box from centre point and size, as YOLO heads emit them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// Intersection over union. Degenerate or non-finite boxes yield 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }
        let inter = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }
        let iou = inter / union;
        if iou.is_finite() {
            iou.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Closed set of classes the model is trained on, in model output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WasteClass {
    Organic,
    NonOrganic,
    Mixed,
}

impl WasteClass {
    pub const ALL: [WasteClass; 3] = [Self::Organic, Self::NonOrganic, Self::Mixed];

    /// Map a model class index. Indices outside the trained classes are an error.
    pub fn from_class_id(id: usize) -> Result<Self, SorterError> {
        Self::ALL
            .get(id)
            .copied()
            .ok_or(SorterError::UnknownClassId(id))
    }

    pub fn class_id(self) -> usize {
        match self {
            Self::Organic => 0,
            Self::NonOrganic => 1,
            Self::Mixed => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Organic => "organic",
            Self::NonOrganic => "non-organic",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for WasteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence in `[0, 1]`.
    pub score: f32,
    pub class: WasteClass,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32, class: WasteClass) -> Self {
        Self { bbox, score, class }
    }
}

/// Detections produced by one inference call, in detector order. May be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn contains(&self, class: WasteClass) -> bool {
        self.detections.iter().any(|d| d.class == class)
    }

    /// Highest-scoring detection.
    pub fn best(&self) -> Option<&Detection> {
        self.detections
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

impl From<Vec<Detection>> for DetectionSet {
    fn from(detections: Vec<Detection>) -> Self {
        Self::new(detections)
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ids_follow_model_order() {
        for class in WasteClass::ALL {
            assert_eq!(WasteClass::from_class_id(class.class_id()).unwrap(), class);
        }
    }

    #[test]
    fn out_of_range_class_id_is_rejected() {
        assert!(matches!(
            WasteClass::from_class_id(3),
            Err(SorterError::UnknownClassId(3))
        ));
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn best_picks_highest_score() {
        let set = DetectionSet::new(vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.4, WasteClass::Mixed),
            Detection::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.9, WasteClass::Organic),
        ]);
        assert_eq!(set.best().map(|d| d.class), Some(WasteClass::Organic));
        assert!(DetectionSet::empty().best().is_none());
    }
}
