//! Frame-level voting over a detection set.

use crate::detect::{DetectionSet, WasteClass};

/// Outcome of classifying one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    Organic,
    NonOrganic,
    /// Mixed waste, or anything ambiguous.
    Mixed,
    /// Nothing detected; feeds the retry policy.
    NoResult,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Self::Organic => "organic",
            Self::NonOrganic => "non-organic",
            Self::Mixed => "mixed",
            Self::NoResult => "no-result",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Collapse a detection set to a single verdict.
///
/// Only the distinct labels matter, not their counts or scores:
/// any `mixed` label, or `organic` together with `non-organic`, is `Mixed`.
pub fn vote(detections: &DetectionSet) -> Verdict {
    let organic = detections.contains(WasteClass::Organic);
    let non_organic = detections.contains(WasteClass::NonOrganic);
    let mixed = detections.contains(WasteClass::Mixed);

    match (organic, non_organic, mixed) {
        (_, _, true) | (true, true, _) => Verdict::Mixed,
        (true, false, false) => Verdict::Organic,
        (false, true, false) => Verdict::NonOrganic,
        (false, false, false) => Verdict::NoResult,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection};

    fn set(classes: &[(WasteClass, f32)]) -> DetectionSet {
        classes
            .iter()
            .map(|&(class, score)| {
                Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), score, class)
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn empty_set_is_no_result() {
        assert_eq!(vote(&DetectionSet::empty()), Verdict::NoResult);
    }

    #[test]
    fn organic_only_is_organic() {
        let detections = set(&[(WasteClass::Organic, 0.9), (WasteClass::Organic, 0.6)]);
        assert_eq!(vote(&detections), Verdict::Organic);
    }

    #[test]
    fn non_organic_only_is_non_organic() {
        let detections = set(&[(WasteClass::NonOrganic, 0.3)]);
        assert_eq!(vote(&detections), Verdict::NonOrganic);
    }

    #[test]
    fn organic_with_non_organic_is_mixed_in_any_proportion() {
        for organic_count in 1..6 {
            for non_organic_count in 1..6 {
                let mut classes = vec![(WasteClass::Organic, 0.99); organic_count];
                classes.extend(vec![(WasteClass::NonOrganic, 0.26); non_organic_count]);
                assert_eq!(vote(&set(&classes)), Verdict::Mixed);
            }
        }
    }

    #[test]
    fn any_mixed_label_wins() {
        let detections = set(&[(WasteClass::Organic, 0.95), (WasteClass::Mixed, 0.3)]);
        assert_eq!(vote(&detections), Verdict::Mixed);
        assert_eq!(vote(&set(&[(WasteClass::Mixed, 0.5)])), Verdict::Mixed);
    }
}
