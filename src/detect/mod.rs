mod backend;
pub mod backends;
pub mod postprocess;
mod result;

use anyhow::Result;

use crate::config::DetectorSettings;
use crate::error::SorterError;

pub use backend::DetectorBackend;
pub use backends::{StubBackend, StubResponse};
pub use result::{BoundingBox, Detection, DetectionSet, WasteClass};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;

/// Build the configured detector backend.
///
/// Any failure here is a `ModelLoad` error: nothing can be classified without a model.
pub fn load_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => {
            log::warn!("detector: using stub backend, every frame yields no detections");
            Ok(Box::new(StubBackend::new()))
        }
        "tract" => load_tract(settings),
        other => Err(SorterError::model_load(
            settings.model_path.display().to_string(),
            format!("unknown detector backend '{}'", other),
        )
        .into()),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let mut backend = TractBackend::load(&settings.model_path, settings.input_size)?
        .with_thresholds(settings.confidence, settings.iou_threshold);
    backend.warm_up().map_err(|err| {
        SorterError::model_load(settings.model_path.display().to_string(), format!("warm-up failed: {:#}", err))
    })?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(SorterError::model_load(
        settings.model_path.display().to_string(),
        "the tract backend requires the backend-tract feature",
    )
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_loads_by_name() -> Result<()> {
        let settings = DetectorSettings {
            backend: "stub".to_string(),
            ..DetectorSettings::default()
        };
        assert_eq!(load_backend(&settings)?.name(), "stub");
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_without_feature_names_the_feature() {
        let err = match load_backend(&DetectorSettings::default()) {
            Ok(_) => panic!("tract must not load without its feature"),
            Err(err) => err,
        };
        assert!(matches!(
            err.downcast_ref::<SorterError>(),
            Some(SorterError::ModelLoad { reason, .. }) if reason.contains("backend-tract")
        ));
    }
}
