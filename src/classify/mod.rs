//! Static (single-frame) and dynamic (sequence) classifiers.
//!
//! Backends:
//! - `stub`: deterministic labels (testing)
//! - `http`: remote model service (feature: classifier-http)
//!
//! Dynamic requests are routed through a `ModelRegistry` keyed by `ModelVariant`.

mod backend;
mod backends;
mod registry;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{ClassifierBackend, ClassifierSettings};

pub use backend::{Classification, DynamicClassifier, ModelVariant, StaticClassifier};
#[cfg(feature = "classifier-http")]
pub use backends::{HttpDynamicClassifier, HttpStaticClassifier};
pub use backends::{StubDynamicClassifier, StubStaticClassifier};
pub use registry::ModelRegistry;

/// Build the configured single-frame classifier.
pub fn build_static(settings: &ClassifierSettings) -> Result<Arc<dyn StaticClassifier>> {
    let classifier: Arc<dyn StaticClassifier> = match settings.backend {
        ClassifierBackend::Stub => Arc::new(StubStaticClassifier::new()),
        ClassifierBackend::Http => {
            #[cfg(feature = "classifier-http")]
            {
                let url = settings.require_url()?;
                Arc::new(HttpStaticClassifier::new(url, settings.timeout)?)
            }
            #[cfg(not(feature = "classifier-http"))]
            {
                anyhow::bail!("http classifier requires the classifier-http feature")
            }
        }
    };
    log::info!("static classifier: {}", classifier.name());
    Ok(classifier)
}

/// Build the model registry used for sequence classification.
pub fn build_dynamic(settings: &ClassifierSettings) -> Result<Arc<ModelRegistry>> {
    let mut registry = ModelRegistry::new();
    match settings.backend {
        ClassifierBackend::Stub => registry.register(StubDynamicClassifier::new()),
        ClassifierBackend::Http => {
            #[cfg(feature = "classifier-http")]
            {
                let url = settings.require_url()?;
                registry.register(HttpDynamicClassifier::new(
                    url,
                    settings.timeout,
                    vec![settings.model_variant],
                )?);
            }
            #[cfg(not(feature = "classifier-http"))]
            {
                anyhow::bail!("http classifier requires the classifier-http feature")
            }
        }
    }
    log::info!(
        "dynamic classifier backends: {:?} (variant {})",
        registry.list(),
        settings.model_variant
    );
    Ok(Arc::new(registry))
}
