//! Landmark extraction.
//!
//! Turns an encoded frame into zero or more normalized hand poses (`FeatureVector`).
//! Backends:
//! - `stub`: deterministic pseudo-landmarks (testing)
//! - `process`: external program over stdin/stdout JSON

mod backend;
mod backends;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{ExtractorBackend, ExtractorSettings};

pub use backend::{Extraction, LandmarkExtractor};
pub use backends::{ProcessConfig, ProcessExtractor, StubExtractor};

/// Build the configured extraction backend.
pub fn build_extractor(settings: &ExtractorSettings) -> Result<Arc<dyn LandmarkExtractor>> {
    let extractor: Arc<dyn LandmarkExtractor> = match settings.backend {
        ExtractorBackend::Stub => Arc::new(StubExtractor::new()),
        ExtractorBackend::Process => Arc::new(ProcessExtractor::new(ProcessConfig {
            command: settings.command.clone(),
            args: settings.args.clone(),
            timeout: settings.timeout,
        })?),
    };
    extractor.warm_up()?;
    log::info!("landmark extractor: {}", extractor.name());
    Ok(extractor)
}
