use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::FeatureVector;

/// Outcome of one extraction call.
///
/// Zero vectors with `success = true` means no hand was found, which is not an error.
#[derive(Clone, Debug, Default)]
pub struct Extraction {
    pub success: bool,
    pub vectors: Vec<FeatureVector>,
    pub error: Option<String>,
}

impl Extraction {
    pub fn hands(vectors: Vec<FeatureVector>) -> Self {
        Self {
            success: true,
            vectors,
            error: None,
        }
    }

    pub fn no_hands() -> Self {
        Self::hands(Vec::new())
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            vectors: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Convert a failed extraction into an error.
    pub fn into_vectors(self) -> Result<Vec<FeatureVector>> {
        if self.success {
            Ok(self.vectors)
        } else {
            Err(anyhow!(
                "landmark extraction failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ))
        }
    }
}

/// Landmark extraction backend trait.
///
/// Backends are shared across connection handlers and the capture workers, so
/// `extract` takes `&self`. Implementations must treat frame bytes as read-only and
/// must not retain them past the call.
pub trait LandmarkExtractor: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Extract zero or more normalized hand poses from a frame.
    fn extract(&self, frame: &Frame) -> Result<Extraction>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
