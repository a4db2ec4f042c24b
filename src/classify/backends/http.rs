//! HTTP classifier backends.
//!
//! Posts feature vectors and sequences to a model service:
//! - `POST {base}/api/predict-static-sign` with `{"landmarks": [..63..]}`
//! - `POST {base}/api/predict-dynamic-sign` with
//!   `{"landmarkSequence": [[..63..] x 30], "model_choice": "lstm"}`
//!
//! Both answer `{"success": true, "result": {"class": "..", "confidence": 0.93}}`.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::classify::backend::{
    Classification, DynamicClassifier, ModelVariant, StaticClassifier,
};
use crate::sequence::FeatureSequence;
use crate::FeatureVector;

const STATIC_PATH: &str = "api/predict-static-sign";
const DYNAMIC_PATH: &str = "api/predict-dynamic-sign";

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    success: bool,
    #[serde(default)]
    result: Option<Classification>,
    #[serde(default)]
    error: Option<String>,
}

fn endpoint(base: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(base).context("parse classifier url")?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(anyhow!(
            "classifier url must use http or https, got '{}'",
            base.scheme()
        ));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(path).context("build classifier endpoint")
}

fn post(url: &Url, timeout: Duration, body: serde_json::Value) -> Result<Classification> {
    let response = ureq::post(url.as_str())
        .timeout(timeout)
        .send_json(body)
        .with_context(|| format!("post to classifier {}", url))?;
    let parsed: PredictionResponse = response
        .into_json()
        .context("parse classifier response")?;
    if !parsed.success {
        return Err(anyhow!(
            "classifier error: {}",
            parsed.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    let result = parsed
        .result
        .ok_or_else(|| anyhow!("classifier response missing result"))?;
    Classification::new(result.label, result.confidence)
}

pub struct HttpStaticClassifier {
    url: Url,
    timeout: Duration,
}

impl HttpStaticClassifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: endpoint(base_url, STATIC_PATH)?,
            timeout,
        })
    }
}

impl StaticClassifier for HttpStaticClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    fn classify(&self, vector: &FeatureVector) -> Result<Classification> {
        post(&self.url, self.timeout, json!({ "landmarks": vector.values() }))
    }
}

pub struct HttpDynamicClassifier {
    url: Url,
    timeout: Duration,
    variants: Vec<ModelVariant>,
}

impl HttpDynamicClassifier {
    pub fn new(base_url: &str, timeout: Duration, variants: Vec<ModelVariant>) -> Result<Self> {
        if variants.is_empty() {
            return Err(anyhow!("http model backend needs at least one variant"));
        }
        Ok(Self {
            url: endpoint(base_url, DYNAMIC_PATH)?,
            timeout,
            variants,
        })
    }
}

impl DynamicClassifier for HttpDynamicClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    fn supports(&self, variant: ModelVariant) -> bool {
        self.variants.contains(&variant)
    }

    fn classify(
        &self,
        sequence: &FeatureSequence,
        variant: ModelVariant,
    ) -> Result<Classification> {
        post(
            &self.url,
            self.timeout,
            json!({
                "landmarkSequence": sequence.to_rows(),
                "model_choice": variant.as_str(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_paths() {
        assert_eq!(
            endpoint("http://127.0.0.1:8000", STATIC_PATH).unwrap().as_str(),
            "http://127.0.0.1:8000/api/predict-static-sign"
        );
        assert_eq!(
            endpoint("http://models.local/v2", DYNAMIC_PATH).unwrap().as_str(),
            "http://models.local/v2/api/predict-dynamic-sign"
        );
        assert!(endpoint("ftp://models.local", STATIC_PATH).is_err());
    }

    #[test]
    fn parses_result_envelope() {
        let parsed: PredictionResponse = serde_json::from_str(
            r#"{"success": true, "result": {"class": "Halo", "confidence": 0.93, "index": 11}}"#,
        )
        .unwrap();
        let result = parsed.result.unwrap();
        assert_eq!(result.label, "Halo");
        assert!((result.confidence - 0.93).abs() < 1e-6);
    }
}
