use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ModelVariant;
use crate::session::ConnectionSettings;

const DEFAULT_STREAM_ADDR: &str = "127.0.0.1:8789";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_MAX_CONNECTIONS: usize = 64;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_EXTRACTOR_COMMAND: &str = "python3";
const DEFAULT_EXTRACTOR_SCRIPT: &str = "realtime_landmarks.py";
const DEFAULT_EXTRACTOR_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DETECTION_MS: u64 = 200;
const DEFAULT_STATIC_MS: u64 = 1_500;
const DEFAULT_DYNAMIC_MS: u64 = 2_500;
const DEFAULT_WARMUP_MS: u64 = 3_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    stream: Option<StreamConfigFile>,
    api: Option<ApiConfigFile>,
    extractor: Option<ExtractorConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    session: Option<SessionConfigFile>,
    capture: Option<CaptureConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    addr: Option<String>,
    max_connections: Option<usize>,
    idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ExtractorConfigFile {
    backend: Option<ExtractorBackend>,
    command: Option<String>,
    args: Option<Vec<String>>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClassifierConfigFile {
    backend: Option<ClassifierBackend>,
    url: Option<String>,
    timeout_ms: Option<u64>,
    model_variant: Option<ModelVariant>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SessionConfigFile {
    confidence_threshold: Option<f32>,
    prediction_interval: Option<u32>,
    smoothing_enabled: Option<bool>,
    max_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    detection_ms: Option<u64>,
    static_ms: Option<u64>,
    dynamic_ms: Option<u64>,
    warmup_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub stream: StreamSettings,
    pub api_addr: String,
    pub extractor: ExtractorSettings,
    pub classifier: ClassifierSettings,
    /// Settings every new connection starts with.
    pub session_defaults: ConnectionSettings,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub addr: String,
    pub max_connections: usize,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorBackend {
    Stub,
    Process,
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub backend: ExtractorBackend,
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            backend: ExtractorBackend::Stub,
            command: DEFAULT_EXTRACTOR_COMMAND.to_string(),
            args: vec![DEFAULT_EXTRACTOR_SCRIPT.to_string()],
            timeout: Duration::from_millis(DEFAULT_EXTRACTOR_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    Stub,
    Http,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub backend: ClassifierBackend,
    pub url: Option<String>,
    pub timeout: Duration,
    pub model_variant: ModelVariant,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::Stub,
            url: None,
            timeout: Duration::from_millis(DEFAULT_CLASSIFIER_TIMEOUT_MS),
            model_variant: ModelVariant::default(),
        }
    }
}

impl ClassifierSettings {
    pub fn require_url(&self) -> Result<&str> {
        self.url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| anyhow!("classifier.url is required for the http backend"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub detection: Duration,
    pub static_every: Duration,
    pub dynamic_every: Duration,
    pub warmup: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            detection: Duration::from_millis(DEFAULT_DETECTION_MS),
            static_every: Duration::from_millis(DEFAULT_STATIC_MS),
            dynamic_every: Duration::from_millis(DEFAULT_DYNAMIC_MS),
            warmup: Duration::from_millis(DEFAULT_WARMUP_MS),
        }
    }
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGN_RELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit path, still honouring environment overrides.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut cfg = Self::from_file(read_config_file(&path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            addr: stream_file
                .addr
                .unwrap_or_else(|| DEFAULT_STREAM_ADDR.to_string()),
            max_connections: stream_file
                .max_connections
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            idle_timeout: Duration::from_secs(
                stream_file
                    .idle_timeout_secs
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
            ),
        };
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let defaults = ExtractorSettings::default();
        let extractor_file = file.extractor.unwrap_or_default();
        let extractor = ExtractorSettings {
            backend: extractor_file.backend.unwrap_or(defaults.backend),
            command: extractor_file.command.unwrap_or(defaults.command),
            args: extractor_file.args.unwrap_or(defaults.args),
            timeout: extractor_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        };

        let defaults = ClassifierSettings::default();
        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            backend: classifier_file.backend.unwrap_or(defaults.backend),
            url: classifier_file.url,
            timeout: classifier_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            model_variant: classifier_file
                .model_variant
                .unwrap_or(defaults.model_variant),
        };

        let defaults = ConnectionSettings::default();
        let session_file = file.session.unwrap_or_default();
        let session_defaults = ConnectionSettings {
            confidence_threshold: session_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            prediction_interval: session_file
                .prediction_interval
                .unwrap_or(defaults.prediction_interval),
            smoothing_enabled: session_file
                .smoothing_enabled
                .unwrap_or(defaults.smoothing_enabled),
            max_fps: session_file.max_fps.unwrap_or(defaults.max_fps),
        };

        let defaults = CaptureSettings::default();
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            detection: capture_file
                .detection_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.detection),
            static_every: capture_file
                .static_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.static_every),
            dynamic_every: capture_file
                .dynamic_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.dynamic_every),
            warmup: capture_file
                .warmup_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.warmup),
        };

        Ok(Self {
            stream,
            api_addr,
            extractor,
            classifier,
            session_defaults,
            capture,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SIGN_RELAY_STREAM_ADDR") {
            if !addr.trim().is_empty() {
                self.stream.addr = addr;
            }
        }
        if let Ok(addr) = std::env::var("SIGN_RELAY_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(cmd) = std::env::var("SIGN_RELAY_EXTRACTOR_CMD") {
            let mut parts = cmd.split_whitespace().map(|part| part.to_string());
            if let Some(command) = parts.next() {
                self.extractor.backend = ExtractorBackend::Process;
                self.extractor.command = command;
                self.extractor.args = parts.collect();
            }
        }
        if let Ok(url) = std::env::var("SIGN_RELAY_CLASSIFIER_URL") {
            if !url.trim().is_empty() {
                self.classifier.backend = ClassifierBackend::Http;
                self.classifier.url = Some(url);
            }
        }
        if let Ok(variant) = std::env::var("SIGN_RELAY_MODEL_VARIANT") {
            if !variant.trim().is_empty() {
                self.classifier.model_variant = variant
                    .trim()
                    .parse()
                    .map_err(|e| anyhow!("SIGN_RELAY_MODEL_VARIANT: {}", e))?;
            }
        }
        if let Ok(max) = std::env::var("SIGN_RELAY_MAX_CONNECTIONS") {
            self.stream.max_connections = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("SIGN_RELAY_MAX_CONNECTIONS must be a positive integer"))?;
        }
        if let Ok(idle) = std::env::var("SIGN_RELAY_IDLE_TIMEOUT_SECS") {
            let seconds: u64 = idle.trim().parse().map_err(|_| {
                anyhow!("SIGN_RELAY_IDLE_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.stream.idle_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.session_defaults
            .validate()
            .map_err(|e| anyhow!("session defaults: {}", e))?;
        if self.stream.max_connections == 0 {
            return Err(anyhow!("stream.max_connections must be greater than zero"));
        }
        if self.stream.idle_timeout.is_zero() {
            return Err(anyhow!("stream.idle_timeout_secs must be greater than zero"));
        }
        if self.extractor.timeout.is_zero() {
            return Err(anyhow!("extractor.timeout_ms must be greater than zero"));
        }
        if self.extractor.backend == ExtractorBackend::Process
            && self.extractor.command.trim().is_empty()
        {
            return Err(anyhow!("extractor.command is required for the process backend"));
        }
        if self.classifier.backend == ClassifierBackend::Http {
            self.classifier.require_url()?;
        }
        for (name, value) in [
            ("capture.detection_ms", self.capture.detection),
            ("capture.static_ms", self.capture.static_every),
            ("capture.dynamic_ms", self.capture.dynamic_every),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = RelayConfig::from_file(RelayConfigFile::default()).unwrap();
        assert_eq!(cfg.stream.addr, DEFAULT_STREAM_ADDR);
        assert_eq!(cfg.api_addr, DEFAULT_API_ADDR);
        assert_eq!(cfg.stream.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.extractor.backend, ExtractorBackend::Stub);
        assert_eq!(cfg.classifier.model_variant, ModelVariant::Lstm);
        assert_eq!(cfg.session_defaults, ConnectionSettings::default());
        assert_eq!(cfg.capture, CaptureSettings::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn http_backend_requires_url() {
        let file: RelayConfigFile =
            serde_json::from_str(r#"{"classifier": {"backend": "http"}}"#).unwrap();
        let cfg = RelayConfig::from_file(file).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_session_defaults_fail_validation() {
        let file: RelayConfigFile =
            serde_json::from_str(r#"{"session": {"max_fps": 120}}"#).unwrap();
        let cfg = RelayConfig::from_file(file).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_fps"));
    }

    #[test]
    fn toml_and_json_sections_match() {
        let json: RelayConfigFile = serde_json::from_str(
            r#"{"capture": {"detection_ms": 50, "warmup_ms": 0}, "classifier": {"model_variant": "transformer"}}"#,
        )
        .unwrap();
        let toml_cfg: RelayConfigFile = toml::from_str(
            "[capture]\ndetection_ms = 50\nwarmup_ms = 0\n[classifier]\nmodel_variant = \"transformer\"\n",
        )
        .unwrap();
        let a = RelayConfig::from_file(json).unwrap();
        let b = RelayConfig::from_file(toml_cfg).unwrap();
        assert_eq!(a.capture, b.capture);
        assert_eq!(a.capture.detection, Duration::from_millis(50));
        assert_eq!(b.classifier.model_variant, ModelVariant::Transformer);
    }

    #[test]
    fn typos_inside_sections_are_rejected() {
        let err = toml::from_str::<RelayConfigFile>("[session]\nmax_fsp = 10\n").unwrap_err();
        assert!(err.to_string().contains("max_fsp"));
        for json in [
            r#"{"stream": {"adr": "127.0.0.1:1"}}"#,
            r#"{"api": {"address": "127.0.0.1:1"}}"#,
            r#"{"extractor": {"cmd": "python3"}}"#,
            r#"{"classifier": {"variant": "lstm"}}"#,
            r#"{"capture": {"warmup": 10}}"#,
        ] {
            assert!(
                serde_json::from_str::<RelayConfigFile>(json).is_err(),
                "accepted {}",
                json
            );
        }
    }
}
