use rollcall_core::pipeline::{
    DEFAULT_CROP_PADDING, DEFAULT_DETECTION_SCALE, DEFAULT_SIMILARITY_THRESHOLD,
};
use rollcall_core::{DetectorConfig, PipelineOptions};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
const SEETA_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";
const EMBEDDER_MODEL_FILE: &str = "facenet.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Daemon configuration: optional TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP/WebSocket server binds to.
    pub listen: SocketAddr,
    /// Origins allowed by CORS; `*` allows any.
    pub allowed_origins: Vec<String>,
    /// Cosine similarity needed for a positive match.
    pub similarity_threshold: f32,
    /// Downscale factor applied before detection.
    pub detection_scale: f32,
    /// Crop padding as a fraction of box size.
    pub crop_padding: f32,
    /// Side length of the embedder's square input.
    pub embedder_input_size: u32,
    /// Directory containing model files.
    pub model_dir: PathBuf,
    pub scrfd_model: Option<PathBuf>,
    pub seeta_model: Option<PathBuf>,
    pub embedder_model: Option<PathBuf>,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            detection_scale: DEFAULT_DETECTION_SCALE,
            crop_padding: DEFAULT_CROP_PADDING,
            embedder_input_size: 160,
            model_dir: PathBuf::from("models"),
            scrfd_model: None,
            seeta_model: None,
            embedder_model: None,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(v) = lookup("ROLLCALL_LISTEN") {
            config.listen = parse("ROLLCALL_LISTEN", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_ALLOWED_ORIGINS") {
            config.allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("ROLLCALL_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse("ROLLCALL_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_DETECTION_SCALE") {
            config.detection_scale = parse("ROLLCALL_DETECTION_SCALE", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_CROP_PADDING") {
            config.crop_padding = parse("ROLLCALL_CROP_PADDING", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_INPUT_SIZE") {
            config.embedder_input_size = parse("ROLLCALL_EMBEDDER_INPUT_SIZE", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_INTRA_THREADS") {
            config.intra_threads = parse("ROLLCALL_INTRA_THREADS", &v)?;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            config.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_SCRFD_MODEL") {
            config.scrfd_model = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ROLLCALL_SEETA_MODEL") {
            config.seeta_model = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ROLLCALL_EMBEDDER_MODEL") {
            config.embedder_model = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(invalid("similarity_threshold", "must be within [-1, 1]"));
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(invalid("detection_scale", "must be within (0, 1]"));
        }
        if !(self.crop_padding >= 0.0) {
            return Err(invalid("crop_padding", "must be >= 0"));
        }
        if self.embedder_input_size == 0 {
            return Err(invalid("embedder_input_size", "must be > 0"));
        }
        if self.intra_threads == 0 {
            return Err(invalid("intra_threads", "must be > 0"));
        }
        Ok(())
    }

    pub fn scrfd_model_path(&self) -> PathBuf {
        self.scrfd_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(SCRFD_MODEL_FILE))
    }

    pub fn seeta_model_path(&self) -> PathBuf {
        self.seeta_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(SEETA_MODEL_FILE))
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.embedder_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(EMBEDDER_MODEL_FILE))
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            scrfd_model: self.scrfd_model_path(),
            seeta_model: self.seeta_model_path(),
            intra_threads: self.intra_threads,
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            detection_scale: self.detection_scale,
            crop_padding: self.crop_padding,
        }
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| invalid(key, e.to_string()))
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&[]).unwrap();
        assert_eq!(config.listen.port(), 8000);
        assert!((config.similarity_threshold - 0.70).abs() < 1e-6);
        assert!((config.detection_scale - 0.5).abs() < 1e-6);
        assert!((config.crop_padding - 0.15).abs() < 1e-6);
        assert_eq!(config.embedder_input_size, 160);
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.scrfd_model_path(), PathBuf::from("models/det_10g.onnx"));
    }

    #[test]
    fn test_env_overrides() {
        let config = resolve(&[
            ("ROLLCALL_LISTEN", "127.0.0.1:9100"),
            ("ROLLCALL_ALLOWED_ORIGINS", "https://kiosk.example, https://admin.example,"),
            ("ROLLCALL_SIMILARITY_THRESHOLD", "0.6"),
            ("ROLLCALL_MODEL_DIR", "/opt/models"),
            ("ROLLCALL_EMBEDDER_MODEL", "/srv/arcface.onnx"),
        ])
        .unwrap();
        assert_eq!(config.listen.to_string(), "127.0.0.1:9100");
        assert_eq!(config.allowed_origins, vec!["https://kiosk.example", "https://admin.example"]);
        assert!((config.similarity_threshold - 0.6).abs() < 1e-6);
        assert_eq!(
            config.seeta_model_path(),
            PathBuf::from("/opt/models/seeta_fd_frontal_v1.0.bin")
        );
        assert_eq!(config.embedder_model_path(), PathBuf::from("/srv/arcface.onnx"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            resolve(&[("ROLLCALL_DETECTION_SCALE", "1.5")]),
            Err(ConfigError::Invalid { key: "detection_scale", .. })
        ));
        assert!(matches!(
            resolve(&[("ROLLCALL_SIMILARITY_THRESHOLD", "abc")]),
            Err(ConfigError::Invalid { key: "ROLLCALL_SIMILARITY_THRESHOLD", .. })
        ));
        assert!(resolve(&[("ROLLCALL_CROP_PADDING", "-0.1")]).is_err());
        assert!(resolve(&[("ROLLCALL_EMBEDDER_INPUT_SIZE", "0")]).is_err());
    }

    #[test]
    fn test_file_then_env() {
        let path = std::env::temp_dir()
            .join(format!("rollcalld-config-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "similarity_threshold = 0.8\nembedder_input_size = 112\nallowed_origins = [\"*\"]\n",
        )
        .unwrap();
        let path_str = path.to_string_lossy().into_owned();
        let config = resolve(&[
            ("ROLLCALL_CONFIG", &path_str),
            ("ROLLCALL_EMBEDDER_INPUT_SIZE", "128"),
        ]);
        std::fs::remove_file(&path).ok();

        let config = config.unwrap();
        assert!((config.similarity_threshold - 0.8).abs() < 1e-6);
        assert_eq!(config.embedder_input_size, 128);
        assert_eq!(config.allowed_origins, vec!["*"]);
        assert!((config.detection_scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            resolve(&[("ROLLCALL_CONFIG", "/nonexistent/rollcalld.toml")]),
            Err(ConfigError::Read { .. })
        ));
    }
}
