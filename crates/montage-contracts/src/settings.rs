use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GENERATION_URL: &str = "https://api.defapi.org/api/image/gen";
pub const DEFAULT_QUERY_URL: &str = "https://api.defapi.org/api/task/query";
pub const DEFAULT_MODEL: &str = "google/nano-banana";
pub const MAX_IMAGES_PER_REQUEST: usize = 4;

const MIB: usize = 1024 * 1024;

/// One re-encode attempt: JPEG quality and longest-edge ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityTier {
    pub quality: u8,
    pub max_edge: u32,
}

impl QualityTier {
    pub const fn new(quality: u8, max_edge: u32) -> Self {
        Self { quality, max_edge }
    }
}

pub fn default_quality_tiers() -> Vec<QualityTier> {
    vec![
        QualityTier::new(85, 1024),
        QualityTier::new(80, 896),
        QualityTier::new(75, 768),
        QualityTier::new(65, 640),
        QualityTier::new(50, 512),
    ]
}

/// Every tunable of the pipeline in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation_url: String,
    pub query_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub submit_timeout_s: f64,
    pub poll_timeout_s: f64,
    pub poll_interval_s: f64,
    pub max_poll_attempts: u32,
    pub quality_tiers: Vec<QualityTier>,
    pub max_encoded_bytes: usize,
    pub max_request_bytes: usize,
    pub max_images: usize,
    pub max_upload_bytes: usize,
    pub cache_ttl_s: f64,
    pub min_prompt_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            generation_url: DEFAULT_GENERATION_URL.to_string(),
            query_url: DEFAULT_QUERY_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            submit_timeout_s: 60.0,
            poll_timeout_s: 30.0,
            poll_interval_s: 2.0,
            max_poll_attempts: 30,
            quality_tiers: default_quality_tiers(),
            max_encoded_bytes: 5 * MIB,
            max_request_bytes: 24 * MIB,
            max_images: MAX_IMAGES_PER_REQUEST,
            max_upload_bytes: 10 * MIB,
            cache_ttl_s: 600.0,
            min_prompt_chars: 3,
        }
    }
}

impl Settings {
    /// Defaults, then the JSON file named by `MONTAGE_SETTINGS`, then env overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(None)
    }

    /// Like [`from_env`](Self::from_env), but an explicit `path` replaces
    /// `MONTAGE_SETTINGS`. Env overrides, the credential included, still apply.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with(path, non_empty_env)
    }

    fn load_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| lookup("MONTAGE_SETTINGS").map(PathBuf::from));
        let mut settings = match file {
            Some(file) => Self::from_json_file(&file)?,
            None => Self::default(),
        };
        settings.apply_overrides(&lookup);
        Ok(settings.sanitized())
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading settings {}", path.display()))?;
        let parsed: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("invalid settings JSON in {}", path.display()))?;
        Ok(parsed.sanitized())
    }

    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MONTAGE_GENERATION_URL") {
            self.generation_url = trim_url(&url);
        }
        if let Some(url) = lookup("MONTAGE_QUERY_URL") {
            self.query_url = trim_url(&url);
        }
        if let Some(model) = lookup("MONTAGE_MODEL") {
            self.model = model;
        }
        if let Some(interval) = lookup("MONTAGE_POLL_INTERVAL").and_then(|v| v.parse::<f64>().ok())
        {
            self.poll_interval_s = interval;
        }
        if let Some(attempts) = lookup("MONTAGE_POLL_ATTEMPTS").and_then(|v| v.parse::<u32>().ok())
        {
            self.max_poll_attempts = attempts;
        }
        if let Some(key) = lookup("MONTAGE_API_KEY").or_else(|| lookup("DEFAPI_API_KEY"))
        {
            self.api_key = Some(key);
        }
    }

    /// Clamps every field into a range the pipeline can run with.
    pub fn sanitized(mut self) -> Self {
        self.generation_url = trim_url(&self.generation_url);
        self.query_url = trim_url(&self.query_url);
        self.api_key = self
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        self.submit_timeout_s = clamp_seconds(self.submit_timeout_s, 60.0, 1.0, 600.0);
        self.poll_timeout_s = clamp_seconds(self.poll_timeout_s, 30.0, 1.0, 600.0);
        self.poll_interval_s = clamp_seconds(self.poll_interval_s, 2.0, 0.0, 60.0);
        self.cache_ttl_s = clamp_seconds(self.cache_ttl_s, 600.0, 0.0, 86_400.0);
        self.max_poll_attempts = self.max_poll_attempts.max(1);
        self.max_images = self.max_images.clamp(1, MAX_IMAGES_PER_REQUEST);
        self.quality_tiers = self
            .quality_tiers
            .into_iter()
            .map(|tier| QualityTier::new(tier.quality.clamp(1, 100), tier.max_edge.max(64)))
            .collect();
        if self.quality_tiers.is_empty() {
            self.quality_tiers = default_quality_tiers();
        }
        self
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.submit_timeout_s)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.poll_timeout_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.cache_ttl_s)
    }
}

fn clamp_seconds(value: f64, default: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        default
    }
}

fn trim_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let settings = Settings::default();
        assert_eq!(settings.generation_url, DEFAULT_GENERATION_URL);
        assert_eq!(settings.query_url, DEFAULT_QUERY_URL);
        assert_eq!(settings.max_images, 4);
        assert_eq!(settings.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.max_poll_attempts, 30);
        assert_eq!(settings.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.quality_tiers.first(), Some(&QualityTier::new(85, 1024)));
    }

    #[test]
    fn sanitized_clamps_out_of_range_values() {
        let settings = Settings {
            generation_url: " https://example.test/gen/ ".to_string(),
            api_key: Some("   ".to_string()),
            model: " ".to_string(),
            poll_interval_s: f64::NAN,
            submit_timeout_s: 0.0,
            max_poll_attempts: 0,
            max_images: 9,
            quality_tiers: vec![QualityTier::new(0, 10)],
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(settings.generation_url, "https://example.test/gen");
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.poll_interval_s, 2.0);
        assert_eq!(settings.submit_timeout_s, 1.0);
        assert_eq!(settings.max_poll_attempts, 1);
        assert_eq!(settings.max_images, 4);
        assert_eq!(settings.quality_tiers, vec![QualityTier::new(1, 64)]);
    }

    #[test]
    fn empty_tier_list_falls_back_to_defaults() {
        let settings = Settings {
            quality_tiers: Vec::new(),
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(settings.quality_tiers, default_quality_tiers());
    }

    #[test]
    fn json_file_fills_missing_fields_with_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"max_poll_attempts": 5, "poll_interval_s": 0.5, "quality_tiers": [{"quality": 70, "max_edge": 800}]}"#,
        )?;
        let settings = Settings::from_json_file(&path)?;
        assert_eq!(settings.max_poll_attempts, 5);
        assert_eq!(settings.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.quality_tiers, vec![QualityTier::new(70, 800)]);
        assert_eq!(settings.model, DEFAULT_MODEL);
        Ok(())
    }

    #[test]
    fn explicit_file_still_takes_env_overrides() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{"max_poll_attempts": 5, "model": "from-file"}"#)?;
        let env = |key: &str| match key {
            "DEFAPI_API_KEY" => Some("secret".to_string()),
            "MONTAGE_MODEL" => Some("from-env".to_string()),
            "MONTAGE_SETTINGS" => Some("/nonexistent/ignored.json".to_string()),
            _ => None,
        };
        let settings = Settings::load_with(Some(&path), env)?;
        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.model, "from-env");
        assert_eq!(settings.max_poll_attempts, 5);
        Ok(())
    }

    #[test]
    fn settings_file_falls_back_to_the_env_variable() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("fallback.json");
        std::fs::write(&path, r#"{"max_poll_attempts": 9}"#)?;
        let named = path.display().to_string();
        let settings = Settings::load_with(None, |key: &str| {
            (key == "MONTAGE_SETTINGS").then(|| named.clone())
        })?;
        assert_eq!(settings.max_poll_attempts, 9);
        assert_eq!(settings.api_key, None);
        Ok(())
    }

    #[test]
    fn json_file_errors_name_the_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{not json")?;
        let err = Settings::from_json_file(&path)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("broken.json"));
        Ok(())
    }
}
