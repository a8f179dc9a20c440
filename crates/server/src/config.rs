use std::{io, path::PathBuf};

use services::services::{plan_generator::DEFAULT_MODEL, reel_jobs::ReelJobConfig};
use thiserror::Error;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3001;
const DEFAULT_CLIP_CONCURRENCY: usize = 2;
const DEFAULT_MAX_VARIATIONS: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub clip_concurrency: usize,
    pub max_variations: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        // utils::assets honours OUTPUT_DIR / TEMP_DIR itself and creates the dirs
        config.output_dir = utils::assets::output_dir()?;
        config.temp_dir = utils::assets::temp_dir()?;
        Ok(config)
    }

    /// Parse everything except the directories, which keep whatever the
    /// lookup gave (or empty paths).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or_default(),
            temp_dir: get("TEMP_DIR").map(PathBuf::from).unwrap_or_default(),
            ffmpeg_path: get("FFMPEG_PATH"),
            ffprobe_path: get("FFPROBE_PATH"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            clip_concurrency: positive(get("CLIP_CONCURRENCY"), "CLIP_CONCURRENCY")?
                .unwrap_or(DEFAULT_CLIP_CONCURRENCY),
            max_variations: positive(get("MAX_VARIATIONS"), "MAX_VARIATIONS")?
                .unwrap_or(DEFAULT_MAX_VARIATIONS),
        })
    }

    pub fn job_config(&self) -> ReelJobConfig {
        ReelJobConfig {
            output_dir: self.output_dir.clone(),
            temp_dir: self.temp_dir.clone(),
            clip_concurrency: self.clip_concurrency,
            max_variations: self.max_variations,
        }
    }
}

fn positive(raw: Option<String>, key: &'static str) -> Result<Option<usize>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => match value.parse::<usize>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}
