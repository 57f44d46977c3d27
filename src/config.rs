use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:3000/callback";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
}

impl SpotifyConfig {
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uri
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    /// 비어 있지 않은 값만 덮어쓴다. 명령줄 인자와 환경 변수가 설정 파일보다 우선한다.
    pub fn overlay(
        &mut self,
        client_id: Option<String>,
        client_secret: Option<String>,
        redirect_uri: Option<String>,
    ) {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        if let Some(id) = non_empty(client_id) {
            self.client_id = Some(id);
        }
        if let Some(secret) = non_empty(client_secret) {
            self.client_secret = Some(secret);
        }
        if let Some(uri) = non_empty(redirect_uri) {
            self.redirect_uri = Some(uri);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    pub bitrate_kbps: u32,
    pub workers: usize,
    pub search_results: usize,
    pub min_score: f64,
    pub duration_tolerance_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Downloaded_Music"),
            bitrate_kbps: 192,
            workers: 3,
            search_results: 5,
            min_score: 0.6,
            duration_tolerance_secs: 10,
        }
    }
}

pub const MAX_WORKERS: usize = 8;

impl DownloadConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(1, MAX_WORKERS)
    }
}

fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("likedl")
        .join("config.toml")
}

pub fn load_config() -> Config {
    let path = config_path();
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)
        .with_context(|| format!("설정 파일을 저장할 수 없습니다: {}", path.display()))?;
    Ok(())
}
