//! Bot configuration loader.

use bili_core::AnalyzerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_enable")]
    pub enable: bool,
    /// Session cookie forwarded to the content API. Higher playurl qualities
    /// need a logged-in cookie; anonymous requests still work.
    #[serde(default)]
    pub cookie: String,
    #[serde(default)]
    pub skip_video_analysis: bool,
    #[serde(default = "default_display_image")]
    pub display_image: bool,
    #[serde(default = "default_send_video")]
    pub send_video: bool,
    /// Videos longer than this many seconds are not downloaded. `<= 0`
    /// removes the ceiling.
    #[serde(default = "default_duration_sec_limit")]
    pub duration_sec_limit: i64,
    #[serde(default = "default_tmp_path")]
    pub tmp_path: String,
    /// Size suffix appended to reply images, e.g. `"640w_360h"`. Empty
    /// leaves image URLs untouched.
    #[serde(default)]
    pub images_size: String,
    /// Size suffix for cover images. Empty falls back to `images_size`.
    #[serde(default)]
    pub cover_images_size: String,
    /// Seconds before the same link may be analyzed again in one chat.
    /// `<= 0` disables suppression.
    #[serde(default = "default_reanalysis_time_seconds")]
    pub reanalysis_time_seconds: i64,
}

fn default_enable() -> bool {
    true
}

fn default_display_image() -> bool {
    true
}

fn default_send_video() -> bool {
    true
}

fn default_duration_sec_limit() -> i64 {
    600
}

fn default_tmp_path() -> String {
    "data/bili_temp".to_string()
}

fn default_reanalysis_time_seconds() -> i64 {
    3
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enable: default_enable(),
            cookie: String::new(),
            skip_video_analysis: false,
            display_image: default_display_image(),
            send_video: default_send_video(),
            duration_sec_limit: default_duration_sec_limit(),
            tmp_path: default_tmp_path(),
            images_size: String::new(),
            cover_images_size: String::new(),
            reanalysis_time_seconds: default_reanalysis_time_seconds(),
        }
    }
}

impl BotConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<BotConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(config_path = %path.display(), "no config file, using defaults");
                BotConfig::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BILIBOT_COOKIE") {
            if !v.trim().is_empty() {
                self.analysis.cookie = v;
            }
        }
        if let Ok(v) = std::env::var("BILIBOT_ENABLE") {
            if let Ok(flag) = v.trim().parse::<bool>() {
                self.analysis.enable = flag;
            }
        }
        if let Ok(v) = std::env::var("BILIBOT_TMP_PATH") {
            if !v.trim().is_empty() {
                self.analysis.tmp_path = v;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.analysis.send_video && self.analysis.tmp_path.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "analysis.tmp_path is required when analysis.send_video is on"
            ));
        }
        Ok(())
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            enabled: self.analysis.enable,
            skip_video_summary: self.analysis.skip_video_analysis,
            send_video: self.analysis.send_video,
            display_image: self.analysis.display_image,
            images_size: self.analysis.images_size.clone(),
            cover_images_size: self.analysis.cover_images_size.clone(),
            dedup_window_secs: self.analysis.reanalysis_time_seconds,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".bilibot").join("config.toml")
}
