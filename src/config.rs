use serde::Deserialize;
use std::io::ErrorKind;

pub const CONFIG_PATH: &str = "config.jsonc";

const DEFAULT_CONFIG: &str = r#"// Global bot config (JSONC: supports comments)
{
  "playback": {
    // Track volume applied when a song starts (0.0 - 1.0)
    "default_volume": 1.0,
    // Pause between stopping one track and starting the next, so the
    // old track's end event lands before the new one begins
    "settle_ms": 500,
    // How many consecutive unresolvable tracks to skip past before
    // giving up on the queue
    "max_auto_skips": 5
  },
  // Embed accent color (decimal RGB)
  "embed_color": 16711771
}
"#;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default = "default_embed_color")]
    pub embed_color: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_max_auto_skips")]
    pub max_auto_skips: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            settle_ms: default_settle_ms(),
            max_auto_skips: default_max_auto_skips(),
        }
    }
}

fn default_volume() -> f32 {
    1.0
}

fn default_settle_ms() -> u64 {
    500
}

fn default_max_auto_skips() -> usize {
    5
}

fn default_embed_color() -> u32 {
    0xFF005B
}

pub async fn ensure_default_config() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match tokio::fs::metadata(CONFIG_PATH).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::write(CONFIG_PATH, DEFAULT_CONFIG).await?;
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

pub async fn load_config() -> Result<AppConfig, Box<dyn std::error::Error + Send + Sync>> {
    let _ = ensure_default_config().await;

    let contents = tokio::fs::read_to_string(CONFIG_PATH).await?;
    let cfg: AppConfig = json5::from_str(&contents)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let cfg: AppConfig = json5::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(cfg.playback.settle_ms, 500);
        assert_eq!(cfg.playback.max_auto_skips, 5);
        assert_eq!(cfg.embed_color, 0xFF005B);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: AppConfig = json5::from_str("{}").unwrap();
        assert_eq!(cfg.playback.default_volume, 1.0);
        assert_eq!(cfg.playback.settle_ms, 500);
    }
}
