use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub screen: ScreenConfig,
    pub sprite: SpriteConfig,
    pub timestamp: TimestampConfig,
    #[serde(default)]
    pub compress: Option<CompressConfig>,
    #[serde(default)]
    pub textlog: Option<TextLogConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Path to a finite recorded MJPEG file. Exactly one of `source_path`
    /// and `source_url` must be set.
    #[serde(default)]
    pub source_path: Option<String>,
    /// Resolved URL of a live MJPEG stream.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Frames to discard between processed frames.
    #[serde(default)]
    pub frame_skip: u32,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ratelimit")]
    pub ratelimit: bool,
    /// Fixed retry interval for source resolution failures.
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenConfig {
    /// Top-left corner of the emulated display inside the raw frame.
    pub source_position: [u32; 2],
    /// Size of the emulated display inside the raw frame.
    pub source_size: [u32; 2],
    /// Canonical resolution the display area is resampled to.
    /// Both dimensions must be divisible by 8 for the 2bpp codec.
    #[serde(default = "default_screen_size")]
    pub size: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpriteConfig {
    /// Cell pitch of the font sheet grid, width x height.
    #[serde(default = "default_cell_size")]
    pub cell_size: [u32; 2],
    /// Path to the font bitmap sheet.
    pub sheet: String,
    /// Path to the cell-offset -> text mapping file.
    pub text_map: String,
    /// Ordered (intensity, class) pairs; each claims a tolerance window
    /// around its reference intensity.
    pub color_map: Vec<(u8, u8)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimestampConfig {
    /// Top-left corner of the on-screen clock strip in the raw frame.
    pub position: [u32; 2],
    /// Size of the clock strip.
    pub size: [u32; 2],
    /// Column-projection signature -> character.
    pub character_map: HashMap<String, String>,
    /// Wall-clock start of the run, RFC3339 (e.g. "2014-02-12T04:00:00Z").
    /// When set, failed parses are extrapolated from `now - anchor`.
    #[serde(default)]
    pub anchor: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressConfig {
    /// Append-only output file for the 2bpp record stream.
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextLogConfig {
    /// Append-only log of recognized-text changes.
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.stream.source_path, &self.stream.source_url) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(ConfigError::Invalid(
                    "exactly one of stream.source_path and stream.source_url must be set".into(),
                ));
            }
            _ => {}
        }
        if self.stream.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream.queue_capacity must be at least 1".into(),
            ));
        }
        let [w, h] = self.screen.size;
        if w == 0 || h == 0 || w % 8 != 0 || h % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "screen.size {w}x{h} must be non-zero and divisible by 8"
            )));
        }
        let [cw, ch] = self.sprite.cell_size;
        if cw == 0 || ch == 0 || ch > 16 {
            // Column signatures pack 2 bits per pixel into a u32.
            return Err(ConfigError::Invalid(format!(
                "sprite.cell_size {cw}x{ch} must be non-zero with height <= 16"
            )));
        }
        if self.sprite.color_map.is_empty() {
            return Err(ConfigError::Invalid("sprite.color_map is empty".into()));
        }
        if self.timestamp.character_map.is_empty() {
            return Err(ConfigError::Invalid(
                "timestamp.character_map is empty".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_queue_capacity() -> usize {
    120
}
fn default_ratelimit() -> bool {
    true
}
fn default_retry_secs() -> u64 {
    30
}
fn default_screen_size() -> [u32; 2] {
    [160, 144]
}
fn default_cell_size() -> [u32; 2] {
    [8, 16]
}
fn default_log_level() -> String {
    "info".into()
}
