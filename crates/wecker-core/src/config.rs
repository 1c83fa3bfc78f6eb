use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where raw input comes from and how it is debounced.
///
/// The encoder lines and the button arrive as gpio-keys events on evdev
/// character devices; the keycodes here must match the device-tree overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_encoder_device")]
    pub encoder_device: PathBuf,
    #[serde(default = "default_button_device")]
    pub button_device: PathBuf,
    #[serde(default = "default_encoder_a_keycode")]
    pub encoder_a_keycode: u16,
    #[serde(default = "default_encoder_b_keycode")]
    pub encoder_b_keycode: u16,
    #[serde(default = "default_button_keycode")]
    pub button_keycode: u16,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_device")]
    pub device: PathBuf,
    /// How often a frame is rendered and flushed. Content changes at most
    /// once per second plus scroll steps, so a few Hz is plenty.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_scroll_step_ms")]
    pub scroll_step_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Player process fed raw stream bytes on stdin.
    #[serde(default = "default_player_command")]
    pub player_command: Vec<String>,
    /// Control socket for live volume changes; `None` makes volume changes
    /// best-effort no-ops.
    #[serde(default = "default_ipc_socket")]
    pub ipc_socket: Option<PathBuf>,
    #[serde(default = "default_volume_step")]
    pub volume_step: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Audio seconds to buffer before declaring the stream playing.
    #[serde(default = "default_prebuffer_secs")]
    pub prebuffer_secs: u64,
    /// Bitrate assumed when the stream does not announce `icy-br`.
    #[serde(default = "default_fallback_bitrate_kbps")]
    pub fallback_bitrate_kbps: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Consecutive failed connects tolerated before the error sticks.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_stations_file")]
    pub stations_file: PathBuf,
    #[serde(default = "default_alarms_file")]
    pub alarms_file: PathBuf,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            encoder_device: default_encoder_device(),
            button_device: default_button_device(),
            encoder_a_keycode: default_encoder_a_keycode(),
            encoder_b_keycode: default_encoder_b_keycode(),
            button_keycode: default_button_keycode(),
            debounce_ms: default_debounce_ms(),
            long_press_ms: default_long_press_ms(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            device: default_display_device(),
            frame_interval_ms: default_frame_interval_ms(),
            scroll_step_ms: default_scroll_step_ms(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            player_command: default_player_command(),
            ipc_socket: default_ipc_socket(),
            volume_step: default_volume_step(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            prebuffer_secs: default_prebuffer_secs(),
            fallback_bitrate_kbps: default_fallback_bitrate_kbps(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stations_file: default_stations_file(),
            alarms_file: default_alarms_file(),
            state_file: default_state_file(),
            log_file: default_log_file(),
        }
    }
}

fn default_encoder_device() -> PathBuf {
    PathBuf::from("/dev/input/event0")
}

fn default_button_device() -> PathBuf {
    PathBuf::from("/dev/input/event1")
}

fn default_encoder_a_keycode() -> u16 {
    30 // KEY_A
}

fn default_encoder_b_keycode() -> u16 {
    48 // KEY_B
}

fn default_button_keycode() -> u16 {
    28 // KEY_ENTER
}

fn default_debounce_ms() -> u64 {
    20
}

fn default_long_press_ms() -> u64 {
    800
}

fn default_display_device() -> PathBuf {
    PathBuf::from("/dev/fb1")
}

fn default_frame_interval_ms() -> u64 {
    250
}

fn default_scroll_step_ms() -> u64 {
    300
}

fn default_player_command() -> Vec<String> {
    ["mpv", "--no-video", "--really-quiet", "-"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_ipc_socket() -> Option<PathBuf> {
    Some(std::env::temp_dir().join("wecker-player.sock"))
}

fn default_volume_step() -> u8 {
    5
}

fn default_prebuffer_secs() -> u64 {
    2
}

fn default_fallback_bitrate_kbps() -> u32 {
    128
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    6
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stations_file() -> PathBuf {
    platform::data_dir().join("stations.toml")
}

fn default_alarms_file() -> PathBuf {
    platform::data_dir().join("alarms.toml")
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("wecker.log")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            display: DisplayConfig::default(),
            audio: AudioConfig::default(),
            playback: PlaybackConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.input.debounce_ms, 20);
        assert_eq!(config.input.long_press_ms, 800);
        assert_eq!(config.playback.backoff_base_ms, 1_000);
        assert_eq!(config.playback.backoff_cap_ms, 30_000);
        assert_eq!(config.playback.max_attempts, 6);
        assert!(config.paths.stations_file.ends_with("wecker/stations.toml"));
    }

    #[test]
    fn partial_file_fills_missing_sections_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            [playback]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.playback.max_attempts, 3);
        assert_eq!(config.playback.backoff_cap_ms, 30_000);
        assert_eq!(config.input.long_press_ms, 800);
    }
}
