use std::path::PathBuf;

/// Base directory for config.toml.
///
/// Always `~/.config/wecker/` (XDG layout) so the appliance image, a dev
/// checkout and the test harness all agree on where configuration lives.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("wecker")
}

/// Base directory for persisted state: station list, alarm list, runtime
/// state and the log file. `~/.local/share/wecker/` per XDG.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".local")
        .join("share")
        .join("wecker")
}
