//! Platform-specific settings and log directories.
//!
//!   Windows: %APPDATA%/polly-narrator
//!   macOS:   ~/Library/Application Support/polly-narrator
//!   Linux:   $XDG_CONFIG_HOME/polly-narrator (default ~/.config)
//!
//! Logs live in a `logs` directory under the platform's local data directory.

use std::path::PathBuf;

const APP_DIR: &str = "polly-narrator";

/// Directory holding `settings.json`.
pub fn get_config_dir() -> PathBuf {
    get_config_base().join(APP_DIR)
}

/// Path to `settings.json`.
pub fn get_settings_path() -> PathBuf {
    get_config_dir().join("settings.json")
}

/// Default directory for `narrator.log` and `dashboard_error.log`.
pub fn get_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(get_config_base)
        .join(APP_DIR)
        .join("logs")
}

/// Get the platform-appropriate base config directory.
fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}
