//! Configuration file loading.

use crate::models::settings::Settings;
use log::{debug, info, warn};
use std::fs;
use std::path::Path;

/// Maximum accepted configuration file size.
const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Loads the gateway configuration from the file system.
///
/// The path comes from `GATEWAY_CONFIG_PATH`, defaulting to `./config.json`.
/// A missing file is not an error: the gateway falls back to the built-in
/// defaults (three weighted demo backends on port 4000). An unreadable or
/// invalid file aborts startup instead, because running with half a
/// configuration is worse than not running.
///
/// # Security Checks
///
/// - the path is canonicalised and must stay within the working directory
/// - files larger than 10 MB are rejected to bound startup memory
///
/// # Errors
///
/// Returns an error when the path escapes the working directory, the file
/// cannot be read, exceeds the size cap, or fails to parse as a `Settings`
/// document.
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("GATEWAY_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("Loading configuration from: {}", config_path);

    let path = Path::new(&config_path);
    if !path.exists() {
        info!(
            "No configuration file at {}, using built-in defaults",
            config_path
        );
        return Ok(Settings::default());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("Cannot resolve config path '{}': {}", config_path, e))?;

    let current_dir =
        std::env::current_dir().map_err(|e| format!("Cannot get current directory: {}", e))?;

    if !canonical_path.starts_with(&current_dir) {
        warn!("Config path '{}' is outside working directory", config_path);
        return Err("Config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("Cannot read config file metadata: {}", e))?;

    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "Config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let config_data = fs::read_to_string(&canonical_path)
        .map_err(|e| format!("Cannot read config file: {}", e))?;

    let settings: Settings =
        serde_json::from_str(&config_data).map_err(|e| format!("Invalid JSON: {}", e))?;

    debug!(
        "Successfully loaded configuration with {} backends",
        settings.backends.len()
    );

    Ok(settings)
}
