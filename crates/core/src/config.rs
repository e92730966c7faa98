//! Config file parsing for `~/.config/kindle-thumbs/config.toml`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const APP_DIR: &str = "kindle-thumbs";
const CACHE_FILE_NAME: &str = "ect.csv";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

/// Thumbnail geometry. The `fixed_*` box is used in fix mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub fixed_width: u32,
    pub fixed_height: u32,
    pub pdoc_padding: u32,
    pub generated_padding: u32,
    pub jpeg_quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 305,
            height: 470,
            fixed_width: 283,
            fixed_height: 415,
            pdoc_padding: 55,
            generated_padding: 45,
            jpeg_quality: 75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagesConfig {
    /// Persistent page cache; defaults to the user data dir.
    pub cache_file: Option<String>,
    pub chars_per_page: u32,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            cache_file: None,
            chars_per_page: 2300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub skip_dictionaries: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            skip_dictionaries: true,
        }
    }
}

/// Load config from the default path. Missing or unreadable files yield defaults.
pub fn load_config() -> AppConfig {
    let Some(path) = config_path() else {
        return AppConfig::default();
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return AppConfig::default(),
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push(APP_DIR);
        p.push("config.toml");
        p
    })
}

/// Where the page cache lives: the configured path, else `<data dir>/kindle-thumbs/ect.csv`.
pub fn cache_path(cfg: &PagesConfig) -> PathBuf {
    if let Some(p) = &cfg.cache_file {
        return PathBuf::from(p);
    }
    dirs::data_dir()
        .map(|mut p| {
            p.push(APP_DIR);
            p
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_FILE_NAME)
}
