use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::images::ImageConversionFormat;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid watched directory pattern '{0}': {1}")]
    WatchPattern(String, regex::Error),

    #[error("Invalid cookie name '{0}': {1}")]
    CookiePattern(String, regex::Error),

    #[error("Breakpoint scaling needs at least one breakpoint greater than zero")]
    NoBreakpoints,

    #[error("Breakpoints must be greater than zero")]
    ZeroBreakpoint,

    #[error("Direct scale sizes must be greater than zero")]
    ZeroDirectScaleSize,

    #[error("transform_timeout must be at least one second")]
    ZeroTimeout,

    #[error("Unsupported conversion format: {0}")]
    UnsupportedConversion(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("Cannot resolve static directory: {0}")]
    StaticDir(#[from] std::io::Error),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScaleBy {
    Breakpoint,
    Viewport,
}

/// What to do when the sizing cookie is missing or unreadable.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "u8")]
pub enum CookieFallback {
    /// Pass the request through untouched.
    Reject,
    /// Assume density 1 when an explicit width was requested.
    AssumeDensityOne,
}

impl TryFrom<u8> for CookieFallback {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CookieFallback::Reject),
            1 => Ok(CookieFallback::AssumeDensityOne),
            other => Err(format!("ignore_cookie_error_method must be 0 or 1, got {}", other)),
        }
    }
}

// Raw configuration as extracted from figment (App.toml, APP_* env vars)
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub port: u16,
    pub address: String,
    pub static_dir: PathBuf,
    pub watched_directories: Vec<String>,
    pub file_types: Vec<String>,
    pub file_type_conversion: String,
    pub cache_suffix: String,
    pub cookie_name: String,
    pub scale_by: ScaleBy,
    pub breakpoints: Vec<u32>,
    pub direct_scaling: bool,
    pub direct_scaling_param: String,
    pub direct_scale_sizes: Vec<u32>,
    pub convertible_file_types: Vec<String>,
    pub convertible_param: String,
    pub save_with_metadata: bool,
    pub ignore_cookie_error_method: CookieFallback,
    pub animated: bool,
    pub transform_timeout: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
            static_dir: PathBuf::from("public"),
            watched_directories: vec!["/images".to_string()],
            file_types: ["webp", "jpg", "jpeg", "png", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            file_type_conversion: String::new(),
            cache_suffix: "-cache".to_string(),
            cookie_name: "screen".to_string(),
            scale_by: ScaleBy::Breakpoint,
            breakpoints: vec![
                320, 480, 640, 800, 1024, 1280, 1366, 1440, 1600, 1920, 2048, 2560, 3440, 4096,
            ],
            direct_scaling: false,
            direct_scaling_param: "w".to_string(),
            direct_scale_sizes: Vec::new(),
            convertible_file_types: Vec::new(),
            convertible_param: "as".to_string(),
            save_with_metadata: true,
            ignore_cookie_error_method: CookieFallback::Reject,
            animated: false,
            transform_timeout: 30,
        }
    }
}

/// Validated, normalized configuration shared read-only by every request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub static_dir: PathBuf,
    pub watched_directories: Vec<Regex>,
    pub file_types: Vec<String>,
    pub file_type_conversion: Option<String>,
    pub cache_suffix: String,
    pub cookie_pattern: Regex,
    pub scale_by: ScaleBy,
    pub breakpoints: Vec<u32>,
    pub direct_scaling: bool,
    pub direct_scaling_param: String,
    pub direct_scale_sizes: Vec<u32>,
    pub convertible_file_types: Vec<String>,
    pub convertible_param: String,
    pub save_with_metadata: bool,
    pub cookie_fallback: CookieFallback,
    pub animated: bool,
    pub transform_timeout: Duration,
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        if config.cache_suffix.is_empty() {
            return Err(ConfigError::Empty("cache_suffix"));
        }
        if config.cookie_name.is_empty() {
            return Err(ConfigError::Empty("cookie_name"));
        }

        let static_dir = if config.static_dir.is_absolute() {
            config.static_dir.clone()
        } else {
            std::env::current_dir()?.join(&config.static_dir)
        };

        let watched_directories = config
            .watched_directories
            .iter()
            .map(|pattern| {
                watch_pattern(pattern)
                    .map_err(|e| ConfigError::WatchPattern(pattern.clone(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cookie_pattern = Regex::new(&format!(
            "(^|;| ){}=([^,]+),([^;]+)",
            regex::escape(&config.cookie_name)
        ))
        .map_err(|e| ConfigError::CookiePattern(config.cookie_name.clone(), e))?;

        let mut breakpoints = config.breakpoints.clone();
        if breakpoints.contains(&0) {
            return Err(ConfigError::ZeroBreakpoint);
        }
        if config.scale_by == ScaleBy::Breakpoint && breakpoints.is_empty() {
            return Err(ConfigError::NoBreakpoints);
        }
        breakpoints.sort_unstable();
        breakpoints.dedup();

        if config.direct_scale_sizes.contains(&0) {
            return Err(ConfigError::ZeroDirectScaleSize);
        }
        if config.transform_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let file_type_conversion = match normalize_extension(&config.file_type_conversion) {
            ext if ext.is_empty() => None,
            ext => Some(conversion_target(ext)?),
        };

        let convertible_file_types = config
            .convertible_file_types
            .iter()
            .map(|ext| conversion_target(normalize_extension(ext)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            static_dir,
            watched_directories,
            file_types: config
                .file_types
                .iter()
                .map(|ext| normalize_extension(ext))
                .filter(|ext| !ext.is_empty())
                .collect(),
            file_type_conversion,
            cache_suffix: config.cache_suffix.clone(),
            cookie_pattern,
            scale_by: config.scale_by,
            breakpoints,
            direct_scaling: config.direct_scaling,
            direct_scaling_param: config.direct_scaling_param.clone(),
            direct_scale_sizes: config.direct_scale_sizes.clone(),
            convertible_file_types,
            convertible_param: config.convertible_param.clone(),
            save_with_metadata: config.save_with_metadata,
            cookie_fallback: config.ignore_cookie_error_method,
            animated: config.animated,
            transform_timeout: Duration::from_secs(config.transform_timeout),
        })
    }
}

// Anchored match on the directory part; `*` stands for one or more segments
fn watch_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("[^/].*");
    Regex::new(&format!("^{}$", body))
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

fn conversion_target(ext: String) -> Result<String, ConfigError> {
    match ImageConversionFormat::from_extension(&ext) {
        Some(format) if format.can_encode() => Ok(ext),
        _ => Err(ConfigError::UnsupportedConversion(ext)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_config(&AppConfig::default()).unwrap();
        assert_eq!(settings.breakpoints.len(), 14);
        assert_eq!(settings.breakpoints.last(), Some(&4096));
        assert!(settings.file_type_conversion.is_none());
        assert_eq!(settings.cookie_fallback, CookieFallback::Reject);
        assert!(settings.static_dir.is_absolute());
    }

    #[test]
    fn breakpoints_are_sorted_once() {
        let config = AppConfig {
            breakpoints: vec![800, 320, 640, 320],
            ..AppConfig::default()
        };
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.breakpoints, vec![320, 640, 800]);
    }

    #[test]
    fn literal_watch_pattern_is_anchored() {
        let pattern = watch_pattern("/images").unwrap();
        assert!(pattern.is_match("/images"));
        assert!(!pattern.is_match("/images/sub"));
        assert!(!pattern.is_match("/static/images"));
        assert!(!pattern.is_match("/Images"));
    }

    #[test]
    fn wildcard_watch_pattern_needs_a_segment() {
        let pattern = watch_pattern("/media/*").unwrap();
        assert!(pattern.is_match("/media/a"));
        assert!(pattern.is_match("/media/a/b"));
        assert!(!pattern.is_match("/media/"));
        assert!(!pattern.is_match("/media"));
    }

    #[test]
    fn dots_in_patterns_are_literal() {
        let pattern = watch_pattern("/v1.0").unwrap();
        assert!(pattern.is_match("/v1.0"));
        assert!(!pattern.is_match("/v1x0"));
    }

    #[test]
    fn extensions_are_normalized() {
        let config = AppConfig {
            file_types: vec!["JPG".to_string(), ".png".to_string(), " ".to_string()],
            file_type_conversion: ".WEBP".to_string(),
            ..AppConfig::default()
        };
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.file_types, vec!["jpg", "png"]);
        assert_eq!(settings.file_type_conversion.as_deref(), Some("webp"));
    }

    #[test]
    fn rejects_unknown_conversion_target() {
        let config = AppConfig {
            convertible_file_types: vec!["heic".to_string()],
            ..AppConfig::default()
        };
        assert!(matches!(
            Settings::from_config(&config),
            Err(ConfigError::UnsupportedConversion(ext)) if ext == "heic"
        ));
    }

    #[test]
    fn rejects_empty_ladder_for_breakpoint_scaling() {
        let config = AppConfig {
            breakpoints: Vec::new(),
            ..AppConfig::default()
        };
        assert!(matches!(
            Settings::from_config(&config),
            Err(ConfigError::NoBreakpoints)
        ));

        let viewport = AppConfig {
            breakpoints: Vec::new(),
            scale_by: ScaleBy::Viewport,
            ..AppConfig::default()
        };
        assert!(Settings::from_config(&viewport).is_ok());
    }

    #[test]
    fn rejects_zero_sizes() {
        let config = AppConfig {
            direct_scale_sizes: vec![100, 0],
            ..AppConfig::default()
        };
        assert!(matches!(
            Settings::from_config(&config),
            Err(ConfigError::ZeroDirectScaleSize)
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = AppConfig {
            transform_timeout: 0,
            ..AppConfig::default()
        };
        assert!(matches!(
            Settings::from_config(&config),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn cookie_fallback_from_integer() {
        assert_eq!(CookieFallback::try_from(1u8), Ok(CookieFallback::AssumeDensityOne));
        assert!(CookieFallback::try_from(2u8).is_err());
    }
}
