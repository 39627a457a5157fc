use std::path::PathBuf;

use regex::Regex;

use crate::classifier::OriginAsset;
use crate::config::Settings;

/// The parts of an HTTP request the engine looks at, lifted out of the
/// host framework.
#[derive(Debug, Clone, Default)]
pub struct RequestSignals {
    /// Percent-decoded request path without query.
    pub path: String,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    pub cookie: Option<String>,
    pub accept: Option<String>,
}

impl RequestSignals {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        self.cookie = Some(cookie.to_string());
        self
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        self.accept = Some(accept.to_string());
        self
    }

    // First value wins, like URLSearchParams.get
    fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Device pixel ratio and logical width read from the sizing cookie.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceParameters {
    pub density: f64,
    pub width: f64,
}

/// Everything known about one request, fixed once built.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url_path: String,
    pub directory: String,
    pub origin_path: PathBuf,
    pub file_stem: String,
    pub extension: String,
    /// Explicit width override; 0 when absent or not a positive number.
    pub query_width: u32,
    /// Requested conversion target, lower-cased.
    pub query_format: Option<String>,
    pub device: Option<DeviceParameters>,
    pub accept: Option<String>,
}

impl RequestContext {
    pub fn new(asset: OriginAsset, signals: &RequestSignals, settings: &Settings) -> Self {
        let query_width = signals
            .query_value(&settings.direct_scaling_param)
            .and_then(parse_leading_int)
            .filter(|w| *w > 0)
            .map(|w| w.min(u32::MAX as i64) as u32)
            .unwrap_or(0);

        let query_format = signals
            .query_value(&settings.convertible_param)
            .map(|f| f.to_lowercase())
            .filter(|f| !f.is_empty());

        Self {
            url_path: asset.url_path,
            directory: asset.directory,
            origin_path: asset.origin_path,
            file_stem: asset.file_stem,
            extension: asset.extension,
            query_width,
            query_format,
            device: signals
                .cookie
                .as_deref()
                .and_then(|header| parse_device_cookie(header, &settings.cookie_pattern)),
            accept: signals.accept.clone(),
        }
    }

    pub fn origin_extension(&self) -> String {
        self.extension.to_lowercase()
    }
}

/// Reads `<name>=<density>,<width>` out of a raw `Cookie` header.
///
/// Only the first occurrence counts. Unparseable numbers leave the pair unset.
pub fn parse_device_cookie(header: &str, pattern: &Regex) -> Option<DeviceParameters> {
    let captures = pattern.captures(header)?;
    let density = captures.get(2)?.as_str().trim().parse::<f64>().ok()?;
    let width = captures.get(3)?.as_str().trim().parse::<f64>().ok()?;
    if !density.is_finite() || !width.is_finite() {
        return None;
    }
    Some(DeviceParameters { density, width })
}

// parseInt-style: optional sign and leading digits, the rest is ignored
fn parse_leading_int(value: &str) -> Option<i64> {
    let value = value.trim_start();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let number = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -number } else { number })
}
