//! Runtime server feature detection.
//!
//! A server's declared feature set (from its build configuration) and its
//! actual feature set can drift, so the harness can ask a live server what
//! it supports: `server_version("features")` yields a MOO list of feature
//! names and `server_version("options")` a nested list of compile-time
//! options. Test suites use the derived flags to skip cases a given build
//! cannot run.

use crate::client::MooClient;
use crate::error::Result;
use std::collections::HashMap;

/// A parsed compile-time option value.
///
/// MOO encodes option values loosely: numbers stay numbers, strings are
/// quoted, and boolean-ish options come back as `#-1` (enabled) or `{0}`
/// (disabled). Anything else is preserved raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// A numeric option, e.g. `INT_TYPE_BITSIZE` = 64.
    Int(i64),
    /// A string option.
    Str(String),
    /// A boolean-ish option (`#-1` enabled, `{0}` disabled).
    Flag(bool),
    /// An unrecognized encoding, kept verbatim.
    Raw(String),
}

/// Detected features of a running MOO server.
#[derive(Debug, Clone, Default)]
pub struct ServerFeatures {
    /// Version string from `server_version()`.
    pub version: String,
    /// Feature names from `server_version("features")`.
    pub features: Vec<String>,
    /// Compile-time options from `server_version("options")`.
    pub options: HashMap<String, OptionValue>,
}

impl ServerFeatures {
    /// Whether the server was built with 64-bit integers.
    pub fn has_i64(&self) -> bool {
        matches!(
            self.options.get("INT_TYPE_BITSIZE"),
            Some(OptionValue::Int(64))
        )
    }

    /// Whether Unicode string support is available.
    pub fn has_unicode(&self) -> bool {
        self.has_feature("unicode")
    }

    /// Whether XML parsing builtins are available.
    pub fn has_xml(&self) -> bool {
        self.has_feature("xml")
    }

    /// Whether waif objects are available.
    pub fn has_waifs(&self) -> bool {
        self.has_feature("waif") || self.has_feature("waifs")
    }

    /// Whether waif dictionary syntax is available.
    pub fn has_waif_dict(&self) -> bool {
        self.has_waifs()
            && matches!(self.options.get("WAIF_DICT"), Some(OptionValue::Flag(true)))
    }

    /// Whether regular-expression builtins are available.
    pub fn has_regexp(&self) -> bool {
        self.has_feature("regexp")
    }

    fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }

    /// Check that every named requirement is satisfied.
    ///
    /// Recognized names: `i64`, `i32`, `unicode`, `xml`, `waifs`,
    /// `waif_dict`, `regexp`. Unknown names are never satisfied.
    pub fn supports(&self, required: &[&str]) -> bool {
        required.iter().all(|&name| match name {
            "i64" => self.has_i64(),
            "i32" => !self.has_i64(),
            "unicode" => self.has_unicode(),
            "xml" => self.has_xml(),
            "waifs" => self.has_waifs(),
            "waif_dict" => self.has_waif_dict(),
            "regexp" => self.has_regexp(),
            _ => false,
        })
    }

    /// Generate a configuration name from the detected features,
    /// e.g. `i64_unicode_waifs_waif_dict`.
    pub fn config_name(&self) -> String {
        let mut parts = vec![if self.has_i64() { "i64" } else { "i32" }];
        if self.has_unicode() {
            parts.push("unicode");
        }
        if self.has_xml() {
            parts.push("xml");
        }
        if self.has_waifs() {
            parts.push("waifs");
            if self.has_waif_dict() {
                parts.push("waif_dict");
            }
        }
        parts.join("_")
    }

    /// Query a connected client for its version, features, and options.
    ///
    /// Evaluation failures are tolerated — a server without
    /// `server_version("features")` just yields an empty feature list.
    pub async fn detect(client: &mut MooClient) -> Result<Self> {
        let mut detected = Self::default();

        if let Ok(version) = client.eval_expect("server_version()").await {
            detected.version = version.trim_matches('"').to_string();
        }

        if let Ok(list) = client.eval_expect("server_version(\"features\")").await {
            detected.features = parse_string_list(&list);
        }

        if let Ok(list) = client.eval_expect("server_version(\"options\")").await {
            detected.options = parse_options_list(&list);
        }

        Ok(detected)
    }
}

/// Parse a flat MOO string list: `{"feat1", "feat2"}`.
pub fn parse_string_list(moo_list: &str) -> Vec<String> {
    let trimmed = moo_list.trim();
    let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    else {
        return Vec::new();
    };

    inner
        .split(',')
        .map(|item| item.trim().trim_matches('"').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse a MOO options list into a map.
///
/// The format is `{{"key1", value1}, {"key2", value2}, ...}` where values
/// are numbers, quoted strings, `#-1` (enabled), or `{0}` (disabled).
pub fn parse_options_list(moo_list: &str) -> HashMap<String, OptionValue> {
    let mut options = HashMap::new();

    let trimmed = moo_list.trim();
    let Some(content) = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    else {
        return options;
    };

    // Walk the nested list, collecting each top-level {key, value} pair
    let mut depth = 0usize;
    let mut current = String::new();
    let mut pairs = Vec::new();
    for ch in content.chars() {
        match ch {
            '{' => {
                depth += 1;
                if depth == 1 {
                    current.clear();
                    continue;
                }
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    pairs.push(current.trim().to_string());
                    continue;
                }
            }
            _ => {}
        }
        if depth > 0 {
            current.push(ch);
        }
    }

    for pair in pairs {
        if let Some((key, value)) = split_pair(&pair) {
            options.insert(key, parse_option_value(&value));
        }
    }

    options
}

/// Split `"key", value` on the first comma outside quotes.
fn split_pair(pair: &str) -> Option<(String, String)> {
    let mut in_quotes = false;
    for (i, ch) in pair.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let key = pair[..i].trim().trim_matches('"').to_string();
                let value = pair[i + 1..].trim().to_string();
                return Some((key, value));
            }
            _ => {}
        }
    }
    None
}

fn parse_option_value(value: &str) -> OptionValue {
    if let Ok(n) = value.parse::<i64>() {
        return OptionValue::Int(n);
    }
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return OptionValue::Str(value[1..value.len() - 1].to_string());
    }
    match value {
        "#-1" => OptionValue::Flag(true),
        "{0}" => OptionValue::Flag(false),
        other => OptionValue::Raw(other.to_string()),
    }
}
