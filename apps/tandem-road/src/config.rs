use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_ALLOWED_ORIGINS: &str =
    "http://localhost:5173,http://localhost:3000,http://127.0.0.1:5173,http://127.0.0.1:3000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("allowed origin list contains an empty entry")]
    EmptyOrigin,
    #[error("maximum display name length must be at least 1")]
    ZeroNameLength,
    #[error("default display name must not be blank")]
    BlankDefaultName,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub origins: OriginPolicy,
    pub lobby: LobbyConfig,
    pub shutdown_grace: Duration,
}

/// Per-participant defaults applied by the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyConfig {
    pub default_name: String,
    pub max_name_len: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            default_name: "Guest".to_string(),
            max_name_len: 32,
        }
    }
}

impl LobbyConfig {
    pub fn new(default_name: &str, max_name_len: usize) -> Result<Self, ConfigError> {
        if max_name_len == 0 {
            return Err(ConfigError::ZeroNameLength);
        }
        let default_name = default_name.trim();
        if default_name.is_empty() {
            return Err(ConfigError::BlankDefaultName);
        }
        Ok(Self {
            default_name: truncate_chars(default_name, max_name_len).to_string(),
            max_name_len,
        })
    }

    /// Trimmed and length-capped display name, or `None` when blank.
    pub fn normalize_name(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(truncate_chars(trimmed, self.max_name_len).trim_end().to_string())
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OriginPattern {
    Exact(String),
    /// Literal pieces between `*` wildcards.
    Wildcard(Vec<String>),
}

impl OriginPattern {
    fn parse(raw: &str) -> Self {
        if raw.contains('*') {
            OriginPattern::Wildcard(raw.split('*').map(str::to_string).collect())
        } else {
            OriginPattern::Exact(raw.to_string())
        }
    }

    fn matches(&self, origin: &str) -> bool {
        match self {
            OriginPattern::Exact(expected) => expected == origin,
            OriginPattern::Wildcard(parts) => wildcard_matches(parts, origin),
        }
    }
}

fn wildcard_matches(parts: &[String], text: &str) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return text.is_empty();
    };
    let Some(mut remaining) = text.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for part in middle {
        match remaining.find(part.as_str()) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

/// Browser origins allowed to open the WebSocket. Requests without an
/// `Origin` header (native clients, curl) are always allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPolicy {
    patterns: Vec<OriginPattern>,
}

impl OriginPolicy {
    /// Parse a comma separated allow-list such as
    /// `http://localhost:5173,https://*.example.app`.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        Self::from_patterns(list.split(','))
    }

    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|raw| {
                let raw = raw.as_ref().trim();
                if raw.is_empty() {
                    Err(ConfigError::EmptyOrigin)
                } else {
                    Ok(OriginPattern::parse(raw))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn allow_any() -> Self {
        Self {
            patterns: vec![OriginPattern::parse("*")],
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self.patterns.iter().any(|pattern| pattern.matches(origin)),
        }
    }
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self::parse(DEFAULT_ALLOWED_ORIGINS).unwrap_or_else(|_| Self::allow_any())
    }
}
