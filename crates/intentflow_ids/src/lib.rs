//! Shared identifier wrappers for Intentflow.
//!
//! Every value that crosses a component boundary (store row id, user, channel,
//! correlation key) gets a newtype so a user id can never be passed where a
//! channel is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing or validating an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

// ============================================================================
// Intent ID - row identifier assigned by the store
// ============================================================================

/// Intent identifier (store-assigned, monotonically increasing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(i64);

impl IntentId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for IntentId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| IdParseError::new(format!("Invalid intent ID '{}': {}", s, e)))
    }
}

// ============================================================================
// User ID / Channel - validated free-form strings
// ============================================================================

/// User identifier (phone number, account id, ...). Never blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdParseError::new("userId is required"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Origin medium of a message (WHATSAPP, WEB, MOBILE, API, ...).
///
/// Deliberately not an enum: a new channel must not need a core code change.
/// Normalised to upper case; only `[A-Za-z0-9_-]` is accepted so the value can
/// never break the `:`-separated correlation key format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel(String);

impl Channel {
    /// Channel assumed when an adapter does not name one.
    pub const DEFAULT: &'static str = "WEB";

    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdParseError::new("channel must not be empty"));
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-'))
        {
            return Err(IdParseError::new(format!(
                "Invalid channel '{}': unexpected character '{}'",
                trimmed, bad
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Parse an optional adapter-supplied channel, falling back to `WEB`.
    pub fn parse_or_default(value: Option<&str>) -> Result<Self, IdParseError> {
        match value {
            Some(raw) if !raw.trim().is_empty() => Self::parse(raw),
            _ => Ok(Self(Self::DEFAULT.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_string_newtype {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(UserId);
impl_string_newtype!(Channel);

// ============================================================================
// Correlation Key - `{channel}:{userId}:{timestamp}:{random}`
// ============================================================================

/// Globally unique, deduplicating key of a staged intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Length of the random suffix.
    pub const SUFFIX_LEN: usize = 8;

    /// Build a fresh key for a message received at `timestamp_millis`.
    ///
    /// Two calls within the same millisecond still differ in the random suffix.
    pub fn generate(channel: &Channel, user_id: &UserId, timestamp_millis: i64) -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}:{}:{}:{}",
            channel,
            user_id,
            timestamp_millis,
            &random[..Self::SUFFIX_LEN]
        ))
    }

    /// Accept a key produced elsewhere (adapter delivery ids, stored rows).
    pub fn parse(value: &str) -> Result<Self, IdParseError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdParseError::new("correlation key must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Timestamp segment, when the key follows the generated format.
    pub fn timestamp_millis(&self) -> Option<i64> {
        let mut parts = self.0.rsplitn(3, ':');
        let _random = parts.next()?;
        parts.next()?.parse().ok()
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_normalises_case() {
        let channel = Channel::parse(" whatsapp ").unwrap();
        assert_eq!(channel.as_str(), "WHATSAPP");
    }

    #[test]
    fn test_channel_rejects_separator() {
        assert!(Channel::parse("WEB:evil").is_err());
        assert!(Channel::parse("   ").is_err());
    }

    #[test]
    fn test_channel_default() {
        assert_eq!(Channel::parse_or_default(None).unwrap().as_str(), "WEB");
        assert_eq!(Channel::parse_or_default(Some("")).unwrap().as_str(), "WEB");
        assert_eq!(
            Channel::parse_or_default(Some("mobile")).unwrap().as_str(),
            "MOBILE"
        );
    }

    #[test]
    fn test_user_id_rejects_blank() {
        let err = UserId::parse("  ").unwrap_err();
        assert_eq!(err.to_string(), "userId is required");
    }

    #[test]
    fn test_correlation_key_format() {
        let channel = Channel::parse("WEB").unwrap();
        let user = UserId::parse("U1").unwrap();
        let key = CorrelationKey::generate(&channel, &user, 1_700_000_000_123);

        let parts: Vec<&str> = key.as_str().split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "WEB");
        assert_eq!(parts[1], "U1");
        assert_eq!(parts[2], "1700000000123");
        assert_eq!(parts[3].len(), CorrelationKey::SUFFIX_LEN);
        assert_eq!(key.timestamp_millis(), Some(1_700_000_000_123));
    }

    #[test]
    fn test_same_millisecond_keys_differ() {
        let channel = Channel::parse("WEB").unwrap();
        let user = UserId::parse("U1").unwrap();
        let a = CorrelationKey::generate(&channel, &user, 42);
        let b = CorrelationKey::generate(&channel, &user, 42);
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_id_serde_validates() {
        let parsed: Result<UserId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
        let parsed: UserId = serde_json::from_str("\"U1\"").unwrap();
        assert_eq!(parsed.as_str(), "U1");
    }
}
