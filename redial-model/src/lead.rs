use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::LeadId;

/// E.164-style phone number. Validated once at construction so the dispatch
/// core never has to re-check formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let digits = raw.strip_prefix('+').unwrap_or(&raw);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ModelError::InvalidPhoneNumber(raw));
        }
        if !(7..=15).contains(&digits.len()) {
            return Err(ModelError::InvalidPhoneNumber(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// BCP 47-ish language tag, lowercased (e.g. `en`, `hi`, `es-mx`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contact to be called. Identity is immutable; only the DND fields are
/// mutated, and only by the compliance gate's registry check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub phone: PhoneNumber,
    pub language: LanguageCode,
    /// Regulatory timezone expressed as a fixed UTC offset in minutes.
    /// Calling-hour checks are evaluated against this local wall clock.
    pub utc_offset_minutes: i32,
    pub dnd_registered: bool,
    pub dnd_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(
        phone: PhoneNumber,
        language: LanguageCode,
        utc_offset_minutes: i32,
    ) -> Self {
        Self {
            id: LeadId::new(),
            phone,
            language,
            utc_offset_minutes,
            dnd_registered: false,
            dnd_checked_at: None,
            created_at: Utc::now(),
        }
    }

    /// Wall clock in the lead's regulatory timezone.
    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or(FixedOffset::east_opt(0).expect("zero offset is valid"));
        now.with_timezone(&offset)
    }

    /// Whether the cached DND result is still inside its freshness window.
    pub fn dnd_is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.dnd_checked_at {
            Some(checked) => now - checked < ttl,
            None => false,
        }
    }
}
