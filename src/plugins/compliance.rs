//! Compliance gate
//!
//! Every raw event passes through [`ComplianceGate::admit`] before anything about it is
//! stored. The gate:
//! - validates the session id is an anonymous token (ULID or salted SHA-256 digest)
//! - rejects PII in indicator keys and values (email, phone, SSN, street address,
//!   personal names, IPv4 addresses, identifier-length digit runs)
//! - enforces the indicator whitelist, primitive value types and size ceilings
//!
//! The gate has no side effects. Callers count rejections by [`RejectReason::code`];
//! rejection reasons never carry the offending content.

use crate::core::config::GateConfig;
use crate::core::model::{AnalyticsRecord, Category, IndicatorValue, Indicators, SyncState};
use crate::core::time::{self, Clock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Latest observation instant accepted (2100-01-01T00:00:00Z).
const MAX_TIMESTAMP_MS: i64 = 4_102_444_800_000;

/// Event as handed over by the application layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawEvent {
    pub session_id: String,
    pub category: String,
    pub indicators: Map<String, Value>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
    StreetAddress,
    PersonName,
    IpAddress,
    NumericIdentifier,
    SensitiveKey,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Ssn => "ssn",
            Self::StreetAddress => "street_address",
            Self::PersonName => "person_name",
            Self::IpAddress => "ip_address",
            Self::NumericIdentifier => "numeric_identifier",
            Self::SensitiveKey => "sensitive_key",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "kind")]
pub enum RejectReason {
    PiiDetected(PiiKind),
    MalformedSessionId,
    UnknownCategory,
    InvalidTimestamp,
    TooManyIndicators,
    IndicatorNotAllowed,
    NonPrimitiveValue,
    IndicatorTooLarge,
}

impl RejectReason {
    /// Stable code used for the aggregate rejection counters.
    pub fn code(&self) -> String {
        match self {
            Self::PiiDetected(kind) => format!("pii_{}", kind.as_str()),
            Self::MalformedSessionId => "malformed_session_id".to_string(),
            Self::UnknownCategory => "unknown_category".to_string(),
            Self::InvalidTimestamp => "invalid_timestamp".to_string(),
            Self::TooManyIndicators => "too_many_indicators".to_string(),
            Self::IndicatorNotAllowed => "indicator_not_allowed".to_string(),
            Self::NonPrimitiveValue => "non_primitive_value".to_string(),
            Self::IndicatorTooLarge => "indicator_too_large".to_string(),
        }
    }

    pub fn is_pii(&self) -> bool {
        matches!(self, Self::PiiDetected(_))
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PiiDetected(kind) => write!(f, "PII detected ({})", kind.as_str()),
            Self::MalformedSessionId => write!(f, "Session id is not an anonymous token"),
            Self::UnknownCategory => write!(f, "Unknown category"),
            Self::InvalidTimestamp => write!(f, "Invalid timestamp"),
            Self::TooManyIndicators => write!(f, "Too many indicators"),
            Self::IndicatorNotAllowed => write!(f, "Indicator key not whitelisted"),
            Self::NonPrimitiveValue => write!(f, "Indicator value is not a primitive"),
            Self::IndicatorTooLarge => write!(f, "Indicator value exceeds size ceiling"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted(AnalyticsRecord),
    Rejected(RejectReason),
    /// Analytics is switched off; the event was dropped without inspection.
    Disabled,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Value patterns that identify a person or a device.
static PII_PATTERNS: LazyLock<Vec<(Regex, PiiKind)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}").unwrap(),
            PiiKind::Email,
        ),
        // 123-45-6789, 123 45 6789
        (
            Regex::new(r"\b\d{3}[- ]\d{2}[- ]\d{4}\b").unwrap(),
            PiiKind::Ssn,
        ),
        // (555) 123-4567, 555.123.4567, +1 555 123 4567
        (
            Regex::new(r"(?:\+?\d{1,3}[\s.\-]?)?\(?\b\d{3}\)?[\s.\-]?\d{3}[\s.\-]\d{4}\b").unwrap(),
            PiiKind::Phone,
        ),
        (
            Regex::new(r"\+\d{1,3}[\s.\-]?\d{2,4}(?:[\s.\-]?\d{2,4}){2,4}").unwrap(),
            PiiKind::Phone,
        ),
        (
            Regex::new(r"(?i)\b\d{1,5}\s+(?:[a-z0-9.'\-]+\s+){0,4}(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way|place|pl|terrace|circle|cir|highway|hwy)\b").unwrap(),
            PiiKind::StreetAddress,
        ),
        (
            Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").unwrap(),
            PiiKind::IpAddress,
        ),
        // bare runs long enough to be an SSN, phone number or IMEI
        (Regex::new(r"\b\d{9,}\b").unwrap(), PiiKind::NumericIdentifier),
    ]
});

/// "Firstname Lastname" shaped pairs.
static TITLE_CASE_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z]\.)?\s+[A-Z][a-z]+\b").unwrap());

static KEY_FORMAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]{0,47}$").unwrap());

static ULID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-HJKMNP-TV-Z]{26}$").unwrap());

static DIGEST_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").unwrap());

/// Key fragments that name personal data outright.
const SENSITIVE_KEY_TOKENS: &[&str] = &[
    "email", "mail", "name", "firstname", "lastname", "surname", "fullname", "username",
    "phone", "mobile", "tel", "address", "street", "zip", "zipcode", "postcode", "postal",
    "ssn", "birth", "birthday", "dob", "student", "parent", "guardian", "ip", "device",
    "imei", "idfa", "gaid", "android", "lat", "lon", "lng", "latitude", "longitude",
    "location", "gps", "photo", "password", "contact",
];

/// Common given names. Names that are also everyday feeling words (hope, joy, grace, ...)
/// are deliberately absent so emotion labels pass.
const COMMON_FIRST_NAMES: &[&str] = &[
    "aaliyah", "abigail", "aiden", "alexander", "amelia", "aria", "ava", "benjamin",
    "caleb", "camila", "carter", "charlotte", "chloe", "daniel", "david", "elijah",
    "elizabeth", "ella", "emily", "emma", "ethan", "evelyn", "gabriel", "harper",
    "henry", "isabella", "jackson", "jacob", "james", "jayden", "john", "joseph",
    "joshua", "layla", "liam", "logan", "lucas", "madison", "mason", "mateo",
    "matthew", "mia", "michael", "nora", "noah", "oliver", "olivia", "owen", "riley",
    "samuel", "scarlett", "sebastian", "sofia", "sophia", "william", "wyatt", "zoe",
    "maria", "jose", "juan", "luis", "carlos", "ana", "fatima", "mohammed", "muhammad",
    "aisha", "omar", "yusuf", "wei", "priya", "arjun",
];

/// Mint a session token from a per-install salt and a rotating seed.
///
/// The output is a 64-hex-digit SHA-256 digest that the gate accepts as anonymous.
pub fn anonymous_session_id(salt: &[u8], seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update([0u8]);
    hasher.update(seed.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// ULIDs and salted digests only. UUIDs are refused because advertising and platform
/// device ids share that shape.
pub fn is_anonymous_session_id(session_id: &str) -> bool {
    ULID_TOKEN.is_match(session_id) || DIGEST_TOKEN.is_match(session_id)
}

/// Key whitelist entry with `*` wildcards.
#[derive(Debug, Clone)]
struct KeyPattern(String);

impl KeyPattern {
    fn matches(&self, key: &str) -> bool {
        glob_match(&self.0, key)
    }
}

/// Single-`*` glob: `*`, `prefix*`, `*suffix`, `pre*suf`, or exact.
fn glob_match(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            text.len() >= prefix.len() + suffix.len()
                && text.starts_with(prefix)
                && text.ends_with(suffix)
        }
        None => pattern == text,
    }
}

pub struct ComplianceGate {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    allowed_keys: Vec<KeyPattern>,
    blocked_names: HashSet<String>,
}

impl ComplianceGate {
    pub fn new(config: GateConfig, clock: Arc<dyn Clock>) -> Self {
        let allowed_keys = config
            .allowed_key_patterns
            .iter()
            .map(|p| KeyPattern(p.clone()))
            .collect();
        let blocked_names = COMMON_FIRST_NAMES
            .iter()
            .map(|s| s.to_string())
            .chain(config.extra_blocked_names.iter().map(|s| s.to_lowercase()))
            .collect();
        Self {
            config,
            clock,
            allowed_keys,
            blocked_names,
        }
    }

    /// Validate `raw` and build an anonymized record, or say why not.
    pub fn admit(&self, raw: &RawEvent) -> Admission {
        match self.check(raw) {
            Ok((category, indicators)) => {
                let created_at = self.clock.now_ms();
                Admission::Admitted(AnalyticsRecord {
                    id: time::new_id(),
                    session_id: raw.session_id.clone(),
                    category,
                    indicators,
                    timestamp: raw.timestamp.unwrap_or(created_at),
                    created_at,
                    sync_state: SyncState::Unsynced,
                    batch_id: None,
                })
            }
            Err(reason) => Admission::Rejected(reason),
        }
    }

    fn check(&self, raw: &RawEvent) -> Result<(Category, Indicators), RejectReason> {
        // PII first, so a leaking event is always reported as a PII rejection.
        for (key, value) in &raw.indicators {
            if let Some(kind) = self.scan_value(value) {
                return Err(RejectReason::PiiDetected(kind));
            }
            if is_sensitive_key(key) {
                return Err(RejectReason::PiiDetected(PiiKind::SensitiveKey));
            }
        }
        // Name lists are not applied here: random tokens can spell short names.
        if let Some(kind) = scan_patterns(&raw.session_id) {
            return Err(RejectReason::PiiDetected(kind));
        }

        if !is_anonymous_session_id(&raw.session_id) {
            return Err(RejectReason::MalformedSessionId);
        }
        let category: Category = raw
            .category
            .parse()
            .map_err(|_| RejectReason::UnknownCategory)?;
        if let Some(ts) = raw.timestamp {
            if ts <= 0 || ts > MAX_TIMESTAMP_MS {
                return Err(RejectReason::InvalidTimestamp);
            }
        }
        if raw.indicators.len() > self.config.max_indicators {
            return Err(RejectReason::TooManyIndicators);
        }

        let mut validated = BTreeMap::new();
        for (key, value) in &raw.indicators {
            if !KEY_FORMAT.is_match(key) || !self.allowed_keys.iter().any(|p| p.matches(key)) {
                return Err(RejectReason::IndicatorNotAllowed);
            }
            validated.insert(key.clone(), self.to_indicator(value)?);
        }
        Ok((category, Indicators::from_validated(validated)))
    }

    fn to_indicator(&self, value: &Value) -> Result<IndicatorValue, RejectReason> {
        match value {
            Value::Bool(b) => Ok(IndicatorValue::Flag(*b)),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(IndicatorValue::Integer(i)),
                (None, Some(f)) if f.is_finite() => Ok(IndicatorValue::Decimal(f)),
                _ => Err(RejectReason::NonPrimitiveValue),
            },
            Value::String(s) => {
                if s.chars().count() > self.config.max_text_len {
                    Err(RejectReason::IndicatorTooLarge)
                } else {
                    Ok(IndicatorValue::Label(s.clone()))
                }
            }
            Value::Null | Value::Array(_) | Value::Object(_) => Err(RejectReason::NonPrimitiveValue),
        }
    }

    /// Walk a JSON value looking for PII, including inside values the gate will later
    /// refuse for their shape.
    fn scan_value(&self, value: &Value) -> Option<PiiKind> {
        match value {
            Value::String(s) => self.scan_text(s),
            Value::Number(n) => n.as_i64().and_then(scan_integer),
            Value::Array(items) => items.iter().find_map(|v| self.scan_value(v)),
            Value::Object(map) => map.iter().find_map(|(k, v)| {
                if is_sensitive_key(k) {
                    Some(PiiKind::SensitiveKey)
                } else {
                    self.scan_value(v)
                }
            }),
            Value::Bool(_) | Value::Null => None,
        }
    }

    fn scan_text(&self, text: &str) -> Option<PiiKind> {
        if let Some(kind) = scan_patterns(text) {
            return Some(kind);
        }
        if self.config.reject_title_case_pairs && TITLE_CASE_PAIR.is_match(text) {
            return Some(PiiKind::PersonName);
        }
        let has_name = text
            .split(|c: char| !c.is_alphabetic())
            .filter(|t| !t.is_empty())
            .any(|t| self.blocked_names.contains(&t.to_lowercase()));
        has_name.then_some(PiiKind::PersonName)
    }
}

fn scan_patterns(text: &str) -> Option<PiiKind> {
    PII_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, kind)| *kind)
}

/// Integers with SSN/phone length (9 to 11 digits) are treated as identifiers.
fn scan_integer(n: i64) -> Option<PiiKind> {
    let digits = n.unsigned_abs().checked_ilog10().map(|d| d + 1).unwrap_or(1);
    (9..=11).contains(&digits).then_some(PiiKind::NumericIdentifier)
}

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| SENSITIVE_KEY_TOKENS.contains(&token))
}
