use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const NANOS_DIGITS: usize = 9;

/// Message timestamp as sent by the platform (`"1700000000.000100"`).
///
/// Stored as exact whole seconds plus nanoseconds so that ordering and
/// equality never go through a float. The original text is kept verbatim
/// for output, which means `"100"` and `"100.000"` compare equal but render
/// differently.
#[derive(Debug, Clone)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampParseError(String);

impl fmt::Display for TimestampParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message timestamp `{}`", self.0)
    }
}

impl std::error::Error for TimestampParseError {}

impl Timestamp {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[cfg(test)]
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Accepts the platform's string form and plain JSON numbers.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.to_string().parse().ok(),
            _ => None,
        }
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs, self.nanos)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let raw = input.trim();
        let fail = || TimestampParseError(input.to_string());
        if raw.is_empty() {
            return Err(fail());
        }

        let (whole, frac) = match raw.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (raw, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fail());
        }
        // Sub-nanosecond digits would be lost in the comparison key.
        if frac.bytes().skip(NANOS_DIGITS).any(|b| b != b'0') {
            return Err(fail());
        }

        let secs = whole.parse::<i64>().map_err(|_| fail())?;
        let mut digits: String = frac.chars().take(NANOS_DIGITS).collect();
        while digits.len() < NANOS_DIGITS {
            digits.push('0');
        }
        let nanos = digits.parse::<u32>().map_err(|_| fail())?;

        Ok(Self {
            secs,
            nanos,
            raw: raw.to_string(),
        })
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.secs, self.nanos).cmp(&(other.secs, other.nanos))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
