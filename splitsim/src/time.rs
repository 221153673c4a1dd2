//! Time-string parsing and report formatting.

use std::time::Duration;

use crate::SimError;

/// Parses a colon-delimited time string, fields read right-to-left as
/// seconds, minutes, hours. The seconds field may carry a decimal fraction,
/// and values need not be clock-bounded: `"90"` and `"1:30"` both mean
/// ninety seconds.
pub fn parse_time(input: &str) -> Result<Duration, SimError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SimError::InvalidTime(input.to_string()));
    }
    let fields: Vec<&str> = trimmed.split(':').collect();
    if fields.len() > 3 {
        return Err(SimError::InvalidTime(input.to_string()));
    }

    let mut total = 0.0f64;
    for (place, field) in fields.iter().rev().enumerate() {
        let value = if place == 0 {
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
        } else {
            field.parse::<u64>().ok().map(|v| v as f64)
        };
        let value = value.ok_or_else(|| SimError::InvalidTime(input.to_string()))?;
        total += value * 60f64.powi(place as i32);
    }
    Duration::try_from_secs_f64(total).map_err(|_| SimError::InvalidTime(input.to_string()))
}

/// Formats a duration as `h:mm:ss.cc` for report lines.
pub fn format_duration(value: Duration) -> String {
    let mut secs = value.as_secs();
    let mut centis = (value.subsec_nanos() + 5_000_000) / 10_000_000;
    if centis == 100 {
        secs += 1;
        centis = 0;
    }
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

/// Serializes a `Duration` report field as floating seconds.
pub(crate) mod serde_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Serializes `Option<Duration>` entries as floating seconds or null.
pub(crate) mod serde_secs_opt_list {
    use std::time::Duration;

    use serde::ser::{SerializeSeq, Serializer};

    pub fn serialize<S: Serializer>(
        value: &[Option<Duration>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for entry in value {
            seq.serialize_element(&entry.map(|d| d.as_secs_f64()))?;
        }
        seq.end()
    }
}
