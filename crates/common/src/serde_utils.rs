//! Lenient deserializers for numeric fields served as either JSON numbers or
//! decimal strings.
//!
//! Ray-scaled indexes and scaled balances routinely exceed `u64`, so the data
//! service ships them as strings. Plain `serde_json` turns oversized integer
//! literals into `f64`, which is accepted too.

use serde::{Deserialize, Deserializer, de::Error};
use serde_json::Value;

fn number_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a number or numeric string, got {other}"
        ))),
    }
}

/// Deserialize an unsigned integer that may be larger than `u64`.
pub fn u128_lenient<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    let text = number_text(deserializer)?;
    if let Ok(v) = text.parse::<u128>() {
        return Ok(v);
    }
    // Exponent notation ("1e+27") or a float literal.
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v.round() as u128),
        _ => Err(D::Error::custom(format!("invalid unsigned integer: {text}"))),
    }
}

pub fn u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u128_lenient(deserializer)?;
    u64::try_from(value).map_err(|_| D::Error::custom(format!("{value} overflows u64")))
}

pub fn f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = number_text(deserializer)?;
    text.parse::<f64>()
        .map_err(|_| D::Error::custom(format!("invalid number: {text}")))
}
