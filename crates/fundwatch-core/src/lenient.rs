//! Tolerant readers for values produced by AI extraction or by older
//! snapshot writers: amounts as numbers or `"$1.2M"` strings, years as
//! strings or numbers, and empty strings standing in for absent text.

use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

/// Parses an amount such as `"$1,234"`, `"150K"` or `"2.5M"` into whole dollars.
///
/// Unparsable or negative input yields 0.
pub fn parse_amount_str(raw: &str) -> u64 {
    let cleaned: String = raw
        .chars()
        .filter(|ch| !matches!(ch, '$' | ',') && !ch.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return 0;
    }

    let upper = cleaned.to_ascii_uppercase();
    let (number, multiplier) = if let Some(stripped) = upper.strip_suffix('K') {
        (stripped, 1_000.0)
    } else if let Some(stripped) = upper.strip_suffix('M') {
        (stripped, 1_000_000.0)
    } else if let Some(stripped) = upper.strip_suffix('B') {
        (stripped, 1_000_000_000.0)
    } else {
        (upper.as_str(), 1.0)
    };

    leading_float(number)
        .map(|value| round_dollars(value * multiplier))
        .unwrap_or(0)
}

pub fn parse_amount_value(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(round_dollars))
            .unwrap_or(0),
        Value::String(text) => parse_amount_str(text),
        _ => 0,
    }
}

pub fn parse_election_year(value: &Value) -> Option<u16> {
    let year = match value {
        Value::Number(number) => u16::try_from(number.as_u64()?).ok()?,
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.len() != 4 || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
                return None;
            }
            trimmed.parse().ok()?
        }
        _ => return None,
    };

    (1000..=9999).contains(&year).then_some(year)
}

pub fn normalize_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_amount_value(&value))
}

pub fn deserialize_optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(normalize_text(value.as_deref()))
}

/// Years travel as 4-digit strings in the published document.
pub mod election_year {
    use super::*;

    pub fn serialize<S>(value: &Option<u16>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(year) => serializer.serialize_str(&year.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(parse_election_year(&value))
    }
}

fn leading_float(text: &str) -> Option<f64> {
    let end = text
        .char_indices()
        .find(|(index, ch)| !(ch.is_ascii_digit() || *ch == '.' || (*index == 0 && *ch == '-')))
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    text[..end].parse::<f64>().ok()
}

fn round_dollars(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    value.round() as u64
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn amount_strings_expand_suffixes() {
        assert_eq!(parse_amount_str("$1,234"), 1_234);
        assert_eq!(parse_amount_str("150K"), 150_000);
        assert_eq!(parse_amount_str("$2.5M"), 2_500_000);
        assert_eq!(parse_amount_str("1.25 m"), 1_250_000);
        assert_eq!(parse_amount_str("12.6"), 13);
        assert_eq!(parse_amount_str("n/a"), 0);
        assert_eq!(parse_amount_str("-500"), 0);
        assert_eq!(parse_amount_str(""), 0);
    }

    #[test]
    fn amount_values_accept_numbers_and_strings() {
        assert_eq!(parse_amount_value(&json!(42)), 42);
        assert_eq!(parse_amount_value(&json!(41.5)), 42);
        assert_eq!(parse_amount_value(&json!("$3K")), 3_000);
        assert_eq!(parse_amount_value(&json!(-10)), 0);
        assert_eq!(parse_amount_value(&json!(null)), 0);
        assert_eq!(parse_amount_value(&json!([1, 2])), 0);
    }

    #[test]
    fn election_years_must_have_four_digits() {
        assert_eq!(parse_election_year(&json!("2026")), Some(2026));
        assert_eq!(parse_election_year(&json!(2028)), Some(2028));
        assert_eq!(parse_election_year(&json!("26")), None);
        assert_eq!(parse_election_year(&json!("")), None);
        assert_eq!(parse_election_year(&json!(70000)), None);
    }
}
