//! Field decoders for clients that post form-style payloads, where booleans,
//! lists and maps may arrive as strings.
//!
//! Used declaratively: `#[serde(default, deserialize_with = "lenient_bool")]`.

use rust_decimal::Decimal;
use serde::de::{DeserializeOwned, Error};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBool {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// `true`, `1`, `"true"`, `"1"`, `"yes"` and `"on"` are true
pub fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match RawBool::deserialize(deserializer)? {
        RawBool::Bool(value) => Ok(value),
        RawBool::Int(value) => Ok(value != 0),
        RawBool::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => Err(D::Error::custom(format!("'{}' is not a boolean", other))),
        },
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawList<T> {
    List(Vec<T>),
    Text(String),
}

fn parse_list_text<T, E>(text: &str) -> Result<Vec<T>, E>
where
    T: DeserializeOwned,
    E: Error,
{
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if text.starts_with('[') {
        return serde_json::from_str(text).map_err(E::custom);
    }
    // comma separated scalars
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| serde_json::from_value(Value::String(part.to_string())).map_err(E::custom))
        .collect()
}

/// A JSON array, a JSON-encoded array string or a comma separated string
pub fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match RawList::<T>::deserialize(deserializer)? {
        RawList::List(items) => Ok(items),
        RawList::Text(text) => parse_list_text(&text),
    }
}

/// Like [`lenient_vec`], with `null` and a missing field meaning `None`
pub fn lenient_opt_vec<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Option::<RawList<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawList::List(items)) => Ok(Some(items)),
        Some(RawList::Text(text)) => parse_list_text(&text).map(Some),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMap {
    Map(BTreeMap<String, Value>),
    Text(String),
}

fn stringify(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// An object or a JSON-encoded object; values are stringified and nulls dropped
pub fn lenient_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Option::<RawMap>::deserialize(deserializer)? {
        None => return Ok(BTreeMap::new()),
        Some(RawMap::Map(map)) => map,
        Some(RawMap::Text(text)) if text.trim().is_empty() => return Ok(BTreeMap::new()),
        Some(RawMap::Text(text)) => serde_json::from_str(&text).map_err(D::Error::custom)?,
    };

    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| stringify(value).map(|v| (key, v)))
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDecimal {
    Text(String),
    Number(Decimal),
}

/// A number or numeric string; an empty string is `None`
pub fn lenient_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawDecimal>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawDecimal::Number(value)) => Ok(Some(value)),
        Some(RawDecimal::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            Decimal::from_str(text)
                .or_else(|_| Decimal::from_scientific(text))
                .map(Some)
                .map_err(|_| D::Error::custom(format!("'{}' is not a number", text)))
        }
    }
}
