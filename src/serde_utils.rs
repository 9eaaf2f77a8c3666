//! Shared serialization utilities for JSON-RPC payloads.

use serde::{de, Deserialize, Deserializer, Serializer};

/// Parse a hex quantity ("0x1a") into a u64.
pub fn parse_hex_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Deserialize an optional hex quantity, as found in transaction receipts.
pub fn deserialize_opt_hex<'de, D>(d: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(d)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_hex_quantity(&s)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid hex quantity: {s}"))),
    }
}

/// Serialize an f64 that may be infinite (health factor) as a JSON-friendly value.
pub fn serialize_unbounded_f64<S>(val: &f64, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if val.is_infinite() {
        s.serialize_str("infinity")
    } else {
        s.serialize_f64(*val)
    }
}

/// Serialize any `Display` value (such as an error) as its message.
pub fn serialize_display<T, S>(val: &T, s: S) -> Result<S::Ok, S::Error>
where
    T: std::fmt::Display,
    S: Serializer,
{
    s.collect_str(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Receipt {
        #[serde(default, deserialize_with = "deserialize_opt_hex")]
        status: Option<u64>,
    }

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x1"), Some(1));
        assert_eq!(parse_hex_quantity("0xff"), Some(255));
        assert_eq!(parse_hex_quantity("0x"), None);
        assert_eq!(parse_hex_quantity("0xzz"), None);
    }

    #[test]
    fn test_deserialize_opt_hex() {
        let r: Receipt = serde_json::from_str(r#"{"status":"0x1"}"#).unwrap();
        assert_eq!(r.status, Some(1));
        let r: Receipt = serde_json::from_str(r#"{"status":null}"#).unwrap();
        assert_eq!(r.status, None);
        let r: Receipt = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(r.status, None);
    }

    #[test]
    fn test_serialize_unbounded() {
        #[derive(serde::Serialize)]
        struct Hf {
            #[serde(serialize_with = "serialize_unbounded_f64")]
            hf: f64,
        }
        let json = serde_json::to_string(&Hf { hf: f64::INFINITY }).unwrap();
        assert_eq!(json, r#"{"hf":"infinity"}"#);
        let json = serde_json::to_string(&Hf { hf: 1.5 }).unwrap();
        assert_eq!(json, r#"{"hf":1.5}"#);
    }
}
