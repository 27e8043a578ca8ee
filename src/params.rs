//! `key=value;key=value` parameter strings.
//!
//! The host passes routing changes and feature toggles through these strings.
//! Unknown keys are carried along and ignored by consumers.

use crate::HalError;

/// Output/input device mask for an endpoint.
pub const ROUTING: &str = "routing";
/// Numeric input source for a capture endpoint.
pub const INPUT_SOURCE: &str = "input_source";
/// Enables (`true`) or disables the hands-free bridge.
pub const HFP_ENABLE: &str = "hfp_enable";
/// Sample rate for the hands-free bridge PCMs.
pub const HFP_SET_SAMPLING_RATE: &str = "hfp_set_sampling_rate";

/// Parsed parameter string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    pairs: Vec<(String, String)>,
}

impl Parameters {
    /// Parses `kv`. Empty segments are skipped; a key without `=` gets an empty value.
    #[must_use]
    pub fn parse(kv: &str) -> Self {
        let pairs = kv
            .split(';')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (segment.to_string(), String::new()),
            })
            .collect();
        Self { pairs }
    }

    /// Returns the last value given for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Parses `key` as an unsigned integer (decimal, or hex with `0x`).
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, HalError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => value.parse::<u32>(),
        };
        parsed
            .map(Some)
            .map_err(|_| HalError::invalid_parameter(key, value))
    }

    /// Parses `key` as a boolean. Only the literal `true` is true.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).map(|v| v == "true")
    }

    /// Keys in order of appearance.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }
}

/// Builds a reply string from key/value pairs.
pub(crate) fn format_reply<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let params = Parameters::parse("routing=2;input_source=6");
        assert_eq!(params.get(ROUTING), Some("2"));
        assert_eq!(params.get_u32(INPUT_SOURCE).unwrap(), Some(6));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_empty_segments() {
        let params = Parameters::parse(" hfp_enable = true ;; ");
        assert_eq!(params.get_bool(HFP_ENABLE), Some(true));
        assert_eq!(params.keys().count(), 1);
    }

    #[test]
    fn test_bare_key() {
        let params = Parameters::parse("hfp_enable;routing");
        assert!(params.contains(HFP_ENABLE));
        assert_eq!(params.get(ROUTING), Some(""));
    }

    #[test]
    fn test_hex_value() {
        let params = Parameters::parse("routing=0x400");
        assert_eq!(params.get_u32(ROUTING).unwrap(), Some(0x400));
    }

    #[test]
    fn test_invalid_number() {
        let params = Parameters::parse("routing=speaker");
        assert!(matches!(
            params.get_u32(ROUTING),
            Err(HalError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_bool_only_true_literal() {
        let params = Parameters::parse("hfp_enable=false");
        assert_eq!(params.get_bool(HFP_ENABLE), Some(false));
        let params = Parameters::parse("hfp_enable=1");
        assert_eq!(params.get_bool(HFP_ENABLE), Some(false));
    }

    #[test]
    fn test_last_value_wins() {
        let params = Parameters::parse("routing=2;routing=4");
        assert_eq!(params.get_u32(ROUTING).unwrap(), Some(4));
    }

    #[test]
    fn test_format_reply() {
        let reply = format_reply([("hfp_enable", "true".to_string()), ("a", "1".to_string())]);
        assert_eq!(reply, "hfp_enable=true;a=1");
    }
}
