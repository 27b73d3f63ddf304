//! Payload decoding for the feed.
//!
//! The list only ever shows text, so both formats decode to a display line.

use crate::config::PayloadFormat;
use postfeed_cache::{Decode, ParseError};
use serde_json::Value;

/// Fields tried, in order, when a JSON payload is an object.
const TITLE_FIELDS: [&str; 4] = ["title", "text", "body", "message"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedDecoder {
    format: PayloadFormat,
}

impl FeedDecoder {
    pub fn new(format: PayloadFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }
}

impl Decode for FeedDecoder {
    type Item = String;

    fn decode(&self, payload: &str) -> Result<String, ParseError> {
        match self.format {
            PayloadFormat::Text => Ok(payload.to_string()),
            PayloadFormat::Json => {
                let value: Value = serde_json::from_str(payload)?;
                Ok(display_line(&value))
            }
        }
    }
}

fn display_line(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(fields) => TITLE_FIELDS
            .iter()
            .find_map(|name| fields.get(*name).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_passes_payload_through() {
        let decoder = FeedDecoder::new(PayloadFormat::Text);
        assert_eq!(decoder.decode("{not json").unwrap(), "{not json");
    }

    #[test]
    fn test_json_prefers_title_field() {
        let decoder = FeedDecoder::new(PayloadFormat::Json);
        let line = decoder
            .decode(r#"{"id": 7, "body": "ignored", "title": "Release notes"}"#)
            .unwrap();
        assert_eq!(line, "Release notes");
    }

    #[test]
    fn test_json_string_and_fallback() {
        let decoder = FeedDecoder::new(PayloadFormat::Json);
        assert_eq!(decoder.decode(r#""plain""#).unwrap(), "plain");
        assert_eq!(decoder.decode(r#"{"id":1}"#).unwrap(), r#"{"id":1}"#);
        assert_eq!(decoder.decode("42").unwrap(), "42");
    }

    #[test]
    fn test_json_rejects_malformed() {
        let decoder = FeedDecoder::new(PayloadFormat::Json);
        assert!(decoder.decode("not json").is_err());
    }
}
