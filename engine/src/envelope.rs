//! Extracts a `MapUpdate` from raw model text. Tolerates markdown code
//! fences and trailing commentary, and folds the "single object or array"
//! dynamic payload shape some correction replies use.

use cartography_core::errors::EnvelopeError;
use cartography_core::types::MapUpdate;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Find the first balanced top-level JSON value (object or array) in
/// `text`, ignoring any fenced or unfenced prose around it. Scans brace
/// depth rather than relying on the fence markers alone, since models
/// sometimes emit raw JSON with no fence at all.
fn extract_json_slice(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{' || *b == b'[')?;
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *byte == b'\\' {
                escaped = true;
            } else if *byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match *byte {
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a raw model reply into a `MapUpdate`, tolerating fenced or
/// unfenced JSON with trailing commentary.
pub fn parse_map_update(raw_response: &str) -> Result<MapUpdate, EnvelopeError> {
    parse_envelope(raw_response)
}

/// Generic version of [`parse_map_update`], used by the correction
/// services for their smaller, schema-specific reply shapes.
pub fn parse_envelope<T: DeserializeOwned>(raw_response: &str) -> Result<T, EnvelopeError> {
    let slice = extract_json_slice(raw_response).ok_or(EnvelopeError::NoJsonFound)?;
    serde_json::from_str(slice).map_err(|e| EnvelopeError::ParseFailure(e.to_string()))
}

/// Some correction replies arrive as a single object and some as an array
/// of objects. Decode as a generic [`Value`] first, then fold to a `Vec<T>`
/// regardless of which shape was sent.
pub fn parse_one_or_many<T: DeserializeOwned>(raw_response: &str) -> Result<Vec<T>, EnvelopeError> {
    let slice = extract_json_slice(raw_response).ok_or(EnvelopeError::NoJsonFound)?;
    let value: Value = serde_json::from_str(slice).map_err(|e| EnvelopeError::ParseFailure(e.to_string()))?;

    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(|e| EnvelopeError::ParseFailure(e.to_string())))
        .collect()
}

/// Tolerant variant for the correction services: an empty or unparseable
/// reply yields `None` rather than an error, letting the applier fall back
/// to its own default.
pub fn parse_envelope_or_none<T: DeserializeOwned>(raw_response: &str) -> Option<T> {
    if raw_response.trim().is_empty() {
        return None;
    }
    match parse_envelope(raw_response) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "correction reply did not parse, returning null");
            None
        }
    }
}

/// Tolerant, folding variant of [`parse_envelope_or_none`]: an empty or
/// unparseable reply yields `None`; a single object or an array both yield
/// `Some(Vec<T>)` via the same fold [`parse_one_or_many`] performs.
pub fn parse_one_or_many_or_none<T: DeserializeOwned>(raw_response: &str) -> Option<Vec<T>> {
    if raw_response.trim().is_empty() {
        return None;
    }
    match parse_one_or_many(raw_response) {
        Ok(items) => Some(items),
        Err(err) => {
            debug!(error = %err, "correction reply did not parse, returning null");
            None
        }
    }
}

/// The reply format for a numbered-option correction choice (hierarchy
/// resolution): the reply must be a single integer index. Tolerates the
/// model wrapping the number in prose or a JSON object.
pub fn parse_option_index(raw_response: &str) -> Option<usize> {
    let trimmed = raw_response.trim();
    if let Ok(index) = trimmed.parse::<usize>() {
        return Some(index);
    }
    trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse::<usize>()
        .ok()
        .or_else(|| {
            trimmed
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<usize>()
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[test]
    fn extracts_json_from_fenced_reply() {
        let raw = "Here is the update:\n```json\n{\"nodesToAdd\": []}\n```\nLet me know if you need changes.";
        let parsed: MapUpdate = parse_envelope(raw).unwrap();
        assert!(parsed.nodes_to_add.is_empty());
    }

    #[test]
    fn extracts_json_with_no_fence_at_all() {
        let raw = "{\"name\": \"Stone Altar\"} -- that's my answer";
        let parsed: Sample = parse_envelope(raw).unwrap();
        assert_eq!(parsed.name, "Stone Altar");
    }

    #[test]
    fn no_json_found_is_an_envelope_error() {
        let err = parse_envelope::<Sample>("no JSON here at all").unwrap_err();
        assert!(matches!(err, EnvelopeError::NoJsonFound));
    }

    #[test]
    fn folds_single_object_into_one_element_vec() {
        let raw = "{\"name\": \"A\"}";
        let items: Vec<Sample> = parse_one_or_many(raw).unwrap();
        assert_eq!(items, vec![Sample { name: "A".to_string() }]);
    }

    #[test]
    fn folds_array_into_vec_unchanged() {
        let raw = "[{\"name\": \"A\"}, {\"name\": \"B\"}]";
        let items: Vec<Sample> = parse_one_or_many(raw).unwrap();
        assert_eq!(items, vec![Sample { name: "A".to_string() }, Sample { name: "B".to_string() }]);
    }

    #[test]
    fn empty_reply_parses_to_none_rather_than_erroring() {
        let result: Option<Sample> = parse_envelope_or_none("");
        assert!(result.is_none());
    }

    #[test]
    fn garbage_reply_parses_to_none_rather_than_erroring() {
        let result: Option<Sample> = parse_envelope_or_none("I'm not sure, sorry!");
        assert!(result.is_none());
    }

    #[test]
    fn one_or_many_or_none_folds_an_array_reply() {
        let raw = "[{\"name\": \"A\"}, {\"name\": \"B\"}]";
        let items: Option<Vec<Sample>> = parse_one_or_many_or_none(raw);
        assert_eq!(items, Some(vec![Sample { name: "A".to_string() }, Sample { name: "B".to_string() }]));
    }

    #[test]
    fn one_or_many_or_none_is_none_on_empty_reply() {
        let items: Option<Vec<Sample>> = parse_one_or_many_or_none("");
        assert!(items.is_none());
    }

    #[test]
    fn option_index_parses_plain_integer() {
        assert_eq!(parse_option_index("2"), Some(2));
    }

    #[test]
    fn option_index_parses_integer_wrapped_in_prose() {
        assert_eq!(parse_option_index("I'd pick option 1."), Some(1));
    }
}
