//! Searchable attributes pulled out of a serialized payload

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attributes the tiers index and search on.
///
/// Payloads stay opaque to the engine; only these well-known top-level fields
/// are read, and a payload without them simply has empty facets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFacets {
    pub title: Option<String>,
    pub agent_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EntryFacets {
    /// Extract facets from a JSON payload
    pub fn from_payload(payload: &Value) -> Self {
        let Some(object) = payload.as_object() else {
            return Self::default();
        };

        let title = object
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);

        let agent_id = object
            .get("agent_id")
            .or_else(|| object.get("agentId"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let timestamp = ["timestamp", "updated_at", "updatedAt"]
            .iter()
            .find_map(|field| object.get(*field).and_then(parse_timestamp));

        let tags = object
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            title,
            agent_id,
            timestamp,
            tags,
        }
    }

    /// Tags as stored in SQLite (JSON array text)
    pub fn tags_json(&self) -> Option<String> {
        if self.tags.is_empty() {
            None
        } else {
            serde_json::to_string(&self.tags).ok()
        }
    }

    /// Inverse of `tags_json`
    pub fn parse_tags(raw: Option<&str>) -> Vec<String> {
        raw.and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }
}

/// RFC 3339 string or epoch milliseconds
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracts_known_fields() {
        let facets = EntryFacets::from_payload(&json!({
            "title": "Invoice #1",
            "agentId": "agent-7",
            "timestamp": "2024-03-01T10:00:00Z",
            "tags": ["billing", 3, "q1"],
            "body": "ignored"
        }));

        assert_eq!(facets.title.as_deref(), Some("Invoice #1"));
        assert_eq!(facets.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(
            facets.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(facets.tags, vec!["billing", "q1"]);
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let facets = EntryFacets::from_payload(&json!({ "updated_at": 1_700_000_000_000i64 }));
        assert_eq!(facets.timestamp.unwrap().timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_non_object_payload_has_no_facets() {
        assert_eq!(EntryFacets::from_payload(&json!("plain")), EntryFacets::default());
        assert_eq!(EntryFacets::from_payload(&json!([1, 2])), EntryFacets::default());
    }

    #[test]
    fn test_tags_storage_format() {
        let facets = EntryFacets {
            tags: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let raw = facets.tags_json();
        assert_eq!(EntryFacets::parse_tags(raw.as_deref()), vec!["a", "b"]);
        assert!(EntryFacets::default().tags_json().is_none());
        assert!(EntryFacets::parse_tags(Some("not json")).is_empty());
    }
}
