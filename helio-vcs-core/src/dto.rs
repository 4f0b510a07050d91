//! Remote resource descriptors.
//!
//! Flat records exchanged with the remote project store. They only live at
//! the sync boundary and are never the authoritative model.

use crate::revision::Revision;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Descriptor of one remote revision; `data` is only present on full fetches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDto {
    pub id: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub timestamp: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RevisionDto {
    /// Descriptor of a local revision, without payload
    pub fn from_revision(revision: &Revision) -> Self {
        Self {
            id: revision.id().to_string(),
            parent_id: revision.parent_id().map(str::to_string),
            timestamp: revision.timestamp(),
            message: revision.message().to_string(),
            data: None,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
}

/// Remote project resource: its title, head pointer and revision descriptors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub head: Option<String>,
    #[serde(default)]
    pub revisions: Vec<RevisionDto>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

// Older servers send timestamps as strings
fn number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {}", n))),
        Value::String(s) => s.parse().map_err(D::Error::custom),
        Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("invalid timestamp {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_revision_dto_parent_id_empty_is_root() {
        let dto: RevisionDto =
            serde_json::from_value(json!({ "id": "1", "parentId": "", "timestamp": 5 })).unwrap();
        assert_eq!(dto.parent_id(), None);

        let dto: RevisionDto = serde_json::from_value(json!({ "id": "2", "parentId": null })).unwrap();
        assert_eq!(dto.parent_id(), None);
        assert_eq!(dto.timestamp, 0);
    }

    #[test]
    fn test_revision_dto_timestamp_as_string() {
        let dto: RevisionDto =
            serde_json::from_value(json!({ "id": "1", "timestamp": "1500000000000" })).unwrap();
        assert_eq!(dto.timestamp, 1_500_000_000_000);

        let bad = serde_json::from_value::<RevisionDto>(json!({ "id": "1", "timestamp": "x" }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_project_dto_defaults() {
        let project: ProjectDto = serde_json::from_value(json!({ "id": "p" })).unwrap();
        assert_eq!(project.head, None);
        assert!(project.revisions.is_empty());
    }

    #[test]
    fn test_payload_not_serialized_when_absent() {
        let dto = RevisionDto {
            id: "1".into(),
            parent_id: None,
            timestamp: 1,
            message: "m".into(),
            data: None,
        };
        let value = serde_json::to_value(&dto).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["parentId"], Value::Null);
    }
}
