use crate::error::{AppError, Result};
use crate::models::{Collection, Record};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Every collection's value captured at one instant, keyed by collection name.
///
/// A snapshot is either captured from the live stores or parsed from an
/// external document through [`Snapshot::from_value`], which enforces the
/// backup format. Collections absent from a parsed document are simply not
/// part of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<Collection, Vec<Record>>);

impl Snapshot {
    pub(crate) fn insert(&mut self, collection: Collection, records: Vec<Record>) {
        self.0.insert(collection, records);
    }

    pub fn get(&self, collection: Collection) -> Option<&[Record]> {
        self.0.get(&collection).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Collection, &[Record])> {
        self.0.iter().map(|(c, r)| (*c, r.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Validate an externally supplied document and keep the known
    /// collections. Unknown top-level keys are ignored.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(AppError::InvalidBackupFormat(
                "expected a JSON object at the top level".to_string(),
            ));
        };

        let missing: Vec<&str> = Collection::ANCHORS
            .iter()
            .filter(|c| !map.contains_key(c.key()))
            .map(Collection::key)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::InvalidBackupFormat(format!(
                "missing required collections: {}",
                missing.join(", ")
            )));
        }

        let mut snapshot = Snapshot::default();
        for (key, value) in map {
            let Ok(collection) = key.parse::<Collection>() else {
                continue;
            };
            let Value::Array(records) = value else {
                return Err(AppError::InvalidBackupFormat(format!(
                    "'{}' must be an array",
                    key
                )));
            };
            snapshot.insert(collection, records);
        }

        Ok(snapshot)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| AppError::InvalidBackupFormat(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use serde_json::json;

    pub(crate) fn mock_record(id: &str) -> Record {
        json!({"id": id, "description": format!("mock record: {id}"), "amount": 12.5})
    }

    pub(crate) fn full_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        for collection in Collection::ALL {
            snapshot.insert(collection, vec![mock_record(collection.key())]);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_uses_collection_names() {
        let snapshot = test_helpers::full_snapshot();
        let value: Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 17);
        assert!(object["transactions"].is_array());
        assert!(object["renovationExpenses"].is_array());
    }

    #[test]
    fn test_parse_keeps_known_collections_only() {
        let snapshot = Snapshot::from_value(json!({
            "transactions": [{"id": "t1"}],
            "bankAccounts": [],
            "vehicles": [{"id": "v1"}],
            "legacyBudget": [{"id": "b1"}]
        }))
        .unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get(Collection::Vehicles).unwrap().len(), 1);
        assert!(snapshot.get(Collection::Materials).is_none());
    }

    #[test]
    fn test_missing_anchor_is_rejected() {
        let err = Snapshot::from_value(json!({"transactions": []})).unwrap_err();
        assert!(matches!(err, AppError::InvalidBackupFormat(msg) if msg.contains("bankAccounts")));
    }

    #[test]
    fn test_non_object_and_non_array_are_rejected() {
        assert!(Snapshot::from_value(json!([1, 2, 3])).is_err());
        assert!(
            Snapshot::from_value(json!({"transactions": [], "bankAccounts": {"id": 1}})).is_err()
        );
        assert!(Snapshot::parse("{not json").is_err());
    }
}
