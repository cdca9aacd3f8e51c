use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::options::{Direction, SortField};

pub type Result<T> = std::result::Result<T, RecordError>;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record root should be an object, got: {got}")]
    RecordRootShouldBeAnObject { got: serde_json::Value },

    #[error("failed to convert f64 ({f:?}) to serde number")]
    FailedToConvertF64ToSerdeNumber { f: f64 },

    #[error("record id must be a string")]
    RecordIdMustBeAString,
}

/// Reserved field carrying the record key.
pub const ID_FIELD: &str = "id";

/// Reserved field holding a per-record permission override, a map from
/// operation name to the list of roles sufficient to perform it.
pub const PERMISSION_REQUIRED_FIELD: &str = "_permissionRequired";

/// Audit stamp fields merged into every authorized mutation.
pub const UPDATED_BY_FIELD: &str = "updatedBy";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

pub type RecordRoot = HashMap<String, RecordValue>;

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub enum RecordValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<RecordValue>),
    Map(HashMap<String, RecordValue>),
}

/// Returns the record key, if the record carries one.
pub fn record_id(record: &RecordRoot) -> Result<Option<&str>> {
    match record.get(ID_FIELD) {
        Some(RecordValue::String(id)) => Ok(Some(id)),
        Some(_) => Err(RecordError::RecordIdMustBeAString),
        None => Ok(None),
    }
}

/// Resolves a dotted field path against nested maps.
pub fn find_path<'a>(record: &'a RecordRoot, path: &str) -> Option<&'a RecordValue> {
    let mut segments = path.split('.');
    let mut value = record.get(segments.next()?)?;
    for segment in segments {
        match value {
            RecordValue::Map(map) => value = map.get(segment)?,
            _ => return None,
        }
    }
    Some(value)
}

/// Ordering between two values of the same primitive type. Values of
/// differing or non-orderable types are incomparable.
pub fn compare_values(a: &RecordValue, b: &RecordValue) -> Option<Ordering> {
    match (a, b) {
        (RecordValue::Number(a), RecordValue::Number(b)) => a.partial_cmp(b),
        (RecordValue::String(a), RecordValue::String(b)) => Some(a.cmp(b)),
        (RecordValue::Boolean(a), RecordValue::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sorts records by the given sort fields, in order of significance.
/// Records missing a sort field order before those that carry it.
pub fn sort_records(records: &mut [RecordRoot], sort: &[SortField]) {
    if sort.is_empty() {
        return;
    }

    records.sort_by(|a, b| {
        for SortField { field, direction } in sort {
            let ord = match (find_path(a, field), find_path(b, field)) {
                (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            };

            let ord = match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };

            if ord != Ordering::Equal {
                return ord;
            }
        }

        Ordering::Equal
    });
}

/// Drops every field not named by the projection. The record key is always
/// kept.
pub fn apply_projection(record: &mut RecordRoot, projection: &[String]) {
    record.retain(|field, _| field == ID_FIELD || projection.iter().any(|p| p == field));
}

/// Applies a patch to a record. In the default mode the patch fields replace
/// the record's fields. In raw-operator mode the patch is an operator
/// document; `$set`, `$unset` and `$inc` are recognized, anything else is
/// ignored.
pub fn apply_patch(record: &mut RecordRoot, patch: RecordRoot, raw_operator: bool) {
    if !raw_operator {
        record.extend(patch);
        return;
    }

    for (operator, value) in patch {
        match (operator.as_str(), value) {
            ("$set", RecordValue::Map(fields)) => record.extend(fields),
            ("$unset", RecordValue::Map(fields)) => {
                for field in fields.keys() {
                    record.remove(field);
                }
            }
            ("$inc", RecordValue::Map(fields)) => {
                for (field, delta) in fields {
                    match (record.get_mut(&field), delta) {
                        (Some(RecordValue::Number(n)), RecordValue::Number(delta)) => *n += delta,
                        (None, delta @ RecordValue::Number(_)) => {
                            record.insert(field, delta);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

pub fn json_to_record(value: serde_json::Value) -> Result<RecordRoot> {
    match value {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, json_to_value(v)))
            .collect()),
        got => Err(RecordError::RecordRootShouldBeAnObject { got }),
    }
}

pub fn record_to_json(record: RecordRoot) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::with_capacity(record.len());
    for (field, value) in record {
        map.insert(field, value_to_json(value)?);
    }
    Ok(serde_json::Value::Object(map))
}

fn json_to_value(value: serde_json::Value) -> RecordValue {
    match value {
        serde_json::Value::Null => RecordValue::Null,
        serde_json::Value::Bool(b) => RecordValue::Boolean(b),
        serde_json::Value::Number(n) => RecordValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => RecordValue::String(s),
        serde_json::Value::Array(values) => {
            RecordValue::Array(values.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            RecordValue::Map(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

fn value_to_json(value: RecordValue) -> Result<serde_json::Value> {
    Ok(match value {
        RecordValue::Null => serde_json::Value::Null,
        RecordValue::Boolean(b) => serde_json::Value::Bool(b),
        RecordValue::Number(f) => serde_json::Value::Number(
            serde_json::Number::from_f64(f)
                .ok_or(RecordError::FailedToConvertF64ToSerdeNumber { f })?,
        ),
        RecordValue::String(s) => serde_json::Value::String(s),
        RecordValue::Array(values) => serde_json::Value::Array(
            values
                .into_iter()
                .map(value_to_json)
                .collect::<Result<_>>()?,
        ),
        RecordValue::Map(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (field, value) in map {
                out.insert(field, value_to_json(value)?);
            }
            serde_json::Value::Object(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: serde_json::Value) -> RecordRoot {
        json_to_record(value).unwrap()
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::json!({
            "id": "rec1",
            "name": "Bob",
            "age": 42.0,
            "active": true,
            "tags": ["a", "b"],
            "address": { "city": "Timbuktu" },
            "note": null,
        });

        let converted = record_to_json(record(json.clone())).unwrap();
        assert_eq!(converted, json);
    }

    #[test]
    fn test_json_to_record_rejects_non_object() {
        assert!(matches!(
            json_to_record(serde_json::json!([1, 2])),
            Err(RecordError::RecordRootShouldBeAnObject { .. })
        ));
    }

    #[test]
    fn test_find_path_nested() {
        let rec = record(serde_json::json!({
            "address": { "city": "Timbuktu", "geo": { "lat": 1.0 } },
        }));

        assert_eq!(
            find_path(&rec, "address.city"),
            Some(&RecordValue::String("Timbuktu".to_string()))
        );
        assert_eq!(
            find_path(&rec, "address.geo.lat"),
            Some(&RecordValue::Number(1.0))
        );
        assert_eq!(find_path(&rec, "address.street"), None);
        assert_eq!(find_path(&rec, "address.city.x"), None);
    }

    #[test]
    fn test_record_id() {
        let rec = record(serde_json::json!({ "id": "rec1" }));
        assert_eq!(record_id(&rec).unwrap(), Some("rec1"));

        let rec = record(serde_json::json!({ "name": "Bob" }));
        assert_eq!(record_id(&rec).unwrap(), None);

        let rec = record(serde_json::json!({ "id": 7.0 }));
        assert!(matches!(
            record_id(&rec),
            Err(RecordError::RecordIdMustBeAString)
        ));
    }

    #[test]
    fn test_sort_records_multi_key() {
        let mut records = vec![
            record(serde_json::json!({ "name": "Bob", "age": 42.0 })),
            record(serde_json::json!({ "name": "Bob", "age": 23.0 })),
            record(serde_json::json!({ "name": "Alice", "age": 30.0 })),
        ];

        sort_records(
            &mut records,
            &[
                SortField {
                    field: "name".to_string(),
                    direction: Direction::Ascending,
                },
                SortField {
                    field: "age".to_string(),
                    direction: Direction::Descending,
                },
            ],
        );

        assert_eq!(
            find_path(&records[0], "name"),
            Some(&RecordValue::String("Alice".to_string()))
        );
        assert_eq!(find_path(&records[1], "age"), Some(&RecordValue::Number(42.0)));
        assert_eq!(find_path(&records[2], "age"), Some(&RecordValue::Number(23.0)));
    }

    #[test]
    fn test_apply_projection_keeps_id() {
        let mut rec = record(serde_json::json!({
            "id": "rec1",
            "name": "Bob",
            "age": 42.0,
        }));

        apply_projection(&mut rec, &["name".to_string()]);

        assert_eq!(rec.len(), 2);
        assert!(rec.contains_key("id"));
        assert!(rec.contains_key("name"));
    }

    #[test]
    fn test_apply_patch_merge() {
        let mut rec = record(serde_json::json!({ "id": "rec1", "name": "Bob" }));
        apply_patch(
            &mut rec,
            record(serde_json::json!({ "name": "Alice", "age": 30.0 })),
            false,
        );

        assert_eq!(
            rec.get("name"),
            Some(&RecordValue::String("Alice".to_string()))
        );
        assert_eq!(rec.get("age"), Some(&RecordValue::Number(30.0)));
    }

    #[test]
    fn test_apply_patch_raw_operators() {
        let mut rec = record(serde_json::json!({ "id": "rec1", "name": "Bob", "age": 42.0 }));
        apply_patch(
            &mut rec,
            record(serde_json::json!({
                "$set": { "name": "Alice" },
                "$inc": { "age": 1.0, "visits": 2.0 },
                "$unset": { "id": true },
            })),
            true,
        );

        assert_eq!(
            rec.get("name"),
            Some(&RecordValue::String("Alice".to_string()))
        );
        assert_eq!(rec.get("age"), Some(&RecordValue::Number(43.0)));
        assert_eq!(rec.get("visits"), Some(&RecordValue::Number(2.0)));
        assert!(!rec.contains_key("id"));
    }
}
