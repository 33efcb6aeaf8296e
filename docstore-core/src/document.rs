// docstore-core/src/document.rs
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{DocStoreError, Result};
use crate::value_utils::{array_index, get_in_map, integral_i64, split_path, type_name};

/// Name of the identifier field every stored document carries
pub const ID_FIELD: &str = "_id";

/// Key of the extended JSON form used for object identifiers
const OID_KEY: &str = "$oid";

/// Document identifier
///
/// Inside documents an `Int` and a `String` appear as plain values
/// (`{"_id": 2}`, `{"_id": "alice"}`), while an `ObjectId` keeps the extended
/// JSON form `{"_id": {"$oid": "..."}}` so it never collides with a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentId {
    Int(i64),
    String(String),
    ObjectId(String),
}

impl DocumentId {
    /// Next auto-increment ID
    pub fn new_auto(last_id: u64) -> Self {
        DocumentId::Int(last_id.saturating_add(1).min(i64::MAX as u64) as i64)
    }

    /// New random ObjectId (UUID v4, 32 lowercase hex chars)
    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().simple().to_string())
    }

    /// Interpret an `_id` value
    ///
    /// Integers (including integral floats), strings and `{"$oid": "..."}`
    /// are accepted; anything else is `InvalidDocument`.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => integral_i64(n).map(DocumentId::Int).ok_or_else(|| {
                DocStoreError::InvalidDocument(format!(
                    "_id must be an integer, string or ObjectId, got {}",
                    n
                ))
            }),
            Value::String(s) => Ok(DocumentId::String(s.clone())),
            Value::Object(map) if map.len() == 1 => match map.get(OID_KEY) {
                Some(Value::String(hex)) => Ok(DocumentId::ObjectId(hex.clone())),
                _ => Err(DocStoreError::InvalidDocument(format!(
                    "_id must be an integer, string or ObjectId, got {}",
                    value
                ))),
            },
            other => Err(DocStoreError::InvalidDocument(format!(
                "_id must be an integer, string or ObjectId, got {}",
                type_name(other)
            ))),
        }
    }

    /// JSON representation as it appears inside a document
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::String(s) => Value::String(s.clone()),
            DocumentId::ObjectId(hex) => {
                let mut map = Map::new();
                map.insert(OID_KEY.to_string(), Value::String(hex.clone()));
                Value::Object(map)
            }
        }
    }

    /// Check whether a filter literal looks like an ObjectId (`{"$oid": "..."}`)
    pub fn is_object_id_literal(map: &Map<String, Value>) -> bool {
        map.len() == 1 && matches!(map.get(OID_KEY), Some(Value::String(_)))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::String(s) => write!(f, "\"{}\"", s),
            DocumentId::ObjectId(hex) => write!(f, "ObjectId(\"{}\")", hex),
        }
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DocumentId::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// A stored document
///
/// `fields` always holds `_id` as its first entry, mirroring `id`, so the
/// matcher, projection and sort see the identifier like any other field.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    fields: Map<String, Value>,
}

impl Document {
    /// Build a document from an identifier and its remaining fields
    ///
    /// Any `_id` present in `fields` is discarded in favour of `id`.
    pub fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        let mut ordered = Map::with_capacity(fields.len() + 1);
        ordered.insert(ID_FIELD.to_string(), id.to_value());
        for (key, value) in fields {
            if key != ID_FIELD {
                ordered.insert(key, value);
            }
        }
        Document {
            id,
            fields: ordered,
        }
    }

    /// Create a document from a JSON object that already carries `_id`
    pub fn from_value(value: Value) -> Result<Self> {
        let fields = Self::object_fields(value)?;
        let id = match fields.get(ID_FIELD) {
            Some(raw) => DocumentId::from_value(raw)?,
            None => {
                return Err(DocStoreError::InvalidDocument(
                    "document has no _id".to_string(),
                ))
            }
        };
        Ok(Document::new(id, fields))
    }

    /// Unwrap a JSON object into its field map
    pub fn object_fields(value: Value) -> Result<Map<String, Value>> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(DocStoreError::InvalidDocument(format!(
                "document must be an object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Number of fields, `_id` included
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field lookup with dot notation (`"shipto.zip"`, `"lines.0.quantity"`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        get_in_map(&self.fields, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Assign a value with dot notation, creating missing intermediates
    ///
    /// Missing intermediate fields become embedded documents; a numeric
    /// segment addresses an array element and pads the array with `null` when
    /// it is past the end. Traversing a scalar or applying a non-numeric
    /// segment to an array is `InvalidPath`.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let parts = split_path(path)?;
        if parts[0] == ID_FIELD {
            return Err(DocStoreError::InvalidUpdate(
                "the _id field cannot be modified".to_string(),
            ));
        }
        let (head, rest) = (parts[0], &parts[1..]);
        if rest.is_empty() {
            self.fields.insert(head.to_string(), value);
            return Ok(());
        }
        let slot = self
            .fields
            .entry(head.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        set_in(slot, rest, value, path)
    }

    /// Remove the value at a dot-notation path
    ///
    /// Object fields are removed outright; array elements are replaced by
    /// `null` so the positions of the remaining elements do not shift.
    /// Returns the previous value, or `None` when the path did not resolve.
    pub fn remove_path(&mut self, path: &str) -> Result<Option<Value>> {
        let parts = split_path(path)?;
        if parts[0] == ID_FIELD {
            return Err(DocStoreError::InvalidUpdate(
                "the _id field cannot be removed".to_string(),
            ));
        }
        let Some((last, parents)) = parts.split_last() else {
            return Ok(None);
        };
        let Some((first, middle)) = parents.split_first() else {
            return Ok(self.fields.shift_remove(*last));
        };

        let mut current = match self.fields.get_mut(*first) {
            Some(v) => v,
            None => return Ok(None),
        };
        for part in middle {
            current = match current {
                Value::Object(map) => match map.get_mut(*part) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                Value::Array(arr) => match array_index(part).and_then(|i| arr.get_mut(i)) {
                    Some(v) => v,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            };
        }
        Ok(match current {
            Value::Object(map) => map.shift_remove(*last),
            Value::Array(arr) => array_index(last)
                .and_then(|i| arr.get_mut(i))
                .map(|slot| std::mem::replace(slot, Value::Null)),
            _ => None,
        })
    }

    /// Owned JSON view of the document
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

fn set_in(current: &mut Value, parts: &[&str], value: Value, full_path: &str) -> Result<()> {
    let Some((head, rest)) = parts.split_first() else {
        *current = value;
        return Ok(());
    };
    match current {
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert(head.to_string(), value);
                return Ok(());
            }
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_in(slot, rest, value, full_path)
        }
        Value::Array(arr) => {
            let index = array_index(head).ok_or_else(|| {
                DocStoreError::InvalidPath(format!(
                    "cannot use the part '{}' of '{}' to traverse an array",
                    head, full_path
                ))
            })?;
            if index >= arr.len() {
                arr.resize(index + 1, Value::Null);
                if !rest.is_empty() {
                    arr[index] = Value::Object(Map::new());
                }
            }
            if rest.is_empty() {
                arr[index] = value;
                Ok(())
            } else {
                set_in(&mut arr[index], rest, value, full_path)
            }
        }
        other => Err(DocStoreError::InvalidPath(format!(
            "cannot create field '{}' of '{}' in a {} value",
            head,
            full_path,
            type_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_document_id_from_value() {
        assert_eq!(DocumentId::from_value(&json!(5)).unwrap(), DocumentId::Int(5));
        assert_eq!(DocumentId::from_value(&json!(5.0)).unwrap(), DocumentId::Int(5));
        assert_eq!(
            DocumentId::from_value(&json!("abc")).unwrap(),
            DocumentId::String("abc".into())
        );
        assert_eq!(
            DocumentId::from_value(&json!({"$oid": "ff"})).unwrap(),
            DocumentId::ObjectId("ff".into())
        );
        assert!(matches!(
            DocumentId::from_value(&json!([1])),
            Err(DocStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            DocumentId::from_value(&json!({"a": 1})),
            Err(DocStoreError::InvalidDocument(_))
        ));
        assert!(DocumentId::from_value(&json!(1.5)).is_err());
    }

    #[test]
    fn test_object_id_rendering() {
        let id = DocumentId::new_object_id();
        let value = id.to_value();
        let hex = value["$oid"].as_str().unwrap();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(DocumentId::from_value(&value).unwrap(), id);
        assert_eq!(serde_json::to_value(&id).unwrap(), value);
    }

    #[test]
    fn test_new_auto() {
        assert_eq!(DocumentId::new_auto(0), DocumentId::Int(1));
        assert_eq!(DocumentId::new_auto(41), DocumentId::Int(42));
    }

    #[test]
    fn test_new_puts_id_first() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("x"));
        fields.insert("_id".into(), json!(99));
        let d = Document::new(DocumentId::Int(1), fields);
        let keys: Vec<_> = d.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["_id", "name"]);
        assert_eq!(d.get("_id"), Some(&json!(1)));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(matches!(
            Document::from_value(json!([1, 2])),
            Err(DocStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            Document::from_value(json!({"a": 1})),
            Err(DocStoreError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_get_nested() {
        let d = doc(json!({"_id": 1, "lines": [{"q": 5}], "shipto": {"zip": 60611}}));
        assert_eq!(d.get("lines.0.q"), Some(&json!(5)));
        assert_eq!(d.get("shipto.zip"), Some(&json!(60611)));
        assert_eq!(d.get(""), None);
        assert!(!d.contains("shipto.city"));
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut d = doc(json!({"_id": 1}));
        d.set_path("address.city", json!("NYC")).unwrap();
        assert_eq!(d.to_value(), json!({"_id": 1, "address": {"city": "NYC"}}));
    }

    #[test]
    fn test_set_path_array_index_and_padding() {
        let mut d = doc(json!({"_id": 1, "lines": [{"q": 1}]}));
        d.set_path("lines.0.q", json!(5)).unwrap();
        assert_eq!(d.get("lines.0.q"), Some(&json!(5)));

        d.set_path("lines.3", json!("x")).unwrap();
        assert_eq!(d.get("lines"), Some(&json!([{"q": 5}, null, null, "x"])));

        d.set_path("lines.5.q", json!(2)).unwrap();
        assert_eq!(d.get("lines.5"), Some(&json!({"q": 2})));
    }

    #[test]
    fn test_set_path_errors() {
        let mut d = doc(json!({"_id": 1, "n": 5, "arr": [1]}));
        assert!(matches!(
            d.set_path("n.x", json!(1)),
            Err(DocStoreError::InvalidPath(_))
        ));
        assert!(matches!(
            d.set_path("arr.x", json!(1)),
            Err(DocStoreError::InvalidPath(_))
        ));
        assert!(matches!(
            d.set_path("a..b", json!(1)),
            Err(DocStoreError::InvalidPath(_))
        ));
        assert!(matches!(
            d.set_path("_id", json!(2)),
            Err(DocStoreError::InvalidUpdate(_))
        ));
        // Failed sets leave the document untouched
        assert_eq!(d.to_value(), json!({"_id": 1, "n": 5, "arr": [1]}));
    }

    #[test]
    fn test_set_existing_keeps_position() {
        let mut d = doc(json!({"_id": 1, "a": 1, "b": 2}));
        d.set_path("a", json!(10)).unwrap();
        let keys: Vec<_> = d.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["_id", "a", "b"]);
    }

    #[test]
    fn test_remove_path() {
        let mut d = doc(json!({"_id": 1, "a": {"b": 1, "c": 2}, "arr": [1, 2, 3], "x": 0}));
        assert_eq!(d.remove_path("a.b").unwrap(), Some(json!(1)));
        assert_eq!(d.remove_path("arr.1").unwrap(), Some(json!(2)));
        assert_eq!(d.remove_path("x").unwrap(), Some(json!(0)));
        assert_eq!(d.remove_path("missing.deep").unwrap(), None);
        assert_eq!(d.to_value(), json!({"_id": 1, "a": {"c": 2}, "arr": [1, null, 3]}));
        assert!(d.remove_path("_id").is_err());
    }

    #[test]
    fn test_serialize_document() {
        let d = doc(json!({"_id": {"$oid": "abc"}, "name": "x"}));
        assert_eq!(
            d.to_json().unwrap(),
            r#"{"_id":{"$oid":"abc"},"name":"x"}"#
        );
        assert_eq!(d.id(), &DocumentId::ObjectId("abc".into()));
    }
}
