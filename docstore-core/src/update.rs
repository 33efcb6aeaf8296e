// docstore-core/src/update.rs
//! Update expressions
//!
//! An update is either a set of operators
//! (`{"$set": {"a": 1}, "$inc": {"n": 2}}`) or a bare replacement document.
//! [`UpdateSpec::parse`] validates the expression once; [`UpdateSpec::apply`]
//! is pure and produces the new state of one document, leaving the input
//! untouched when any step fails.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{DocStoreError, Result};
use crate::query::operators::{is_operator_doc, parse_field_conditions, Condition};
use crate::query::Query;
use crate::value_utils::{numeric_add, split_path, type_name, values_equal};

/// Options accepted by `update`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOptions {
    /// Modify every matching document instead of only the first
    pub multi: bool,
    /// Insert a document built from the filter and update when nothing matches
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn multi() -> Self {
        UpdateOptions {
            multi: true,
            upsert: false,
        }
    }

    pub fn upsert() -> Self {
        UpdateOptions {
            multi: false,
            upsert: true,
        }
    }
}

/// Outcome of an update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents that matched the filter (bounded to 1 without `multi`)
    pub matched: u64,
    /// Matched documents whose content actually changed
    pub modified: u64,
    /// Identifier of the inserted document when an upsert happened
    pub upserted_id: Option<DocumentId>,
}

/// End of the array `$pop` removes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopEnd {
    First,
    Last,
}

/// What `$pull` removes
#[derive(Debug, Clone)]
pub enum PullCondition {
    /// Elements equal to the value
    Value(Value),
    /// Elements satisfying an operator document, e.g. `{"$gte": 6}`
    Conditions(Vec<Condition>),
    /// Embedded-document elements matching a filter, e.g. `{"size": "L"}`
    Filter(Query),
}

impl PullCondition {
    fn parse(operand: &Value) -> Result<Self> {
        match operand {
            Value::Object(map) if is_operator_doc(map) => {
                Ok(PullCondition::Conditions(parse_field_conditions(operand)?))
            }
            Value::Object(map) if !map.is_empty() && !DocumentId::is_object_id_literal(map) => {
                Ok(PullCondition::Filter(Query::parse(operand)?))
            }
            other => Ok(PullCondition::Value(other.clone())),
        }
    }

    fn removes(&self, element: &Value) -> bool {
        match self {
            PullCondition::Value(value) => values_equal(element, value),
            PullCondition::Conditions(conditions) => conditions.iter().all(|c| c.matches(&[element])),
            PullCondition::Filter(query) => element
                .as_object()
                .map(|fields| query.matches_fields(fields))
                .unwrap_or(false),
        }
    }
}

/// Single-path mutation
#[derive(Debug, Clone)]
pub enum UpdateAction {
    Set(Value),
    Unset,
    Inc(Value),
    Push {
        items: Vec<Value>,
        position: Option<usize>,
        slice: Option<i64>,
    },
    AddToSet(Vec<Value>),
    Pull(PullCondition),
    PullAll(Vec<Value>),
    Pop(PopEnd),
}

/// An operator applied to one field path
#[derive(Debug, Clone)]
pub struct FieldUpdate {
    pub operator: &'static str,
    pub path: String,
    pub action: UpdateAction,
}

/// Compiled update expression
#[derive(Debug, Clone)]
pub enum UpdateSpec {
    /// Bare document replacing everything but `_id`
    Replace(Map<String, Value>),
    /// Operator updates in expression order
    Operators(Vec<FieldUpdate>),
}

const OPERATORS: &[&str] = &[
    "$set",
    "$unset",
    "$inc",
    "$push",
    "$pushAll",
    "$addToSet",
    "$pull",
    "$pullAll",
    "$pop",
];

impl UpdateSpec {
    /// Compile an update expression
    pub fn parse(update: &Value) -> Result<Self> {
        let Value::Object(map) = update else {
            return Err(DocStoreError::InvalidUpdate(format!(
                "update must be an object, got {}",
                type_name(update)
            )));
        };

        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(UpdateSpec::Replace(map.clone()));
        }
        if operator_keys != map.len() {
            return Err(DocStoreError::InvalidUpdate(
                "cannot mix update operators and plain fields".to_string(),
            ));
        }

        let mut updates = Vec::new();
        for (op, operand) in map {
            let operator = OPERATORS
                .iter()
                .copied()
                .find(|known| *known == op.as_str())
                .ok_or_else(|| DocStoreError::UnsupportedOperator(op.clone()))?;
            let Value::Object(fields) = operand else {
                return Err(DocStoreError::InvalidUpdate(format!(
                    "{} requires an object of field paths",
                    operator
                )));
            };
            for (path, arg) in fields {
                split_path(path)?;
                if path == ID_FIELD || path.starts_with("_id.") {
                    return Err(DocStoreError::InvalidUpdate(format!(
                        "{} cannot modify the _id field",
                        operator
                    )));
                }
                updates.push(FieldUpdate {
                    operator,
                    path: path.clone(),
                    action: Self::parse_action(operator, path, arg)?,
                });
            }
        }
        Self::check_conflicts(&updates)?;
        Ok(UpdateSpec::Operators(updates))
    }

    fn parse_action(operator: &str, path: &str, arg: &Value) -> Result<UpdateAction> {
        Ok(match operator {
            "$set" => UpdateAction::Set(arg.clone()),
            "$unset" => UpdateAction::Unset,
            "$inc" => {
                if !arg.is_number() {
                    return Err(DocStoreError::TypeMismatch(format!(
                        "cannot increment '{}' by non-numeric {}",
                        path,
                        type_name(arg)
                    )));
                }
                UpdateAction::Inc(arg.clone())
            }
            "$push" => match arg {
                Value::Object(modifiers) if modifiers.contains_key("$each") => {
                    Self::parse_push_modifiers(path, modifiers)?
                }
                _ => UpdateAction::Push {
                    items: vec![arg.clone()],
                    position: None,
                    slice: None,
                },
            },
            "$pushAll" => UpdateAction::Push {
                items: Self::array_arg(operator, path, arg)?,
                position: None,
                slice: None,
            },
            "$addToSet" => match arg {
                Value::Object(modifiers) if modifiers.contains_key("$each") => {
                    UpdateAction::AddToSet(Self::array_arg(
                        "$each",
                        path,
                        modifiers.get("$each").unwrap_or(&Value::Null),
                    )?)
                }
                _ => UpdateAction::AddToSet(vec![arg.clone()]),
            },
            "$pull" => UpdateAction::Pull(PullCondition::parse(arg)?),
            "$pullAll" => UpdateAction::PullAll(Self::array_arg(operator, path, arg)?),
            "$pop" => {
                let direction = arg.as_f64().ok_or_else(|| {
                    DocStoreError::InvalidUpdate(format!("$pop on '{}' needs a number", path))
                })?;
                if direction > 0.0 {
                    UpdateAction::Pop(PopEnd::Last)
                } else if direction < 0.0 {
                    UpdateAction::Pop(PopEnd::First)
                } else {
                    return Err(DocStoreError::InvalidUpdate(format!(
                        "$pop on '{}' needs a non-zero number",
                        path
                    )));
                }
            }
            other => return Err(DocStoreError::UnsupportedOperator(other.to_string())),
        })
    }

    fn parse_push_modifiers(path: &str, modifiers: &Map<String, Value>) -> Result<UpdateAction> {
        let mut items = Vec::new();
        let mut position = None;
        let mut slice = None;
        for (key, value) in modifiers {
            match key.as_str() {
                "$each" => items = Self::array_arg("$each", path, value)?,
                "$position" => {
                    position = Some(value.as_u64().ok_or_else(|| {
                        DocStoreError::InvalidUpdate(
                            "$position must be a non-negative integer".to_string(),
                        )
                    })? as usize)
                }
                "$slice" => {
                    slice = Some(value.as_i64().ok_or_else(|| {
                        DocStoreError::InvalidUpdate("$slice must be an integer".to_string())
                    })?)
                }
                other => {
                    return Err(DocStoreError::InvalidUpdate(format!(
                        "unknown $push modifier '{}'",
                        other
                    )))
                }
            }
        }
        Ok(UpdateAction::Push {
            items,
            position,
            slice,
        })
    }

    fn array_arg(operator: &str, path: &str, arg: &Value) -> Result<Vec<Value>> {
        match arg {
            Value::Array(items) => Ok(items.clone()),
            other => Err(DocStoreError::InvalidUpdate(format!(
                "{} on '{}' requires an array, got {}",
                operator,
                path,
                type_name(other)
            ))),
        }
    }

    /// Two operators may not touch the same path or a path and its parent
    fn check_conflicts(updates: &[FieldUpdate]) -> Result<()> {
        for (i, a) in updates.iter().enumerate() {
            for b in &updates[i + 1..] {
                let overlap = a.path == b.path
                    || b.path.starts_with(&format!("{}.", a.path))
                    || a.path.starts_with(&format!("{}.", b.path));
                if overlap {
                    return Err(DocStoreError::InvalidUpdate(format!(
                        "updating '{}' with {} conflicts with {} on '{}'",
                        b.path, b.operator, a.operator, a.path
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn is_replacement(&self) -> bool {
        matches!(self, UpdateSpec::Replace(_))
    }

    /// Produce the updated document and whether anything changed
    pub fn apply(&self, document: &Document) -> Result<(Document, bool)> {
        match self {
            UpdateSpec::Replace(body) => {
                if let Some(raw) = body.get(ID_FIELD) {
                    if &DocumentId::from_value(raw)? != document.id() {
                        return Err(DocStoreError::InvalidUpdate(format!(
                            "replacement would change _id of {}",
                            document.id()
                        )));
                    }
                }
                let replaced = Document::new(document.id().clone(), body.clone());
                let changed = replaced.fields() != document.fields();
                Ok((replaced, changed))
            }
            UpdateSpec::Operators(updates) => {
                let mut updated = document.clone();
                for update in updates {
                    Self::apply_one(&mut updated, update)?;
                }
                let changed = updated.fields() != document.fields();
                Ok((updated, changed))
            }
        }
    }

    fn apply_one(doc: &mut Document, update: &FieldUpdate) -> Result<()> {
        let path = update.path.as_str();
        match &update.action {
            UpdateAction::Set(value) => doc.set_path(path, value.clone()),
            UpdateAction::Unset => doc.remove_path(path).map(|_| ()),
            UpdateAction::Inc(delta) => {
                let next = match doc.get(path) {
                    None => delta.clone(),
                    Some(current @ Value::Number(_)) => {
                        numeric_add(current, delta).ok_or_else(|| {
                            DocStoreError::TypeMismatch(format!(
                                "$inc on '{}' overflowed: result is not a finite number",
                                path
                            ))
                        })?
                    }
                    Some(current) => {
                        return Err(DocStoreError::TypeMismatch(format!(
                            "cannot apply $inc to '{}' holding {}",
                            path,
                            type_name(current)
                        )))
                    }
                };
                doc.set_path(path, next)
            }
            UpdateAction::Push {
                items,
                position,
                slice,
            } => {
                let mut array = Self::target_array(doc, update)?.unwrap_or_default();
                let at = position.map(|p| p.min(array.len())).unwrap_or(array.len());
                let tail = array.split_off(at);
                array.extend(items.iter().cloned());
                array.extend(tail);
                if let Some(slice) = *slice {
                    if slice < 0 {
                        let keep = slice.unsigned_abs() as usize;
                        if array.len() > keep {
                            array = array.split_off(array.len() - keep);
                        }
                    } else {
                        array.truncate(slice as usize);
                    }
                }
                doc.set_path(path, Value::Array(array))
            }
            UpdateAction::AddToSet(items) => {
                let mut array = Self::target_array(doc, update)?.unwrap_or_default();
                for item in items {
                    if !array.iter().any(|e| values_equal(e, item)) {
                        array.push(item.clone());
                    }
                }
                doc.set_path(path, Value::Array(array))
            }
            UpdateAction::Pull(condition) => match Self::target_array(doc, update)? {
                None => Ok(()),
                Some(mut array) => {
                    array.retain(|e| !condition.removes(e));
                    doc.set_path(path, Value::Array(array))
                }
            },
            UpdateAction::PullAll(values) => match Self::target_array(doc, update)? {
                None => Ok(()),
                Some(mut array) => {
                    array.retain(|e| !values.iter().any(|v| values_equal(e, v)));
                    doc.set_path(path, Value::Array(array))
                }
            },
            UpdateAction::Pop(end) => match Self::target_array(doc, update)? {
                None => Ok(()),
                Some(array) if array.is_empty() => Ok(()),
                Some(mut array) => {
                    match end {
                        PopEnd::First => {
                            array.remove(0);
                        }
                        PopEnd::Last => {
                            array.pop();
                        }
                    }
                    doc.set_path(path, Value::Array(array))
                }
            },
        }
    }

    /// Current array at the update's path; `None` when the field is missing
    fn target_array(doc: &Document, update: &FieldUpdate) -> Result<Option<Vec<Value>>> {
        match doc.get(&update.path) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items.clone())),
            Some(other) => Err(DocStoreError::TypeMismatch(format!(
                "{} requires '{}' to be an array, found {}",
                update.operator,
                update.path,
                type_name(other)
            ))),
        }
    }
}
