//! The machine context — an insertion-ordered, optionally typed
//! key/value container.
//!
//! Context is mutated only by calculators and actions. Every write is
//! tracked so a macro-step can snapshot its net effect as a delta, and
//! so the engine knows when to re-evaluate eventless transitions.

use crate::error::MachineError;
use indexmap::{IndexMap, IndexSet};
use keel::event::ContextEntry;
use serde_json::Value;
use std::fmt;

/// Coarse JSON type tags used by schemas and `required_context`
/// declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool,
    /// Integral number.
    Integer,
    /// Any number, including integers.
    Number,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ValueKind {
    /// Whether `value` satisfies this tag.
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone)]
struct FieldSpec {
    kind: Option<ValueKind>,
    required: bool,
}

/// Declared shape of a typed context. Untyped machines simply don't
/// attach one.
#[derive(Debug, Clone, Default)]
pub struct ContextSchema {
    fields: IndexMap<String, FieldSpec>,
}

impl ContextSchema {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an optional field with a type tag.
    pub fn field(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(
            key.into(),
            FieldSpec {
                kind: Some(kind),
                required: false,
            },
        );
        self
    }

    /// Declare a required field with a type tag.
    pub fn required(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.insert(
            key.into(),
            FieldSpec {
                kind: Some(kind),
                required: true,
            },
        );
        self
    }

    fn check_write(&self, key: &str, value: &Value) -> Result<(), MachineError> {
        if let Some(spec) = self.fields.get(key) {
            if let Some(kind) = spec.kind {
                if !kind.admits(value) {
                    return Err(MachineError::MachineContextValidation(format!(
                        "key {key:?} expects {kind}, got {value}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_presence(&self, values: &IndexMap<String, Value>) -> Result<(), MachineError> {
        for (key, spec) in &self.fields {
            if spec.required && !values.contains_key(key) {
                return Err(MachineError::MachineContextValidation(format!(
                    "required key {key:?} is absent"
                )));
            }
        }
        Ok(())
    }
}

/// The running context of one machine instance.
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: IndexMap<String, Value>,
    schema: Option<ContextSchema>,
    changed: IndexSet<String>,
    removed: IndexSet<String>,
}

impl Context {
    /// An empty untyped context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the definition's `context` config value. Accepts a
    /// JSON object or null; anything else is a context validation
    /// error.
    pub fn from_config(value: &Value) -> Result<Self, MachineError> {
        let mut context = Self::new();
        match value {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    context.values.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(MachineError::MachineContextValidation(format!(
                    "initial context must be an object, got {other}"
                )));
            }
        }
        Ok(context)
    }

    /// Rebuild from folded snapshot entries (replay path). Schema
    /// checks are skipped: the recorded values were validated when
    /// they were live.
    pub fn from_entries(entries: Vec<ContextEntry>, schema: Option<ContextSchema>) -> Self {
        let values = entries.into_iter().map(|e| (e.key, e.value)).collect();
        Self {
            values,
            schema,
            changed: IndexSet::new(),
            removed: IndexSet::new(),
        }
    }

    /// Attach a schema. Existing values are not re-checked here; call
    /// [`Context::validate`] for that.
    pub fn with_schema(mut self, schema: ContextSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Read a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read an integer, if the key holds one.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Read a string slice, if the key holds one.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Write a value. Checked against the schema's type tag for the
    /// key, when one is declared.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), MachineError> {
        let key = key.into();
        if let Some(schema) = &self.schema {
            schema.check_write(&key, &value)?;
        }
        self.removed.swap_remove(&key);
        self.changed.insert(key.clone());
        self.values.insert(key, value);
        Ok(())
    }

    /// Remove a key. No-op if absent.
    pub fn remove(&mut self, key: &str) {
        if self.values.shift_remove(key).is_some() {
            self.changed.swap_remove(key);
            self.removed.insert(key.to_owned());
        }
    }

    /// Whether any write or removal happened since the last
    /// [`Context::clear_changes`].
    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty() || !self.removed.is_empty()
    }

    /// Forget accumulated change tracking.
    pub fn clear_changes(&mut self) {
        self.changed.clear();
        self.removed.clear();
    }

    /// Full snapshot of the current contents, in insertion order.
    pub fn snapshot(&self) -> Vec<ContextEntry> {
        self.values
            .iter()
            .map(|(k, v)| ContextEntry::new(k.clone(), v.clone()))
            .collect()
    }

    /// Check required-presence rules of the schema.
    pub fn validate(&self) -> Result<(), MachineError> {
        if let Some(schema) = &self.schema {
            schema.check_presence(&self.values)?;
        }
        Ok(())
    }

    /// Presence/type check for a behavior's `required_context`
    /// declaration. `behavior` names the callable for the error.
    pub fn require(
        &self,
        behavior: &str,
        keys: &[crate::behavior::RequiredKey],
    ) -> Result<(), MachineError> {
        for required in keys {
            match self.values.get(&required.key) {
                None => {
                    return Err(MachineError::MissingMachineContext {
                        behavior: behavior.to_owned(),
                        detail: format!("key {:?} is absent", required.key),
                    });
                }
                Some(value) => {
                    if let Some(kind) = required.kind {
                        if !kind.admits(value) {
                            return Err(MachineError::MissingMachineContext {
                                behavior: behavior.to_owned(),
                                detail: format!(
                                    "key {:?} expects {kind}, got {value}",
                                    required.key
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Difference between two ordered snapshots, as a delta: keys of
/// `current` that are new or changed (in `current` order), and keys of
/// `previous` that disappeared.
pub fn diff_snapshots(
    previous: &[ContextEntry],
    current: &[ContextEntry],
) -> (Vec<ContextEntry>, Vec<String>) {
    let set = current
        .iter()
        .filter(|entry| {
            previous
                .iter()
                .find(|p| p.key == entry.key)
                .is_none_or(|p| p.value != entry.value)
        })
        .cloned()
        .collect();
    let unset = previous
        .iter()
        .filter(|p| !current.iter().any(|c| c.key == p.key))
        .map(|p| p.key.clone())
        .collect();
    (set, unset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_track_changes_in_order() {
        let mut context = Context::new();
        context.set("a", json!(1)).unwrap();
        context.set("b", json!(2)).unwrap();
        assert!(context.is_dirty());
        let snapshot = context.snapshot();
        assert_eq!(snapshot[0].key, "a");
        assert_eq!(snapshot[1].key, "b");
        context.clear_changes();
        assert!(!context.is_dirty());
    }

    #[test]
    fn schema_rejects_mistyped_writes() {
        let schema = ContextSchema::new().required("count", ValueKind::Integer);
        let mut context = Context::new().with_schema(schema);
        assert!(context.set("count", json!("three")).is_err());
        context.set("count", json!(3)).unwrap();
        context.validate().unwrap();
    }

    #[test]
    fn missing_required_key_fails_validation() {
        let schema = ContextSchema::new().required("count", ValueKind::Integer);
        let context = Context::new().with_schema(schema);
        assert!(matches!(
            context.validate(),
            Err(MachineError::MachineContextValidation(_))
        ));
    }

    #[test]
    fn diff_reports_sets_and_unsets() {
        let previous = vec![
            ContextEntry::new("a", json!(1)),
            ContextEntry::new("b", json!(2)),
        ];
        let current = vec![
            ContextEntry::new("a", json!(1)),
            ContextEntry::new("c", json!(3)),
        ];
        let (set, unset) = diff_snapshots(&previous, &current);
        assert_eq!(set, vec![ContextEntry::new("c", json!(3))]);
        assert_eq!(unset, vec!["b".to_owned()]);
    }
}
