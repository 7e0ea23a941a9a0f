//! Component data with write interception.

use crate::error::StructuralError;
use crate::expression::{strict_equal, type_name};
use crate::scope::Resolver;
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Outcome of [`Store::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    /// The new value equals the stored one; nothing happened.
    Unchanged,
    /// The value was replaced. `reactive` is false for private fields.
    Changed { reactive: bool },
}

/// Top-level data fields of a component, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    fields: IndexMap<String, Value>,
    follow_up: bool,
}

/// Fields starting with `$` or `_` are readable and writable but never
/// schedule a render.
pub fn is_private(field: &str) -> bool {
    field.starts_with('$') || field.starts_with('_')
}

impl Store {
    /// A store with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from a data object; `null` means no data.
    pub fn from_value(data: Value) -> Result<Self, StructuralError> {
        match data {
            Value::Object(map) => Ok(Self {
                fields: map.into_iter().collect(),
                follow_up: false,
            }),
            Value::Null => Ok(Self::new()),
            other => Err(StructuralError::DataNotMapping {
                found: type_name(&other),
            }),
        }
    }

    /// Current value of a field, with no bookkeeping.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Whether `field` was declared in the initial data.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Stores `value` unless it strictly equals the current one (`===`, so
    /// `2.0` and `2` are the same). Only existing fields can be written;
    /// `None` means the field does not exist.
    pub fn set(&mut self, field: &str, value: Value) -> Option<Write> {
        let slot = self.fields.get_mut(field)?;
        if strict_equal(slot, &value) {
            return Some(Write::Unchanged);
        }
        *slot = value;
        Some(Write::Changed {
            reactive: !is_private(field),
        })
    }

    /// Whether writing `field` can schedule a render.
    pub fn is_reactive(&self, field: &str) -> bool {
        self.contains(field) && !is_private(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Asks for one deferred action after the next render hook run.
    pub fn request_follow_up(&mut self) {
        self.follow_up = true;
    }

    /// Clears and returns the follow-up flag.
    pub fn take_follow_up(&mut self) -> bool {
        std::mem::take(&mut self.follow_up)
    }

    /// All fields as one JSON object, in declaration order.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect::<Map<_, _>>(),
        )
    }
}

impl Resolver for Store {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}
