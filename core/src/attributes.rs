//! Extensible typed attributes for units.
//!
//! Units carry a key → typed value map instead of an untyped blob. Every
//! write goes through [`AttributeMap::set_checked`], which validates the
//! value against the schema published by the content service.

use crate::error::ValidationFailure;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Int(i64),
    Bool(bool),
    Text(String),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Self::Int(_) => AttrType::Int,
            Self::Bool(_) => AttrType::Bool,
            Self::Text(_) => AttrType::Text,
            Self::List(_) => AttrType::List,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    Int,
    Bool,
    Text,
    List,
}

/// Declared shape of one attribute key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub key: String,
    pub attr_type: AttrType,
    /// Inclusive bounds, only meaningful for `Int`.
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
}

impl AttributeSpec {
    pub fn check(&self, value: &AttrValue) -> Result<(), ValidationFailure> {
        let fail = |reason: String| ValidationFailure::AttributeSchema {
            key: self.key.clone(),
            reason,
        };
        if value.attr_type() != self.attr_type {
            return Err(fail(format!(
                "expected {:?}, got {:?}",
                self.attr_type,
                value.attr_type()
            )));
        }
        if let AttrValue::Int(v) = value {
            if self.min.is_some_and(|min| *v < min) || self.max.is_some_and(|max| *v > max) {
                return Err(fail(format!("{v} outside {:?}..={:?}", self.min, self.max)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, AttrValue>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Write `value` under `key` if the schema knows the key and accepts the
    /// value. Unknown keys are rejected.
    pub fn set_checked(
        &mut self,
        key: &str,
        value: AttrValue,
        spec: Option<&AttributeSpec>,
    ) -> Result<(), ValidationFailure> {
        let spec = spec.ok_or_else(|| ValidationFailure::AttributeSchema {
            key: key.to_string(),
            reason: "key not declared by ruleset".into(),
        })?;
        spec.check(&value)?;
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn morale_spec() -> AttributeSpec {
        AttributeSpec {
            key: "morale".into(),
            attr_type: AttrType::Int,
            min: Some(0),
            max: Some(100),
        }
    }

    #[test]
    fn accepts_values_matching_schema() {
        let mut attrs = AttributeMap::new();
        attrs
            .set_checked("morale", AttrValue::Int(70), Some(&morale_spec()))
            .expect("70 is within bounds");
        assert_eq!(attrs.int("morale"), Some(70));
    }

    #[test]
    fn rejects_wrong_type_and_out_of_range() {
        let mut attrs = AttributeMap::new();
        let spec = morale_spec();
        assert!(attrs.set_checked("morale", AttrValue::Bool(true), Some(&spec)).is_err());
        assert!(attrs.set_checked("morale", AttrValue::Int(101), Some(&spec)).is_err());
        assert!(attrs.is_empty(), "failed writes must not leave partial state");
    }

    #[test]
    fn rejects_undeclared_keys() {
        let mut attrs = AttributeMap::new();
        let err = attrs
            .set_checked("mystery", AttrValue::Int(1), None)
            .unwrap_err();
        assert!(matches!(err, ValidationFailure::AttributeSchema { .. }));
    }
}
