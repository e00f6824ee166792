//! In-memory gridded fields passed between selection, derivation and output.

use std::collections::BTreeMap;

/// Attribute value carried from the source store to the NetCDF output.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl AttrValue {
    /// Converts a JSON attribute; arrays, objects and nulls have no
    /// counterpart and yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(AttrValue::Text(s.clone())),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(AttrValue::Int)
                .or_else(|| n.as_f64().map(AttrValue::Float)),
            serde_json::Value::Bool(b) => Some(AttrValue::Int(i64::from(*b))),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

pub type Attributes = BTreeMap<String, AttrValue>;

/// Row-major `f32` grid with named dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    pub attributes: Attributes,
}

impl Field {
    pub fn new(name: &str, dims: &[&str], shape: Vec<usize>, data: Vec<f32>) -> Self {
        Field {
            name: name.to_string(),
            dims: dims.iter().map(|d| d.to_string()).collect(),
            shape,
            data,
            attributes: Attributes::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn attribute_text(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|v| v.as_text())
    }
}
