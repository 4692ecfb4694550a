//! Output parser. Turns a step's JSON stdout into records.
//!
//! Paths are dotted (`metadata.name`, `items.0.id`); a literal dot inside a
//! key is written `\.`. They are resolved through [`PathQuery`], so the parser
//! itself never walks a dynamic document by hand.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::ParseError;
use crate::flow::schema::{normalize_key, FieldSpec};

/// A parsed document that answers path queries with typed, optional results.
pub trait PathQuery: Sized {
    /// The elements of the array at `path`, or `None` if `path` does not
    /// resolve to an array.
    fn array_at(&self, path: &str) -> Option<&[Self]>;

    /// The scalar at `path` rendered as a string, or `None` if the path is
    /// missing or resolves to an object/array.
    fn scalar_at(&self, path: &str) -> Option<String>;
}

impl PathQuery for Value {
    fn array_at(&self, path: &str) -> Option<&[Value]> {
        lookup(self, path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }

    fn scalar_at(&self, path: &str) -> Option<String> {
        match lookup(self, path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => Some(String::new()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    value.pointer(&to_pointer(path))
}

/// Convert a dotted path into a JSON pointer (RFC 6901).
fn to_pointer(path: &str) -> String {
    let mut pointer = String::with_capacity(path.len() + 1);
    pointer.push('/');

    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                chars.next();
                pointer.push('.');
            }
            '.' => pointer.push('/'),
            '~' => pointer.push_str("~0"),
            '/' => pointer.push_str("~1"),
            other => pointer.push(other),
        }
    }
    pointer
}

/// One array element reduced to its declared fields, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    values: IndexMap<String, String>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The fields of the selected record, keyed by placeholder-safe names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Binding {
    values: IndexMap<String, String>,
}

impl Binding {
    pub fn from_record(record: &Record) -> Self {
        Self {
            values: record
                .iter()
                .map(|(k, v)| (normalize_key(k), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Parse `raw` as JSON and extract one record per element of the array at
/// `root_path`.
///
/// Every field must resolve to a scalar in every element; the first miss fails
/// the whole parse.
pub fn parse(raw: &str, root_path: &str, fields: &[FieldSpec]) -> Result<Vec<Record>, ParseError> {
    let document: Value =
        serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    parse_document(&document, root_path, fields)
}

/// Same as [`parse`], over any already-parsed document.
pub fn parse_document<D: PathQuery>(
    document: &D,
    root_path: &str,
    fields: &[FieldSpec],
) -> Result<Vec<Record>, ParseError> {
    let items = document
        .array_at(root_path)
        .ok_or_else(|| ParseError::NotAnArray(root_path.to_string()))?;

    items
        .iter()
        .map(|item| {
            fields
                .iter()
                .map(|field| {
                    item.scalar_at(&field.path)
                        .map(|value| (field.name.clone(), value))
                        .ok_or_else(|| ParseError::FieldNotFound(field.path.clone()))
                })
                .collect::<Result<Record, ParseError>>()
        })
        .collect()
}
