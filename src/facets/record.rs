//! Records, metadata values and filters

use crate::facets::error::{FacetError, FacetResult};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique, immutable identifier of an indexed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RecordId {
    type Err = FacetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| FacetError::InvalidQuery(format!("invalid record id '{}': {}", s, e)))
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A metadata value as supplied by callers
///
/// JSON scalars map directly: `"CA"`, `3`, `2.5`, `true`. Integers are kept
/// exact; only literals with a fraction or exponent become `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    UInt(u64),
    Float(f64),
    String(String),
}

impl FieldValue {
    /// Canonical string form used when building tokens
    ///
    /// Integers print in full. Floats use the shortest round-trip decimal
    /// form, so `3.0` and `3` produce the same token. Non-finite floats have
    /// no canonical form.
    pub fn canonical(&self) -> FacetResult<Cow<'_, str>> {
        match self {
            FieldValue::String(s) => Ok(Cow::Borrowed(s.as_str())),
            FieldValue::Boolean(b) => Ok(Cow::Borrowed(if *b { "true" } else { "false" })),
            FieldValue::Integer(n) => Ok(Cow::Owned(n.to_string())),
            FieldValue::UInt(n) => Ok(Cow::Owned(n.to_string())),
            FieldValue::Float(n) if !n.is_finite() => Err(FacetError::Encoding(format!(
                "non-finite number {} cannot be used as a facet value",
                n
            ))),
            // -0.0 and 0.0 must share a token
            FieldValue::Float(n) if *n == 0.0 => Ok(Cow::Borrowed("0")),
            FieldValue::Float(n) => Ok(Cow::Owned(n.to_string())),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Float(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(n) => FieldValue::Integer(n),
            Err(_) => FieldValue::UInt(n),
        }
    }
}

/// A record and its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Add or replace one field
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

/// One `field = value` constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub field: String,
    pub value: FieldValue,
}

/// Conjunction of field/value constraints
///
/// A record matches when it carries every clause.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    clauses: Vec<FilterClause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause; repeating an existing clause has no effect
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.add(field, value);
        self
    }

    pub fn add(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let clause = FilterClause {
            field: field.into(),
            value: value.into(),
        };
        if !self.clauses.contains(&clause) {
            self.clauses.push(clause);
        }
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Distinct field names mentioned by the filter
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            if !seen.contains(&clause.field.as_str()) {
                seen.push(clause.field.as_str());
            }
        }
        seen.into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }
}

impl<K, V> FromIterator<(K, V)> for Filter
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for (field, value) in iter {
            filter.add(field, value);
        }
        filter
    }
}
