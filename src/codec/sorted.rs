// Sort keys and indexed vectors
//
// Keys order the elements of sorted and indexed vectors. Strings compare as raw
// UTF-8 bytes, which is the order the wire format guarantees to readers doing a
// binary search.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::codec::value::{ObjectValue, Value};
use crate::internal::error::{Error, Result};
use crate::schema::types::ScalarType;

/// A comparable key extracted from a table's key field.
#[derive(Debug, Clone)]
pub enum SortKey {
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Str(String),
}

impl SortKey {
    /// Key of a scalar or string value; `None` for anything else.
    pub fn from_value(value: &Value) -> Option<SortKey> {
        let key = match *value {
            Value::Bool(v) => SortKey::Bool(v),
            Value::Int8(v) => SortKey::Signed(v as i64),
            Value::Int16(v) => SortKey::Signed(v as i64),
            Value::Int32(v) => SortKey::Signed(v as i64),
            Value::Int64(v) => SortKey::Signed(v),
            Value::UInt8(v) => SortKey::Unsigned(v as u64),
            Value::UInt16(v) => SortKey::Unsigned(v as u64),
            Value::UInt32(v) => SortKey::Unsigned(v as u64),
            Value::UInt64(v) => SortKey::Unsigned(v),
            Value::Float32(v) => SortKey::Float(v as f64),
            Value::Float64(v) => SortKey::Float(v),
            Value::String(ref s) => SortKey::Str(s.clone()),
            _ => return None,
        };
        Some(key)
    }

    fn to_value(&self) -> Value {
        match self {
            SortKey::Bool(v) => Value::Bool(*v),
            SortKey::Signed(v) => Value::Int64(*v),
            SortKey::Unsigned(v) => Value::UInt64(*v),
            SortKey::Float(v) => Value::Float64(*v),
            SortKey::Str(v) => Value::String(v.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Bool(_) => 0,
            SortKey::Signed(_) => 1,
            SortKey::Unsigned(_) => 2,
            SortKey::Float(_) => 3,
            SortKey::Str(_) => 4,
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            (SortKey::Signed(a), SortKey::Signed(b)) => a.cmp(b),
            (SortKey::Unsigned(a), SortKey::Unsigned(b)) => a.cmp(b),
            (SortKey::Float(a), SortKey::Float(b)) => a.total_cmp(b),
            (SortKey::Str(a), SortKey::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl Hash for SortKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            SortKey::Bool(v) => v.hash(state),
            SortKey::Signed(v) => v.hash(state),
            SortKey::Unsigned(v) => v.hash(state),
            SortKey::Float(v) => v.to_bits().hash(state),
            SortKey::Str(v) => v.as_bytes().hash(state),
        }
    }
}

impl From<&str> for SortKey {
    fn from(value: &str) -> Self {
        SortKey::Str(value.to_string())
    }
}

impl From<String> for SortKey {
    fn from(value: String) -> Self {
        SortKey::Str(value)
    }
}

impl From<i64> for SortKey {
    fn from(value: i64) -> Self {
        SortKey::Signed(value)
    }
}

impl From<u64> for SortKey {
    fn from(value: u64) -> Self {
        SortKey::Unsigned(value)
    }
}

/// Builder for an indexed vector: tables addressed by their key field.
///
/// Insertion and lookup are hash-map operations; the vector is sorted by key
/// when written. With a key type set, keys are converted to that scalar before
/// hashing, so `UInt32(7)` and `Signed(7)` address the same `int` entry.
#[derive(Debug, Clone, Default)]
pub struct IndexedVector {
    key_field: String,
    key_type: Option<ScalarType>,
    entries: HashMap<SortKey, ObjectValue>,
    frozen: bool,
}

impl PartialEq for IndexedVector {
    fn eq(&self, other: &Self) -> bool {
        self.key_field == other.key_field && self.entries == other.entries
    }
}

impl IndexedVector {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self::with_key_type(key_field, None)
    }

    /// Index over a key field of scalar type `key_type`; `None` for string keys.
    pub fn with_key_type(key_field: impl Into<String>, key_type: Option<ScalarType>) -> Self {
        Self {
            key_field: key_field.into(),
            key_type,
            entries: HashMap::new(),
            frozen: false,
        }
    }

    /// Collects table values into an index; a later duplicate key replaces an earlier one.
    pub fn from_elements(
        key_field: impl Into<String>,
        key_type: Option<ScalarType>,
        elements: Vec<Value>,
    ) -> Result<Self> {
        let mut indexed = IndexedVector::with_key_type(key_field, key_type);
        for element in elements {
            match element {
                Value::Table(obj) => {
                    indexed.insert(obj)?;
                }
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "table".to_string(),
                        actual: other.type_name().to_string(),
                    })
                }
            }
        }
        Ok(indexed)
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn key_type(&self) -> Option<ScalarType> {
        self.key_type
    }

    fn key_of(&self, value: &Value) -> Result<SortKey> {
        let value = match self.key_type {
            Some(scalar) => Cow::Owned(value.coerce(scalar)?),
            None => Cow::Borrowed(value),
        };
        SortKey::from_value(&value).ok_or_else(|| Error::TypeMismatch {
            expected: "scalar or string key".to_string(),
            actual: value.type_name().to_string(),
        })
    }

    // Lookup keys that do not fit the key type match nothing.
    fn lookup_key<'k>(&self, key: &'k SortKey) -> Option<Cow<'k, SortKey>> {
        match self.key_type {
            Some(_) => self.key_of(&key.to_value()).ok().map(Cow::Owned),
            None => Some(Cow::Borrowed(key)),
        }
    }

    /// Inserts a table under the value of its key field, returning the replaced entry.
    pub fn insert(&mut self, table: ObjectValue) -> Result<Option<ObjectValue>> {
        if self.frozen {
            return Err(Error::NotMutable(self.key_field.clone()));
        }
        let value = table
            .get(&self.key_field)
            .ok_or_else(|| Error::RequiredField(self.key_field.clone()))?;
        let key = self.key_of(value)?;
        Ok(self.entries.insert(key, table))
    }

    pub fn remove(&mut self, key: &SortKey) -> Result<Option<ObjectValue>> {
        if self.frozen {
            return Err(Error::NotMutable(self.key_field.clone()));
        }
        Ok(match self.lookup_key(key) {
            Some(key) => self.entries.remove(key.as_ref()),
            None => None,
        })
    }

    pub fn get(&self, key: &SortKey) -> Option<&ObjectValue> {
        self.entries.get(self.lookup_key(key)?.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &ObjectValue> {
        self.entries.values()
    }

    /// Entries in ascending key order, the order they are written in.
    pub fn sorted(&self) -> Vec<(&SortKey, &ObjectValue)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
        self.entries.values_mut().for_each(ObjectValue::freeze);
    }

    pub(crate) fn thawed(self) -> IndexedVector {
        let entries = self.entries.into_iter().map(|(key, obj)| (key, obj.thawed())).collect();
        IndexedVector {
            key_field: self.key_field,
            key_type: self.key_type,
            entries,
            frozen: false,
        }
    }
}
