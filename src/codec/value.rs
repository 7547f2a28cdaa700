// Owned object values
//
// The in-memory form of a FlatBuffers object graph: what callers build before
// writing, and what greedy parsing materializes. Views created by lazy and
// progressive parsing convert to the same representation.

use std::collections::BTreeMap;

use crate::codec::primitives::{ByteSource, Scalar};
use crate::codec::sorted::IndexedVector;
use crate::internal::error::{Error, Result};
use crate::schema::types::{DefaultValue, ScalarType};

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    Vector(Vec<Value>),
    /// A keyed vector built through a hash map; written sorted by key.
    Indexed(IndexedVector),
    Table(ObjectValue),
    Struct(ObjectValue),
    Union(UnionValue),
}

/// A union value: the member discriminator and the member value.
///
/// Discriminator 0 is `NONE` and carries no value.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionValue {
    pub discriminator: u16,
    pub value: Option<Box<Value>>,
}

impl UnionValue {
    pub fn new(discriminator: u16, value: impl Into<Value>) -> Self {
        Self {
            discriminator,
            value: Some(Box::new(value.into())),
        }
    }

    pub fn none() -> Self {
        Self {
            discriminator: 0,
            value: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.discriminator == 0
    }

    pub fn member(&self) -> Option<&Value> {
        self.value.as_deref()
    }
}

macro_rules! scalar_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

scalar_conversions!(
    bool => Bool,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<Value> => Vector,
    IndexedVector => Indexed,
    UnionValue => Union,
);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<ObjectValue> for Value {
    fn from(value: ObjectValue) -> Self {
        Value::Table(value)
    }
}

impl Value {
    /// Short description of the variant for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int8(_) => "byte",
            Value::UInt8(_) => "ubyte",
            Value::Int16(_) => "short",
            Value::UInt16(_) => "ushort",
            Value::Int32(_) => "int",
            Value::UInt32(_) => "uint",
            Value::Int64(_) => "long",
            Value::UInt64(_) => "ulong",
            Value::Float32(_) => "float",
            Value::Float64(_) => "double",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Indexed(_) => "indexed vector",
            Value::Table(_) => "table",
            Value::Struct(_) => "struct",
            Value::Union(_) => "union",
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::Int8(v) => Some(v as i128),
            Value::UInt8(v) => Some(v as i128),
            Value::Int16(v) => Some(v as i128),
            Value::UInt16(v) => Some(v as i128),
            Value::Int32(v) => Some(v as i128),
            Value::UInt32(v) => Some(v as i128),
            Value::Int64(v) => Some(v as i128),
            Value::UInt64(v) => Some(v as i128),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float32(v) => Some(v as f64),
            Value::Float64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The object of a table or struct value.
    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Table(obj) | Value::Struct(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// Converts a numeric value to the variant of `scalar`, checking range.
    pub fn coerce(&self, scalar: ScalarType) -> Result<Value> {
        let mismatch = || Error::TypeMismatch {
            expected: scalar.name().to_string(),
            actual: self.type_name().to_string(),
        };
        if scalar == ScalarType::Bool {
            return self.as_bool().map(Value::Bool).ok_or_else(mismatch);
        }
        if scalar.is_float() {
            let v = self.as_f64().ok_or_else(mismatch)?;
            return Ok(match scalar {
                ScalarType::Float => Value::Float32(v as f32),
                _ => Value::Float64(v),
            });
        }
        let v = self.as_i128().ok_or_else(mismatch)?;
        let (min, max) = scalar.integer_range().ok_or_else(mismatch)?;
        if v < min || v > max {
            return Err(Error::TypeMismatch {
                expected: scalar.name().to_string(),
                actual: format!("{} (out of range)", v),
            });
        }
        Ok(integer_value(v, scalar))
    }

    /// The value of an absent scalar field.
    pub fn default_for(scalar: ScalarType, default: Option<&DefaultValue>) -> Value {
        match default.copied().unwrap_or_else(|| DefaultValue::zero(scalar)) {
            DefaultValue::Bool(v) => Value::Bool(v),
            DefaultValue::Float(v) if scalar == ScalarType::Float => Value::Float32(v as f32),
            DefaultValue::Float(v) => Value::Float64(v),
            DefaultValue::Signed(v) => integer_value(v as i128, scalar),
            DefaultValue::Unsigned(v) => integer_value(v as i128, scalar),
        }
    }

    /// Reads a scalar of type `scalar` at `offset`.
    pub fn read_scalar<B: ByteSource + ?Sized>(source: &B, offset: usize, scalar: ScalarType) -> Result<Value> {
        Ok(match scalar {
            ScalarType::Bool => Value::Bool(source.read(offset)?),
            ScalarType::Byte => Value::Int8(source.read(offset)?),
            ScalarType::UByte => Value::UInt8(source.read(offset)?),
            ScalarType::Short => Value::Int16(source.read(offset)?),
            ScalarType::UShort => Value::UInt16(source.read(offset)?),
            ScalarType::Int => Value::Int32(source.read(offset)?),
            ScalarType::UInt => Value::UInt32(source.read(offset)?),
            ScalarType::Long => Value::Int64(source.read(offset)?),
            ScalarType::ULong => Value::UInt64(source.read(offset)?),
            ScalarType::Float => Value::Float32(source.read(offset)?),
            ScalarType::Double => Value::Float64(source.read(offset)?),
        })
    }

    /// Encodes a scalar value (already coerced) into `dst`, which must be exactly its size.
    pub fn write_scalar_le(&self, dst: &mut [u8]) -> Result<()> {
        fn put<T: Scalar>(value: T, dst: &mut [u8]) -> Result<()> {
            if dst.len() != T::SIZE {
                return Err(Error::InvalidOperation(format!(
                    "scalar of {} bytes written into a {} byte slot",
                    T::SIZE,
                    dst.len()
                )));
            }
            value.write_le_slice(dst);
            Ok(())
        }
        match *self {
            Value::Bool(v) => put(v, dst),
            Value::Int8(v) => put(v, dst),
            Value::UInt8(v) => put(v, dst),
            Value::Int16(v) => put(v, dst),
            Value::UInt16(v) => put(v, dst),
            Value::Int32(v) => put(v, dst),
            Value::UInt32(v) => put(v, dst),
            Value::Int64(v) => put(v, dst),
            Value::UInt64(v) => put(v, dst),
            Value::Float32(v) => put(v, dst),
            Value::Float64(v) => put(v, dst),
            _ => Err(Error::TypeMismatch {
                expected: "scalar".to_string(),
                actual: self.type_name().to_string(),
            }),
        }
    }

    /// Marks every nested object as immutable.
    pub fn freeze(&mut self) {
        match self {
            Value::Table(obj) | Value::Struct(obj) => obj.freeze(),
            Value::Vector(items) => items.iter_mut().for_each(Value::freeze),
            Value::Indexed(indexed) => indexed.freeze(),
            Value::Union(union) => {
                if let Some(value) = union.value.as_mut() {
                    value.freeze();
                }
            }
            _ => {}
        }
    }
}

fn integer_value(v: i128, scalar: ScalarType) -> Value {
    match scalar {
        ScalarType::Byte => Value::Int8(v as i8),
        ScalarType::UByte => Value::UInt8(v as u8),
        ScalarType::Short => Value::Int16(v as i16),
        ScalarType::UShort => Value::UInt16(v as u16),
        ScalarType::Int => Value::Int32(v as i32),
        ScalarType::UInt => Value::UInt32(v as u32),
        ScalarType::Long => Value::Int64(v as i64),
        ScalarType::ULong => Value::UInt64(v as u64),
        ScalarType::Bool => Value::Bool(v != 0),
        ScalarType::Float => Value::Float32(v as f32),
        ScalarType::Double => Value::Float64(v as f64),
    }
}

/// Fields of a table or struct, by name.
///
/// Objects produced by immutable greedy parsing are frozen: every setter fails
/// with `NotMutable`.
#[derive(Debug, Clone, Default)]
pub struct ObjectValue {
    fields: BTreeMap<String, Value>,
    frozen: bool,
}

impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl ObjectValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for constructing values.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        if self.frozen {
            return Err(Error::NotMutable(name));
        }
        self.fields.insert(name, value.into());
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Option<Value>> {
        if self.frozen {
            return Err(Error::NotMutable(name.to_string()));
        }
        Ok(self.fields.remove(name))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Freezes this object and everything nested in it.
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.fields.values_mut().for_each(Value::freeze);
    }

    pub(crate) fn insert_unchecked(&mut self, name: String, value: Value) {
        self.fields.insert(name, value);
    }
}

/// Field access shared by owned objects and lazily-parsed tables.
pub trait TableAccess {
    /// Reads a field by name; `None` for absent reference fields.
    fn field(&self, name: &str) -> Result<Option<Value>>;

    /// Writes a field, subject to the mutability rules of the object.
    fn set_field(&mut self, name: &str, value: Value) -> Result<()>;

    /// Copies the whole object out as an owned, mutable value.
    fn to_value(&self) -> Result<ObjectValue>;
}

impl TableAccess for ObjectValue {
    fn field(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.get(name).cloned())
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        self.set(name, value)
    }

    fn to_value(&self) -> Result<ObjectValue> {
        let mut copy = ObjectValue::new();
        for (name, value) in self.iter() {
            copy.insert_unchecked(name.to_string(), thaw(value.clone()));
        }
        Ok(copy)
    }
}

fn thaw(value: Value) -> Value {
    match value {
        Value::Table(obj) => Value::Table(obj.thawed()),
        Value::Struct(obj) => Value::Struct(obj.thawed()),
        Value::Vector(items) => Value::Vector(items.into_iter().map(thaw).collect()),
        Value::Indexed(indexed) => Value::Indexed(indexed.thawed()),
        Value::Union(union) => Value::Union(UnionValue {
            discriminator: union.discriminator,
            value: union.value.map(|value| Box::new(thaw(*value))),
        }),
        other => other,
    }
}

impl ObjectValue {
    pub(crate) fn thawed(self) -> ObjectValue {
        ObjectValue {
            fields: self.fields.into_iter().map(|(k, v)| (k, thaw(v))).collect(),
            frozen: false,
        }
    }
}
