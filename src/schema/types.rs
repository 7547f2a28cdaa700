// Schema type system for flatwire
//
// The compiled, immutable description of every enum, union, table and struct in
// a schema. Types reference each other by index into a `TypeRegistry`, which
// keeps self-referential tables (linked lists, trees) representable without
// owning cycles.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::internal::error::{Error, Result};

/// Index of a type in a [`TypeRegistry`].
pub type TypeIndex = usize;

/// Fixed-width scalar types of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    /// Parses a schema scalar keyword, including the sized aliases (`int32`, `float64`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let scalar = match name {
            "bool" => ScalarType::Bool,
            "byte" | "int8" => ScalarType::Byte,
            "ubyte" | "uint8" => ScalarType::UByte,
            "short" | "int16" => ScalarType::Short,
            "ushort" | "uint16" => ScalarType::UShort,
            "int" | "int32" => ScalarType::Int,
            "uint" | "uint32" => ScalarType::UInt,
            "long" | "int64" => ScalarType::Long,
            "ulong" | "uint64" => ScalarType::ULong,
            "float" | "float32" => ScalarType::Float,
            "double" | "float64" => ScalarType::Double,
            _ => return None,
        };
        Some(scalar)
    }

    /// Canonical schema keyword.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Byte => "byte",
            ScalarType::UByte => "ubyte",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Long => "long",
            ScalarType::ULong => "ulong",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        }
    }

    pub fn size(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Byte | ScalarType::UByte => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Long | ScalarType::ULong | ScalarType::Double => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ScalarType::Bool | ScalarType::Float | ScalarType::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarType::Byte | ScalarType::Short | ScalarType::Int | ScalarType::Long
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double)
    }

    /// Inclusive value range of an integer type.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        let range = match self {
            ScalarType::Byte => (i8::MIN as i128, i8::MAX as i128),
            ScalarType::UByte => (0, u8::MAX as i128),
            ScalarType::Short => (i16::MIN as i128, i16::MAX as i128),
            ScalarType::UShort => (0, u16::MAX as i128),
            ScalarType::Int => (i32::MIN as i128, i32::MAX as i128),
            ScalarType::UInt => (0, u32::MAX as i128),
            ScalarType::Long => (i64::MIN as i128, i64::MAX as i128),
            ScalarType::ULong => (0, u64::MAX as i128),
            ScalarType::Bool | ScalarType::Float | ScalarType::Double => return None,
        };
        Some(range)
    }
}

/// The declared type of a field, resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarType),
    String,
    Enum(TypeIndex),
    Union(TypeIndex),
    Table(TypeIndex),
    Struct(TypeIndex),
    Vector(Box<FieldType>),
    /// Fixed-length inline array; only valid inside structs.
    Array(Box<FieldType>, u16),
}

impl FieldType {
    pub fn is_vector(&self) -> bool {
        matches!(self, FieldType::Vector(_))
    }

    /// Element type of a vector or array.
    pub fn element(&self) -> Option<&FieldType> {
        match self {
            FieldType::Vector(elem) | FieldType::Array(elem, _) => Some(elem),
            _ => None,
        }
    }
}

bitflags! {
    /// Per-field attributes that change how a field is written or read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FieldFlags: u16 {
        const DEPRECATED = 1 << 0;
        const KEY = 1 << 1;
        const SORTED_VECTOR = 1 << 2;
        const INDEXED_VECTOR = 1 << 3;
        const WRITE_THROUGH = 1 << 4;
        const REQUIRED = 1 << 5;
        const SHARED_STRING = 1 << 6;
        const FORCE_WRITE = 1 << 7;
    }
}

/// A parsed default value literal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DefaultValue {
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

/// A field of a table or struct.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// First vtable slot. Unions also occupy `index + 1` for the value offset.
    pub index: u16,
    /// Byte offset inside the struct; 0 for table fields.
    pub offset: usize,
    pub default: Option<DefaultValue>,
    pub flags: FieldFlags,
    pub line: Option<u32>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType, index: u16) -> Self {
        Self {
            name: name.into(),
            ty,
            index,
            offset: 0,
            default: None,
            flags: FieldFlags::empty(),
            line: None,
        }
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags.contains(FieldFlags::DEPRECATED)
    }

    pub fn is_required(&self) -> bool {
        self.flags.contains(FieldFlags::REQUIRED)
    }

    pub fn is_write_through(&self) -> bool {
        self.flags.contains(FieldFlags::WRITE_THROUGH)
    }

    /// Number of vtable slots the field occupies.
    pub fn slot_count(&self) -> u16 {
        match self.ty {
            FieldType::Union(_) => 2,
            FieldType::Vector(ref elem) if matches!(**elem, FieldType::Union(_)) => 2,
            _ => 1,
        }
    }
}

/// A table or struct definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDef {
    pub name: String,
    pub namespace: String,
    pub is_table: bool,
    /// Struct maps to a plain-old-data value materialized in one piece.
    pub value_struct: bool,
    pub fields: Vec<FieldDef>,
    /// Inline size of a struct; 0 for tables.
    pub size: usize,
    /// Alignment of a struct; 0 for tables.
    pub align: usize,
    /// Position in `fields` of the sort key.
    pub key_field: Option<usize>,
    pub line: Option<u32>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, is_table: bool) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            is_table,
            value_struct: false,
            fields: Vec::new(),
            size: 0,
            align: 0,
            key_field: None,
            line: None,
        }
    }

    pub fn full_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    /// Finds a field by name.
    pub fn field(&self, name: &str) -> Option<(usize, &FieldDef)> {
        self.fields.iter().enumerate().find(|(_, field)| field.name == name)
    }

    pub fn key(&self) -> Option<&FieldDef> {
        self.key_field.and_then(|ix| self.fields.get(ix))
    }

    /// Number of vtable slots addressed by the table's fields.
    pub fn slot_count(&self) -> usize {
        self.fields
            .iter()
            .map(|field| (field.index + field.slot_count()) as usize)
            .max()
            .unwrap_or(0)
    }

    /// Fully-qualified name of one of the object's fields, as used in error messages.
    pub fn field_path(&self, field: &str) -> String {
        format!("{}.{}", self.full_name(), field)
    }
}

/// An enum definition.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub namespace: String,
    pub underlying: ScalarType,
    pub values: Vec<(String, i128)>,
    pub bit_flags: bool,
    pub line: Option<u32>,
}

impl EnumDef {
    pub fn full_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    pub fn value_of(&self, name: &str) -> Option<i128> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn name_of(&self, value: i128) -> Option<&str> {
        self.values.iter().find(|(_, v)| *v == value).map(|(n, _)| n.as_str())
    }
}

/// One member of a union. Discriminators start at 1; 0 is `NONE`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionMember {
    pub name: String,
    pub ty: FieldType,
    pub discriminator: u16,
}

/// A union definition.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionDef {
    pub name: String,
    pub namespace: String,
    /// Type of the discriminator: `ubyte`, or `ushort` when declared.
    pub discriminator_type: ScalarType,
    pub members: Vec<UnionMember>,
    pub line: Option<u32>,
}

impl UnionDef {
    pub fn full_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }

    pub fn member(&self, discriminator: u16) -> Option<&UnionMember> {
        self.members.iter().find(|m| m.discriminator == discriminator)
    }
}

/// Any named schema type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Object(ObjectDef),
    Enum(EnumDef),
    Union(UnionDef),
}

impl TypeDef {
    pub fn full_name(&self) -> String {
        match self {
            TypeDef::Object(def) => def.full_name(),
            TypeDef::Enum(def) => def.full_name(),
            TypeDef::Union(def) => def.full_name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TypeDef::Object(def) if def.is_table => "table",
            TypeDef::Object(_) => "struct",
            TypeDef::Enum(_) => "enum",
            TypeDef::Union(_) => "union",
        }
    }
}

/// All named types of a compiled schema, addressable by index or full name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeRegistry {
    types: Vec<TypeDef>,
    by_name: HashMap<String, TypeIndex>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a type and returns its index. A duplicate name keeps the first binding.
    pub fn push(&mut self, def: TypeDef) -> TypeIndex {
        let index = self.types.len();
        self.by_name.entry(def.full_name()).or_insert(index);
        self.types.push(def);
        index
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, index: TypeIndex) -> Option<&TypeDef> {
        self.types.get(index)
    }

    pub fn get_mut(&mut self, index: TypeIndex) -> Option<&mut TypeDef> {
        self.types.get_mut(index)
    }

    /// Looks up a fully-qualified name.
    pub fn lookup(&self, full_name: &str) -> Option<TypeIndex> {
        self.by_name.get(full_name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &TypeDef)> {
        self.types.iter().enumerate()
    }

    pub fn object(&self, index: TypeIndex) -> Result<&ObjectDef> {
        match self.types.get(index) {
            Some(TypeDef::Object(def)) => Ok(def),
            other => Err(mismatch("table or struct", other)),
        }
    }

    pub fn object_mut(&mut self, index: TypeIndex) -> Option<&mut ObjectDef> {
        match self.types.get_mut(index) {
            Some(TypeDef::Object(def)) => Some(def),
            _ => None,
        }
    }

    pub fn enum_def(&self, index: TypeIndex) -> Result<&EnumDef> {
        match self.types.get(index) {
            Some(TypeDef::Enum(def)) => Ok(def),
            other => Err(mismatch("enum", other)),
        }
    }

    pub fn union_def(&self, index: TypeIndex) -> Result<&UnionDef> {
        match self.types.get(index) {
            Some(TypeDef::Union(def)) => Ok(def),
            other => Err(mismatch("union", other)),
        }
    }
}

fn mismatch(expected: &str, actual: Option<&TypeDef>) -> Error {
    Error::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.map_or_else(|| "unknown type".to_string(), |def| def.kind().to_string()),
    }
}

/// Joins a namespace and a short name.
pub fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", namespace, name)
    }
}

/// One method of an RPC service.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMethod {
    pub name: String,
    pub request: TypeIndex,
    pub response: TypeIndex,
    /// `streaming` attribute value (`client`, `server`, `bidi`), if any.
    pub streaming: Option<String>,
}

/// An RPC service declaration carried through to code generators.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcServiceDef {
    pub name: String,
    pub namespace: String,
    pub methods: Vec<RpcMethod>,
}

impl RpcServiceDef {
    pub fn full_name(&self) -> String {
        qualify(&self.namespace, &self.name)
    }
}

/// The validated, layout-annotated output of the schema compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    pub registry: TypeRegistry,
    pub root_type: Option<TypeIndex>,
    pub file_identifier: Option<[u8; 4]>,
    pub services: Vec<RpcServiceDef>,
}

impl CompiledSchema {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            root_type: None,
            file_identifier: None,
            services: Vec::new(),
        }
    }

    /// Looks up a table by fully-qualified name.
    pub fn table(&self, full_name: &str) -> Result<TypeIndex> {
        let index = self
            .registry
            .lookup(full_name)
            .ok_or_else(|| Error::InvalidOperation(format!("schema has no type '{}'", full_name)))?;
        let def = self.registry.object(index)?;
        if !def.is_table {
            return Err(Error::TypeMismatch {
                expected: "table".to_string(),
                actual: format!("struct {}", full_name),
            });
        }
        Ok(index)
    }

    /// Whether any table reachable from `root` declares a write-through field.
    pub fn reaches_write_through(&self, root: TypeIndex) -> bool {
        let mut seen = vec![false; self.registry.len()];
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            if std::mem::replace(&mut seen[index], true) {
                continue;
            }
            let def = match self.registry.object(index) {
                Ok(def) => def,
                Err(_) => continue,
            };
            if def.fields.iter().any(FieldDef::is_write_through) {
                return true;
            }
            for field in &def.fields {
                stack.extend(self.registry.children(&field.ty));
            }
        }
        false
    }
}
