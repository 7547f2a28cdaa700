// Greedy reader
//
// Walks a buffer from the root table and copies every reachable field into an
// owned object graph. Absent scalars become their declared defaults, nesting
// depth is checked on entry to every table, and nothing from the buffer is
// retained afterwards.

use tracing::trace;

use crate::codec::primitives::{check_range, ByteSource, FILE_IDENTIFIER_LENGTH, SIZE_UOFFSET};
use crate::codec::sorted::IndexedVector;
use crate::codec::value::{ObjectValue, UnionValue, Value};
use crate::internal::error::{Error, Result};
use crate::schema::types::{FieldDef, FieldFlags, FieldType, ObjectDef, ScalarType, TypeIndex, TypeRegistry};

/// Verifies the file identifier stored after the root uoffset.
pub fn check_file_identifier<B: ByteSource + ?Sized>(source: &B, expected: Option<[u8; 4]>) -> Result<()> {
    let expected = match expected {
        Some(expected) => expected,
        None => return Ok(()),
    };
    let mut found = [0u8; FILE_IDENTIFIER_LENGTH];
    source
        .copy_bytes(SIZE_UOFFSET, &mut found)
        .map_err(|_| Error::CorruptBuffer("buffer is too short to hold a file identifier".to_string()))?;
    if found != expected {
        return Err(Error::CorruptBuffer(format!(
            "file identifier '{}' does not match expected '{}'",
            String::from_utf8_lossy(&found),
            String::from_utf8_lossy(&expected)
        )));
    }
    Ok(())
}

/// Reads the discriminator of a union stored at `offset` as a `u16`.
pub fn read_discriminator<B: ByteSource + ?Sized>(source: &B, offset: usize, scalar: ScalarType) -> Result<u16> {
    Value::read_scalar(source, offset, scalar)?
        .as_i128()
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| Error::CorruptBuffer(format!("invalid union discriminator at offset {}", offset)))
}

/// Length and first-element offset of the vector at `offset`, bounds-checked for `stride`.
pub fn vector_bounds<B: ByteSource + ?Sized>(source: &B, offset: usize, stride: usize) -> Result<(usize, usize)> {
    let len = source.read::<u32>(offset)? as usize;
    let first = offset + SIZE_UOFFSET;
    let body = len
        .checked_mul(stride)
        .ok_or_else(|| Error::CorruptBuffer(format!("vector length {} at offset {} overflows", len, offset)))?;
    check_range(source.byte_len(), first, body).map_err(|_| {
        Error::CorruptBuffer(format!("vector of {} elements at offset {} overruns the buffer", len, offset))
    })?;
    Ok((len, first))
}

/// Copies a buffer into owned values.
pub struct Reader<'s, B: ByteSource + ?Sized> {
    registry: &'s TypeRegistry,
    source: &'s B,
    max_depth: usize,
    depth: usize,
}

impl<'s, B: ByteSource + ?Sized> Reader<'s, B> {
    pub fn new(registry: &'s TypeRegistry, source: &'s B, max_depth: usize) -> Self {
        Self {
            registry,
            source,
            max_depth,
            depth: 0,
        }
    }

    /// Reads the root table of type `root`.
    pub fn read_root(&mut self, root: TypeIndex, file_identifier: Option<[u8; 4]>) -> Result<ObjectValue> {
        check_file_identifier(self.source, file_identifier)?;
        let table = self.source.read_uoffset(0)?;
        self.read_table(root, table)
    }

    fn inc_depth(&mut self) -> Result<()> {
        self.depth += 1;
        trace!(depth = self.depth, limit = self.max_depth, "entering table");
        if self.depth > self.max_depth {
            return Err(Error::DepthLimitExceeded { limit: self.max_depth });
        }
        Ok(())
    }

    fn dec_depth(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Reads the table of type `ty` at `offset`.
    pub fn read_table(&mut self, ty: TypeIndex, offset: usize) -> Result<ObjectValue> {
        self.inc_depth()?;
        let result = self.read_table_fields(ty, offset);
        self.dec_depth();
        result
    }

    fn read_table_fields(&mut self, ty: TypeIndex, offset: usize) -> Result<ObjectValue> {
        let def = self.registry.object(ty)?;
        let mut obj = ObjectValue::new();
        for field in def.fields.iter().filter(|field| !field.is_deprecated()) {
            if let Some(value) = self.read_field(def, field, offset)? {
                obj.insert_unchecked(field.name.clone(), value);
            }
        }
        Ok(obj)
    }

    fn read_field(&mut self, def: &ObjectDef, field: &FieldDef, table: usize) -> Result<Option<Value>> {
        let location = self.source.field_location(table, field.index as usize)?;
        let required = || Error::RequiredField(def.field_path(&field.name));

        if let Some(scalar) = self.registry.scalar_of(&field.ty) {
            if location == 0 {
                if field.is_required() {
                    return Err(required());
                }
                return Ok(Some(Value::default_for(scalar, field.default.as_ref())));
            }
            return Value::read_scalar(self.source, location, scalar).map(Some);
        }

        match &field.ty {
            FieldType::Union(ix) => {
                let union = self.read_union_field(*ix, field, table, location)?;
                if union.is_none() {
                    return if field.is_required() { Err(required()) } else { Ok(None) };
                }
                Ok(Some(Value::Union(union)))
            }
            FieldType::Vector(elem) if matches!(**elem, FieldType::Union(_)) => {
                if location == 0 {
                    return if field.is_required() { Err(required()) } else { Ok(None) };
                }
                let values_at = self.source.field_location(table, field.index as usize + 1)?;
                match (&**elem, values_at) {
                    (FieldType::Union(ix), at) if at != 0 => {
                        let types = self.source.read_uoffset(location)?;
                        let values = self.source.read_uoffset(at)?;
                        self.read_union_vector(*ix, types, values).map(Some)
                    }
                    _ => Err(Error::CorruptBuffer(format!(
                        "union vector {} has discriminators but no values",
                        def.field_path(&field.name)
                    ))),
                }
            }
            _ if location == 0 => {
                if field.is_required() {
                    Err(required())
                } else {
                    Ok(None)
                }
            }
            FieldType::Struct(ix) => Ok(Some(Value::Struct(self.read_struct(*ix, location)?))),
            ty => {
                let target = self.source.read_uoffset(location)?;
                self.read_referenced(ty, target, field.flags).map(Some)
            }
        }
    }

    fn read_union_field(
        &mut self,
        union: TypeIndex,
        field: &FieldDef,
        table: usize,
        location: usize,
    ) -> Result<UnionValue> {
        if location == 0 {
            return Ok(UnionValue::none());
        }
        let udef = self.registry.union_def(union)?;
        let discriminator = read_discriminator(self.source, location, udef.discriminator_type)?;
        let member = match udef.member(discriminator) {
            Some(member) => member,
            // Members added by a newer schema read as NONE.
            None => return Ok(UnionValue::none()),
        };
        let value_at = self.source.field_location(table, field.index as usize + 1)?;
        if value_at == 0 {
            return Ok(UnionValue::none());
        }
        let target = self.source.read_uoffset(value_at)?;
        let value = self.read_referenced(&member.ty, target, FieldFlags::empty())?;
        Ok(UnionValue::new(discriminator, value))
    }

    fn read_referenced(&mut self, ty: &FieldType, target: usize, flags: FieldFlags) -> Result<Value> {
        match ty {
            FieldType::String => Ok(Value::String(self.source.read_utf8(target)?)),
            FieldType::Table(ix) => Ok(Value::Table(self.read_table(*ix, target)?)),
            FieldType::Struct(ix) => Ok(Value::Struct(self.read_struct(*ix, target)?)),
            FieldType::Vector(elem) => self.read_vector(elem, target, flags),
            other => Err(Error::TypeMismatch {
                expected: "reference type".to_string(),
                actual: self.registry.type_name(other),
            }),
        }
    }

    fn read_vector(&mut self, elem: &FieldType, at: usize, flags: FieldFlags) -> Result<Value> {
        if self.registry.is_inline(elem) {
            let stride = self.registry.size_of(elem);
            let (len, first) = vector_bounds(self.source, at, stride)?;
            let items = (0..len)
                .map(|i| self.read_inline(elem, first + i * stride))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Value::Vector(items));
        }

        let (len, first) = vector_bounds(self.source, at, SIZE_UOFFSET)?;
        let mut items = Vec::with_capacity(len);
        for i in 0..len {
            let target = self.source.read_uoffset(first + i * SIZE_UOFFSET)?;
            items.push(self.read_referenced(elem, target, FieldFlags::empty())?);
        }

        match elem {
            FieldType::Table(ix) if flags.contains(FieldFlags::INDEXED_VECTOR) => {
                let def = self.registry.object(*ix)?;
                let key = def.key().ok_or_else(|| {
                    Error::InvalidOperation(format!("table {} has no key field", def.full_name()))
                })?;
                let key_type = self.registry.scalar_of(&key.ty);
                Ok(Value::Indexed(IndexedVector::from_elements(key.name.clone(), key_type, items)?))
            }
            _ => Ok(Value::Vector(items)),
        }
    }

    fn read_union_vector(&mut self, union: TypeIndex, types_at: usize, values_at: usize) -> Result<Value> {
        let udef = self.registry.union_def(union)?;
        let size = udef.discriminator_type.size();
        let (len, types) = vector_bounds(self.source, types_at, size)?;
        let (value_len, values) = vector_bounds(self.source, values_at, SIZE_UOFFSET)?;
        if len != value_len {
            return Err(Error::CorruptBuffer(format!(
                "union vector has {} discriminators but {} values",
                len, value_len
            )));
        }

        let mut items = Vec::with_capacity(len);
        for i in 0..len {
            let discriminator = read_discriminator(self.source, types + i * size, udef.discriminator_type)?;
            let item = match udef.member(discriminator) {
                Some(member) => {
                    let target = self.source.read_uoffset(values + i * SIZE_UOFFSET)?;
                    UnionValue::new(discriminator, self.read_referenced(&member.ty, target, FieldFlags::empty())?)
                }
                None => UnionValue::none(),
            };
            items.push(Value::Union(item));
        }
        Ok(Value::Vector(items))
    }

    /// Reads the struct of type `ty` stored inline at `offset`.
    pub fn read_struct(&mut self, ty: TypeIndex, offset: usize) -> Result<ObjectValue> {
        let def = self.registry.object(ty)?;
        check_range(self.source.byte_len(), offset, def.size)?;
        let mut obj = ObjectValue::new();
        for field in &def.fields {
            let value = self.read_inline(&field.ty, offset + field.offset)?;
            obj.insert_unchecked(field.name.clone(), value);
        }
        Ok(obj)
    }

    /// Reads a scalar, struct or fixed-size array stored inline at `offset`.
    pub fn read_inline(&mut self, ty: &FieldType, offset: usize) -> Result<Value> {
        if let Some(scalar) = self.registry.scalar_of(ty) {
            return Value::read_scalar(self.source, offset, scalar);
        }
        match ty {
            FieldType::Struct(ix) => Ok(Value::Struct(self.read_struct(*ix, offset)?)),
            FieldType::Array(elem, len) => {
                let stride = self.registry.size_of(elem);
                let items = (0..*len as usize)
                    .map(|i| self.read_inline(elem, offset + i * stride))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Vector(items))
            }
            other => Err(Error::TypeMismatch {
                expected: "inline type".to_string(),
                actual: self.registry.type_name(other),
            }),
        }
    }
}
