// Object graph writer
//
// Writes an owned object graph into a pre-sized buffer in one forward pass.
// Each table is laid out as its soffset plus inline fields, followed by its
// (possibly shared) vtable, followed by every object it references. Reference
// slots are patched once the referenced object has been placed, so all uoffsets
// point forward.

use tracing::trace;

use crate::codec::context::SerializationContext;
use crate::codec::primitives::{align_up, write_scalar, SIZE_SOFFSET, SIZE_UOFFSET, SIZE_VOFFSET, VTABLE_HEADER_SIZE};
use crate::codec::sorted::SortKey;
use crate::codec::value::{ObjectValue, UnionValue, Value};
use crate::internal::error::{Error, Result};
use crate::schema::types::{FieldFlags, FieldType, TypeIndex, TypeRegistry};

// Slack added per allocation by the size estimate: worst-case alignment padding.
const PAD: usize = 8;

fn mismatch(expected: impl Into<String>, value: &Value) -> Error {
    Error::TypeMismatch {
        expected: expected.into(),
        actual: value.type_name().to_string(),
    }
}

fn as_object<'v>(value: &'v Value) -> Result<&'v ObjectValue> {
    match value {
        Value::Table(obj) => Ok(obj),
        other => Err(mismatch("table", other)),
    }
}

// Structs may be given as either object variant; `From<ObjectValue>` yields `Table`.
fn as_struct<'v>(value: &'v Value) -> Result<&'v ObjectValue> {
    match value {
        Value::Struct(obj) | Value::Table(obj) => Ok(obj),
        other => Err(mismatch("struct", other)),
    }
}

fn as_union<'v>(value: &'v Value) -> Result<&'v UnionValue> {
    match value {
        Value::Union(union) => Ok(union),
        other => Err(mismatch("union", other)),
    }
}

fn union_member(union: &UnionValue) -> Result<&Value> {
    union.member().ok_or_else(|| {
        Error::InvalidOperation(format!("union discriminator {} has no value", union.discriminator))
    })
}

fn as_items<'v>(value: &'v Value) -> Result<&'v [Value]> {
    value.as_vector().ok_or_else(|| mismatch("vector", value))
}

/// A reference slot of a table waiting for its target to be written.
enum Deferred<'s, 'v> {
    Reference {
        ty: &'s FieldType,
        value: &'v Value,
        flags: FieldFlags,
    },
    UnionTypes {
        union: TypeIndex,
        items: &'v [Value],
    },
    UnionValues {
        union: TypeIndex,
        items: &'v [Value],
    },
}

/// Writes object graphs described by a type registry.
pub struct Writer<'s> {
    registry: &'s TypeRegistry,
}

impl<'s> Writer<'s> {
    pub fn new(registry: &'s TypeRegistry) -> Self {
        Self { registry }
    }

    /// Writes a whole buffer: root uoffset, optional file identifier, then the
    /// root table and everything it references. Returns the bytes written.
    pub fn write_root(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        root: TypeIndex,
        value: &ObjectValue,
        file_identifier: Option<[u8; 4]>,
    ) -> Result<usize> {
        let root_slot = ctx.allocate_space(buffer, SIZE_UOFFSET, SIZE_UOFFSET)?;
        if let Some(identifier) = file_identifier {
            let at = ctx.allocate_space(buffer, identifier.len(), 1)?;
            buffer[at..at + identifier.len()].copy_from_slice(&identifier);
        }
        let table = self.write_table(ctx, buffer, root, value)?;
        ctx.patch_uoffset(buffer, root_slot, table)?;
        ctx.flush_shared_strings(buffer)?;
        Ok(ctx.offset())
    }

    /// Writes one table and its children; returns the table's offset.
    pub fn write_table(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        ty: TypeIndex,
        obj: &ObjectValue,
    ) -> Result<usize> {
        let def = self.registry.object(ty)?;
        if let Some((name, _)) = obj.iter().find(|(name, _)| def.field(name).is_none()) {
            return Err(Error::UnknownField(def.field_path(name)));
        }

        // (slot, alignment, bytes) for inline data, (slot, target) for references.
        let mut inline: Vec<(usize, usize, Vec<u8>)> = Vec::new();
        let mut deferred: Vec<(usize, Deferred<'s, '_>)> = Vec::new();

        for field in &def.fields {
            let slot = field.index as usize;
            let value = match obj.get(&field.name) {
                Some(_) if field.is_deprecated() => {
                    return Err(Error::InvalidOperation(format!(
                        "field '{}' is deprecated and cannot be written",
                        def.field_path(&field.name)
                    )))
                }
                Some(value) => value,
                None if field.is_required() => return Err(Error::RequiredField(def.field_path(&field.name))),
                None => continue,
            };

            if let Some(scalar) = self.registry.scalar_of(&field.ty) {
                let coerced = value.coerce(scalar)?;
                let forced = field.flags.intersects(FieldFlags::FORCE_WRITE | FieldFlags::REQUIRED);
                if !forced && coerced == Value::default_for(scalar, field.default.as_ref()) {
                    continue;
                }
                let mut bytes = vec![0u8; scalar.size()];
                coerced.write_scalar_le(&mut bytes)?;
                inline.push((slot, scalar.size(), bytes));
                continue;
            }

            match &field.ty {
                FieldType::Struct(ix) => {
                    let sdef = self.registry.object(*ix)?;
                    let mut bytes = vec![0u8; sdef.size];
                    self.encode_struct(*ix, value, &mut bytes)?;
                    inline.push((slot, sdef.align.max(1), bytes));
                }
                FieldType::Union(ix) => {
                    let union = as_union(value)?;
                    if union.discriminator == 0 {
                        continue;
                    }
                    let udef = self.registry.union_def(*ix)?;
                    let member = udef.member(union.discriminator).ok_or_else(|| Error::TypeMismatch {
                        expected: format!("member of union {}", udef.full_name()),
                        actual: format!("discriminator {}", union.discriminator),
                    })?;
                    let scalar = udef.discriminator_type;
                    let mut bytes = vec![0u8; scalar.size()];
                    Value::UInt16(union.discriminator).coerce(scalar)?.write_scalar_le(&mut bytes)?;
                    inline.push((slot, scalar.size(), bytes));
                    deferred.push((
                        slot + 1,
                        Deferred::Reference {
                            ty: &member.ty,
                            value: union_member(union)?,
                            flags: FieldFlags::empty(),
                        },
                    ));
                }
                FieldType::Vector(elem) if matches!(**elem, FieldType::Union(_)) => {
                    if let FieldType::Union(ix) = **elem {
                        let items = as_items(value)?;
                        deferred.push((slot, Deferred::UnionTypes { union: ix, items }));
                        deferred.push((slot + 1, Deferred::UnionValues { union: ix, items }));
                    }
                }
                ty => deferred.push((
                    slot,
                    Deferred::Reference {
                        ty,
                        value,
                        flags: field.flags,
                    },
                )),
            }
        }

        // Inline data goes largest alignment first, then the 4-byte reference slots.
        inline.sort_by(|a, b| b.1.cmp(&a.1));
        let table_align = inline.iter().map(|(_, align, _)| *align).max().unwrap_or(1).max(SIZE_SOFFSET);
        let mut slot_offsets: Vec<(usize, usize)> = Vec::with_capacity(inline.len() + deferred.len());
        let mut cursor = SIZE_SOFFSET;
        for (slot, align, bytes) in &inline {
            cursor = align_up(cursor, *align);
            slot_offsets.push((*slot, cursor));
            cursor += bytes.len();
        }
        let mut reference_offsets = Vec::with_capacity(deferred.len());
        for (slot, _) in &deferred {
            cursor = align_up(cursor, SIZE_UOFFSET);
            slot_offsets.push((*slot, cursor));
            reference_offsets.push(cursor);
            cursor += SIZE_UOFFSET;
        }
        let table_len = u16::try_from(cursor).map_err(|_| {
            Error::BufferTooLarge(format!("table {} needs {} inline bytes", def.full_name(), cursor))
        })?;

        let table = ctx.allocate_space(buffer, cursor, table_align)?;
        for ((_, _, bytes), (_, at)) in inline.iter().zip(&slot_offsets) {
            buffer[table + at..table + at + bytes.len()].copy_from_slice(bytes);
        }

        let vtable = self.finish_vtable(ctx, buffer, &slot_offsets, table_len)?;
        let soffset = i32::try_from(table as i64 - vtable as i64)
            .map_err(|_| Error::BufferTooLarge(format!("vtable of table at {} is out of range", table)))?;
        write_scalar(buffer, table, soffset)?;
        trace!(table = %def.full_name(), offset = table, vtable, "wrote table");

        for ((_, pending), at) in deferred.into_iter().zip(reference_offsets) {
            let slot = table + at;
            match pending {
                Deferred::Reference { ty, value, flags } => self.write_reference(ctx, buffer, slot, ty, value, flags)?,
                Deferred::UnionTypes { union, items } => {
                    let target = self.write_union_types(ctx, buffer, union, items)?;
                    ctx.patch_uoffset(buffer, slot, target)?;
                }
                Deferred::UnionValues { union, items } => {
                    let target = self.write_union_values(ctx, buffer, union, items)?;
                    ctx.patch_uoffset(buffer, slot, target)?;
                }
            }
        }
        Ok(table)
    }

    fn finish_vtable(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        slot_offsets: &[(usize, usize)],
        table_len: u16,
    ) -> Result<usize> {
        // Trailing absent slots are trimmed; readers treat them as defaults.
        let slots = slot_offsets.iter().map(|(slot, _)| slot + 1).max().unwrap_or(0);
        let vtable_len = VTABLE_HEADER_SIZE + SIZE_VOFFSET * slots;
        let mut candidate = vec![0u8; vtable_len];
        write_scalar(&mut candidate, 0, vtable_len as u16)?;
        write_scalar(&mut candidate, 2, table_len)?;
        for (slot, at) in slot_offsets {
            write_scalar(&mut candidate, VTABLE_HEADER_SIZE + SIZE_VOFFSET * slot, *at as u16)?;
        }
        ctx.finish_vtable(buffer, &candidate)
    }

    fn write_reference(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        slot: usize,
        ty: &FieldType,
        value: &Value,
        flags: FieldFlags,
    ) -> Result<()> {
        let target = match ty {
            FieldType::String => {
                let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
                if flags.contains(FieldFlags::SHARED_STRING) {
                    return ctx.write_shared_string(buffer, slot, s);
                }
                ctx.allocate_string(buffer, s)?
            }
            FieldType::Table(ix) => self.write_table(ctx, buffer, *ix, as_object(value)?)?,
            FieldType::Struct(ix) => {
                // Struct members of unions live out of line.
                let sdef = self.registry.object(*ix)?;
                let at = ctx.allocate_space(buffer, sdef.size, sdef.align.max(1))?;
                self.encode_struct(*ix, value, &mut buffer[at..at + sdef.size])?;
                at
            }
            FieldType::Vector(elem) => self.write_vector(ctx, buffer, elem, value, flags)?,
            other => {
                return Err(Error::TypeMismatch {
                    expected: "reference type".to_string(),
                    actual: self.registry.type_name(other),
                })
            }
        };
        ctx.patch_uoffset(buffer, slot, target)
    }

    /// Writes a vector and returns the offset of its length prefix.
    fn write_vector(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        elem: &FieldType,
        value: &Value,
        flags: FieldFlags,
    ) -> Result<usize> {
        if let Some(scalar) = self.registry.scalar_of(elem) {
            let items = as_items(value)?;
            let size = scalar.size();
            let first = ctx.allocate_vector(buffer, size, items.len(), size)?;
            for (i, item) in items.iter().enumerate() {
                let at = first + i * size;
                item.coerce(scalar)?.write_scalar_le(&mut buffer[at..at + size])?;
            }
            return Ok(first - SIZE_UOFFSET);
        }

        match elem {
            FieldType::Struct(ix) => {
                let items = as_items(value)?;
                let sdef = self.registry.object(*ix)?;
                let first = ctx.allocate_vector(buffer, sdef.align.max(1), items.len(), sdef.size)?;
                for (i, item) in items.iter().enumerate() {
                    let at = first + i * sdef.size;
                    self.encode_struct(*ix, item, &mut buffer[at..at + sdef.size])?;
                }
                Ok(first - SIZE_UOFFSET)
            }
            FieldType::String => {
                let items = as_items(value)?;
                let first = ctx.allocate_vector(buffer, SIZE_UOFFSET, items.len(), SIZE_UOFFSET)?;
                for (i, item) in items.iter().enumerate() {
                    self.write_reference(ctx, buffer, first + i * SIZE_UOFFSET, elem, item, flags)?;
                }
                Ok(first - SIZE_UOFFSET)
            }
            FieldType::Table(ix) => {
                let mut tables: Vec<&ObjectValue> = match value {
                    Value::Vector(items) => items.iter().map(as_object).collect::<Result<_>>()?,
                    Value::Indexed(indexed) => indexed.sorted().into_iter().map(|(_, obj)| obj).collect(),
                    other => return Err(mismatch("vector of tables", other)),
                };
                if flags.intersects(FieldFlags::SORTED_VECTOR | FieldFlags::INDEXED_VECTOR) {
                    tables = self.sort_by_key(*ix, tables)?;
                }
                let first = ctx.allocate_vector(buffer, SIZE_UOFFSET, tables.len(), SIZE_UOFFSET)?;
                for (i, table) in tables.into_iter().enumerate() {
                    let target = self.write_table(ctx, buffer, *ix, table)?;
                    ctx.patch_uoffset(buffer, first + i * SIZE_UOFFSET, target)?;
                }
                Ok(first - SIZE_UOFFSET)
            }
            other => Err(Error::TypeMismatch {
                expected: "vector element type".to_string(),
                actual: self.registry.type_name(other),
            }),
        }
    }

    /// Orders tables ascending by their key field; absent scalar keys sort as their default.
    fn sort_by_key<'v>(&self, ty: TypeIndex, tables: Vec<&'v ObjectValue>) -> Result<Vec<&'v ObjectValue>> {
        let def = self.registry.object(ty)?;
        let key = def.key().ok_or_else(|| {
            Error::InvalidOperation(format!("table {} has no key field to sort by", def.full_name()))
        })?;
        let scalar = self.registry.scalar_of(&key.ty);

        let mut keyed = Vec::with_capacity(tables.len());
        for table in tables {
            let sort_key = match (table.get(&key.name), scalar) {
                (Some(value), Some(scalar)) => SortKey::from_value(&value.coerce(scalar)?),
                (None, Some(scalar)) => SortKey::from_value(&Value::default_for(scalar, key.default.as_ref())),
                (Some(value), None) => SortKey::from_value(value),
                (None, None) => return Err(Error::RequiredField(def.field_path(&key.name))),
            };
            let sort_key = sort_key.ok_or_else(|| Error::TypeMismatch {
                expected: "sort key".to_string(),
                actual: self.registry.type_name(&key.ty),
            })?;
            keyed.push((sort_key, table));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, table)| table).collect())
    }

    fn write_union_types(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        union: TypeIndex,
        items: &[Value],
    ) -> Result<usize> {
        let scalar = self.registry.union_def(union)?.discriminator_type;
        let size = scalar.size();
        let first = ctx.allocate_vector(buffer, size, items.len(), size)?;
        for (i, item) in items.iter().enumerate() {
            let at = first + i * size;
            Value::UInt16(as_union(item)?.discriminator)
                .coerce(scalar)?
                .write_scalar_le(&mut buffer[at..at + size])?;
        }
        Ok(first - SIZE_UOFFSET)
    }

    fn write_union_values(
        &self,
        ctx: &mut SerializationContext,
        buffer: &mut [u8],
        union: TypeIndex,
        items: &[Value],
    ) -> Result<usize> {
        let udef = self.registry.union_def(union)?;
        let first = ctx.allocate_vector(buffer, SIZE_UOFFSET, items.len(), SIZE_UOFFSET)?;
        for (i, item) in items.iter().enumerate() {
            let union_value = as_union(item)?;
            // NONE elements keep a zero offset.
            if union_value.discriminator == 0 {
                continue;
            }
            let member = udef.member(union_value.discriminator).ok_or_else(|| Error::TypeMismatch {
                expected: format!("member of union {}", udef.full_name()),
                actual: format!("discriminator {}", union_value.discriminator),
            })?;
            self.write_reference(
                ctx,
                buffer,
                first + i * SIZE_UOFFSET,
                &member.ty,
                union_member(union_value)?,
                FieldFlags::empty(),
            )?;
        }
        Ok(first - SIZE_UOFFSET)
    }

    /// Encodes a struct into `dst`, which must be zeroed and exactly the struct's size.
    /// Members missing from the value stay zero.
    pub fn encode_struct(&self, ty: TypeIndex, value: &Value, dst: &mut [u8]) -> Result<()> {
        let def = self.registry.object(ty)?;
        let obj = as_struct(value)?;
        if let Some((name, _)) = obj.iter().find(|(name, _)| def.field(name).is_none()) {
            return Err(Error::UnknownField(def.field_path(name)));
        }
        for field in &def.fields {
            if let Some(member) = obj.get(&field.name) {
                let size = self.registry.size_of(&field.ty);
                self.encode_inline(&field.ty, member, &mut dst[field.offset..field.offset + size])?;
            }
        }
        Ok(())
    }

    /// Encodes an inline value (scalar, enum, struct or array) into `dst`.
    pub fn encode_inline(&self, ty: &FieldType, value: &Value, dst: &mut [u8]) -> Result<()> {
        if let Some(scalar) = self.registry.scalar_of(ty) {
            return value.coerce(scalar)?.write_scalar_le(dst);
        }
        match ty {
            FieldType::Struct(ix) => self.encode_struct(*ix, value, dst),
            FieldType::Array(elem, len) => {
                let items = as_items(value)?;
                if items.len() != *len as usize {
                    return Err(Error::TypeMismatch {
                        expected: format!("array of {} elements", len),
                        actual: format!("{} elements", items.len()),
                    });
                }
                let stride = self.registry.size_of(elem);
                for (i, item) in items.iter().enumerate() {
                    self.encode_inline(elem, item, &mut dst[i * stride..(i + 1) * stride])?;
                }
                Ok(())
            }
            other => Err(Error::TypeMismatch {
                expected: "inline type".to_string(),
                actual: self.registry.type_name(other),
            }),
        }
    }

    /// Conservative upper bound of the bytes `write_root` needs for `value`.
    pub fn max_size(&self, root: TypeIndex, value: &ObjectValue) -> Result<usize> {
        Ok(2 * SIZE_UOFFSET + self.table_bound(root, value)?)
    }

    fn table_bound(&self, ty: TypeIndex, obj: &ObjectValue) -> Result<usize> {
        let def = self.registry.object(ty)?;
        let mut total = PAD + SIZE_SOFFSET + PAD + VTABLE_HEADER_SIZE + SIZE_VOFFSET * def.slot_count();
        for field in &def.fields {
            if let Some(value) = obj.get(&field.name) {
                total += PAD + self.value_bound(&field.ty, value)?;
            }
        }
        Ok(total)
    }

    fn value_bound(&self, ty: &FieldType, value: &Value) -> Result<usize> {
        if self.registry.is_inline(ty) {
            return Ok(self.registry.size_of(ty));
        }
        let bound = match ty {
            FieldType::String => {
                let s = value.as_str().ok_or_else(|| mismatch("string", value))?;
                SIZE_UOFFSET + PAD + SIZE_UOFFSET + s.len() + 1
            }
            FieldType::Table(ix) => SIZE_UOFFSET + self.table_bound(*ix, as_object(value)?)?,
            FieldType::Union(ix) => {
                let union = as_union(value)?;
                let member = self.registry.union_def(*ix)?.member(union.discriminator);
                let member_bound = match (member, union.member()) {
                    (Some(member), Some(value)) => {
                        PAD + self.registry.size_of(&member.ty) + self.value_bound(&member.ty, value)?
                    }
                    _ => 0,
                };
                2 * SIZE_UOFFSET + member_bound
            }
            FieldType::Vector(elem) => {
                let mut total = SIZE_UOFFSET + PAD + SIZE_UOFFSET;
                match value {
                    Value::Indexed(indexed) => {
                        for obj in indexed.values() {
                            total += SIZE_UOFFSET + self.table_bound(self.element_table(elem)?, obj)?;
                        }
                    }
                    _ => {
                        let items = as_items(value)?;
                        if let FieldType::Union(_) = **elem {
                            // Discriminator vector plus offset vector.
                            total += SIZE_UOFFSET + PAD + SIZE_UOFFSET + 2 * items.len();
                        }
                        for item in items {
                            total += PAD + self.value_bound(elem, item)?;
                        }
                    }
                }
                total
            }
            other => {
                return Err(Error::TypeMismatch {
                    expected: "reference type".to_string(),
                    actual: self.registry.type_name(other),
                })
            }
        };
        Ok(bound)
    }

    fn element_table(&self, elem: &FieldType) -> Result<TypeIndex> {
        match elem {
            FieldType::Table(ix) => Ok(*ix),
            other => Err(Error::TypeMismatch {
                expected: "vector of tables".to_string(),
                actual: self.registry.type_name(other),
            }),
        }
    }
}
