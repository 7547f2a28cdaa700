// Value struct mappings
//
// A struct flagged `value_struct` can be bound to a Rust `Pod` type with the
// same layout. Bound structs are read with one bulk copy instead of field by
// field, and pinned read-only buffers lend them out without copying at all.

use std::borrow::Cow;
use std::collections::HashMap;
use std::mem;

use bytemuck::Pod;
use tracing::trace;

use crate::codec::input::InputBuffer;
use crate::codec::value::ObjectValue;
use crate::internal::error::{Error, Result};
use crate::schema::types::{TypeIndex, TypeRegistry};

/// A Rust type laid out exactly like a `value_struct` on the wire.
///
/// Implementors are `#[repr(C)]` with the schema's field order and no padding
/// beyond what the schema layout has.
pub trait PodStruct: Pod {
    /// The struct as the owned value every other parse path produces.
    fn to_object(&self) -> ObjectValue;
}

type DecodeFn = fn(&InputBuffer<'_>, usize) -> Result<ObjectValue>;

#[derive(Debug, Clone, Copy)]
struct PodMapping {
    size: usize,
    decode: DecodeFn,
}

/// Reads `T` at `offset`, borrowing when the buffer allows it.
pub fn load<'b, T: Pod>(buffer: &'b InputBuffer<'_>, offset: usize) -> Result<Cow<'b, T>> {
    if buffer.is_pinned() && buffer.is_read_only() {
        // Misaligned locations fall back to a copy.
        if let Ok(borrowed) = buffer.borrow_pod::<T>(offset) {
            trace!(offset, "borrowed value struct");
            return Ok(Cow::Borrowed(borrowed));
        }
    }
    buffer.read_pod::<T>(offset).map(Cow::Owned)
}

fn decode<T: PodStruct>(buffer: &InputBuffer<'_>, offset: usize) -> Result<ObjectValue> {
    Ok(load::<T>(buffer, offset)?.to_object())
}

/// Value structs bound to Rust types, by schema type.
#[derive(Debug, Clone, Default)]
pub struct PodMappings {
    by_type: HashMap<TypeIndex, PodMapping>,
}

impl PodMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the struct called `full_name` to `T`.
    ///
    /// The struct must be a `value_struct` whose inline size equals `size_of::<T>()`.
    pub fn register<T: PodStruct>(&mut self, registry: &TypeRegistry, full_name: &str) -> Result<TypeIndex> {
        let index = registry
            .lookup(full_name)
            .ok_or_else(|| Error::InvalidOperation(format!("schema has no type '{}'", full_name)))?;
        let def = registry.object(index)?;
        if def.is_table || !def.value_struct {
            return Err(Error::TypeMismatch {
                expected: "value_struct".to_string(),
                actual: full_name.to_string(),
            });
        }
        let size = mem::size_of::<T>();
        if size != def.size {
            return Err(Error::InvalidOperation(format!(
                "struct {} is {} bytes but the Rust type is {}",
                full_name, def.size, size
            )));
        }
        self.by_type.insert(index, PodMapping { size, decode: decode::<T> });
        Ok(index)
    }

    pub fn contains(&self, ty: TypeIndex) -> bool {
        self.by_type.contains_key(&ty)
    }

    /// Inline size of the Rust type bound to `ty`.
    pub fn size_of(&self, ty: TypeIndex) -> Option<usize> {
        self.by_type.get(&ty).map(|mapping| mapping.size)
    }

    /// Decodes the struct at `offset` when `ty` is bound; `None` otherwise.
    pub fn decode(&self, ty: TypeIndex, buffer: &InputBuffer<'_>, offset: usize) -> Option<Result<ObjectValue>> {
        self.by_type.get(&ty).map(|mapping| (mapping.decode)(buffer, offset))
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::Value;
    use crate::schema::ast::{FieldDecl, ObjectDecl, SchemaFile};
    use crate::schema::compiler::SchemaCompiler;
    use crate::schema::types::CompiledSchema;
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    struct Rgba {
        r: u8,
        g: u8,
        b: u8,
        a: u8,
    }

    impl PodStruct for Rgba {
        fn to_object(&self) -> ObjectValue {
            ObjectValue::new()
                .with("r", self.r)
                .with("g", self.g)
                .with("b", self.b)
                .with("a", self.a)
        }
    }

    #[repr(C)]
    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    struct Short {
        r: u8,
    }

    impl PodStruct for Short {
        fn to_object(&self) -> ObjectValue {
            ObjectValue::new().with("r", self.r)
        }
    }

    fn schema() -> CompiledSchema {
        let channels = |decl: ObjectDecl| {
            ["r", "g", "b", "a"]
                .iter()
                .fold(decl, |decl, name| decl.field(FieldDecl::new(*name, "ubyte")))
        };
        let file = SchemaFile::new("color.fbs")
            .namespace("paint")
            .object(channels(ObjectDecl::structure("Rgba").attr("value_struct")))
            .object(channels(ObjectDecl::structure("Plain")))
            .object(ObjectDecl::table("Swatch").field(FieldDecl::new("color", "Rgba")))
            .root_type("Swatch");
        SchemaCompiler::new().compile_file(&file).unwrap()
    }

    #[test]
    fn test_register_checks_kind_and_size() {
        let schema = schema();
        let mut pods = PodMappings::new();
        let ix = pods.register::<Rgba>(&schema.registry, "paint.Rgba").unwrap();
        assert!(pods.contains(ix));
        assert_eq!(pods.size_of(ix), Some(4));

        let err = pods.register::<Rgba>(&schema.registry, "paint.Plain").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let err = pods.register::<Rgba>(&schema.registry, "paint.Swatch").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let err = pods.register::<Short>(&schema.registry, "paint.Rgba").unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(pods.register::<Rgba>(&schema.registry, "paint.Missing").is_err());
        assert_eq!(pods.len(), 1);
    }

    #[test]
    fn test_load_borrows_only_pinned_read_only_memory() {
        let bytes = [0u8, 0, 0, 0, 10, 20, 30, 40];
        let read_only = InputBuffer::read_only(&bytes);
        // Alignment of `Rgba` is 1, so any offset can be borrowed.
        match load::<Rgba>(&read_only, 4).unwrap() {
            Cow::Borrowed(color) => assert_eq!(color.b, 30),
            Cow::Owned(_) => panic!("expected a borrowed struct"),
        }

        let owned = InputBuffer::from_vec(bytes.to_vec());
        match load::<Rgba>(&owned, 4).unwrap() {
            Cow::Owned(color) => assert_eq!(color, Rgba { r: 10, g: 20, b: 30, a: 40 }),
            Cow::Borrowed(_) => panic!("owned arrays are not pinned"),
        }
        assert!(load::<Rgba>(&owned, 6).is_err());
    }

    #[test]
    fn test_decode_only_bound_types() {
        let schema = schema();
        let mut pods = PodMappings::new();
        let rgba = pods.register::<Rgba>(&schema.registry, "paint.Rgba").unwrap();
        let plain = schema.registry.lookup("paint.Plain").unwrap();

        let buffer = InputBuffer::from_vec(vec![1, 2, 3, 4]);
        let obj = pods.decode(rgba, &buffer, 0).unwrap().unwrap();
        assert_eq!(obj.get("a"), Some(&Value::UInt8(4)));
        assert!(pods.decode(plain, &buffer, 0).is_none());
    }
}
