// Lazy and progressive views
//
// Views read fields straight out of an input buffer on access instead of
// copying the object graph up front. The materialization strategy is a type
// parameter: `Lazy` re-reads the buffer on every access, `Progressive` caches
// each field and vector element the first time it is read. Fields flagged
// `write_through` can be assigned, which writes the new bytes into the buffer.
//
// Views borrow the buffer. Reads after the caller has overwritten the buffer
// bytes by other means return whatever the bytes now decode to, or an error.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;

use bytemuck::Pod;
use tracing::trace;

use crate::codec::input::InputBuffer;
use crate::codec::pod::{self, PodMappings};
use crate::codec::primitives::{check_range, ByteSource, SIZE_UOFFSET};
use crate::codec::reader::{read_discriminator, vector_bounds, Reader};
use crate::codec::sorted::{IndexedVector, SortKey};
use crate::codec::value::{ObjectValue, TableAccess, UnionValue, Value};
use crate::codec::writer::Writer;
use crate::internal::error::{Error, Result};
use crate::schema::types::{FieldDef, FieldFlags, FieldType, ObjectDef, ScalarType, TypeIndex, TypeRegistry, UnionDef};

/// How a view materializes the values it reads.
pub trait Materialization {
    /// Whether a field or element is kept after its first read.
    const CACHES: bool;
    const NAME: &'static str;
}

/// Re-reads the buffer on every access; never caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lazy;

/// Reads each field and element once and caches the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progressive;

impl Materialization for Lazy {
    const CACHES: bool = false;
    const NAME: &'static str = "lazy";
}

impl Materialization for Progressive {
    const CACHES: bool = true;
    const NAME: &'static str = "progressive";
}

/// What every view needs to reach the schema and the bytes.
#[derive(Debug, Clone, Copy)]
pub struct ViewContext<'a> {
    pub registry: &'a TypeRegistry,
    pub buffer: &'a InputBuffer<'a>,
    pub max_depth: usize,
    /// Rust types bound to value structs.
    pub pods: Option<&'a PodMappings>,
}

impl<'a> ViewContext<'a> {
    pub fn new(registry: &'a TypeRegistry, buffer: &'a InputBuffer<'a>, max_depth: usize) -> Self {
        Self {
            registry,
            buffer,
            max_depth,
            pods: None,
        }
    }

    pub fn with_pods(mut self, pods: &'a PodMappings) -> Self {
        self.pods = Some(pods);
        self
    }

    fn reader(&self) -> Reader<'a, InputBuffer<'a>> {
        Reader::new(self.registry, self.buffer, self.max_depth)
    }

    fn check_writable(&self, target: &str) -> Result<()> {
        if self.buffer.is_read_only() {
            return Err(Error::ReadOnlyBuffer(format!(
                "cannot write '{}' through a read-only input buffer",
                target
            )));
        }
        Ok(())
    }

    fn write_inline(&self, ty: &FieldType, value: &Value, offset: usize) -> Result<()> {
        let mut bytes = vec![0u8; self.registry.size_of(ty)];
        Writer::new(self.registry).encode_inline(ty, value, &mut bytes)?;
        self.buffer.write_bytes(offset, &bytes)
    }
}

/// A value read through a view.
#[derive(Debug)]
pub enum Node<'a, M: Materialization> {
    /// A scalar, enum, fixed-size array or value struct, read in one piece.
    Value(Value),
    String(Rc<str>),
    Table(Rc<TableView<'a, M>>),
    Struct(Rc<StructView<'a, M>>),
    Vector(Rc<VectorView<'a, M>>),
    /// `member` is `None` for `NONE` elements of a union vector.
    Union {
        discriminator: u16,
        member: Option<Box<Node<'a, M>>>,
    },
}

impl<M: Materialization> Clone for Node<'_, M> {
    fn clone(&self) -> Self {
        match self {
            Node::Value(value) => Node::Value(value.clone()),
            Node::String(s) => Node::String(Rc::clone(s)),
            Node::Table(table) => Node::Table(Rc::clone(table)),
            Node::Struct(view) => Node::Struct(Rc::clone(view)),
            Node::Vector(vector) => Node::Vector(Rc::clone(vector)),
            Node::Union { discriminator, member } => Node::Union {
                discriminator: *discriminator,
                member: member.clone(),
            },
        }
    }
}

impl<'a, M: Materialization> Node<'a, M> {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Rc<TableView<'a, M>>> {
        match self {
            Node::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Rc<StructView<'a, M>>> {
        match self {
            Node::Struct(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Rc<VectorView<'a, M>>> {
        match self {
            Node::Vector(vector) => Some(vector),
            _ => None,
        }
    }

    /// Whether both nodes are the same materialized instance.
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::String(a), Node::String(b)) => Rc::ptr_eq(a, b),
            (Node::Table(a), Node::Table(b)) => Rc::ptr_eq(a, b),
            (Node::Struct(a), Node::Struct(b)) => Rc::ptr_eq(a, b),
            (Node::Vector(a), Node::Vector(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Copies the node out as an owned value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self {
            Node::Value(value) => value.clone(),
            Node::String(s) => Value::String(s.to_string()),
            Node::Table(table) => Value::Table(table.to_value()?),
            Node::Struct(view) => Value::Struct(view.to_value()?),
            Node::Vector(vector) => vector.to_value()?,
            Node::Union { discriminator, member } => Value::Union(UnionValue {
                discriminator: *discriminator,
                value: member.as_ref().map(|node| node.to_value()).transpose()?.map(Box::new),
            }),
        })
    }
}

/// Per-field or per-element cache; empty when the strategy does not cache.
#[derive(Debug)]
struct Slots<'a, M: Materialization> {
    cells: RefCell<Vec<Option<Node<'a, M>>>>,
}

impl<'a, M: Materialization> Slots<'a, M> {
    fn new(count: usize) -> Self {
        let cells = if M::CACHES { vec![None; count] } else { Vec::new() };
        Self {
            cells: RefCell::new(cells),
        }
    }

    fn get(&self, index: usize) -> Option<Node<'a, M>> {
        self.cells.borrow().get(index).cloned().flatten()
    }

    fn store(&self, index: usize, node: &Node<'a, M>) {
        if let Some(slot) = self.cells.borrow_mut().get_mut(index) {
            *slot = Some(node.clone());
        }
    }

    fn invalidate(&self, index: usize) {
        if let Some(slot) = self.cells.borrow_mut().get_mut(index) {
            *slot = None;
        }
    }
}

fn reference_node<'a, M: Materialization>(
    ctx: ViewContext<'a>,
    ty: &'a FieldType,
    target: usize,
    flags: FieldFlags,
    depth: usize,
) -> Result<Node<'a, M>> {
    match ty {
        FieldType::String => Ok(Node::String(Rc::from(ctx.buffer.read_string(target)?.as_ref()))),
        FieldType::Table(ix) => Ok(Node::Table(Rc::new(TableView::new(ctx, *ix, target, depth + 1)?))),
        FieldType::Struct(ix) => struct_node(ctx, *ix, target, false),
        FieldType::Vector(elem) => Ok(Node::Vector(Rc::new(VectorView::new(ctx, elem, target, flags, depth)?))),
        other => Err(Error::TypeMismatch {
            expected: "reference type".to_string(),
            actual: ctx.registry.type_name(other),
        }),
    }
}

// Value structs materialize in one piece, through their Rust type when one is
// bound. Other structs get a field-level view.
fn struct_node<'a, M: Materialization>(
    ctx: ViewContext<'a>,
    ty: TypeIndex,
    offset: usize,
    writable: bool,
) -> Result<Node<'a, M>> {
    if ctx.registry.object(ty)?.value_struct {
        if let Some(decoded) = ctx.pods.and_then(|pods| pods.decode(ty, ctx.buffer, offset)) {
            return Ok(Node::Value(Value::Struct(decoded?)));
        }
        return Ok(Node::Value(Value::Struct(ctx.reader().read_struct(ty, offset)?)));
    }
    Ok(Node::Struct(Rc::new(StructView::new(ctx, ty, offset, writable)?)))
}

fn inline_node<'a, M: Materialization>(
    ctx: ViewContext<'a>,
    ty: &FieldType,
    offset: usize,
    writable: bool,
) -> Result<Node<'a, M>> {
    match ty {
        FieldType::Struct(ix) => struct_node(ctx, *ix, offset, writable),
        other => Ok(Node::Value(ctx.reader().read_inline(other, offset)?)),
    }
}

/// A table read in place.
#[derive(Debug)]
pub struct TableView<'a, M: Materialization> {
    ctx: ViewContext<'a>,
    ty: TypeIndex,
    def: &'a ObjectDef,
    offset: usize,
    depth: usize,
    fields: Slots<'a, M>,
}

impl<'a, M: Materialization> TableView<'a, M> {
    /// Opens the table of type `ty` at `offset`, `depth` levels below the root (root is 1).
    ///
    /// Fails when the depth exceeds the limit or a required field is absent.
    pub fn new(ctx: ViewContext<'a>, ty: TypeIndex, offset: usize, depth: usize) -> Result<Self> {
        trace!(depth, limit = ctx.max_depth, mode = M::NAME, "opening table view");
        if depth > ctx.max_depth {
            return Err(Error::DepthLimitExceeded { limit: ctx.max_depth });
        }
        let def = ctx.registry.object(ty)?;
        for field in def.fields.iter().filter(|field| field.is_required()) {
            if ctx.buffer.field_location(offset, field.index as usize)? == 0 {
                return Err(Error::RequiredField(def.field_path(&field.name)));
            }
        }
        Ok(Self {
            ctx,
            ty,
            def,
            offset,
            depth,
            fields: Slots::new(def.fields.len()),
        })
    }

    pub fn type_index(&self) -> TypeIndex {
        self.ty
    }

    pub fn type_name(&self) -> String {
        self.def.full_name()
    }

    /// Absolute offset of the table in the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Absolute offset of the vtable the table uses.
    pub fn vtable_offset(&self) -> Result<usize> {
        self.ctx.buffer.vtable_location(self.offset)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn lookup(&self, name: &str) -> Result<(usize, &'a FieldDef)> {
        self.def
            .field(name)
            .ok_or_else(|| Error::UnknownField(self.def.field_path(name)))
    }

    /// Reads a field. Absent scalars yield their default; absent references yield `None`.
    pub fn get(&self, name: &str) -> Result<Option<Node<'a, M>>> {
        let (index, field) = self.lookup(name)?;
        if field.is_deprecated() {
            return Ok(None);
        }
        if let Some(node) = self.fields.get(index) {
            return Ok(Some(node));
        }
        let node = self.read_field(field)?;
        if let Some(node) = &node {
            self.fields.store(index, node);
        }
        Ok(node)
    }

    /// Reads a field and copies it out.
    pub fn field_value(&self, name: &str) -> Result<Option<Value>> {
        self.get(name)?.map(|node| node.to_value()).transpose()
    }

    /// Reads a value struct field as the Rust type bound to it.
    ///
    /// Borrows straight from the buffer when it is pinned and read-only and the
    /// struct is aligned for `T`; copies otherwise. Absent fields yield `None`.
    pub fn get_pod<T: Pod>(&self, name: &str) -> Result<Option<Cow<'a, T>>> {
        let (_, field) = self.lookup(name)?;
        let ix = match field.ty {
            FieldType::Struct(ix) if self.ctx.registry.object(ix)?.value_struct => ix,
            _ => {
                return Err(Error::TypeMismatch {
                    expected: "value_struct".to_string(),
                    actual: self.ctx.registry.type_name(&field.ty),
                })
            }
        };
        if self.ctx.pods.and_then(|pods| pods.size_of(ix)) != Some(std::mem::size_of::<T>()) {
            return Err(Error::InvalidOperation(format!(
                "no Rust type of matching size is bound to {}",
                self.ctx.registry.object(ix)?.full_name()
            )));
        }
        let location = self.ctx.buffer.field_location(self.offset, field.index as usize)?;
        if location == 0 || field.is_deprecated() {
            return Ok(None);
        }
        pod::load::<T>(self.ctx.buffer, location).map(Some)
    }

    fn read_field(&self, field: &'a FieldDef) -> Result<Option<Node<'a, M>>> {
        let buffer = self.ctx.buffer;
        let location = buffer.field_location(self.offset, field.index as usize)?;

        if let Some(scalar) = self.ctx.registry.scalar_of(&field.ty) {
            let value = if location == 0 {
                Value::default_for(scalar, field.default.as_ref())
            } else {
                Value::read_scalar(buffer, location, scalar)?
            };
            return Ok(Some(Node::Value(value)));
        }
        if location == 0 {
            return Ok(None);
        }

        match &field.ty {
            FieldType::Struct(ix) => struct_node(self.ctx, *ix, location, field.is_write_through()).map(Some),
            FieldType::Union(ix) => {
                let udef = self.ctx.registry.union_def(*ix)?;
                let discriminator = read_discriminator(buffer, location, udef.discriminator_type)?;
                let member = match udef.member(discriminator) {
                    Some(member) => member,
                    None => return Ok(None),
                };
                let value_at = buffer.field_location(self.offset, field.index as usize + 1)?;
                if value_at == 0 {
                    return Ok(None);
                }
                let target = buffer.read_uoffset(value_at)?;
                let node = reference_node(self.ctx, &member.ty, target, FieldFlags::empty(), self.depth)?;
                Ok(Some(Node::Union {
                    discriminator,
                    member: Some(Box::new(node)),
                }))
            }
            FieldType::Vector(elem) if matches!(**elem, FieldType::Union(_)) => {
                let values_at = buffer.field_location(self.offset, field.index as usize + 1)?;
                match (&**elem, values_at) {
                    (FieldType::Union(ix), at) if at != 0 => {
                        let types = buffer.read_uoffset(location)?;
                        let values = buffer.read_uoffset(at)?;
                        let vector = VectorView::unions(self.ctx, *ix, types, values, self.depth)?;
                        Ok(Some(Node::Vector(Rc::new(vector))))
                    }
                    _ => Err(Error::CorruptBuffer(format!(
                        "union vector {} has discriminators but no values",
                        self.def.field_path(&field.name)
                    ))),
                }
            }
            ty => {
                let target = buffer.read_uoffset(location)?;
                reference_node(self.ctx, ty, target, field.flags, self.depth).map(Some)
            }
        }
    }

    /// Assigns a write-through scalar, enum or struct field in the buffer.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let (index, field) = self.lookup(name)?;
        let path = self.def.field_path(name);
        if !field.is_write_through() {
            return Err(Error::NotMutable(path));
        }
        self.ctx.check_writable(&path)?;
        let location = self.ctx.buffer.field_location(self.offset, field.index as usize)?;
        if location == 0 {
            return Err(Error::InvalidOperation(format!("field '{}' is not stored in the buffer", path)));
        }

        let value = value.into();
        match (self.ctx.registry.scalar_of(&field.ty), &field.ty) {
            (Some(scalar), _) => {
                let value = value.coerce(scalar)?;
                self.ctx.write_inline(&field.ty, &value, location)?;
                if M::CACHES {
                    self.fields.store(index, &Node::Value(value));
                }
            }
            (None, FieldType::Struct(_)) => {
                self.ctx.write_inline(&field.ty, &value, location)?;
                self.fields.invalidate(index);
            }
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "field '{}' is a vector; assign its elements through the vector view",
                    path
                )))
            }
        }
        trace!(field = %path, offset = location, "wrote through");
        Ok(())
    }

    /// Copies every field out as an owned, mutable object.
    pub fn to_value(&self) -> Result<ObjectValue> {
        let mut obj = ObjectValue::new();
        for field in self.def.fields.iter().filter(|field| !field.is_deprecated()) {
            if let Some(node) = self.get(&field.name)? {
                obj.insert_unchecked(field.name.clone(), node.to_value()?);
            }
        }
        Ok(obj)
    }
}

impl<M: Materialization> TableAccess for TableView<'_, M> {
    fn field(&self, name: &str) -> Result<Option<Value>> {
        self.field_value(name)
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        self.set(name, value)
    }

    fn to_value(&self) -> Result<ObjectValue> {
        TableView::to_value(self)
    }
}

/// A struct read in place. Writable when reached through a write-through field.
#[derive(Debug)]
pub struct StructView<'a, M: Materialization> {
    ctx: ViewContext<'a>,
    ty: TypeIndex,
    def: &'a ObjectDef,
    offset: usize,
    writable: bool,
    members: Slots<'a, M>,
}

impl<'a, M: Materialization> StructView<'a, M> {
    pub fn new(ctx: ViewContext<'a>, ty: TypeIndex, offset: usize, writable: bool) -> Result<Self> {
        let def = ctx.registry.object(ty)?;
        check_range(ctx.buffer.len(), offset, def.size)?;
        Ok(Self {
            ctx,
            ty,
            def,
            offset,
            writable,
            members: Slots::new(def.fields.len()),
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn lookup(&self, name: &str) -> Result<(usize, &'a FieldDef)> {
        self.def
            .field(name)
            .ok_or_else(|| Error::UnknownField(self.def.field_path(name)))
    }

    pub fn get(&self, name: &str) -> Result<Node<'a, M>> {
        let (index, field) = self.lookup(name)?;
        if let Some(node) = self.members.get(index) {
            return Ok(node);
        }
        let node = inline_node(self.ctx, &field.ty, self.offset + field.offset, self.writable)?;
        self.members.store(index, &node);
        Ok(node)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let (index, field) = self.lookup(name)?;
        let path = self.def.field_path(name);
        if !self.writable {
            return Err(Error::NotMutable(path));
        }
        self.ctx.check_writable(&path)?;
        self.ctx.write_inline(&field.ty, &value.into(), self.offset + field.offset)?;
        self.members.invalidate(index);
        Ok(())
    }

    pub fn to_value(&self) -> Result<ObjectValue> {
        self.ctx.reader().read_struct(self.ty, self.offset)
    }
}

#[derive(Debug, Clone, Copy)]
enum Elements<'a> {
    Inline { elem: &'a FieldType, stride: usize },
    Reference { elem: &'a FieldType },
    Union { def: &'a UnionDef, values: usize },
}

/// A vector read in place.
#[derive(Debug)]
pub struct VectorView<'a, M: Materialization> {
    ctx: ViewContext<'a>,
    elements: Elements<'a>,
    first: usize,
    len: usize,
    flags: FieldFlags,
    depth: usize,
    items: Slots<'a, M>,
}

impl<'a, M: Materialization> VectorView<'a, M> {
    /// Opens the vector whose length prefix is at `offset`.
    pub fn new(
        ctx: ViewContext<'a>,
        elem: &'a FieldType,
        offset: usize,
        flags: FieldFlags,
        depth: usize,
    ) -> Result<Self> {
        let (elements, stride) = if ctx.registry.is_inline(elem) {
            let stride = ctx.registry.size_of(elem);
            (Elements::Inline { elem, stride }, stride)
        } else {
            (Elements::Reference { elem }, SIZE_UOFFSET)
        };
        let (len, first) = vector_bounds(ctx.buffer, offset, stride)?;
        Ok(Self {
            ctx,
            elements,
            first,
            len,
            flags,
            depth,
            items: Slots::new(len),
        })
    }

    /// Opens a vector of unions from its discriminator and offset vectors.
    pub fn unions(
        ctx: ViewContext<'a>,
        union: TypeIndex,
        types_at: usize,
        values_at: usize,
        depth: usize,
    ) -> Result<Self> {
        let def = ctx.registry.union_def(union)?;
        let (len, first) = vector_bounds(ctx.buffer, types_at, def.discriminator_type.size())?;
        let (value_len, values) = vector_bounds(ctx.buffer, values_at, SIZE_UOFFSET)?;
        if len != value_len {
            return Err(Error::CorruptBuffer(format!(
                "union vector has {} discriminators but {} values",
                len, value_len
            )));
        }
        Ok(Self {
            ctx,
            elements: Elements::Union { def, values },
            first,
            len,
            flags: FieldFlags::empty(),
            depth,
            items: Slots::new(len),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::OutOfBounds {
                offset: index,
                len: 1,
                buffer_len: self.len,
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Node<'a, M>> {
        self.check_index(index)?;
        if let Some(node) = self.items.get(index) {
            return Ok(node);
        }
        let node = self.element(index)?;
        self.items.store(index, &node);
        Ok(node)
    }

    fn element(&self, index: usize) -> Result<Node<'a, M>> {
        let buffer = self.ctx.buffer;
        match self.elements {
            Elements::Inline { elem, stride } => inline_node(
                self.ctx,
                elem,
                self.first + index * stride,
                self.flags.contains(FieldFlags::WRITE_THROUGH),
            ),
            Elements::Reference { elem } => {
                let target = buffer.read_uoffset(self.first + index * SIZE_UOFFSET)?;
                reference_node(self.ctx, elem, target, FieldFlags::empty(), self.depth)
            }
            Elements::Union { def, values } => {
                let size = def.discriminator_type.size();
                let discriminator = read_discriminator(buffer, self.first + index * size, def.discriminator_type)?;
                match def.member(discriminator) {
                    Some(member) => {
                        let target = buffer.read_uoffset(values + index * SIZE_UOFFSET)?;
                        let node = reference_node(self.ctx, &member.ty, target, FieldFlags::empty(), self.depth)?;
                        Ok(Node::Union {
                            discriminator,
                            member: Some(Box::new(node)),
                        })
                    }
                    None => Ok(Node::Union {
                        discriminator: 0,
                        member: None,
                    }),
                }
            }
        }
    }

    /// Assigns an element of a write-through vector of scalars, enums or structs.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        if !self.flags.contains(FieldFlags::WRITE_THROUGH) {
            return Err(Error::NotMutable(format!("vector element {}", index)));
        }
        self.ctx.check_writable(&format!("vector element {}", index))?;
        self.check_index(index)?;
        match self.elements {
            Elements::Inline { elem, stride } => {
                self.ctx.write_inline(elem, &value.into(), self.first + index * stride)?;
            }
            _ => {
                return Err(Error::InvalidOperation(
                    "only inline vector elements can be written through".to_string(),
                ))
            }
        }
        self.items.invalidate(index);
        Ok(())
    }

    /// Copies every element out.
    pub fn to_values(&self) -> Result<Vec<Value>> {
        (0..self.len).map(|i| self.get(i)?.to_value()).collect()
    }

    /// Copies the vector out; indexed vectors become an [`IndexedVector`].
    pub fn to_value(&self) -> Result<Value> {
        let items = self.to_values()?;
        if let (true, Elements::Reference { elem: FieldType::Table(ix) }) =
            (self.flags.contains(FieldFlags::INDEXED_VECTOR), self.elements)
        {
            if let Some(key) = self.ctx.registry.object(*ix)?.key() {
                let key_type = self.ctx.registry.scalar_of(&key.ty);
                return Ok(Value::Indexed(IndexedVector::from_elements(key.name.clone(), key_type, items)?));
            }
        }
        Ok(Value::Vector(items))
    }

    /// Binary search of a sorted vector of tables by key.
    pub fn binary_search(&self, key: impl Into<Value>) -> Result<Option<Rc<TableView<'a, M>>>> {
        let ix = match self.elements {
            Elements::Reference {
                elem: FieldType::Table(ix),
            } => *ix,
            _ => {
                return Err(Error::InvalidOperation(
                    "binary search needs a vector of tables".to_string(),
                ))
            }
        };
        let def = self.ctx.registry.object(ix)?;
        let key_field = def
            .key()
            .ok_or_else(|| Error::InvalidOperation(format!("table {} has no key field", def.full_name())))?;
        let key_scalar = self.ctx.registry.scalar_of(&key_field.ty);
        let to_key = |value: &Value| -> Result<SortKey> {
            let value = match key_scalar {
                Some(scalar) => Cow::Owned(value.coerce(scalar)?),
                None => Cow::Borrowed(value),
            };
            SortKey::from_value(&value).ok_or_else(|| Error::TypeMismatch {
                expected: "sort key".to_string(),
                actual: value.type_name().to_string(),
            })
        };
        let target = to_key(&key.into())?;

        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let table = match self.get(mid)? {
                Node::Table(table) => table,
                _ => return Err(Error::CorruptBuffer("sorted vector element is not a table".to_string())),
            };
            let value = table
                .field_value(&key_field.name)?
                .ok_or_else(|| Error::RequiredField(def.field_path(&key_field.name)))?;
            match to_key(&value)?.cmp(&target) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Some(table)),
            }
        }
        Ok(None)
    }

    fn byte_elements(&self) -> Result<()> {
        match self.elements {
            Elements::Inline {
                elem: FieldType::Scalar(ScalarType::UByte | ScalarType::Byte),
                ..
            } => Ok(()),
            _ => Err(Error::TypeMismatch {
                expected: "vector of bytes".to_string(),
                actual: "vector".to_string(),
            }),
        }
    }

    /// The raw bytes of a byte vector.
    pub fn bytes(&self) -> Result<Cow<'a, [u8]>> {
        self.byte_elements()?;
        self.ctx.buffer.read_bytes(self.first, self.len)
    }

    /// A mutable projection of a byte vector onto the buffer memory.
    ///
    /// Progressive views do not see writes made through the returned cells for
    /// elements they have already cached.
    pub fn byte_vector_mut(&self) -> Result<&'a [Cell<u8>]> {
        self.byte_elements()?;
        if self.ctx.buffer.is_read_only() {
            return Err(Error::ReadOnlyBuffer(
                "a mutable byte vector needs a writable input buffer".to_string(),
            ));
        }
        self.ctx.buffer.mutable_bytes(self.first, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::context::SerializationContext;
    use crate::schema::ast::{FieldDecl, ObjectDecl, SchemaFile};
    use crate::schema::compiler::SchemaCompiler;
    use crate::schema::types::CompiledSchema;

    fn schema() -> CompiledSchema {
        let file = SchemaFile::new("stats.fbs")
            .object(
                ObjectDecl::structure("Vec2")
                    .field(FieldDecl::new("x", "float"))
                    .field(FieldDecl::new("y", "float")),
            )
            .object(
                ObjectDecl::table("Stats")
                    .field(FieldDecl::new("hp", "short").attr("required").attr("write_through"))
                    .field(FieldDecl::new("armor", "short").default_value("5"))
                    .field(FieldDecl::new("pos", "Vec2").attr("required").attr("write_through"))
                    .field(FieldDecl::new("tag", "string"))
                    .field(FieldDecl::new("inventory", "[ubyte]"))
                    .field(FieldDecl::new("path", "[Vec2]").attr("write_through")),
            )
            .root_type("Stats");
        SchemaCompiler::new().compile_file(&file).unwrap()
    }

    fn encode(schema: &CompiledSchema) -> Vec<u8> {
        let value = ObjectValue::new()
            .with("hp", 40i16)
            .with("pos", Value::Struct(ObjectValue::new().with("x", 1.0f32).with("y", 2.0f32)))
            .with("tag", "orc")
            .with("inventory", Value::Vector(vec![Value::UInt8(1), Value::UInt8(2), Value::UInt8(3)]))
            .with(
                "path",
                Value::Vector(vec![Value::Struct(ObjectValue::new().with("x", 0.5f32).with("y", 0.5f32))]),
            );
        let root = schema.root_type.unwrap();
        let writer = Writer::new(&schema.registry);
        let mut buffer = vec![0u8; writer.max_size(root, &value).unwrap()];
        let mut ctx = SerializationContext::new();
        ctx.reset(buffer.len());
        let written = writer.write_root(&mut ctx, &mut buffer, root, &value, None).unwrap();
        buffer.truncate(written);
        buffer
    }

    fn open<'a, M: Materialization>(schema: &'a CompiledSchema, buffer: &'a InputBuffer<'a>) -> TableView<'a, M> {
        let ctx = ViewContext::new(&schema.registry, buffer, 8);
        let root = buffer.read_uoffset(0).unwrap();
        TableView::new(ctx, schema.root_type.unwrap(), root, 1).unwrap()
    }

    #[test]
    fn test_defaults_and_values() {
        let schema = schema();
        let buffer = InputBuffer::from_vec(encode(&schema));
        let table: TableView<'_, Lazy> = open(&schema, &buffer);
        assert_eq!(table.field_value("hp").unwrap(), Some(Value::Int16(40)));
        assert_eq!(table.field_value("armor").unwrap(), Some(Value::Int16(5)));
        assert_eq!(table.get("tag").unwrap().unwrap().as_str(), Some("orc"));
        assert!(matches!(table.get("nope"), Err(Error::UnknownField(_))));
    }

    #[test]
    fn test_progressive_caches_and_lazy_does_not() {
        let schema = schema();
        let buffer = InputBuffer::from_vec(encode(&schema));

        let progressive: TableView<'_, Progressive> = open(&schema, &buffer);
        let a = progressive.get("pos").unwrap().unwrap();
        let b = progressive.get("pos").unwrap().unwrap();
        assert!(a.same_instance(&b));

        let lazy: TableView<'_, Lazy> = open(&schema, &buffer);
        let a = lazy.get("pos").unwrap().unwrap();
        let b = lazy.get("pos").unwrap().unwrap();
        assert!(!a.same_instance(&b));
    }

    #[test]
    fn test_write_through_updates_buffer() {
        let schema = schema();
        let buffer = InputBuffer::from_vec(encode(&schema));
        let table: TableView<'_, Progressive> = open(&schema, &buffer);

        table.set("hp", 99i16).unwrap();
        assert_eq!(table.field_value("hp").unwrap(), Some(Value::Int16(99)));
        let err = table.set("armor", 1i16).unwrap_err();
        assert!(err.is_not_mutable());

        let pos = table.get("pos").unwrap().unwrap();
        pos.as_struct().unwrap().set("y", 7.5f32).unwrap();
        assert_eq!(pos.as_struct().unwrap().get("y").unwrap().as_value(), Some(&Value::Float32(7.5)));

        let path = table.get("path").unwrap().unwrap();
        let path = path.as_vector().unwrap();
        path.set(0, Value::Struct(ObjectValue::new().with("x", 3.0f32))).unwrap();

        // A fresh lazy view over the same bytes sees every write.
        let lazy: TableView<'_, Lazy> = open(&schema, &buffer);
        assert_eq!(lazy.field_value("hp").unwrap(), Some(Value::Int16(99)));
        let pos = lazy.field_value("pos").unwrap().unwrap();
        assert_eq!(pos.as_object().unwrap().get("y"), Some(&Value::Float32(7.5)));
        let first = lazy.get("path").unwrap().unwrap().as_vector().unwrap().get(0).unwrap();
        assert_eq!(
            first.to_value().unwrap().as_object().unwrap().get("x"),
            Some(&Value::Float32(3.0))
        );
    }

    #[test]
    fn test_read_only_buffers_reject_writes() {
        let schema = schema();
        let bytes = encode(&schema);
        let buffer = InputBuffer::read_only(&bytes);
        let table: TableView<'_, Lazy> = open(&schema, &buffer);

        assert!(matches!(table.set("hp", 1i16), Err(Error::ReadOnlyBuffer(_))));
        let inventory = table.get("inventory").unwrap().unwrap();
        let inventory = inventory.as_vector().unwrap();
        assert_eq!(inventory.bytes().unwrap().as_ref(), &[1, 2, 3]);
        assert!(matches!(inventory.byte_vector_mut(), Err(Error::ReadOnlyBuffer(_))));
    }

    #[test]
    fn test_byte_vector_mut() {
        let schema = schema();
        let buffer = InputBuffer::from_vec(encode(&schema));
        let table: TableView<'_, Lazy> = open(&schema, &buffer);
        let inventory = table.get("inventory").unwrap().unwrap();
        let cells = inventory.as_vector().unwrap().byte_vector_mut().unwrap();
        cells[1].set(42);
        assert_eq!(
            table.field_value("inventory").unwrap(),
            Some(Value::Vector(vec![Value::UInt8(1), Value::UInt8(42), Value::UInt8(3)]))
        );
        assert!(inventory.as_vector().unwrap().get(3).is_err());
    }

    #[test]
    fn test_depth_checked_on_open() {
        let schema = schema();
        let buffer = InputBuffer::from_vec(encode(&schema));
        let ctx = ViewContext::new(&schema.registry, &buffer, 0);
        let root = buffer.read_uoffset(0).unwrap();
        let err = TableView::<Lazy>::new(ctx, schema.root_type.unwrap(), root, 1).unwrap_err();
        assert!(matches!(err, Error::DepthLimitExceeded { limit: 0 }));
    }
}
