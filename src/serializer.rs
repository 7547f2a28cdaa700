// Serializer
//
// The runtime entry point: sizes, writes and parses buffers for one root table
// of a compiled schema. Settings are fixed per instance; `with_settings` hands
// out a new serializer and leaves the original as it was.

use std::sync::Arc;

use tracing::debug;

use crate::codec::context::SerializationContext;
use crate::codec::input::InputBuffer;
use crate::codec::pod::{PodMappings, PodStruct};
use crate::codec::primitives::ByteSource;
use crate::codec::reader::{check_file_identifier, Reader};
use crate::codec::value::{ObjectValue, TableAccess, Value};
use crate::codec::view::{Lazy, Materialization, Progressive, TableView, ViewContext};
use crate::codec::writer::Writer;
use crate::internal::error::{Error, Result};
use crate::internal::pool;
use crate::schema::types::{CompiledSchema, TypeIndex};

/// How `parse` materializes the root table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeserializationOption {
    /// Copies everything up front into an immutable object graph.
    Greedy,
    /// Copies everything up front into a mutable object graph.
    GreedyMutable,
    /// Reads fields on first access and caches them.
    #[default]
    Progressive,
    /// Reads fields from the buffer on every access.
    Lazy,
}

/// Configuration for a [`Serializer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializerSettings {
    /// Strategy used by [`Serializer::parse`].
    pub deserialization_option: DeserializationOption,
    /// Maximum table nesting depth accepted when parsing; the root is depth 1.
    pub max_depth: usize,
    /// Deduplicate `shared` strings within one write.
    pub enable_shared_strings: bool,
    /// Number of distinct shared strings remembered per write.
    pub shared_string_cache_size: usize,
    /// Reuse serialization contexts through the process-wide pool.
    pub use_object_pool: bool,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            deserialization_option: DeserializationOption::Progressive,
            max_depth: 1000,
            enable_shared_strings: true,
            shared_string_cache_size: 127,
            use_object_pool: true,
        }
    }
}

impl SerializerSettings {
    pub fn with_deserialization_option(mut self, option: DeserializationOption) -> Self {
        self.deserialization_option = option;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_shared_strings(mut self, enabled: bool) -> Self {
        self.enable_shared_strings = enabled;
        self
    }

    pub fn with_shared_string_cache_size(mut self, size: usize) -> Self {
        self.shared_string_cache_size = size;
        self
    }

    pub fn with_object_pool(mut self, enabled: bool) -> Self {
        self.use_object_pool = enabled;
        self
    }
}

/// A parsed root table.
#[derive(Debug)]
pub enum Parsed<'a> {
    Greedy(ObjectValue),
    Lazy(TableView<'a, Lazy>),
    Progressive(TableView<'a, Progressive>),
}

impl Parsed<'_> {
    pub fn option(&self) -> DeserializationOption {
        match self {
            Parsed::Greedy(obj) if obj.is_frozen() => DeserializationOption::Greedy,
            Parsed::Greedy(_) => DeserializationOption::GreedyMutable,
            Parsed::Lazy(_) => DeserializationOption::Lazy,
            Parsed::Progressive(_) => DeserializationOption::Progressive,
        }
    }
}

impl TableAccess for Parsed<'_> {
    fn field(&self, name: &str) -> Result<Option<Value>> {
        match self {
            Parsed::Greedy(obj) => obj.field(name),
            Parsed::Lazy(view) => view.field(name),
            Parsed::Progressive(view) => view.field(name),
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<()> {
        match self {
            Parsed::Greedy(obj) => obj.set_field(name, value),
            Parsed::Lazy(view) => view.set_field(name, value),
            Parsed::Progressive(view) => view.set_field(name, value),
        }
    }

    fn to_value(&self) -> Result<ObjectValue> {
        match self {
            Parsed::Greedy(obj) => TableAccess::to_value(obj),
            Parsed::Lazy(view) => view.to_value(),
            Parsed::Progressive(view) => view.to_value(),
        }
    }
}

/// Writes and parses buffers whose root is one table of a compiled schema.
#[derive(Debug, Clone)]
pub struct Serializer {
    schema: Arc<CompiledSchema>,
    root: TypeIndex,
    settings: SerializerSettings,
    pods: Arc<PodMappings>,
}

impl Serializer {
    /// Serializer for the schema's declared `root_type`.
    pub fn new(schema: Arc<CompiledSchema>) -> Result<Self> {
        let root = schema
            .root_type
            .ok_or_else(|| Error::InvalidOperation("schema declares no root_type".to_string()))?;
        Ok(Self {
            schema,
            root,
            settings: SerializerSettings::default(),
            pods: Arc::default(),
        })
    }

    /// Serializer for the table called `full_name`.
    pub fn for_type(schema: Arc<CompiledSchema>, full_name: &str) -> Result<Self> {
        let root = schema.table(full_name)?;
        Ok(Self {
            schema,
            root,
            settings: SerializerSettings::default(),
            pods: Arc::default(),
        })
    }

    /// A copy of this serializer using `settings`.
    pub fn with_settings(&self, settings: SerializerSettings) -> Serializer {
        Serializer {
            schema: Arc::clone(&self.schema),
            root: self.root,
            settings,
            pods: Arc::clone(&self.pods),
        }
    }

    /// Binds the `value_struct` called `full_name` to the Rust type `T`.
    ///
    /// Lazy and progressive views then read the struct with one bulk copy, or
    /// borrow it when the buffer is pinned and read-only.
    pub fn register_pod<T: PodStruct>(&mut self, full_name: &str) -> Result<()> {
        let ty = Arc::make_mut(&mut self.pods).register::<T>(&self.schema.registry, full_name)?;
        debug!(struct_name = full_name, type_index = ty, "bound value struct");
        Ok(())
    }

    pub fn pods(&self) -> &PodMappings {
        &self.pods
    }

    pub fn settings(&self) -> &SerializerSettings {
        &self.settings
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.schema
    }

    fn file_identifier(&self) -> Option<[u8; 4]> {
        self.schema.file_identifier
    }

    /// Upper bound of the bytes `write` needs for `value`.
    pub fn get_max_size(&self, value: &ObjectValue) -> Result<usize> {
        Writer::new(&self.schema.registry).max_size(self.root, value)
    }

    /// Writes `value` at the start of `buffer`; returns the bytes written.
    pub fn write(&self, buffer: &mut [u8], value: &ObjectValue) -> Result<usize> {
        let mut ctx = if self.settings.use_object_pool {
            pool::global().take::<SerializationContext>()
        } else {
            SerializationContext::new()
        };
        ctx.reset(buffer.len());
        if self.settings.enable_shared_strings {
            ctx.enable_shared_strings(self.settings.shared_string_cache_size);
        } else {
            ctx.disable_shared_strings();
        }

        let result = Writer::new(&self.schema.registry).write_root(
            &mut ctx,
            buffer,
            self.root,
            value,
            self.file_identifier(),
        );
        if let Ok(written) = result {
            let stats = ctx.stats();
            debug!(
                bytes = written,
                vtables_written = stats.vtables_written,
                vtables_reused = stats.vtables_reused,
                shared_strings = stats.shared_strings_written,
                "wrote buffer"
            );
        }

        if self.settings.use_object_pool {
            pool::global().give(ctx);
        }
        result
    }

    /// Writes `value` into a freshly sized vector trimmed to the bytes written.
    pub fn write_to_vec(&self, value: &ObjectValue) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; self.get_max_size(value)?];
        let written = self.write(&mut buffer, value)?;
        buffer.truncate(written);
        Ok(buffer)
    }

    /// Parses the root table with the configured deserialization option.
    pub fn parse<'a>(&'a self, buffer: &'a InputBuffer<'a>) -> Result<Parsed<'a>> {
        self.parse_with(buffer, self.settings.deserialization_option)
    }

    /// Parses the root table with an explicit deserialization option.
    pub fn parse_with<'a>(&'a self, buffer: &'a InputBuffer<'a>, option: DeserializationOption) -> Result<Parsed<'a>> {
        match option {
            DeserializationOption::Greedy => self.parse_greedy(buffer, false).map(Parsed::Greedy),
            DeserializationOption::GreedyMutable => self.parse_greedy(buffer, true).map(Parsed::Greedy),
            DeserializationOption::Lazy => self.parse_lazy(buffer).map(Parsed::Lazy),
            DeserializationOption::Progressive => self.parse_progressive(buffer).map(Parsed::Progressive),
        }
    }

    /// Copies the whole object graph out of `buffer`. Frozen unless `mutable`.
    pub fn parse_greedy(&self, buffer: &InputBuffer<'_>, mutable: bool) -> Result<ObjectValue> {
        let mut obj = Reader::new(&self.schema.registry, buffer, self.settings.max_depth)
            .read_root(self.root, self.file_identifier())?;
        if !mutable {
            obj.freeze();
        }
        Ok(obj)
    }

    pub fn parse_lazy<'a>(&'a self, buffer: &'a InputBuffer<'a>) -> Result<TableView<'a, Lazy>> {
        self.open_view(buffer)
    }

    pub fn parse_progressive<'a>(&'a self, buffer: &'a InputBuffer<'a>) -> Result<TableView<'a, Progressive>> {
        self.open_view(buffer)
    }

    fn open_view<'a, M: Materialization>(&'a self, buffer: &'a InputBuffer<'a>) -> Result<TableView<'a, M>> {
        if buffer.is_read_only() && self.schema.reaches_write_through(self.root) {
            return Err(Error::ReadOnlyBuffer(format!(
                "{} parsing of '{}' needs a writable buffer because it has write-through fields",
                M::NAME,
                self.schema.registry.object(self.root)?.full_name()
            )));
        }
        check_file_identifier(buffer, self.file_identifier())?;
        let root = buffer.read_uoffset(0)?;
        let ctx = ViewContext::new(&self.schema.registry, buffer, self.settings.max_depth).with_pods(&self.pods);
        TableView::new(ctx, self.root, root, 1)
    }

    /// Walks every reachable field of an untrusted buffer, keeping nothing.
    pub fn verify(&self, buffer: &[u8]) -> Result<()> {
        Reader::new(&self.schema.registry, buffer, self.settings.max_depth)
            .read_root(self.root, self.file_identifier())
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ast::{FieldDecl, ObjectDecl, SchemaFile};
    use crate::schema::compiler::SchemaCompiler;

    fn serializer() -> Serializer {
        let file = SchemaFile::new("monster.fbs")
            .namespace("game")
            .object(
                ObjectDecl::table("Monster")
                    .field(FieldDecl::new("name", "string"))
                    .field(FieldDecl::new("hp", "short").default_value("100"))
                    .field(FieldDecl::new("mana", "short").default_value("150")),
            )
            .root_type("Monster")
            .file_identifier("MONS");
        let schema = SchemaCompiler::new().compile_file(&file).unwrap();
        Serializer::new(Arc::new(schema)).unwrap()
    }

    fn link() -> ObjectValue {
        ObjectValue::new().with("name", "Link").with("hp", 932i16).with("mana", 150i16)
    }

    #[test]
    fn test_settings_builders() {
        let settings = SerializerSettings::default()
            .with_deserialization_option(DeserializationOption::Lazy)
            .with_max_depth(12)
            .with_shared_strings(false)
            .with_shared_string_cache_size(3)
            .with_object_pool(false);
        assert_eq!(settings.deserialization_option, DeserializationOption::Lazy);
        assert_eq!(settings.max_depth, 12);
        assert!(!settings.enable_shared_strings);
        assert_eq!(settings.shared_string_cache_size, 3);
        assert!(!settings.use_object_pool);
    }

    #[test]
    fn test_with_settings_leaves_original_untouched() {
        let original = serializer();
        let settings = SerializerSettings::default().with_deserialization_option(DeserializationOption::Lazy);
        let lazy = original.with_settings(settings);
        assert_eq!(original.settings().deserialization_option, DeserializationOption::Progressive);
        assert_eq!(lazy.settings().deserialization_option, DeserializationOption::Lazy);
    }

    #[test]
    fn test_write_and_parse_every_option() {
        let serializer = serializer();
        let bytes = serializer.write_to_vec(&link()).unwrap();
        assert_eq!(&bytes[4..8], b"MONS");
        serializer.verify(&bytes).unwrap();

        let buffer = InputBuffer::from_vec(bytes);
        for option in [
            DeserializationOption::Greedy,
            DeserializationOption::GreedyMutable,
            DeserializationOption::Progressive,
            DeserializationOption::Lazy,
        ] {
            let parsed = serializer.parse_with(&buffer, option).unwrap();
            assert_eq!(parsed.option(), option);
            assert_eq!(parsed.field("hp").unwrap(), Some(Value::Int16(932)));
            assert_eq!(parsed.field("mana").unwrap(), Some(Value::Int16(150)));
            assert_eq!(parsed.to_value().unwrap(), link());
        }
    }

    #[test]
    fn test_write_reports_small_buffers() {
        let serializer = serializer();
        let mut buffer = [0u8; 6];
        assert!(serializer.write(&mut buffer, &link()).is_err());
    }

    #[test]
    fn test_for_type_rejects_unknown_tables() {
        let schema = Arc::clone(&serializer().schema);
        assert!(Serializer::for_type(Arc::clone(&schema), "game.Monster").is_ok());
        assert!(Serializer::for_type(schema, "game.Missing").is_err());
    }
}
