// flatwire library entry point
//
// A FlatBuffers wire-format engine: the runtime codec in `codec`, the type
// model and schema compiler front-end in `schema`, and the `Serializer` that
// ties a compiled schema to buffers.

pub mod codec;
pub mod internal;
pub mod schema;
pub mod serializer;

pub use codec::input::InputBuffer;
pub use codec::pod::{PodMappings, PodStruct};
pub use codec::sorted::{IndexedVector, SortKey};
pub use codec::value::{ObjectValue, TableAccess, UnionValue, Value};
pub use codec::view::{Lazy, Node, Progressive, StructView, TableView, VectorView};
pub use internal::error::{Error, Result, SchemaErrorRecord, SchemaErrors};
pub use schema::{CompiledSchema, SchemaCompiler, SchemaFile};
pub use serializer::{DeserializationOption, Parsed, Serializer, SerializerSettings};
