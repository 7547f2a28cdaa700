// Schema module for flatwire
//
// This module turns parsed schema files into the compiled type model that
// drives the runtime codec. It includes:
//
// 1. The parse-tree interface consumed by the compiler
// 2. The type registry with physical layout queries
// 3. Default value parsing
// 4. The two-pass compiler with batched, scoped error reporting
// 5. Code generators over the compiled schema

// Re-export public types and functions
pub use self::ast::{SchemaFile, SchemaSources};
pub use self::codegen::{CodeGenerator, JsonLayoutGenerator, ManifestGenerator};
pub use self::compiler::{CompilerOptions, SchemaCompiler};
pub use self::types::{
    CompiledSchema, DefaultValue, FieldDef, FieldFlags, FieldType, ObjectDef, ScalarType, TypeDef, TypeIndex,
    TypeRegistry,
};

// Sub-modules
pub mod ast;
pub mod codegen;
pub mod compiler;
pub mod defaults;
pub mod errors;
pub mod layout;
pub mod resolver;
pub mod types;
pub mod validator;
