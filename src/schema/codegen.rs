// Code generation surface
//
// Code generators receive the compiled, layout-annotated schema and render it.
// Two generators ship with the crate: a JSON layout document for external
// template engines and a plain-text slot/offset manifest.

use std::fmt::Write as _;

use serde::Serialize;

use crate::internal::error::{Error, Result};
use crate::schema::compiler::CompilerOptions;
use crate::schema::types::{
    CompiledSchema, DefaultValue, FieldFlags, FieldType, ScalarType, TypeDef, TypeIndex,
};

/// Renders a compiled schema into source text.
pub trait CodeGenerator {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Renders `schema`. Never called for a schema that failed to compile.
    fn generate(&self, schema: &CompiledSchema, options: &CompilerOptions) -> Result<String>;
}

/// How a generated accessor refers to a named type.
fn type_path(schema: &CompiledSchema, index: TypeIndex, options: &CompilerOptions) -> String {
    let full_name = schema
        .registry
        .get(index)
        .map(TypeDef::full_name)
        .unwrap_or_default();
    if let Some(host) = options.external_types.get(&full_name) {
        return host.clone();
    }
    if options.namespace_rooted_paths {
        format!(".{}", full_name)
    } else {
        full_name
    }
}

fn type_ref(schema: &CompiledSchema, ty: &FieldType, options: &CompilerOptions) -> String {
    match ty {
        FieldType::Scalar(scalar) => scalar.name().to_string(),
        FieldType::String => "string".to_string(),
        FieldType::Enum(ix) | FieldType::Union(ix) | FieldType::Table(ix) | FieldType::Struct(ix) => {
            type_path(schema, *ix, options)
        }
        FieldType::Vector(elem) => format!("[{}]", type_ref(schema, elem, options)),
        FieldType::Array(elem, len) => format!("[{}:{}]", type_ref(schema, elem, options), len),
    }
}

#[derive(Debug, Serialize)]
struct LayoutDocument {
    root_type: Option<String>,
    file_identifier: Option<String>,
    types: Vec<TypeLayout>,
    services: Vec<ServiceLayout>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum TypeLayout {
    Table {
        name: String,
        fields: Vec<FieldLayout>,
        key: Option<String>,
    },
    Struct {
        name: String,
        size: usize,
        align: usize,
        value_struct: bool,
        fields: Vec<FieldLayout>,
    },
    Enum {
        name: String,
        underlying: ScalarType,
        bit_flags: bool,
        values: Vec<(String, String)>,
    },
    Union {
        name: String,
        discriminator: ScalarType,
        members: Vec<UnionMemberLayout>,
    },
}

#[derive(Debug, Serialize)]
struct FieldLayout {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    slot: u16,
    offset: usize,
    size: usize,
    align: usize,
    inline: bool,
    default: Option<DefaultValue>,
    flags: FieldFlags,
    /// Types the accessor dispatches over, including every union member.
    children: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UnionMemberLayout {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    discriminator: u16,
}

#[derive(Debug, Serialize)]
struct ServiceLayout {
    name: String,
    methods: Vec<(String, String, String, Option<String>)>,
}

/// Dumps the compiled schema as a JSON layout document.
#[derive(Debug, Default)]
pub struct JsonLayoutGenerator {
    pub pretty: bool,
}

impl JsonLayoutGenerator {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    fn document(&self, schema: &CompiledSchema, options: &CompilerOptions) -> LayoutDocument {
        let registry = &schema.registry;
        let fields = |fields: &[crate::schema::types::FieldDef]| -> Vec<FieldLayout> {
            fields
                .iter()
                .map(|f| FieldLayout {
                    name: f.name.clone(),
                    ty: type_ref(schema, &f.ty, options),
                    slot: f.index,
                    offset: f.offset,
                    size: registry.size_of(&f.ty),
                    align: registry.align_of(&f.ty),
                    inline: registry.is_inline(&f.ty),
                    default: f.default,
                    flags: f.flags,
                    children: registry
                        .children(&f.ty)
                        .into_iter()
                        .map(|ix| type_path(schema, ix, options))
                        .collect(),
                })
                .collect()
        };

        let types = registry
            .iter()
            .map(|(ix, def)| match def {
                TypeDef::Object(obj) if obj.is_table => TypeLayout::Table {
                    name: type_path(schema, ix, options),
                    fields: fields(&obj.fields),
                    key: obj.key().map(|k| k.name.clone()),
                },
                TypeDef::Object(obj) => TypeLayout::Struct {
                    name: type_path(schema, ix, options),
                    size: obj.size,
                    align: obj.align,
                    value_struct: obj.value_struct,
                    fields: fields(&obj.fields),
                },
                TypeDef::Enum(def) => TypeLayout::Enum {
                    name: type_path(schema, ix, options),
                    underlying: def.underlying,
                    bit_flags: def.bit_flags,
                    // i128 has no JSON representation; values are rendered as decimal strings.
                    values: def.values.iter().map(|(n, v)| (n.clone(), v.to_string())).collect(),
                },
                TypeDef::Union(def) => TypeLayout::Union {
                    name: type_path(schema, ix, options),
                    discriminator: def.discriminator_type,
                    members: def
                        .members
                        .iter()
                        .map(|m| UnionMemberLayout {
                            name: m.name.clone(),
                            ty: type_ref(schema, &m.ty, options),
                            discriminator: m.discriminator,
                        })
                        .collect(),
                },
            })
            .collect();

        let services = schema
            .services
            .iter()
            .map(|service| ServiceLayout {
                name: service.full_name(),
                methods: service
                    .methods
                    .iter()
                    .map(|m| {
                        (
                            m.name.clone(),
                            type_path(schema, m.request, options),
                            type_path(schema, m.response, options),
                            m.streaming.clone(),
                        )
                    })
                    .collect(),
            })
            .collect();

        LayoutDocument {
            root_type: schema.root_type.map(|ix| type_path(schema, ix, options)),
            file_identifier: schema
                .file_identifier
                .map(|id| String::from_utf8_lossy(&id).into_owned()),
            types,
            services,
        }
    }
}

impl CodeGenerator for JsonLayoutGenerator {
    fn name(&self) -> &str {
        "json-layout"
    }

    fn generate(&self, schema: &CompiledSchema, options: &CompilerOptions) -> Result<String> {
        let document = self.document(schema, options);
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        };
        Ok(rendered)
    }
}

/// Human-readable manifest of table slots and struct offsets.
#[derive(Debug, Default)]
pub struct ManifestGenerator;

impl CodeGenerator for ManifestGenerator {
    fn name(&self) -> &str {
        "manifest"
    }

    fn generate(&self, schema: &CompiledSchema, options: &CompilerOptions) -> Result<String> {
        let mut out = String::new();
        let write_err = |e: std::fmt::Error| Error::CodegenError(e.to_string());

        if let Some(root) = schema.root_type {
            writeln!(out, "root_type {}", type_path(schema, root, options)).map_err(write_err)?;
        }
        if let Some(id) = schema.file_identifier {
            writeln!(out, "file_identifier \"{}\"", String::from_utf8_lossy(&id)).map_err(write_err)?;
        }

        for (ix, def) in schema.registry.iter() {
            let name = type_path(schema, ix, options);
            match def {
                TypeDef::Object(obj) if obj.is_table => {
                    writeln!(out, "\ntable {} ({} slots)", name, obj.slot_count()).map_err(write_err)?;
                    for field in &obj.fields {
                        let mut line = format!(
                            "  slot {:>3}  {}: {}",
                            field.index,
                            field.name,
                            type_ref(schema, &field.ty, options)
                        );
                        if let Some(default) = field.default {
                            line.push_str(&format!(" = {}", render_default(default)));
                        }
                        if !field.flags.is_empty() {
                            line.push_str(&format!(" {:?}", field.flags));
                        }
                        writeln!(out, "{}", line).map_err(write_err)?;
                    }
                }
                TypeDef::Object(obj) => {
                    writeln!(out, "\nstruct {} (size {}, align {})", name, obj.size, obj.align).map_err(write_err)?;
                    for field in &obj.fields {
                        writeln!(
                            out,
                            "  offset {:>3}  {}: {}",
                            field.offset,
                            field.name,
                            type_ref(schema, &field.ty, options)
                        )
                        .map_err(write_err)?;
                    }
                }
                TypeDef::Enum(def) => {
                    writeln!(out, "\nenum {} : {}", name, def.underlying.name()).map_err(write_err)?;
                    for (value_name, value) in &def.values {
                        writeln!(out, "  {} = {}", value_name, value).map_err(write_err)?;
                    }
                }
                TypeDef::Union(def) => {
                    writeln!(out, "\nunion {} : {}", name, def.discriminator_type.name()).map_err(write_err)?;
                    for member in &def.members {
                        writeln!(
                            out,
                            "  {} = {} ({})",
                            member.name,
                            member.discriminator,
                            type_ref(schema, &member.ty, options)
                        )
                        .map_err(write_err)?;
                    }
                }
            }
        }

        for service in &schema.services {
            writeln!(out, "\nrpc_service {}", service.full_name()).map_err(write_err)?;
            for method in &service.methods {
                writeln!(
                    out,
                    "  {}({}): {}",
                    method.name,
                    type_path(schema, method.request, options),
                    type_path(schema, method.response, options)
                )
                .map_err(write_err)?;
            }
        }
        Ok(out)
    }
}

fn render_default(default: DefaultValue) -> String {
    match default {
        DefaultValue::Bool(v) => v.to_string(),
        DefaultValue::Signed(v) => v.to_string(),
        DefaultValue::Unsigned(v) => v.to_string(),
        DefaultValue::Float(v) => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ast::{FieldDecl, ObjectDecl, SchemaFile, UnionDecl};
    use crate::schema::compiler::SchemaCompiler;

    fn schema() -> CompiledSchema {
        let file = SchemaFile::new("inv.fbs")
            .namespace("game")
            .object(
                ObjectDecl::structure("Vec2")
                    .field(FieldDecl::new("x", "float"))
                    .field(FieldDecl::new("y", "float")),
            )
            .object(ObjectDecl::table("Sword").field(FieldDecl::new("damage", "int").default_value("5")))
            .union(UnionDecl::new("Item").member("Sword").member("Vec2"))
            .object(
                ObjectDecl::table("Bag")
                    .field(FieldDecl::new("items", "[Item]"))
                    .field(FieldDecl::new("owner", "string").attr("required")),
            )
            .root_type("Bag")
            .file_identifier("BAG0");
        SchemaCompiler::new().compile_file(&file).unwrap()
    }

    #[test]
    fn test_json_layout() {
        let schema = schema();
        let options = CompilerOptions::default().with_external_type("game.Vec2", "glam::Vec2");
        let rendered = JsonLayoutGenerator::new().generate(&schema, &options).unwrap();
        let json: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(json["root_type"], "game.Bag");
        assert_eq!(json["file_identifier"], "BAG0");
        let bag = json["types"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "game.Bag")
            .unwrap();
        assert_eq!(bag["kind"], "table");
        assert_eq!(bag["fields"][0]["slot"], 0);
        assert_eq!(bag["fields"][1]["slot"], 2);
        let children: Vec<&str> = bag["fields"][0]["children"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c.as_str().unwrap())
            .collect();
        assert_eq!(children, vec!["game.Item", "game.Sword", "glam::Vec2"]);
    }

    #[test]
    fn test_manifest_with_rooted_paths() {
        let schema = schema();
        let options = CompilerOptions::default().with_rooted_paths(true);
        let manifest = ManifestGenerator.generate(&schema, &options).unwrap();
        assert!(manifest.contains("root_type .game.Bag"));
        assert!(manifest.contains("struct .game.Vec2 (size 8, align 4)"));
        assert!(manifest.contains("slot   0  damage: int = 5"));
        assert!(manifest.contains("  Vec2 = 2 (.game.Vec2)"));
    }

    #[test]
    fn test_generate_fails_atomically() {
        let file = SchemaFile::new("bad.fbs").object(ObjectDecl::table("T").field(FieldDecl::new("x", "Missing")));
        let sources = crate::schema::ast::SchemaSources::from(file);
        let result = SchemaCompiler::new().generate("bad.fbs", &sources, &ManifestGenerator);
        assert!(matches!(result, Err(Error::Schema(_))));
    }
}
