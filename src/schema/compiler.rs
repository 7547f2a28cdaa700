// Schema compiler front-end
//
// Turns parsed schema files into a validated, layout-annotated `CompiledSchema`.
// Pass one registers every type across the include graph; pass two resolves
// references, lays out structs, assigns table slots and validates. Errors from
// both passes are accumulated and reported together, and nothing is returned
// unless the whole compile succeeded.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::codec::primitives::align_up;
use crate::internal::error::Result;
use crate::schema::ast::{Declaration, FieldDecl, ObjectDecl, SchemaFile, SchemaSources};
use crate::schema::codegen::CodeGenerator;
use crate::schema::defaults::{parse_default, parse_integer};
use crate::schema::errors::CompileContext;
use crate::schema::resolver::{self, DeclRef, Declared};
use crate::schema::types::{
    CompiledSchema, DefaultValue, EnumDef, FieldDef, FieldFlags, FieldType, RpcMethod, RpcServiceDef, ScalarType,
    TypeDef, TypeIndex, TypeRegistry, UnionMember,
};
use crate::schema::validator::{
    attribute_value, check_attributes, field_flags, has_attribute, validate_table, validate_table_field,
    AttributeSite,
};

/// Options controlling compilation and code generation.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Rewrite field names to snake_case.
    pub normalize_field_names: bool,

    /// Emit type references as absolute paths from the root namespace.
    pub namespace_rooted_paths: bool,

    /// Host type names to use for schema types (fully-qualified name -> host name).
    pub external_types: HashMap<String, String>,
}

impl CompilerOptions {
    pub fn with_normalized_field_names(mut self, enabled: bool) -> Self {
        self.normalize_field_names = enabled;
        self
    }

    pub fn with_rooted_paths(mut self, enabled: bool) -> Self {
        self.namespace_rooted_paths = enabled;
        self
    }

    pub fn with_external_type(mut self, schema_name: impl Into<String>, host_name: impl Into<String>) -> Self {
        self.external_types.insert(schema_name.into(), host_name.into());
        self
    }
}

/// Compiles parsed schema files.
#[derive(Debug, Default)]
pub struct SchemaCompiler {
    options: CompilerOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayoutState {
    Pending,
    InProgress,
    Done,
}

impl SchemaCompiler {
    /// Creates a compiler with default options
    pub fn new() -> Self {
        Self {
            options: CompilerOptions::default(),
        }
    }

    /// Creates a compiler with custom options
    pub fn with_options(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compiles a single file with no includes.
    pub fn compile_file(&self, file: &SchemaFile) -> Result<CompiledSchema> {
        let sources = SchemaSources::from(file.clone());
        self.compile(&file.path, &sources)
    }

    /// Compiles `entry` and everything it includes.
    pub fn compile(&self, entry: &str, sources: &SchemaSources) -> Result<CompiledSchema> {
        let mut ctx = CompileContext::new();
        let files = resolver::collect_files(entry, sources, &mut ctx);
        let declared_attributes: HashSet<String> = files
            .iter()
            .flat_map(|file| file.declarations.iter())
            .filter_map(|decl| match decl {
                Declaration::Attribute(name) => Some(name.clone()),
                _ => None,
            })
            .collect();

        let (registry, declared) = resolver::register_types(&files, &mut ctx);
        let mut pass = Pass {
            registry,
            options: &self.options,
            attributes: declared_attributes,
            ids: HashMap::new(),
        };

        for item in &declared {
            if let DeclRef::Enum(_) = item.decl {
                pass.build_enum(&mut ctx, item);
            }
        }
        for item in &declared {
            if let DeclRef::Union(_) = item.decl {
                pass.build_union(&mut ctx, item);
            }
        }
        for item in &declared {
            if let DeclRef::Object(decl) = item.decl {
                pass.build_fields(&mut ctx, item, decl);
            }
        }
        pass.layout_structs(&mut ctx, &declared);
        for item in &declared {
            if let DeclRef::Object(decl) = item.decl {
                if decl.is_table {
                    pass.assign_slots(&mut ctx, item, decl);
                }
            }
        }
        pass.validate_tables(&mut ctx, &declared);

        // The entry file is collected last; only its root_type and file_identifier count.
        let mut schema = CompiledSchema::new(TypeRegistry::new());
        if let Some(file) = files.last() {
            pass.file_settings(&mut ctx, file, &mut schema);
        }
        schema.services = files
            .iter()
            .flat_map(|file| pass.services(&mut ctx, file))
            .collect();
        schema.registry = pass.registry;

        debug!(
            entry,
            files = files.len(),
            types = schema.registry.len(),
            services = schema.services.len(),
            errors = ctx.error_count(),
            "schema compile finished"
        );
        ctx.finish(schema)
    }

    /// Compiles and renders through `generator`; fails without output if any
    /// compile error was recorded.
    pub fn generate(&self, entry: &str, sources: &SchemaSources, generator: &dyn CodeGenerator) -> Result<String> {
        let schema = self.compile(entry, sources)?;
        generator.generate(&schema, &self.options)
    }
}

/// State shared by the steps of pass two.
struct Pass<'o> {
    registry: TypeRegistry,
    options: &'o CompilerOptions,
    attributes: HashSet<String>,
    /// Declared `id` attribute per field, in declaration order, for each table.
    ids: HashMap<TypeIndex, Vec<Option<String>>>,
}

impl Pass<'_> {
    fn build_enum(&mut self, ctx: &mut CompileContext, item: &Declared<'_>) {
        let decl = match item.decl {
            DeclRef::Enum(decl) => decl,
            _ => return,
        };
        let mut file_scope = ctx.scope(item.file);
        let mut ctx = file_scope.scope_at(decl.name.as_str(), decl.line);
        check_attributes(&mut ctx, &decl.attributes, AttributeSite::Enum, &self.attributes);

        let bit_flags = has_attribute(&decl.attributes, "bit_flags");
        let underlying = match ScalarType::from_name(&decl.underlying) {
            Some(scalar) if scalar.is_integer() => scalar,
            _ => {
                ctx.error(format!("enum underlying type must be an integer type, not '{}'", decl.underlying));
                return;
            }
        };
        if bit_flags && underlying.is_signed() {
            ctx.error("bit_flags enums must have an unsigned underlying type");
        }
        if decl.values.is_empty() {
            ctx.error("enum must declare at least one value");
        }
        let (min, max) = underlying.integer_range().unwrap_or((0, 0));
        let bits = underlying.size() as i128 * 8;

        let mut values: Vec<(String, i128)> = Vec::new();
        let mut previous: Option<i128> = None;
        for value in &decl.values {
            let mut ctx = ctx.scope_at(value.name.as_str(), value.line);
            if values.iter().any(|(name, _)| *name == value.name) {
                ctx.error(format!("duplicate enum value '{}'", value.name));
                continue;
            }
            let position = match &value.value {
                Some(literal) => match parse_integer(literal) {
                    Some(v) => v,
                    None => {
                        ctx.error(format!("enum value '{}' is not an integer", literal));
                        continue;
                    }
                },
                None => previous.map_or(0, |p| p + 1),
            };
            if let Some(prev) = previous {
                if position <= prev {
                    ctx.error(format!(
                        "enum values must be strictly increasing; {} follows {}",
                        position, prev
                    ));
                }
            }
            previous = Some(position);

            let stored = if bit_flags {
                if position < 0 || position >= bits {
                    ctx.error(format!("bit position {} does not fit in {}", position, underlying.name()));
                    continue;
                }
                1i128 << position
            } else {
                position
            };
            if stored < min || stored > max {
                ctx.error(format!("value {} is out of range for {}", stored, underlying.name()));
                continue;
            }
            values.push((value.name.clone(), stored));
        }

        if let Some(TypeDef::Enum(def)) = self.registry.get_mut(item.index) {
            def.underlying = underlying;
            def.values = values;
            def.bit_flags = bit_flags;
        }
    }

    fn build_union(&mut self, ctx: &mut CompileContext, item: &Declared<'_>) {
        let decl = match item.decl {
            DeclRef::Union(decl) => decl,
            _ => return,
        };
        let mut file_scope = ctx.scope(item.file);
        let mut ctx = file_scope.scope_at(decl.name.as_str(), decl.line);
        check_attributes(&mut ctx, &decl.attributes, AttributeSite::Union, &self.attributes);

        let discriminator_type = match decl.underlying.as_deref() {
            None => ScalarType::UByte,
            Some(name) => match ScalarType::from_name(name) {
                Some(scalar @ (ScalarType::UByte | ScalarType::UShort)) => scalar,
                _ => {
                    ctx.error(format!("union discriminator type must be ubyte or ushort, not '{}'", name));
                    ScalarType::UByte
                }
            },
        };
        let limit = discriminator_type.integer_range().map_or(0, |(_, max)| max) as usize;
        if decl.members.is_empty() {
            ctx.error("union must declare at least one member");
        }
        if decl.members.len() > limit {
            ctx.error(format!(
                "union has {} members but its {} discriminator allows {}",
                decl.members.len(),
                discriminator_type.name(),
                limit
            ));
        }

        let mut members: Vec<UnionMember> = Vec::new();
        for (position, member) in decl.members.iter().enumerate() {
            let ty = match resolver::resolve_type(&self.registry, &member.ty.as_str().into(), &item.namespace) {
                Ok(ty) => ty,
                Err(message) => {
                    ctx.error(message);
                    continue;
                }
            };
            if !self.registry.valid_union_member(&ty) {
                ctx.error(format!(
                    "union member '{}' must be a table, struct or string",
                    self.registry.type_name(&ty)
                ));
                continue;
            }
            let name = member.alias.clone().unwrap_or_else(|| {
                member.ty.rsplit('.').next().unwrap_or(member.ty.as_str()).to_string()
            });
            if members.iter().any(|m| m.name == name) {
                ctx.error(format!("duplicate union member '{}'", name));
                continue;
            }
            members.push(UnionMember {
                name,
                ty,
                discriminator: (position + 1) as u16,
            });
        }

        if let Some(TypeDef::Union(def)) = self.registry.get_mut(item.index) {
            def.discriminator_type = discriminator_type;
            def.members = members;
        }
    }

    fn build_fields(&mut self, ctx: &mut CompileContext, item: &Declared<'_>, decl: &ObjectDecl) {
        let mut file_scope = ctx.scope(item.file);
        let mut ctx = file_scope.scope_at(decl.name.as_str(), decl.line);
        let site = if decl.is_table { AttributeSite::Table } else { AttributeSite::Struct };
        check_attributes(&mut ctx, &decl.attributes, site, &self.attributes);

        let mut fields = Vec::new();
        let mut ids = Vec::new();
        let mut names = HashSet::new();
        for field_decl in &decl.fields {
            let name = if self.options.normalize_field_names {
                to_snake_case(&field_decl.name)
            } else {
                field_decl.name.clone()
            };
            let mut ctx = ctx.scope_at(name.as_str(), field_decl.line);
            if !names.insert(name.clone()) {
                ctx.error(format!("duplicate field name '{}'", name));
                continue;
            }
            if let Some(field) = self.build_field(&mut ctx, item, decl.is_table, name, field_decl) {
                if decl.is_table {
                    ids.push(attribute_value(&field_decl.attributes, "id").map(str::to_string));
                }
                fields.push(field);
            }
        }

        if !decl.is_table && decl.fields.is_empty() {
            ctx.error("struct must have at least one field");
        }
        if decl.is_table {
            self.ids.insert(item.index, ids);
        }
        if let Some(def) = self.registry.object_mut(item.index) {
            def.value_struct = has_attribute(&decl.attributes, "value_struct");
            def.fields = fields;
        }
    }

    fn build_field(
        &self,
        ctx: &mut CompileContext,
        item: &Declared<'_>,
        is_table: bool,
        name: String,
        decl: &FieldDecl,
    ) -> Option<FieldDef> {
        let site = if is_table { AttributeSite::TableField } else { AttributeSite::StructField };
        check_attributes(ctx, &decl.attributes, site, &self.attributes);

        let ty = match resolver::resolve_type(&self.registry, &decl.ty, &item.namespace) {
            Ok(ty) => ty,
            Err(message) => {
                ctx.error(message);
                return None;
            }
        };
        if is_table && !self.registry.valid_table_member(&ty) {
            let message = match &ty {
                FieldType::Array(..) => "fixed-length arrays are only valid inside structs".to_string(),
                FieldType::Vector(elem) if elem.is_vector() => "nested vectors are not supported".to_string(),
                _ => format!("'{}' is not valid as a table field", self.registry.type_name(&ty)),
            };
            ctx.error(message);
            return None;
        }
        if !is_table && !self.registry.valid_struct_member(&ty) {
            ctx.error(format!(
                "struct fields must be scalars, enums, structs or fixed-length arrays, not '{}'",
                self.registry.type_name(&ty)
            ));
            return None;
        }

        let mut field = FieldDef::new(name, ty, 0);
        field.line = decl.line;
        field.flags = if is_table { field_flags(&decl.attributes) } else { FieldFlags::empty() };
        field.default = match (&decl.default, is_table) {
            (Some(_), false) => {
                ctx.error("struct fields cannot declare default values");
                None
            }
            (None, false) => None,
            (Some(literal), true) => match parse_default(literal, &field.ty, &self.registry) {
                Ok(value) => Some(value),
                Err(message) => {
                    ctx.error(message);
                    None
                }
            },
            (None, true) => self.implicit_default(ctx, &field.ty),
        };
        Some(field)
    }

    /// Zero default for scalars; enums must have a zero value unless they are bit flags.
    fn implicit_default(&self, ctx: &mut CompileContext, ty: &FieldType) -> Option<DefaultValue> {
        match ty {
            FieldType::Scalar(scalar) => Some(DefaultValue::zero(*scalar)),
            FieldType::Enum(ix) => {
                let def: &EnumDef = self.registry.enum_def(*ix).ok()?;
                if !def.bit_flags && !def.values.is_empty() && def.name_of(0).is_none() {
                    ctx.error(format!(
                        "enum '{}' has no value 0; the field needs an explicit default",
                        def.full_name()
                    ));
                }
                Some(DefaultValue::zero(def.underlying))
            }
            _ => None,
        }
    }

    fn layout_structs(&mut self, ctx: &mut CompileContext, declared: &[Declared<'_>]) {
        let mut states = vec![LayoutState::Pending; self.registry.len()];
        for item in declared {
            if let DeclRef::Object(decl) = item.decl {
                if !decl.is_table {
                    self.layout_struct(ctx, item.index, &mut states);
                }
            }
        }
    }

    fn layout_struct(
        &mut self,
        ctx: &mut CompileContext,
        index: TypeIndex,
        states: &mut Vec<LayoutState>,
    ) {
        match states[index] {
            LayoutState::Done => return,
            LayoutState::InProgress => {
                let name = self.registry.get(index).map(TypeDef::full_name).unwrap_or_default();
                let mut scope = ctx.scope(name.clone());
                scope.error(format!("struct '{}' contains itself", name));
                return;
            }
            LayoutState::Pending => states[index] = LayoutState::InProgress,
        }

        let nested: Vec<TypeIndex> = match self.registry.object(index) {
            Ok(def) => def
                .fields
                .iter()
                .filter_map(|f| match &f.ty {
                    FieldType::Struct(ix) => Some(*ix),
                    FieldType::Array(elem, _) => match **elem {
                        FieldType::Struct(ix) => Some(ix),
                        _ => None,
                    },
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        for child in nested {
            self.layout_struct(ctx, child, states);
        }

        let mut placed = Vec::new();
        let mut cursor = 0usize;
        let mut align = 1usize;
        if let Ok(def) = self.registry.object(index) {
            for field in &def.fields {
                let field_align = self.registry.align_of(&field.ty);
                let offset = align_up(cursor, field_align);
                cursor = offset + self.registry.size_of(&field.ty);
                align = align.max(field_align);
                placed.push(offset);
            }
        }
        let size = align_up(cursor, align);
        if let Some(def) = self.registry.object_mut(index) {
            for (position, (field, offset)) in def.fields.iter_mut().zip(placed).enumerate() {
                field.offset = offset;
                field.index = position as u16;
            }
            def.size = size;
            def.align = align;
        }
        states[index] = LayoutState::Done;
    }

    fn assign_slots(&mut self, ctx: &mut CompileContext, item: &Declared<'_>, decl: &ObjectDecl) {
        let ids = self.ids.remove(&item.index).unwrap_or_default();
        let mut file_scope = ctx.scope(item.file);
        let mut ctx = file_scope.scope_at(decl.name.as_str(), decl.line);
        let def = match self.registry.object_mut(item.index) {
            Some(def) => def,
            None => return,
        };

        let explicit = ids.iter().filter(|id| id.is_some()).count();
        if explicit == 0 {
            let mut next = 0u32;
            for field in def.fields.iter_mut() {
                field.index = next as u16;
                next += field.slot_count() as u32;
            }
            if next > u16::MAX as u32 {
                ctx.error("table has too many fields");
            }
            return;
        }
        if explicit != def.fields.len() {
            ctx.error("either all fields or none must declare an 'id' attribute");
            return;
        }

        let mut used: HashMap<u32, String> = HashMap::new();
        for (field, id) in def.fields.iter_mut().zip(ids) {
            let mut ctx = ctx.scope(field.name.as_str());
            let id = match id.as_deref().and_then(|v| v.trim().parse::<u32>().ok()) {
                Some(id) if id <= u16::MAX as u32 => id,
                _ => {
                    ctx.error(format!("field id '{}' is not a valid index", id.unwrap_or_default()));
                    continue;
                }
            };
            // The id of a union names its value slot; the discriminator takes id - 1.
            let first = if field.slot_count() == 2 {
                match id.checked_sub(1) {
                    Some(first) => first,
                    None => {
                        ctx.error("union field id must be at least 1; its discriminator uses id - 1");
                        continue;
                    }
                }
            } else {
                id
            };
            for slot in first..first + field.slot_count() as u32 {
                if let Some(other) = used.insert(slot, field.name.clone()) {
                    ctx.error(format!("duplicate field index {} (also used by '{}')", slot, other));
                }
            }
            field.index = first as u16;
        }
        let total = used.len() as u32;
        if let Some(gap) = (0..total).find(|slot| !used.contains_key(slot)) {
            ctx.error(format!("field ids must be contiguous from 0; index {} is unused", gap));
        }
    }

    fn validate_tables(&mut self, ctx: &mut CompileContext, declared: &[Declared<'_>]) {
        let tables: Vec<&Declared<'_>> = declared
            .iter()
            .filter(|d| matches!(d.decl, DeclRef::Object(decl) if decl.is_table))
            .collect();

        for item in &tables {
            let mut file_scope = ctx.scope(item.file);
            let mut ctx = file_scope.scope_at(item.name(), item.line());
            if let Some(def) = self.registry.object_mut(item.index) {
                validate_table(&mut ctx, def);
            }
        }
        for item in &tables {
            let mut file_scope = ctx.scope(item.file);
            let mut ctx = file_scope.scope_at(item.name(), item.line());
            if let Ok(def) = self.registry.object(item.index) {
                for field in &def.fields {
                    let mut ctx = ctx.scope_at(field.name.as_str(), field.line);
                    validate_table_field(&mut ctx, &self.registry, field);
                }
            }
        }
    }

    /// Root type and file identifier of the entry file.
    fn file_settings(&self, ctx: &mut CompileContext, file: &SchemaFile, schema: &mut CompiledSchema) {
        let mut ctx = ctx.scope(file.path.as_str());
        let mut namespace = String::new();
        for declaration in &file.declarations {
            match declaration {
                Declaration::Namespace(ns) => namespace = ns.trim_start_matches('.').to_string(),
                Declaration::RootType(name) => match resolver::lookup(&self.registry, name, &namespace) {
                    Some(ix) if matches!(self.registry.get(ix), Some(TypeDef::Object(def)) if def.is_table) => {
                        schema.root_type = Some(ix);
                    }
                    Some(_) => ctx.error(format!("root_type '{}' must be a table", name)),
                    None => ctx.error(format!("root_type '{}' is not declared", name)),
                },
                Declaration::FileIdentifier(ident) => {
                    let bytes = ident.as_bytes();
                    if bytes.len() != 4 || !ident.is_ascii() {
                        ctx.error(format!("file_identifier '{}' must be exactly 4 ASCII characters", ident));
                    } else {
                        schema.file_identifier = Some([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    }
                }
                _ => {}
            }
        }
    }

    fn services(&self, ctx: &mut CompileContext, file: &SchemaFile) -> Vec<RpcServiceDef> {
        let mut ctx = ctx.scope(file.path.as_str());
        let mut namespace = String::new();
        let mut services = Vec::new();
        for declaration in &file.declarations {
            let decl = match declaration {
                Declaration::Namespace(ns) => {
                    namespace = ns.trim_start_matches('.').to_string();
                    continue;
                }
                Declaration::RpcService(decl) => decl,
                _ => continue,
            };
            let mut ctx = ctx.scope_at(decl.name.as_str(), decl.line);
            let mut methods = Vec::new();
            for method in &decl.methods {
                let mut ctx = ctx.scope(method.name.as_str());
                check_attributes(&mut ctx, &method.attributes, AttributeSite::RpcMethod, &self.attributes);
                let streaming = attribute_value(&method.attributes, "streaming").map(str::to_string);
                if let Some(mode) = streaming.as_deref() {
                    if !matches!(mode, "none" | "client" | "server" | "bidi") {
                        ctx.error(format!("streaming mode '{}' must be none, client, server or bidi", mode));
                    }
                }
                let request = self.rpc_table(&mut ctx, "request", &method.request, &namespace);
                let response = self.rpc_table(&mut ctx, "response", &method.response, &namespace);
                if let (Some(request), Some(response)) = (request, response) {
                    methods.push(RpcMethod {
                        name: method.name.clone(),
                        request,
                        response,
                        streaming,
                    });
                }
            }
            services.push(RpcServiceDef {
                name: decl.name.clone(),
                namespace: namespace.clone(),
                methods,
            });
        }
        services
    }

    fn rpc_table(&self, ctx: &mut CompileContext, role: &str, name: &str, namespace: &str) -> Option<TypeIndex> {
        match resolver::lookup(&self.registry, name, namespace) {
            Some(ix) if matches!(self.registry.get(ix), Some(TypeDef::Object(def)) if def.is_table) => Some(ix),
            Some(_) => {
                ctx.error(format!("rpc {} type '{}' is not a table and has no serializer", role, name));
                None
            }
            None => {
                ctx.error(format!("rpc {} type '{}' is not declared", role, name));
                None
            }
        }
    }
}

/// Converts `HitPoints`, `hitPoints` or `HTTPServer` to snake_case.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p == '_' => false,
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.map_or(false, |n| n.is_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::error::Error;
    use crate::schema::ast::{Attribute, EnumDecl, FieldDecl, RpcServiceDecl, UnionDecl};

    fn monster_file() -> SchemaFile {
        SchemaFile::new("monster.fbs")
            .namespace("game")
            .enumeration(EnumDecl::new("Color", "ubyte").value("Red").value("Green").value_eq("Blue", "4"))
            .object(
                ObjectDecl::structure("Vec3")
                    .field(FieldDecl::new("x", "float"))
                    .field(FieldDecl::new("y", "float"))
                    .field(FieldDecl::new("z", "double")),
            )
            .object(ObjectDecl::table("Weapon").field(FieldDecl::new("name", "string").attr("key")))
            .union(UnionDecl::new("Equipment").member("Weapon").member("Vec3"))
            .object(
                ObjectDecl::table("Monster")
                    .field(FieldDecl::new("pos", "Vec3"))
                    .field(FieldDecl::new("mana", "short").default_value("150"))
                    .field(FieldDecl::new("hp", "short").default_value("100"))
                    .field(FieldDecl::new("name", "string").attr("required"))
                    .field(FieldDecl::new("color", "Color").default_value("Blue"))
                    .field(FieldDecl::new("equipped", "Equipment"))
                    .field(FieldDecl::new("weapons", "[Weapon]").attr("sorted_vector")),
            )
            .root_type("Monster")
            .file_identifier("MONS")
    }

    #[test]
    fn test_compile_monster() {
        let schema = SchemaCompiler::new().compile_file(&monster_file()).unwrap();
        let registry = &schema.registry;

        let vec3 = registry.object(registry.lookup("game.Vec3").unwrap()).unwrap();
        assert_eq!(vec3.size, 16);
        assert_eq!(vec3.align, 8);
        assert_eq!(vec3.fields[2].offset, 8);

        let monster_ix = registry.lookup("game.Monster").unwrap();
        assert_eq!(schema.root_type, Some(monster_ix));
        assert_eq!(schema.file_identifier, Some(*b"MONS"));

        let monster = registry.object(monster_ix).unwrap();
        let slots: Vec<u16> = monster.fields.iter().map(|f| f.index).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5, 7]);
        assert_eq!(monster.field("hp").unwrap().1.default, Some(DefaultValue::Signed(100)));
        assert_eq!(monster.field("color").unwrap().1.default, Some(DefaultValue::Unsigned(4)));

        let weapon = registry.object(registry.lookup("game.Weapon").unwrap()).unwrap();
        assert_eq!(weapon.key_field, Some(0));

        let equipment = registry.union_def(registry.lookup("game.Equipment").unwrap()).unwrap();
        assert_eq!(equipment.members[1].discriminator, 2);
    }

    #[test]
    fn test_explicit_ids() {
        let file = SchemaFile::new("ids.fbs")
            .object(ObjectDecl::table("Sword"))
            .union(UnionDecl::new("Item").member("Sword"))
            .object(
                ObjectDecl::table("Slot")
                    .field(FieldDecl::new("item", "Item").attr_value("id", "2"))
                    .field(FieldDecl::new("count", "int").attr_value("id", "0")),
            );
        let schema = SchemaCompiler::new().compile_file(&file).unwrap();
        let slot = schema.registry.object(schema.registry.lookup("Slot").unwrap()).unwrap();
        assert_eq!(slot.field("item").unwrap().1.index, 1);
        assert_eq!(slot.field("count").unwrap().1.index, 0);
    }

    #[test]
    fn test_errors_are_batched_with_scopes() {
        let file = SchemaFile::new("bad.fbs")
            .namespace("game")
            .enumeration(EnumDecl::new("Level", "ubyte").value_eq("Low", "2").value_eq("High", "1"))
            .object(ObjectDecl::structure("Empty"))
            .object(
                ObjectDecl::table("Monster")
                    .field(FieldDecl::new("weapon", "Weapon"))
                    .field(FieldDecl::new("hp", "short").default_value("70000"))
                    .field(FieldDecl::new("tags", "[[string]]"))
                    .field(FieldDecl::new("level", "Level"))
                    .field(FieldDecl::new("flag", "bool").attr("hash")),
            )
            .root_type("Vec3");

        let err = SchemaCompiler::new().compile_file(&file).unwrap_err();
        let errors = match err {
            Error::Schema(errors) => errors,
            other => panic!("unexpected error {:?}", other),
        };
        assert!(errors.mentions("strictly increasing"));
        assert!(errors.mentions("at least one field"));
        assert!(errors.mentions("unknown type 'Weapon'"));
        assert!(errors.mentions("out of range"));
        assert!(errors.mentions("nested vectors"));
        assert!(errors.mentions("unknown attribute 'hash'"));
        assert!(errors.mentions("root_type 'Vec3'"));

        let weapon = errors.iter().find(|r| r.message.contains("Weapon")).unwrap();
        assert_eq!(weapon.scope_path(), "bad.fbs.Monster.weapon");
    }

    #[test]
    fn test_duplicate_and_gapped_ids() {
        let file = SchemaFile::new("ids.fbs").object(
            ObjectDecl::table("T")
                .field(FieldDecl::new("a", "int").attr_value("id", "0"))
                .field(FieldDecl::new("b", "int").attr_value("id", "0"))
                .field(FieldDecl::new("c", "int").attr_value("id", "3")),
        );
        let err = SchemaCompiler::new().compile_file(&file).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("duplicate field index 0"));
        assert!(rendered.contains("contiguous"));
    }

    #[test]
    fn test_recursive_struct_rejected_but_recursive_table_allowed() {
        let file = SchemaFile::new("rec.fbs")
            .object(ObjectDecl::structure("Loop").field(FieldDecl::new("inner", "Loop")))
            .object(ObjectDecl::table("Node").field(FieldDecl::new("next", "Node")));
        let err = SchemaCompiler::new().compile_file(&file).unwrap_err();
        assert!(err.to_string().contains("contains itself"));

        let ok = SchemaFile::new("list.fbs")
            .object(ObjectDecl::table("Node").field(FieldDecl::new("next", "Node")).field(FieldDecl::new("value", "int")))
            .root_type("Node");
        assert!(SchemaCompiler::new().compile_file(&ok).is_ok());
    }

    #[test]
    fn test_bit_flags_and_declared_attributes() {
        let file = SchemaFile::new("flags.fbs")
            .decl(Declaration::Attribute("priority".to_string()))
            .enumeration(EnumDecl::new("Perms", "ubyte").attr("bit_flags").value("Read").value("Write").value_eq("Admin", "7"))
            .object(
                ObjectDecl::table("User")
                    .field(FieldDecl::new("perms", "Perms").default_value("Read Write"))
                    .field(FieldDecl::new("rank", "int").attr("priority")),
            );
        let schema = SchemaCompiler::new().compile_file(&file).unwrap();
        let perms = schema.registry.enum_def(schema.registry.lookup("Perms").unwrap()).unwrap();
        assert_eq!(perms.values, vec![("Read".to_string(), 1), ("Write".to_string(), 2), ("Admin".to_string(), 128)]);
        let user = schema.registry.object(schema.registry.lookup("User").unwrap()).unwrap();
        assert_eq!(user.fields[0].default, Some(DefaultValue::Unsigned(3)));
    }

    #[test]
    fn test_rpc_services() {
        let file = SchemaFile::new("rpc.fbs")
            .namespace("svc")
            .object(ObjectDecl::table("Ping"))
            .object(ObjectDecl::structure("Pong").field(FieldDecl::new("n", "int")))
            .decl(Declaration::RpcService(RpcServiceDecl::new("Echo").method("Ping", "Ping", "Ping")));
        let schema = SchemaCompiler::new().compile_file(&file).unwrap();
        assert_eq!(schema.services.len(), 1);
        assert_eq!(schema.services[0].full_name(), "svc.Echo");

        let mut bad = RpcServiceDecl::new("Broken").method("Call", "Ping", "Pong");
        bad.methods[0].attributes.push(Attribute::with_value("streaming", "sideways"));
        let file = SchemaFile::new("rpc.fbs")
            .namespace("svc")
            .object(ObjectDecl::table("Ping"))
            .object(ObjectDecl::structure("Pong").field(FieldDecl::new("n", "int")))
            .decl(Declaration::RpcService(bad));
        let err = SchemaCompiler::new().compile_file(&file).unwrap_err().to_string();
        assert!(err.contains("has no serializer"));
        assert!(err.contains("sideways"));
    }

    #[test]
    fn test_field_name_normalization() {
        let file = SchemaFile::new("names.fbs").object(
            ObjectDecl::table("Monster")
                .field(FieldDecl::new("HitPoints", "int"))
                .field(FieldDecl::new("hit_points", "int")),
        );
        let compiler = SchemaCompiler::with_options(CompilerOptions::default().with_normalized_field_names(true));
        let err = compiler.compile_file(&file).unwrap_err();
        assert!(err.to_string().contains("duplicate field name 'hit_points'"));

        assert_eq!(to_snake_case("HitPoints"), "hit_points");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("pos2D"), "pos2_d");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }
}
