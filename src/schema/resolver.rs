// Name resolution and type registration
//
// Pass one of the compiler: walk the include graph, give every declared type a
// registry index under its fully-qualified name, and resolve written type names
// by searching the enclosing namespaces from innermost outwards, then the root.

use std::collections::HashSet;

use crate::schema::ast::{Declaration, EnumDecl, ObjectDecl, SchemaFile, SchemaSources, TypeName, UnionDecl};
use crate::schema::errors::CompileContext;
use crate::schema::types::{
    qualify, EnumDef, FieldType, ObjectDef, ScalarType, TypeDef, TypeIndex, TypeRegistry, UnionDef,
};

/// A declaration bound to its registry slot.
#[derive(Debug, Clone, Copy)]
pub enum DeclRef<'s> {
    Enum(&'s EnumDecl),
    Union(&'s UnionDecl),
    Object(&'s ObjectDecl),
}

/// A registered declaration with the namespace and file it came from.
#[derive(Debug, Clone)]
pub struct Declared<'s> {
    pub index: TypeIndex,
    pub namespace: String,
    pub file: &'s str,
    pub decl: DeclRef<'s>,
}

impl Declared<'_> {
    pub fn name(&self) -> &str {
        match self.decl {
            DeclRef::Enum(decl) => &decl.name,
            DeclRef::Union(decl) => &decl.name,
            DeclRef::Object(decl) => &decl.name,
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self.decl {
            DeclRef::Enum(decl) => decl.line,
            DeclRef::Union(decl) => decl.line,
            DeclRef::Object(decl) => decl.line,
        }
    }
}

/// Returns `entry` and every file it transitively includes, includes first.
///
/// Each file appears once even if included several times or cyclically.
pub fn collect_files<'s>(entry: &str, sources: &'s SchemaSources, ctx: &mut CompileContext) -> Vec<&'s SchemaFile> {
    fn visit<'s>(
        path: &str,
        sources: &'s SchemaSources,
        ctx: &mut CompileContext,
        seen: &mut HashSet<String>,
        out: &mut Vec<&'s SchemaFile>,
    ) {
        if !seen.insert(path.to_string()) {
            return;
        }
        let file = match sources.get(path) {
            Some(file) => file,
            None => {
                ctx.error(format!("included file '{}' was not found", path));
                return;
            }
        };
        {
            let mut scope = ctx.scope(path);
            for include in &file.includes {
                visit(include, sources, &mut scope, seen, out);
            }
        }
        out.push(file);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(entry, sources, ctx, &mut seen, &mut out);
    out
}

/// Registers a placeholder definition for every enum, union, table and struct.
pub fn register_types<'s>(
    files: &[&'s SchemaFile],
    ctx: &mut CompileContext,
) -> (TypeRegistry, Vec<Declared<'s>>) {
    let mut registry = TypeRegistry::new();
    let mut declared = Vec::new();

    for &file in files {
        let mut scope = ctx.scope(file.path.as_str());
        let mut namespace = String::new();
        for declaration in &file.declarations {
            let (decl, def) = match declaration {
                Declaration::Namespace(ns) => {
                    namespace = ns.trim_start_matches('.').to_string();
                    continue;
                }
                Declaration::Enum(decl) => (
                    DeclRef::Enum(decl),
                    TypeDef::Enum(EnumDef {
                        name: decl.name.clone(),
                        namespace: namespace.clone(),
                        underlying: ScalarType::Int,
                        values: Vec::new(),
                        bit_flags: false,
                        line: decl.line,
                    }),
                ),
                Declaration::Union(decl) => (
                    DeclRef::Union(decl),
                    TypeDef::Union(UnionDef {
                        name: decl.name.clone(),
                        namespace: namespace.clone(),
                        discriminator_type: ScalarType::UByte,
                        members: Vec::new(),
                        line: decl.line,
                    }),
                ),
                Declaration::Object(decl) => {
                    let mut def = ObjectDef::new(decl.name.clone(), namespace.clone(), decl.is_table);
                    def.line = decl.line;
                    (DeclRef::Object(decl), TypeDef::Object(def))
                }
                _ => continue,
            };

            let full_name = def.full_name();
            if let Some(existing) = registry.lookup(&full_name) {
                let kind = registry.get(existing).map_or("type", TypeDef::kind);
                let mut dup = scope.scope_at(full_name.as_str(), def_line(&def));
                dup.error(format!("'{}' is already declared as a {}", full_name, kind));
                continue;
            }
            let index = registry.push(def);
            declared.push(Declared {
                index,
                namespace: namespace.clone(),
                file: file.path.as_str(),
                decl,
            });
        }
    }

    (registry, declared)
}

fn def_line(def: &TypeDef) -> Option<u32> {
    match def {
        TypeDef::Object(def) => def.line,
        TypeDef::Enum(def) => def.line,
        TypeDef::Union(def) => def.line,
    }
}

/// Finds the registry index of `name` as seen from `namespace`.
///
/// A leading '.' makes the name absolute. Otherwise the enclosing namespaces
/// are tried from innermost to outermost, ending at the root.
pub fn lookup(registry: &TypeRegistry, name: &str, namespace: &str) -> Option<TypeIndex> {
    if let Some(rooted) = name.strip_prefix('.') {
        return registry.lookup(rooted);
    }
    let mut scope = namespace;
    loop {
        if let Some(index) = registry.lookup(&qualify(scope, name)) {
            return Some(index);
        }
        if scope.is_empty() {
            return None;
        }
        scope = scope.rsplit_once('.').map_or("", |(parent, _)| parent);
    }
}

/// Resolves a written type against the registry.
pub fn resolve_type(
    registry: &TypeRegistry,
    ty: &TypeName,
    namespace: &str,
) -> std::result::Result<FieldType, String> {
    match ty {
        TypeName::Named(name) => {
            if let Some(scalar) = ScalarType::from_name(name) {
                return Ok(FieldType::Scalar(scalar));
            }
            if name == "string" {
                return Ok(FieldType::String);
            }
            let index = lookup(registry, name, namespace).ok_or_else(|| format!("unknown type '{}'", name))?;
            Ok(match registry.get(index) {
                Some(TypeDef::Enum(_)) => FieldType::Enum(index),
                Some(TypeDef::Union(_)) => FieldType::Union(index),
                Some(TypeDef::Object(def)) if def.is_table => FieldType::Table(index),
                Some(TypeDef::Object(_)) => FieldType::Struct(index),
                None => return Err(format!("unknown type '{}'", name)),
            })
        }
        TypeName::Vector(elem) => Ok(FieldType::Vector(Box::new(resolve_type(registry, elem, namespace)?))),
        TypeName::Array(elem, len) => {
            let len = len
                .parse::<u16>()
                .ok()
                .filter(|len| *len > 0)
                .ok_or_else(|| format!("array length '{}' must be an integer between 1 and 65535", len))?;
            Ok(FieldType::Array(Box::new(resolve_type(registry, elem, namespace)?), len))
        }
    }
}
