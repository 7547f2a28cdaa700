// Schema parse tree
//
// The input of the schema compiler: declarations as produced by a grammar
// front-end, one `SchemaFile` per source file. Nothing here is resolved or
// validated yet; type names are kept as written.

use std::collections::HashMap;

/// A `name` or `name: value` attribute in parentheses after a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

impl Attribute {
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// A type reference as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    Named(String),
    Vector(Box<TypeName>),
    Array(Box<TypeName>, String),
}

impl TypeName {
    /// Splits `[T]` and `[T:N]` forms; anything else is a plain name.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            Some(inner) => match inner.rsplit_once(':') {
                Some((elem, len)) if !len.contains(']') => {
                    TypeName::Array(Box::new(TypeName::parse(elem)), len.trim().to_string())
                }
                _ => TypeName::Vector(Box::new(TypeName::parse(inner))),
            },
            None => TypeName::Named(text.to_string()),
        }
    }
}

impl From<&str> for TypeName {
    fn from(text: &str) -> Self {
        TypeName::parse(text)
    }
}

/// A field of a table or struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeName,
    pub default: Option<String>,
    pub attributes: Vec<Attribute>,
    pub line: Option<u32>,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            default: None,
            attributes: Vec::new(),
            line: None,
        }
    }

    pub fn default_value(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }

    pub fn attr(mut self, name: &str) -> Self {
        self.attributes.push(Attribute::flag(name));
        self
    }

    pub fn attr_value(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::with_value(name, value));
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// A `table` or `struct` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDecl {
    pub name: String,
    pub is_table: bool,
    pub fields: Vec<FieldDecl>,
    pub attributes: Vec<Attribute>,
    pub line: Option<u32>,
}

impl ObjectDecl {
    pub fn table(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    pub fn structure(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    fn new(name: impl Into<String>, is_table: bool) -> Self {
        Self {
            name: name.into(),
            is_table,
            fields: Vec::new(),
            attributes: Vec::new(),
            line: None,
        }
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    pub fn attr(mut self, name: &str) -> Self {
        self.attributes.push(Attribute::flag(name));
        self
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// One `Name` or `Name = value` entry of an enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValueDecl {
    pub name: String,
    pub value: Option<String>,
    pub line: Option<u32>,
}

/// An `enum Name : type { ... }` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDecl {
    pub name: String,
    pub underlying: String,
    pub values: Vec<EnumValueDecl>,
    pub attributes: Vec<Attribute>,
    pub line: Option<u32>,
}

impl EnumDecl {
    pub fn new(name: impl Into<String>, underlying: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            underlying: underlying.into(),
            values: Vec::new(),
            attributes: Vec::new(),
            line: None,
        }
    }

    pub fn value(mut self, name: impl Into<String>) -> Self {
        self.values.push(EnumValueDecl {
            name: name.into(),
            value: None,
            line: None,
        });
        self
    }

    pub fn value_eq(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push(EnumValueDecl {
            name: name.into(),
            value: Some(value.into()),
            line: None,
        });
        self
    }

    pub fn attr(mut self, name: &str) -> Self {
        self.attributes.push(Attribute::flag(name));
        self
    }
}

/// A member of a union: a type name with an optional alias (`Alias: Type`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionMemberDecl {
    pub alias: Option<String>,
    pub ty: String,
}

/// A `union Name { ... }` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionDecl {
    pub name: String,
    pub underlying: Option<String>,
    pub members: Vec<UnionMemberDecl>,
    pub attributes: Vec<Attribute>,
    pub line: Option<u32>,
}

impl UnionDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            underlying: None,
            members: Vec::new(),
            attributes: Vec::new(),
            line: None,
        }
    }

    pub fn member(mut self, ty: impl Into<String>) -> Self {
        self.members.push(UnionMemberDecl {
            alias: None,
            ty: ty.into(),
        });
        self
    }

    pub fn aliased(mut self, alias: impl Into<String>, ty: impl Into<String>) -> Self {
        self.members.push(UnionMemberDecl {
            alias: Some(alias.into()),
            ty: ty.into(),
        });
        self
    }
}

/// One method of an `rpc_service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMethodDecl {
    pub name: String,
    pub request: String,
    pub response: String,
    pub attributes: Vec<Attribute>,
}

/// An `rpc_service Name { ... }` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcServiceDecl {
    pub name: String,
    pub methods: Vec<RpcMethodDecl>,
    pub line: Option<u32>,
}

impl RpcServiceDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            line: None,
        }
    }

    pub fn method(mut self, name: impl Into<String>, request: impl Into<String>, response: impl Into<String>) -> Self {
        self.methods.push(RpcMethodDecl {
            name: name.into(),
            request: request.into(),
            response: response.into(),
            attributes: Vec::new(),
        });
        self
    }
}

/// A top-level declaration. `Namespace` applies to every declaration after it
/// in the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Namespace(String),
    Enum(EnumDecl),
    Union(UnionDecl),
    Object(ObjectDecl),
    RootType(String),
    FileIdentifier(String),
    Attribute(String),
    RpcService(RpcServiceDecl),
}

/// The parse tree of one schema source file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaFile {
    pub path: String,
    pub includes: Vec<String>,
    pub declarations: Vec<Declaration>,
}

impl SchemaFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            includes: Vec::new(),
            declarations: Vec::new(),
        }
    }

    pub fn include(mut self, path: impl Into<String>) -> Self {
        self.includes.push(path.into());
        self
    }

    pub fn decl(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn namespace(self, name: impl Into<String>) -> Self {
        self.decl(Declaration::Namespace(name.into()))
    }

    pub fn object(self, decl: ObjectDecl) -> Self {
        self.decl(Declaration::Object(decl))
    }

    pub fn enumeration(self, decl: EnumDecl) -> Self {
        self.decl(Declaration::Enum(decl))
    }

    pub fn union(self, decl: UnionDecl) -> Self {
        self.decl(Declaration::Union(decl))
    }

    pub fn root_type(self, name: impl Into<String>) -> Self {
        self.decl(Declaration::RootType(name.into()))
    }

    pub fn file_identifier(self, ident: impl Into<String>) -> Self {
        self.decl(Declaration::FileIdentifier(ident.into()))
    }
}

/// Every parsed file available to one compile, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct SchemaSources {
    files: HashMap<String, SchemaFile>,
}

impl SchemaSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: SchemaFile) -> &mut Self {
        self.files.insert(file.path.clone(), file);
        self
    }

    pub fn get(&self, path: &str) -> Option<&SchemaFile> {
        self.files.get(path)
    }
}

impl From<SchemaFile> for SchemaSources {
    fn from(file: SchemaFile) -> Self {
        let mut sources = SchemaSources::new();
        sources.add(file);
        sources
    }
}
