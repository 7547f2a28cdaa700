// Schema validator for flatwire
//
// Attribute checks and the per-table rules the compiler enforces once every
// type has been resolved: key fields, sorted/indexed vectors, write-through,
// required/deprecated combinations and the other per-field flags.

use std::collections::HashSet;

use crate::schema::ast::Attribute;
use crate::schema::errors::CompileContext;
use crate::schema::types::{FieldDef, FieldFlags, FieldType, ObjectDef, TypeRegistry};

/// Where an attribute list was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSite {
    TableField,
    StructField,
    Table,
    Struct,
    Enum,
    Union,
    RpcMethod,
}

impl AttributeSite {
    fn allowed(self) -> &'static [&'static str] {
        match self {
            AttributeSite::TableField => &[
                "id",
                "deprecated",
                "required",
                "key",
                "force_write",
                "write_through",
                "sorted_vector",
                "indexed_vector",
                "shared",
            ],
            AttributeSite::Struct => &["value_struct"],
            AttributeSite::Enum => &["bit_flags"],
            AttributeSite::RpcMethod => &["streaming"],
            AttributeSite::StructField | AttributeSite::Table | AttributeSite::Union => &[],
        }
    }

    fn describe(self) -> &'static str {
        match self {
            AttributeSite::TableField => "table field",
            AttributeSite::StructField => "struct field",
            AttributeSite::Table => "table",
            AttributeSite::Struct => "struct",
            AttributeSite::Enum => "enum",
            AttributeSite::Union => "union",
            AttributeSite::RpcMethod => "rpc method",
        }
    }
}

/// Attributes with built-in meaning.
pub const KNOWN_ATTRIBUTES: &[&str] = &[
    "id",
    "deprecated",
    "required",
    "key",
    "force_write",
    "write_through",
    "sorted_vector",
    "indexed_vector",
    "shared",
    "value_struct",
    "bit_flags",
    "streaming",
];

/// Records an error for every attribute not valid at `site`.
///
/// Attributes declared with `attribute "name";` are accepted anywhere and
/// otherwise ignored.
pub fn check_attributes(
    ctx: &mut CompileContext,
    attributes: &[Attribute],
    site: AttributeSite,
    declared: &HashSet<String>,
) {
    for attribute in attributes {
        let name = attribute.name.as_str();
        if site.allowed().contains(&name) || declared.contains(name) {
            continue;
        }
        if KNOWN_ATTRIBUTES.contains(&name) {
            ctx.error(format!("attribute '{}' is not valid on a {}", name, site.describe()));
        } else {
            ctx.error(format!(
                "unknown attribute '{}'; declare it with `attribute \"{}\";`",
                name, name
            ));
        }
    }
}

/// Returns true if `name` is present in the list.
pub fn has_attribute(attributes: &[Attribute], name: &str) -> bool {
    attributes.iter().any(|a| a.name == name)
}

/// Value of the first attribute called `name`.
pub fn attribute_value<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name == name)
        .and_then(|a| a.value.as_deref())
}

/// Field flags set by the attribute list.
pub fn field_flags(attributes: &[Attribute]) -> FieldFlags {
    let mut flags = FieldFlags::empty();
    for attribute in attributes {
        flags |= match attribute.name.as_str() {
            "deprecated" => FieldFlags::DEPRECATED,
            "required" => FieldFlags::REQUIRED,
            "key" => FieldFlags::KEY,
            "force_write" => FieldFlags::FORCE_WRITE,
            "write_through" => FieldFlags::WRITE_THROUGH,
            "sorted_vector" => FieldFlags::SORTED_VECTOR,
            "indexed_vector" => FieldFlags::INDEXED_VECTOR,
            "shared" => FieldFlags::SHARED_STRING,
            _ => FieldFlags::empty(),
        };
    }
    flags
}

/// Checks one table field's flags against its type.
pub fn validate_table_field(ctx: &mut CompileContext, registry: &TypeRegistry, field: &FieldDef) {
    let flags = field.flags;
    let scalar_like = registry.scalar_of(&field.ty).is_some();

    if flags.contains(FieldFlags::DEPRECATED | FieldFlags::REQUIRED) {
        ctx.error("a field cannot be both deprecated and required");
    }
    if flags.contains(FieldFlags::FORCE_WRITE) && !scalar_like {
        ctx.error("force_write is only valid on scalar and enum fields");
    }
    if flags.contains(FieldFlags::KEY) && !registry.valid_sort_key(&field.ty) {
        ctx.error(format!(
            "key field must be a scalar, enum or string, not '{}'",
            registry.type_name(&field.ty)
        ));
    }
    if flags.contains(FieldFlags::SHARED_STRING) {
        let stringy = match &field.ty {
            FieldType::String => true,
            FieldType::Vector(elem) => **elem == FieldType::String,
            _ => false,
        };
        if !stringy {
            ctx.error("shared is only valid on strings and vectors of strings");
        }
    }

    if flags.intersects(FieldFlags::SORTED_VECTOR | FieldFlags::INDEXED_VECTOR) {
        if flags.contains(FieldFlags::SORTED_VECTOR | FieldFlags::INDEXED_VECTOR) {
            ctx.error("a vector cannot be both sorted_vector and indexed_vector");
        }
        match &field.ty {
            FieldType::Vector(elem) => match **elem {
                FieldType::Table(ix) => {
                    if let Ok(def) = registry.object(ix) {
                        if def.key_field.is_none() {
                            ctx.error(format!(
                                "sorted vector element type '{}' has no key field",
                                def.full_name()
                            ));
                        }
                    }
                }
                _ => ctx.error("sorted and indexed vectors must be vectors of tables"),
            },
            _ => ctx.error("sorted_vector and indexed_vector are only valid on vectors"),
        }
    }

    if flags.contains(FieldFlags::WRITE_THROUGH) {
        let inline = |ty: &FieldType| {
            matches!(ty, FieldType::Scalar(_) | FieldType::Enum(_) | FieldType::Struct(_))
        };
        match &field.ty {
            FieldType::Vector(elem) if inline(&**elem) => {
                if flags.intersects(FieldFlags::SORTED_VECTOR | FieldFlags::INDEXED_VECTOR) {
                    ctx.error("write_through is not valid on sorted vectors");
                }
            }
            ty if inline(ty) => {
                if !flags.contains(FieldFlags::REQUIRED) {
                    ctx.error("write_through fields that are not vectors must also be required");
                }
            }
            _ => ctx.error(format!(
                "write_through is only valid on scalar, enum and struct fields or vectors of them, not '{}'",
                registry.type_name(&field.ty)
            )),
        }
    }
}

/// Checks table-level rules and records the key field.
pub fn validate_table(ctx: &mut CompileContext, def: &mut ObjectDef) {
    let keys: Vec<usize> = def
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.flags.contains(FieldFlags::KEY))
        .map(|(ix, _)| ix)
        .collect();
    if keys.len() > 1 {
        ctx.error(format!("table '{}' declares more than one key field", def.full_name()));
    }
    def.key_field = keys.first().copied();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{ScalarType, TypeDef};

    fn errors_for(field: FieldDef, registry: &TypeRegistry) -> usize {
        let mut ctx = CompileContext::new();
        validate_table_field(&mut ctx, registry, &field);
        ctx.error_count()
    }

    fn with_flags(ty: FieldType, flags: FieldFlags) -> FieldDef {
        let mut field = FieldDef::new("f", ty, 0);
        field.flags = flags;
        field
    }

    #[test]
    fn test_attribute_sites() {
        let declared: HashSet<String> = ["priority".to_string()].into_iter().collect();
        let mut ctx = CompileContext::new();
        check_attributes(
            &mut ctx,
            &[Attribute::flag("key"), Attribute::flag("priority")],
            AttributeSite::TableField,
            &declared,
        );
        assert!(!ctx.has_errors());

        check_attributes(&mut ctx, &[Attribute::flag("bit_flags")], AttributeSite::Struct, &declared);
        check_attributes(&mut ctx, &[Attribute::flag("hash")], AttributeSite::TableField, &declared);
        assert_eq!(ctx.error_count(), 2);
    }

    #[test]
    fn test_field_flags() {
        let flags = field_flags(&[
            Attribute::flag("required"),
            Attribute::flag("shared"),
            Attribute::with_value("id", "3"),
        ]);
        assert_eq!(flags, FieldFlags::REQUIRED | FieldFlags::SHARED_STRING);
        assert_eq!(attribute_value(&[Attribute::with_value("id", "3")], "id"), Some("3"));
    }

    #[test]
    fn test_field_rules() {
        let mut registry = TypeRegistry::new();
        let mut keyed = ObjectDef::new("Item", "", true);
        keyed.key_field = Some(0);
        let keyed = registry.push(TypeDef::Object(keyed));
        let plain = registry.push(TypeDef::Object(ObjectDef::new("Plain", "", true)));
        let int = FieldType::Scalar(ScalarType::Int);

        assert_eq!(errors_for(with_flags(int.clone(), FieldFlags::FORCE_WRITE), &registry), 0);
        assert_eq!(errors_for(with_flags(FieldType::String, FieldFlags::FORCE_WRITE), &registry), 1);
        assert_eq!(
            errors_for(with_flags(int.clone(), FieldFlags::DEPRECATED | FieldFlags::REQUIRED), &registry),
            1
        );
        assert_eq!(errors_for(with_flags(int.clone(), FieldFlags::SHARED_STRING), &registry), 1);
        assert_eq!(errors_for(with_flags(int.clone(), FieldFlags::WRITE_THROUGH), &registry), 1);
        assert_eq!(
            errors_for(with_flags(int.clone(), FieldFlags::WRITE_THROUGH | FieldFlags::REQUIRED), &registry),
            0
        );
        assert_eq!(
            errors_for(with_flags(FieldType::Vector(Box::new(int)), FieldFlags::WRITE_THROUGH), &registry),
            0
        );
        assert_eq!(
            errors_for(
                with_flags(FieldType::Vector(Box::new(FieldType::Table(keyed))), FieldFlags::SORTED_VECTOR),
                &registry
            ),
            0
        );
        assert_eq!(
            errors_for(
                with_flags(FieldType::Vector(Box::new(FieldType::Table(plain))), FieldFlags::INDEXED_VECTOR),
                &registry
            ),
            1
        );
        assert_eq!(errors_for(with_flags(FieldType::Table(plain), FieldFlags::KEY), &registry), 1);
    }

    #[test]
    fn test_single_key_per_table() {
        let mut def = ObjectDef::new("Monster", "game", true);
        let mut a = FieldDef::new("a", FieldType::String, 0);
        a.flags = FieldFlags::KEY;
        let mut b = FieldDef::new("b", FieldType::Scalar(ScalarType::Int), 1);
        b.flags = FieldFlags::KEY;
        def.fields = vec![a, b];

        let mut ctx = CompileContext::new();
        validate_table(&mut ctx, &mut def);
        assert_eq!(ctx.error_count(), 1);
        assert_eq!(def.key_field, Some(0));
    }
}
