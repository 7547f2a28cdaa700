// Physical layout queries over the type registry
//
// Inline size and alignment of every field type, where each kind of type may
// appear, and the child-type walk code generators use to dispatch per member.

use crate::codec::primitives::SIZE_UOFFSET;
use crate::schema::types::{FieldType, ScalarType, TypeDef, TypeIndex, TypeRegistry};

impl TypeRegistry {
    /// Scalar type a field is stored as, following enums to their underlying type.
    pub fn scalar_of(&self, ty: &FieldType) -> Option<ScalarType> {
        match ty {
            FieldType::Scalar(scalar) => Some(*scalar),
            FieldType::Enum(ix) => self.enum_def(*ix).ok().map(|def| def.underlying),
            _ => None,
        }
    }

    /// Number of bytes the type occupies where it is stored (inline or as a uoffset).
    pub fn size_of(&self, ty: &FieldType) -> usize {
        match ty {
            FieldType::Scalar(scalar) => scalar.size(),
            FieldType::Enum(_) => self.scalar_of(ty).map_or(1, ScalarType::size),
            FieldType::Struct(ix) => self.object(*ix).map_or(0, |def| def.size),
            FieldType::Array(elem, len) => self.size_of(elem) * *len as usize,
            FieldType::String | FieldType::Table(_) | FieldType::Vector(_) | FieldType::Union(_) => {
                SIZE_UOFFSET
            }
        }
    }

    /// Alignment required where the type is stored.
    pub fn align_of(&self, ty: &FieldType) -> usize {
        match ty {
            FieldType::Struct(ix) => self.object(*ix).map_or(1, |def| def.align.max(1)),
            FieldType::Array(elem, _) => self.align_of(elem),
            _ => self.size_of(ty).max(1),
        }
    }

    /// Whether values of the type are stored inside their parent rather than by reference.
    pub fn is_inline(&self, ty: &FieldType) -> bool {
        matches!(
            ty,
            FieldType::Scalar(_) | FieldType::Enum(_) | FieldType::Struct(_) | FieldType::Array(..)
        )
    }

    pub fn valid_struct_member(&self, ty: &FieldType) -> bool {
        match ty {
            FieldType::Scalar(_) | FieldType::Enum(_) | FieldType::Struct(_) => true,
            FieldType::Array(elem, len) => *len > 0 && self.valid_struct_member(elem) && !matches!(**elem, FieldType::Array(..)),
            _ => false,
        }
    }

    pub fn valid_table_member(&self, ty: &FieldType) -> bool {
        match ty {
            FieldType::Array(..) => false,
            FieldType::Vector(elem) => self.valid_vector_member(elem),
            _ => true,
        }
    }

    pub fn valid_union_member(&self, ty: &FieldType) -> bool {
        matches!(ty, FieldType::Table(_) | FieldType::Struct(_) | FieldType::String)
    }

    pub fn valid_vector_member(&self, ty: &FieldType) -> bool {
        !matches!(ty, FieldType::Vector(_) | FieldType::Array(..))
    }

    pub fn valid_sort_key(&self, ty: &FieldType) -> bool {
        matches!(ty, FieldType::Scalar(_) | FieldType::Enum(_) | FieldType::String)
    }

    /// Named types directly referenced by `ty`. Unions expand to their member types.
    pub fn children(&self, ty: &FieldType) -> Vec<TypeIndex> {
        match ty {
            FieldType::Scalar(_) | FieldType::String => Vec::new(),
            FieldType::Enum(ix) | FieldType::Table(ix) | FieldType::Struct(ix) => vec![*ix],
            FieldType::Union(ix) => {
                let mut children = vec![*ix];
                if let Ok(def) = self.union_def(*ix) {
                    for member in &def.members {
                        children.extend(self.children(&member.ty));
                    }
                }
                children
            }
            FieldType::Vector(elem) | FieldType::Array(elem, _) => self.children(elem),
        }
    }

    /// Schema spelling of a field type.
    pub fn type_name(&self, ty: &FieldType) -> String {
        match ty {
            FieldType::Scalar(scalar) => scalar.name().to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Enum(ix) | FieldType::Union(ix) | FieldType::Table(ix) | FieldType::Struct(ix) => self
                .get(*ix)
                .map_or_else(|| format!("#{}", ix), TypeDef::full_name),
            FieldType::Vector(elem) => format!("[{}]", self.type_name(elem)),
            FieldType::Array(elem, len) => format!("[{}:{}]", self.type_name(elem), len),
        }
    }
}
