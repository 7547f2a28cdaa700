// Default value literals
//
// Parses the default value written after a scalar or enum field and checks it
// against the range of the field's storage type. Absent fields read back as this
// value, and fields equal to it are left out of the vtable on write.

use crate::schema::types::{DefaultValue, FieldType, ScalarType, TypeRegistry};

impl DefaultValue {
    /// The zero value of a scalar type.
    pub fn zero(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => DefaultValue::Bool(false),
            ScalarType::Float | ScalarType::Double => DefaultValue::Float(0.0),
            s if s.is_signed() => DefaultValue::Signed(0),
            _ => DefaultValue::Unsigned(0),
        }
    }

    /// Integer view of the default, if it is an integer.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            DefaultValue::Signed(v) => Some(*v as i128),
            DefaultValue::Unsigned(v) => Some(*v as i128),
            DefaultValue::Bool(_) | DefaultValue::Float(_) => None,
        }
    }
}

/// Parses `literal` as the default of a field of type `ty`.
pub fn parse_default(
    literal: &str,
    ty: &FieldType,
    registry: &TypeRegistry,
) -> std::result::Result<DefaultValue, String> {
    let literal = literal.trim();
    match ty {
        FieldType::Scalar(scalar) => parse_scalar(literal, *scalar),
        FieldType::Enum(ix) => {
            let def = registry.enum_def(*ix).map_err(|e| e.to_string())?;
            let value = match parse_integer(literal) {
                Some(value) => value,
                None => {
                    let mut value = 0i128;
                    for name in literal.split(|c: char| c.is_whitespace() || c == '|').filter(|s| !s.is_empty()) {
                        let member = def
                            .value_of(name)
                            .ok_or_else(|| format!("'{}' is not a value of enum '{}'", name, def.full_name()))?;
                        if !def.bit_flags && value != 0 {
                            return Err(format!(
                                "enum '{}' is not a bit_flags enum; only one value may be named",
                                def.full_name()
                            ));
                        }
                        value |= member;
                    }
                    value
                }
            };
            if !def.bit_flags && def.name_of(value).is_none() {
                return Err(format!("{} is not a value of enum '{}'", value, def.full_name()));
            }
            integer_default(value, def.underlying)
        }
        _ => Err(format!(
            "default values are only allowed on scalar and enum fields, not '{}'",
            registry.type_name(ty)
        )),
    }
}

fn parse_scalar(literal: &str, scalar: ScalarType) -> std::result::Result<DefaultValue, String> {
    match scalar {
        ScalarType::Bool => match literal {
            "true" | "1" => Ok(DefaultValue::Bool(true)),
            "false" | "0" => Ok(DefaultValue::Bool(false)),
            _ => Err(format!("'{}' is not a valid bool", literal)),
        },
        ScalarType::Float | ScalarType::Double => {
            let value = parse_float(literal).ok_or_else(|| format!("'{}' is not a valid {}", literal, scalar.name()))?;
            if scalar == ScalarType::Float && value.is_finite() && (value as f32).is_infinite() {
                return Err(format!("{} does not fit in float", literal));
            }
            Ok(DefaultValue::Float(value))
        }
        _ => {
            let value =
                parse_integer(literal).ok_or_else(|| format!("'{}' is not a valid {}", literal, scalar.name()))?;
            integer_default(value, scalar)
        }
    }
}

fn integer_default(value: i128, scalar: ScalarType) -> std::result::Result<DefaultValue, String> {
    let (min, max) = scalar
        .integer_range()
        .ok_or_else(|| format!("{} is not an integer type", scalar.name()))?;
    if value < min || value > max {
        return Err(format!("{} is out of range for {} ({}..={})", value, scalar.name(), min, max));
    }
    if scalar.is_signed() {
        Ok(DefaultValue::Signed(value as i64))
    } else {
        Ok(DefaultValue::Unsigned(value as u64))
    }
}

/// Decimal or `0x` hexadecimal integer with an optional sign.
///
/// Values up to `u64::MAX` parse exactly.
pub fn parse_integer(literal: &str) -> Option<i128> {
    let (negative, digits) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal.strip_prefix('+').unwrap_or(literal)),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16).ok()?,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => digits.parse::<u128>().ok()?,
        None => return None,
    };
    let magnitude = i128::try_from(magnitude).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_float(literal: &str) -> Option<f64> {
    match literal {
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => parse_integer(literal)
            .map(|v| v as f64)
            .or_else(|| literal.parse::<f64>().ok()),
    }
}
