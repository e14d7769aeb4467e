//! Shared lowering helpers: semantic type tags, operator rendering, literal
//! escaping and the Python-to-Zig type mapping.

use rustpython_ast::{self as ast};

use crate::error::{CompileError, CompileResult};

/// Semantic type tag attached to every tracked variable and expression
/// result.
///
/// A variable's tag is assigned at its first binding and refined only when an
/// obviously more specific source becomes available; conflicting refinements
/// collapse to [`TypeTag::PyObject`], which is resolved by runtime tag at the
/// use site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    /// Native machine integer
    Int,
    Float,
    Bool,
    /// Boxed integer: a dynamic object whose payload is an integer
    PyInt,
    Str,
    List,
    Tuple,
    Dict,
    /// Dynamic object of unknown concrete kind
    PyObject,
    /// User class instance
    Instance(String),
}

impl TypeTag {
    /// Whether values of this tag are reference-counted dynamic objects.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            TypeTag::PyInt
                | TypeTag::Str
                | TypeTag::List
                | TypeTag::Tuple
                | TypeTag::Dict
                | TypeTag::PyObject
        )
    }

    /// Receiver-kind key used for qualified registry lookups.
    pub fn registry_key(&self) -> Option<&'static str> {
        match self {
            TypeTag::Str => Some("string"),
            TypeTag::List => Some("list"),
            TypeTag::Tuple => Some("tuple"),
            TypeTag::Dict => Some("dict"),
            _ => None,
        }
    }
}

/// Render a comparison operator.
pub fn cmp_op(op: &ast::CmpOp) -> CompileResult<&'static str> {
    Ok(match op {
        ast::CmpOp::Eq => "==",
        ast::CmpOp::NotEq => "!=",
        ast::CmpOp::Lt => "<",
        ast::CmpOp::LtE => "<=",
        ast::CmpOp::Gt => ">",
        ast::CmpOp::GtE => ">=",
        // Identity comparisons degrade to value equality in the subset
        ast::CmpOp::Is => "==",
        ast::CmpOp::IsNot => "!=",
        ast::CmpOp::In | ast::CmpOp::NotIn => {
            return Err(CompileError::unsupported("in operator in this position"))
        }
    })
}

/// Render a binary arithmetic expression, using the Zig intrinsic forms where
/// the plain operator would be rejected for runtime integers.
pub fn render_bin_op(op: &ast::Operator, left: &str, right: &str) -> CompileResult<String> {
    Ok(match op {
        ast::Operator::Add => format!("{left} + {right}"),
        ast::Operator::Sub => format!("{left} - {right}"),
        ast::Operator::Mult => format!("{left} * {right}"),
        ast::Operator::Div => format!("@divTrunc({left}, {right})"),
        ast::Operator::FloorDiv => format!("@divFloor({left}, {right})"),
        ast::Operator::Mod => format!("@rem({left}, {right})"),
        ast::Operator::Pow => format!(
            "@as(i64, @intFromFloat(@floor(std.math.pow(f64, @floatFromInt({left}), @floatFromInt({right})))))"
        ),
        ast::Operator::BitAnd => format!("{left} & {right}"),
        ast::Operator::BitOr => format!("{left} | {right}"),
        ast::Operator::BitXor => format!("{left} ^ {right}"),
        ast::Operator::LShift => format!("{left} << {right}"),
        ast::Operator::RShift => format!("{left} >> {right}"),
        other => {
            return Err(CompileError::unsupported(format!(
                "binary operator {other:?}"
            )))
        }
    })
}

/// Escape a Python string literal for inclusion in Zig source.
pub fn zig_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Map a Python type annotation name to a Zig type.
///
/// `for_runtime` selects the dynamic-object mapping for `str`/`list`/`dict`;
/// outside runtime mode strings degrade to byte slices.
pub fn map_annotation(name: &str, for_runtime: bool) -> &'static str {
    if for_runtime {
        match name {
            "int" => "i64",
            "float" => "f64",
            "bool" => "bool",
            "str" | "list" | "dict" => "*runtime.PyObject",
            _ => "i64",
        }
    } else {
        match name {
            "int" => "i64",
            "float" => "f64",
            "bool" => "bool",
            "str" => "[]const u8",
            _ => "i64",
        }
    }
}

/// Render a numeric or boolean constant. Strings are handled by the caller.
pub fn render_scalar(value: &ast::Constant) -> CompileResult<String> {
    match value {
        ast::Constant::Int(i) => Ok(i.to_string()),
        ast::Constant::Float(f) => Ok(format!("{f:?}")),
        ast::Constant::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        ast::Constant::None => Err(CompileError::unsupported("None value")),
        other => Err(CompileError::unsupported(format!("constant {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_quotes_and_newlines() {
        assert_eq!(zig_escape("say \"hi\"\n"), "say \\\"hi\\\"\\n");
        assert_eq!(zig_escape("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn test_floor_div_uses_intrinsic() {
        let code = render_bin_op(&ast::Operator::FloorDiv, "a", "b").unwrap();
        assert_eq!(code, "@divFloor(a, b)");
    }

    #[test]
    fn test_pow_goes_through_float_math() {
        let code = render_bin_op(&ast::Operator::Pow, "x", "2").unwrap();
        assert!(code.contains("std.math.pow"));
        assert!(code.contains("@intFromFloat"));
    }

    #[test]
    fn test_dynamic_tags() {
        assert!(TypeTag::Str.is_dynamic());
        assert!(TypeTag::PyInt.is_dynamic());
        assert!(!TypeTag::Int.is_dynamic());
        assert!(!TypeTag::Instance("Dog".into()).is_dynamic());
    }

    #[test]
    fn test_registry_keys() {
        assert_eq!(TypeTag::Str.registry_key(), Some("string"));
        assert_eq!(TypeTag::Dict.registry_key(), Some("dict"));
        assert_eq!(TypeTag::Int.registry_key(), None);
    }

    #[test]
    fn test_annotation_mapping_depends_on_runtime_mode() {
        assert_eq!(map_annotation("str", true), "*runtime.PyObject");
        assert_eq!(map_annotation("str", false), "[]const u8");
        assert_eq!(map_annotation("unknown", true), "i64");
    }
}
