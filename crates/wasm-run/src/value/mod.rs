use std::fmt;

use wasmparser::ValType;

/// Dynamic WASM value, as passed into and returned from an invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Val {
    /// Name of the value's WASM type, used when reporting results.
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::I32(_) => "i32",
            Val::I64(_) => "i64",
            Val::F32(_) => "f32",
            Val::F64(_) => "f64",
        }
    }

    pub fn ty(&self) -> ValType {
        match self {
            Val::I32(_) => ValType::I32,
            Val::I64(_) => ValType::I64,
            Val::F32(_) => ValType::F32,
            Val::F64(_) => ValType::F64,
        }
    }

    /// Pack into a raw stack slot.
    pub(crate) fn to_bits(self) -> u64 {
        match self {
            Val::I32(v) => v as u32 as u64,
            Val::I64(v) => v as u64,
            Val::F32(v) => v.to_bits() as u64,
            Val::F64(v) => v.to_bits(),
        }
    }

    /// Interpret a raw stack slot according to `ty`. Vector and reference
    /// types have no `Val`.
    pub(crate) fn from_bits(raw: u64, ty: &ValType) -> Option<Val> {
        match ty {
            ValType::I32 => Some(Val::I32(raw as i32)),
            ValType::I64 => Some(Val::I64(raw as i64)),
            ValType::F32 => Some(Val::F32(f32::from_bits(raw as u32))),
            ValType::F64 => Some(Val::F64(f64::from_bits(raw))),
            ValType::V128 | ValType::Ref(_) => None,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::I32(v) => write!(f, "{v}"),
            Val::I64(v) => write!(f, "{v}"),
            Val::F32(v) => write!(f, "{v}"),
            Val::F64(v) => write!(f, "{v}"),
        }
    }
}

/// The values returned by an invocation, rendered as `value (type)`.
///
/// A single result prints as `42 (i32)`, no result as `() (void)`, and
/// several results as a tuple: `(1, 2.5) (i32, f64)`.
pub struct Returned<'a>(pub &'a [Val]);

impl fmt::Display for Returned<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            [] => write!(f, "() (void)"),
            [single] => write!(f, "{single} ({})", single.type_name()),
            many => {
                let values: Vec<String> = many.iter().map(Val::to_string).collect();
                let types: Vec<&str> = many.iter().map(Val::type_name).collect();
                write!(f, "({}) ({})", values.join(", "), types.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wasmparser::RefType;

    use super::*;

    #[test]
    fn reports_single_value_with_type() {
        assert_eq!(Returned(&[Val::I32(42)]).to_string(), "42 (i32)");
        assert_eq!(Returned(&[Val::F64(2.5)]).to_string(), "2.5 (f64)");
    }

    #[test]
    fn reports_void_and_tuples() {
        assert_eq!(Returned(&[]).to_string(), "() (void)");
        assert_eq!(
            Returned(&[Val::I32(1), Val::I64(-2)]).to_string(),
            "(1, -2) (i32, i64)"
        );
    }

    #[test]
    fn raw_slots_keep_sign_and_bits() {
        let raw = Val::I32(-1).to_bits();
        assert_eq!(raw, 0xFFFF_FFFF);
        assert_eq!(Val::from_bits(raw, &ValType::I32), Some(Val::I32(-1)));
        let raw = Val::F32(-0.0).to_bits();
        assert_eq!(Val::from_bits(raw, &ValType::F32).map(Val::to_bits), Some(raw));
        assert_eq!(Val::from_bits(0, &ValType::Ref(RefType::FUNCREF)), None);
    }
}
