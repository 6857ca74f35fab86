use thiserror::Error;

use crate::instance::Instance;
use crate::parse::func::FuncIdx;
use crate::value::Val;

mod exec;
mod float;

/// Runtime faults raised while executing WASM code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("invalid conversion to integer")]
    InvalidConversion,
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    #[error("undefined element")]
    UndefinedElement,
    #[error("uninitialized element")]
    UninitializedElement,
    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("stack underflow")]
    StackUnderflow,
    /// Code the decoder accepted but that cannot be run, e.g. an index
    /// out of range in a module that was never verified.
    #[error("malformed code: {0}")]
    MalformedCode(&'static str),
    #[error("internal panic: {0}")]
    Panic(String),
}

/// Run `func` to completion with `args` and collect its typed results.
pub(crate) fn call(instance: &mut Instance<'_>, func: FuncIdx, args: &[Val]) -> Result<Vec<Val>, Trap> {
    let module = instance.module;
    let ty = module
        .func_type(func)
        .ok_or(Trap::MalformedCode("call to undefined function"))?;

    let mut stack: Vec<u64> = args.iter().map(|arg| arg.to_bits()).collect();
    let mut depth = 0;
    exec::call_function(instance, func, &mut stack, &mut depth)?;

    if stack.len() != ty.results().len() {
        return Err(Trap::MalformedCode("function left the wrong number of results"));
    }
    stack
        .iter()
        .zip(ty.results())
        .map(|(raw, ty)| Val::from_bits(*raw, ty))
        .collect::<Option<Vec<_>>>()
        .ok_or(Trap::MalformedCode("result of an unsupported type"))
}
