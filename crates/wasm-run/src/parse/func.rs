use super::ParsedBody;
use wasmparser::{FuncType, ValType};

/// Index into a module's function index space (imports first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncIdx(pub(crate) u32);

impl FuncIdx {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A function defined by the module itself.
#[derive(Debug, Clone)]
pub(crate) struct ParsedFunction {
    pub(crate) ty: FuncType,
    /// Params followed by the body-declared locals.
    pub(crate) locals: Box<[ValType]>,
    /// Parsed function body.
    pub(crate) body: ParsedBody,
}

impl ParsedFunction {
    pub(crate) fn param_count(&self) -> usize {
        self.ty.params().len()
    }

    pub(crate) fn result_count(&self) -> usize {
        self.ty.results().len()
    }
}
