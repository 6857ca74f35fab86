use std::collections::HashMap;
use std::fmt;

use wasmparser::{FuncType, ValType};

use crate::Error;
use crate::parse::func::{FuncIdx, ParsedFunction};
use crate::parse::parse;
use crate::resolve::{NoImports, Resolve};

/// A decoded WASM module, with every import already resolved and linked.
///
/// Imported modules are owned by the module that imports them (see
/// [`Module::links`]), so a `Module` is a self-contained tree.
#[derive(Debug, Clone)]
pub struct Module {
    /// File path for a top-level module, import name for an imported one.
    pub(crate) label: String,
    /// Raw binary, kept so the module can be verified after decoding.
    pub(crate) bytes: Box<[u8]>,
    pub(crate) types: Vec<FuncType>,
    /// Function index space: imported functions first.
    pub(crate) funcs: Vec<Func>,
    /// Global index space: imported globals first.
    pub(crate) globals: Vec<GlobalDef>,
    pub(crate) memory: Option<MemoryDef>,
    pub(crate) table: Option<TableDef>,
    pub(crate) elements: Vec<ElemSegment>,
    pub(crate) data: Vec<DataSegment>,
    pub(crate) start: Option<FuncIdx>,
    /// `None` when the binary has no export section at all.
    pub(crate) exports: Option<HashMap<String, Export>>,
    pub(crate) imports: Vec<Import>,
    /// Resolved imported modules, one per distinct imported module name.
    pub(crate) links: Vec<Module>,
}

/// An entry of the function index space.
#[derive(Debug, Clone)]
pub(crate) enum Func {
    /// Provided by `links[link]` at index `func` of its own index space.
    Imported {
        link: usize,
        func: FuncIdx,
        ty: FuncType,
    },
    Local(ParsedFunction),
}

impl Func {
    pub(crate) fn ty(&self) -> &FuncType {
        match self {
            Func::Imported { ty, .. } => ty,
            Func::Local(func) => &func.ty,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum GlobalDef {
    /// Immutable global copied from `links[link]` at instantiation.
    Imported { link: usize, global: u32, ty: ValType },
    Local {
        ty: ValType,
        mutable: bool,
        init: ConstExpr,
    },
}

impl GlobalDef {
    pub(crate) fn ty(&self) -> ValType {
        match self {
            GlobalDef::Imported { ty, .. } | GlobalDef::Local { ty, .. } => *ty,
        }
    }

    pub(crate) fn is_mutable(&self) -> bool {
        matches!(self, GlobalDef::Local { mutable: true, .. })
    }
}

/// Linear memory limits, in 64 KiB pages.
#[derive(Debug, Clone)]
pub(crate) enum MemoryDef {
    /// Shared with the memory exported by `links[link]`.
    Imported { link: usize },
    Local { min: u64, max: Option<u64> },
}

#[derive(Debug, Clone)]
pub(crate) struct TableDef {
    pub(crate) min: u64,
    pub(crate) max: Option<u64>,
    /// Initial value of every slot.
    pub(crate) init: Option<u32>,
}

/// Active element segment for table 0.
#[derive(Debug, Clone)]
pub(crate) struct ElemSegment {
    pub(crate) offset: ConstExpr,
    pub(crate) items: Vec<Option<u32>>,
}

/// Active data segment for memory 0.
#[derive(Debug, Clone)]
pub(crate) struct DataSegment {
    pub(crate) offset: ConstExpr,
    pub(crate) bytes: Vec<u8>,
}

/// A constant expression, reduced to its single producing instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(u32),
}

/// What an export refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExportKind::Func => "function",
            ExportKind::Table => "table",
            ExportKind::Memory => "memory",
            ExportKind::Global => "global",
            ExportKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

impl From<wasmparser::ExternalKind> for ExportKind {
    fn from(kind: wasmparser::ExternalKind) -> Self {
        match kind {
            wasmparser::ExternalKind::Func => ExportKind::Func,
            wasmparser::ExternalKind::Table => ExportKind::Table,
            wasmparser::ExternalKind::Memory => ExportKind::Memory,
            wasmparser::ExternalKind::Global => ExportKind::Global,
            wasmparser::ExternalKind::Tag => ExportKind::Tag,
        }
    }
}

/// An export table entry: kind plus index in the matching index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export {
    pub kind: ExportKind,
    pub index: u32,
}

impl Export {
    /// The function this export refers to, if it is a function export.
    pub fn func(&self) -> Option<FuncIdx> {
        (self.kind == ExportKind::Func).then_some(FuncIdx(self.index))
    }
}

/// An import declaration, as written in the import section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub kind: ExportKind,
}

impl Module {
    /// Parse a WAT string into a module that has no imports.
    pub fn new(wat: &str) -> Result<Self, Error> {
        let bytes = wat::parse_str(wat).map_err(|e| Error::decode("<wat>", e))?;
        Self::from_bytes("<wat>", &bytes, &mut NoImports)
    }

    /// Create a module from raw WASM bytes, resolving imports through
    /// `resolver`.
    pub fn from_bytes(
        label: &str,
        bytes: &[u8],
        resolver: &mut dyn Resolve,
    ) -> Result<Self, Error> {
        parse(label, bytes.to_vec(), resolver)
    }

    /// File path or import name this module was loaded under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The export table, or `None` if the module has no export section.
    pub fn exports(&self) -> Option<&HashMap<String, Export>> {
        self.exports.as_ref()
    }

    /// Exact, case-sensitive export lookup.
    pub fn export(&self, name: &str) -> Option<Export> {
        self.exports.as_ref()?.get(name).copied()
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    /// Modules linked in to satisfy this module's imports.
    pub fn links(&self) -> &[Module] {
        &self.links
    }

    pub fn func_type(&self, func: FuncIdx) -> Option<&FuncType> {
        self.funcs.get(func.0 as usize).map(Func::ty)
    }

    pub(crate) fn get_func(&self, func: FuncIdx) -> Option<&Func> {
        self.funcs.get(func.0 as usize)
    }

    /// `(min, max)` pages of the memory this module defines or imports.
    pub(crate) fn memory_limits(&self) -> Option<(u64, Option<u64>)> {
        match self.memory.as_ref()? {
            MemoryDef::Local { min, max } => Some((*min, *max)),
            MemoryDef::Imported { link } => self.links.get(*link)?.memory_limits(),
        }
    }
}
