pub(crate) mod memory;

use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use memory::{Memory, SharedMemory};

use crate::interpreter::{self, Trap};
use crate::module::{ConstExpr, ExportKind, GlobalDef, MemoryDef, Module};
use crate::parse::func::FuncIdx;
use crate::value::Val;
use crate::Error;

/// How an invocation treats runtime faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeMode {
    /// Turn traps and internal panics into [`Error::Runtime`]. When unset,
    /// a trap unwinds out of `invoke` as a panic.
    pub convert_faults: bool,
}

impl InvokeMode {
    pub const CONVERT_FAULTS: Self = Self {
        convert_faults: true,
    };
    pub const PANIC_ON_FAULT: Self = Self {
        convert_faults: false,
    };
}

impl Default for InvokeMode {
    fn default() -> Self {
        Self::CONVERT_FAULTS
    }
}

/// An instantiated WASM module.
///
/// Holds the mutable state of one run: memory, globals and the function
/// table, plus one child instance per linked module.
pub struct Instance<'m> {
    pub(crate) module: &'m Module,
    pub(crate) memory: Option<SharedMemory>,
    /// Raw global slots, imported globals first.
    pub(crate) globals: Vec<u64>,
    pub(crate) table: Vec<Option<u32>>,
    pub(crate) linked: Vec<Instance<'m>>,
}

impl<'m> Instance<'m> {
    /// Instantiate `module`: linked modules first, then memory, globals,
    /// the table, active segments and finally the start function.
    pub(crate) fn new(module: &'m Module) -> Result<Self, Error> {
        let linked = module
            .links
            .iter()
            .map(Instance::new)
            .collect::<Result<Vec<_>, _>>()?;

        let err = |message: String| Error::instantiation(&module.label, message);

        let memory = match &module.memory {
            None => None,
            Some(MemoryDef::Local { min, max }) => Some(Memory::new(*min, *max).map_err(err)?.shared()),
            Some(MemoryDef::Imported { link }) => {
                let memory = linked[*link].memory.clone().ok_or_else(|| {
                    err(format!("linked module `{}` has no memory", module.links[*link].label))
                })?;
                Some(memory)
            }
        };

        let mut instance = Self {
            module,
            memory,
            globals: Vec::with_capacity(module.globals.len()),
            table: Vec::new(),
            linked,
        };

        for global in &module.globals {
            let value = match global {
                GlobalDef::Imported { link, global, .. } => instance.linked[*link]
                    .globals
                    .get(*global as usize)
                    .copied()
                    .ok_or_else(|| err(format!("imported global {global} does not exist")))?,
                GlobalDef::Local { init, .. } => instance.eval_const(*init).map_err(err)?,
            };
            instance.globals.push(value);
        }

        if let Some(table) = &module.table {
            instance.table = vec![table.init; table.min as usize];
        }
        for (i, segment) in module.elements.iter().enumerate() {
            let offset = instance.eval_offset(segment.offset).map_err(err)?;
            let end = offset
                .checked_add(segment.items.len())
                .filter(|end| *end <= instance.table.len())
                .ok_or_else(|| err(format!("element segment {i} does not fit in the table")))?;
            instance.table[offset..end].copy_from_slice(&segment.items);
        }

        for (i, segment) in module.data.iter().enumerate() {
            let offset = instance.eval_offset(segment.offset).map_err(err)?;
            let memory = instance
                .memory
                .as_ref()
                .ok_or_else(|| err(format!("data segment {i} without a memory")))?;
            memory
                .borrow_mut()
                .store(offset as u64, &segment.bytes)
                .map_err(|_| err(format!("data segment {i} does not fit in memory")))?;
        }

        if let Some(start) = module.start {
            interpreter::call(&mut instance, start, &[])
                .map_err(|trap| err(format!("start function trapped: {trap}")))?;
        }

        debug!(module = %module.label, linked = instance.linked.len(), "instantiated module");
        Ok(instance)
    }

    fn eval_const(&self, expr: ConstExpr) -> Result<u64, String> {
        match expr {
            ConstExpr::I32(v) => Ok(v as u32 as u64),
            ConstExpr::I64(v) => Ok(v as u64),
            ConstExpr::F32(bits) => Ok(bits as u64),
            ConstExpr::F64(bits) => Ok(bits),
            ConstExpr::GlobalGet(idx) => self
                .globals
                .get(idx as usize)
                .copied()
                .ok_or_else(|| format!("constant expression reads undefined global {idx}")),
        }
    }

    fn eval_offset(&self, expr: ConstExpr) -> Result<usize, String> {
        Ok(self.eval_const(expr)? as u32 as usize)
    }

    /// Invoke a zero-argument function.
    pub fn invoke(&mut self, func: FuncIdx, mode: InvokeMode) -> Result<Vec<Val>, Error> {
        self.call(func, &[], mode)
    }

    /// Call a function by index with explicit arguments.
    pub fn call(&mut self, func: FuncIdx, args: &[Val], mode: InvokeMode) -> Result<Vec<Val>, Error> {
        let ty = self.module.func_type(func).ok_or_else(|| Error::Call {
            func: func.index(),
            message: "no such function".into(),
        })?;
        let arg_types: Vec<_> = args.iter().map(Val::ty).collect();
        if ty.params() != arg_types.as_slice() {
            return Err(Error::Call {
                func: func.index(),
                message: format!("expected arguments {:?}, got {:?}", ty.params(), arg_types),
            });
        }

        if !mode.convert_faults {
            return match interpreter::call(self, func, args) {
                Ok(results) => Ok(results),
                Err(trap) => panic!("wasm trap: {trap}"),
            };
        }

        // Traps are already values here; only a bug in the interpreter
        // unwinds. The process-wide panic hook is left alone.
        let result = panic::catch_unwind(AssertUnwindSafe(|| interpreter::call(self, func, args)));

        match result {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(trap)) => Err(Error::Runtime(trap)),
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "panic".to_string());
                Err(Error::Runtime(Trap::Panic(msg)))
            }
        }
    }

    /// Call an exported function by name.
    pub fn call_export(
        &mut self,
        name: &str,
        args: &[Val],
        mode: InvokeMode,
    ) -> Result<Vec<Val>, Error> {
        let export = self
            .module
            .export(name)
            .ok_or_else(|| Error::ExportNotFound { name: name.to_string() })?;
        let func = export.func().ok_or_else(|| Error::NotAFunction {
            name: name.to_string(),
            kind: export.kind,
        })?;
        self.call(func, args, mode)
    }

    /// Current value of an exported global.
    pub fn exported_global(&self, name: &str) -> Option<Val> {
        let export = self.module.export(name)?;
        if export.kind != ExportKind::Global {
            return None;
        }
        let raw = *self.globals.get(export.index as usize)?;
        let ty = self.module.globals.get(export.index as usize)?.ty();
        Val::from_bits(raw, &ty)
    }

    /// Size of linear memory in pages.
    pub fn memory_pages(&self) -> Option<u32> {
        Some(self.memory.as_ref()?.borrow().pages())
    }

    /// Copy `len` bytes of linear memory starting at `addr`.
    pub fn read_memory(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        let memory = self.memory.as_ref()?.borrow();
        memory.read(addr, len).ok().map(<[u8]>::to_vec)
    }

    /// Instance of the module linked under `name`.
    pub fn linked(&self, name: &str) -> Option<&Instance<'m>> {
        self.module
            .links
            .iter()
            .position(|link| link.label == name)
            .map(|idx| &self.linked[idx])
    }
}
