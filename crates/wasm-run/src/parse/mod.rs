pub(crate) mod body;
pub(crate) mod func;
mod imports;

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use body::ParsedBody;
use func::{FuncIdx, ParsedFunction};
use tracing::{debug, trace};
use wasmparser::{
    ConstExpr as WasmConstExpr, DataKind, DataSectionReader, ElementItems, ElementKind,
    ElementSectionReader, Encoding, ExportSectionReader, FuncType, FunctionBody,
    FunctionSectionReader, GlobalSectionReader, MemorySectionReader, Operator, Parser, Payload,
    RefType, TableInit, TableSectionReader, TypeSectionReader, ValType,
};

use crate::module::{
    ConstExpr, DataSegment, ElemSegment, Export, Func, GlobalDef, Import, MemoryDef, Module,
    TableDef,
};
use crate::resolve::Resolve;
use crate::Error;

/// Decode a module from `reader`, resolving its imports through `resolver`.
///
/// The whole stream is read before parsing starts; the reader stays
/// borrowed for the duration of the call.
pub fn decode<R: Read>(
    label: &str,
    mut reader: R,
    resolver: &mut dyn Resolve,
) -> Result<Module, Error> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|source| Error::Io {
            module: label.to_string(),
            path: PathBuf::from(label),
            source,
        })?;
    parse(label, bytes, resolver)
}

pub(crate) fn parse(
    label: &str,
    bytes: Vec<u8>,
    resolver: &mut dyn Resolve,
) -> Result<Module, Error> {
    let mut builder = ModuleBuilder::new(label);
    let parser = Parser::new(0);
    for payload in parser.parse_all(&bytes) {
        let payload = payload.map_err(|e| Error::decode(label, e))?;
        builder.process_payload(payload, resolver)?;
    }
    let module = builder.build(bytes)?;
    debug!(
        module = label,
        funcs = module.funcs.len(),
        imports = module.imports.len(),
        links = module.links.len(),
        "decoded module"
    );
    Ok(module)
}

/// Accumulates parsed sections while walking through WASM payloads.
struct ModuleBuilder {
    label: String,
    types: Vec<FuncType>,
    funcs: Vec<Func>,
    /// Type indices of locally defined functions, from the function section.
    func_decls: Vec<u32>,
    globals: Vec<GlobalDef>,
    memory: Option<MemoryDef>,
    table: Option<TableDef>,
    elements: Vec<ElemSegment>,
    data: Vec<DataSegment>,
    start: Option<FuncIdx>,
    exports: Option<HashMap<String, Export>>,
    imports: Vec<Import>,
    links: Vec<Module>,
    /// Imported module name → index into `links`.
    link_by_name: HashMap<String, usize>,
    /// Number of code entries seen so far.
    code_idx: usize,
}

impl ModuleBuilder {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            types: Vec::new(),
            funcs: Vec::new(),
            func_decls: Vec::new(),
            globals: Vec::new(),
            memory: None,
            table: None,
            elements: Vec::new(),
            data: Vec::new(),
            start: None,
            exports: None,
            imports: Vec::new(),
            links: Vec::new(),
            link_by_name: HashMap::new(),
            code_idx: 0,
        }
    }

    fn err(&self, message: impl std::fmt::Display) -> Error {
        Error::decode(&self.label, message)
    }

    fn process_payload(
        &mut self,
        payload: Payload,
        resolver: &mut dyn Resolve,
    ) -> Result<(), Error> {
        match payload {
            Payload::Version { encoding, .. } => {
                if encoding != Encoding::Module {
                    return Err(self.err("components are not supported"));
                }
                Ok(())
            }
            Payload::TypeSection(reader) => self.parse_type_section(reader),
            Payload::ImportSection(reader) => self.parse_import_section(reader, resolver),
            Payload::FunctionSection(reader) => self.parse_function_section(reader),
            Payload::TableSection(reader) => self.parse_table_section(reader),
            Payload::MemorySection(reader) => self.parse_memory_section(reader),
            Payload::GlobalSection(reader) => self.parse_global_section(reader),
            Payload::ExportSection(reader) => self.parse_export_section(reader),
            Payload::StartSection { func, .. } => {
                self.start = Some(FuncIdx(func));
                Ok(())
            }
            Payload::ElementSection(reader) => self.parse_element_section(reader),
            Payload::DataSection(reader) => self.parse_data_section(reader),
            Payload::CodeSectionStart { count, .. } => {
                if count as usize != self.func_decls.len() {
                    return Err(self.err(
                        "function and code section have inconsistent lengths",
                    ));
                }
                Ok(())
            }
            Payload::CodeSectionEntry(body) => self.parse_body(body),
            Payload::TagSection(_) => Err(self.err("exception handling is not supported")),
            _ => Ok(()),
        }
    }

    fn parse_type_section(&mut self, reader: TypeSectionReader) -> Result<(), Error> {
        for ty in reader.into_iter_err_on_gc_types() {
            let ty = ty.map_err(|e| self.err(e))?;
            for val_type in ty.params().iter().chain(ty.results()) {
                self.check_val_type(val_type)?;
            }
            self.types.push(ty);
        }
        trace!(module = %self.label, types = self.types.len(), "type section");
        Ok(())
    }

    fn parse_function_section(&mut self, reader: FunctionSectionReader) -> Result<(), Error> {
        for type_idx in reader {
            let type_idx = type_idx.map_err(|e| self.err(e))?;
            if type_idx as usize >= self.types.len() {
                return Err(self.err(format!("type index {type_idx} out of bounds")));
            }
            self.func_decls.push(type_idx);
        }
        Ok(())
    }

    fn parse_table_section(&mut self, reader: TableSectionReader) -> Result<(), Error> {
        for table in reader {
            let table = table.map_err(|e| self.err(e))?;
            if self.table.is_some() {
                return Err(self.err("multiple tables are not supported"));
            }
            if table.ty.element_type != RefType::FUNCREF {
                return Err(self.err("only funcref tables are supported"));
            }
            let init = match table.init {
                TableInit::RefNull => None,
                TableInit::Expr(expr) => self.const_func_ref(&expr)?,
            };
            self.table = Some(TableDef {
                min: table.ty.initial as u64,
                max: table.ty.maximum.map(|max| max as u64),
                init,
            });
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, reader: MemorySectionReader) -> Result<(), Error> {
        for memory in reader {
            let memory = memory.map_err(|e| self.err(e))?;
            if self.memory.is_some() {
                return Err(self.err("multiple memories are not supported"));
            }
            if memory.memory64 || memory.shared {
                return Err(self.err("64-bit and shared memories are not supported"));
            }
            self.memory = Some(MemoryDef::Local {
                min: memory.initial,
                max: memory.maximum,
            });
        }
        Ok(())
    }

    fn parse_global_section(&mut self, reader: GlobalSectionReader) -> Result<(), Error> {
        for global in reader {
            let global = global.map_err(|e| self.err(e))?;
            self.check_val_type(&global.ty.content_type)?;
            let init = self.const_expr(&global.init_expr)?;
            self.globals.push(GlobalDef::Local {
                ty: global.ty.content_type,
                mutable: global.ty.mutable,
                init,
            });
        }
        Ok(())
    }

    fn parse_export_section(&mut self, reader: ExportSectionReader) -> Result<(), Error> {
        let mut exports = HashMap::new();
        for export in reader {
            let export = export.map_err(|e| self.err(e))?;
            let entry = Export {
                kind: export.kind.into(),
                index: export.index,
            };
            if exports.insert(export.name.to_string(), entry).is_some() {
                return Err(self.err(format!("duplicate export name `{}`", export.name)));
            }
        }
        self.exports = Some(exports);
        Ok(())
    }

    fn parse_element_section(&mut self, reader: ElementSectionReader) -> Result<(), Error> {
        for element in reader {
            let element = element.map_err(|e| self.err(e))?;
            let ElementKind::Active {
                table_index,
                offset_expr,
            } = element.kind
            else {
                // Passive and declared segments only matter to bulk ops.
                continue;
            };
            if table_index.unwrap_or(0) != 0 {
                return Err(self.err("element segments for tables other than 0"));
            }
            let offset = self.const_expr(&offset_expr)?;
            let mut items = Vec::new();
            match element.items {
                ElementItems::Functions(funcs) => {
                    for func in funcs {
                        items.push(Some(func.map_err(|e| self.err(e))?));
                    }
                }
                ElementItems::Expressions(_, exprs) => {
                    for expr in exprs {
                        let expr = expr.map_err(|e| self.err(e))?;
                        items.push(self.const_func_ref(&expr)?);
                    }
                }
            }
            self.elements.push(ElemSegment { offset, items });
        }
        Ok(())
    }

    fn parse_data_section(&mut self, reader: DataSectionReader) -> Result<(), Error> {
        for data in reader {
            let data = data.map_err(|e| self.err(e))?;
            let DataKind::Active {
                memory_index,
                offset_expr,
            } = data.kind
            else {
                continue;
            };
            if memory_index != 0 {
                return Err(self.err("data segments for memories other than 0"));
            }
            let offset = self.const_expr(&offset_expr)?;
            self.data.push(DataSegment {
                offset,
                bytes: data.data.to_vec(),
            });
        }
        Ok(())
    }

    fn parse_body(&mut self, body: FunctionBody) -> Result<(), Error> {
        let type_idx = *self
            .func_decls
            .get(self.code_idx)
            .ok_or_else(|| self.err("code entry without a function declaration"))?;
        self.code_idx += 1;
        let ty = self.types[type_idx as usize].clone();

        let mut locals: Vec<ValType> = ty.params().to_vec();
        let locals_reader = body.get_locals_reader().map_err(|e| self.err(e))?;
        for local in locals_reader {
            let (count, val_type) = local.map_err(|e| self.err(e))?;
            self.check_val_type(&val_type)?;
            locals.extend(std::iter::repeat(val_type).take(count as usize));
        }

        let parsed = ParsedBody::parse(&body, &self.types, ty.results().len() as u32)
            .map_err(|msg| {
                self.err(format!("function {}: {msg}", self.funcs.len()))
            })?;
        self.funcs.push(Func::Local(ParsedFunction {
            ty,
            locals: locals.into(),
            body: parsed,
        }));
        Ok(())
    }

    /// Reduce a constant expression to its single value-producing op.
    fn const_expr(&self, expr: &WasmConstExpr) -> Result<ConstExpr, Error> {
        let op = self.single_const_op(expr)?;
        match op {
            Operator::I32Const { value } => Ok(ConstExpr::I32(value)),
            Operator::I64Const { value } => Ok(ConstExpr::I64(value)),
            Operator::F32Const { value } => Ok(ConstExpr::F32(value.bits())),
            Operator::F64Const { value } => Ok(ConstExpr::F64(value.bits())),
            Operator::GlobalGet { global_index } => Ok(ConstExpr::GlobalGet(global_index)),
            other => Err(self.err(format!("unsupported constant expression `{other:?}`"))),
        }
    }

    /// Evaluate a `ref.func`/`ref.null` constant expression.
    fn const_func_ref(&self, expr: &WasmConstExpr) -> Result<Option<u32>, Error> {
        match self.single_const_op(expr)? {
            Operator::RefFunc { function_index } => Ok(Some(function_index)),
            Operator::RefNull { .. } => Ok(None),
            other => Err(self.err(format!("unsupported element expression `{other:?}`"))),
        }
    }

    fn single_const_op<'a>(&self, expr: &WasmConstExpr<'a>) -> Result<Operator<'a>, Error> {
        let mut reader = expr.get_operators_reader();
        let op = reader.read().map_err(|e| self.err(e))?;
        let end = reader.read().map_err(|e| self.err(e))?;
        if !matches!(end, Operator::End) || !reader.eof() {
            return Err(self.err("extended constant expressions are not supported"));
        }
        Ok(op)
    }

    fn check_val_type(&self, ty: &ValType) -> Result<(), Error> {
        match ty {
            ValType::I32 | ValType::I64 | ValType::F32 | ValType::F64 => Ok(()),
            other => Err(self.err(format!("unsupported value type `{other:?}`"))),
        }
    }

    fn build(self, bytes: Vec<u8>) -> Result<Module, Error> {
        if self.code_idx != self.func_decls.len() {
            return Err(self.err("function and code section have inconsistent lengths"));
        }
        Ok(Module {
            label: self.label,
            bytes: bytes.into_boxed_slice(),
            types: self.types,
            funcs: self.funcs,
            globals: self.globals,
            memory: self.memory,
            table: self.table,
            elements: self.elements,
            data: self.data,
            start: self.start,
            exports: self.exports,
            imports: self.imports,
            links: self.links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::NoImports;

    fn parse_wat(wat: &str) -> Result<Module, Error> {
        let bytes = wat::parse_str(wat).map_err(|e| Error::decode("test", e))?;
        parse("test", bytes, &mut NoImports)
    }

    #[test]
    fn no_export_section_is_distinct_from_empty() {
        let module = parse_wat("(module (func))").unwrap();
        assert!(module.exports().is_none());

        let module = parse_wat(r#"(module (func (export "main")))"#).unwrap();
        let exports = module.exports().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(module.export("main").and_then(|e| e.func()), Some(FuncIdx(0)));
        assert_eq!(module.export("Main"), None);
    }

    #[test]
    fn decodes_memory_globals_and_segments() {
        let module = parse_wat(
            r#"(module
                (memory 1 2)
                (global $g (mut i32) (i32.const 7))
                (table 2 funcref)
                (elem (i32.const 1) $f)
                (data (i32.const 8) "hi")
                (func $f)
                (start $f))"#,
        )
        .unwrap();
        assert!(matches!(module.memory, Some(MemoryDef::Local { min: 1, max: Some(2) })));
        assert_eq!(module.globals.len(), 1);
        assert!(module.globals[0].is_mutable());
        assert_eq!(module.elements[0].offset, ConstExpr::I32(1));
        assert_eq!(module.elements[0].items, vec![Some(0)]);
        assert_eq!(module.data[0].bytes, b"hi");
        assert_eq!(module.start, Some(FuncIdx(0)));
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        let err = parse("junk", b"\0asm\x01\0\0\0\x01".to_vec(), &mut NoImports).unwrap_err();
        assert!(matches!(err, Error::Decode { ref module, .. } if module == "junk"));
    }

    #[test]
    fn simd_is_rejected() {
        let err = parse_wat("(module (func (result v128) v128.const i64x2 0 0))").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "{err}");
    }

    #[test]
    fn imports_without_resolver_are_unresolved() {
        let err = parse_wat(r#"(module (import "dep" "f" (func)))"#).unwrap_err();
        assert!(matches!(err, Error::UnresolvedImport { ref name } if name == "dep"));
    }
}
