//! Import section handling: every import is satisfied by an export of a
//! module obtained from the resolver, and checked against it on the spot.

use tracing::debug;
use wasmparser::{ImportSectionReader, TypeRef};

use super::func::FuncIdx;
use super::ModuleBuilder;
use crate::module::{ExportKind, Func, GlobalDef, Import, MemoryDef};
use crate::resolve::Resolve;
use crate::Error;

impl ModuleBuilder {
    pub(super) fn parse_import_section(
        &mut self,
        reader: ImportSectionReader,
        resolver: &mut dyn Resolve,
    ) -> Result<(), Error> {
        for import in reader {
            let import = import.map_err(|e| self.err(e))?;
            let link = self.link(import.module, resolver)?;
            let kind = match import.ty {
                TypeRef::Func(_) => ExportKind::Func,
                TypeRef::Table(_) => ExportKind::Table,
                TypeRef::Memory(_) => ExportKind::Memory,
                TypeRef::Global(_) => ExportKind::Global,
                TypeRef::Tag(_) => ExportKind::Tag,
            };

            let linked = &self.links[link];
            let export = linked.export(import.name).ok_or_else(|| {
                self.err(format!(
                    "module `{}` has no export named `{}`",
                    import.module, import.name
                ))
            })?;
            if export.kind != kind {
                return Err(self.err(format!(
                    "import `{}.{}` expects a {kind}, found a {}",
                    import.module, import.name, export.kind
                )));
            }

            match import.ty {
                TypeRef::Func(type_idx) => {
                    let ty = self
                        .types
                        .get(type_idx as usize)
                        .cloned()
                        .ok_or_else(|| self.err(format!("type index {type_idx} out of bounds")))?;
                    let func = FuncIdx(export.index);
                    if linked.func_type(func) != Some(&ty) {
                        return Err(self.err(format!(
                            "import `{}.{}` has an incompatible signature",
                            import.module, import.name
                        )));
                    }
                    self.funcs.push(Func::Imported { link, func, ty });
                }
                TypeRef::Memory(memory) => {
                    if self.memory.is_some() {
                        return Err(self.err("multiple memories are not supported"));
                    }
                    let (min, max) = linked.memory_limits().ok_or_else(|| {
                        self.err(format!("module `{}` has no memory", import.module))
                    })?;
                    let max_fits = match (memory.maximum, max) {
                        (None, _) => true,
                        (Some(want), Some(have)) => have <= want,
                        (Some(_), None) => false,
                    };
                    if min < memory.initial || !max_fits {
                        return Err(self.err(format!(
                            "import `{}.{}` has incompatible memory limits",
                            import.module, import.name
                        )));
                    }
                    self.memory = Some(MemoryDef::Imported { link });
                }
                TypeRef::Global(global) => {
                    let def = linked.globals.get(export.index as usize).ok_or_else(|| {
                        self.err(format!("global index {} out of bounds", export.index))
                    })?;
                    if global.mutable || def.is_mutable() {
                        return Err(self.err(format!(
                            "import `{}.{}`: mutable globals cannot be imported",
                            import.module, import.name
                        )));
                    }
                    if def.ty() != global.content_type {
                        return Err(self.err(format!(
                            "import `{}.{}` has an incompatible global type",
                            import.module, import.name
                        )));
                    }
                    self.globals.push(GlobalDef::Imported {
                        link,
                        global: export.index,
                        ty: global.content_type,
                    });
                }
                TypeRef::Table(_) | TypeRef::Tag(_) => {
                    return Err(self.err(format!(
                        "import `{}.{}`: {kind} imports are not supported",
                        import.module, import.name
                    )));
                }
            }

            self.imports.push(Import {
                module: import.module.to_string(),
                name: import.name.to_string(),
                kind,
            });
        }
        Ok(())
    }

    /// Index of the linked module for `name`, resolving it on first use.
    fn link(&mut self, name: &str, resolver: &mut dyn Resolve) -> Result<usize, Error> {
        if let Some(&idx) = self.link_by_name.get(name) {
            return Ok(idx);
        }
        let module = resolver.resolve(name)?;
        debug!(importer = %self.label, import = name, "linked module");
        let idx = self.links.len();
        self.links.push(module);
        self.link_by_name.insert(name.to_string(), idx);
        Ok(idx)
    }
}
