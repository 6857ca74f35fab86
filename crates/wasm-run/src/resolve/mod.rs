//! Import resolution: turning an imported module name into a decoded,
//! verified [`Module`].

mod context;

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

pub use context::{EntryId, ResolutionContext, ResolutionEntry, ResolutionState};

use crate::engine::Engine;
use crate::module::Module;
use crate::parse::parse;
use crate::validate::verify;
use crate::Error;

/// Capability handed to the decoder for loading imported modules.
///
/// The decoder calls `resolve` once for every distinct module name a
/// module imports from, before that module's decoding completes.
pub trait Resolve {
    fn resolve(&mut self, name: &str) -> Result<Module, Error>;
}

/// Resolver for modules that must not import anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoImports;

impl Resolve for NoImports {
    fn resolve(&mut self, name: &str) -> Result<Module, Error> {
        Err(Error::UnresolvedImport {
            name: name.to_string(),
        })
    }
}

/// Loads imports from `<dir>/<name>.wasm`.
///
/// Every imported module is decoded with this same resolver, so its own
/// imports are loaded recursively, and is always verified. Nothing is
/// cached: a name imported from two places is loaded twice.
pub struct FsResolver {
    engine: Engine,
    dir: PathBuf,
    context: ResolutionContext,
}

impl FsResolver {
    pub const EXTENSION: &'static str = "wasm";

    pub fn new(engine: &Engine, dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.clone(),
            dir: dir.into(),
            context: ResolutionContext::new(),
        }
    }

    /// Register the top-level module, so an import that leads back to it
    /// is reported as a cycle.
    pub fn with_root(mut self, label: &str, path: &Path) -> Self {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.context = ResolutionContext::with_root(label, &canonical);
        self
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// Path an import named `name` is loaded from.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", Self::EXTENSION))
    }

    fn read(&self, name: &str, path: &Path) -> Result<(PathBuf, Vec<u8>), Error> {
        let io = |source: std::io::Error| Error::Io {
            module: name.to_string(),
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(io)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(io)?;
        let canonical = fs::canonicalize(path).map_err(io)?;
        Ok((canonical, bytes))
    }

    fn load(&mut self, name: &str, bytes: Vec<u8>) -> Result<Module, Error> {
        let module = parse(name, bytes, self)?;
        verify(&self.engine, &module)?;
        Ok(module)
    }
}

impl Resolve for FsResolver {
    fn resolve(&mut self, name: &str) -> Result<Module, Error> {
        let path = self.path_for(name);
        debug!(import = name, path = %path.display(), "resolving import");
        let (canonical, bytes) = self.read(name, &path)?;

        let id = self.context.enter(name, &canonical)?;
        let result = self.load(name, bytes);
        self.context.leave(id, result.is_ok());
        result
    }
}
