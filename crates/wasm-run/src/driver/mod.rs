//! The run pipeline: open → decode → verify → locate export → instantiate
//! → invoke → report.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::Engine;
use crate::instance::InvokeMode;
use crate::module::Module;
use crate::parse::func::FuncIdx;
use crate::parse::{decode, parse};
use crate::resolve::{FsResolver, Resolve};
use crate::validate::verify;
use crate::value::{Returned, Val};
use crate::Error;

/// Entry point invoked when none is named.
pub const DEFAULT_ENTRY: &str = "main";

/// What to run and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Top-level module: a `.wasm` binary or a `.wat` text file.
    pub path: PathBuf,
    /// Export to invoke.
    pub func_name: String,
    /// Verify the top-level module before running it. Imports are always
    /// verified.
    pub verify: bool,
    /// Where imported modules are looked up.
    pub import_dir: PathBuf,
}

impl RunConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            func_name: DEFAULT_ENTRY.to_string(),
            verify: false,
            import_dir: PathBuf::from("."),
        }
    }
}

/// Pipeline phases, in the order a run goes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Start,
    Opened,
    Decoded,
    Verified,
    ExportResolved,
    Instantiated,
    Invoked,
    Reported,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub results: Vec<Val>,
    pub decode_time: Duration,
    pub invoke_time: Duration,
}

/// Runs one module once.
pub struct Driver<R: Resolve = FsResolver> {
    engine: Engine,
    config: RunConfig,
    resolver: R,
    phase: Phase,
}

impl Driver<FsResolver> {
    /// A driver that loads imports from `config.import_dir`.
    pub fn new(engine: Engine, config: RunConfig) -> Self {
        let label = label_for(&config.path);
        let resolver = FsResolver::new(&engine, &config.import_dir).with_root(&label, &config.path);
        Self::with_resolver(engine, config, resolver)
    }
}

impl<R: Resolve> Driver<R> {
    pub fn with_resolver(engine: Engine, config: RunConfig, resolver: R) -> Self {
        Self {
            engine,
            config,
            resolver,
            phase: Phase::Start,
        }
    }

    /// The last phase that completed. A failed run stops here; the
    /// phase after it is the one that failed.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    fn reach(&mut self, phase: Phase) {
        debug!(?phase, "phase complete");
        self.phase = phase;
    }

    /// Run the pipeline. The result line goes to `out` and the timing
    /// lines to `diag`, both only once the invocation has succeeded; a
    /// failed run writes nothing to either.
    pub fn run(&mut self, out: &mut dyn Write, diag: &mut dyn Write) -> Result<Report, Error> {
        let path = self.config.path.clone();
        let label = label_for(&path);

        let decode_start = Instant::now();
        let module = {
            let mut file = File::open(&path).map_err(|source| Error::Io {
                module: label.clone(),
                path: path.clone(),
                source,
            })?;
            self.reach(Phase::Opened);
            self.decode(&label, &path, &mut file)?
        };
        let decode_time = decode_start.elapsed();
        self.reach(Phase::Decoded);

        if self.config.verify {
            verify(&self.engine, &module)?;
            self.reach(Phase::Verified);
        }

        let func = self.locate_entry(&module)?;
        self.reach(Phase::ExportResolved);

        let mut instance = self.engine.instantiate(&module)?;
        self.reach(Phase::Instantiated);

        let invoke_start = Instant::now();
        let results = instance.invoke(func, InvokeMode::CONVERT_FAULTS)?;
        let invoke_time = invoke_start.elapsed();
        self.reach(Phase::Invoked);

        writeln!(out, "{}", Returned(&results)).map_err(Error::Output)?;
        writeln!(diag, "decode time: {decode_time:?}").map_err(Error::Output)?;
        writeln!(diag, "invoke time: {invoke_time:?}").map_err(Error::Output)?;
        self.reach(Phase::Reported);

        Ok(Report {
            results,
            decode_time,
            invoke_time,
        })
    }

    fn decode(&mut self, label: &str, path: &Path, file: &mut File) -> Result<Module, Error> {
        if path.extension().is_some_and(|ext| ext == "wat") {
            let mut source = Vec::new();
            file.read_to_end(&mut source).map_err(|source| Error::Io {
                module: label.to_string(),
                path: path.to_path_buf(),
                source,
            })?;
            let bytes = wat::parse_bytes(&source).map_err(|e| Error::decode(label, e))?;
            parse(label, bytes.into_owned(), &mut self.resolver)
        } else {
            decode(label, file, &mut self.resolver)
        }
    }

    /// Find the entry export and check it can be invoked without arguments.
    fn locate_entry(&self, module: &Module) -> Result<FuncIdx, Error> {
        let name = &self.config.func_name;
        let exports = module.exports().ok_or_else(|| Error::NoExports {
            module: module.label().to_string(),
        })?;
        let export = exports
            .get(name)
            .ok_or_else(|| Error::ExportNotFound { name: name.clone() })?;
        let func = export.func().ok_or_else(|| Error::NotAFunction {
            name: name.clone(),
            kind: export.kind,
        })?;
        let ty = module
            .func_type(func)
            .ok_or_else(|| Error::decode(module.label(), format!("export `{name}` refers to a missing function")))?;
        if !ty.params().is_empty() {
            return Err(Error::Signature {
                name: name.clone(),
                params: ty.params().len(),
            });
        }
        Ok(func)
    }
}

fn label_for(path: &Path) -> String {
    path.display().to_string()
}
