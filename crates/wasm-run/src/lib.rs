//! Load a WebAssembly module, resolve the modules it imports from disk,
//! optionally verify it, and invoke one of its exported functions.
//!
//! ```no_run
//! use wasm_run::{Driver, Engine, RunConfig};
//!
//! let mut driver = Driver::new(Engine::default(), RunConfig::new("prog.wasm"));
//! let report = driver.run(&mut std::io::stdout(), &mut std::io::stderr())?;
//! println!("{:?}", report.results);
//! # Ok::<(), wasm_run::Error>(())
//! ```

mod driver;
mod engine;
mod error;
mod instance;
mod interpreter;
mod module;
mod parse;
mod resolve;
mod validate;
mod value;

pub use driver::{Driver, Phase, Report, RunConfig, DEFAULT_ENTRY};
pub use engine::Engine;
pub use error::Error;
pub use instance::{Instance, InvokeMode};
pub use interpreter::Trap;
pub use module::{Export, ExportKind, Import, Module};
pub use parse::decode;
pub use parse::func::FuncIdx;
pub use resolve::{
    EntryId, FsResolver, NoImports, ResolutionContext, ResolutionEntry, ResolutionState, Resolve,
};
pub use validate::verify;
pub use value::{Returned, Val};
