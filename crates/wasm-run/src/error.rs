use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::interpreter::Trap;
use crate::module::ExportKind;

/// Every way a run can fail. All of them are fatal to the current run.
///
/// Errors raised while resolving an import carry the import's name in
/// `module`, so a failure deep in the import tree still says where it
/// came from.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not open module `{module}` ({}): {source}", .path.display())]
    Io {
        module: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode module `{module}`: {message}")]
    Decode { module: String, message: String },

    #[error("could not verify module `{module}`: {message}")]
    Validation { module: String, message: String },

    #[error("module `{module}` has no export section")]
    NoExports { module: String },

    #[error("could not find export function `{name}`")]
    ExportNotFound { name: String },

    #[error("export `{name}` is a {kind}, not a function")]
    NotAFunction { name: String, kind: ExportKind },

    #[error("entry point `{name}` takes {params} parameters; only zero-argument functions can be invoked")]
    Signature { name: String, params: usize },

    #[error("could not instantiate module `{module}`: {message}")]
    Instantiation { module: String, message: String },

    #[error("cannot call function {func}: {message}")]
    Call { func: u32, message: String },

    #[error("could not execute requested function: {0}")]
    Runtime(#[from] Trap),

    #[error("cyclic import: {chain}")]
    CyclicImport { chain: String },

    #[error("import `{name}` cannot be resolved: no resolver is available")]
    UnresolvedImport { name: String },

    #[error("could not write report: {0}")]
    Output(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn decode(module: &str, message: impl Display) -> Self {
        Error::Decode {
            module: module.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn instantiation(module: &str, message: impl Display) -> Self {
        Error::Instantiation {
            module: module.to_string(),
            message: message.to_string(),
        }
    }
}
