use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wasm_run::{Driver, Engine, RunConfig, DEFAULT_ENTRY};

#[derive(Parser, Debug)]
#[command(name = "wasm-run", about = "Run a function exported by a WebAssembly module")]
struct Cli {
    /// Path to a .wasm module (or a .wat text module)
    file: PathBuf,

    /// Enable debug output from decoding and verification
    #[arg(short, long)]
    verbose: bool,

    /// Verify the module before running it
    #[arg(long)]
    verify_module: bool,

    /// Exported function to call
    #[arg(long, default_value = DEFAULT_ENTRY)]
    func_name: String,

    /// Directory imported modules are loaded from
    #[arg(long, default_value = ".")]
    import_dir: PathBuf,
}

/// Long options that are also accepted with a single dash.
const SINGLE_DASH_LONG: &[&str] = &["verify-module", "func-name", "import-dir", "verbose"];

/// Rewrite `-func-name main` style options to `--func-name main`.
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = text.strip_prefix('-').filter(|rest| !rest.starts_with('-')) else {
                return arg;
            };
            let name = rest.split('=').next().unwrap_or(rest);
            if SINGLE_DASH_LONG.contains(&name) {
                OsString::from(format!("--{rest}"))
            } else {
                arg
            }
        })
        .collect()
}

fn init_logging(verbose: bool) {
    let default = if verbose { "wasm_run=debug" } else { "wasm_run=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    init_logging(cli.verbose);
    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wasm-run: {err}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> anyhow::Result<()> {
    let config = RunConfig {
        path: cli.file,
        func_name: cli.func_name,
        verify: cli.verify_module,
        import_dir: cli.import_dir,
    };
    let mut driver = Driver::new(Engine::default(), config);
    driver.run(&mut io::stdout(), &mut io::stderr())?;
    Ok(())
}
