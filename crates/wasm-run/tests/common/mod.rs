use std::fs;
use std::path::{Path, PathBuf};

/// Assemble `wat` and write it to `<dir>/<name>.wasm`.
// Not every test crate writes modules to disk.
#[allow(dead_code)]
pub fn write_module(dir: &Path, name: &str, wat: &str) -> PathBuf {
    let bytes = wat::parse_str(wat).unwrap_or_else(|err| panic!("assemble {name}: {err}"));
    let path = dir.join(format!("{name}.wasm"));
    fs::write(&path, bytes).unwrap_or_else(|err| panic!("write {}: {err}", path.display()));
    path
}

#[allow(dead_code)]
pub fn write_modules(dir: &Path, modules: &[(&str, &str)]) {
    for (name, wat) in modules {
        write_module(dir, name, wat);
    }
}
