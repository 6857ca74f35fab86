mod common;

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::{contains, starts_with};
use tempfile::tempdir;

use common::{write_module, write_modules};

fn wasm_run() -> Command {
    let mut cmd = Command::cargo_bin("wasm-run").expect("wasm-run binary");
    cmd.env_remove("RUST_LOG");
    cmd
}

const PROGRAM: &str = r#"
    (module
        (func (export "main") (result i32) i32.const 42)
        (func (export "other") (result i64) i64.const -7)
        (func (export "crash") (result i32) i32.const 1 i32.const 0 i32.div_u)
        (func $bad (result i32) i64.const 0)
    )
"#;

#[test]
fn runs_main_by_default() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "prog", PROGRAM);

    wasm_run()
        .current_dir(dir.path())
        .arg("prog.wasm")
        .assert()
        .success()
        .stdout("42 (i32)\n")
        .stderr(contains("decode time: ").and(contains("invoke time: ")));
}

#[test]
fn func_name_selects_the_export() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "prog", PROGRAM);

    for flag in ["-func-name", "--func-name"] {
        wasm_run()
            .current_dir(dir.path())
            .args([flag, "other", "prog.wasm"])
            .assert()
            .success()
            .stdout("-7 (i64)\n");
    }
}

#[test]
fn verify_module_rejects_invalid_code() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "prog", PROGRAM);

    wasm_run()
        .current_dir(dir.path())
        .args(["-verify-module", "prog.wasm"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(starts_with("wasm-run: could not verify module"));
}

#[test]
fn verbose_logs_decoding() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "prog", PROGRAM);

    wasm_run()
        .current_dir(dir.path())
        .args(["-v", "prog.wasm"])
        .assert()
        .success()
        .stderr(contains("decoded module"));
}

#[test]
fn missing_module_exits_with_failure() {
    let dir = tempdir().expect("tempdir");

    wasm_run()
        .current_dir(dir.path())
        .arg("nope.wasm")
        .assert()
        .code(1)
        .stdout("")
        .stderr(starts_with("wasm-run: could not open module"));
}

#[test]
fn runtime_fault_exits_with_failure() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "prog", PROGRAM);

    wasm_run()
        .current_dir(dir.path())
        .args(["-func-name", "crash", "prog.wasm"])
        .assert()
        .code(1)
        .stdout("")
        .stderr("wasm-run: could not execute requested function: integer divide by zero\n");
}

#[test]
fn unknown_export_is_reported() {
    let dir = tempdir().expect("tempdir");
    write_module(dir.path(), "prog", PROGRAM);

    wasm_run()
        .current_dir(dir.path())
        .args(["--func-name", "absent", "prog.wasm"])
        .assert()
        .code(1)
        .stderr("wasm-run: could not find export function `absent`\n");
}

#[test]
fn missing_arguments_are_a_usage_error() {
    wasm_run().assert().code(2).stderr(contains("Usage"));
}

#[test]
fn imports_load_from_the_working_directory() {
    let dir = tempdir().expect("tempdir");
    let libs = dir.path().join("libs");
    std::fs::create_dir(&libs).expect("create libs");
    write_modules(
        dir.path(),
        &[
            ("lib", r#"(module (func (export "six") (result i32) i32.const 6))"#),
            (
                "app",
                r#"(module
                    (import "lib" "six" (func $six (result i32)))
                    (func (export "main") (result i32) call $six i32.const 7 i32.mul))"#,
            ),
        ],
    );

    wasm_run()
        .current_dir(dir.path())
        .arg("app.wasm")
        .assert()
        .success()
        .stdout("42 (i32)\n");

    // An import directory without the library cannot satisfy the import.
    wasm_run()
        .current_dir(dir.path())
        .args(["-import-dir", "libs", "app.wasm"])
        .assert()
        .code(1)
        .stderr(contains("could not open module `lib`"));
}
