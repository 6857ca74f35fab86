use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wasm_run::{Engine, Error, InvokeMode, Module, Trap, Val};

fn call(module: &Module, name: &str, args: &[Val]) -> Result<Vec<Val>, Error> {
    let mut instance = Engine::default().instantiate(module)?;
    instance.call_export(name, args, InvokeMode::CONVERT_FAULTS)
}

#[test]
fn return_const_i32() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (func (export "answer") (result i32)
                i32.const 42
            )
        )
    "#,
    )?;
    assert_eq!(call(&module, "answer", &[])?, vec![Val::I32(42)]);
    Ok(())
}

#[test]
fn multi_value_results_with_multiple_arguments() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32 i32)
                local.get 0
                local.get 1
                i32.add
                local.get 0
                local.get 1
                i32.sub
            )
        )
    "#,
    )?;
    let result = call(&module, "add", &[Val::I32(7), Val::I32(3)])?;
    assert_eq!(result, vec![Val::I32(10), Val::I32(4)]);
    Ok(())
}

#[test]
fn recursive_fibonacci() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (func $fib (export "fib") (param i64) (result i64)
                local.get 0
                i64.const 2
                i64.lt_u
                if (result i64)
                    local.get 0
                else
                    local.get 0
                    i64.const 1
                    i64.sub
                    call $fib
                    local.get 0
                    i64.const 2
                    i64.sub
                    call $fib
                    i64.add
                end
            )
        )
    "#,
    )?;
    assert_eq!(call(&module, "fib", &[Val::I64(20)])?, vec![Val::I64(6765)]);
    Ok(())
}

#[test]
fn memory_is_initialized_from_data_segments() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (memory 1)
            (data (i32.const 16) "\2a\00\00\00")
            (func (export "load") (result i32)
                i32.const 16
                i32.load
            )
            (func (export "roundtrip") (param i64) (result i64)
                i32.const 100
                local.get 0
                i64.store offset=4
                i32.const 104
                i64.load
            )
            (func (export "bytes") (result i32)
                i32.const 0
                i32.const -1
                i32.store8
                i32.const 0
                i32.load8_s
            )
        )
    "#,
    )?;
    assert_eq!(call(&module, "load", &[])?, vec![Val::I32(42)]);
    assert_eq!(call(&module, "roundtrip", &[Val::I64(-5)])?, vec![Val::I64(-5)]);
    assert_eq!(call(&module, "bytes", &[])?, vec![Val::I32(-1)]);
    Ok(())
}

#[test]
fn memory_grow_reports_old_size() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (memory 1 3)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow
            )
            (func (export "size") (result i32)
                memory.size
            )
        )
    "#,
    )?;
    let mut instance = Engine::default().instantiate(&module)?;
    let mode = InvokeMode::CONVERT_FAULTS;
    assert_eq!(instance.call_export("grow", &[Val::I32(2)], mode)?, vec![Val::I32(1)]);
    assert_eq!(instance.call_export("size", &[], mode)?, vec![Val::I32(3)]);
    assert_eq!(instance.call_export("grow", &[Val::I32(1)], mode)?, vec![Val::I32(-1)]);
    assert_eq!(instance.memory_pages(), Some(3));
    Ok(())
}

#[test]
fn globals_keep_state_between_calls() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (global $count (export "count") (mut i32) (i32.const 0))
            (func (export "bump") (result i32)
                global.get $count
                i32.const 1
                i32.add
                global.set $count
                global.get $count
            )
        )
    "#,
    )?;
    let mut instance = Engine::default().instantiate(&module)?;
    for expected in 1..=3 {
        let result = instance.call_export("bump", &[], InvokeMode::CONVERT_FAULTS)?;
        assert_eq!(result, vec![Val::I32(expected)]);
    }
    assert_eq!(instance.exported_global("count"), Some(Val::I32(3)));
    assert_eq!(instance.exported_global("bump"), None);
    Ok(())
}

#[test]
fn start_function_runs_during_instantiation() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (global $g (export "g") (mut i64) (i64.const 1))
            (func $init
                i64.const 99
                global.set $g
            )
            (start $init)
        )
    "#,
    )?;
    let instance = Engine::default().instantiate(&module)?;
    assert_eq!(instance.exported_global("g"), Some(Val::I64(99)));
    Ok(())
}

#[test]
fn trapping_start_function_fails_instantiation() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (func $init unreachable)
            (start $init)
        )
    "#,
    )?;
    let err = Engine::default().instantiate(&module).err().expect("instantiation should fail");
    assert!(matches!(err, Error::Instantiation { .. }), "{err}");
    assert!(err.to_string().contains("unreachable executed"), "{err}");
    Ok(())
}

#[test]
fn oversized_data_segment_fails_instantiation() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (memory 1)
            (data (i32.const 65535) "ab")
        )
    "#,
    )?;
    let err = Engine::default().instantiate(&module).err().expect("instantiation should fail");
    assert!(matches!(err, Error::Instantiation { .. }), "{err}");
    Ok(())
}

#[test]
fn call_indirect_dispatches_through_the_table() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (type $binop (func (param i32 i32) (result i32)))
            (table 4 funcref)
            (elem (i32.const 0) $add $sub $neg)
            (func $add (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)
            (func $sub (param i32 i32) (result i32) local.get 0 local.get 1 i32.sub)
            (func $neg (param i32) (result i32) i32.const 0 local.get 0 i32.sub)
            (func (export "apply") (param i32 i32 i32) (result i32)
                local.get 1
                local.get 2
                local.get 0
                call_indirect (type $binop)
            )
        )
    "#,
    )?;
    let args = |slot| [Val::I32(slot), Val::I32(10), Val::I32(4)];
    assert_eq!(call(&module, "apply", &args(0))?, vec![Val::I32(14)]);
    assert_eq!(call(&module, "apply", &args(1))?, vec![Val::I32(6)]);

    let err = call(&module, "apply", &args(2)).unwrap_err();
    assert!(matches!(err, Error::Runtime(Trap::IndirectCallTypeMismatch)), "{err}");
    let err = call(&module, "apply", &args(3)).unwrap_err();
    assert!(matches!(err, Error::Runtime(Trap::UninitializedElement)), "{err}");
    let err = call(&module, "apply", &args(9)).unwrap_err();
    assert!(matches!(err, Error::Runtime(Trap::UndefinedElement)), "{err}");
    Ok(())
}

#[test]
fn float_min_max_follow_wasm_rules() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (func (export "min") (param f64 f64) (result f64)
                local.get 0
                local.get 1
                f64.min
            )
            (func (export "nearest") (param f32) (result f32)
                local.get 0
                f32.nearest
            )
        )
    "#,
    )?;
    assert_eq!(call(&module, "min", &[Val::F64(1.5), Val::F64(-2.0)])?, vec![Val::F64(-2.0)]);
    let nan = call(&module, "min", &[Val::F64(f64::NAN), Val::F64(0.0)])?;
    assert!(matches!(nan[..], [Val::F64(v)] if v.is_nan()));
    assert_eq!(call(&module, "nearest", &[Val::F32(2.5)])?, vec![Val::F32(2.0)]);
    assert_eq!(call(&module, "nearest", &[Val::F32(3.5)])?, vec![Val::F32(4.0)]);
    Ok(())
}

#[test]
fn division_by_zero_is_a_runtime_fault() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"
        (module
            (func (export "main") (result i32)
                i32.const 1
                i32.const 0
                i32.div_u
            )
        )
    "#,
    )?;
    let err = call(&module, "main", &[]).unwrap_err();
    assert!(matches!(err, Error::Runtime(Trap::IntegerDivideByZero)));
    assert_eq!(
        err.to_string(),
        "could not execute requested function: integer divide by zero"
    );
    Ok(())
}

#[test]
#[should_panic(expected = "wasm trap: integer divide by zero")]
fn faults_panic_without_conversion() {
    let module = Module::new(
        r#"
        (module
            (func (export "main") (result i32)
                i32.const 1
                i32.const 0
                i32.rem_s
            )
        )
    "#,
    )
    .unwrap();
    let mut instance = Engine::default().instantiate(&module).unwrap();
    let _ = instance.call_export("main", &[], InvokeMode::PANIC_ON_FAULT);
}

#[test]
fn arguments_are_checked_against_the_signature() -> Result<(), anyhow::Error> {
    let module = Module::new(r#"(module (func (export "f") (param i32)))"#)?;
    let err = call(&module, "f", &[Val::I64(1)]).unwrap_err();
    assert!(matches!(err, Error::Call { func: 0, .. }), "{err}");
    let err = call(&module, "missing", &[]).unwrap_err();
    assert!(matches!(err, Error::ExportNotFound { ref name } if name == "missing"));
    Ok(())
}

#[test]
fn converting_faults_leaves_the_panic_hook_installed() -> Result<(), anyhow::Error> {
    let module = Module::new(
        r#"(module (func (export "main") (result i32) i32.const 1 i32.const 0 i32.div_s))"#,
    )?;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let prev_hook = panic::take_hook();
    panic::set_hook(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let err = call(&module, "main", &[]).unwrap_err();
    let unwound = panic::catch_unwind(|| panic!("after invoke"));
    let _ = panic::take_hook();
    panic::set_hook(prev_hook);

    assert!(matches!(err, Error::Runtime(Trap::IntegerDivideByZero)));
    assert!(unwound.is_err());
    assert!(seen.load(Ordering::SeqCst) >= 1);
    Ok(())
}
