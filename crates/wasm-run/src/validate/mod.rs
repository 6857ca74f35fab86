use tracing::debug;

use crate::engine::Engine;
use crate::module::Module;
use crate::Error;

/// Check `module` against the WebAssembly validation rules.
///
/// Only the module itself is checked; its linked imports were verified
/// when they were resolved. Each call starts from a fresh validator, so
/// verifying twice gives the same answer.
pub fn verify(engine: &Engine, module: &Module) -> Result<(), Error> {
    engine
        .new_validator()
        .validate_all(&module.bytes)
        .map_err(|e| Error::Validation {
            module: module.label.clone(),
            message: e.to_string(),
        })?;
    debug!(module = %module.label, "verified module");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_typed_module_verifies_repeatedly() {
        let engine = Engine::default();
        let module = Module::new(r#"(module (func (export "main") (result i32) i32.const 1))"#)
            .unwrap();
        verify(&engine, &module).unwrap();
        verify(&engine, &module).unwrap();
    }

    #[test]
    fn type_errors_are_caught() {
        // Decodes fine: the decoder does not type-check bodies.
        let module = Module::new(r#"(module (func (export "main") (result i32) i64.const 1))"#)
            .unwrap();
        let err = verify(&Engine::default(), &module).unwrap_err();
        assert!(matches!(err, Error::Validation { ref module, .. } if module == "<wat>"));
        assert!(err.to_string().contains("type mismatch"), "{err}");
    }
}
