use wasmparser::{Validator, WasmFeatures};

use crate::instance::Instance;
use crate::module::Module;
use crate::Error;

/// Shared configuration: the feature set modules are verified against.
#[derive(Debug, Clone)]
pub struct Engine {
    features: WasmFeatures,
}

impl Engine {
    /// Create a new validator with the engine's features.
    pub fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.features)
    }

    /// Build a runnable instance of `module` and of everything it links.
    pub fn instantiate<'m>(&self, module: &'m Module) -> Result<Instance<'m>, Error> {
        Instance::new(module)
    }
}

impl Default for Engine {
    fn default() -> Self {
        // Proposals the interpreter does not implement.
        let mut features = WasmFeatures::default();
        features.set(WasmFeatures::SIMD, false);
        features.set(WasmFeatures::RELAXED_SIMD, false);
        features.set(WasmFeatures::THREADS, false);
        features.set(WasmFeatures::MULTI_MEMORY, false);
        features.set(WasmFeatures::MEMORY64, false);
        features.set(WasmFeatures::EXCEPTIONS, false);
        features.set(WasmFeatures::TAIL_CALL, false);
        features.set(WasmFeatures::GC, false);
        features.set(WasmFeatures::COMPONENT_MODEL, false);
        features.set(WasmFeatures::BULK_MEMORY, false);
        features.set(WasmFeatures::REFERENCE_TYPES, false);
        features.set(WasmFeatures::FUNCTION_REFERENCES, false);
        features.set(WasmFeatures::EXTENDED_CONST, false);
        Self { features }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_rejects_what_the_decoder_rejects() {
        let cases = [
            "(module (memory 1) (func i32.const 0 i32.const 0 i32.const 0 memory.fill))",
            "(module (func (result funcref) ref.null func))",
            "(module (global i32 (i32.add (i32.const 1) (i32.const 2))))",
            "(module (func (param v128)))",
        ];
        for wat in cases {
            let bytes = wat::parse_str(wat).unwrap();
            assert!(Engine::default().new_validator().validate_all(&bytes).is_err(), "{wat}");
            assert!(Module::new(wat).is_err(), "{wat}");
        }
    }
}
