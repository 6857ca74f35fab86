/// Float operations whose WASM semantics differ from Rust's `min`/`max`,
/// which ignore NaN and do not order signed zeros.
pub(super) trait Float: Copy + PartialOrd {
    const NAN: Self;
    fn is_nan(self) -> bool;
    fn is_zero(self) -> bool;
    fn is_sign_negative(self) -> bool;
}

impl Float for f32 {
    const NAN: Self = f32::NAN;
    fn is_nan(self) -> bool { self.is_nan() }
    fn is_zero(self) -> bool { self == 0.0 }
    fn is_sign_negative(self) -> bool { self.is_sign_negative() }
}

impl Float for f64 {
    const NAN: Self = f64::NAN;
    fn is_nan(self) -> bool { self.is_nan() }
    fn is_zero(self) -> bool { self == 0.0 }
    fn is_sign_negative(self) -> bool { self.is_sign_negative() }
}

/// WASM float min with NaN propagation and signed zero handling.
pub(super) fn wasm_min<F: Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        F::NAN
    } else if a.is_zero() && b.is_zero() {
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

/// WASM float max with NaN propagation and signed zero handling.
pub(super) fn wasm_max<F: Float>(a: F, b: F) -> F {
    if a.is_nan() || b.is_nan() {
        F::NAN
    } else if a.is_zero() && b.is_zero() {
        if a.is_sign_negative() { b } else { a }
    } else if a > b {
        a
    } else {
        b
    }
}
