//! Arithmetic exports for a WebAssembly host.
//!
//! Built for `wasm32-unknown-unknown` this crate exports exactly two
//! functions, `add` and `multiply`, both `(i32, i32) -> i32`. Arithmetic is
//! two's complement and wraps on overflow in every build profile.
//!
//! ```
//! assert_eq!(alg::add(2, 3), 5);
//! assert_eq!(alg::multiply(4, 5), 20);
//! assert_eq!(alg::add(i32::MAX, 1), i32::MIN);
//! ```

#[no_mangle]
pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

#[no_mangle]
pub extern "C" fn multiply(a: i32, b: i32) -> i32 {
    a.wrapping_mul(b)
}
