//! # alg-host
//!
//! Host-side tooling for the `alg` WebAssembly module, which exports two
//! functions, `add` and `multiply`, both with the signature
//! `(i32, i32) -> i32` and two's complement wraparound on overflow.
//!
//! The crate covers three concerns:
//!
//! 1. **Inspection** ([`inspect`]): validating a binary, listing its function
//!    exports and confirming the arithmetic surface is present with the right
//!    signatures.
//! 2. **Backends** ([`backend`]): calling `add`/`multiply` either natively
//!    (the `alg` crate linked as an rlib, used as the reference) or through
//!    the `wasmi` interpreter.
//! 3. **Properties** ([`properties`]): reference equality, commutativity and
//!    identity checks over boundary inputs and a deterministic pseudo-random
//!    stream of pairs.
//!
//! ## Example
//!
//! ```
//! use alg_host::{properties, InterpretedModule};
//!
//! let wasm = wat::parse_str(r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             local.get 0 local.get 1 i32.add)
//!         (func (export "multiply") (param i32 i32) (result i32)
//!             local.get 0 local.get 1 i32.mul))
//! "#).unwrap();
//!
//! alg_host::verify_export_surface(&wasm).unwrap();
//! let mut module = InterpretedModule::new(&wasm).unwrap();
//! let report = properties::run_checks(&mut module, 7, 500).unwrap();
//! assert!(report.is_clean());
//! ```

pub mod backend;
pub mod error;
pub mod inspect;
pub mod properties;

pub use backend::{ArithBackend, ArithOp, InterpretedModule, NativeBackend};
pub use error::{HostError, Result};
pub use inspect::{
    binary_i32_exports, has_start_function, list_function_exports, load_module_bytes,
    validate_wasm, verify_export_surface, ExportSummary,
};
pub use properties::{CheckReport, Property, SeedStream, Violation};
