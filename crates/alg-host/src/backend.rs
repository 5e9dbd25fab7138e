//! Ways of invoking `add` and `multiply`.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use wasmi::{Config, Engine, Instance, Linker, Module, Store, TypedFunc};

use crate::error::{HostError, Result};
use crate::inspect::{check_magic, has_start_function, render_signature};

/// Instructions an interpreted call may execute before it traps.
pub const CALL_FUEL: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ArithOp {
    Add,
    Multiply,
}

impl ArithOp {
    pub const ALL: [ArithOp; 2] = [ArithOp::Add, ArithOp::Multiply];

    pub fn export_name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Multiply => "multiply",
        }
    }

    /// Result computed by the native `alg` crate.
    pub fn reference(self, a: i32, b: i32) -> i32 {
        match self {
            ArithOp::Add => alg::add(a, b),
            ArithOp::Multiply => alg::multiply(a, b),
        }
    }

    /// The right operand that leaves the left one unchanged.
    pub fn identity(self) -> i32 {
        match self {
            ArithOp::Add => 0,
            ArithOp::Multiply => 1,
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.export_name())
    }
}

impl FromStr for ArithOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(ArithOp::Add),
            "multiply" | "mul" => Ok(ArithOp::Multiply),
            other => Err(format!("unknown operation `{other}` (expected add or multiply)")),
        }
    }
}

pub trait ArithBackend {
    fn name(&self) -> &'static str;

    fn call(&mut self, op: ArithOp, a: i32, b: i32) -> Result<i32>;
}

/// Calls straight into the linked `alg` crate. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl ArithBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn call(&mut self, op: ArithOp, a: i32, b: i32) -> Result<i32> {
        Ok(op.reference(a, b))
    }
}

/// A module instance running on the `wasmi` interpreter.
///
/// The instance is created with an empty linker, so modules importing
/// anything are rejected, as are modules declaring a start function. Each
/// call is metered with [`CALL_FUEL`].
pub struct InterpretedModule {
    store: Store<()>,
    add: TypedFunc<(i32, i32), i32>,
    multiply: TypedFunc<(i32, i32), i32>,
}

impl InterpretedModule {
    pub fn new(wasm_bytes: &[u8]) -> Result<Self> {
        check_magic(wasm_bytes)?;
        if has_start_function(wasm_bytes)? {
            return Err(HostError::StartFunction);
        }

        let mut config = Config::default();
        config.consume_fuel(true);
        let engine = Engine::new(&config);
        let mut store = Store::new(&engine, ());
        store
            .set_fuel(CALL_FUEL)
            .map_err(|e| HostError::Instantiate(e.to_string()))?;

        let module =
            Module::new(&engine, wasm_bytes).map_err(|e| HostError::Parse(e.to_string()))?;
        let linker = Linker::<()>::new(&engine);

        let instance = linker
            .instantiate_and_start(&mut store, &module)
            .map_err(|e| HostError::Instantiate(e.to_string()))?;

        let add = resolve(&instance, &store, ArithOp::Add)?;
        let multiply = resolve(&instance, &store, ArithOp::Multiply)?;
        tracing::debug!(len = wasm_bytes.len(), "instantiated module on wasmi");

        Ok(Self {
            store,
            add,
            multiply,
        })
    }
}

fn resolve(
    instance: &Instance,
    store: &Store<()>,
    op: ArithOp,
) -> Result<TypedFunc<(i32, i32), i32>> {
    let export = op.export_name();
    let func = instance
        .get_func(store, export)
        .ok_or(HostError::MissingExport(export))?;
    func.typed::<(i32, i32), i32>(store).map_err(|_| {
        let ty = func.ty(store);
        HostError::SignatureMismatch {
            export,
            found: render_signature(ty.params(), ty.results()),
        }
    })
}

impl ArithBackend for InterpretedModule {
    fn name(&self) -> &'static str {
        "wasmi"
    }

    fn call(&mut self, op: ArithOp, a: i32, b: i32) -> Result<i32> {
        let trap = |e: wasmi::Error| HostError::Trap {
            export: op.export_name(),
            message: e.to_string(),
        };
        self.store.set_fuel(CALL_FUEL).map_err(trap)?;
        let func = match op {
            ArithOp::Add => &self.add,
            ArithOp::Multiply => &self.multiply,
        };
        func.call(&mut self.store, (a, b)).map_err(trap)
    }
}
