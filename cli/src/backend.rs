use alg_host::{ArithBackend, ArithOp, HostError, InterpretedModule};
use anyhow::{Context, Result};
use clap::ValueEnum;
use std::sync::Arc;
use wasmtime::{Config, Engine, Linker, Module, OptLevel, Store, TypedFunc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// wasmi interpreter, fuel-metered
    Wasmi,
    /// wasmtime with Cranelift, epoch-interrupted
    Wasmtime,
}

/// Epoch ticks a single call may span before it traps. With the runner's
/// 100 ms ticker this is about one second, far above any real call.
pub const CALL_DEADLINE_TICKS: u64 = 10;

pub fn create_engine() -> Result<Engine> {
    let mut config = Config::new();
    config.cranelift_opt_level(OptLevel::Speed);
    config.strategy(wasmtime::Strategy::Cranelift);
    config.epoch_interruption(true);
    Engine::new(&config).context("creating wasmtime engine")
}

/// A module compiled once and instantiated per worker.
#[derive(Clone)]
pub enum PreparedBackend {
    Wasmi(Arc<Vec<u8>>),
    Wasmtime { engine: Engine, module: Module },
}

impl PreparedBackend {
    pub fn prepare(kind: BackendKind, wasm_bytes: &[u8]) -> Result<Self> {
        match kind {
            BackendKind::Wasmi => Ok(Self::Wasmi(Arc::new(wasm_bytes.to_vec()))),
            BackendKind::Wasmtime => {
                // wasmtime runs start functions on instantiation; refuse them
                // up front like the wasmi backend does.
                if alg_host::has_start_function(wasm_bytes)? {
                    return Err(HostError::StartFunction.into());
                }
                let engine = create_engine()?;
                let module = Module::new(&engine, wasm_bytes).context("compiling module")?;
                Ok(Self::Wasmtime { engine, module })
            }
        }
    }

    pub fn instantiate(&self) -> Result<Box<dyn ArithBackend>> {
        match self {
            Self::Wasmi(bytes) => Ok(Box::new(
                InterpretedModule::new(bytes).context("instantiating module on wasmi")?,
            )),
            Self::Wasmtime { engine, module } => {
                Ok(Box::new(CompiledModule::new(engine, module)?))
            }
        }
    }

    /// Engine whose epoch has to be ticked for call deadlines to fire.
    pub fn epoch_engine(&self) -> Option<Engine> {
        match self {
            Self::Wasmi(_) => None,
            Self::Wasmtime { engine, .. } => Some(engine.clone()),
        }
    }
}

pub struct CompiledModule {
    store: Store<()>,
    add: TypedFunc<(i32, i32), i32>,
    multiply: TypedFunc<(i32, i32), i32>,
}

impl CompiledModule {
    pub fn new(engine: &Engine, module: &Module) -> Result<Self> {
        let mut store = Store::new(engine, ());
        store.set_epoch_deadline(CALL_DEADLINE_TICKS);
        let linker = Linker::<()>::new(engine);
        let instance = linker
            .instantiate(&mut store, module)
            .context("instantiating module")?;

        let add = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, ArithOp::Add.export_name())
            .context("resolving function add")?;
        let multiply = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, ArithOp::Multiply.export_name())
            .context("resolving function multiply")?;

        Ok(Self {
            store,
            add,
            multiply,
        })
    }
}

impl ArithBackend for CompiledModule {
    fn name(&self) -> &'static str {
        "wasmtime"
    }

    fn call(&mut self, op: ArithOp, a: i32, b: i32) -> alg_host::Result<i32> {
        self.store.set_epoch_deadline(CALL_DEADLINE_TICKS);
        let func = match op {
            ArithOp::Add => &self.add,
            ArithOp::Multiply => &self.multiply,
        };
        func.call(&mut self.store, (a, b))
            .map_err(|e| HostError::Trap {
                export: op.export_name(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ALG_WAT: &str = r#"
        (module
          (func (export "add") (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)
          (func (export "multiply") (param i32 i32) (result i32) local.get 0 local.get 1 i32.mul))
    "#;

    #[test]
    fn test_both_backends_agree() {
        let wasm = wat::parse_str(ALG_WAT).unwrap();
        for kind in [BackendKind::Wasmi, BackendKind::Wasmtime] {
            let prepared = PreparedBackend::prepare(kind, &wasm).unwrap();
            let mut backend = prepared.instantiate().unwrap();
            assert_eq!(backend.call(ArithOp::Add, 2, 3).unwrap(), 5);
            assert_eq!(backend.call(ArithOp::Multiply, 4, 5).unwrap(), 20);
            assert_eq!(
                backend.call(ArithOp::Multiply, 65_536, 65_536).unwrap(),
                0
            );
        }
    }

    #[test]
    fn test_epoch_engine_only_for_wasmtime() {
        let wasm = wat::parse_str(ALG_WAT).unwrap();
        let wasmi = PreparedBackend::prepare(BackendKind::Wasmi, &wasm).unwrap();
        let wasmtime = PreparedBackend::prepare(BackendKind::Wasmtime, &wasm).unwrap();
        assert!(wasmi.epoch_engine().is_none());
        assert!(wasmtime.epoch_engine().is_some());
    }

    #[test]
    fn test_compiled_trap_is_mapped() {
        let wasm = wat::parse_str(
            r#"(module
                 (func (export "add") (param i32 i32) (result i32) unreachable)
                 (func (export "multiply") (param i32 i32) (result i32) local.get 0))"#,
        )
        .unwrap();
        let engine = create_engine().unwrap();
        let module = Module::new(&engine, &wasm).unwrap();
        let mut compiled = CompiledModule::new(&engine, &module).unwrap();
        assert!(matches!(
            compiled.call(ArithOp::Add, 1, 1),
            Err(HostError::Trap { export: "add", .. })
        ));
        assert_eq!(compiled.call(ArithOp::Multiply, 9, 2).unwrap(), 9);
    }

    #[test]
    fn test_epoch_deadline_interrupts_runaway_call() {
        let wasm = wat::parse_str(
            r#"(module
                 (func (export "add") (param i32 i32) (result i32)
                   (loop $spin (br $spin))
                   i32.const 0)
                 (func (export "multiply") (param i32 i32) (result i32) local.get 0))"#,
        )
        .unwrap();
        let engine = create_engine().unwrap();
        let module = Module::new(&engine, &wasm).unwrap();
        let mut compiled = CompiledModule::new(&engine, &module).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let ticker = {
            let engine = engine.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    engine.increment_epoch();
                }
            })
        };
        let result = compiled.call(ArithOp::Add, 1, 1);
        done.store(true, Ordering::SeqCst);
        ticker.join().unwrap();
        assert!(matches!(result, Err(HostError::Trap { export: "add", .. })));
    }

    #[test]
    fn test_single_tick_does_not_interrupt_calls() {
        let wasm = wat::parse_str(ALG_WAT).unwrap();
        let engine = create_engine().unwrap();
        let module = Module::new(&engine, &wasm).unwrap();
        let mut compiled = CompiledModule::new(&engine, &module).unwrap();

        for i in 0..3 * CALL_DEADLINE_TICKS as i32 {
            engine.increment_epoch();
            assert_eq!(compiled.call(ArithOp::Add, i, 1).unwrap(), i + 1);
        }
    }

    #[test]
    fn test_start_function_refused_by_both_backends() {
        let wasm = wat::parse_str(
            r#"(module
                 (func $init)
                 (start $init)
                 (func (export "add") (param i32 i32) (result i32) local.get 0 local.get 1 i32.add)
                 (func (export "multiply") (param i32 i32) (result i32) local.get 0 local.get 1 i32.mul))"#,
        )
        .unwrap();

        let err = PreparedBackend::prepare(BackendKind::Wasmtime, &wasm)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<HostError>(),
            Some(HostError::StartFunction)
        ));

        let prepared = PreparedBackend::prepare(BackendKind::Wasmi, &wasm).unwrap();
        let err = prepared.instantiate().err().unwrap();
        assert!(matches!(
            err.downcast_ref::<HostError>(),
            Some(HostError::StartFunction)
        ));
    }
}
