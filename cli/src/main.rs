mod backend;
mod logger;
mod runner;

use alg_host::{ArithOp, ExportSummary};
use anyhow::{bail, Context, Result};
use backend::{BackendKind, PreparedBackend};
use clap::{Parser, Subcommand};
use runner::{CheckOptions, Shutdown};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "alg-cli")]
#[command(version, about = "Inspect, call and property-check the alg WebAssembly module")]
struct Args {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a module and list its function exports
    Inspect {
        /// Path to a .wasm or .wat file
        wasm: PathBuf,

        /// Print the exports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call add or multiply once
    #[command(allow_negative_numbers = true)]
    Call {
        wasm: PathBuf,
        op: ArithOp,
        a: i32,
        b: i32,

        #[arg(long, value_enum, default_value_t = BackendKind::Wasmi)]
        backend: BackendKind,
    },
    /// Check reference, commutativity and identity properties
    Check {
        wasm: PathBuf,

        #[arg(long, value_enum, default_value_t = BackendKind::Wasmtime)]
        backend: BackendKind,

        /// Random pairs to check after the fixed inputs; 0 means no limit
        #[arg(long, default_value_t = 100_000)]
        samples: u64,

        #[arg(long, default_value_t = num_cpus::get())]
        cores: usize,

        /// Base seed for the random pairs (random when omitted)
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn load(path: &Path) -> Result<Vec<u8>> {
    let bytes = alg_host::load_module_bytes(path)
        .with_context(|| format!("loading {}", path.display()))?;
    alg_host::validate_wasm(&bytes).with_context(|| format!("validating {}", path.display()))?;
    tracing::debug!(path = %path.display(), len = bytes.len(), "module loaded");
    Ok(bytes)
}

fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn exports_json(exports: &[ExportSummary]) -> Result<String> {
    serde_json::to_string_pretty(exports).context("encoding exports")
}

/// Returns whether the arithmetic surface is complete.
fn inspect(path: &Path, json: bool) -> Result<bool> {
    let bytes = load(path)?;
    let exports = alg_host::list_function_exports(&bytes)?;
    let surface = alg_host::verify_export_surface(&bytes);

    if json {
        println!("{}", exports_json(&exports)?);
    } else {
        print_exports(path, &exports);
        match &surface {
            Ok(()) => println!("arithmetic surface: complete"),
            Err(err) => println!("arithmetic surface: incomplete ({err})"),
        }
    }

    Ok(surface.is_ok())
}

fn print_exports(path: &Path, exports: &[ExportSummary]) {
    println!("{}: {} function export(s)", path.display(), exports.len());
    for export in exports {
        let marker = if export.is_binary_i32() { "*" } else { " " };
        println!("  {marker} {export}");
    }
}

/// Returns whether the module agrees with the native reference.
fn call(path: &Path, op: ArithOp, a: i32, b: i32, kind: BackendKind) -> Result<bool> {
    let bytes = load(path)?;
    let mut backend = PreparedBackend::prepare(kind, &bytes)?.instantiate()?;
    let result = backend
        .call(op, a, b)
        .with_context(|| format!("calling {op}({a}, {b}) on {}", backend.name()))?;

    println!("{op}({a}, {b}) = {result}");
    let expected = op.reference(a, b);
    if result != expected {
        tracing::warn!(expected, result, "result differs from the native reference");
        return Ok(false);
    }
    Ok(true)
}

fn install_ctrlc(shutdown: Arc<Shutdown>) -> Result<()> {
    ctrlc::set_handler(move || {
        if !shutdown.request() {
            eprintln!("forcing exit on second Ctrl-C");
            std::process::exit(130);
        }
        tracing::warn!("shutdown requested, waiting for workers");
    })
    .context("installing ctrl-c handler")
}

/// Returns whether every property held.
fn check(
    path: &Path,
    kind: BackendKind,
    options: CheckOptions,
    shutdown: Arc<Shutdown>,
) -> Result<bool> {
    let bytes = load(path)?;
    alg_host::verify_export_surface(&bytes).context("checking export surface")?;
    let prepared = PreparedBackend::prepare(kind, &bytes)?;

    let outcome = runner::run(prepared, &options, shutdown)?;
    let report = &outcome.report;

    println!("backend: {kind:?}");
    println!("seed: {}", options.seed);
    println!("pairs checked: {}", report.pairs_checked);
    println!("calls made: {}", report.calls);
    println!("elapsed: {:.2}s", outcome.elapsed.as_secs_f64());
    if outcome.interrupted {
        println!("stopped early by Ctrl-C");
    }
    println!("violations: {}", report.violation_count);
    for violation in &report.violations {
        println!("  - {violation}");
    }
    let hidden = report.violation_count - report.violations.len() as u64;
    if hidden > 0 {
        println!("  ... and {hidden} more");
    }

    Ok(report.is_clean())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logger::init(args.verbose, args.json_logs);

    let passed = match args.command {
        Command::Inspect { wasm, json } => inspect(&wasm, json)?,
        Command::Call {
            wasm,
            op,
            a,
            b,
            backend,
        } => call(&wasm, op, a, b, backend)?,
        Command::Check {
            wasm,
            backend,
            samples,
            cores,
            seed,
            duration,
        } => {
            if cores == 0 {
                bail!("--cores must be at least 1");
            }
            let options = CheckOptions {
                samples,
                cores,
                seed: seed.unwrap_or_else(rand::random),
                duration: duration.map(Duration::from_secs),
            };
            let shutdown = Arc::new(Shutdown::new());
            install_ctrlc(shutdown.clone())?;
            check(&wasm, backend, options, shutdown)?
        }
    };
    Ok(exit_code(passed))
}
