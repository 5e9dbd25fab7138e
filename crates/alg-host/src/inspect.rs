//! Validation and export introspection of wasm binaries.

use std::fmt;
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use wasmi::{Engine, Module, ValType};

use crate::backend::ArithOp;
use crate::error::{HostError, Result};

pub const WASM_MAGIC: &[u8; 4] = b"\0asm";
const HEADER_LEN: usize = 8;
const START_SECTION_ID: u8 = 8;

/// A function export and its signature, value types rendered in wat syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExportSummary {
    pub name: String,
    pub params: Vec<String>,
    pub results: Vec<String>,
}

impl ExportSummary {
    fn new(name: &str, params: &[ValType], results: &[ValType]) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(val_type_name).collect(),
            results: results.iter().map(val_type_name).collect(),
        }
    }

    /// Whether the export is shaped `(i32, i32) -> i32`.
    pub fn is_binary_i32(&self) -> bool {
        self.params == ["i32", "i32"] && self.results == ["i32"]
    }

    pub fn signature(&self) -> String {
        format!("({}) -> {}", self.params.join(", "), render_results(&self.results))
    }
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.signature())
    }
}

fn render_results(results: &[String]) -> String {
    match results {
        [] => "()".to_string(),
        [single] => single.clone(),
        many => format!("({})", many.join(", ")),
    }
}

fn val_type_name(ty: &ValType) -> String {
    let name = match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::FuncRef => "funcref",
        ValType::ExternRef => "externref",
        #[allow(unreachable_patterns)]
        _ => "v128",
    };
    name.to_string()
}

pub(crate) fn render_signature(params: &[ValType], results: &[ValType]) -> String {
    ExportSummary::new("", params, results).signature()
}

fn parse_module(bytes: &[u8]) -> Result<Module> {
    let engine = Engine::default();
    Module::new(&engine, bytes).map_err(|e| HostError::Parse(e.to_string()))
}

pub(crate) fn check_magic(bytes: &[u8]) -> Result<()> {
    if bytes.len() < 4 || &bytes[0..4] != WASM_MAGIC {
        return Err(HostError::InvalidMagic);
    }
    Ok(())
}

pub fn validate_wasm(bytes: &[u8]) -> Result<()> {
    check_magic(bytes)?;
    parse_module(bytes)?;
    Ok(())
}

fn read_var_u32(bytes: &[u8], pos: &mut usize) -> Option<u32> {
    let mut value = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*pos)?;
        *pos += 1;
        if shift >= 32 {
            return None;
        }
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
}

/// Whether the module declares a start function, found by walking the
/// top-level section headers.
pub fn has_start_function(bytes: &[u8]) -> Result<bool> {
    check_magic(bytes)?;
    let truncated = || HostError::Parse("truncated section header".to_string());

    let mut pos = HEADER_LEN;
    while pos < bytes.len() {
        let id = bytes[pos];
        pos += 1;
        if id == START_SECTION_ID {
            return Ok(true);
        }
        let size = read_var_u32(bytes, &mut pos).ok_or_else(truncated)?;
        pos = pos
            .checked_add(size as usize)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(truncated)?;
    }
    Ok(false)
}

/// Every function export of the module, sorted by name.
pub fn list_function_exports(bytes: &[u8]) -> Result<Vec<ExportSummary>> {
    check_magic(bytes)?;
    let module = parse_module(bytes)?;

    let mut exports: Vec<ExportSummary> = module
        .exports()
        .filter_map(|export| {
            let func_ty = export.ty().func()?;
            Some(ExportSummary::new(
                export.name(),
                func_ty.params(),
                func_ty.results(),
            ))
        })
        .collect();

    exports.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(count = exports.len(), "listed function exports");
    Ok(exports)
}

/// Names of exports shaped `(i32, i32) -> i32`.
pub fn binary_i32_exports(bytes: &[u8]) -> Result<Vec<String>> {
    let mut names: Vec<String> = list_function_exports(bytes)?
        .into_iter()
        .filter(ExportSummary::is_binary_i32)
        .map(|export| export.name)
        .collect();
    names.dedup();
    Ok(names)
}

/// Confirms `add` and `multiply` are both exported as `(i32, i32) -> i32`.
/// Other exports are ignored.
pub fn verify_export_surface(bytes: &[u8]) -> Result<()> {
    let exports = list_function_exports(bytes)?;

    for op in ArithOp::ALL {
        let export = exports
            .iter()
            .find(|export| export.name == op.export_name())
            .ok_or(HostError::MissingExport(op.export_name()))?;
        if !export.is_binary_i32() {
            return Err(HostError::SignatureMismatch {
                export: op.export_name(),
                found: export.signature(),
            });
        }
    }

    Ok(())
}

/// Reads a module from disk. Files with a `.wat` extension are assembled
/// into the binary format first.
pub fn load_module_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;

    let is_text = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wat"));
    if !is_text {
        return Ok(bytes);
    }

    let binary = wat::parse_bytes(&bytes)?.into_owned();
    tracing::debug!(
        path = %path.display(),
        text_len = bytes.len(),
        binary_len = binary.len(),
        "assembled wat module"
    );
    Ok(binary)
}
