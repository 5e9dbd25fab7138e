use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("not a WebAssembly binary (missing \\0asm magic number)")]
    InvalidMagic,

    #[error("WASM parse failed: {0}")]
    Parse(String),

    #[error("failed to instantiate module: {0}")]
    Instantiate(String),

    #[error("module has a start function, which is not supported")]
    StartFunction,

    #[error("module does not export function `{0}`")]
    MissingExport(&'static str),

    #[error("export `{export}` has signature {found}, expected (i32, i32) -> i32")]
    SignatureMismatch { export: &'static str, found: String },

    #[error("call to `{export}` trapped: {message}")]
    Trap {
        export: &'static str,
        message: String,
    },

    #[error("WAT assembly failed: {0}")]
    Wat(#[from] wat::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
