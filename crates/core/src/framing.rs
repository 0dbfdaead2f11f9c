//! Binary framing: `base64(brotli(wasm))`, persisted under a `.wasm.br.b64` suffix chain.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Full suffix chain every framed output carries.
pub const FRAMED_SUFFIX: &str = ".wasm.br.b64";

/// WASM module magic.
pub const WASM_MAGIC: &[u8; 4] = b"\0asm";

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 6;
const BROTLI_LGWIN: u32 = 22;

/// Failure encoding, decoding or persisting a framed binary.
#[derive(Debug, Error)]
pub enum FramingError {
    /// brotli rejected the input.
    #[error("failed to compress WASM binary: {0}")]
    Compress(#[source] std::io::Error),

    /// The payload is not a brotli stream.
    #[error("failed to decompress workflow binary: {0}")]
    Decompress(#[source] std::io::Error),

    /// The framed file is not base64.
    #[error("workflow binary is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// No output path was given.
    #[error("output path is not specified")]
    EmptyPath,

    /// Writing the temp file or renaming it into place failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Extends `path` so it ends with `.wasm.br.b64`.
///
/// Any partial chain already present is completed; nothing is rewritten.
pub fn ensure_output_extensions(path: &Path) -> PathBuf {
    let s = path.as_os_str().to_string_lossy();
    let missing = if s.ends_with(FRAMED_SUFFIX) {
        ""
    } else if s.ends_with(".wasm.br") {
        ".b64"
    } else if s.ends_with(".wasm") {
        ".br.b64"
    } else {
        FRAMED_SUFFIX
    };
    PathBuf::from(format!("{s}{missing}"))
}

/// Compresses and encodes raw WASM.
pub fn frame(wasm: &[u8]) -> Result<Vec<u8>, FramingError> {
    let mut compressed = Vec::with_capacity(wasm.len() / 2);
    {
        let mut writer =
            brotli::CompressorWriter::new(&mut compressed, BROTLI_BUFFER, BROTLI_QUALITY, BROTLI_LGWIN);
        writer.write_all(wasm).map_err(FramingError::Compress)?;
        writer.flush().map_err(FramingError::Compress)?;
    }
    Ok(STANDARD.encode(compressed).into_bytes())
}

/// Base64-decodes a framed binary. This is the form the workflow ID is computed over.
pub fn decode_framed(framed: &[u8]) -> Result<Vec<u8>, FramingError> {
    let trimmed = trim_ascii_whitespace(framed);
    Ok(STANDARD.decode(trimmed)?)
}

/// Fully unframes back to raw WASM.
pub fn unframe(framed: &[u8]) -> Result<Vec<u8>, FramingError> {
    let compressed = decode_framed(framed)?;
    let mut wasm = Vec::new();
    brotli::Decompressor::new(compressed.as_slice(), BROTLI_BUFFER)
        .read_to_end(&mut wasm)
        .map_err(FramingError::Decompress)?;
    Ok(wasm)
}

/// True if `bytes` starts with the WASM magic.
pub fn is_wasm(bytes: &[u8]) -> bool {
    bytes.starts_with(WASM_MAGIC)
}

/// Writes framed bytes atomically, completing the suffix chain first.
///
/// Returns the path actually written.
pub fn write_framed(output_path: &Path, framed: &[u8]) -> Result<PathBuf, FramingError> {
    if output_path.as_os_str().is_empty() {
        return Err(FramingError::EmptyPath);
    }
    let path = ensure_output_extensions(output_path);
    let write_err = |source| FramingError::Write {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, framed).map_err(write_err)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    Ok(path)
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
