//! Error types for the engine's one fallible surface: decoding a
//! persisted binary envelope (spec.md §7 — every tick-path function is
//! infallible; `EngineError` never appears there).

use thiserror::Error;

/// Errors surfaced while decoding a persisted settings or project
/// envelope. Never constructed from the tick path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic {
        expected: &'static [u8],
        found: Vec<u8>,
    },

    #[error("unsupported format version {found} (supported up to {max_supported})")]
    UnsupportedVersion { found: u16, max_supported: u16 },

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("decoding failed: {0}")]
    Decode(String),
}
