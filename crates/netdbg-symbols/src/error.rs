//! Symbol reading errors.

#![allow(missing_docs)]

use thiserror::Error;

/// Errors produced while locating, parsing, or querying portable PDB files.
#[derive(Debug, Error)]
pub enum SymbolError {
    /// The symbol file could not be read from disk.
    #[error("failed to read symbol file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file ended before a required structure was complete.
    #[error("unexpected end of symbol data at offset {0}")]
    UnexpectedEof(usize),

    /// The file does not start with the BSJB metadata signature.
    #[error("not a portable PDB (bad signature {0:#010x})")]
    BadSignature(u32),

    /// A required metadata stream is absent.
    #[error("missing metadata stream '{0}'")]
    MissingStream(&'static str),

    /// A stream header points outside the file.
    #[error("stream '{name}' out of bounds (offset {offset}, size {size})")]
    StreamOutOfBounds {
        name: String,
        offset: u32,
        size: u32,
    },

    /// A heap index points outside its heap.
    #[error("invalid {heap} heap index {index}")]
    BadHeapIndex { heap: &'static str, index: u32 },

    /// A compressed integer was malformed.
    #[error("malformed compressed integer at offset {0}")]
    BadCompressedInt(usize),

    /// A blob payload did not decode as expected.
    #[error("malformed blob: {0}")]
    BadBlob(String),

    /// A table row index is out of range.
    #[error("row {row} out of range for table {table:#04x}")]
    BadRowIndex { table: u8, row: u32 },

    /// A method token does not refer to a MethodDef.
    #[error("token {0:#010x} is not a method definition token")]
    NotAMethodToken(u32),

    /// The metadata declares an unsupported version or layout.
    #[error("unsupported metadata: {0}")]
    Unsupported(String),
}
