//! `netdbg-symbols` - portable PDB reading and source/IL mapping.
//!
//! This crate owns everything symbol-shaped in the debugger: parsing
//! portable PDB metadata, caching open readers per module, normalizing
//! source paths, and translating between source positions and IL offsets.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Session-scoped reader cache.
pub mod cache;
/// Symbol reading errors.
pub mod error;
mod format;
/// Line/IL mapping over cached readers.
pub mod mapper;
/// Source path normalization.
pub mod paths;
/// Parsed portable PDB files.
pub mod pdb;
mod reader;
/// Sequence point decoding.
pub mod sequence;
/// Synthetic PDB construction for tests.
pub mod testing;

pub use cache::{SymbolCache, SymbolLookup};
pub use error::SymbolError;
pub use mapper::{IlLocation, LinePoint, ResolvedSpan, SourcePosition, SymbolMapper};
pub use paths::{normalize_path, paths_equal};
pub use pdb::{Document, MethodDebugInfo, MethodToken, PortablePdb};
pub use sequence::SequencePoint;
