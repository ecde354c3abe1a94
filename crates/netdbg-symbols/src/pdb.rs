//! Parsed portable PDB files.

use std::path::Path;

use crate::error::SymbolError;
use crate::format::{
    decode_document_name, Heaps, PdbStream, StreamDirectory, TableStream,
};
use crate::paths::normalize_path;
use crate::sequence::{decode_sequence_points, SequencePoint};

/// A MethodDef metadata token (`0x06xxxxxx`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodToken(pub u32);

impl MethodToken {
    const METHOD_DEF_TABLE: u32 = 0x0600_0000;

    /// Build a token from a 1-based MethodDef row number.
    #[must_use]
    pub fn from_row(row: u32) -> Self {
        Self(Self::METHOD_DEF_TABLE | row)
    }

    /// The 1-based MethodDef row number, if this is a MethodDef token.
    pub fn row(self) -> Result<u32, SymbolError> {
        if self.0 & 0xFF00_0000 != Self::METHOD_DEF_TABLE {
            return Err(SymbolError::NotAMethodToken(self.0));
        }
        Ok(self.0 & 0x00FF_FFFF)
    }
}

/// A source document recorded in the PDB.
#[derive(Debug, Clone)]
pub struct Document {
    /// The path exactly as the compiler recorded it.
    pub name: String,
    /// Normalized form used for comparisons (see [`normalize_path`]).
    pub normalized: String,
    /// The source-language GUID, zero when unrecorded.
    pub language: [u8; 16],
}

/// Debug information for one method.
#[derive(Debug, Clone)]
pub struct MethodDebugInfo {
    /// The method's MethodDef token.
    pub token: MethodToken,
    /// Decoded sequence points, ordered by IL offset.
    pub points: Vec<SequencePoint>,
}

/// A fully parsed portable PDB.
///
/// Parsing is eager: documents and sequence points are decoded once and
/// queries afterwards are read-only, so a parsed PDB is safe to share
/// across threads behind an `Arc`.
#[derive(Debug)]
pub struct PortablePdb {
    id: [u8; 20],
    entry_point: u32,
    documents: Vec<Document>,
    methods: Vec<MethodDebugInfo>,
}

impl PortablePdb {
    /// Parse a portable PDB from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, SymbolError> {
        let directory = StreamDirectory::parse(data)?;
        let pdb_range = directory
            .pdb
            .as_ref()
            .ok_or(SymbolError::MissingStream("#Pdb"))?;
        let tables_range = directory
            .tables
            .as_ref()
            .ok_or(SymbolError::MissingStream("#~"))?;
        let pdb_stream = PdbStream::parse(&data[pdb_range.offset..pdb_range.offset + pdb_range.size])?;
        let tables = TableStream::parse(
            &data[tables_range.offset..tables_range.offset + tables_range.size],
            &pdb_stream,
        )?;
        let heaps = Heaps::new(data, &directory);

        let mut documents = Vec::with_capacity(tables.documents.len());
        for row in &tables.documents {
            let name = decode_document_name(&heaps, row.name)?;
            let normalized = normalize_path(&name);
            let language = heaps.guid(row.language)?;
            documents.push(Document {
                name,
                normalized,
                language,
            });
        }

        let mut methods = Vec::with_capacity(tables.methods.len());
        for (index, row) in tables.methods.iter().enumerate() {
            let blob = heaps.blob(row.sequence_points)?;
            let points = decode_sequence_points(blob, row.document)?;
            for point in &points {
                if point.document as usize >= documents.len() {
                    return Err(SymbolError::BadRowIndex {
                        table: crate::format::TABLE_DOCUMENT,
                        row: point.document + 1,
                    });
                }
            }
            methods.push(MethodDebugInfo {
                token: MethodToken::from_row(index as u32 + 1),
                points,
            });
        }

        Ok(Self {
            id: pdb_stream.id,
            entry_point: pdb_stream.entry_point,
            documents,
            methods,
        })
    }

    /// Read and parse a portable PDB from disk.
    pub fn open(path: &Path) -> Result<Self, SymbolError> {
        let data = std::fs::read(path).map_err(|source| SymbolError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&data)
    }

    /// The 20-byte PDB id (GUID + age) from the `#Pdb` stream.
    #[must_use]
    pub fn id(&self) -> &[u8; 20] {
        &self.id
    }

    /// The module entry-point token, or 0 for libraries.
    #[must_use]
    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// All documents, in table order.
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Find a document by normalized path.
    #[must_use]
    pub fn document_index(&self, normalized: &str) -> Option<u32> {
        self.documents
            .iter()
            .position(|doc| doc.normalized == normalized)
            .map(|idx| idx as u32)
    }

    /// All methods carrying debug information, in MethodDef order.
    #[must_use]
    pub fn methods(&self) -> &[MethodDebugInfo] {
        &self.methods
    }

    /// Sequence points for one method token.
    pub fn sequence_points(&self, token: MethodToken) -> Result<&[SequencePoint], SymbolError> {
        let row = token.row()?;
        if row == 0 || row as usize > self.methods.len() {
            return Err(SymbolError::BadRowIndex {
                table: crate::format::TABLE_METHOD_DEBUG_INFORMATION,
                row,
            });
        }
        Ok(&self.methods[row as usize - 1].points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_token_round_trips_rows() {
        let token = MethodToken::from_row(7);
        assert_eq!(token.0, 0x0600_0007);
        assert_eq!(token.row().unwrap(), 7);
    }

    #[test]
    fn non_method_token_is_rejected() {
        assert!(MethodToken(0x0200_0001).row().is_err());
    }
}
