//! Sequence-point blob decoding.
//!
//! The portable PDB encodes each method's sequence points as a delta
//! stream: IL offsets and line/column positions are differences against
//! the previous record, with dedicated record shapes for hidden points
//! and mid-method document switches.

use crate::error::SymbolError;
use crate::reader::SliceReader;

/// One decoded sequence point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePoint {
    /// Byte offset into the method's IL body.
    pub il_offset: u32,
    /// 0-based index into the PDB's document list.
    pub document: u32,
    /// 1-based start line.
    pub start_line: u32,
    /// 1-based start column.
    pub start_column: u32,
    /// 1-based end line (inclusive span end).
    pub end_line: u32,
    /// 1-based end column (exclusive).
    pub end_column: u32,
    /// Hidden points mark compiler-generated code with no source span.
    pub is_hidden: bool,
}

/// Decode one method's sequence-point blob.
///
/// `document` is the method's Document row (1-based) from the table row;
/// 0 means the method spans documents and the blob opens with an initial
/// document record. Returned points carry 0-based document indices.
pub(crate) fn decode_sequence_points(
    blob: &[u8],
    document: u32,
) -> Result<Vec<SequencePoint>, SymbolError> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = SliceReader::new(blob);
    let _local_signature = reader.read_compressed_u32()?;
    let mut current_document = if document == 0 {
        reader.read_compressed_u32()?
    } else {
        document
    };
    if current_document == 0 {
        return Err(SymbolError::BadBlob(
            "sequence points with no document".into(),
        ));
    }

    let mut points = Vec::new();
    let mut il_offset = 0u32;
    let mut start_line = 0u32;
    let mut start_column = 0u32;
    let mut first_record = true;
    let mut seen_non_hidden = false;

    while !reader.is_empty() {
        let delta_il = reader.read_compressed_u32()?;
        if !first_record && delta_il == 0 {
            // document-record: switch documents mid-method
            current_document = reader.read_compressed_u32()?;
            if current_document == 0 {
                return Err(SymbolError::BadBlob("document record with index 0".into()));
            }
            continue;
        }
        if first_record {
            il_offset = delta_il;
        } else {
            il_offset = il_offset
                .checked_add(delta_il)
                .ok_or_else(|| SymbolError::BadBlob("IL offset overflow".into()))?;
        }
        first_record = false;

        let delta_lines = reader.read_compressed_u32()?;
        let delta_columns = if delta_lines == 0 {
            reader.read_compressed_u32()? as i32
        } else {
            reader.read_compressed_i32()?
        };

        if delta_lines == 0 && delta_columns == 0 {
            points.push(SequencePoint {
                il_offset,
                document: current_document - 1,
                start_line: 0,
                start_column: 0,
                end_line: 0,
                end_column: 0,
                is_hidden: true,
            });
            continue;
        }

        if seen_non_hidden {
            start_line = apply_delta(start_line, reader.read_compressed_i32()?)?;
            start_column = apply_delta(start_column, reader.read_compressed_i32()?)?;
        } else {
            start_line = reader.read_compressed_u32()?;
            start_column = reader.read_compressed_u32()?;
            seen_non_hidden = true;
        }

        let end_line = start_line
            .checked_add(delta_lines)
            .ok_or_else(|| SymbolError::BadBlob("end line overflow".into()))?;
        let end_column = apply_delta(start_column, delta_columns)?;
        points.push(SequencePoint {
            il_offset,
            document: current_document - 1,
            start_line,
            start_column,
            end_line,
            end_column,
            is_hidden: false,
        });
    }

    Ok(points)
}

fn apply_delta(base: u32, delta: i32) -> Result<u32, SymbolError> {
    let value = i64::from(base) + i64::from(delta);
    u32::try_from(value).map_err(|_| SymbolError::BadBlob(format!("position delta underflow ({base} {delta:+})")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hand-encoded blobs; the richer cases live in the `testing` builder
    // round-trip tests.

    #[test]
    fn decodes_single_point() {
        // local-sig 0, ΔIL 4, ΔLines 0, ΔCols 6, line 10, col 5
        let blob = [0x00, 0x04, 0x00, 0x06, 0x0A, 0x05];
        let points = decode_sequence_points(&blob, 1).unwrap();
        assert_eq!(points.len(), 1);
        let point = points[0];
        assert_eq!(point.il_offset, 4);
        assert_eq!(point.document, 0);
        assert_eq!(point.start_line, 10);
        assert_eq!(point.end_line, 10);
        assert_eq!(point.start_column, 5);
        assert_eq!(point.end_column, 11);
        assert!(!point.is_hidden);
    }

    #[test]
    fn decodes_hidden_point() {
        // local-sig 0, ΔIL 0 (first record), ΔLines 0, ΔCols 0 => hidden
        let blob = [0x00, 0x00, 0x00, 0x00];
        let points = decode_sequence_points(&blob, 1).unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].is_hidden);
        assert_eq!(points[0].il_offset, 0);
    }

    #[test]
    fn empty_blob_means_no_points() {
        assert!(decode_sequence_points(&[], 1).unwrap().is_empty());
    }
}
