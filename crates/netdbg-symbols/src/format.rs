//! Portable PDB physical layout: stream directory, heaps, table stream.
//!
//! A standalone portable PDB is an ECMA-335 metadata blob: a `BSJB` root
//! with named streams. `#Pdb` carries the debug header and the row counts
//! of the type-system tables the debug tables reference; `#~` carries the
//! debug metadata tables themselves; `#Strings`, `#Blob`, and `#GUID` are
//! the shared heaps.

use crate::error::SymbolError;
use crate::reader::SliceReader;

pub(crate) const METADATA_SIGNATURE: u32 = 0x424A_5342;

pub(crate) const TABLE_DOCUMENT: u8 = 0x30;
pub(crate) const TABLE_METHOD_DEBUG_INFORMATION: u8 = 0x31;
pub(crate) const TABLE_LOCAL_SCOPE: u8 = 0x32;
pub(crate) const TABLE_LOCAL_VARIABLE: u8 = 0x33;
pub(crate) const TABLE_LOCAL_CONSTANT: u8 = 0x34;
pub(crate) const TABLE_IMPORT_SCOPE: u8 = 0x35;
pub(crate) const TABLE_STATE_MACHINE_METHOD: u8 = 0x36;
pub(crate) const TABLE_CUSTOM_DEBUG_INFORMATION: u8 = 0x37;

const TABLE_METHOD_DEF: u8 = 0x06;

/// Tables referenced by the HasCustomDebugInformation coded index, in tag
/// order (ECMA-335 augmented by the portable PDB tables).
const HAS_CUSTOM_DEBUG_INFORMATION: [u8; 27] = [
    0x06, 0x04, 0x01, 0x02, 0x08, 0x09, 0x0A, 0x00, 0x0E, 0x17, 0x14, 0x11, 0x1A, 0x1B, 0x20,
    0x23, 0x26, 0x27, 0x28, 0x2A, 0x2C, 0x2B, 0x30, 0x32, 0x33, 0x34, 0x35,
];
const HAS_CUSTOM_DEBUG_INFORMATION_TAG_BITS: u32 = 5;

/// Byte range of one named stream within the metadata blob.
#[derive(Debug, Clone)]
pub(crate) struct StreamRange {
    pub offset: usize,
    pub size: usize,
}

/// Parsed stream directory, restricted to the streams this reader
/// consumes.
#[derive(Debug, Default)]
pub(crate) struct StreamDirectory {
    pub pdb: Option<StreamRange>,
    pub tables: Option<StreamRange>,
    pub blob: Option<StreamRange>,
    pub guid: Option<StreamRange>,
}

impl StreamDirectory {
    /// Parse the BSJB root and stream headers.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, SymbolError> {
        let mut reader = SliceReader::new(data);
        let signature = reader.read_u32()?;
        if signature != METADATA_SIGNATURE {
            return Err(SymbolError::BadSignature(signature));
        }
        reader.skip(2 + 2 + 4)?; // major, minor, reserved
        let version_len = reader.read_u32()? as usize;
        reader.skip(version_len)?;
        reader.skip(2)?; // flags
        let stream_count = reader.read_u16()?;

        let mut directory = StreamDirectory::default();
        for _ in 0..stream_count {
            let offset = reader.read_u32()?;
            let size = reader.read_u32()?;
            let name = read_stream_name(&mut reader)?;
            if offset
                .checked_add(size)
                .is_none_or(|end| end as usize > data.len())
            {
                return Err(SymbolError::StreamOutOfBounds { name, offset, size });
            }
            let range = StreamRange {
                offset: offset as usize,
                size: size as usize,
            };
            match name.as_str() {
                "#Pdb" => directory.pdb = Some(range),
                "#~" => directory.tables = Some(range),
                "#Blob" => directory.blob = Some(range),
                "#GUID" => directory.guid = Some(range),
                _ => {}
            }
        }
        Ok(directory)
    }
}

/// Stream names are null-terminated ASCII, padded to a 4-byte boundary.
fn read_stream_name(reader: &mut SliceReader<'_>) -> Result<String, SymbolError> {
    let mut name = String::new();
    let mut read = 0usize;
    loop {
        let byte = reader.read_u8()?;
        read += 1;
        if byte == 0 {
            break;
        }
        name.push(char::from(byte));
        if name.len() > 32 {
            return Err(SymbolError::BadBlob("stream name too long".into()));
        }
    }
    while read % 4 != 0 {
        reader.skip(1)?;
        read += 1;
    }
    Ok(name)
}

/// The heaps the debug tables reference, sliced out of the metadata
/// blob.
#[derive(Debug)]
pub(crate) struct Heaps<'a> {
    blob: &'a [u8],
    guid: &'a [u8],
}

impl<'a> Heaps<'a> {
    pub(crate) fn new(data: &'a [u8], directory: &StreamDirectory) -> Self {
        let slice = |range: &Option<StreamRange>| {
            range
                .as_ref()
                .map(|r| &data[r.offset..r.offset + r.size])
                .unwrap_or(&[])
        };
        Self {
            blob: slice(&directory.blob),
            guid: slice(&directory.guid),
        }
    }

    /// Length-prefixed blob at a byte offset into `#Blob`. Index 0 is the
    /// empty blob.
    pub(crate) fn blob(&self, index: u32) -> Result<&'a [u8], SymbolError> {
        if index == 0 {
            return Ok(&[]);
        }
        let start = index as usize;
        if start >= self.blob.len() {
            return Err(SymbolError::BadHeapIndex {
                heap: "#Blob",
                index,
            });
        }
        let mut reader = SliceReader::new(&self.blob[start..]);
        let len = reader.read_compressed_u32()? as usize;
        reader
            .read_bytes(len)
            .map_err(|_| SymbolError::BadHeapIndex {
                heap: "#Blob",
                index,
            })
    }

    /// 16-byte GUID at a 1-based index into `#GUID`.
    pub(crate) fn guid(&self, index: u32) -> Result<[u8; 16], SymbolError> {
        if index == 0 {
            return Ok([0; 16]);
        }
        let start = (index as usize - 1) * 16;
        let end = start + 16;
        if end > self.guid.len() {
            return Err(SymbolError::BadHeapIndex {
                heap: "#GUID",
                index,
            });
        }
        let mut out = [0u8; 16];
        out.copy_from_slice(&self.guid[start..end]);
        Ok(out)
    }
}

/// `#Pdb` stream: debug header plus the referenced type-system row counts.
#[derive(Debug)]
pub(crate) struct PdbStream {
    pub id: [u8; 20],
    pub entry_point: u32,
    /// Row counts for the type-system tables referenced from this PDB,
    /// indexed by table number.
    pub type_system_rows: [u32; 64],
}

impl PdbStream {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, SymbolError> {
        let mut reader = SliceReader::new(data);
        let mut id = [0u8; 20];
        id.copy_from_slice(reader.read_bytes(20)?);
        let entry_point = reader.read_u32()?;
        let mask = reader.read_u64()?;
        let mut type_system_rows = [0u32; 64];
        for (table, rows) in type_system_rows.iter_mut().enumerate() {
            if mask & (1u64 << table) != 0 {
                *rows = reader.read_u32()?;
            }
        }
        Ok(Self {
            id,
            entry_point,
            type_system_rows,
        })
    }
}

/// Widths of heap indices, from the `#~` HeapSizes byte.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexWidths {
    pub wide_string: bool,
    pub wide_guid: bool,
    pub wide_blob: bool,
}

/// Raw Document table row, restricted to the consumed columns (the
/// hash columns are skipped during parsing).
#[derive(Debug, Clone, Copy)]
pub(crate) struct DocumentRow {
    pub name: u32,
    pub language: u32,
}

/// Raw MethodDebugInformation table row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodDebugInformationRow {
    /// 1-based Document row, or 0 when the method spans documents (the
    /// initial document is then encoded in the sequence-point blob).
    pub document: u32,
    pub sequence_points: u32,
}

/// Parsed `#~` stream restricted to the portable PDB debug tables.
#[derive(Debug)]
pub(crate) struct TableStream {
    pub documents: Vec<DocumentRow>,
    pub methods: Vec<MethodDebugInformationRow>,
}

impl TableStream {
    pub(crate) fn parse(data: &[u8], pdb: &PdbStream) -> Result<Self, SymbolError> {
        let mut reader = SliceReader::new(data);
        reader.skip(4)?; // reserved
        reader.skip(2)?; // major, minor
        let heap_sizes = reader.read_u8()?;
        reader.skip(1)?; // reserved
        let valid = reader.read_u64()?;
        let _sorted = reader.read_u64()?;

        let widths = IndexWidths {
            wide_string: heap_sizes & 0x01 != 0,
            wide_guid: heap_sizes & 0x02 != 0,
            wide_blob: heap_sizes & 0x04 != 0,
        };

        let mut row_counts = pdb.type_system_rows;
        let mut present = Vec::new();
        for table in 0..64u8 {
            if valid & (1u64 << table) == 0 {
                continue;
            }
            if !(TABLE_DOCUMENT..=TABLE_CUSTOM_DEBUG_INFORMATION).contains(&table) {
                return Err(SymbolError::Unsupported(format!(
                    "unexpected table {table:#04x} in portable PDB"
                )));
            }
            let rows = reader.read_u32()?;
            row_counts[table as usize] = rows;
            present.push((table, rows));
        }

        let mut documents = Vec::new();
        let mut methods = Vec::new();
        for (table, rows) in present {
            match table {
                TABLE_DOCUMENT => {
                    documents.reserve(rows as usize);
                    for _ in 0..rows {
                        let name = reader.read_index(widths.wide_blob)?;
                        let _hash_algorithm = reader.read_index(widths.wide_guid)?;
                        let _hash = reader.read_index(widths.wide_blob)?;
                        let language = reader.read_index(widths.wide_guid)?;
                        documents.push(DocumentRow { name, language });
                    }
                }
                TABLE_METHOD_DEBUG_INFORMATION => {
                    let wide_document = table_index_wide(&row_counts, TABLE_DOCUMENT);
                    methods.reserve(rows as usize);
                    for _ in 0..rows {
                        methods.push(MethodDebugInformationRow {
                            document: reader.read_index(wide_document)?,
                            sequence_points: reader.read_index(widths.wide_blob)?,
                        });
                    }
                }
                _ => {
                    let size = debug_table_row_size(table, &row_counts, widths)?;
                    reader.skip(size * rows as usize)?;
                }
            }
        }

        Ok(Self { documents, methods })
    }
}

fn table_index_wide(row_counts: &[u32; 64], table: u8) -> bool {
    row_counts[table as usize] > 0xFFFF
}

fn coded_index_wide(row_counts: &[u32; 64], tables: &[u8], tag_bits: u32) -> bool {
    let max = tables
        .iter()
        .map(|table| row_counts[*table as usize])
        .max()
        .unwrap_or(0);
    max > (0xFFFF >> tag_bits)
}

/// Row size in bytes for the debug tables we skip over.
fn debug_table_row_size(
    table: u8,
    row_counts: &[u32; 64],
    widths: IndexWidths,
) -> Result<usize, SymbolError> {
    let idx = |wide: bool| if wide { 4 } else { 2 };
    let string = idx(widths.wide_string);
    let blob = idx(widths.wide_blob);
    let guid = idx(widths.wide_guid);
    let table_idx = |t: u8| idx(table_index_wide(row_counts, t));
    Ok(match table {
        TABLE_LOCAL_SCOPE => {
            table_idx(TABLE_METHOD_DEF)
                + table_idx(TABLE_IMPORT_SCOPE)
                + table_idx(TABLE_LOCAL_VARIABLE)
                + table_idx(TABLE_LOCAL_CONSTANT)
                + 4
                + 4
        }
        TABLE_LOCAL_VARIABLE => 2 + 2 + string,
        TABLE_LOCAL_CONSTANT => string + blob,
        TABLE_IMPORT_SCOPE => table_idx(TABLE_IMPORT_SCOPE) + blob,
        TABLE_STATE_MACHINE_METHOD => table_idx(TABLE_METHOD_DEF) * 2,
        TABLE_CUSTOM_DEBUG_INFORMATION => {
            idx(coded_index_wide(
                row_counts,
                &HAS_CUSTOM_DEBUG_INFORMATION,
                HAS_CUSTOM_DEBUG_INFORMATION_TAG_BITS,
            )) + guid
                + blob
        }
        _ => {
            return Err(SymbolError::Unsupported(format!(
                "no row size for table {table:#04x}"
            )))
        }
    })
}

/// Decode a document-name blob: a separator byte followed by compressed
/// blob-heap indices of the UTF-8 path parts.
pub(crate) fn decode_document_name(
    heaps: &Heaps<'_>,
    name_blob: u32,
) -> Result<String, SymbolError> {
    let blob = heaps.blob(name_blob)?;
    if blob.is_empty() {
        return Ok(String::new());
    }
    let mut reader = SliceReader::new(blob);
    let separator = char::from(reader.read_u8()?);
    let mut name = String::new();
    let mut first = true;
    while !reader.is_empty() {
        let part_index = reader.read_compressed_u32()?;
        let part = heaps.blob(part_index)?;
        let part = std::str::from_utf8(part)
            .map_err(|_| SymbolError::BadBlob("document name part is not UTF-8".into()))?;
        if !first {
            name.push(separator);
        }
        name.push_str(part);
        first = false;
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_signature() {
        let data = [0u8; 16];
        assert!(matches!(
            StreamDirectory::parse(&data),
            Err(SymbolError::BadSignature(0))
        ));
    }

    #[test]
    fn blob_index_zero_is_empty() {
        let directory = StreamDirectory::default();
        let heaps = Heaps::new(&[], &directory);
        assert_eq!(heaps.blob(0).unwrap(), &[] as &[u8]);
    }
}
