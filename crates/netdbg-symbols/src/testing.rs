//! Synthetic portable-PDB construction for tests.
//!
//! Builds minimal but structurally correct portable PDB blobs (BSJB root,
//! `#Pdb`/`#~`/`#Strings`/`#Blob`/`#GUID` streams, Document and
//! MethodDebugInformation tables, delta-encoded sequence points) so the
//! production reader can be exercised without compiler output on disk.

use crate::pdb::MethodToken;

/// One sequence point to encode.
#[derive(Debug, Clone, Copy)]
pub struct PointSpec {
    /// IL offset; must strictly increase within a method.
    pub il_offset: u32,
    /// 1-based start line (ignored for hidden points).
    pub start_line: u32,
    /// 1-based start column.
    pub start_column: u32,
    /// 1-based end line.
    pub end_line: u32,
    /// 1-based end column (exclusive).
    pub end_column: u32,
    /// Encode as a hidden point.
    pub hidden: bool,
}

impl PointSpec {
    /// A visible point spanning part of one line.
    #[must_use]
    pub fn line(il_offset: u32, line: u32, start_column: u32, end_column: u32) -> Self {
        Self {
            il_offset,
            start_line: line,
            start_column,
            end_line: line,
            end_column,
            hidden: false,
        }
    }

    /// A hidden point.
    #[must_use]
    pub fn hidden(il_offset: u32) -> Self {
        Self {
            il_offset,
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
            hidden: true,
        }
    }
}

#[derive(Debug, Clone)]
struct MethodSpec {
    document: u32,
    points: Vec<PointSpec>,
}

/// Incremental builder for a synthetic portable PDB.
#[derive(Debug, Default)]
pub struct PdbBuilder {
    documents: Vec<String>,
    methods: Vec<MethodSpec>,
}

impl PdbBuilder {
    /// Start an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document; returns its 1-based Document row.
    pub fn document(&mut self, path: &str) -> u32 {
        self.documents.push(path.to_string());
        self.documents.len() as u32
    }

    /// Add a method with sequence points in a document; returns the
    /// MethodDef token the reader will report for it.
    ///
    /// # Panics
    /// Panics when IL offsets are not strictly increasing or a visible
    /// point has a degenerate (hidden-looking) span.
    pub fn method(&mut self, document: u32, points: &[PointSpec]) -> MethodToken {
        assert!(document >= 1 && document as usize <= self.documents.len());
        let mut previous: Option<u32> = None;
        for point in points {
            if let Some(prev) = previous {
                assert!(point.il_offset > prev, "IL offsets must strictly increase");
            }
            previous = Some(point.il_offset);
            if !point.hidden {
                assert!(
                    point.end_line > point.start_line || point.end_column != point.start_column,
                    "visible point must have a non-degenerate span"
                );
            }
        }
        self.methods.push(MethodSpec {
            document,
            points: points.to_vec(),
        });
        MethodToken::from_row(self.methods.len() as u32)
    }

    /// A method with no sequence points (abstract/extern bodies).
    pub fn empty_method(&mut self) -> MethodToken {
        self.methods.push(MethodSpec {
            document: 0,
            points: Vec::new(),
        });
        MethodToken::from_row(self.methods.len() as u32)
    }

    /// Serialize the PDB.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut blob_heap = BlobHeap::new();
        let document_name_blobs: Vec<u32> = self
            .documents
            .iter()
            .map(|path| blob_heap.add_document_name(path))
            .collect();
        let sequence_blobs: Vec<u32> = self
            .methods
            .iter()
            .map(|method| {
                if method.points.is_empty() {
                    0
                } else {
                    blob_heap.add(&encode_sequence_points(&method.points))
                }
            })
            .collect();

        let tables = self.encode_table_stream(&document_name_blobs, &sequence_blobs);
        let pdb_stream = self.encode_pdb_stream();
        let strings_heap = vec![0u8];
        let guid_heap = Vec::new();

        assemble_streams(&[
            ("#Pdb", &pdb_stream),
            ("#~", &tables),
            ("#Strings", &strings_heap),
            ("#Blob", &blob_heap.data),
            ("#GUID", &guid_heap),
        ])
    }

    fn encode_pdb_stream(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0xAB; 20]); // PDB id
        out.extend_from_slice(&0u32.to_le_bytes()); // entry point
        let method_def_bit = 1u64 << 0x06;
        out.extend_from_slice(&method_def_bit.to_le_bytes());
        out.extend_from_slice(&(self.methods.len() as u32).to_le_bytes());
        out
    }

    fn encode_table_stream(&self, name_blobs: &[u32], sequence_blobs: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.push(2); // major
        out.push(0); // minor
        out.push(0); // heap sizes: all narrow
        out.push(1); // reserved
        let valid = (1u64 << 0x30) | (1u64 << 0x31);
        out.extend_from_slice(&valid.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // sorted
        out.extend_from_slice(&(self.documents.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.methods.len() as u32).to_le_bytes());
        for blob in name_blobs {
            push_u16(&mut out, *blob); // Name
            push_u16(&mut out, 0); // HashAlgorithm
            push_u16(&mut out, 0); // Hash
            push_u16(&mut out, 0); // Language
        }
        for (method, blob) in self.methods.iter().zip(sequence_blobs) {
            push_u16(&mut out, method.document);
            push_u16(&mut out, *blob);
        }
        out
    }
}

struct BlobHeap {
    data: Vec<u8>,
}

impl BlobHeap {
    fn new() -> Self {
        // index 0 is the empty blob
        Self { data: vec![0] }
    }

    fn add(&mut self, bytes: &[u8]) -> u32 {
        let index = self.data.len() as u32;
        write_compressed_u32(&mut self.data, bytes.len() as u32);
        self.data.extend_from_slice(bytes);
        assert!(self.data.len() <= 0xFFFF, "test blob heap exceeds narrow indices");
        index
    }

    /// Document names are a separator byte plus blob indices of the parts.
    fn add_document_name(&mut self, path: &str) -> u32 {
        let separator = '/';
        let normalized = path.replace('\\', "/");
        let part_indices: Vec<u32> = normalized
            .split(separator)
            .map(|part| {
                if part.is_empty() {
                    0
                } else {
                    self.add(part.as_bytes())
                }
            })
            .collect();
        let mut name = Vec::new();
        name.push(separator as u8);
        for index in part_indices {
            write_compressed_u32(&mut name, index);
        }
        self.add(&name)
    }
}

fn encode_sequence_points(points: &[PointSpec]) -> Vec<u8> {
    let mut out = Vec::new();
    write_compressed_u32(&mut out, 0); // LocalSignature
    let mut previous_il: Option<u32> = None;
    let mut previous_visible: Option<(u32, u32)> = None;
    for point in points {
        let delta_il = match previous_il {
            None => point.il_offset,
            Some(prev) => point.il_offset - prev,
        };
        write_compressed_u32(&mut out, delta_il);
        previous_il = Some(point.il_offset);

        if point.hidden {
            write_compressed_u32(&mut out, 0);
            write_compressed_u32(&mut out, 0);
            continue;
        }

        let delta_lines = point.end_line - point.start_line;
        write_compressed_u32(&mut out, delta_lines);
        let delta_columns = point.end_column as i64 - point.start_column as i64;
        if delta_lines == 0 {
            write_compressed_u32(&mut out, delta_columns as u32);
        } else {
            write_compressed_i32(&mut out, delta_columns as i32);
        }

        match previous_visible {
            None => {
                write_compressed_u32(&mut out, point.start_line);
                write_compressed_u32(&mut out, point.start_column);
            }
            Some((line, column)) => {
                write_compressed_i32(&mut out, point.start_line as i32 - line as i32);
                write_compressed_i32(&mut out, point.start_column as i32 - column as i32);
            }
        }
        previous_visible = Some((point.start_line, point.start_column));
    }
    out
}

fn assemble_streams(streams: &[(&str, &[u8])]) -> Vec<u8> {
    let version = b"PDB v1.0\0\0\0\0"; // already 4-aligned
    let mut header_size = 4 + 2 + 2 + 4 + 4 + version.len() + 2 + 2;
    for (name, _) in streams {
        header_size += 8 + padded_name_len(name);
    }

    let mut offsets = Vec::new();
    let mut cursor = header_size;
    for (_, data) in streams {
        cursor = (cursor + 3) & !3;
        offsets.push(cursor);
        cursor += data.len();
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(&crate::format::METADATA_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // major
    out.extend_from_slice(&1u16.to_le_bytes()); // minor
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved
    out.extend_from_slice(&(version.len() as u32).to_le_bytes());
    out.extend_from_slice(version);
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.extend_from_slice(&(streams.len() as u16).to_le_bytes());
    for ((name, data), offset) in streams.iter().zip(&offsets) {
        out.extend_from_slice(&(*offset as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        let mut written = name.len() + 1;
        while written % 4 != 0 {
            out.push(0);
            written += 1;
        }
    }
    for ((_, data), offset) in streams.iter().zip(&offsets) {
        while out.len() < *offset {
            out.push(0);
        }
        out.extend_from_slice(data);
    }
    out
}

fn padded_name_len(name: &str) -> usize {
    let raw = name.len() + 1;
    (raw + 3) & !3
}

fn push_u16(out: &mut Vec<u8>, value: u32) {
    assert!(value <= 0xFFFF, "narrow index overflow in test builder");
    out.extend_from_slice(&(value as u16).to_le_bytes());
}

fn write_compressed_u32(out: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        out.push(value as u8);
    } else if value < 0x4000 {
        out.push(0x80 | (value >> 8) as u8);
        out.push(value as u8);
    } else {
        assert!(value < 0x2000_0000, "compressed integer overflow");
        out.push(0xC0 | (value >> 24) as u8);
        out.push((value >> 16) as u8);
        out.push((value >> 8) as u8);
        out.push(value as u8);
    }
}

fn write_compressed_i32(out: &mut Vec<u8>, value: i32) {
    if (-0x40..0x40).contains(&value) {
        let raw = if value >= 0 {
            (value as u32) << 1
        } else {
            (((value + 0x40) as u32) << 1) | 1
        };
        out.push(raw as u8);
    } else if (-0x2000..0x2000).contains(&value) {
        let raw = if value >= 0 {
            (value as u32) << 1
        } else {
            (((value + 0x2000) as u32) << 1) | 1
        };
        out.push(0x80 | (raw >> 8) as u8);
        out.push(raw as u8);
    } else {
        assert!((-0x1000_0000..0x1000_0000).contains(&value));
        let raw = if value >= 0 {
            (value as u32) << 1
        } else {
            (((value + 0x1000_0000) as u32) << 1) | 1
        };
        out.push(0xC0 | (raw >> 24) as u8);
        out.push((raw >> 16) as u8);
        out.push((raw >> 8) as u8);
        out.push(raw as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdb::PortablePdb;

    #[test]
    fn built_pdb_parses_and_round_trips() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document("/src/App/Program.cs");
        let token = builder.method(
            doc,
            &[
                PointSpec::line(0, 10, 9, 20),
                PointSpec::line(6, 11, 9, 30),
                PointSpec::hidden(12),
                PointSpec::line(20, 14, 13, 25),
            ],
        );

        let pdb = PortablePdb::parse(&builder.build()).unwrap();
        assert_eq!(pdb.documents().len(), 1);
        assert_eq!(pdb.documents()[0].name, "/src/App/Program.cs");

        let points = pdb.sequence_points(token).unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].il_offset, 0);
        assert_eq!(points[0].start_line, 10);
        assert_eq!(points[0].end_column, 20);
        assert_eq!(points[1].start_line, 11);
        assert!(points[2].is_hidden);
        assert_eq!(points[3].il_offset, 20);
        assert_eq!(points[3].start_line, 14);
        assert_eq!(points[3].start_column, 13);
    }

    #[test]
    fn empty_methods_have_no_points() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document("/src/Lib.cs");
        let empty = builder.empty_method();
        let _with_points = builder.method(doc, &[PointSpec::line(0, 3, 1, 10)]);

        let pdb = PortablePdb::parse(&builder.build()).unwrap();
        assert!(pdb.sequence_points(empty).unwrap().is_empty());
    }

    #[test]
    fn signed_compressed_writer_matches_reader() {
        use crate::reader::SliceReader;
        for value in [-3i32, 3, -64, 63, -8192, 8191, -100_000, 100_000] {
            let mut buffer = Vec::new();
            write_compressed_i32(&mut buffer, value);
            let mut reader = SliceReader::new(&buffer);
            assert_eq!(reader.read_compressed_i32().unwrap(), value, "{value}");
        }
    }
}
