//! Source-line to IL-offset mapping and its inverse.

use std::sync::Arc;

use crate::cache::{SymbolCache, SymbolLookup};
use crate::paths::normalize_path;
use crate::pdb::{MethodToken, PortablePdb};
use crate::sequence::SequencePoint;

/// The resolved source span of a sequence point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSpan {
    /// 1-based start line.
    pub start_line: u32,
    /// 1-based start column.
    pub start_column: u32,
    /// 1-based end line.
    pub end_line: u32,
    /// 1-based end column (exclusive).
    pub end_column: u32,
}

impl ResolvedSpan {
    fn from_point(point: &SequencePoint) -> Self {
        Self {
            start_line: point.start_line,
            start_column: point.start_column,
            end_line: point.end_line,
            end_column: point.end_column,
        }
    }
}

/// A source position resolved into IL space.
#[derive(Debug, Clone, Copy)]
pub struct IlLocation {
    /// The containing method.
    pub method: MethodToken,
    /// Byte offset into the method's IL body.
    pub il_offset: u32,
    /// The sequence point's source span.
    pub span: ResolvedSpan,
}

/// An IL position resolved back into source space.
#[derive(Debug, Clone)]
pub struct SourcePosition {
    /// Document path as recorded by the compiler, with forward slashes.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
    /// 1-based end line.
    pub end_line: u32,
    /// 1-based end column (exclusive).
    pub end_column: u32,
}

/// A sequence point paired with its method, for per-line listings.
#[derive(Debug, Clone, Copy)]
pub struct LinePoint {
    /// The containing method.
    pub method: MethodToken,
    /// The sequence point.
    pub point: SequencePoint,
}

/// Translates `(module, file, line, column?)` to IL offsets and back,
/// through the shared [`SymbolCache`].
#[derive(Debug, Clone)]
pub struct SymbolMapper {
    cache: Arc<SymbolCache>,
}

impl SymbolMapper {
    /// Create a mapper over a shared cache.
    #[must_use]
    pub fn new(cache: Arc<SymbolCache>) -> Self {
        Self { cache }
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<SymbolCache> {
        &self.cache
    }

    /// Whether usable symbols exist for a module.
    #[must_use]
    pub fn has_symbols(&self, module_path: &str) -> bool {
        matches!(
            self.cache.get_or_load(module_path),
            SymbolLookup::Loaded(_)
        )
    }

    /// Whether the module's symbols mention a source file.
    #[must_use]
    pub fn contains_source_file(&self, module_path: &str, file: &str) -> bool {
        let Some(pdb) = self.reader(module_path) else {
            return false;
        };
        pdb.document_index(&normalize_path(file)).is_some()
    }

    /// Resolve `(file, line, column?)` to a method and IL offset.
    ///
    /// When several sequence points start on the requested line, the
    /// candidates are ordered by start column; with no column requested
    /// the first wins, otherwise the first whose span contains the
    /// column, falling back to the nearest start column.
    #[must_use]
    pub fn find_il_offset(
        &self,
        module_path: &str,
        file: &str,
        line: u32,
        column: Option<u32>,
    ) -> Option<IlLocation> {
        let candidates = self.sequence_points_on_line(module_path, file, line);
        if candidates.is_empty() {
            return None;
        }
        let chosen = match column {
            None => candidates[0],
            Some(col) => *candidates
                .iter()
                .find(|entry| entry.point.start_column <= col && col <= entry.point.end_column)
                .unwrap_or_else(|| {
                    candidates
                        .iter()
                        .min_by_key(|entry| entry.point.start_column.abs_diff(col))
                        .expect("candidates checked non-empty")
                }),
        };
        Some(IlLocation {
            method: chosen.method,
            il_offset: chosen.point.il_offset,
            span: ResolvedSpan::from_point(&chosen.point),
        })
    }

    /// All non-hidden sequence points starting on a line, ordered by
    /// start column.
    #[must_use]
    pub fn sequence_points_on_line(
        &self,
        module_path: &str,
        file: &str,
        line: u32,
    ) -> Vec<LinePoint> {
        let Some(pdb) = self.reader(module_path) else {
            return Vec::new();
        };
        let Some(document) = pdb.document_index(&normalize_path(file)) else {
            return Vec::new();
        };
        let mut points: Vec<LinePoint> = pdb
            .methods()
            .iter()
            .flat_map(|method| {
                method
                    .points
                    .iter()
                    .filter(|point| {
                        !point.is_hidden
                            && point.document == document
                            && point.start_line == line
                    })
                    .map(|point| LinePoint {
                        method: method.token,
                        point: *point,
                    })
            })
            .collect();
        points.sort_by_key(|entry| entry.point.start_column);
        points
    }

    /// Find the closest line within `range` of `line` that carries
    /// executable code. Ties prefer the later (downward) line.
    #[must_use]
    pub fn find_nearest_valid_line(
        &self,
        module_path: &str,
        file: &str,
        line: u32,
        range: u32,
    ) -> Option<u32> {
        let Some(pdb) = self.reader(module_path) else {
            return None;
        };
        let document = pdb.document_index(&normalize_path(file))?;
        let mut best: Option<u32> = None;
        for method in pdb.methods() {
            for point in &method.points {
                if point.is_hidden || point.document != document {
                    continue;
                }
                let candidate = point.start_line;
                if candidate.abs_diff(line) > range {
                    continue;
                }
                best = Some(match best {
                    None => candidate,
                    Some(current) => pick_nearer(line, current, candidate),
                });
            }
        }
        best
    }

    /// Resolve `(method, il-offset)` back to a source position: of all
    /// non-hidden points at or before the offset, the closest one wins.
    #[must_use]
    pub fn find_source_location(
        &self,
        module_path: &str,
        method: MethodToken,
        il_offset: u32,
    ) -> Option<SourcePosition> {
        let pdb = self.reader(module_path)?;
        let points = pdb.sequence_points(method).ok()?;
        let point = points
            .iter()
            .filter(|point| !point.is_hidden && point.il_offset <= il_offset)
            .max_by_key(|point| point.il_offset)?;
        let document = pdb.documents().get(point.document as usize)?;
        Some(SourcePosition {
            file: document.name.replace('\\', "/"),
            line: point.start_line,
            column: point.start_column,
            end_line: point.end_line,
            end_column: point.end_column,
        })
    }

    fn reader(&self, module_path: &str) -> Option<Arc<PortablePdb>> {
        self.cache.get_or_load(module_path).reader()
    }
}

fn pick_nearer(target: u32, current: u32, candidate: u32) -> u32 {
    let current_distance = current.abs_diff(target);
    let candidate_distance = candidate.abs_diff(target);
    if candidate_distance < current_distance
        || (candidate_distance == current_distance && candidate > current)
    {
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::paths_equal;
    use crate::testing::{PdbBuilder, PointSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    fn write_module_with_pdb(label: &str, builder: &PdbBuilder) -> String {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("netdbg-symbols-{label}-{id}"));
        std::fs::create_dir_all(&dir).unwrap();
        let module = dir.join("app.dll");
        std::fs::write(&module, b"not a real module").unwrap();
        std::fs::write(dir.join("app.pdb"), builder.build()).unwrap();
        module.to_string_lossy().to_string()
    }

    fn mapper() -> SymbolMapper {
        SymbolMapper::new(Arc::new(SymbolCache::new()))
    }

    #[test]
    fn nearer_pick_prefers_downward_on_tie() {
        assert_eq!(pick_nearer(10, 9, 11), 11);
        assert_eq!(pick_nearer(10, 11, 9), 11);
        assert_eq!(pick_nearer(10, 12, 9), 9);
    }

    #[test]
    fn line_resolves_to_il_offset_and_back() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document("/src/App/Program.cs");
        builder.method(
            doc,
            &[
                PointSpec::line(0, 10, 9, 20),
                PointSpec::line(8, 12, 9, 30),
                PointSpec::line(16, 14, 9, 25),
            ],
        );
        let module = write_module_with_pdb("roundtrip", &builder);
        let mapper = mapper();

        let resolved = mapper
            .find_il_offset(&module, "/src/App/Program.cs", 12, None)
            .unwrap();
        assert_eq!(resolved.il_offset, 8);
        assert_eq!(resolved.span.start_line, 12);

        // Inverse mapping recovers the same file and line, including for
        // offsets that fall between sequence points.
        for probe in [8, 9, 15] {
            let location = mapper
                .find_source_location(&module, resolved.method, probe)
                .unwrap();
            assert_eq!(location.line, 12);
            assert!(paths_equal(&location.file, "/src/App/Program.cs"));
        }
    }

    #[test]
    fn column_selection_prefers_spanning_point() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document("/src/Many.cs");
        // Two statements on one line: columns 5..14 and 17..30.
        builder.method(
            doc,
            &[PointSpec::line(0, 7, 5, 14), PointSpec::line(10, 7, 17, 30)],
        );
        let module = write_module_with_pdb("columns", &builder);
        let mapper = mapper();

        // No column: first by column order.
        let first = mapper.find_il_offset(&module, "/src/Many.cs", 7, None).unwrap();
        assert_eq!(first.il_offset, 0);

        // Column inside the second span.
        let second = mapper
            .find_il_offset(&module, "/src/Many.cs", 7, Some(20))
            .unwrap();
        assert_eq!(second.il_offset, 10);

        // Column in the gap: nearest start column wins (17 is nearer 16
        // than 5).
        let nearest = mapper
            .find_il_offset(&module, "/src/Many.cs", 7, Some(16))
            .unwrap();
        assert_eq!(nearest.il_offset, 10);
    }

    #[test]
    fn hidden_points_are_never_candidates() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document("/src/Hidden.cs");
        builder.method(doc, &[PointSpec::hidden(0), PointSpec::line(4, 5, 1, 10)]);
        let module = write_module_with_pdb("hidden", &builder);
        let mapper = mapper();

        assert!(mapper.find_il_offset(&module, "/src/Hidden.cs", 0, None).is_none());
        let points = mapper.sequence_points_on_line(&module, "/src/Hidden.cs", 5);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].point.il_offset, 4);
    }

    #[test]
    fn nearest_valid_line_respects_range() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document("/src/Near.cs");
        builder.method(doc, &[PointSpec::line(0, 10, 1, 5), PointSpec::line(8, 20, 1, 5)]);
        let module = write_module_with_pdb("nearest", &builder);
        let mapper = mapper();

        assert_eq!(mapper.find_nearest_valid_line(&module, "/src/Near.cs", 12, 3), Some(10));
        assert_eq!(mapper.find_nearest_valid_line(&module, "/src/Near.cs", 12, 1), None);
        assert_eq!(mapper.find_nearest_valid_line(&module, "/src/Near.cs", 10, 0), Some(10));
    }

    #[test]
    fn contains_source_file_matches_case_insensitively() {
        let mut builder = PdbBuilder::new();
        let doc = builder.document(r"C:\src\App\Program.cs");
        builder.method(doc, &[PointSpec::line(0, 1, 1, 5)]);
        let module = write_module_with_pdb("contains", &builder);
        let mapper = mapper();

        assert!(mapper.contains_source_file(&module, "c:/SRC/app/program.CS"));
        assert!(!mapper.contains_source_file(&module, "c:/src/app/other.cs"));
    }

    #[test]
    fn missing_symbols_resolve_to_nothing() {
        let mapper = mapper();
        assert!(!mapper.has_symbols("/no/such/module.dll"));
        assert!(mapper
            .find_il_offset("/no/such/module.dll", "/src/a.cs", 1, None)
            .is_none());
    }
}
