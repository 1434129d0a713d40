//! Per-file extraction: worksheets -> drawings -> anchored pictures -> named images.
//!
//! Worksheets are scanned independently (in parallel when enabled) and the
//! results are stitched back together in workbook order, so the output is a
//! pure function of the input bytes. The per-file cap is applied to the
//! ordered candidate list before any media part is inflated.

use rayon::prelude::*;

use crate::config::SheetScope;
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::drawing::parse_drawing;
use crate::error::{Bom2PicError, Result};
use crate::media::MediaBlob;
use crate::package::{Package, DEFAULT_MAX_PART_BYTES};
use crate::relationships::{load_relationships, rels_path_for};
use crate::utils::parse_column_reference;
use crate::workbook::{SheetEntry, WorkbookManifest};
use crate::worksheet::{scan_worksheet, CellTextContext};

/// The two columns a request is about, 1-indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSelection {
    /// Column whose anchored pictures are extracted.
    pub image_column: u32,
    /// Column holding the name of each row.
    pub name_column: u32,
}

impl ColumnSelection {
    /// Validate caller-supplied column letters.
    pub fn parse(image_column: &str, name_column: &str) -> Result<Self> {
        Ok(ColumnSelection {
            image_column: parse_column_reference(image_column)?,
            name_column: parse_column_reference(name_column)?,
        })
    }
}

/// Knobs for a single file's extraction.
#[derive(Clone, Debug)]
pub struct ExtractOptions {
    /// Maximum number of images taken from one file; `None` is unlimited.
    pub cap: Option<usize>,
    pub sheet_scope: SheetScope,
    /// Scan worksheets (and files in a batch) on the rayon pool.
    pub parallel: bool,
    pub max_part_bytes: u64,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            cap: None,
            sheet_scope: SheetScope::All,
            parallel: true,
            max_part_bytes: DEFAULT_MAX_PART_BYTES,
        }
    }
}

/// One picture pulled out of a workbook, with the name it resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedImage {
    pub source_file: String,
    pub sheet: String,
    /// 1-indexed row the picture is anchored to; `None` for the catch-all
    /// row that collects unanchored pictures.
    pub row_index: Option<u32>,
    /// Raw name-cell text, or a positional placeholder when the cell is empty.
    pub resolved_name: String,
    /// Whether `resolved_name` came from the name cell.
    pub name_from_cell: bool,
    pub media: MediaBlob,
    /// Position in the file's document-ordered candidate list.
    pub sequence_in_file: usize,
}

impl ExtractedImage {
    /// Positional name used when the row has no usable name.
    pub fn placeholder_name(&self) -> String {
        placeholder_name(&self.source_file, self.row_index, self.sequence_in_file)
    }
}

fn placeholder_name(source_file: &str, row_index: Option<u32>, sequence: usize) -> String {
    match row_index {
        Some(row) => format!("image_row{}", row),
        None => format!("image_{}_{}", file_stem(source_file), sequence + 1),
    }
}

fn file_stem(source_file: &str) -> &str {
    let file = source_file.rsplit(['/', '\\']).next().unwrap_or(source_file);
    match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    }
}

/// Result of extracting one uploaded file.
#[derive(Clone, Debug, Default)]
pub struct ExtractionOutcome {
    pub source_file: String,
    /// Extracted images in document order.
    pub extracted: Vec<ExtractedImage>,
    /// Number of candidates before the cap was applied.
    pub total_available: usize,
    /// `total_available` exceeded the cap.
    pub truncated: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl ExtractionOutcome {
    pub fn processed(&self) -> usize {
        self.extracted.len()
    }
}

struct Candidate {
    sheet: String,
    media_path: String,
    row_index: Option<u32>,
    raw_name: Option<String>,
}

#[derive(Default)]
struct SheetCandidates {
    candidates: Vec<Candidate>,
    diagnostics: Vec<Diagnostic>,
}

impl SheetCandidates {
    fn degrade(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Extract the named images from one uploaded workbook.
///
/// Only a file that is not a readable container, or whose workbook part is
/// missing or unparseable, fails; it fails with
/// [`Bom2PicError::UnreadableFile`]. Every other problem removes the
/// affected worksheet or picture and is reported as a [`Diagnostic`].
pub fn extract_file(
    source_file: &str,
    data: &[u8],
    columns: &ColumnSelection,
    options: &ExtractOptions,
) -> Result<ExtractionOutcome> {
    let unreadable = |e: Bom2PicError| Bom2PicError::UnreadableFile {
        file: source_file.to_string(),
        reason: e.to_string(),
    };

    let mut package = Package::from_bytes(data)
        .map_err(unreadable)?
        .with_max_part_bytes(options.max_part_bytes);
    let manifest = WorkbookManifest::load(&mut package).map_err(unreadable)?;

    let sheets: &[SheetEntry] = match options.sheet_scope {
        SheetScope::All => &manifest.sheets,
        SheetScope::First => &manifest.sheets[..manifest.sheets.len().min(1)],
    };
    let ctx = manifest.text_context();

    let per_sheet: Vec<SheetCandidates> = if options.parallel && sheets.len() > 1 {
        // Parallel scan; collect() keeps workbook order
        let shared = &package;
        sheets
            .par_iter()
            .map(|sheet| collect_sheet(shared.clone(), sheet, columns, &ctx))
            .collect()
    } else {
        sheets
            .iter()
            .map(|sheet| collect_sheet(package.clone(), sheet, columns, &ctx))
            .collect()
    };

    let mut diagnostics = manifest.diagnostics.clone();
    let mut candidates = Vec::new();
    for sheet in per_sheet {
        candidates.extend(sheet.candidates);
        diagnostics.extend(sheet.diagnostics);
    }

    let total_available = candidates.len();
    let keep = options.cap.map_or(total_available, |cap| cap.min(total_available));
    let truncated = options.cap.is_some_and(|cap| total_available > cap);

    let mut extracted = Vec::with_capacity(keep);
    for (sequence, candidate) in candidates.into_iter().take(keep).enumerate() {
        let bytes = match package.read_part(&candidate.media_path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::MissingMedia, "media part vanished from package")
                        .with_sheet(&candidate.sheet)
                        .with_part(&candidate.media_path),
                );
                continue;
            }
            Err(e) => {
                diagnostics.push(
                    Diagnostic::new(DiagnosticKind::UnreadableMedia, e.to_string())
                        .with_sheet(&candidate.sheet)
                        .with_part(&candidate.media_path),
                );
                continue;
            }
        };

        let (resolved_name, name_from_cell) = match candidate.raw_name {
            Some(name) => (name, true),
            None => (placeholder_name(source_file, candidate.row_index, sequence), false),
        };

        extracted.push(ExtractedImage {
            source_file: source_file.to_string(),
            sheet: candidate.sheet,
            row_index: candidate.row_index,
            resolved_name,
            name_from_cell,
            media: MediaBlob::new(candidate.media_path, bytes),
            sequence_in_file: sequence,
        });
    }

    for diagnostic in &diagnostics {
        diagnostic.log(source_file);
    }
    tracing::debug!(
        file = source_file,
        sheets = sheets.len(),
        total_available,
        extracted = extracted.len(),
        truncated,
        "extracted workbook"
    );

    Ok(ExtractionOutcome {
        source_file: source_file.to_string(),
        extracted,
        total_available,
        truncated,
        diagnostics,
    })
}

/// Extract several files, returning per-file results in input order.
pub fn extract_files(
    files: &[(&str, &[u8])],
    columns: &ColumnSelection,
    options: &ExtractOptions,
) -> Vec<Result<ExtractionOutcome>> {
    if options.parallel && files.len() > 1 {
        files
            .par_iter()
            .map(|(name, data)| extract_file(name, data, columns, options))
            .collect()
    } else {
        files
            .iter()
            .map(|(name, data)| extract_file(name, data, columns, options))
            .collect()
    }
}

/// Walk one worksheet's drawing and collect its picture candidates.
fn collect_sheet(
    mut package: Package<'_>,
    sheet: &SheetEntry,
    columns: &ColumnSelection,
    ctx: &CellTextContext<'_>,
) -> SheetCandidates {
    let mut out = SheetCandidates::default();
    let diag = |kind: DiagnosticKind, part: &str, detail: String| {
        Diagnostic::new(kind, detail).with_sheet(&sheet.name).with_part(part)
    };

    let xml = match package.read_part(&sheet.part) {
        Ok(Some(xml)) => xml,
        Ok(None) => {
            return out.degrade(diag(
                DiagnosticKind::MissingWorksheet,
                &sheet.part,
                "worksheet part not found".to_string(),
            ))
        }
        Err(e) => return out.degrade(diag(DiagnosticKind::MalformedPart, &sheet.part, e.to_string())),
    };

    let scan = match scan_worksheet(&xml, &sheet.part, &[columns.name_column], ctx) {
        Ok(scan) => scan,
        Err(e) => return out.degrade(diag(DiagnosticKind::MalformedPart, &sheet.part, e.to_string())),
    };
    drop(xml);

    if let Some(max_col) = scan.dimension_max_column() {
        if columns.name_column > max_col {
            out.diagnostics.push(diag(
                DiagnosticKind::ColumnOutsideDimension,
                &sheet.part,
                format!(
                    "name column {} is outside the declared range {}",
                    crate::utils::column_to_letter(columns.name_column),
                    scan.dimension.as_deref().unwrap_or("")
                ),
            ));
        }
    }

    let Some(drawing_id) = scan.drawing_rel_id.as_deref() else {
        return out;
    };

    let rels_part = rels_path_for(&sheet.part);
    if !package.contains(&rels_part) {
        return out.degrade(diag(
            DiagnosticKind::MissingRelationships,
            &rels_part,
            format!("worksheet references drawing {} but has no relationships", drawing_id),
        ));
    }
    let sheet_rels = match load_relationships(&mut package, &sheet.part) {
        Ok(rels) => rels,
        Err(e) => return out.degrade(diag(DiagnosticKind::MalformedRelationships, &rels_part, e.to_string())),
    };

    let Some(drawing_part) = sheet_rels
        .get(drawing_id)
        .filter(|rel| !rel.external)
        .map(|rel| rel.target_path.clone())
    else {
        return out.degrade(diag(
            DiagnosticKind::MissingDrawing,
            &rels_part,
            format!("relationship {} is not declared", drawing_id),
        ));
    };

    let drawing_xml = match package.read_part(&drawing_part) {
        Ok(Some(xml)) => xml,
        Ok(None) => {
            return out.degrade(diag(
                DiagnosticKind::MissingDrawing,
                &drawing_part,
                "drawing part not found".to_string(),
            ))
        }
        Err(e) => return out.degrade(diag(DiagnosticKind::MalformedPart, &drawing_part, e.to_string())),
    };
    let pictures = match parse_drawing(&drawing_xml, &drawing_part) {
        Ok(pictures) => pictures,
        Err(e) => return out.degrade(diag(DiagnosticKind::MalformedPart, &drawing_part, e.to_string())),
    };
    if pictures.is_empty() {
        return out;
    }

    let drawing_rels = match load_relationships(&mut package, &drawing_part) {
        Ok(rels) => rels,
        Err(e) => {
            return out.degrade(diag(
                DiagnosticKind::MalformedRelationships,
                &rels_path_for(&drawing_part),
                e.to_string(),
            ))
        }
    };

    let image_col = columns.image_column - 1;
    for picture in pictures {
        let position = picture.anchor.resolve(&scan.geometry);
        if let Some(pos) = position {
            if pos.col != image_col {
                continue;
            }
        }

        let Some(rel) = drawing_rels
            .get(&picture.relationship_id)
            .filter(|rel| !rel.external)
        else {
            out.diagnostics.push(diag(
                DiagnosticKind::UnresolvedPicture,
                &drawing_part,
                format!("picture relationship {} is not declared", picture.relationship_id),
            ));
            continue;
        };
        if !package.contains(&rel.target_path) {
            out.diagnostics.push(diag(
                DiagnosticKind::MissingMedia,
                &rel.target_path,
                format!("picture relationship {} points at a missing part", picture.relationship_id),
            ));
            continue;
        }

        let (row_index, raw_name) = match position {
            Some(pos) => {
                let row = pos.row + 1;
                (Some(row), scan.row_value(row, columns.name_column).raw)
            }
            None => {
                out.diagnostics.push(diag(
                    DiagnosticKind::UnanchoredPicture,
                    &drawing_part,
                    format!(
                        "picture {} has no usable anchor; placed on the catch-all row",
                        picture.name.as_deref().unwrap_or(&picture.relationship_id)
                    ),
                ));
                (None, None)
            }
        };

        out.candidates.push(Candidate {
            sheet: sheet.name.clone(),
            media_path: rel.target_path.clone(),
            row_index,
            raw_name,
        });
    }

    out
}
