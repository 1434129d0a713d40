//! Cross-file aggregation, filename policy and the output archive.
//!
//! Filenames come from the resolved row name. When two images resolve to the
//! same filename the later one (in file arrival order, then per-file
//! sequence) replaces the earlier one: the archive keeps exactly one entry
//! per name and the duplicate counter records how many were replaced.

use std::io::{Seek, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use zip::ZipWriter;

#[cfg(feature = "fast-hash")]
use hashbrown::{HashMap, HashSet};
#[cfg(not(feature = "fast-hash"))]
use std::collections::{HashMap, HashSet};

use crate::config::ArchiveSettings;
use crate::error::Result;
use crate::pipeline::{ExtractedImage, ExtractionOutcome};

/// Longest filename stem kept, in characters.
pub const MAX_NAME_CHARS: usize = 80;

pub const REPORT_ENTRY: &str = "report.csv";

const REPORT_HEADER: [&str; 6] = ["source_file", "sheet", "row", "part_name", "final_filename", "action"];

/// Turn a raw row name into a filename stem.
///
/// Trims, replaces spaces with `_`, drops path-hostile and control
/// characters, collapses `_` runs and truncates. Case is preserved. May
/// return an empty string.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        let ch = match ch {
            ' ' => '_',
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => continue,
            c if c.is_control() => continue,
            c => c,
        };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out.chars().take(MAX_NAME_CHARS).collect()
}

/// Archive filename for an extracted image: normalized name plus the
/// media's inferred extension.
pub fn output_filename(image: &ExtractedImage) -> String {
    let mut stem = normalize_name(&image.resolved_name);
    if stem.is_empty() {
        stem = normalize_name(&image.placeholder_name());
    }
    format!("{}.{}", stem, image.media.extension)
}

/// What happened to an image's filename.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntryAction {
    /// First image to claim the filename.
    Saved,
    /// The filename was already claimed; these bytes replace the stored ones.
    Duplicate,
}

impl EntryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryAction::Saved => "Saved",
            EntryAction::Duplicate => "Duplicate",
        }
    }
}

/// One line of `report.csv`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub source_file: String,
    pub sheet: String,
    pub row: Option<u32>,
    /// Name the image resolved to before normalization.
    pub part_name: String,
    pub final_filename: String,
    pub action: EntryAction,
}

/// A file in the output archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveEntry<'a> {
    pub filename: &'a str,
    pub bytes: &'a [u8],
}

/// Counters handed to the request layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub plan: String,
    /// Images extracted across all files.
    pub processed: usize,
    /// Distinct filenames in the archive.
    pub saved: usize,
    /// Images whose filename was already taken.
    pub duplicate: usize,
    /// Candidates found before per-file caps.
    pub requested: usize,
    pub truncated: bool,
    /// Files that contributed an outcome.
    pub files: usize,
    /// Files rejected as unreadable.
    pub failed_files: usize,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    /// Archive name offered for download.
    pub fn archive_filename(&self) -> String {
        format!("bom2pic_{}.zip", self.created_at.format("%Y%m%d_%H%M%S"))
    }

    /// Response headers describing the archive.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "Content-Disposition",
                format!("attachment; filename={}", self.archive_filename()),
            ),
            ("X-Content-Type-Options", "nosniff".to_string()),
            ("X-B2P-Plan", self.plan.clone()),
            ("X-B2P-Processed", self.processed.to_string()),
            ("X-B2P-Saved", self.saved.to_string()),
            ("X-B2P-Duplicate", self.duplicate.to_string()),
            ("X-B2P-Requested", self.requested.to_string()),
            ("X-B2P-Truncated", self.truncated.to_string()),
        ]
    }
}

/// Extraction outcomes merged into archive order.
#[derive(Debug)]
pub struct Aggregate<'a> {
    /// Every extracted image with its filename, in aggregate order.
    images: Vec<(&'a ExtractedImage, String)>,
    report: Vec<ReportRow>,
    requested: usize,
    truncated: bool,
    files: usize,
    saved: usize,
    duplicate: usize,
}

/// Merge per-file outcomes, given in file arrival order.
pub fn aggregate(outcomes: &[ExtractionOutcome]) -> Aggregate<'_> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut images = Vec::new();
    let mut report = Vec::new();
    let mut requested = 0;
    let mut truncated = false;
    let mut duplicate = 0;

    for outcome in outcomes {
        requested += outcome.total_available;
        truncated |= outcome.truncated;

        for image in &outcome.extracted {
            let filename = output_filename(image);
            let action = if seen.insert(filename.clone()) {
                EntryAction::Saved
            } else {
                duplicate += 1;
                EntryAction::Duplicate
            };
            report.push(ReportRow {
                source_file: image.source_file.clone(),
                sheet: image.sheet.clone(),
                row: image.row_index,
                part_name: image.resolved_name.clone(),
                final_filename: filename.clone(),
                action,
            });
            images.push((image, filename));
        }
    }

    Aggregate {
        saved: seen.len(),
        images,
        report,
        requested,
        truncated,
        files: outcomes.len(),
        duplicate,
    }
}

impl<'a> Aggregate<'a> {
    pub fn processed(&self) -> usize {
        self.images.len()
    }

    pub fn saved(&self) -> usize {
        self.saved
    }

    pub fn duplicate(&self) -> usize {
        self.duplicate
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn report(&self) -> &[ReportRow] {
        &self.report
    }

    /// Surviving entries: for each filename the last image that claimed it,
    /// at that image's position in aggregate order.
    pub fn entries(&self) -> Vec<ArchiveEntry<'_>> {
        let mut last: HashMap<&str, usize> = HashMap::new();
        for (idx, (_, filename)) in self.images.iter().enumerate() {
            last.insert(filename.as_str(), idx);
        }

        self.images
            .iter()
            .enumerate()
            .filter(|(idx, (_, filename))| last.get(filename.as_str()) == Some(idx))
            .map(|(_, (image, filename))| ArchiveEntry {
                filename: filename.as_str(),
                bytes: image.media.bytes.as_slice(),
            })
            .collect()
    }

    pub fn summary(&self, plan: &str) -> Summary {
        Summary {
            plan: plan.to_string(),
            processed: self.processed(),
            saved: self.saved,
            duplicate: self.duplicate,
            requested: self.requested,
            truncated: self.truncated,
            files: self.files,
            failed_files: 0,
            created_at: Utc::now(),
        }
    }

    /// `report.csv` contents.
    pub fn report_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(REPORT_HEADER)?;
        for row in &self.report {
            let row_index = row.row.map(|r| r.to_string()).unwrap_or_default();
            writer.write_record([
                row.source_file.as_str(),
                row.sheet.as_str(),
                row_index.as_str(),
                row.part_name.as_str(),
                row.final_filename.as_str(),
                row.action.as_str(),
            ])?;
        }
        writer.into_inner().map_err(|e| e.into_error().into())
    }

    /// Stream the archive into `writer` and hand it back.
    pub fn write_archive<W: Write + Seek>(&self, settings: &ArchiveSettings, writer: W) -> Result<W> {
        let mut zip = ZipWriter::new(writer);
        let options = settings.compression.file_options();

        let entries = self.entries();
        for entry in &entries {
            zip.start_file(settings.entry_path(entry.filename), options.clone())?;
            zip.write_all(entry.bytes)?;
        }

        if settings.write_report {
            zip.start_file(REPORT_ENTRY, options.clone())?;
            zip.write_all(&self.report_csv()?)?;
        }

        let writer = zip.finish()?;
        tracing::debug!(
            entries = entries.len(),
            duplicate = self.duplicate,
            report = settings.write_report,
            "wrote archive"
        );
        Ok(writer)
    }
}
