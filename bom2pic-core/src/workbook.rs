//! Workbook manifest: the ordered list of worksheets and the workbook-level
//! tables (shared strings, number formats, date system) that cell text
//! depends on.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::cell_text::{parse_shared_strings, NumberFormats};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::error::{Bom2PicError, Result};
use crate::package::Package;
use crate::relationships::{load_relationships, RelationshipType, Relationships};
use crate::worksheet::CellTextContext;

/// Conventional location of the workbook part.
pub const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// A worksheet listed by the workbook, in tab order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub sheet_id: Option<u32>,
    /// Package path of the worksheet part.
    pub part: String,
    /// `state="hidden"` or `"veryHidden"`.
    pub hidden: bool,
}

/// Everything read from the workbook part and its direct relationships.
#[derive(Clone, Debug, Default)]
pub struct WorkbookManifest {
    pub part: String,
    pub sheets: Vec<SheetEntry>,
    pub date1904: bool,
    pub shared_strings: Vec<String>,
    pub number_formats: NumberFormats,
    /// Problems with optional workbook parts that were worked around.
    pub diagnostics: Vec<Diagnostic>,
}

struct RawSheet {
    name: String,
    sheet_id: Option<u32>,
    rel_id: Option<String>,
    hidden: bool,
}

impl WorkbookManifest {
    /// Read the manifest from an opened package.
    ///
    /// Fails when the workbook part is missing or unparseable. Malformed
    /// shared-strings or styles parts only degrade cell text and are
    /// recorded as diagnostics.
    pub fn load(package: &mut Package<'_>) -> Result<Self> {
        let part = locate_workbook_part(package)?;
        let xml = package.read_part(&part)?.ok_or_else(|| {
            Bom2PicError::MalformedContainer(format!("workbook part {} not found", part))
        })?;
        let (raw_sheets, date1904) = parse_workbook_xml(&xml, &part)?;

        let mut diagnostics = Vec::new();
        let rels = match load_relationships(package, &part) {
            Ok(rels) => rels,
            Err(e) => {
                diagnostics.push(Diagnostic::new(DiagnosticKind::MalformedRelationships, e.to_string()));
                Relationships::empty()
            }
        };

        let mut sheets = Vec::with_capacity(raw_sheets.len());
        for raw in raw_sheets {
            match sheet_part(package, &rels, &raw) {
                Some(sheet_part) => sheets.push(SheetEntry {
                    name: raw.name,
                    sheet_id: raw.sheet_id,
                    part: sheet_part,
                    hidden: raw.hidden,
                }),
                None => tracing::debug!(sheet = %raw.name, "skipping non-worksheet sheet entry"),
            }
        }

        let shared_strings = match optional_part(package, &rels, RelationshipType::SharedStrings, "xl/sharedStrings.xml") {
            Some(path) => match package
                .read_part(&path)
                .and_then(|xml| parse_shared_strings(&xml.unwrap_or_default(), &path))
            {
                Ok(strings) => strings,
                Err(e) => {
                    diagnostics.push(Diagnostic::new(DiagnosticKind::MalformedPart, e.to_string()).with_part(&path));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let number_formats = match optional_part(package, &rels, RelationshipType::Styles, "xl/styles.xml") {
            Some(path) => match package
                .read_part(&path)
                .and_then(|xml| NumberFormats::parse(&xml.unwrap_or_default(), &path))
            {
                Ok(formats) => formats,
                Err(e) => {
                    diagnostics.push(Diagnostic::new(DiagnosticKind::MalformedPart, e.to_string()).with_part(&path));
                    NumberFormats::default()
                }
            },
            None => NumberFormats::default(),
        };

        Ok(WorkbookManifest {
            part,
            sheets,
            date1904,
            shared_strings,
            number_formats,
            diagnostics,
        })
    }

    /// Lookups for rendering cell text.
    pub fn text_context(&self) -> CellTextContext<'_> {
        CellTextContext {
            shared_strings: &self.shared_strings,
            number_formats: &self.number_formats,
            date1904: self.date1904,
        }
    }
}

/// Find the workbook part through the package relationships.
fn locate_workbook_part(package: &mut Package<'_>) -> Result<String> {
    // The package-level descriptor lives at _rels/.rels; a broken one is not fatal
    // as long as the conventional workbook part exists.
    let from_rels = load_relationships(package, "")
        .ok()
        .and_then(|rels| {
            rels.first_of_kind(RelationshipType::OfficeDocument)
                .map(|rel| rel.target_path.clone())
        })
        .filter(|path| package.contains(path));

    match from_rels {
        Some(path) => Ok(path),
        None if package.contains(DEFAULT_WORKBOOK_PART) => Ok(DEFAULT_WORKBOOK_PART.to_string()),
        None => Err(Bom2PicError::MalformedContainer(
            "no workbook part in package".to_string(),
        )),
    }
}

fn sheet_part(package: &Package<'_>, rels: &Relationships, raw: &RawSheet) -> Option<String> {
    if let Some(rel) = raw.rel_id.as_deref().and_then(|id| rels.get(id)) {
        return match rel.kind {
            RelationshipType::Worksheet if !rel.external => Some(rel.target_path.clone()),
            _ => None,
        };
    }
    // Legacy fallback for workbooks with a missing or incomplete descriptor
    let fallback = format!("xl/worksheets/sheet{}.xml", raw.sheet_id?);
    package.contains(&fallback).then_some(fallback)
}

fn optional_part(
    package: &Package<'_>,
    rels: &Relationships,
    kind: RelationshipType,
    conventional: &str,
) -> Option<String> {
    rels.first_of_kind(kind)
        .map(|rel| rel.target_path.clone())
        .filter(|path| package.contains(path))
        .or_else(|| package.contains(conventional).then(|| conventional.to_string()))
}

fn attr_string(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn read_sheet(e: &BytesStart<'_>) -> Option<RawSheet> {
    let name = attr_string(e, b"name")?;
    let sheet_id = attr_string(e, b"sheetId").and_then(|id| id.parse().ok());
    // r:id attribute (namespace-qualified)
    let rel_id = e
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == b"id" && attr.key.as_ref() != b"id")
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()));
    let hidden = matches!(attr_string(e, b"state").as_deref(), Some("hidden") | Some("veryHidden"));
    Some(RawSheet {
        name,
        sheet_id,
        rel_id,
        hidden,
    })
}

/// Parse `workbook.xml` into its sheet list and date system.
fn parse_workbook_xml(xml: &[u8], part: &str) -> Result<(Vec<RawSheet>, bool)> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    let mut date1904 = false;
    let mut saw_root = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"workbook" => saw_root = true,
                b"sheet" => {
                    if let Some(sheet) = read_sheet(&e) {
                        sheets.push(sheet);
                    }
                }
                b"workbookPr" => {
                    date1904 = matches!(attr_string(&e, b"date1904").as_deref(), Some("1") | Some("true"));
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Bom2PicError::malformed_part(part, e)),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Bom2PicError::malformed_part(part, "missing <workbook> root"));
    }

    Ok((sheets, date1904))
}
