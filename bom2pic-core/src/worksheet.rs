//! Single-pass worksheet scan.
//!
//! A worksheet is read once to collect everything extraction needs from it:
//! the drawing relationship id, the row/column geometry used to place
//! absolutely positioned pictures, and the text of the cells in the columns
//! the caller asked for.

use std::collections::BTreeMap;

#[cfg(feature = "fast-hash")]
use hashbrown::HashMap;
#[cfg(not(feature = "fast-hash"))]
use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::cell_text::{format_iso_date_cell, format_numeric_cell, NumberFormats};
use crate::error::{Bom2PicError, Result};
use crate::utils::{cell_key, parse_coordinate_bytes, parse_f64_bytes, parse_u32_bytes, MAX_COLUMN, MAX_ROW};

/// EMUs per typographic point.
pub const EMU_PER_POINT: i64 = 12_700;
/// EMUs per screen pixel at 96 dpi.
pub const EMU_PER_PIXEL: i64 = 9_525;

const DEFAULT_ROW_HEIGHT_PT: f64 = 15.0;
const DEFAULT_COLUMN_WIDTH_PX: i64 = 64;
/// Maximum digit width of the default font, in pixels.
const MAX_DIGIT_WIDTH_PX: f64 = 7.0;

/// Convert a stored column width (in characters) to pixels.
fn column_width_to_px(width: f64) -> i64 {
    if width <= 0.0 {
        return 0;
    }
    let padding = (128.0 / MAX_DIGIT_WIDTH_PX).trunc();
    (((256.0 * width + padding) / 256.0) * MAX_DIGIT_WIDTH_PX).trunc() as i64
}

/// Non-overlapping runs of equally sized rows or columns, keyed by their
/// first 1-indexed position and holding `(last, size)`.
#[derive(Clone, Debug, Default, PartialEq)]
struct Spans(BTreeMap<u32, (u32, i64)>);

impl Spans {
    /// Size `first..=last`, replacing whatever earlier spans covered.
    fn set(&mut self, first: u32, last: u32, size: i64) {
        if first > last {
            return;
        }
        if let Some((&start, &(end, old))) = self.0.range(..first).next_back() {
            if end >= first {
                self.0.insert(start, (first - 1, old));
                if end > last {
                    self.0.insert(last + 1, (end, old));
                }
            }
        }
        let covered: Vec<u32> = self.0.range(first..=last).map(|(&start, _)| start).collect();
        for start in covered {
            if let Some((end, old)) = self.0.remove(&start) {
                if end > last {
                    self.0.insert(last + 1, (end, old));
                }
            }
        }
        self.0.insert(first, (last, size));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Row heights and column widths of a sheet, in EMUs.
#[derive(Clone, Debug, PartialEq)]
pub struct SheetGeometry {
    default_row_emu: i64,
    default_col_emu: i64,
    row_emu: Spans,
    col_emu: Spans,
}

impl Default for SheetGeometry {
    fn default() -> Self {
        SheetGeometry {
            default_row_emu: (DEFAULT_ROW_HEIGHT_PT * EMU_PER_POINT as f64) as i64,
            default_col_emu: DEFAULT_COLUMN_WIDTH_PX * EMU_PER_PIXEL,
            row_emu: Spans::default(),
            col_emu: Spans::default(),
        }
    }
}

impl SheetGeometry {
    pub fn set_default_row_height(&mut self, points: f64) {
        if points > 0.0 {
            self.default_row_emu = (points * EMU_PER_POINT as f64).round() as i64;
        }
    }

    pub fn set_default_column_width(&mut self, width: f64) {
        let px = column_width_to_px(width);
        if px > 0 {
            self.default_col_emu = px * EMU_PER_PIXEL;
        }
    }

    /// `baseColWidth` is in characters, padded and rounded up to a multiple of 8 pixels.
    pub fn set_base_column_width(&mut self, chars: u32) {
        let px = chars as i64 * MAX_DIGIT_WIDTH_PX as i64 + 5;
        let px = (px + 7) / 8 * 8;
        if px > 0 {
            self.default_col_emu = px * EMU_PER_PIXEL;
        }
    }

    /// Set the height of a 1-indexed row, in points.
    pub fn set_row_height(&mut self, row: u32, points: f64) {
        if row == 0 || row > MAX_ROW {
            return;
        }
        let emu = (points.max(0.0) * EMU_PER_POINT as f64).round() as i64;
        self.row_emu.set(row, row, emu);
    }

    /// Set the width of the 1-indexed columns `min..=max`, in characters.
    pub fn set_column_widths(&mut self, min: u32, max: u32, width: f64) {
        let emu = column_width_to_px(width) * EMU_PER_PIXEL;
        self.col_emu.set(min.max(1), max.min(MAX_COLUMN), emu);
    }

    /// Zero-based row containing the vertical offset `y` (EMUs from the sheet's top edge).
    pub fn row_at(&self, y: i64) -> u32 {
        index_at(y, self.default_row_emu, &self.row_emu, MAX_ROW)
    }

    /// Zero-based column containing the horizontal offset `x`.
    pub fn col_at(&self, x: i64) -> u32 {
        index_at(x, self.default_col_emu, &self.col_emu, MAX_COLUMN)
    }
}

fn index_at(offset: i64, default: i64, spans: &Spans, max: u32) -> u32 {
    if offset <= 0 {
        return 0;
    }
    let default = default.max(1);
    let mut start: i64 = 0;
    let mut next: u32 = 1;

    for (&first, &(last, size)) in &spans.0 {
        let gap = (first.saturating_sub(next)) as i64 * default;
        if offset < start.saturating_add(gap) {
            break;
        }
        start = start.saturating_add(gap);
        let run = size.saturating_mul(i64::from(last - first + 1));
        if offset < start.saturating_add(run) {
            // run > 0 here, so size > 0
            return first - 1 + ((offset - start) / size) as u32;
        }
        start = start.saturating_add(run);
        next = last + 1;
    }

    let within = ((offset - start) / default).min(max as i64) as u32;
    next.saturating_sub(1).saturating_add(within).min(max - 1)
}

/// The text of one name-column cell, keyed by its 1-indexed row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowValue {
    pub row_index: u32,
    /// `None` when the cell is absent, empty, or holds an error value.
    pub raw: Option<String>,
}

/// Workbook-level lookups needed to turn cell payloads into text.
#[derive(Clone, Copy, Debug)]
pub struct CellTextContext<'a> {
    pub shared_strings: &'a [String],
    pub number_formats: &'a NumberFormats,
    pub date1904: bool,
}

/// What a worksheet scan produced.
#[derive(Clone, Debug, Default)]
pub struct WorksheetScan {
    /// `r:id` of the sheet's `<drawing>` element.
    pub drawing_rel_id: Option<String>,
    /// Declared `<dimension ref>`, if any.
    pub dimension: Option<String>,
    pub geometry: SheetGeometry,
    values: HashMap<u64, String>,
}

impl WorksheetScan {
    /// Resolve a row's value in one of the captured columns (both 1-indexed).
    pub fn row_value(&self, row: u32, col: u32) -> RowValue {
        RowValue {
            row_index: row,
            raw: self.values.get(&cell_key(row, col)).cloned(),
        }
    }

    /// Last column named by the declared dimension, if it parses.
    pub fn dimension_max_column(&self) -> Option<u32> {
        let dimension = self.dimension.as_deref()?;
        let last = dimension.rsplit(':').next()?;
        parse_coordinate_bytes(last.as_bytes()).map(|(_, col)| col)
    }
}

#[derive(Default)]
struct PendingCell {
    row: u32,
    col: u32,
    cell_type: Option<Vec<u8>>,
    style: Option<u32>,
    value: String,
    inline: String,
}

/// Scan a worksheet, capturing the text of cells in `columns` (1-indexed).
pub fn scan_worksheet(
    xml: &[u8],
    part: &str,
    columns: &[u32],
    ctx: &CellTextContext<'_>,
) -> Result<WorksheetScan> {
    let mut reader = Reader::from_reader(xml);
    // Keep whitespace inside <v> and <t>
    reader.config_mut().trim_text(false);

    let mut scan = WorksheetScan::default();
    let mut buf = Vec::new();

    let mut current_row: u32 = 0;
    let mut last_col: u32 = 0;
    let mut cell: Option<PendingCell> = None;
    let mut in_v = false;
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = row_number(&e, current_row);
                    last_col = 0;
                    apply_row_height(&e, current_row, &mut scan.geometry);
                }
                b"c" => {
                    let pending = start_cell(&e, current_row, last_col);
                    last_col = pending.col;
                    if columns.contains(&pending.col) {
                        cell = Some(pending);
                    }
                }
                b"v" => in_v = cell.is_some(),
                b"t" => in_t = cell.is_some(),
                b"rPh" => in_phonetic = true,
                _ => handle_structural(&e, &mut scan),
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    current_row = row_number(&e, current_row);
                    last_col = 0;
                    apply_row_height(&e, current_row, &mut scan.geometry);
                }
                b"c" => {
                    last_col = start_cell(&e, current_row, last_col).col;
                }
                _ => handle_structural(&e, &mut scan),
            },
            Ok(Event::Text(e)) => {
                if in_v || (in_t && !in_phonetic) {
                    if let Some(pending) = cell.as_mut() {
                        let text = e.unescape().map_err(|err| Bom2PicError::malformed_part(part, err))?;
                        if in_v {
                            pending.value.push_str(&text);
                        } else {
                            pending.inline.push_str(&text);
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"c" => {
                    if let Some(pending) = cell.take() {
                        if let Some(text) = cell_text(&pending, ctx) {
                            scan.values.insert(cell_key(pending.row, pending.col), text);
                        }
                    }
                    in_v = false;
                    in_t = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Bom2PicError::malformed_part(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(scan)
}

fn row_number(e: &BytesStart<'_>, previous: u32) -> u32 {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"r")
        .and_then(|attr| parse_u32_bytes(&attr.value))
        .filter(|&row| row > 0 && row <= MAX_ROW)
        .unwrap_or(previous + 1)
}

fn apply_row_height(e: &BytesStart<'_>, row: u32, geometry: &mut SheetGeometry) {
    let height = e
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"ht")
        .and_then(|attr| parse_f64_bytes(&attr.value));
    let hidden = e
        .attributes()
        .flatten()
        .any(|attr| attr.key.as_ref() == b"hidden" && matches!(attr.value.as_ref(), b"1" | b"true"));

    if hidden {
        geometry.set_row_height(row, 0.0);
    } else if let Some(height) = height {
        geometry.set_row_height(row, height);
    }
}

fn start_cell(e: &BytesStart<'_>, current_row: u32, last_col: u32) -> PendingCell {
    let mut pending = PendingCell::default();
    let mut position = None;

    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"r" => position = parse_coordinate_bytes(&attr.value),
            b"t" => pending.cell_type = Some(attr.value.to_vec()),
            b"s" => pending.style = parse_u32_bytes(&attr.value),
            _ => {}
        }
    }

    // Cells may omit `r`; they then follow the previous cell in the row.
    let (row, col) = position.unwrap_or((current_row.max(1), last_col + 1));
    pending.row = row;
    pending.col = col;
    pending
}

fn cell_text(cell: &PendingCell, ctx: &CellTextContext<'_>) -> Option<String> {
    let text = match cell.cell_type.as_deref() {
        Some(b"s") => {
            let idx = parse_u32_bytes(cell.value.trim().as_bytes())?;
            ctx.shared_strings.get(idx as usize)?.clone()
        }
        Some(b"inlineStr") => cell.inline.clone(),
        Some(b"str") => cell.value.clone(),
        Some(b"b") => match cell.value.trim() {
            "1" | "true" => "TRUE".to_string(),
            "" => return None,
            _ => "FALSE".to_string(),
        },
        Some(b"e") => return None,
        Some(b"d") => format_iso_date_cell(&cell.value),
        _ => {
            let raw = cell.value.trim();
            if raw.is_empty() {
                return None;
            }
            match parse_f64_bytes(raw.as_bytes()) {
                Some(number) => format_numeric_cell(
                    number,
                    ctx.number_formats.category(cell.style),
                    ctx.date1904,
                ),
                None => raw.to_string(),
            }
        }
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn handle_structural(e: &BytesStart<'_>, scan: &mut WorksheetScan) {
    match e.local_name().as_ref() {
        b"drawing" => {
            if scan.drawing_rel_id.is_none() {
                scan.drawing_rel_id = e
                    .attributes()
                    .flatten()
                    .find(|attr| attr.key.local_name().as_ref() == b"id")
                    .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()));
            }
        }
        b"dimension" => {
            scan.dimension = e
                .attributes()
                .flatten()
                .find(|attr| attr.key.as_ref() == b"ref")
                .map(|attr| String::from_utf8_lossy(&attr.value).into_owned());
        }
        b"sheetFormatPr" => {
            for attr in e.attributes().flatten() {
                match attr.key.as_ref() {
                    b"defaultRowHeight" => {
                        if let Some(points) = parse_f64_bytes(&attr.value) {
                            scan.geometry.set_default_row_height(points);
                        }
                    }
                    b"baseColWidth" => {
                        if let Some(chars) = parse_u32_bytes(&attr.value) {
                            scan.geometry.set_base_column_width(chars);
                        }
                    }
                    _ => {}
                }
            }
            // defaultColWidth wins over baseColWidth regardless of attribute order
            if let Some(width) = e
                .attributes()
                .flatten()
                .find(|attr| attr.key.as_ref() == b"defaultColWidth")
                .and_then(|attr| parse_f64_bytes(&attr.value))
            {
                scan.geometry.set_default_column_width(width);
            }
        }
        b"col" => {
            let mut min: Option<u32> = None;
            let mut max: Option<u32> = None;
            let mut width: Option<f64> = None;
            let mut hidden = false;
            for attr in e.attributes().flatten() {
                match attr.key.as_ref() {
                    b"min" => min = parse_u32_bytes(&attr.value),
                    b"max" => max = parse_u32_bytes(&attr.value),
                    b"width" => width = parse_f64_bytes(&attr.value),
                    b"hidden" => hidden = matches!(attr.value.as_ref(), b"1" | b"true"),
                    _ => {}
                }
            }
            if let (Some(min), Some(max)) = (min, max) {
                let width = if hidden { Some(0.0) } else { width };
                if let Some(width) = width {
                    scan.geometry.set_column_widths(min, max, width);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(xml: &str, columns: &[u32], strings: &[String]) -> WorksheetScan {
        let formats = NumberFormats::default();
        let ctx = CellTextContext {
            shared_strings: strings,
            number_formats: &formats,
            date1904: false,
        };
        scan_worksheet(xml.as_bytes(), "xl/worksheets/sheet1.xml", columns, &ctx).unwrap()
    }

    #[test]
    fn test_captures_requested_columns_only() {
        let strings = vec!["R1".to_string(), "C-100".to_string()];
        let xml = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"
            xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <dimension ref="A1:C3"/>
            <sheetData>
                <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>12</v></c></row>
                <row r="2"><c r="A2" t="inlineStr"><is><t>R2</t></is></c><c r="B2" t="s"><v>1</v></c></row>
                <row r="3"><c r="A3"><f>1+1</f></c><c r="B3" t="e"><v>#N/A</v></c></row>
            </sheetData>
            <drawing r:id="rId7"/>
        </worksheet>"#;
        let result = scan(xml, &[1], &strings);

        assert_eq!(result.drawing_rel_id.as_deref(), Some("rId7"));
        assert_eq!(result.row_value(1, 1).raw.as_deref(), Some("R1"));
        assert_eq!(result.row_value(2, 1).raw.as_deref(), Some("R2"));
        // formula without a cached value
        assert_eq!(result.row_value(3, 1).raw, None);
        // column B was not requested
        assert_eq!(result.row_value(1, 2).raw, None);
        assert_eq!(result.values.len(), 2);
        assert_eq!(result.dimension_max_column(), Some(3));
    }

    #[test]
    fn test_value_rendering() {
        let xml = r#"<worksheet><sheetData>
            <row r="1"><c r="A1"><v>1001</v></c></row>
            <row r="2"><c r="A2"><v>2.50</v></c></row>
            <row r="3"><c r="A3" t="b"><v>1</v></c></row>
            <row r="4"><c r="A4" t="str"><f>"X"&amp;"Y"</f><v>XY</v></c></row>
            <row r="5"><c r="A5" t="e"><v>#DIV/0!</v></c></row>
            <row r="6"><c r="A6" t="inlineStr"><is><t>   </t></is></c></row>
        </sheetData></worksheet>"#;
        let result = scan(xml, &[1], &[]);
        assert_eq!(result.row_value(1, 1).raw.as_deref(), Some("1001"));
        assert_eq!(result.row_value(2, 1).raw.as_deref(), Some("2.5"));
        assert_eq!(result.row_value(3, 1).raw.as_deref(), Some("TRUE"));
        assert_eq!(result.row_value(4, 1).raw.as_deref(), Some("XY"));
        assert_eq!(result.row_value(5, 1).raw, None);
        assert_eq!(result.row_value(6, 1).raw, None);
    }

    #[test]
    fn test_cells_without_references() {
        let xml = r#"<worksheet><sheetData>
            <row><c t="inlineStr"><is><t>first</t></is></c><c t="inlineStr"><is><t>second</t></is></c></row>
            <row><c/><c t="inlineStr"><is><t>fourth</t></is></c></row>
        </sheetData></worksheet>"#;
        let result = scan(xml, &[2], &[]);
        assert_eq!(result.row_value(1, 2).raw.as_deref(), Some("second"));
        assert_eq!(result.row_value(2, 2).raw.as_deref(), Some("fourth"));
    }

    #[test]
    fn test_geometry_from_sheet() {
        let xml = r#"<worksheet>
            <sheetFormatPr defaultRowHeight="20"/>
            <cols><col min="1" max="2" width="21.42578125" customWidth="1"/></cols>
            <sheetData><row r="2" ht="40" customHeight="1"/></sheetData>
        </worksheet>"#;
        let result = scan(xml, &[], &[]);
        let geometry = &result.geometry;

        // row 1 is 20pt, row 2 is 40pt, rest 20pt
        assert_eq!(geometry.row_at(0), 0);
        assert_eq!(geometry.row_at(20 * EMU_PER_POINT - 1), 0);
        assert_eq!(geometry.row_at(20 * EMU_PER_POINT), 1);
        assert_eq!(geometry.row_at(59 * EMU_PER_POINT), 1);
        assert_eq!(geometry.row_at(60 * EMU_PER_POINT), 2);
        assert_eq!(geometry.row_at(100 * EMU_PER_POINT), 4);

        // columns A and B are 150px, then 64px defaults
        assert_eq!(geometry.col_at(149 * EMU_PER_PIXEL), 0);
        assert_eq!(geometry.col_at(150 * EMU_PER_PIXEL), 1);
        assert_eq!(geometry.col_at(300 * EMU_PER_PIXEL), 2);
        assert_eq!(geometry.col_at(364 * EMU_PER_PIXEL), 3);
    }

    #[test]
    fn test_full_width_columns_stay_single_spans() {
        let mut xml = String::from("<worksheet><cols>");
        for _ in 0..1000 {
            xml.push_str(r#"<col min="1" max="16384" width="9"/>"#);
        }
        xml.push_str("</cols><sheetData/></worksheet>");
        let result = scan(&xml, &[], &[]);
        let geometry = &result.geometry;

        assert_eq!(geometry.col_emu.len(), 1);
        let width = column_width_to_px(9.0) * EMU_PER_PIXEL;
        assert_eq!(geometry.col_at(width * 5 + 1), 5);
        assert_eq!(geometry.col_at(i64::MAX), MAX_COLUMN - 1);
    }

    #[test]
    fn test_later_columns_override_earlier_spans() {
        let mut geometry = SheetGeometry::default();
        let wide = column_width_to_px(20.0) * EMU_PER_PIXEL;
        let narrow = column_width_to_px(5.0) * EMU_PER_PIXEL;
        geometry.set_column_widths(1, 10, 20.0);
        geometry.set_column_widths(3, 4, 5.0);
        assert_eq!(geometry.col_emu.len(), 3);

        // A, B wide; C, D narrow; E.. wide again
        assert_eq!(geometry.col_at(2 * wide - 1), 1);
        assert_eq!(geometry.col_at(2 * wide), 2);
        assert_eq!(geometry.col_at(2 * wide + 2 * narrow), 4);
        assert_eq!(geometry.col_at(2 * wide + 2 * narrow + 6 * wide), 10);

        geometry.set_column_widths(1, 16384, 5.0);
        assert_eq!(geometry.col_emu.len(), 1);
        assert_eq!(geometry.col_at(3 * narrow), 3);
    }

    #[test]
    fn test_default_geometry() {
        let geometry = SheetGeometry::default();
        assert_eq!(geometry.row_at(-5), 0);
        assert_eq!(geometry.row_at(190_500 * 3), 3);
        assert_eq!(geometry.col_at(64 * EMU_PER_PIXEL * 2 + 1), 2);
        assert_eq!(geometry.row_at(i64::MAX), MAX_ROW - 1);
    }

    #[test]
    fn test_malformed_sheet() {
        let formats = NumberFormats::default();
        let ctx = CellTextContext {
            shared_strings: &[],
            number_formats: &formats,
            date1904: false,
        };
        let err = scan_worksheet(b"<worksheet><sheetData></worksheet>", "xl/worksheets/sheet1.xml", &[1], &ctx)
            .unwrap_err();
        assert!(matches!(err, Bom2PicError::MalformedPart { .. }));
    }
}
