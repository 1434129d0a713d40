//! In-memory xlsx fixtures for the integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// PNG-signed bytes carrying a marker so images can be told apart.
pub fn png(marker: u32) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(&marker.to_le_bytes());
    bytes
}

/// Marker written by [`png`].
pub fn marker(bytes: &[u8]) -> u32 {
    let tail: [u8; 4] = bytes[bytes.len() - 4..].try_into().unwrap();
    u32::from_le_bytes(tail)
}

pub struct Picture {
    /// Column letter the picture is anchored in.
    pub col: String,
    /// 1-indexed row.
    pub row: u32,
    pub media: Vec<u8>,
}

#[derive(Default)]
pub struct SheetFixture {
    pub name: String,
    cells: Vec<(u32, String, String)>,
    pictures: Vec<Picture>,
    drop_rels: bool,
}

impl SheetFixture {
    pub fn new(name: &str) -> Self {
        SheetFixture {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Put a string in `col`/`row`.
    pub fn cell(mut self, col: &str, row: u32, value: &str) -> Self {
        self.cells.push((row, col.to_string(), value.to_string()));
        self
    }

    pub fn picture(mut self, col: &str, row: u32, media: Vec<u8>) -> Self {
        self.pictures.push(Picture {
            col: col.to_string(),
            row,
            media,
        });
        self
    }

    /// Leave out the worksheet's relationship part while keeping its drawing reference.
    pub fn without_rels(mut self) -> Self {
        self.drop_rels = true;
        self
    }
}

#[derive(Default)]
pub struct WorkbookFixture {
    sheets: Vec<SheetFixture>,
}

impl WorkbookFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, sheet: SheetFixture) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        zip_parts(&self.parts())
    }

    /// Package parts in write order, for tests that need to tamper with one.
    pub fn parts(&self) -> Vec<(String, Vec<u8>)> {
        let mut parts: Vec<(String, Vec<u8>)> = Vec::new();
        parts.push((
            "[Content_Types].xml".to_string(),
            br#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="png" ContentType="image/png"/></Types>"#.to_vec(),
        ));
        parts.push((
            "_rels/.rels".to_string(),
            br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#.to_vec(),
        ));

        let mut sheets_xml = String::new();
        let mut workbook_rels = String::new();
        let mut media_counter = 0;

        for (idx, sheet) in self.sheets.iter().enumerate() {
            let n = idx + 1;
            sheets_xml.push_str(&format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                escape(&sheet.name),
                n,
                n
            ));
            workbook_rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));

            parts.push((format!("xl/worksheets/sheet{n}.xml"), worksheet_xml(sheet).into_bytes()));

            if sheet.pictures.is_empty() {
                continue;
            }
            if !sheet.drop_rels {
                parts.push((
                    format!("xl/worksheets/_rels/sheet{n}.xml.rels"),
                    format!(
                        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing{n}.xml"/></Relationships>"#
                    )
                    .into_bytes(),
                ));
            }

            let mut anchors = String::new();
            let mut drawing_rels = String::new();
            for (pic_idx, picture) in sheet.pictures.iter().enumerate() {
                media_counter += 1;
                let rid = pic_idx + 1;
                let col = column_index(&picture.col);
                let row = picture.row - 1;
                anchors.push_str(&format!(
                    r#"<xdr:twoCellAnchor editAs="oneCell"><xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>{}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to><xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{}" name="Picture {rid}"/><xdr:cNvPicPr/></xdr:nvPicPr><xdr:blipFill><a:blip r:embed="rId{rid}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill><xdr:spPr/></xdr:pic><xdr:clientData/></xdr:twoCellAnchor>"#,
                    col + 1,
                    row + 1,
                    rid + 1
                ));
                drawing_rels.push_str(&format!(
                    r#"<Relationship Id="rId{rid}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image{media_counter}.png"/>"#
                ));
                parts.push((format!("xl/media/image{media_counter}.png"), picture.media.clone()));
            }

            parts.push((
                format!("xl/drawings/drawing{n}.xml"),
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{anchors}</xdr:wsDr>"#
                )
                .into_bytes(),
            ));
            parts.push((
                format!("xl/drawings/_rels/drawing{n}.xml.rels"),
                format!(
                    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{drawing_rels}</Relationships>"#
                )
                .into_bytes(),
            ));
        }

        parts.push((
            "xl/workbook.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{sheets_xml}</sheets></workbook>"#
            )
            .into_bytes(),
        ));
        parts.push((
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{workbook_rels}</Relationships>"#
            )
            .into_bytes(),
        ));

        parts
    }
}

fn worksheet_xml(sheet: &SheetFixture) -> String {
    let mut rows: Vec<u32> = sheet.cells.iter().map(|(row, _, _)| *row).collect();
    rows.sort_unstable();
    rows.dedup();

    let mut data = String::new();
    for row in rows {
        data.push_str(&format!(r#"<row r="{row}">"#));
        let mut cells: Vec<&(u32, String, String)> = sheet.cells.iter().filter(|(r, _, _)| *r == row).collect();
        cells.sort_by_key(|(_, col, _)| column_index(col));
        for (_, col, value) in cells {
            data.push_str(&format!(
                r#"<c r="{col}{row}" t="inlineStr"><is><t>{}</t></is></c>"#,
                escape(value)
            ));
        }
        data.push_str("</row>");
    }

    let drawing = if sheet.pictures.is_empty() {
        ""
    } else {
        r#"<drawing r:id="rId1"/>"#
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetData>{data}</sheetData>{drawing}</worksheet>"#
    )
}

/// Zero-based column index of a letter reference.
fn column_index(col: &str) -> u32 {
    col.bytes()
        .fold(0u32, |acc, b| acc * 26 + u32::from(b.to_ascii_uppercase() - b'A' + 1))
        - 1
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Swap the contents of one part.
pub fn replace_part(parts: &mut [(String, Vec<u8>)], name: &str, data: Vec<u8>) {
    let part = parts.iter_mut().find(|(n, _)| n == name).unwrap();
    part.1 = data;
}

pub fn zip_parts(parts: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in parts {
        zip.start_file(name.as_str(), SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A BOM sheet with `count` pictures in column A, named `R1..` in column C.
pub fn bom_sheet(name: &str, count: u32, marker_base: u32) -> SheetFixture {
    let mut sheet = SheetFixture::new(name).cell("C", 1, "Part");
    for i in 0..count {
        let row = i + 2;
        sheet = sheet
            .cell("C", row, &format!("R{}", i + 1))
            .picture("A", row, png(marker_base + i));
    }
    sheet
}

/// Entry names and contents of an archive.
pub fn read_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        entries.push((file.name().to_string(), data));
    }
    entries
}
