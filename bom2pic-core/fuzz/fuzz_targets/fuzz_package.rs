#![no_main]

//! Fuzz target for whole-file extraction.
//!
//! Arbitrary bytes, and arbitrary parts inside a well-formed zip, are fed
//! through `extract_file`. Any input must either fail with a file-level
//! error or produce an outcome that honors the per-file cap.

use std::io::{Cursor, Write};

use arbitrary::Arbitrary;
use bom2pic_core::{extract_file, ColumnSelection, ExtractOptions};
use libfuzzer_sys::fuzz_target;
use zip::write::SimpleFileOptions;

#[derive(Arbitrary, Debug)]
struct PackageInput {
    raw: bool,
    parts: Vec<(String, Vec<u8>)>,
    cap: Option<u8>,
}

const FIXED_PARTS: [&str; 6] = [
    "[Content_Types].xml",
    "xl/workbook.xml",
    "xl/_rels/workbook.xml.rels",
    "xl/worksheets/sheet1.xml",
    "xl/worksheets/_rels/sheet1.xml.rels",
    "xl/drawings/drawing1.xml",
];

fn build_zip(parts: &[(String, Vec<u8>)]) -> Option<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (idx, (name, data)) in parts.iter().enumerate() {
        // Steer most parts onto the paths extraction actually reads.
        let name = FIXED_PARTS.get(idx).map_or(name.as_str(), |fixed| *fixed);
        zip.start_file(name, SimpleFileOptions::default()).ok()?;
        zip.write_all(data).ok()?;
    }
    Some(zip.finish().ok()?.into_inner())
}

fuzz_target!(|input: PackageInput| {
    let bytes = if input.raw {
        input.parts.into_iter().flat_map(|(_, data)| data).collect()
    } else {
        match build_zip(&input.parts) {
            Some(bytes) => bytes,
            None => return,
        }
    };

    let columns = ColumnSelection { image_column: 1, name_column: 3 };
    let options = ExtractOptions {
        cap: input.cap.map(usize::from),
        parallel: false,
        max_part_bytes: 1 << 20,
        ..ExtractOptions::default()
    };

    if let Ok(outcome) = extract_file("fuzz.xlsx", &bytes, &columns, &options) {
        assert!(outcome.processed() <= outcome.total_available);
        if let Some(cap) = options.cap {
            assert!(outcome.processed() <= cap);
            assert_eq!(outcome.truncated, outcome.total_available > cap);
        }
        for (seq, image) in outcome.extracted.iter().enumerate() {
            assert!(image.sequence_in_file >= seq);
        }
    }
});
