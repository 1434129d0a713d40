#![no_main]

//! Fuzz target for the XML parts walked during extraction: relationship
//! descriptors, drawings and worksheets.
//!
//! Malformed markup must come back as an error, never a panic, and parsed
//! anchors must resolve without overflow on any sheet geometry.

use bom2pic_core::cell_text::NumberFormats;
use bom2pic_core::relationships::parse_relationships;
use bom2pic_core::worksheet::{scan_worksheet, CellTextContext};
use bom2pic_core::parse_drawing;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(rels) = parse_relationships(data, "xl/drawings/drawing1.xml") {
        for rel in rels.iter() {
            // Lookups by id must find what iteration yields.
            assert!(rels.get(&rel.id).is_some());
        }
    }

    let formats = NumberFormats::default();
    let shared = vec!["shared".to_string()];
    let ctx = CellTextContext {
        shared_strings: &shared,
        number_formats: &formats,
        date1904: false,
    };
    let geometry = scan_worksheet(data, "xl/worksheets/sheet1.xml", &[1, 3], &ctx)
        .map(|scan| scan.geometry)
        .unwrap_or_default();

    if let Ok(pictures) = parse_drawing(data, "xl/drawings/drawing1.xml") {
        for picture in pictures {
            let _ = picture.anchor.resolve(&geometry);
            assert!(!picture.relationship_id.is_empty());
        }
    }
});
