#![no_main]

//! Fuzz target for caller-supplied column references and cell coordinates.
//!
//! Column references arrive straight from request parameters, so they must
//! never panic and must only ever yield columns inside A..=XFD.

use arbitrary::Arbitrary;
use bom2pic_core::utils::{
    column_to_letter, letter_to_column, parse_column_reference, parse_coordinate_bytes, MAX_COLUMN,
};
use bom2pic_core::ColumnSelection;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct ColumnInput {
    image_column: String,
    name_column: String,
    coordinate: Vec<u8>,
    column: u32,
}

fn check_reference(input: &str) {
    if let Ok(col) = parse_column_reference(input) {
        assert!((1..=MAX_COLUMN).contains(&col), "column {} out of range for {:?}", col, input);
        assert!(input.trim().len() <= 3);
        // Accepted references print back as the same letters, upper-cased.
        assert_eq!(column_to_letter(col), input.trim().to_ascii_uppercase());
    }
}

fuzz_target!(|input: ColumnInput| {
    check_reference(&input.image_column);
    check_reference(&input.name_column);

    if let Ok(selection) = ColumnSelection::parse(&input.image_column, &input.name_column) {
        assert!(selection.image_column >= 1 && selection.name_column >= 1);
    }

    if let Some((row, col)) = parse_coordinate_bytes(&input.coordinate) {
        assert!(row > 0 && col > 0);
    }

    let column = input.column % (MAX_COLUMN + 1);
    if column > 0 {
        let letters = column_to_letter(column);
        assert_eq!(letter_to_column(&letters).ok(), Some(column));
    }
});
