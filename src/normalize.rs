//! Cleanup of cell values before they are persisted
//!
//! Source files encode missing data inconsistently: empty fields,
//! whitespace-only fields and the literal text "nan" all occur. They are all
//! mapped to a single sentinel text, so output columns never contain nulls.
//! Note that this conflates fields that were literally "nan" with absent ones.

use crate::parser::{Chunk, Record};
use rayon::prelude::*;
use unicase::UniCase;

/// Replacement text for missing values
pub const MISSING: &str = "Não informado";

/// Normalize a single cell
///
/// Leading and trailing whitespace is removed, then empty values and any
/// casing of "nan" become [`MISSING`]. Other values are kept as they are.
pub fn normalize_cell(cell: &str) -> Box<str> {
    let trimmed = cell.trim();
    if is_missing(trimmed) {
        MISSING.into()
    } else {
        trimmed.into()
    }
}

/// Normalize every cell of a chunk, preserving row and column order
pub fn normalize_chunk(chunk: Chunk) -> Chunk {
    let first_row = chunk.first_row();
    let records = (chunk.into_records().into_par_iter())
        .map(normalize_record)
        .collect::<Vec<_>>();
    Chunk::new(first_row, records)
}

/// Normalize every cell of a record
fn normalize_record(record: Record) -> Record {
    (record.into_vec().into_iter())
        .map(|cell| {
            // Avoid reallocating cells that are already clean
            let trimmed = cell.trim();
            if trimmed.len() == cell.len() && !is_missing(trimmed) {
                cell
            } else {
                normalize_cell(&cell)
            }
        })
        .collect()
}

/// Truth that a trimmed cell denotes a missing value
fn is_missing(trimmed: &str) -> bool {
    trimmed.is_empty() || UniCase::new(trimmed) == UniCase::new("nan")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(rows: &[&[&str]]) -> Chunk {
        Chunk::new(
            7,
            rows.iter()
                .map(|row| row.iter().map(|&cell| cell.into()).collect())
                .collect(),
        )
    }

    fn rows(chunk: &Chunk) -> Vec<Vec<&str>> {
        (chunk.records().iter())
            .map(|record| record.iter().map(|cell| &**cell).collect())
            .collect()
    }

    #[test]
    fn sentinel_coverage() {
        for missing in ["", "   ", "\t", "nan", "NaN", "NAN", " nan ", "nAn"] {
            assert_eq!(&*normalize_cell(missing), MISSING, "{missing:?}");
        }
    }

    #[test]
    fn other_values_are_only_trimmed() {
        assert_eq!(&*normalize_cell("  Acme Corp "), "Acme Corp");
        assert_eq!(&*normalize_cell("0"), "0");
        assert_eq!(&*normalize_cell("nana"), "nana");
        assert_eq!(&*normalize_cell("n a n"), "n a n");
        assert_eq!(&*normalize_cell("SÃO PAULO"), "SÃO PAULO");
        assert_eq!(&*normalize_cell(MISSING), MISSING);
    }

    #[test]
    fn chunk_shape_and_order_are_preserved() {
        let input = chunk(&[&["001", "Acme Corp", "", ""], &["002", " ", "Ltda", "SP"]]);
        let output = normalize_chunk(input);
        assert_eq!(output.first_row(), 7);
        assert_eq!(
            rows(&output),
            [
                vec!["001", "Acme Corp", MISSING, MISSING],
                vec!["002", MISSING, "Ltda", "SP"],
            ]
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = chunk(&[
            &[" a ", "nan", ""],
            &["NaN", MISSING, "b"],
            &["\u{a0}c\u{a0}", " NAN", "d  "],
        ]);
        let once = normalize_chunk(input);
        let twice = normalize_chunk(once.clone());
        assert_eq!(once, twice);
        assert_eq!(rows(&once)[2], ["c", MISSING, "d"]);
    }

    #[test]
    fn chunk_cells_match_cell_normalization() {
        let cells = ["  x", "nan ", "", "y", " NaN z "];
        let output = normalize_chunk(chunk(&[&cells]));
        for (cell, normalized) in cells.iter().zip(output.records()[0].iter()) {
            assert_eq!(*normalized, normalize_cell(cell));
        }
    }
}
