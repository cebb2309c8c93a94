//! Identifier extraction from the source table.

use std::collections::HashSet;

use tracing::info;

use regenrich_shared::{EnrichError, Identifier, Result, Table};

/// Identifiers pulled from one table.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Index of the identifier column in every row.
    pub column_index: usize,
    /// Data rows inspected, before shape validation.
    pub candidates: usize,
    /// Valid identifiers in row order, duplicates included.
    pub identifiers: Vec<Identifier>,
}

/// Locate the header cell equal to `label` (surrounding whitespace ignored).
pub fn find_identifier_column(table: &Table, label: &str) -> Result<usize> {
    let wanted = label.trim();
    table
        .header()
        .and_then(|header| header.iter().position(|cell| cell.trim() == wanted))
        .ok_or_else(|| {
            EnrichError::input(format!("identifier column {wanted:?} not found in header row"))
        })
}

/// Read the identifier column of every data row, keeping only well-formed values.
pub fn extract_identifiers(table: &Table, label: &str) -> Result<Extraction> {
    let column_index = find_identifier_column(table, label)?;

    let candidates = table.data_rows().len();
    let identifiers: Vec<Identifier> = table
        .data_rows()
        .iter()
        .filter_map(|row| row.get(column_index))
        .filter_map(|cell| Identifier::parse(cell).ok())
        .collect();

    info!(
        column_index,
        candidates,
        valid = identifiers.len(),
        "identifiers extracted"
    );

    Ok(Extraction {
        column_index,
        candidates,
        identifiers,
    })
}

/// Drop repeated identifiers, keeping first occurrences in order.
pub fn dedupe(ids: Vec<Identifier>) -> Vec<Identifier> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
