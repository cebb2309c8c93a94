//! Worksheet loading via `calamine`.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use tracing::{debug, instrument};

use regenrich_shared::{EnrichError, Result, Row, Table};

/// Largest float that still maps exactly onto an integer (2^53).
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

/// Read `sheet` (or the first worksheet) of the workbook at `path`.
///
/// Rows above and columns left of the sheet's used range come back empty, so
/// the header is always sheet row 1 and cell indexes match column letters.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| EnrichError::input(format!("cannot open {}: {e}", path.display())))?;

    let names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| {
                EnrichError::input(format!(
                    "sheet {wanted:?} not found in {} (available: {})",
                    path.display(),
                    names.join(", ")
                ))
            })?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| EnrichError::input(format!("{} has no sheets", path.display())))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| EnrichError::input(format!("cannot read sheet {name:?}: {e}")))?;

    let (row_offset, col_offset) = range
        .start()
        .map_or((0, 0), |(row, col)| (row as usize, col as usize));
    let mut rows: Vec<Row> = vec![Vec::new(); row_offset];
    rows.extend(range.rows().map(|cells| {
        let mut row = vec![String::new(); col_offset];
        row.extend(cells.iter().map(cell_text));
        row
    }));

    let table = Table::new(rows);
    debug!(sheet = %name, rows = table.rows().len(), width = table.width(), "sheet loaded");
    Ok(table)
}

/// Render one cell as text. Whole floats lose their fractional part so that
/// numeric registration numbers read back as plain digits.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT => {
            format!("{}", *f as i64)
        }
        other => other.to_string(),
    }
}
