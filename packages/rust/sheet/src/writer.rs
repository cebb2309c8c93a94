//! Report output via `rust_xlsxwriter`.

use std::path::Path;

use rust_xlsxwriter::Workbook;
use tracing::{info, instrument};

use regenrich_shared::{EnrichError, Result, Row};

/// Write `rows` to a new single-sheet workbook at `path`, starting at A1.
///
/// Any existing file at `path` is replaced.
#[instrument(skip_all, fields(path = %path.display(), rows = rows.len()))]
pub fn write_report(path: &Path, rows: &[Row]) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (r, row) in rows.iter().enumerate() {
        let r = u32::try_from(r)
            .map_err(|_| EnrichError::output(format!("row index {r} exceeds sheet limits")))?;
        for (c, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let c = u16::try_from(c)
                .map_err(|_| EnrichError::output(format!("column index {c} exceeds sheet limits")))?;
            worksheet
                .write_string(r, c, cell)
                .map_err(|e| EnrichError::output(format!("cell ({r}, {c}): {e}")))?;
        }
    }

    workbook
        .save(path)
        .map_err(|e| EnrichError::output(format!("cannot save {}: {e}", path.display())))?;

    info!("report written");
    Ok(())
}
