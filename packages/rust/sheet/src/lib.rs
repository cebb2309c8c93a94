//! Spreadsheet input and output.
//!
//! - [`reader`] loads a worksheet into a padded [`Table`](regenrich_shared::Table)
//! - [`writer`] serializes merged rows into a fresh single-sheet workbook

pub mod reader;
pub mod writer;

pub use reader::read_table;
pub use writer::write_report;
