//! Core domain types for registry enrichment.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{EnrichError, Result};

/// Registration numbers are 13 digits (organizations) or 15 digits (individuals).
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]{13}|[0-9]{15})$").expect("static regex"));

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// A validated registry number: ASCII digits only, length 13 or 15.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Validate `raw` (after trimming surrounding whitespace).
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if IDENTIFIER_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(EnrichError::validation(format!(
                "{trimmed:?} is not a 13 or 15 digit registration number"
            )))
        }
    }

    /// Whether `raw` would pass [`Identifier::parse`].
    pub fn is_valid(raw: &str) -> bool {
        IDENTIFIER_RE.is_match(raw.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Identifier {
    type Err = EnrichError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Registry data for one identifier, as produced by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub identifier: Identifier,
    /// Free-form contact text (phones, e-mails, sites).
    pub contact: String,
    /// Human-readable financial summary; empty for individuals.
    pub finances: String,
    /// Secondary tax id, when the registry reports one.
    pub secondary_id: Option<String>,
    /// Director name for organizations, own full name for individuals.
    pub ceo: Option<String>,
}

// ---------------------------------------------------------------------------
// Row / Table
// ---------------------------------------------------------------------------

/// One spreadsheet line as cell strings.
pub type Row = Vec<String>;

/// A rectangular row table; the first row is the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    /// Build a table, padding every row with empty cells to the widest row.
    pub fn new(mut rows: Vec<Row>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        Self { rows }
    }

    /// Number of cells in every row.
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn header(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// All rows after the header.
    pub fn data_rows(&self) -> &[Row] {
        self.rows.get(1..).unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
