//! Joining registry records back onto the source rows.

use std::collections::HashMap;

use regenrich_shared::{ColumnLabels, Record, Row, Table};

/// Append registry data to every row of `table`.
///
/// The header gains the four `labels`. A data row whose identifier cell
/// matches a record gains contact, finances, secondary id and CEO, in that
/// order; any other row gains the single `placeholder` cell.
pub fn merge(
    table: &Table,
    column_index: usize,
    records: &[Record],
    labels: &ColumnLabels,
    placeholder: &str,
) -> Vec<Row> {
    let Some(header) = table.header() else {
        return Vec::new();
    };

    let by_id: HashMap<&str, &Record> = records
        .iter()
        .map(|r| (r.identifier.as_str(), r))
        .collect();

    let mut merged = Vec::with_capacity(table.rows().len());

    let mut head = header.clone();
    head.extend([
        labels.contact.clone(),
        labels.finances.clone(),
        labels.secondary_id.clone(),
        labels.ceo.clone(),
    ]);
    merged.push(head);

    for row in table.data_rows() {
        let mut out = row.clone();
        let record = row
            .get(column_index)
            .and_then(|cell| by_id.get(cell.trim()));
        match record {
            Some(record) => out.extend([
                record.contact.clone(),
                record.finances.clone(),
                record.secondary_id.clone().unwrap_or_default(),
                record.ceo.clone().unwrap_or_default(),
            ]),
            None => out.push(placeholder.to_string()),
        }
        merged.push(out);
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use regenrich_shared::Identifier;

    fn source() -> Table {
        Table::new(vec![
            vec!["Название".into(), "ОГРН".into()],
            vec!["ООО Ромашка".into(), "1027700132195".into()],
            vec!["Неизвестно".into(), "1037739010891".into()],
            vec!["Битый".into(), "12345".into()],
        ])
    }

    fn record() -> Record {
        Record {
            identifier: Identifier::parse("1027700132195").unwrap(),
            contact: "info@example.com".into(),
            finances: "Year: 2023".into(),
            secondary_id: Some("7707083893".into()),
            ceo: None,
        }
    }

    #[test]
    fn header_gains_four_labels() {
        let merged = merge(&source(), 1, &[], &ColumnLabels::default(), "Нет данных");
        assert_eq!(
            merged[0],
            vec!["Название", "ОГРН", "Контакты", "Финансы", "ИНН", "Руководитель"]
        );
    }

    #[test]
    fn matched_row_gains_four_cells_in_order() {
        let merged = merge(&source(), 1, &[record()], &ColumnLabels::default(), "Нет данных");
        assert_eq!(
            merged[1],
            vec![
                "ООО Ромашка",
                "1027700132195",
                "info@example.com",
                "Year: 2023",
                "7707083893",
                ""
            ]
        );
    }

    #[test]
    fn unmatched_rows_gain_one_placeholder() {
        let merged = merge(&source(), 1, &[record()], &ColumnLabels::default(), "Нет данных");
        assert_eq!(merged[2].len(), 3);
        assert_eq!(merged[2][2], "Нет данных");
        assert_eq!(merged[3], vec!["Битый", "12345", "Нет данных"]);
    }

    #[test]
    fn row_order_is_preserved() {
        let merged = merge(&source(), 1, &[record()], &ColumnLabels::default(), "-");
        let names: Vec<&str> = merged.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(names, vec!["Название", "ООО Ромашка", "Неизвестно", "Битый"]);
    }

    #[test]
    fn empty_table_merges_to_nothing() {
        assert!(merge(&Table::new(vec![]), 0, &[record()], &ColumnLabels::default(), "-").is_empty());
    }
}
