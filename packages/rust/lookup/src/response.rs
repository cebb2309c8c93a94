//! Registry response decoding and mapping to [`Record`]s.
//!
//! The registry answers with `{"items": [...]}` where each item wraps exactly
//! one entity under a tag: `ИП` for individual entrepreneurs, `ЮЛ` for
//! organizations. Scalars arrive as strings or numbers depending on the field.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use regenrich_shared::{EnrichError, Identifier, Record, Result};

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    // Absent and explicit null both mean "no results".
    #[serde(default)]
    items: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(rename = "ИП")]
    individual: Option<Individual>,
    #[serde(rename = "ЮЛ")]
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Individual {
    #[serde(rename = "ОГРНИП")]
    registration: Option<Value>,
    #[serde(rename = "ФИОПолн")]
    full_name: Option<Value>,
    #[serde(rename = "ИННФЛ")]
    tax_id: Option<Value>,
    #[serde(rename = "Контакты")]
    contacts: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    #[serde(rename = "ОГРН")]
    registration: Option<Value>,
    #[serde(rename = "ИНН")]
    tax_id: Option<Value>,
    #[serde(rename = "Руководитель")]
    director: Option<Value>,
    #[serde(rename = "Контакты")]
    contacts: Option<Value>,
    #[serde(rename = "Финансы")]
    finances: Option<Value>,
}

/// Parse a raw response body into records.
///
/// A body that is not a JSON object with an `items` list is an error. Single
/// items that cannot be mapped are logged and skipped.
pub(crate) fn parse_response(body: &str) -> Result<Vec<Record>> {
    let response: RegistryResponse = serde_json::from_str(body)
        .map_err(|e| EnrichError::Lookup(format!("malformed registry response: {e}")))?;

    let items = response.items.unwrap_or_default();
    let mut records = Vec::with_capacity(items.len());
    for (index, raw) in items.into_iter().enumerate() {
        let item: Item = match serde_json::from_value(raw) {
            Ok(item) => item,
            Err(e) => {
                warn!(index, error = %e, "skipping undecodable registry item");
                continue;
            }
        };

        let record = match item {
            Item {
                individual: Some(ind),
                ..
            } => individual_record(ind),
            Item {
                organization: Some(org),
                ..
            } => organization_record(org),
            _ => {
                warn!(index, "registry item is neither individual nor organization, skipping");
                None
            }
        };

        if let Some(record) = record {
            records.push(record);
        }
    }
    Ok(records)
}

fn individual_record(ind: Individual) -> Option<Record> {
    let identifier = registration_number(ind.registration.as_ref(), "ИП")?;
    let ceo = ind.full_name.as_ref().and_then(value_text);
    Some(Record {
        identifier,
        contact: ind.contacts.as_ref().and_then(value_text).unwrap_or_default(),
        finances: String::new(),
        secondary_id: ind.tax_id.as_ref().and_then(value_text),
        ceo,
    })
}

fn organization_record(org: Organization) -> Option<Record> {
    let identifier = registration_number(org.registration.as_ref(), "ЮЛ")?;
    Some(Record {
        identifier,
        contact: org.contacts.as_ref().and_then(value_text).unwrap_or_default(),
        finances: org.finances.as_ref().map(finances_text).unwrap_or_default(),
        secondary_id: org.tax_id.as_ref().and_then(value_text),
        ceo: org.director.as_ref().and_then(director_name),
    })
}

fn registration_number(value: Option<&Value>, kind: &str) -> Option<Identifier> {
    let Some(raw) = value.and_then(value_text) else {
        warn!(kind, "registry entity without registration number, skipping");
        return None;
    };
    match Identifier::parse(&raw) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(kind, error = %e, "registry entity with invalid registration number, skipping");
            None
        }
    }
}

/// The director may be a single object or a list of them; the first name wins.
fn director_name(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("ФИОПолн").and_then(value_text),
        Value::Array(list) => list.iter().find_map(director_name),
        _ => None,
    }
}

fn finances_text(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let revenue = map.get("Выручка").and_then(value_text);
            let year = map.get("Год").and_then(value_text);
            format_finances(revenue.as_deref(), year.as_deref())
        }
        Value::Array(list) => list
            .iter()
            .filter_map(value_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => value_text(other).unwrap_or_default(),
    }
}

/// Render the financial summary, omitting absent fields.
///
/// ```
/// use regenrich_lookup::format_finances;
/// assert_eq!(
///     format_finances(Some("500"), Some("2023")),
///     "Revenue: 500 thousand currency units, Year: 2023"
/// );
/// assert_eq!(format_finances(None, Some("2023")), "Year: 2023");
/// ```
pub fn format_finances(revenue: Option<&str>, year: Option<&str>) -> String {
    let mut parts = Vec::with_capacity(2);
    if let Some(revenue) = revenue {
        parts.push(format!("Revenue: {revenue} thousand currency units"));
    }
    if let Some(year) = year {
        parts.push(format!("Year: {year}"));
    }
    parts.join(", ")
}

/// Text of a scalar; structured values render as compact JSON. Blank is `None`.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}
