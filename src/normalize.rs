//! Content normalization for ingestion.
//!
//! Every supported content type is rendered into a plain-text body before
//! chunking: CSV rows become one natural-language sentence each, JSON is
//! flattened into indented `key: value` lines, and anything else passes
//! through unchanged.

use anyhow::{Context, Result};
use serde_json::Value;

/// Render raw content into a chunkable text body for its content type.
///
/// Malformed CSV or JSON is an error the caller reports per file; it must
/// not abort sibling files in a batch.
pub fn render_body(content: &str, content_type: &str) -> Result<String> {
    match content_type {
        "text/csv" => render_csv(content),
        "application/json" => {
            let value: Value =
                serde_json::from_str(content).context("Invalid JSON document")?;
            Ok(render_json(&value))
        }
        _ => Ok(content.to_string()),
    }
}

/// Field-to-phrase mapping for listing CSVs. Only columns present in a row
/// are rendered; clauses are joined with `"; "` and rows with blank lines.
pub fn render_csv(content: &str) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .context("Invalid CSV document")?
        .clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("Invalid CSV document")?;
        let get = |name: &str| -> Option<&str> {
            headers
                .iter()
                .position(|h| h == name)
                .and_then(|i| record.get(i))
                .filter(|v| !v.trim().is_empty())
        };

        let mut clauses = Vec::new();

        match get("Property Address") {
            Some(addr) => clauses.push(format!("Property at {}", addr)),
            None => clauses.push("Property at Unknown Address".to_string()),
        }
        if let Some(floor) = get("Floor") {
            clauses.push(format!("floor {}", floor));
        }
        if let Some(suite) = get("Suite") {
            clauses.push(format!("suite {}", suite));
        }
        if let Some(size) = get("Size (SF)") {
            clauses.push(format!("size {} square feet", size));
        }
        if let Some(rent) = get("Rent/SF/Year") {
            let rent = rent.replace('$', "").replace(',', "");
            clauses.push(format!("rent ${} per square foot per year", rent));
        }
        if let Some(annual) = get("Annual Rent") {
            clauses.push(format!("annual rent {}", annual));
        }
        if let Some(monthly) = get("Monthly Rent") {
            clauses.push(format!("monthly rent {}", monthly));
        }
        if let Some(broker) = get("Associate 1") {
            clauses.push(format!("primary broker {}", broker));
        }
        if let Some(email) = get("BROKER Email ID") {
            clauses.push(format!("broker email {}", email));
        }

        let associates: Vec<&str> = (2..5)
            .filter_map(|i| get(&format!("Associate {}", i)))
            .collect();
        if !associates.is_empty() {
            clauses.push(format!("additional associates {}", associates.join(", ")));
        }

        rows.push(clauses.join("; "));
    }

    Ok(rows.join("\n\n"))
}

/// Count the data rows of a CSV body, for document metadata.
pub fn csv_record_count(content: &str) -> usize {
    csv::ReaderBuilder::new()
        .from_reader(content.as_bytes())
        .records()
        .filter(|r| r.is_ok())
        .count()
}

/// Recursively render a JSON value into indented `key: value` lines.
pub fn render_json(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                render_json_entry(key, val, 0, &mut out);
            }
        }
        Value::Array(items) => {
            out.push_str(&format!("Array with {} items:\n\n", items.len()));
            for (i, item) in items.iter().enumerate() {
                render_json_entry(&format!("Item {}", i + 1), item, 0, &mut out);
                out.push('\n');
            }
        }
        other => out.push_str(&format!("Value: {}\n", scalar_text(other))),
    }
    out
}

fn render_json_entry(key: &str, value: &Value, indent: usize, out: &mut String) {
    let spaces = "  ".repeat(indent);
    match value {
        Value::Object(map) if map.is_empty() => {
            out.push_str(&format!("{}{}: Empty object\n", spaces, key));
        }
        Value::Object(map) => {
            out.push_str(&format!("{}{}:\n", spaces, key));
            for (k, v) in map {
                render_json_entry(k, v, indent + 1, out);
            }
        }
        Value::Array(items) if items.is_empty() => {
            out.push_str(&format!("{}{}: Empty list\n", spaces, key));
        }
        Value::Array(items) => {
            out.push_str(&format!(
                "{}{} (list with {} items):\n",
                spaces,
                key,
                items.len()
            ));
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        render_json_entry(&format!("Item {}", i + 1), item, indent + 1, out);
                    }
                    scalar => {
                        out.push_str(&format!("{}  - {}\n", spaces, scalar_text(scalar)));
                    }
                }
            }
        }
        scalar => {
            out.push_str(&format!("{}{}: {}\n", spaces, key, scalar_text(scalar)));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_passthrough() {
        let body = render_body("just some text", "text/plain").unwrap();
        assert_eq!(body, "just some text");
    }

    #[test]
    fn test_csv_row_rendering() {
        let csv = "Property Address,Floor,Size (SF)\n123 Main St,E3,1500";
        let body = render_csv(csv).unwrap();
        assert_eq!(body, "Property at 123 Main St; floor E3; size 1500 square feet");
    }

    #[test]
    fn test_csv_skips_empty_fields() {
        let csv = "Property Address,Floor,Suite\n42 Elm Ave,,901";
        let body = render_csv(csv).unwrap();
        assert_eq!(body, "Property at 42 Elm Ave; suite 901");
    }

    #[test]
    fn test_csv_rent_strips_currency_formatting() {
        let csv = "Property Address,Rent/SF/Year\n9 Oak Ln,\"$1,250\"";
        let body = render_csv(csv).unwrap();
        assert!(body.contains("rent $1250 per square foot per year"), "{}", body);
    }

    #[test]
    fn test_csv_associates_collected() {
        let csv = "Property Address,Associate 1,Associate 2,Associate 3\n7 Pine Rd,Ann,Bo,Cy";
        let body = render_csv(csv).unwrap();
        assert!(body.contains("primary broker Ann"));
        assert!(body.contains("additional associates Bo, Cy"));
    }

    #[test]
    fn test_csv_rows_joined_with_blank_lines() {
        let csv = "Property Address\n1 First St\n2 Second St";
        let body = render_csv(csv).unwrap();
        assert_eq!(body, "Property at 1 First St\n\nProperty at 2 Second St");
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(render_body("{not json", "application/json").is_err());
    }

    #[test]
    fn test_json_object_rendering() {
        let rendered = render_json(&json!({
            "name": "HQ",
            "address": { "city": "Springfield", "zip": 12345 }
        }));
        assert!(rendered.contains("name: HQ"));
        assert!(rendered.contains("address:"));
        assert!(rendered.contains("  city: Springfield"));
        assert!(rendered.contains("  zip: 12345"));
    }

    #[test]
    fn test_json_empty_containers() {
        let rendered = render_json(&json!({ "a": {}, "b": [] }));
        assert!(rendered.contains("a: Empty object"));
        assert!(rendered.contains("b: Empty list"));
    }

    #[test]
    fn test_json_list_rendering() {
        let rendered = render_json(&json!({ "tags": ["x", "y"] }));
        assert!(rendered.contains("tags (list with 2 items):"));
        assert!(rendered.contains("- x"));
        assert!(rendered.contains("- y"));
    }

    #[test]
    fn test_json_nested_list_items_expanded() {
        let rendered = render_json(&json!({ "rows": [{ "k": "v" }] }));
        assert!(rendered.contains("Item 1"));
        assert!(rendered.contains("k: v"));
    }

    #[test]
    fn test_json_top_level_array() {
        let rendered = render_json(&json!([1, 2]));
        assert!(rendered.starts_with("Array with 2 items:"));
    }
}
