//! CSV encoding of collected records for dataset uploads

use crate::models::Record;
use serde_json::Value;

/// Encode records as CSV. The header is the union of field names in
/// first-seen order; absent fields are left empty.
pub fn records_to_csv(records: &[Record]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut out = String::new();
    push_row(&mut out, columns.iter().map(|c| escape(c)));

    for record in records {
        push_row(
            &mut out,
            columns
                .iter()
                .map(|c| record.get(*c).map(cell).unwrap_or_default()),
        );
    }

    out
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>) {
    let row: Vec<String> = cells.collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape(s),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        nested => escape(&nested.to_string()),
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_header_is_union_of_fields() {
        let csv = records_to_csv(&[
            record(json!({"x1": 1, "y": 3})),
            record(json!({"x1": 2, "x2": 4})),
        ]);

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines, vec!["x1,y,x2", "1,3,", "2,,4"]);
    }

    #[test]
    fn test_quoting() {
        let csv = records_to_csv(&[record(json!({"name": "a,b", "quote": "say \"hi\"", "n": null}))]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[1], "\"a,b\",\"say \"\"hi\"\"\",");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(records_to_csv(&[]), "\n");
    }
}
