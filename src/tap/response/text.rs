//! CSV and JSON result decoding.
use serde::Deserialize;

use crate::table::{disambiguate_names, Column, DataType, Table, Value};
use crate::tap_errors::TapError;

/// Narrowest type accepting every non-empty cell: long, then double, then boolean, then text.
fn infer_datatype<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> DataType {
    let mut present = cells.map(str::trim).filter(|c| !c.is_empty());
    let non_empty = present.clone();
    if present.next().is_none() {
        return DataType::Char;
    }
    if non_empty.clone().all(|c| c.parse::<i64>().is_ok()) {
        DataType::Long
    } else if non_empty.clone().all(|c| c.parse::<f64>().is_ok()) {
        DataType::Double
    } else if non_empty.clone().all(|c| {
        matches!(
            c.to_ascii_lowercase().as_str(),
            "true" | "false" | "t" | "f"
        )
    }) {
        DataType::Boolean
    } else {
        DataType::Char
    }
}

/// CSV with a header line. Column types are inferred per column; empty cells are null.
pub(crate) fn parse_csv(content: &[u8]) -> Result<Table, TapError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| TapError::malformed_table(format!("invalid CSV header: {e}"), content))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let records = reader
        .records()
        .map(|r| {
            r.map(|rec| rec.iter().map(str::to_string).collect::<Vec<_>>())
                .map_err(|e| TapError::malformed_table(format!("invalid CSV record: {e}"), content))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let datatype = infer_datatype(records.iter().map(move |r| r[idx].as_str()));
            Column::new(name.clone(), datatype)
        })
        .collect();
    disambiguate_names(&mut columns);

    let rows: Vec<Vec<Value>> = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .zip(record)
                .map(|(col, cell)| {
                    col.datatype
                        .parse_text(cell)
                        .unwrap_or_else(|| Value::Text(cell.clone()))
                })
                .collect()
        })
        .collect();

    Table::new(columns, rows)
}

#[derive(Debug, Deserialize)]
struct JsonResult {
    metadata: Vec<JsonField>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct JsonField {
    name: String,
    datatype: String,
    #[serde(default)]
    arraysize: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    ucd: Option<String>,
}

fn json_value(value: &serde_json::Value, datatype: DataType) -> Option<Value> {
    use serde_json::Value as J;
    match value {
        J::Null => Some(Value::Null),
        J::Bool(b) => Some(Value::Bool(*b)),
        J::Number(n) => match datatype {
            DataType::UnsignedByte | DataType::Short | DataType::Int | DataType::Long => {
                n.as_i64().map(Value::Int)
            }
            DataType::Char => Some(Value::Text(n.to_string())),
            _ => n.as_f64().map(Value::Float),
        },
        J::String(s) => datatype.parse_text(s),
        J::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|v| match v {
                    J::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            Some(Value::Text(rendered.join(" ")))
        }
        J::Object(_) => None,
    }
}

/// `{"metadata": [{name, datatype, …}], "data": [[…], …]}` as served by the archive.
pub(crate) fn parse_json(content: &[u8]) -> Result<Table, TapError> {
    let parsed: JsonResult = serde_json::from_slice(content)
        .map_err(|e| TapError::malformed_table(format!("invalid JSON result: {e}"), content))?;

    let mut columns = parsed
        .metadata
        .into_iter()
        .map(|f| {
            let scalar: DataType = f.datatype.parse()?;
            let is_array = f
                .arraysize
                .as_deref()
                .is_some_and(|a| !a.trim().is_empty() && a.trim() != "1");
            let datatype = if is_array { DataType::Char } else { scalar };
            Ok(Column {
                name: f.name,
                datatype,
                unit: f.unit,
                ucd: f.ucd,
            })
        })
        .collect::<Result<Vec<_>, TapError>>()?;
    disambiguate_names(&mut columns);

    let rows = parsed
        .data
        .iter()
        .enumerate()
        .map(|(r, row)| {
            if row.len() != columns.len() {
                return Err(TapError::malformed_table(
                    format!(
                        "row {r} has {} values for {} columns",
                        row.len(),
                        columns.len()
                    ),
                    content,
                ));
            }
            columns
                .iter()
                .zip(row)
                .map(|(col, v)| {
                    json_value(v, col.datatype).ok_or_else(|| {
                        TapError::malformed_table(
                            format!("cannot read {v} as {} in column `{}`", col.datatype, col.name),
                            content,
                        )
                    })
                })
                .collect::<Result<Vec<Value>, TapError>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Table::new(columns, rows)
}
