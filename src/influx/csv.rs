use std::{collections::HashMap, mem};

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Annotated CSV
//
// The v2 query API answers with one or more tables, each introduced by
// annotation rows and a header row, separated by blank lines:
//
//   #datatype,string,long,dateTime:RFC3339,double,string,string
//   #group,false,false,false,false,true,true
//   #default,_result,,,,,
//   ,result,table,_time,_value,_field,_measurement
//   ,,0,2024-05-01T12:00:00Z,6.5,ph,sensors
//
// Column 0 is reserved for annotation names and is empty in data rows.
// A table whose header has an `error` column carries a query failure.
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error("unterminated quoted field")]
    UnterminatedQuote,

    #[error("store reported an error: {0}")]
    InBand(String),
}

/// A typed cell. A cell that does not parse as its declared datatype is
/// kept as `String` so the row, not the table, fails later.
#[derive(Debug, Clone, PartialEq)]
pub enum FluxValue {
    Null,
    Double(f64),
    Long(i64),
    UnsignedLong(u64),
    Boolean(bool),
    Time(DateTime<Utc>),
    String(String),
}

impl FluxValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FluxValue::Null => "null",
            FluxValue::Double(_) => "double",
            FluxValue::Long(_) => "long",
            FluxValue::UnsignedLong(_) => "unsignedLong",
            FluxValue::Boolean(_) => "boolean",
            FluxValue::Time(_) => "dateTime",
            FluxValue::String(_) => "string",
        }
    }
}

/// One data row, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRecord {
    values: HashMap<String, FluxValue>,
    /// The row as it appeared on the wire, for diagnostics.
    pub raw: String,
}

impl FluxRecord {
    pub fn get(&self, column: &str) -> Option<&FluxValue> {
        self.values.get(column)
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.get("_time") {
            Some(FluxValue::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self.get("_field") {
            Some(FluxValue::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn value(&self) -> &FluxValue {
        self.get("_value").unwrap_or(&FluxValue::Null)
    }
}

/// Parse a complete annotated-CSV response into its data rows, in order.
pub fn parse(text: &str) -> Result<Vec<FluxRecord>, CsvError> {
    let mut rows = Vec::new();
    let mut datatypes: Vec<String> = Vec::new();
    let mut defaults: Vec<String> = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for (cells, raw) in split_records(text)? {
        if cells.is_empty() {
            datatypes.clear();
            defaults.clear();
            header = None;
            continue;
        }

        if cells[0].starts_with('#') {
            // Annotations after a header open a new table.
            if header.is_some() {
                datatypes.clear();
                defaults.clear();
                header = None;
            }
            match cells[0].as_str() {
                "#datatype" => datatypes = cells,
                "#default" => defaults = cells,
                _ => {}
            }
            continue;
        }

        let Some(columns) = &header else {
            header = Some(cells);
            continue;
        };

        if let Some(idx) = columns.iter().position(|c| c == "error") {
            let message = cells.get(idx).cloned().unwrap_or_default();
            return Err(CsvError::InBand(message));
        }

        let mut values = HashMap::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate().skip(1) {
            let mut cell = cells.get(idx).map(String::as_str).unwrap_or("");
            if cell.is_empty() {
                cell = defaults.get(idx).map(String::as_str).unwrap_or("");
            }
            let datatype = datatypes.get(idx).map(String::as_str);
            values.insert(name.clone(), typed(cell, datatype, name));
        }
        rows.push(FluxRecord { values, raw });
    }

    Ok(rows)
}

fn typed(cell: &str, datatype: Option<&str>, column: &str) -> FluxValue {
    if cell.is_empty() {
        return FluxValue::Null;
    }
    let parsed = match datatype {
        Some("double") => cell.parse().ok().map(FluxValue::Double),
        Some("long") => cell.parse().ok().map(FluxValue::Long),
        Some("unsignedLong") => cell.parse().ok().map(FluxValue::UnsignedLong),
        Some("boolean") => match cell {
            "true" => Some(FluxValue::Boolean(true)),
            "false" => Some(FluxValue::Boolean(false)),
            _ => None,
        },
        Some(dt) if dt.starts_with("dateTime") => parse_time(cell),
        // Unannotated responses: only the time column is worth guessing.
        None if column == "_time" => parse_time(cell),
        _ => None,
    };
    parsed.unwrap_or_else(|| FluxValue::String(cell.to_owned()))
}

fn parse_time(cell: &str) -> Option<FluxValue> {
    DateTime::parse_from_rfc3339(cell)
        .ok()
        .map(|t| FluxValue::Time(t.with_timezone(&Utc)))
}

/// Split `text` into RFC 4180 records. Blank lines come back as empty
/// records since they delimit tables. Each record keeps its raw text.
fn split_records(text: &str) -> Result<Vec<(Vec<String>, String)>, CsvError> {
    let mut out = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut raw = String::new();
    let mut in_quotes = false;
    let mut has_content = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            raw.push(c);
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    raw.push('"');
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }

        match c {
            '\r' => {}
            '\n' => {
                if has_content {
                    record.push(mem::take(&mut field));
                    out.push((mem::take(&mut record), mem::take(&mut raw)));
                } else {
                    out.push((Vec::new(), String::new()));
                }
                has_content = false;
            }
            ',' => {
                raw.push(c);
                record.push(mem::take(&mut field));
                has_content = true;
            }
            '"' => {
                raw.push(c);
                in_quotes = true;
                has_content = true;
            }
            _ => {
                raw.push(c);
                field.push(c);
                has_content = true;
            }
        }
    }

    if in_quotes {
        return Err(CsvError::UnterminatedQuote);
    }
    if has_content {
        record.push(field);
        out.push((record, raw));
    }
    Ok(out)
}
