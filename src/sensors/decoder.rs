//! Typed decoding of time-series rows into per-timestamp sensor records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::models::{SampleValue, SensorField, SensorRecord, SensorSample, ValueKind};
use crate::{
    diagnostics::{DecodeError, DiagnosticEvent, DiagnosticKind},
    influx::csv::{FluxRecord, FluxValue},
};

/// Result of decoding one query response.
#[derive(Debug, Default)]
pub struct Decoded {
    /// One record per distinct timestamp, ascending.
    pub records: Vec<SensorRecord>,
    /// One event per rejected or skipped row.
    pub diagnostics: Vec<DiagnosticEvent>,
}

/// Decode `rows` (any order, any table interleaving) and group them by
/// timestamp. Bad rows are reported and skipped; they never fail the batch.
///
/// Every row with a usable `_time` opens a record for that instant, so a
/// timestamp whose only rows were rejected still appears, with no fields.
pub fn decode(rows: &[FluxRecord], source: &str) -> Decoded {
    let mut by_time: BTreeMap<DateTime<Utc>, SensorRecord> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for row in rows {
        let Some(timestamp) = row.time() else {
            diagnostics.push(row_event(
                DiagnosticKind::DecodeFailure,
                source,
                row,
                DecodeError::MissingColumn("_time").to_string(),
            ));
            continue;
        };
        let record = by_time
            .entry(timestamp)
            .or_insert_with(|| SensorRecord::empty(timestamp));

        let Some(name) = row.field() else {
            diagnostics.push(row_event(
                DiagnosticKind::DecodeFailure,
                source,
                row,
                DecodeError::MissingColumn("_field").to_string(),
            ));
            continue;
        };
        let Some(field) = SensorField::from_store_name(name) else {
            diagnostics.push(row_event(
                DiagnosticKind::UnknownField,
                source,
                row,
                format!("unrecognized field {name}"),
            ));
            continue;
        };

        match sample_value(field, row.value()) {
            Ok(value) => record.apply(&SensorSample { timestamp, field, value }),
            Err(e) => diagnostics.push(row_event(
                DiagnosticKind::DecodeFailure,
                source,
                row,
                e.to_string(),
            )),
        }
    }

    Decoded {
        records: by_time.into_values().collect(),
        diagnostics,
    }
}

/// Check `value` against what `field` carries. Integer values are accepted
/// for float fields; nothing else is coerced.
pub fn sample_value(field: SensorField, value: &FluxValue) -> Result<SampleValue, DecodeError> {
    match (field.kind(), value) {
        (ValueKind::Float, FluxValue::Double(v)) => Ok(SampleValue::Float(*v)),
        (ValueKind::Float, FluxValue::Long(v)) => Ok(SampleValue::Float(*v as f64)),
        (ValueKind::Float, FluxValue::UnsignedLong(v)) => Ok(SampleValue::Float(*v as f64)),
        (ValueKind::Boolean, FluxValue::Boolean(v)) => Ok(SampleValue::Boolean(*v)),
        (expected, other) => Err(DecodeError::TypeMismatch {
            field: field.as_str(),
            expected: expected.as_str(),
            found: other.type_name().to_owned(),
        }),
    }
}

fn row_event(kind: DiagnosticKind, source: &str, row: &FluxRecord, message: String) -> DiagnosticEvent {
    DiagnosticEvent::new(kind, source, row.raw.as_bytes(), message)
}
