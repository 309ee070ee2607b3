use std::fmt;

use chrono::{DateTime, Utc};

/// Kind of value a sensor field carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Boolean,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of the sensors measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorField {
    Ph,
    Light,
    SoilMoisture,
    MinWaterLevel,
}

impl SensorField {
    /// Map a `_field` value from the store. The controller writes the short
    /// names (`soil`, `lvl`); the long names are accepted too.
    pub fn from_store_name(name: &str) -> Option<Self> {
        match name {
            "ph" => Some(Self::Ph),
            "light" => Some(Self::Light),
            "soil" | "soilMoisture" => Some(Self::SoilMoisture),
            "lvl" | "minWaterLevel" => Some(Self::MinWaterLevel),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorField::Ph => "ph",
            SensorField::Light => "light",
            SensorField::SoilMoisture => "soilMoisture",
            SensorField::MinWaterLevel => "minWaterLevel",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            SensorField::MinWaterLevel => ValueKind::Boolean,
            _ => ValueKind::Float,
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Float(f64),
    Boolean(bool),
}

/// One typed reading: a single field at a single instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    pub field: SensorField,
    pub value: SampleValue,
}

/// Every field observed at one instant. Missing readings stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRecord {
    pub timestamp: DateTime<Utc>,
    pub ph: Option<f64>,
    pub light: Option<f64>,
    pub soil_moisture: Option<f64>,
    pub min_water_level: Option<bool>,
}

impl SensorRecord {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ph: None,
            light: None,
            soil_moisture: None,
            min_water_level: None,
        }
    }

    /// Merge `sample` into this record; a later sample for the same field wins.
    ///
    /// The decoder only builds samples whose value matches the field's kind,
    /// so a mismatched pair is ignored.
    pub fn apply(&mut self, sample: &SensorSample) {
        match (sample.field, sample.value) {
            (SensorField::Ph, SampleValue::Float(v)) => self.ph = Some(v),
            (SensorField::Light, SampleValue::Float(v)) => self.light = Some(v),
            (SensorField::SoilMoisture, SampleValue::Float(v)) => self.soil_moisture = Some(v),
            (SensorField::MinWaterLevel, SampleValue::Boolean(v)) => self.min_water_level = Some(v),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn store_names_map_to_fields() {
        assert_eq!(SensorField::from_store_name("ph"), Some(SensorField::Ph));
        assert_eq!(SensorField::from_store_name("light"), Some(SensorField::Light));
        assert_eq!(SensorField::from_store_name("soil"), Some(SensorField::SoilMoisture));
        assert_eq!(SensorField::from_store_name("soilMoisture"), Some(SensorField::SoilMoisture));
        assert_eq!(SensorField::from_store_name("lvl"), Some(SensorField::MinWaterLevel));
        assert_eq!(SensorField::from_store_name("minWaterLevel"), Some(SensorField::MinWaterLevel));
        assert_eq!(SensorField::from_store_name("temperature"), None);
        assert_eq!(SensorField::from_store_name("PH"), None);
    }

    #[test]
    fn only_water_level_is_boolean() {
        assert_eq!(SensorField::MinWaterLevel.kind(), ValueKind::Boolean);
        for f in [SensorField::Ph, SensorField::Light, SensorField::SoilMoisture] {
            assert_eq!(f.kind(), ValueKind::Float);
        }
    }

    #[test]
    fn apply_merges_fields_and_overwrites() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut rec = SensorRecord::empty(ts);
        let sample = |field, value| SensorSample { timestamp: ts, field, value };

        rec.apply(&sample(SensorField::Ph, SampleValue::Float(6.1)));
        rec.apply(&sample(SensorField::MinWaterLevel, SampleValue::Boolean(true)));
        rec.apply(&sample(SensorField::Ph, SampleValue::Float(6.4)));

        assert_eq!(rec.ph, Some(6.4));
        assert_eq!(rec.min_water_level, Some(true));
        assert_eq!(rec.light, None);
        assert_eq!(rec.soil_moisture, None);
    }

    #[test]
    fn apply_ignores_kind_mismatch() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut rec = SensorRecord::empty(ts);
        rec.apply(&SensorSample {
            timestamp: ts,
            field: SensorField::Light,
            value: SampleValue::Boolean(true),
        });
        assert_eq!(rec, SensorRecord::empty(ts));
    }
}
