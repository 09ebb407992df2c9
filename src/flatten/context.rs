//! Parent metadata that is copied into child records at extraction time, so
//! sensors and measurements can be analysed without joining back to their
//! location.

use crate::flatten::record::FlatRecord;
use serde_json::Value;

pub(crate) fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn i64_at(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(Value::as_i64)
}

pub(crate) fn f64_at(value: &Value, pointer: &str) -> Option<f64> {
    value.pointer(pointer).and_then(Value::as_f64)
}

pub(crate) fn bool_at(value: &Value, pointer: &str) -> Option<bool> {
    value.pointer(pointer).and_then(Value::as_bool)
}

fn flat_str(record: &FlatRecord, column: &str) -> Option<String> {
    record
        .get(column)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn flat_i64(record: &FlatRecord, column: &str) -> Option<i64> {
    record.get(column).and_then(|v| v.as_i64())
}

fn flat_f64(record: &FlatRecord, column: &str) -> Option<f64> {
    record.get(column).and_then(|v| v.as_f64())
}

/// Location fields injected into every sensor and measurement row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationContext {
    pub location_id: Option<i64>,
    pub location_name: Option<String>,
    pub locality: Option<String>,
    pub timezone: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub provider_name: Option<String>,
    pub owner_name: Option<String>,
}

impl LocationContext {
    /// Reads the context out of a raw `/locations` record.
    pub fn from_location(location: &Value) -> Self {
        Self {
            location_id: i64_at(location, "/id"),
            location_name: str_at(location, "/name"),
            locality: str_at(location, "/locality"),
            timezone: str_at(location, "/timezone"),
            country_code: str_at(location, "/country/code"),
            country_name: str_at(location, "/country/name"),
            latitude: f64_at(location, "/coordinates/latitude"),
            longitude: f64_at(location, "/coordinates/longitude"),
            provider_name: str_at(location, "/provider/name"),
            owner_name: str_at(location, "/owner/name"),
        }
    }

    pub fn write_into(&self, record: &mut FlatRecord) {
        record.insert("location_id", self.location_id);
        record.insert("location_name", self.location_name.as_deref());
        record.insert("locality", self.locality.as_deref());
        record.insert("timezone", self.timezone.as_deref());
        record.insert("country_code", self.country_code.as_deref());
        record.insert("country_name", self.country_name.as_deref());
        record.insert("latitude", self.latitude);
        record.insert("longitude", self.longitude);
        record.insert("provider_name", self.provider_name.as_deref());
        record.insert("owner_name", self.owner_name.as_deref());
    }

    /// Recovers the injected columns from a flattened child record.
    pub fn from_flat(record: &FlatRecord) -> Self {
        Self {
            location_id: flat_i64(record, "location_id"),
            location_name: flat_str(record, "location_name"),
            locality: flat_str(record, "locality"),
            timezone: flat_str(record, "timezone"),
            country_code: flat_str(record, "country_code"),
            country_name: flat_str(record, "country_name"),
            latitude: flat_f64(record, "latitude"),
            longitude: flat_f64(record, "longitude"),
            provider_name: flat_str(record, "provider_name"),
            owner_name: flat_str(record, "owner_name"),
        }
    }
}

/// Everything a measurement worker needs to know about its sensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorContext {
    pub sensor_id: Option<i64>,
    pub sensor_name: Option<String>,
    pub parameter_id: Option<i64>,
    pub parameter_name: Option<String>,
    pub parameter_units: Option<String>,
    pub parameter_display_name: Option<String>,
    pub location: LocationContext,
}

impl SensorContext {
    pub fn from_sensor(sensor: &Value, location: &LocationContext) -> Self {
        Self {
            sensor_id: i64_at(sensor, "/id"),
            sensor_name: str_at(sensor, "/name"),
            parameter_id: i64_at(sensor, "/parameter/id"),
            parameter_name: str_at(sensor, "/parameter/name"),
            parameter_units: str_at(sensor, "/parameter/units"),
            parameter_display_name: str_at(sensor, "/parameter/displayName"),
            location: location.clone(),
        }
    }

    /// Writes the sensor identity followed by its location context.
    pub fn write_into(&self, record: &mut FlatRecord) {
        record.insert("sensor_id", self.sensor_id);
        record.insert("sensor_name", self.sensor_name.as_deref());
        self.location.write_into(record);
    }

    /// Recovers what [`SensorContext::write_into`] wrote. Parameter details
    /// are not part of the injected columns and come back empty.
    pub fn from_flat(record: &FlatRecord) -> Self {
        Self {
            sensor_id: flat_i64(record, "sensor_id"),
            sensor_name: flat_str(record, "sensor_name"),
            location: LocationContext::from_flat(record),
            ..Self::default()
        }
    }

    pub fn label(&self) -> String {
        match (&self.sensor_id, &self.sensor_name) {
            (Some(id), Some(name)) => format!("{} ({})", id, name),
            (Some(id), None) => id.to_string(),
            (None, Some(name)) => name.clone(),
            (None, None) => "<unknown sensor>".to_string(),
        }
    }
}
