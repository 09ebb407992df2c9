//! Turns nested OpenAQ records into flat rows.
//!
//! None of these functions can fail: a field that is missing or has an
//! unexpected type simply becomes [`Scalar::Null`].

pub mod context;
pub mod record;

use crate::flatten::context::{bool_at, f64_at, i64_at, str_at, LocationContext, SensorContext};
use crate::flatten::record::{FlatRecord, Scalar};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Flattens one `/locations` record. Its sensors are not included; see
/// [`sensors_of`].
pub fn flatten_location(location: &Value) -> FlatRecord {
    let mut record = FlatRecord::with_capacity(18);
    record.insert("location_id", i64_at(location, "/id"));
    record.insert("location_name", str_at(location, "/name"));
    record.insert("locality", str_at(location, "/locality"));
    record.insert("timezone", str_at(location, "/timezone"));
    record.insert("country_id", i64_at(location, "/country/id"));
    record.insert("country_code", str_at(location, "/country/code"));
    record.insert("country_name", str_at(location, "/country/name"));
    record.insert("latitude", f64_at(location, "/coordinates/latitude"));
    record.insert("longitude", f64_at(location, "/coordinates/longitude"));
    record.insert("is_mobile", bool_at(location, "/isMobile"));
    record.insert("is_monitor", bool_at(location, "/isMonitor"));
    record.insert("owner_id", i64_at(location, "/owner/id"));
    record.insert("owner_name", str_at(location, "/owner/name"));
    record.insert("provider_id", i64_at(location, "/provider/id"));
    record.insert("provider_name", str_at(location, "/provider/name"));
    record.insert("sensor_count", Some(sensors_of(location).len() as i64));
    record.insert("datetime_first_utc", str_at(location, "/datetimeFirst/utc"));
    record.insert("datetime_last_utc", str_at(location, "/datetimeLast/utc"));
    record
}

/// The nested sensor list of a location, empty when absent.
pub fn sensors_of(location: &Value) -> &[Value] {
    location
        .get("sensors")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn flatten_sensor(sensor: &Value, location: &LocationContext) -> FlatRecord {
    let mut record = FlatRecord::with_capacity(16);
    record.insert("sensor_id", i64_at(sensor, "/id"));
    record.insert("sensor_name", str_at(sensor, "/name"));
    record.insert("parameter_id", i64_at(sensor, "/parameter/id"));
    record.insert("parameter_name", str_at(sensor, "/parameter/name"));
    record.insert("parameter_units", str_at(sensor, "/parameter/units"));
    record.insert(
        "parameter_display_name",
        str_at(sensor, "/parameter/displayName"),
    );
    location.write_into(&mut record);
    record
}

/// Flattens one `/sensors/{id}/measurements` record. `ingested_at` is passed
/// in rather than read from the clock so the output is reproducible.
pub fn flatten_measurement(
    measurement: &Value,
    sensor: &SensorContext,
    ingested_at: DateTime<Utc>,
) -> FlatRecord {
    let mut record = FlatRecord::with_capacity(26);
    record.insert(
        "value",
        measurement
            .get("value")
            .map(Scalar::from_json)
            .unwrap_or(Scalar::Null),
    );
    record.insert(
        "parameter_id",
        i64_at(measurement, "/parameter/id").or(sensor.parameter_id),
    );
    record.insert(
        "parameter_name",
        str_at(measurement, "/parameter/name").or_else(|| sensor.parameter_name.clone()),
    );
    record.insert(
        "parameter_units",
        str_at(measurement, "/parameter/units").or_else(|| sensor.parameter_units.clone()),
    );
    record.insert("period_label", str_at(measurement, "/period/label"));
    record.insert("period_interval", str_at(measurement, "/period/interval"));
    record.insert(
        "datetime_from_utc",
        str_at(measurement, "/period/datetimeFrom/utc"),
    );
    record.insert(
        "datetime_from_local",
        str_at(measurement, "/period/datetimeFrom/local"),
    );
    record.insert("datetime_to_utc", str_at(measurement, "/period/datetimeTo/utc"));
    record.insert(
        "datetime_to_local",
        str_at(measurement, "/period/datetimeTo/local"),
    );
    record.insert("has_flags", bool_at(measurement, "/flagInfo/hasFlags"));
    record.insert(
        "coverage_percent",
        f64_at(measurement, "/coverage/percentComplete"),
    );
    sensor.write_into(&mut record);
    record.insert(
        "ingested_at",
        Some(ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    record
}
