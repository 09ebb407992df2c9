use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use openaq_ingest::batch::writer::records_to_dataframe;
use openaq_ingest::flatten::context::{LocationContext, SensorContext};
use openaq_ingest::flatten::{flatten_location, flatten_measurement, sensors_of};
use serde_json::{json, Value};

fn location() -> Value {
    json!({
        "id": 3459,
        "name": "Ratnapark",
        "locality": "Kathmandu",
        "timezone": "Asia/Kathmandu",
        "country": {"id": 145, "code": "NP", "name": "Nepal"},
        "provider": {"id": 119, "name": "AirNow"},
        "isMobile": false,
        "isMonitor": true,
        "sensors": [{"id": 7710, "name": "pm25 µg/m³", "parameter": {"id": 2, "name": "pm25", "units": "µg/m³"}}],
        "coordinates": {"latitude": 27.7172, "longitude": 85.324}
    })
}

fn measurement(i: usize) -> Value {
    json!({
        "value": 10.0 + i as f64,
        "flagInfo": {"hasFlags": false},
        "parameter": {"id": 2, "name": "pm25", "units": "µg/m³"},
        "period": {
            "label": "raw",
            "interval": "01:00:00",
            "datetimeFrom": {"utc": "2024-01-01T00:00:00Z", "local": "2024-01-01T05:45:00+05:45"},
            "datetimeTo": {"utc": "2024-01-01T01:00:00Z", "local": "2024-01-01T06:45:00+05:45"}
        },
        "coverage": {"percentComplete": 100.0}
    })
}

fn bench_flatten(c: &mut Criterion) {
    let raw_location = location();
    let location_context = LocationContext::from_location(&raw_location);
    let sensor = SensorContext::from_sensor(&sensors_of(&raw_location)[0], &location_context);
    let page: Vec<Value> = (0..1000).map(measurement).collect();
    let now = Utc::now();

    c.bench_function("flatten_location", |b| {
        b.iter(|| flatten_location(black_box(&raw_location)))
    });
    c.bench_function("flatten_measurement_page", |b| {
        b.iter(|| {
            page.iter()
                .map(|m| flatten_measurement(black_box(m), &sensor, now))
                .collect::<Vec<_>>()
        })
    });

    let records: Vec<_> = page
        .iter()
        .map(|m| flatten_measurement(m, &sensor, now))
        .collect();
    c.bench_function("records_to_dataframe_1000", |b| {
        b.iter(|| records_to_dataframe(black_box(&records)))
    });
}

criterion_group!(benches, bench_flatten);
criterion_main!(benches);
