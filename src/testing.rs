//! Test doubles shared by the unit tests: a scripted [`ApiClient`] and JSON
//! fixtures shaped like OpenAQ v3 payloads.

use crate::http::client::{ApiClient, ApiResponse, QueryParams};
use crate::http::error::{FetchError, FetchErrorKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&str, &QueryParams) -> Result<ApiResponse, FetchError> + Send + Sync>;

pub(crate) struct ScriptedClient {
    handler: Handler,
    calls: Mutex<Vec<(String, QueryParams)>>,
}

impl ScriptedClient {
    pub(crate) fn new(
        handler: impl Fn(&str, &QueryParams) -> Result<ApiResponse, FetchError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replays `outcomes` in order; once drained every call yields an empty page.
    pub(crate) fn sequence(outcomes: Vec<Result<ApiResponse, FetchError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(outcomes));
        Self::new(move |_, _| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ApiResponse::default()))
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, endpoint_prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(endpoint, _)| endpoint.starts_with(endpoint_prefix))
            .count()
    }

    pub(crate) fn calls(&self) -> Vec<(String, QueryParams)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn get(&self, endpoint: &str, params: &QueryParams) -> Result<ApiResponse, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), params.clone()));
        (self.handler)(endpoint, params)
    }
}

pub(crate) fn fail(kind: FetchErrorKind) -> FetchError {
    let url = "https://api.test/v3/fake".to_string();
    match kind {
        FetchErrorKind::Timeout => FetchError::Timeout { url },
        FetchErrorKind::RateLimited => FetchError::RateLimited { url },
        FetchErrorKind::ServerError => FetchError::ServerError { url, status: 503 },
        FetchErrorKind::ClientError => FetchError::ClientError { url, status: 404 },
        FetchErrorKind::MalformedResponse => FetchError::MalformedResponse {
            url,
            message: "expected value at line 1 column 1".to_string(),
        },
        FetchErrorKind::NetworkError => FetchError::NetworkError {
            url,
            message: "connection reset".to_string(),
        },
    }
}

/// Serves the slice of a `total`-long result stream addressed by the
/// `page`/`limit` params, building each record with `make`.
pub(crate) fn serve_page(
    params: &QueryParams,
    total: usize,
    make: impl Fn(usize) -> Value,
) -> ApiResponse {
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let limit: usize = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(100);
    let start = (page - 1).saturating_mul(limit).min(total);
    let end = (start + limit).min(total);
    ApiResponse::with_results((start..end).map(make).collect())
}

pub(crate) fn location_json(id: i64, name: &str, sensor_ids: &[i64]) -> Value {
    let sensors: Vec<Value> = sensor_ids
        .iter()
        .map(|sensor_id| {
            json!({
                "id": sensor_id,
                "name": format!("pm25 µg/m³ #{sensor_id}"),
                "parameter": {
                    "id": 2,
                    "name": "pm25",
                    "units": "µg/m³",
                    "displayName": "PM2.5"
                }
            })
        })
        .collect();

    json!({
        "id": id,
        "name": name,
        "locality": "Kathmandu",
        "timezone": "Asia/Kathmandu",
        "country": {"id": 145, "code": "NP", "name": "Nepal"},
        "owner": {"id": 4, "name": "Unknown Governmental Organization"},
        "provider": {"id": 119, "name": "AirNow"},
        "isMobile": false,
        "isMonitor": true,
        "instruments": [{"id": 2, "name": "Government Monitor"}],
        "sensors": sensors,
        "coordinates": {"latitude": 27.7172, "longitude": 85.324},
        "bounds": [85.324, 27.7172, 85.324, 27.7172],
        "datetimeFirst": {"utc": "2017-03-15T06:00:00Z", "local": "2017-03-15T11:45:00+05:45"},
        "datetimeLast": {"utc": "2025-09-20T10:00:00Z", "local": "2025-09-20T15:45:00+05:45"}
    })
}

pub(crate) fn measurement_json(index: usize) -> Value {
    json!({
        "value": 10.0 + index as f64,
        "flagInfo": {"hasFlags": false},
        "parameter": {"id": 2, "name": "pm25", "units": "µg/m³", "displayName": null},
        "period": {
            "label": "raw",
            "interval": "01:00:00",
            "datetimeFrom": {"utc": "2024-01-01T00:00:00Z", "local": "2024-01-01T05:45:00+05:45"},
            "datetimeTo": {"utc": "2024-01-01T01:00:00Z", "local": "2024-01-01T06:45:00+05:45"}
        },
        "coverage": {"percentComplete": 100.0}
    })
}
