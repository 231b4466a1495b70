use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;

use crate::catalog::DEFAULT_ENV_SENSOR;
use crate::error::QueryError;
use crate::images::ImageRecord;
use crate::series::{TelemetryPoint, TelemetrySeries};
use crate::time_window::{format_bound, TimeWindow};

pub const DEFAULT_QUERY_URL: &str = "https://data.sagecontinuum.org/api/v1/query";

const METRIC_PREFIX: &str = "env.";
const RAIN_PREFIX: &str = "raingauge.";
const IMAGE_TASK_PREFIX: &str = "imagesampler-";
const ANY_SENSOR: &str = "*";
const ERROR_BODY_LIMIT: usize = 512;

/// Filter for a numeric telemetry query, sent verbatim as `{name, sensor, vsn}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFilter {
    pub metric_name: String,
    pub sensor_selector: String,
    pub node_id: String,
}

impl QueryFilter {
    pub fn environment(parameter: &str, node_id: &str, sensor: Option<&str>) -> Self {
        Self {
            metric_name: format!("{METRIC_PREFIX}{parameter}"),
            sensor_selector: sensor.unwrap_or(DEFAULT_ENV_SENSOR).to_string(),
            node_id: node_id.to_string(),
        }
    }

    /// Rain-gauge metrics live under `env.raingauge.*` and are reported by whichever
    /// sensor instance the node carries, so the selector is widened to any sensor.
    pub fn rain(parameter: &str, node_id: &str) -> Self {
        Self {
            metric_name: format!("{METRIC_PREFIX}{RAIN_PREFIX}{parameter}"),
            sensor_selector: ANY_SENSOR.to_string(),
            node_id: node_id.to_string(),
        }
    }

    fn wire(&self) -> BTreeMap<&'static str, &str> {
        BTreeMap::from([
            ("name", self.metric_name.as_str()),
            ("sensor", self.sensor_selector.as_str()),
            ("vsn", self.node_id.as_str()),
        ])
    }
}

/// Filter for image-capture events of one camera: `{task, vsn}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageQuery {
    pub task: String,
    pub node_id: String,
}

impl ImageQuery {
    pub fn camera(camera: &str, node_id: &str) -> Self {
        Self {
            task: format!("{IMAGE_TASK_PREFIX}{camera}"),
            node_id: node_id.to_string(),
        }
    }

    fn wire(&self) -> BTreeMap<&'static str, &str> {
        BTreeMap::from([("task", self.task.as_str()), ("vsn", self.node_id.as_str())])
    }
}

/// Anything that can answer windowed telemetry queries for the dashboard pipeline.
pub trait TelemetrySource: Send + Sync {
    fn query(
        &self,
        filter: &QueryFilter,
        window: &TimeWindow,
    ) -> Result<TelemetrySeries, QueryError>;

    fn query_images(
        &self,
        query: &ImageQuery,
        window: &TimeWindow,
    ) -> Result<Vec<ImageRecord>, QueryError>;
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    start: String,
    end: String,
    filter: BTreeMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Record {
    /// 1-based line of the record in the response body.
    #[serde(skip)]
    pub(crate) line: usize,
    pub(crate) timestamp: DateTime<Utc>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    pub(crate) value: JsonValue,
}

/// Blocking client for the Sage data service query endpoint.
#[derive(Debug, Clone)]
pub struct DataClient {
    http: HttpClient,
    endpoint: Url,
}

impl DataClient {
    pub fn new(endpoint: Url, timeout: Duration, user_agent: &str) -> Result<Self, QueryError> {
        let http = HttpClient::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(QueryError::Transport)?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn fetch_records(
        &self,
        filter: BTreeMap<&'static str, &str>,
        window: &TimeWindow,
    ) -> Result<Vec<Record>, QueryError> {
        if window.is_empty() {
            tracing::debug!(start = %window.start(), "empty window; skipping telemetry query");
            return Ok(Vec::new());
        }

        let request = QueryRequest {
            start: format_bound(window.start()),
            end: format_bound(window.end()),
            filter,
        };
        tracing::debug!(
            endpoint = %self.endpoint,
            start = %request.start,
            end = %request.end,
            filter = ?request.filter,
            "issuing telemetry query"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .map_err(QueryError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().unwrap_or_default();
            truncate_at_char_boundary(&mut body, ERROR_BODY_LIMIT);
            return Err(QueryError::Status { status, body });
        }
        let body = response.text().map_err(QueryError::from_reqwest)?;
        parse_records(&body)
    }
}

impl TelemetrySource for DataClient {
    fn query(
        &self,
        filter: &QueryFilter,
        window: &TimeWindow,
    ) -> Result<TelemetrySeries, QueryError> {
        let records = self.fetch_records(filter.wire(), window)?;
        let series = records_to_series(records)?;
        tracing::info!(
            metric = %filter.metric_name,
            node = %filter.node_id,
            points = series.len(),
            "telemetry query complete"
        );
        Ok(series)
    }

    fn query_images(
        &self,
        query: &ImageQuery,
        window: &TimeWindow,
    ) -> Result<Vec<ImageRecord>, QueryError> {
        let records = self.fetch_records(query.wire(), window)?;
        let images = records_to_images(records)?;
        tracing::info!(
            task = %query.task,
            node = %query.node_id,
            images = images.len(),
            "image record query complete"
        );
        Ok(images)
    }
}

/// Parses a newline-delimited JSON body. Blank lines are ignored; anything else that is
/// not a record fails the whole response.
pub(crate) fn parse_records(body: &str) -> Result<Vec<Record>, QueryError> {
    let mut records = Vec::new();
    for (idx, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut record: Record =
            serde_json::from_str(line).map_err(|err| QueryError::Malformed {
                line: idx + 1,
                message: err.to_string(),
            })?;
        record.line = idx + 1;
        records.push(record);
    }
    Ok(records)
}

pub(crate) fn records_to_series(records: Vec<Record>) -> Result<TelemetrySeries, QueryError> {
    let mut points = Vec::with_capacity(records.len());
    for record in records {
        let value = match &record.value {
            JsonValue::Number(num) => num.as_f64(),
            JsonValue::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| QueryError::Malformed {
            line: record.line,
            message: format!(
                "non-numeric value {} for {}",
                record.value,
                record.name.as_deref().unwrap_or("metric")
            ),
        })?;
        points.push(TelemetryPoint {
            timestamp: record.timestamp,
            value,
        });
    }
    Ok(TelemetrySeries::from_points(points))
}

pub(crate) fn records_to_images(records: Vec<Record>) -> Result<Vec<ImageRecord>, QueryError> {
    let mut images = Vec::with_capacity(records.len());
    for record in records {
        let uri = match record.value {
            JsonValue::String(uri) => uri,
            other => {
                return Err(QueryError::Malformed {
                    line: record.line,
                    message: format!("image record value {other} is not a URI"),
                })
            }
        };
        images.push(ImageRecord {
            timestamp: record.timestamp,
            source_uri: uri,
        });
    }
    images.sort_by_key(|image| image.timestamp);
    Ok(images)
}

fn truncate_at_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
