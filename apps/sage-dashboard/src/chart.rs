//! Payloads handed to the rendering layer. Nothing here draws; it only decides what
//! series, labels and states a page shows.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{axis_label, display_name, RainParameter};
use crate::images::ImageOutcome;
use crate::series::TelemetrySeries;
use crate::smoothing::{smooth_series, RollingStat};

pub const RAW_TRACE: &str = "Raw data";
pub const MEAN_TRACE: &str = "Rolling average (1h)";
pub const SUM_TRACE: &str = "Rolling sum (1h)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartStatus {
    Ready,
    NoData,
}

impl ChartStatus {
    fn of(series: &TelemetrySeries) -> Self {
        if series.is_empty() {
            ChartStatus::NoData
        } else {
            ChartStatus::Ready
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TracePoint {
    pub timestamp: DateTime<Utc>,
    /// `None` where the statistic is undefined; renderers leave a gap.
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub name: String,
    pub points: Vec<TracePoint>,
}

impl Trace {
    fn raw(series: &TelemetrySeries) -> Self {
        Self {
            name: RAW_TRACE.to_string(),
            points: series
                .points()
                .iter()
                .map(|p| TracePoint {
                    timestamp: p.timestamp,
                    value: Some(p.value),
                })
                .collect(),
        }
    }

    fn smoothed(name: &str, series: &TelemetrySeries, stat: RollingStat) -> Self {
        let values = smooth_series(series, stat);
        Self {
            name: name.to_string(),
            points: series
                .points()
                .iter()
                .zip(values)
                .map(|(p, value)| TracePoint {
                    timestamp: p.timestamp,
                    value,
                })
                .collect(),
        }
    }

    pub fn defined_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().filter_map(|p| p.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentChart {
    pub title: String,
    pub node_id: String,
    pub parameter: String,
    pub y_axis_label: String,
    pub status: ChartStatus,
    pub mean: Option<f64>,
    pub raw: Trace,
    pub rolling_mean: Trace,
}

pub fn environment_chart(
    series: &TelemetrySeries,
    node_id: &str,
    parameter: &str,
    unit: &str,
) -> EnvironmentChart {
    EnvironmentChart {
        title: format!("Node {node_id}"),
        node_id: node_id.to_string(),
        parameter: parameter.to_string(),
        y_axis_label: axis_label(parameter, unit),
        status: ChartStatus::of(series),
        mean: series.mean(),
        raw: Trace::raw(series),
        rolling_mean: Trace::smoothed(MEAN_TRACE, series, RollingStat::Mean),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RainChart {
    pub title: String,
    pub node_id: String,
    pub parameter: String,
    pub y_axis_label: String,
    pub status: ChartStatus,
    pub raw: Trace,
    /// Only rain intensity carries a secondary rolling-sum axis.
    pub rolling_sum: Option<Trace>,
}

pub fn rain_chart(series: &TelemetrySeries, node_id: &str, parameter: &RainParameter) -> RainChart {
    let rolling_sum = parameter
        .is_intensity()
        .then(|| Trace::smoothed(SUM_TRACE, series, RollingStat::Sum));
    RainChart {
        title: format!("Node {node_id}"),
        node_id: node_id.to_string(),
        parameter: parameter.key.to_string(),
        y_axis_label: axis_label(parameter.label, parameter.unit),
        status: ChartStatus::of(series),
        raw: Trace::raw(series),
        rolling_sum,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryItem {
    pub caption: String,
    pub timestamp: DateTime<Utc>,
    pub source_uri: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageGallery {
    pub title: String,
    pub node_id: String,
    pub camera: String,
    pub items: Vec<GalleryItem>,
}

impl ImageGallery {
    pub fn failures(&self) -> usize {
        self.items.iter().filter(|item| item.error.is_some()).count()
    }
}

pub fn image_gallery(node_id: &str, camera: &str, outcomes: &[ImageOutcome]) -> ImageGallery {
    let items = outcomes
        .iter()
        .map(|(record, result)| {
            let (width, height, error) = match result {
                Ok(image) => (Some(image.width()), Some(image.height()), None),
                Err(err) => (None, None, Some(err.to_string())),
            };
            GalleryItem {
                caption: record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                timestamp: record.timestamp,
                source_uri: record.source_uri.clone(),
                width,
                height,
                error,
            }
        })
        .collect();
    ImageGallery {
        title: format!("{} camera, node {node_id}", display_name(camera)),
        node_id: node_id.to_string(),
        camera: camera.to_string(),
        items,
    }
}
